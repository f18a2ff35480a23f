use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info};

use crate::config::LogConfig;

/// Nom du fichier journalier : `<prefix>-<YYYYMMDD>-runmag.log`
pub fn file_name(prefix: &str, date: NaiveDate) -> String {
    format!("{}-{}-runmag.log", prefix, date.format("%Y%m%d"))
}

struct Rolling {
    directory: PathBuf,
    prefix: String,
    day: NaiveDate,
    path: PathBuf,
    file: File,
}

impl Rolling {
    fn open(directory: &Path, prefix: &str, day: NaiveDate) -> Result<(PathBuf, File, bool)> {
        fs::create_dir_all(directory)
            .with_context(|| format!("Impossible de créer le répertoire {:?}", directory))?;
        let path = directory.join(file_name(prefix, day));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Impossible d'ouvrir le journal {:?}", path))?;
        let empty = file.metadata().map(|m| m.len() == 0).unwrap_or(true);
        info!("[LOG] Ecriture dans {:?}", path);
        Ok((path, file, empty))
    }
}

enum Target {
    Stdout,
    File(Rolling),
}

/// Destination des lignes de mesure
pub struct Sink {
    target: Target,
    header: Option<String>,
}

impl Sink {
    /// Fichier journalier si activé, sinon sortie standard
    pub fn open(log: &LogConfig, header: Option<String>, now: DateTime<Utc>) -> Result<Self> {
        if log.enabled {
            Sink::rolling(&log.directory, &log.site_prefix, header, now)
        } else {
            Sink::stdout(header)
        }
    }

    /// Sortie standard, l'en-tête est écrit immédiatement
    pub fn stdout(header: Option<String>) -> Result<Self> {
        let sink = Sink { target: Target::Stdout, header };
        if let Some(header) = &sink.header {
            let mut out = io::stdout().lock();
            writeln!(out, "{}", header).context("Ecriture sur la sortie standard")?;
        }
        Ok(sink)
    }

    /// Fichier journalier dans `directory`, ouvert en ajout
    pub fn rolling<P: AsRef<Path>>(
        directory: P,
        prefix: &str,
        header: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        let day = now.date_naive();
        let (path, file, empty) = Rolling::open(&directory, prefix, day)?;

        let mut sink = Sink {
            target: Target::File(Rolling { directory, prefix: prefix.to_string(), day, path, file }),
            header,
        };
        if empty {
            sink.write_header()?;
        }
        Ok(sink)
    }

    /// Chemin du journal courant
    pub fn path(&self) -> Option<&Path> {
        match &self.target {
            Target::Stdout => None,
            Target::File(rolling) => Some(&rolling.path),
        }
    }

    fn write_header(&mut self) -> Result<()> {
        if let (Some(header), Target::File(rolling)) = (&self.header, &mut self.target) {
            writeln!(rolling.file, "{}", header)
                .with_context(|| format!("Ecriture de l'en-tête dans {:?}", rolling.path))?;
        }
        Ok(())
    }

    /// Change de fichier si le jour UTC a changé. Un échec est fatal.
    pub fn roll_over(&mut self, now: DateTime<Utc>) -> Result<bool> {
        let Target::File(rolling) = &mut self.target else {
            return Ok(false);
        };

        let day = now.date_naive();
        if day == rolling.day {
            return Ok(false);
        }

        rolling.file.flush().ok();
        debug!("[LOG] Changement de jour, fermeture de {:?}", rolling.path);
        let (path, file, empty) = Rolling::open(&rolling.directory, &rolling.prefix, day)?;
        rolling.day = day;
        rolling.path = path;
        rolling.file = file;

        if empty {
            self.write_header()?;
        }
        Ok(true)
    }

    pub fn write_line(&mut self, line: &str) -> Result<()> {
        match &mut self.target {
            Target::Stdout => {
                let mut out = io::stdout().lock();
                writeln!(out, "{}", line).context("Ecriture sur la sortie standard")?;
                out.flush().context("Ecriture sur la sortie standard")?;
            }
            Target::File(rolling) => {
                writeln!(rolling.file, "{}", line)
                    .with_context(|| format!("Ecriture dans {:?}", rolling.path))?;
                rolling.file.flush().ok();
            }
        }
        Ok(())
    }
}
