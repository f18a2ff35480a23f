use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::cli::Cli;
use crate::sensors::mag::config::{CYCLE_COUNT_DEFAULT, DRDY_TIMEOUT_DEFAULT, SAMPLE_RATE_DEFAULT};
use crate::sensors::mag::registry::RM3100_ADDR;
use crate::sensors::mag::{DeviceConfig, SamplingMode};
use crate::sensors::temp::registry::{MCP9808_LOCAL_ADDR, MCP9808_REMOTE_ADDR};

/// Fichiers journaliers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    pub site_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            enabled: false,
            directory: PathBuf::from("./logs/"),
            site_prefix: "SITEPREFIX".to_string(),
        }
    }
}

/// Configuration complète d'une exécution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: u8,
    pub mag_addr: u16,
    pub remote_temp_addr: u16,
    pub local_temp_addr: u16,

    pub cycle_counts: [u16; 3],
    pub mode: SamplingMode,
    pub sample_rate_hz: u16,
    pub tmrc: Option<u8>,
    pub nos: Option<u8>,
    pub drdy_delay_us: u64,
    pub drdy_timeout_ms: u64,
    pub out_delay_ms: u64,

    pub magnetometer_only: bool,
    pub local_temp_only: bool,
    pub remote_temp_only: bool,

    pub json: bool,
    pub hide_raw: bool,
    pub show_total: bool,
    pub ts_milliseconds: bool,
    pub single_read: bool,
    pub read_back_cc: bool,
    pub show_parameters: bool,

    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bus: 1,
            mag_addr: RM3100_ADDR,
            remote_temp_addr: MCP9808_REMOTE_ADDR,
            local_temp_addr: MCP9808_LOCAL_ADDR,
            cycle_counts: [CYCLE_COUNT_DEFAULT; 3],
            mode: SamplingMode::Poll,
            sample_rate_hz: SAMPLE_RATE_DEFAULT,
            tmrc: None,
            nos: None,
            drdy_delay_us: 0,
            drdy_timeout_ms: DRDY_TIMEOUT_DEFAULT.as_millis() as u64,
            out_delay_ms: 1000,
            magnetometer_only: false,
            local_temp_only: false,
            remote_temp_only: false,
            json: false,
            hide_raw: false,
            show_total: false,
            ts_milliseconds: false,
            single_read: false,
            read_back_cc: false,
            show_parameters: false,
            log: LogConfig::default(),
        }
    }
}

/// Capteur de température à interroger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempSite {
    Remote,
    Local,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    /// Charge un fichier JSON, les champs absents prennent leur valeur par défaut
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("[CONFIG] Chargement de {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Impossible de lire la configuration {:?}", path))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("Configuration JSON invalide dans {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("Impossible de sérialiser la configuration")?;
        fs::write(path, json).with_context(|| format!("Impossible d'écrire la configuration {:?}", path))?;
        Ok(())
    }

    /// Applique les options de la ligne de commande par-dessus la configuration
    pub fn apply_args(&mut self, args: &Cli) {
        if let Some(bus) = args.bus {
            self.bus = bus;
        }
        if let Some(addr) = args.mag_addr {
            self.mag_addr = addr;
        }
        if let Some(addr) = args.remote_addr {
            self.remote_temp_addr = addr;
        }
        if let Some(addr) = args.local_addr {
            self.local_temp_addr = addr;
        }
        if let Some(cc) = args.cycle_count {
            self.cycle_counts = [cc; 3];
        }
        if let Some(mode) = args.mode {
            self.mode = mode;
        }
        if let Some(rate) = args.sample_rate {
            self.sample_rate_hz = rate;
        }
        if args.tmrc.is_some() {
            self.tmrc = args.tmrc;
        }
        if args.nos.is_some() {
            self.nos = args.nos;
        }
        if let Some(delay) = args.drdy_delay {
            self.drdy_delay_us = delay;
        }
        if let Some(timeout) = args.drdy_timeout {
            self.drdy_timeout_ms = timeout;
        }
        if let Some(delay) = args.out_delay {
            self.out_delay_ms = delay;
        }

        self.magnetometer_only |= args.mag_only;
        self.local_temp_only |= args.local_only;
        self.remote_temp_only |= args.remote_only;
        self.json |= args.json;
        self.hide_raw |= args.hide_raw;
        self.show_total |= args.total;
        self.ts_milliseconds |= args.ts_milliseconds;
        self.single_read |= args.single;
        self.read_back_cc |= args.read_back;
        self.show_parameters |= args.show_parameters;

        // -O et -S impliquent -k
        self.log.enabled |= args.log;
        if let Some(dir) = &args.output_dir {
            self.log.directory = dir.clone();
            self.log.enabled = true;
        }
        if let Some(prefix) = &args.site_prefix {
            self.log.site_prefix = prefix.clone();
            self.log.enabled = true;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.device_config().map(|_| ())
    }

    /// Configuration du magnétomètre dérivée de la configuration globale
    pub fn device_config(&self) -> Result<DeviceConfig> {
        let mut device = DeviceConfig::new(self.cycle_counts).context("Cycle counts invalides")?;
        device.set_averaging(self.nos).context("Valeur NOS invalide")?;
        device.mode = self.mode;
        device.sample_rate_hz = self.sample_rate_hz;
        device.tmrc_override = self.tmrc;
        device.drdy_delay = Duration::from_micros(self.drdy_delay_us);
        device.drdy_timeout = Duration::from_millis(self.drdy_timeout_ms);
        Ok(device)
    }

    /// Capteurs de température lus à chaque itération, dans l'ordre
    pub fn temperature_sites(&self) -> Vec<(TempSite, u16)> {
        if self.magnetometer_only {
            return Vec::new();
        }

        if self.remote_temp_only {
            vec![(TempSite::Remote, self.remote_temp_addr)]
        } else if self.local_temp_only {
            vec![(TempSite::Local, self.local_temp_addr)]
        } else {
            vec![(TempSite::Remote, self.remote_temp_addr), (TempSite::Local, self.local_temp_addr)]
        }
    }

    pub fn out_delay(&self) -> Duration {
        Duration::from_millis(self.out_delay_ms)
    }
}
