use std::path::PathBuf;

use clap::Parser;

use crate::sensors::mag::config::CYCLE_COUNT_MAX;
use crate::sensors::mag::SamplingMode;

/// Lecture d'un magnétomètre RM3100 et de capteurs MCP9808 sur I2C
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "runmag", version, about)]
pub struct Cli {
    /// Liste les bus I2C des cartes connues
    #[arg(short = 'a', long)]
    pub list_buses: bool,

    /// Valeur du registre NOS (moyenne)
    #[arg(short = 'A', long, value_parser = clap::value_parser!(u8).range(1..))]
    pub nos: Option<u8>,

    /// Numéro du bus I2C (/dev/i2c-N)
    #[arg(short = 'b', long)]
    pub bus: Option<u8>,

    /// Relis les registres de cycle count après configuration
    #[arg(short = 'C', long)]
    pub read_back: bool,

    /// Cycle count des trois axes
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u16).range(1..=CYCLE_COUNT_MAX as i64))]
    pub cycle_count: Option<u16>,

    /// Fréquence CMM en Hz
    #[arg(short = 'D', long)]
    pub sample_rate: Option<u16>,

    /// Valeur brute du registre TMRC (hexa), remplace -D
    #[arg(short = 't', long, value_parser = parse_hex_u8)]
    pub tmrc: Option<u8>,

    /// Affiche la relation cycle count / gain / sensibilité
    #[arg(short = 'E', long)]
    pub gain_table: bool,

    /// Charge la configuration depuis un fichier JSON
    #[arg(short = 'f', long)]
    pub config: Option<PathBuf>,

    /// Sauvegarde la configuration effective dans un fichier JSON
    #[arg(short = 'F', long)]
    pub save_config: Option<PathBuf>,

    /// Mode d'acquisition
    #[arg(short = 'g', long, value_enum)]
    pub mode: Option<SamplingMode>,

    /// Masque les mesures brutes
    #[arg(short = 'H', long)]
    pub hide_raw: bool,

    /// Sortie JSON
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Ecrit dans des fichiers journaliers
    #[arg(short = 'k', long)]
    pub log: bool,

    /// Adresse du capteur de température local (hexa)
    #[arg(short = 'L', long, value_parser = parse_address)]
    pub local_addr: Option<u16>,

    /// Température locale uniquement
    #[arg(short = 'l', long)]
    pub local_only: bool,

    /// Adresse du magnétomètre (hexa)
    #[arg(short = 'M', long, value_parser = parse_address)]
    pub mag_addr: Option<u16>,

    /// Magnétomètre uniquement
    #[arg(short = 'm', long)]
    pub mag_only: bool,

    /// Répertoire des fichiers journaliers
    #[arg(short = 'O', long)]
    pub output_dir: Option<PathBuf>,

    /// Affiche les paramètres
    #[arg(short = 'P', long)]
    pub show_parameters: bool,

    /// Mode silencieux
    #[arg(short = 'q', long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Mode verbeux
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Adresse du capteur de température distant (hexa)
    #[arg(short = 'R', long, value_parser = parse_address)]
    pub remote_addr: Option<u16>,

    /// Température distante uniquement
    #[arg(short = 'r', long)]
    pub remote_only: bool,

    /// Une seule mesure
    #[arg(short = 's', long)]
    pub single: bool,

    /// Préfixe des fichiers journaliers (indicatif par exemple)
    #[arg(short = 'S', long, value_parser = parse_site_prefix)]
    pub site_prefix: Option<String>,

    /// Horodatage en millisecondes
    #[arg(short = 'T', long)]
    pub ts_milliseconds: bool,

    /// Affiche le champ total
    #[arg(short = 'Z', long)]
    pub total: bool,

    /// Délai après déclenchement POLL (µs)
    #[arg(short = 'W', long)]
    pub drdy_delay: Option<u64>,

    /// Délai maximal d'attente de DRDY (ms)
    #[arg(long)]
    pub drdy_timeout: Option<u64>,

    /// Délai entre deux mesures (ms)
    #[arg(long)]
    pub out_delay: Option<u64>,
}

fn parse_hex(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|e| format!("valeur hexadécimale invalide '{}': {}", s, e))
}

/// Adresse 7 bits en hexadécimal ("20" ou "0x20")
pub fn parse_address(s: &str) -> Result<u16, String> {
    let value = parse_hex(s)?;
    if value > 0x7F {
        return Err(format!("adresse {:#x} hors de la plage 7 bits", value));
    }
    Ok(value as u16)
}

pub fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let value = parse_hex(s)?;
    u8::try_from(value).map_err(|_| format!("{:#x} ne tient pas sur un octet", value))
}

const SITE_PREFIX_MAX: usize = 32;

fn parse_site_prefix(s: &str) -> Result<String, String> {
    if s.len() > SITE_PREFIX_MAX {
        return Err(format!("le préfixe doit faire au plus {} caractères", SITE_PREFIX_MAX));
    }
    if s.chars().any(|c| matches!(c, '/' | '\\' | '\'' | '"' | '*')) {
        return Err("le préfixe ne doit pas contenir / \\ ' \" *".to_string());
    }
    Ok(s.to_string())
}
