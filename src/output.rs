use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{Config, TempSite};
use crate::i2c::bus_path;
use crate::sensors::codec::GAIN_TABLE;
use crate::sensors::mag::{RawSample, ScaledSample};

/// Format d'horodatage texte (RFC 2822 sans jour ni fuseau)
pub const UTC_FORMAT: &str = "%d %b %Y %T";

/// Une ligne de sortie
#[derive(Debug, Clone)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    pub temperatures: Vec<(TempSite, Option<f32>)>,
    pub raw: RawSample,
    pub field: ScaledSample,
}

#[derive(Serialize)]
struct JsonRecord {
    ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    rt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lt: Option<f64>,
    x: f64,
    y: f64,
    z: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    rx: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ry: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rz: Option<i32>,
    #[serde(rename = "Tm", skip_serializing_if = "Option::is_none")]
    total: Option<f64>,
}

fn round(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Mise en forme des mesures
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputFormat {
    pub json: bool,
    pub hide_raw: bool,
    pub show_total: bool,
    pub ts_milliseconds: bool,
}

impl OutputFormat {
    pub fn from_config(config: &Config) -> Self {
        OutputFormat {
            json: config.json,
            hide_raw: config.hide_raw,
            show_total: config.show_total,
            ts_milliseconds: config.ts_milliseconds,
        }
    }

    fn timestamp(&self, ts: &DateTime<Utc>) -> String {
        if self.ts_milliseconds {
            ts.timestamp_millis().to_string()
        } else {
            ts.format(UTC_FORMAT).to_string()
        }
    }

    /// En-tête CSV (rien en JSON)
    pub fn header(&self, sites: &[TempSite]) -> Option<String> {
        if self.json {
            return None;
        }

        let mut columns = vec!["\"time\""];
        for site in sites {
            columns.push(match site {
                TempSite::Remote => "\"rtemp\"",
                TempSite::Local => "\"ltemp\"",
            });
        }
        columns.extend(["\"x\"", "\"y\"", "\"z\""]);
        if !self.hide_raw {
            columns.extend(["\"rx\"", "\"ry\"", "\"rz\""]);
        }
        if self.show_total {
            columns.push("\"total\"");
        }
        Some(columns.join(", "))
    }

    pub fn render(&self, record: &Record) -> String {
        if self.json {
            self.render_json(record)
        } else {
            self.render_text(record)
        }
    }

    fn render_text(&self, record: &Record) -> String {
        let mut line = if self.ts_milliseconds {
            self.timestamp(&record.timestamp)
        } else {
            format!("\"{}\"", self.timestamp(&record.timestamp))
        };

        for (_, temp) in &record.temperatures {
            match temp {
                Some(celsius) => {
                    let _ = write!(line, ", {:.2}", celsius);
                }
                None => line.push_str(", \"ERROR\""),
            }
        }

        let field = &record.field.field;
        let _ = write!(line, ", {:.4}, {:.4}, {:.4}", field.x, field.y, field.z);
        if !self.hide_raw {
            let _ = write!(line, ", {}, {}, {}", record.raw.x, record.raw.y, record.raw.z);
        }
        if self.show_total {
            let _ = write!(line, ", {:.4}", record.field.total());
        }
        line
    }

    fn render_json(&self, record: &Record) -> String {
        let temperature = |wanted: TempSite| {
            record
                .temperatures
                .iter()
                .find(|(site, _)| *site == wanted)
                .map(|(_, temp)| round(temp.unwrap_or(0.0) as f64, 2))
        };
        let field = &record.field.field;
        let raw = !self.hide_raw;

        let json = JsonRecord {
            ts: self.timestamp(&record.timestamp),
            rt: temperature(TempSite::Remote),
            lt: temperature(TempSite::Local),
            x: round(field.x, 4),
            y: round(field.y, 4),
            z: round(field.z, 4),
            rx: raw.then_some(record.raw.x),
            ry: raw.then_some(record.raw.y),
            rz: raw.then_some(record.raw.z),
            total: self.show_total.then(|| round(record.field.total(), 4)),
        };

        // Un struct sans map ni clé non-texte se sérialise toujours
        serde_json::to_string(&json).unwrap_or_default()
    }
}

/// Relation cycle count / gain / sensibilité (`-E`)
pub fn gain_table() -> String {
    let mut out = String::new();
    out.push_str("    ----------------------------------------------------------------------\n");
    out.push_str("    |   Cycle Count / Gain / Sensibilité     |     Mesure RM3100         |\n");
    out.push_str("    |--------------------------------------------------------------------|\n");
    out.push_str("    | Cycle |   Gain   |    Sensibilité      |  comptes | microTesla (uT) |\n");
    out.push_str("    | Count | (LSB/uT) |     (nT/LSB)        |          |                 |\n");
    out.push_str("    |--------------------------------------------------------------------|\n");
    for (cc, gain) in GAIN_TABLE {
        let gain = gain as f64;
        let _ = writeln!(
            out,
            "    | {:>5} | {:>8} | {:>19.3} | {:>8} | {:>15.3} |",
            cc,
            gain,
            1000.0 / gain,
            3000,
            3000.0 / gain
        );
    }
    out.push_str("    ----------------------------------------------------------------------\n");
    out.push_str("Source : RM3100_FAQ_R02.pdf\n");
    out
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "OUI"
    } else {
        "NON"
    }
}

/// Paramètres courants (`-P`)
pub fn show_settings(config: &Config, revision: Option<u8>, gains: [u16; 3]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\nVersion = {}\n\nParamètres courants :\n", env!("CARGO_PKG_VERSION"));
    let mut line = |label: &str, value: String| {
        let _ = writeln!(out, "   {:<44}{}", format!("{}:", label), value);
    };

    line(
        "Révision du magnétomètre",
        revision.map(|r| format!("{:#04x}", r)).unwrap_or_else(|| "non lue".to_string()),
    );
    line("Bus I2C", format!("{} ({})", config.bus, bus_path(config.bus)));
    line("Adresse du magnétomètre", format!("{:#04x}", config.mag_addr));
    line("Adresse température distante", format!("{:#04x}", config.remote_temp_addr));
    line("Adresse température locale", format!("{:#04x}", config.local_temp_addr));
    line("Mode d'acquisition", format!("{:?}", config.mode));
    line(
        "Cycle counts",
        format!("X: {} Y: {} Z: {}", config.cycle_counts[0], config.cycle_counts[1], config.cycle_counts[2]),
    );
    line("Gains", format!("X: {} Y: {} Z: {}", gains[0], gains[1], gains[2]));
    line("Fréquence CMM (Hz)", config.sample_rate_hz.to_string());
    line(
        "Registre TMRC forcé",
        config.tmrc.map(|t| format!("{:#04x}", t)).unwrap_or_else(|| "non".to_string()),
    );
    line(
        "Registre NOS",
        config.nos.map(|n| n.to_string()).unwrap_or_else(|| "non".to_string()),
    );
    line("Délai après déclenchement (µs)", config.drdy_delay_us.to_string());
    line("Délai max DRDY (ms)", config.drdy_timeout_ms.to_string());
    line("Délai entre mesures (ms)", config.out_delay_ms.to_string());
    line("Relecture des cycle counts", yes_no(config.read_back_cc).to_string());
    line("Sortie JSON", yes_no(config.json).to_string());
    line("Magnétomètre uniquement", yes_no(config.magnetometer_only).to_string());
    line("Température locale uniquement", yes_no(config.local_temp_only).to_string());
    line("Température distante uniquement", yes_no(config.remote_temp_only).to_string());
    line("Masquer les mesures brutes", yes_no(config.hide_raw).to_string());
    line("Champ total", yes_no(config.show_total).to_string());
    line("Horodatage", if config.ts_milliseconds { "ms" } else { "UTC" }.to_string());
    line("Une seule mesure", yes_no(config.single_read).to_string());
    line("Fichiers journaliers", yes_no(config.log.enabled).to_string());
    line("Répertoire des journaux", config.log.directory.display().to_string());
    line("Préfixe des journaux", config.log.site_prefix.clone());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nalgebra::Vector3;

    fn record() -> Record {
        Record {
            timestamp: Utc.with_ymd_and_hms(2026, 10, 16, 12, 30, 5).unwrap(),
            temperatures: vec![(TempSite::Remote, Some(21.5)), (TempSite::Local, None)],
            raw: RawSample { x: 750, y: -750, z: 0 },
            field: ScaledSample { field: Vector3::new(10.0, -10.0, 0.0) },
        }
    }

    #[test]
    fn text_line() {
        let format = OutputFormat { show_total: true, ..Default::default() };
        assert_eq!(
            format.render(&record()),
            "\"16 Oct 2026 12:30:05\", 21.50, \"ERROR\", 10.0000, -10.0000, 0.0000, 750, -750, 0, 14.1421"
        );
    }

    #[test]
    fn text_header_follows_columns() {
        let format = OutputFormat { hide_raw: true, ..Default::default() };
        assert_eq!(
            format.header(&[TempSite::Remote]).unwrap(),
            "\"time\", \"rtemp\", \"x\", \"y\", \"z\""
        );
        assert!(OutputFormat { json: true, ..Default::default() }.header(&[]).is_none());
    }

    #[test]
    fn json_line() {
        let format = OutputFormat { json: true, show_total: true, ts_milliseconds: true, ..Default::default() };
        let line = format.render(&record());
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["ts"], "1792153805000");
        assert_eq!(value["rt"], 21.5);
        assert_eq!(value["lt"], 0.0);
        assert_eq!(value["x"], 10.0);
        assert_eq!(value["y"], -10.0);
        assert_eq!(value["rx"], 750);
        assert_eq!(value["Tm"], 14.1421);
        assert!(!line.contains('\n'));
    }

    #[test]
    fn json_hides_raw_and_total() {
        let format = OutputFormat { json: true, hide_raw: true, ..Default::default() };
        let mut record = record();
        record.temperatures.clear();
        let value: serde_json::Value = serde_json::from_str(&format.render(&record)).unwrap();

        let object = value.as_object().unwrap();
        assert!(!object.contains_key("rx"));
        assert!(!object.contains_key("Tm"));
        assert!(!object.contains_key("rt"));
        assert_eq!(value["ts"], "16 Oct 2026 12:30:05");
    }

    #[test]
    fn gain_table_lists_presets() {
        let table = gain_table();
        assert!(table.contains("13.333"));
        assert!(table.contains("150"));
    }

    #[test]
    fn settings_show_gains() {
        let settings = show_settings(&Config::new(), Some(0x22), [75; 3]);
        assert!(settings.contains("0x22"));
        assert!(settings.contains("X: 75 Y: 75 Z: 75"));
    }
}
