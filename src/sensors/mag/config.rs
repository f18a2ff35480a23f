use std::time::Duration;

use clap::ValueEnum;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::sensors::codec::gain_for_cycle_count;
use crate::sensors::error::SensorError;

pub const CYCLE_COUNT_MAX: u16 = 2048;
pub const CYCLE_COUNT_DEFAULT: u16 = 400;
pub const SAMPLE_RATE_DEFAULT: u16 = 200;
pub const DRDY_TIMEOUT_DEFAULT: Duration = Duration::from_millis(300);

/// Mode d'acquisition du RM3100
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    /// Une mesure par déclenchement
    #[default]
    #[value(alias = "0")]
    Poll,
    /// Mesure continue (CMM), armée une seule fois
    #[value(alias = "1")]
    Continuous,
}

/// Configuration du magnétomètre.
///
/// Les gains ne sont jamais modifiables directement : ils sont recalculés à
/// chaque changement de cycle count.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    cycle_counts: [u16; 3],
    gains: [u16; 3],
    pub mode: SamplingMode,
    pub sample_rate_hz: u16,
    pub tmrc_override: Option<u8>,
    averaging: Option<u8>,
    pub drdy_delay: Duration,
    pub drdy_timeout: Duration,
}

impl DeviceConfig {
    pub fn new(cycle_counts: [u16; 3]) -> Result<Self, SensorError> {
        let mut config = DeviceConfig::default();
        config.set_cycle_counts(cycle_counts)?;
        Ok(config)
    }

    /// Change les cycle counts (X, Y, Z) et recalcule les gains
    pub fn set_cycle_counts(&mut self, cycle_counts: [u16; 3]) -> Result<(), SensorError> {
        if let Some(invalid) = cycle_counts.iter().find(|cc| **cc == 0 || **cc > CYCLE_COUNT_MAX) {
            return Err(SensorError::InvalidCycleCount(*invalid));
        }

        let mut gains = [0u16; 3];
        for (gain, cc) in gains.iter_mut().zip(cycle_counts.iter()) {
            *gain = match gain_for_cycle_count(*cc) {
                Ok(gain) => gain,
                Err(SensorError::GainTableExceeded { clamped, .. }) => {
                    warn!("[MAG] Cycle count {} au-delà de la table de gain, gain {} utilisé.", cc, clamped);
                    clamped
                }
                Err(e) => return Err(e),
            };
        }

        self.cycle_counts = cycle_counts;
        self.gains = gains;
        Ok(())
    }

    pub fn cycle_counts(&self) -> [u16; 3] {
        self.cycle_counts
    }

    /// Gains (LSB/µT) par axe
    pub fn gains(&self) -> [u16; 3] {
        self.gains
    }

    /// Valeur du registre NOS, `None` si non configuré
    pub fn averaging(&self) -> Option<u8> {
        self.averaging
    }

    pub fn set_averaging(&mut self, nos: Option<u8>) -> Result<(), SensorError> {
        if nos == Some(0) {
            return Err(SensorError::InvalidAveraging(0));
        }
        self.averaging = nos;
        Ok(())
    }

    /// Facteur de moyenne appliqué à la mise à l'échelle
    pub fn averaging_factor(&self) -> f64 {
        self.averaging.map(f64::from).unwrap_or(1.0)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            cycle_counts: [CYCLE_COUNT_DEFAULT; 3],
            gains: [150; 3],
            mode: SamplingMode::Poll,
            sample_rate_hz: SAMPLE_RATE_DEFAULT,
            tmrc_override: None,
            averaging: None,
            drdy_delay: Duration::ZERO,
            drdy_timeout: DRDY_TIMEOUT_DEFAULT,
        }
    }
}
