use std::time::Duration;

use thiserror::Error;

use crate::i2c::BusError;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("périphérique inattendu à {address:#04x}: révision {found:#04x}, attendu {expected:#04x}")]
    UnexpectedDevice { address: u16, expected: u8, found: u8 },

    #[error("DRDY toujours bas à {address:#04x} après {waited:?}")]
    DeviceTimeout { address: u16, waited: Duration },

    #[error("cycle count {cycle_count} hors de la table de gain, gain limité à {clamped}")]
    GainTableExceeded { cycle_count: u16, clamped: u16 },

    #[error("cycle count {0} invalide (1..=2048)")]
    InvalidCycleCount(u16),

    #[error("valeur NOS {0} invalide (>= 1)")]
    InvalidAveraging(u8),
}

impl SensorError {
    /// Erreur qui doit arrêter l'acquisition
    pub fn is_fatal(&self) -> bool {
        match self {
            SensorError::Bus(e) => e.is_fatal(),
            SensorError::UnexpectedDevice { .. }
            | SensorError::InvalidCycleCount(_)
            | SensorError::InvalidAveraging(_) => true,
            SensorError::DeviceTimeout { .. } | SensorError::GainTableExceeded { .. } => false,
        }
    }
}
