use log::{debug, warn};

use crate::i2c::{self, Bus, BusError, RegisterIo, Tolerate};
use crate::sensors::codec::{decode_temperature13, temperature_celsius};

pub mod registry;

/// Lecture brute du registre de température ambiante
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemperatureReading {
    pub raw: i32,
}

impl TemperatureReading {
    pub fn celsius(&self) -> f32 {
        temperature_celsius(self.raw)
    }
}

/// Capteur de température MCP9808
pub struct MCP9808 {
    address: u16,
}

impl MCP9808 {
    pub fn new(address: u16) -> Self {
        MCP9808 { address }
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    /// Lis un registre 16 bits (poids fort en premier)
    fn read_word<B: Bus + ?Sized>(&self, bus: &mut B, reg: u8) -> Result<u16, BusError> {
        let mut buffer = [0u8; 2];
        bus.read_block(reg, &mut buffer)?;
        Ok(u16::from_be_bytes(buffer))
    }

    /// Vérifie l'identifiant fabricant. Un écart est seulement signalé.
    pub fn probe<B: Bus + ?Sized>(&self, bus: &mut B) -> Result<bool, BusError> {
        i2c::bind(bus, self.address)?;
        let manufacturer = self.read_word(bus, registry::MCP9808_MANUF_ID).tolerate("lecture MANUF_ID")?;

        if manufacturer != registry::MCP9808_MANUF_ID_EXPECTED {
            warn!(
                "[TEMP] {:#04x}: identifiant fabricant {:#06x}, attendu {:#06x}",
                self.address,
                manufacturer,
                registry::MCP9808_MANUF_ID_EXPECTED
            );
            return Ok(false);
        }

        debug!("[TEMP] MCP9808 détecté à {:#04x}", self.address);
        Ok(true)
    }

    /// Lecture de la température ambiante.
    ///
    /// `Ok(None)` si le capteur n'a pas répondu correctement, la boucle
    /// d'acquisition continue sans température.
    pub fn read<B: Bus + ?Sized>(&self, bus: &mut B) -> Result<Option<TemperatureReading>, BusError> {
        i2c::bind(bus, self.address)?;

        let mut buffer = [0u8; 2];
        match bus.read_block(registry::MCP9808_AMBIENT_TEMP, &mut buffer) {
            Ok(_) => Ok(Some(TemperatureReading { raw: decode_temperature13(buffer[0], buffer[1]) })),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("[TEMP] Erreur de lecture du capteur {:#04x}: {}", self.address, e);
                Ok(None)
            }
        }
    }
}
