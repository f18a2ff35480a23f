use std::io;

use log::{debug, warn};
use thiserror::Error;

#[cfg(feature = "real-sensors")]
pub use self::linux::BusHandle;

/// Erreurs du transport I2C
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus {path} indisponible: {source}")]
    Unavailable {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("impossible de sélectionner l'esclave {address:#04x}: {source}")]
    AddressBindFailed {
        address: u16,
        #[source]
        source: io::Error,
    },

    #[error("transfert incomplet: {actual}/{expected} octets")]
    ShortTransfer { expected: usize, actual: usize },

    #[error("erreur E/S: {0}")]
    Io(#[from] io::Error),
}

impl BusError {
    /// Le matériel ne peut plus être adressé, inutile de continuer
    pub fn is_fatal(&self) -> bool {
        matches!(self, BusError::Unavailable { .. } | BusError::AddressBindFailed { .. })
    }
}

/// Transactions brutes sur un bus I2C avec une adresse esclave courante.
///
/// `write` et `read` retournent le nombre d'octets réellement transférés,
/// c'est à l'appelant de décider si un transfert incomplet est acceptable.
pub trait Bus {
    fn set_slave_address(&mut self, address: u16) -> Result<(), BusError>;
    fn write(&mut self, bytes: &[u8]) -> Result<usize, BusError>;
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, BusError>;
}

fn expect_len(expected: usize, actual: usize) -> Result<usize, BusError> {
    if actual == expected {
        Ok(actual)
    } else {
        Err(BusError::ShortTransfer { expected, actual })
    }
}

/// Accès registre par registre, au-dessus d'un `Bus`.
///
/// Une lecture se fait en deux appels séparés (écriture de l'adresse du
/// registre puis lecture), jamais en transaction combinée.
pub trait RegisterIo: Bus {
    /// Ecrit un octet dans un registre 8 bits
    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        let written = self.write(&[reg, value])?;
        expect_len(2, written)?;
        Ok(())
    }

    /// Lecture d'un registre 8 bits
    fn read_register(&mut self, reg: u8) -> Result<u8, BusError> {
        let written = self.write(&[reg])?;
        expect_len(1, written)?;

        let mut buffer = [0u8; 1];
        let read = self.read(&mut buffer)?;
        expect_len(1, read)?;
        Ok(buffer[0])
    }

    /// Ecrit plusieurs registres consécutifs (le capteur incrémente l'adresse)
    fn write_block(&mut self, reg: u8, bytes: &[u8]) -> Result<(), BusError> {
        let mut frame = Vec::with_capacity(bytes.len() + 1);
        frame.push(reg);
        frame.extend_from_slice(bytes);

        let written = self.write(&frame)?;
        expect_len(frame.len(), written)?;
        Ok(())
    }

    /// Lis `buffer.len()` registres consécutifs à partir de `reg`
    fn read_block(&mut self, reg: u8, buffer: &mut [u8]) -> Result<usize, BusError> {
        let written = self.write(&[reg])?;
        expect_len(1, written)?;

        let read = self.read(buffer)?;
        expect_len(buffer.len(), read)
    }
}

impl<B: Bus + ?Sized> RegisterIo for B {}

/// Politique "on continue quand même" : une erreur non fatale est tracée
/// puis remplacée par la valeur par défaut. Les erreurs fatales remontent.
pub trait Tolerate<T> {
    fn tolerate(self, context: &str) -> Result<T, BusError>;
}

impl<T: Default> Tolerate<T> for Result<T, BusError> {
    fn tolerate(self, context: &str) -> Result<T, BusError> {
        match self {
            Ok(value) => Ok(value),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("[I2C] {}: {}", context, e);
                Ok(T::default())
            }
        }
    }
}

/// Chemin du fichier de périphérique d'un bus
pub fn bus_path(bus: u8) -> String {
    format!("/dev/i2c-{}", bus)
}

#[cfg(feature = "real-sensors")]
mod linux {
    use std::io;

    use log::debug;
    use rppal::i2c::{Error as RppalError, I2c};

    use super::{bus_path, Bus, BusError};

    fn into_io(e: RppalError) -> io::Error {
        match e {
            RppalError::Io(e) => e,
            other => io::Error::other(other.to_string()),
        }
    }

    /// Bus I2C Linux ouvert en lecture/écriture (`/dev/i2c-N`).
    ///
    /// Le descripteur est fermé à la destruction du handle, une seule fois.
    pub struct BusHandle {
        i2c: I2c,
        path: String,
        address: Option<u16>,
    }

    impl BusHandle {
        pub fn open(bus: u8) -> Result<Self, BusError> {
            let path = bus_path(bus);
            match I2c::with_bus(bus) {
                Ok(i2c) => {
                    debug!("[I2C] Bus {} ouvert.", path);
                    Ok(BusHandle { i2c, path, address: None })
                }
                Err(e) => Err(BusError::Unavailable { path, source: into_io(e) }),
            }
        }
    }

    impl Drop for BusHandle {
        fn drop(&mut self) {
            debug!("[I2C] Fermeture du bus {}.", self.path);
        }
    }

    impl Bus for BusHandle {
        fn set_slave_address(&mut self, address: u16) -> Result<(), BusError> {
            if self.address == Some(address) {
                return Ok(());
            }

            self.i2c
                .set_slave_address(address)
                .map_err(|e| BusError::AddressBindFailed { address, source: into_io(e) })?;
            self.address = Some(address);
            Ok(())
        }

        fn write(&mut self, bytes: &[u8]) -> Result<usize, BusError> {
            self.i2c.write(bytes).map_err(|e| BusError::Io(into_io(e)))
        }

        fn read(&mut self, buffer: &mut [u8]) -> Result<usize, BusError> {
            self.i2c.read(buffer).map_err(|e| BusError::Io(into_io(e)))
        }
    }
}

/// Sélectionne l'esclave en traçant l'opération
pub fn bind<B: Bus + ?Sized>(bus: &mut B, address: u16) -> Result<(), BusError> {
    debug!("[I2C] Esclave {:#04x}", address);
    bus.set_slave_address(address)
}
