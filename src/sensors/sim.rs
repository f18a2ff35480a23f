//! Bus I2C simulé portant un RM3100 et deux MCP9808.
//!
//! Sert aux tests (chaque transfert est enregistré) et au mode
//! `fake-sensors` pour faire tourner l'outil sans matériel.

use std::collections::BTreeMap;
use std::io;

#[cfg(feature = "fake-sensors")]
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::i2c::{Bus, BusError};
use crate::sensors::codec::encode_sample24;
use crate::sensors::mag::registry as mag;
use crate::sensors::temp::registry as temp;

/// Transfert observé sur le bus simulé
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    Bind(u16),
    Write { address: u16, bytes: Vec<u8> },
    Read { address: u16, register: u8, len: usize },
}

struct SimRm3100 {
    regs: [u8; 0x40],
    pointer: u8,
    sample: [i32; 3],
    ready: bool,
    countdown: usize,
    not_ready_polls: usize,
    continuous: bool,
    #[cfg(feature = "fake-sensors")]
    rng: Option<StdRng>,
}

impl SimRm3100 {
    fn new() -> Self {
        let mut regs = [0u8; 0x40];
        for reg in [mag::RM3100_CCX_0, mag::RM3100_CCY_0, mag::RM3100_CCZ_0] {
            regs[reg as usize] = 0xC8;
        }
        regs[mag::RM3100_TMRC as usize] = 0x96;
        regs[mag::RM3100_HSHAKE as usize] = 0x1B;
        regs[mag::RM3100_REVID as usize] = mag::RM3100_REVID_EXPECTED;

        SimRm3100 {
            regs,
            pointer: 0,
            sample: [0; 3],
            ready: false,
            countdown: 0,
            not_ready_polls: 0,
            continuous: false,
            #[cfg(feature = "fake-sensors")]
            rng: None,
        }
    }

    /// Nouvelle conversion : le bloc XYZ est rafraîchi, DRDY retombe
    fn convert(&mut self) {
        #[allow(unused_mut)]
        let mut sample = self.sample;
        #[cfg(feature = "fake-sensors")]
        if let Some(rng) = self.rng.as_mut() {
            for value in sample.iter_mut() {
                *value += rng.gen_range(-40..=40);
            }
        }

        for (axis, value) in sample.iter().enumerate() {
            let start = mag::RM3100_XYZ as usize + axis * 3;
            self.regs[start..start + 3].copy_from_slice(&encode_sample24(*value));
        }
        self.ready = false;
        self.countdown = self.not_ready_polls;
    }

    fn write(&mut self, bytes: &[u8]) {
        self.pointer = bytes[0];
        for value in &bytes[1..] {
            let reg = self.pointer as usize % self.regs.len();
            self.regs[reg] = *value;

            match self.pointer {
                mag::RM3100_POLL if *value != 0 => self.convert(),
                mag::RM3100_CMM => {
                    self.continuous = value & mag::RM3100_CMM_START != 0;
                    if self.continuous {
                        self.convert();
                    }
                }
                _ => {}
            }
            self.pointer = self.pointer.wrapping_add(1);
        }
    }

    fn status(&mut self) -> u8 {
        if !self.ready {
            if self.countdown == 0 {
                self.ready = true;
            } else {
                self.countdown -= 1;
            }
        }

        if self.ready {
            mag::RM3100_STATUS_DRDY
        } else {
            0
        }
    }

    fn read(&mut self, buffer: &mut [u8]) {
        let start = self.pointer;
        for value in buffer.iter_mut() {
            *value = if self.pointer == mag::RM3100_STATUS {
                self.status()
            } else {
                self.regs[self.pointer as usize % self.regs.len()]
            };
            self.pointer = self.pointer.wrapping_add(1);
        }

        if start == mag::RM3100_XYZ {
            if self.continuous {
                self.convert();
            } else {
                self.ready = false;
            }
        }
    }
}

struct SimMcp9808 {
    regs: [u16; 9],
    pointer: u8,
    #[cfg(feature = "fake-sensors")]
    rng: Option<StdRng>,
}

impl SimMcp9808 {
    fn new(ambient: u16) -> Self {
        let mut regs = [0u16; 9];
        regs[temp::MCP9808_AMBIENT_TEMP as usize] = ambient;
        regs[temp::MCP9808_MANUF_ID as usize] = temp::MCP9808_MANUF_ID_EXPECTED;
        regs[temp::MCP9808_DEVICE_ID as usize] = temp::MCP9808_DEVICE_ID_EXPECTED;
        regs[temp::MCP9808_RESOLUTION as usize] = 0x03;

        SimMcp9808 {
            regs,
            pointer: 0,
            #[cfg(feature = "fake-sensors")]
            rng: None,
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        self.pointer = bytes[0] % self.regs.len() as u8;
        if bytes.len() >= 3 {
            self.regs[self.pointer as usize] = u16::from_be_bytes([bytes[1], bytes[2]]);
        }
    }

    fn read(&mut self, buffer: &mut [u8]) {
        #[allow(unused_mut)]
        let mut value = self.regs[self.pointer as usize];
        #[cfg(feature = "fake-sensors")]
        if let (Some(rng), temp::MCP9808_AMBIENT_TEMP) = (self.rng.as_mut(), self.pointer) {
            value = value.wrapping_add_signed(rng.gen_range(-2..=2));
        }

        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = value.to_be_bytes()[i % 2];
        }
    }
}

enum Device {
    Rm3100(SimRm3100),
    Mcp9808(SimMcp9808),
}

pub struct SimBus {
    devices: BTreeMap<u16, Device>,
    address: Option<u16>,
    transfers: Vec<Transfer>,
    short_reads: Vec<(u16, u8)>,
}

impl SimBus {
    /// RM3100 à 0x20, MCP9808 distant à 0x18 et local à 0x19 (25 °C)
    pub fn new() -> Self {
        let mut devices = BTreeMap::new();
        devices.insert(mag::RM3100_ADDR, Device::Rm3100(SimRm3100::new()));
        devices.insert(temp::MCP9808_REMOTE_ADDR, Device::Mcp9808(SimMcp9808::new(0x0190)));
        devices.insert(temp::MCP9808_LOCAL_ADDR, Device::Mcp9808(SimMcp9808::new(0x0190)));

        SimBus {
            devices,
            address: None,
            transfers: Vec::new(),
            short_reads: Vec::new(),
        }
    }

    fn rm3100(&mut self) -> Option<&mut SimRm3100> {
        self.devices.values_mut().find_map(|device| match device {
            Device::Rm3100(rm) => Some(rm),
            _ => None,
        })
    }

    pub fn with_revision(mut self, revision: u8) -> Self {
        if let Some(rm) = self.rm3100() {
            rm.regs[mag::RM3100_REVID as usize] = revision;
        }
        self
    }

    /// Nombre de lectures de STATUS sans DRDY après chaque conversion
    pub fn with_not_ready_polls(mut self, polls: usize) -> Self {
        if let Some(rm) = self.rm3100() {
            rm.not_ready_polls = polls;
        }
        self
    }

    /// Mesure brute renvoyée par les prochaines conversions
    pub fn with_sample(mut self, sample: [i32; 3]) -> Self {
        if let Some(rm) = self.rm3100() {
            rm.sample = sample;
        }
        self
    }

    /// Registre de température ambiante brut d'un MCP9808
    pub fn with_ambient(mut self, address: u16, raw: u16) -> Self {
        self.devices.insert(address, Device::Mcp9808(SimMcp9808::new(raw)));
        self
    }

    /// Les lectures commençant à `register` sur `address` renvoient un octet de moins
    pub fn with_short_read(mut self, address: u16, register: u8) -> Self {
        self.short_reads.push((address, register));
        self
    }

    /// Bruit aléatoire sur les mesures et les températures
    #[cfg(feature = "fake-sensors")]
    pub fn with_noise(mut self) -> Self {
        for device in self.devices.values_mut() {
            match device {
                Device::Rm3100(rm) => rm.rng = Some(StdRng::from_entropy()),
                Device::Mcp9808(mcp) => mcp.rng = Some(StdRng::from_entropy()),
            }
        }
        self
    }

    pub fn without_device(mut self, address: u16) -> Self {
        self.devices.remove(&address);
        self
    }

    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    /// Ecritures reçues par un périphérique, dans l'ordre
    pub fn writes_to(&self, address: u16) -> Vec<Vec<u8>> {
        self.transfers
            .iter()
            .filter_map(|t| match t {
                Transfer::Write { address: a, bytes } if *a == address => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// Valeur courante d'un registre du RM3100
    pub fn rm3100_register(&self, reg: u8) -> Option<u8> {
        self.devices.values().find_map(|device| match device {
            Device::Rm3100(rm) => Some(rm.regs[reg as usize % rm.regs.len()]),
            _ => None,
        })
    }

    fn pointer(&self, address: u16) -> Option<u8> {
        match self.devices.get(&address)? {
            Device::Rm3100(rm) => Some(rm.pointer),
            Device::Mcp9808(mcp) => Some(mcp.pointer),
        }
    }

    fn nack(address: u16) -> BusError {
        BusError::Io(io::Error::other(format!("pas d'acquittement de {:#04x}", address)))
    }
}

impl Default for SimBus {
    fn default() -> Self {
        SimBus::new()
    }
}

impl Bus for SimBus {
    fn set_slave_address(&mut self, address: u16) -> Result<(), BusError> {
        if !(0x03..=0x77).contains(&address) {
            return Err(BusError::AddressBindFailed {
                address,
                source: io::Error::new(io::ErrorKind::InvalidInput, "adresse 7 bits invalide"),
            });
        }
        self.transfers.push(Transfer::Bind(address));
        self.address = Some(address);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, BusError> {
        let address = self.address.ok_or_else(|| Self::nack(0))?;
        self.transfers.push(Transfer::Write { address, bytes: bytes.to_vec() });
        if bytes.is_empty() {
            return Ok(0);
        }

        match self.devices.get_mut(&address) {
            Some(Device::Rm3100(rm)) => rm.write(bytes),
            Some(Device::Mcp9808(mcp)) => mcp.write(bytes),
            None => return Err(Self::nack(address)),
        }
        Ok(bytes.len())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, BusError> {
        let address = self.address.ok_or_else(|| Self::nack(0))?;
        let register = self.pointer(address).ok_or_else(|| Self::nack(address))?;
        self.transfers.push(Transfer::Read { address, register, len: buffer.len() });

        let len = if self.short_reads.contains(&(address, register)) {
            buffer.len().saturating_sub(1)
        } else {
            buffer.len()
        };

        match self.devices.get_mut(&address) {
            Some(Device::Rm3100(rm)) => rm.read(&mut buffer[..len]),
            Some(Device::Mcp9808(mcp)) => mcp.read(&mut buffer[..len]),
            None => return Err(Self::nack(address)),
        }
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::RegisterIo;

    fn read_xyz(bus: &mut SimBus) -> [u8; mag::RM3100_XYZ_SIZE] {
        bus.set_slave_address(mag::RM3100_ADDR).unwrap();
        bus.write_register(mag::RM3100_POLL, mag::RM3100_POLL_XYZ).unwrap();
        let mut block = [0u8; mag::RM3100_XYZ_SIZE];
        bus.read_block(mag::RM3100_XYZ, &mut block).unwrap();
        block
    }

    #[test]
    fn samples_are_exact_without_noise() {
        let mut bus = SimBus::new().with_sample([750, -750, 0]);
        for _ in 0..5 {
            let block = read_xyz(&mut bus);
            assert_eq!(&block[..3], &encode_sample24(750));
            assert_eq!(&block[3..6], &encode_sample24(-750));
            assert_eq!(&block[6..], &[0, 0, 0]);
        }
    }

    #[cfg(feature = "fake-sensors")]
    #[test]
    fn noise_stays_close_to_the_sample() {
        use crate::sensors::codec::decode_sample24;

        let mut bus = SimBus::new().with_sample([1500, -375, 3375]).with_noise();
        for _ in 0..20 {
            let block = read_xyz(&mut bus);
            let x = decode_sample24([block[0], block[1], block[2]]);
            assert!((1460..=1540).contains(&x));
        }
    }
}
