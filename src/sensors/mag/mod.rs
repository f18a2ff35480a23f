use std::fmt;
use std::time::Duration;

use log::{debug, info};
use nalgebra::Vector3;
use serde::Serialize;

use crate::clock::Clock;
use crate::i2c::{self, Bus, RegisterIo, Tolerate};
use crate::sensors::codec::{decode_sample24, encode_cycle_count, sample_rate_code};
use crate::sensors::error::SensorError;

pub mod config;
pub mod registry;

pub use self::config::{DeviceConfig, SamplingMode};

/// Délai après configuration avant de faire confiance à DRDY
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Etats de l'acquisition d'une mesure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementState {
    Idle,
    AddressBound,
    PollTriggered,
    ContinuousRunning,
    DataReady,
    SampleRead,
}

/// Mesure brute des trois axes (comptes 24 bits signés)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RawSample {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl RawSample {
    /// Décode le bloc MX..MZ (9 octets)
    pub fn from_block(block: &[u8; registry::RM3100_XYZ_SIZE]) -> Self {
        RawSample {
            x: decode_sample24([block[0], block[1], block[2]]),
            y: decode_sample24([block[3], block[4], block[5]]),
            z: decode_sample24([block[6], block[7], block[8]]),
        }
    }
}

impl fmt::Display for RawSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Champ magnétique en µT
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledSample {
    pub field: Vector3<f64>,
}

impl ScaledSample {
    /// Norme du champ
    pub fn total(&self) -> f64 {
        self.field.norm()
    }
}

/// Magnétomètre 3 axes RM3100
pub struct RM3100 {
    address: u16,
    config: DeviceConfig,
    revision: Option<u8>,
    state: MeasurementState,
    continuous_armed: bool,
}

impl RM3100 {
    /// Constructeur
    pub fn new(address: u16, config: DeviceConfig) -> Self {
        RM3100 {
            address,
            config,
            revision: None,
            state: MeasurementState::Idle,
            continuous_armed: false,
        }
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Révision lue lors de la dernière vérification
    pub fn revision(&self) -> Option<u8> {
        self.revision
    }

    pub fn state(&self) -> MeasurementState {
        self.state
    }

    fn bind<B: Bus + ?Sized>(&mut self, bus: &mut B) -> Result<(), SensorError> {
        i2c::bind(bus, self.address)?;
        self.state = MeasurementState::AddressBound;
        Ok(())
    }

    /// Initialise le capteur : vérification, remise à zéro, cycle counts,
    /// fréquence CMM puis attente de stabilisation
    pub fn setup<B: Bus + ?Sized, C: Clock + ?Sized>(&mut self, bus: &mut B, clock: &C) -> Result<(), SensorError> {
        info!("[MAG] Initialisation ...");
        self.verify_revision(bus)?;
        self.reset_pending_measurement(bus)?;
        self.apply_cycle_counts(bus)?;
        self.apply_sample_rate(bus)?;
        self.apply_averaging(bus)?;
        clock.sleep(SETTLE_DELAY);

        if self.config.mode == SamplingMode::Continuous {
            self.start_continuous(bus)?;
        }

        info!("[MAG] Capteur initialisé ({:?}, gains {:?}).", self.config.mode, self.config.gains());
        Ok(())
    }

    /// Vérifie le registre REVID. Rien n'est écrit sur le capteur avant.
    pub fn verify_revision<B: Bus + ?Sized>(&mut self, bus: &mut B) -> Result<u8, SensorError> {
        self.bind(bus)?;
        let found = bus.read_register(registry::RM3100_REVID).tolerate("lecture REVID")?;
        self.revision = Some(found);

        if found != registry::RM3100_REVID_EXPECTED {
            return Err(SensorError::UnexpectedDevice {
                address: self.address,
                expected: registry::RM3100_REVID_EXPECTED,
                found,
            });
        }

        debug!("[MAG] RM3100 détecté, REVID: {:#04x}", found);
        Ok(found)
    }

    /// Annule toute conversion en cours (POLL et CMM à zéro)
    pub fn reset_pending_measurement<B: Bus + ?Sized>(&mut self, bus: &mut B) -> Result<(), SensorError> {
        self.bind(bus)?;
        bus.write_register(registry::RM3100_POLL, 0).tolerate("remise à zéro POLL")?;
        bus.write_register(registry::RM3100_CMM, 0).tolerate("remise à zéro CMM")?;
        self.continuous_armed = false;
        Ok(())
    }

    /// Ecrit les cycle counts X, Y puis Z (poids fort puis poids faible)
    pub fn apply_cycle_counts<B: Bus + ?Sized>(&mut self, bus: &mut B) -> Result<(), SensorError> {
        self.bind(bus)?;
        let registers = [
            (registry::RM3100_CCX_1, registry::RM3100_CCX_0),
            (registry::RM3100_CCY_1, registry::RM3100_CCY_0),
            (registry::RM3100_CCZ_1, registry::RM3100_CCZ_0),
        ];

        for ((reg_hi, reg_lo), cc) in registers.iter().zip(self.config.cycle_counts()) {
            let (hi, lo) = encode_cycle_count(cc);
            bus.write_register(*reg_hi, hi).tolerate("écriture cycle count")?;
            bus.write_register(*reg_lo, lo).tolerate("écriture cycle count")?;
        }

        debug!("[MAG] Cycle counts {:?}, gains {:?}", self.config.cycle_counts(), self.config.gains());
        Ok(())
    }

    /// Ecrit la fréquence CMM (registre TMRC). Retourne le code écrit.
    ///
    /// La fréquence réelle reste bornée par les cycle counts, le capteur ne
    /// le signale pas.
    pub fn apply_sample_rate<B: Bus + ?Sized>(&mut self, bus: &mut B) -> Result<u8, SensorError> {
        self.bind(bus)?;
        let code = match self.config.tmrc_override {
            Some(code) => code,
            None => {
                let (rate, code) = sample_rate_code(self.config.sample_rate_hz);
                debug!("[MAG] Fréquence CMM {} Hz demandée, {} Hz retenue", self.config.sample_rate_hz, rate);
                code
            }
        };

        bus.write_register(registry::RM3100_TMRC, code).tolerate("écriture TMRC")?;
        Ok(code)
    }

    /// Ecrit le registre NOS s'il est configuré
    pub fn apply_averaging<B: Bus + ?Sized>(&mut self, bus: &mut B) -> Result<(), SensorError> {
        if let Some(nos) = self.config.averaging() {
            self.bind(bus)?;
            debug!("[MAG] Registre NOS: {}", nos);
            bus.write_register(registry::RM3100_NOS, nos).tolerate("écriture NOS")?;
        }
        Ok(())
    }

    /// Relis le bloc CCX_1..NOS
    pub fn read_cycle_count_registers<B: Bus + ?Sized>(
        &mut self,
        bus: &mut B,
    ) -> Result<[u8; registry::RM3100_CC_BLOCK_SIZE], SensorError> {
        self.bind(bus)?;
        let mut block = [0u8; registry::RM3100_CC_BLOCK_SIZE];
        bus.read_block(registry::RM3100_CCX_1, &mut block).tolerate("relecture cycle counts")?;
        Ok(block)
    }

    /// Active la mesure continue sur les trois axes
    pub fn start_continuous<B: Bus + ?Sized>(&mut self, bus: &mut B) -> Result<(), SensorError> {
        self.bind(bus)?;
        bus.write_register(registry::RM3100_CMM, registry::RM3100_CMM_ALL).tolerate("activation CMM")?;
        self.continuous_armed = true;
        self.state = MeasurementState::ContinuousRunning;
        debug!("[MAG] Mesure continue activée.");
        Ok(())
    }

    /// Attend DRDY. Scrute STATUS sans pause jusqu'au délai configuré.
    fn wait_data_ready<B: Bus + ?Sized, C: Clock + ?Sized>(&mut self, bus: &mut B, clock: &C) -> Result<(), SensorError> {
        let start = clock.now();
        loop {
            let status = bus.read_register(registry::RM3100_STATUS).tolerate("lecture STATUS")?;
            if status & registry::RM3100_STATUS_DRDY == registry::RM3100_STATUS_DRDY {
                self.state = MeasurementState::DataReady;
                return Ok(());
            }

            let waited = clock.now().saturating_duration_since(start);
            if waited >= self.config.drdy_timeout {
                self.state = MeasurementState::Idle;
                return Err(SensorError::DeviceTimeout { address: self.address, waited });
            }
        }
    }

    /// Acquiert une mesure selon le mode configuré
    pub fn read_sample<B: Bus + ?Sized, C: Clock + ?Sized>(&mut self, bus: &mut B, clock: &C) -> Result<RawSample, SensorError> {
        self.bind(bus)?;

        match self.config.mode {
            SamplingMode::Poll => {
                bus.write_register(registry::RM3100_POLL, registry::RM3100_POLL_XYZ)
                    .tolerate("déclenchement POLL")?;
                self.state = MeasurementState::PollTriggered;
                if !self.config.drdy_delay.is_zero() {
                    clock.sleep(self.config.drdy_delay);
                }
            }
            SamplingMode::Continuous => {
                if !self.continuous_armed {
                    self.start_continuous(bus)?;
                }
                self.state = MeasurementState::ContinuousRunning;
            }
        }

        self.wait_data_ready(bus, clock)?;

        let mut block = [0u8; registry::RM3100_XYZ_SIZE];
        bus.read_block(registry::RM3100_XYZ, &mut block).tolerate("lecture XYZ")?;
        self.state = MeasurementState::SampleRead;

        let sample = RawSample::from_block(&block);
        self.state = MeasurementState::Idle;
        Ok(sample)
    }

    /// Convertit en µT : comptes / NOS / gain
    pub fn scale(&self, raw: &RawSample) -> ScaledSample {
        let gains = self.config.gains();
        let nos = self.config.averaging_factor();
        let counts = Vector3::new(raw.x as f64, raw.y as f64, raw.z as f64);
        let gains = Vector3::new(gains[0] as f64, gains[1] as f64, gains[2] as f64);

        ScaledSample { field: (counts / nos).component_div(&gains) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sensors::sim::{SimBus, Transfer};

    fn clock() -> ManualClock {
        ManualClock::new(Duration::from_millis(1))
    }

    fn status_reads(bus: &SimBus) -> usize {
        bus.transfers()
            .iter()
            .filter(|t| matches!(t, Transfer::Read { register: registry::RM3100_STATUS, .. }))
            .count()
    }

    #[test]
    fn setup_writes_registers_in_order() {
        let mut bus = SimBus::new();
        let mut mag = RM3100::new(registry::RM3100_ADDR, DeviceConfig::new([400, 300, 200]).unwrap());
        let clock = clock();

        mag.setup(&mut bus, &clock).unwrap();

        assert_eq!(
            bus.writes_to(registry::RM3100_ADDR),
            vec![
                vec![registry::RM3100_REVID],
                vec![registry::RM3100_POLL, 0],
                vec![registry::RM3100_CMM, 0],
                vec![registry::RM3100_CCX_1, 0x01],
                vec![registry::RM3100_CCX_0, 0x90],
                vec![registry::RM3100_CCY_1, 0x01],
                vec![registry::RM3100_CCY_0, 0x2C],
                vec![registry::RM3100_CCZ_1, 0x00],
                vec![registry::RM3100_CCZ_0, 0xC8],
                vec![registry::RM3100_TMRC, 0x03],
            ]
        );
        assert_eq!(mag.config().gains(), [150, 113, 75]);
        assert_eq!(mag.revision(), Some(registry::RM3100_REVID_EXPECTED));
        assert!(clock.sleeps().contains(&SETTLE_DELAY));
    }

    #[test]
    fn cycle_counts_read_back_as_written() {
        let mut bus = SimBus::new();
        let mut mag = RM3100::new(registry::RM3100_ADDR, DeviceConfig::new([400, 400, 400]).unwrap());

        mag.apply_cycle_counts(&mut bus).unwrap();
        let block = mag.read_cycle_count_registers(&mut bus).unwrap();

        assert_eq!(&block[..6], &[0x01, 0x90, 0x01, 0x90, 0x01, 0x90]);
    }

    #[test]
    fn revision_mismatch_stops_before_any_configuration() {
        let mut bus = SimBus::new().with_revision(0x33);
        let mut mag = RM3100::new(registry::RM3100_ADDR, DeviceConfig::default());

        match mag.setup(&mut bus, &clock()) {
            Err(SensorError::UnexpectedDevice { found: 0x33, expected: 0x22, .. }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        // seule l'adresse de REVID a été écrite
        assert_eq!(bus.writes_to(registry::RM3100_ADDR), vec![vec![registry::RM3100_REVID]]);
        assert_eq!(bus.rm3100_register(registry::RM3100_CCX_0), Some(0xC8));
    }

    #[test]
    fn poll_waits_for_data_ready() {
        for not_ready in [0usize, 1, 5] {
            let mut bus = SimBus::new().with_not_ready_polls(not_ready).with_sample([1, -1, 8_388_607]);
            let mut mag = RM3100::new(registry::RM3100_ADDR, DeviceConfig::default());

            let sample = mag.read_sample(&mut bus, &clock()).unwrap();

            assert_eq!(sample, RawSample { x: 1, y: -1, z: 8_388_607 });
            assert_eq!(status_reads(&bus), not_ready + 1);

            // le bloc XYZ n'est lu qu'après la dernière lecture de STATUS
            let transfers = bus.transfers();
            let last_status = transfers
                .iter()
                .rposition(|t| matches!(t, Transfer::Read { register: registry::RM3100_STATUS, .. }))
                .unwrap();
            let block = transfers
                .iter()
                .position(|t| matches!(t, Transfer::Read { register: registry::RM3100_XYZ, len: 9, .. }))
                .unwrap();
            assert!(block > last_status);
            assert_eq!(mag.state(), MeasurementState::Idle);
        }
    }

    #[test]
    fn poll_triggers_all_axes_each_time() {
        let mut bus = SimBus::new();
        let mut mag = RM3100::new(registry::RM3100_ADDR, DeviceConfig::default());
        let clock = clock();

        mag.read_sample(&mut bus, &clock).unwrap();
        mag.read_sample(&mut bus, &clock).unwrap();

        let triggers = bus
            .writes_to(registry::RM3100_ADDR)
            .into_iter()
            .filter(|w| w == &vec![registry::RM3100_POLL, registry::RM3100_POLL_XYZ])
            .count();
        assert_eq!(triggers, 2);
    }

    #[test]
    fn poll_honours_post_trigger_delay() {
        let mut bus = SimBus::new();
        let mut config = DeviceConfig::default();
        config.drdy_delay = Duration::from_micros(500);
        let mut mag = RM3100::new(registry::RM3100_ADDR, config);
        let clock = clock();

        mag.read_sample(&mut bus, &clock).unwrap();
        assert_eq!(clock.sleeps(), vec![Duration::from_micros(500)]);
    }

    #[test]
    fn continuous_mode_is_armed_once() {
        let mut bus = SimBus::new().with_not_ready_polls(2).with_sample([10, 20, 30]);
        let mut config = DeviceConfig::default();
        config.mode = SamplingMode::Continuous;
        let mut mag = RM3100::new(registry::RM3100_ADDR, config);
        let clock = clock();

        mag.setup(&mut bus, &clock).unwrap();
        for _ in 0..3 {
            assert_eq!(mag.read_sample(&mut bus, &clock).unwrap(), RawSample { x: 10, y: 20, z: 30 });
        }

        let writes = bus.writes_to(registry::RM3100_ADDR);
        let arms = writes.iter().filter(|w| w == &&vec![registry::RM3100_CMM, registry::RM3100_CMM_ALL]).count();
        assert_eq!(arms, 1);
        assert!(!writes.iter().any(|w| w[0] == registry::RM3100_POLL && w.len() == 2 && w[1] != 0));
        assert_eq!(status_reads(&bus), 3 * 3);
    }

    #[test]
    fn data_ready_timeout_is_bounded() {
        let mut bus = SimBus::new().with_not_ready_polls(usize::MAX);
        let mut mag = RM3100::new(registry::RM3100_ADDR, DeviceConfig::default());
        let clock = clock();

        match mag.read_sample(&mut bus, &clock) {
            Err(SensorError::DeviceTimeout { address: 0x20, waited }) => {
                assert!(waited >= config::DRDY_TIMEOUT_DEFAULT);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!bus
            .transfers()
            .iter()
            .any(|t| matches!(t, Transfer::Read { register: registry::RM3100_XYZ, .. })));
        assert_eq!(mag.state(), MeasurementState::Idle);
    }

    #[test]
    fn short_sample_read_is_tolerated() {
        let mut bus = SimBus::new()
            .with_sample([0x010203, 0x040506, 0x070809])
            .with_short_read(registry::RM3100_ADDR, registry::RM3100_XYZ);
        let mut mag = RM3100::new(registry::RM3100_ADDR, DeviceConfig::default());

        // le dernier octet manque : Z est décodé avec un zéro
        let sample = mag.read_sample(&mut bus, &clock()).unwrap();
        assert_eq!(sample.x, 0x010203);
        assert_eq!(sample.y, 0x040506);
        assert_eq!(sample.z, 0x070800);
    }

    #[test]
    fn scaling_divides_by_gain_and_averaging() {
        let mut mag = RM3100::new(registry::RM3100_ADDR, DeviceConfig::new([200, 200, 200]).unwrap());
        let scaled = mag.scale(&RawSample { x: 750, y: -750, z: 0 });
        assert_eq!(scaled.field, Vector3::new(10.0, -10.0, 0.0));
        assert!((scaled.total() - 14.142_135).abs() < 1e-5);

        let mut config = DeviceConfig::new([200, 200, 200]).unwrap();
        config.set_averaging(Some(10)).unwrap();
        mag = RM3100::new(registry::RM3100_ADDR, config);
        assert_eq!(mag.scale(&RawSample { x: 750, y: 0, z: 0 }).field.x, 1.0);
    }

    #[test]
    fn sample_rate_override_and_nos() {
        let mut bus = SimBus::new();
        let mut config = DeviceConfig::default();
        config.tmrc_override = Some(0x96);
        config.set_averaging(Some(4)).unwrap();
        let mut mag = RM3100::new(registry::RM3100_ADDR, config);

        mag.setup(&mut bus, &clock()).unwrap();
        assert_eq!(bus.rm3100_register(registry::RM3100_TMRC), Some(0x96));
        assert_eq!(bus.rm3100_register(registry::RM3100_NOS), Some(4));
    }
}
