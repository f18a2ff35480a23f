use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::{Config, TempSite};
use crate::i2c::Bus;
use crate::logfile::Sink;
use crate::output::{show_settings, OutputFormat, Record};
use crate::sensors::mag::RM3100;
use crate::sensors::temp::MCP9808;
use crate::sensors::SensorError;

/// Tranche maximale de sommeil entre deux vérifications d'annulation
pub const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Boucle d'acquisition : températures, magnétomètre, mise à l'échelle, sortie
pub struct Runner {
    config: Config,
    magnetometer: RM3100,
    thermometers: Vec<(TempSite, MCP9808)>,
    format: OutputFormat,
}

impl Runner {
    pub fn new(config: Config) -> Result<Self> {
        let device = config.device_config()?;
        let magnetometer = RM3100::new(config.mag_addr, device);
        let thermometers = config
            .temperature_sites()
            .into_iter()
            .map(|(site, address)| (site, MCP9808::new(address)))
            .collect();
        let format = OutputFormat::from_config(&config);

        Ok(Runner { config, magnetometer, thermometers, format })
    }

    pub fn magnetometer(&self) -> &RM3100 {
        &self.magnetometer
    }

    /// Sites de température dans l'ordre des colonnes
    pub fn sites(&self) -> Vec<TempSite> {
        self.thermometers.iter().map(|(site, _)| *site).collect()
    }

    pub fn header(&self) -> Option<String> {
        self.format.header(&self.sites())
    }

    /// Initialise les capteurs. Toute erreur retournée est fatale.
    pub fn start<B: Bus + ?Sized, C: Clock + ?Sized>(&mut self, bus: &mut B, clock: &C) -> Result<()> {
        for (site, sensor) in &self.thermometers {
            debug!("[TEMP] Vérification du capteur {:?} ({:#04x})", site, sensor.address());
            sensor.probe(bus).context("Capteur de température inaccessible")?;
        }

        self.magnetometer
            .setup(bus, clock)
            .context("Initialisation du magnétomètre impossible")?;

        if self.config.read_back_cc {
            let block = self.magnetometer.read_cycle_count_registers(bus)?;
            println!("{}", format_cycle_count_block(&block));
        }

        if self.config.show_parameters {
            println!(
                "{}",
                show_settings(&self.config, self.magnetometer.revision(), self.magnetometer.config().gains())
            );
        }
        Ok(())
    }

    /// Une itération. `Ok(None)` si la mesure est sautée (DRDY jamais levé).
    pub fn acquire<B: Bus + ?Sized, C: Clock + ?Sized>(&mut self, bus: &mut B, clock: &C) -> Result<Option<Record>> {
        let mut temperatures = Vec::with_capacity(self.thermometers.len());
        for (site, sensor) in &self.thermometers {
            let reading = sensor.read(bus)?;
            temperatures.push((*site, reading.map(|r| r.celsius())));
        }

        let raw = match self.magnetometer.read_sample(bus, clock) {
            Ok(raw) => raw,
            Err(e @ SensorError::DeviceTimeout { .. }) => {
                warn!("[RUN] Mesure ignorée: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Some(Record {
            timestamp: clock.utc(),
            temperatures,
            field: self.magnetometer.scale(&raw),
            raw,
        }))
    }

    /// Initialise les capteurs, ouvre la sortie puis tourne.
    /// L'en-tête n'est écrit qu'une fois le magnétomètre reconnu.
    pub fn execute<B: Bus + ?Sized, C: Clock + ?Sized>(
        &mut self,
        bus: &mut B,
        clock: &C,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        self.start(bus, clock)?;
        let mut sink = Sink::open(&self.config.log, self.header(), clock.utc())?;
        self.run(bus, clock, &mut sink, cancel)
    }

    /// Tourne jusqu'à l'annulation (ou une mesure avec `-s`).
    /// Une itération démarre toutes les `out_delay`, quelle que soit la durée
    /// de l'acquisition. Retourne le nombre de lignes écrites.
    pub fn run<B: Bus + ?Sized, C: Clock + ?Sized>(
        &mut self,
        bus: &mut B,
        clock: &C,
        sink: &mut Sink,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let period = self.config.out_delay();
        let mut deadline = clock.now();
        let mut emitted = 0;

        while !cancel.is_cancelled() {
            deadline += period;

            if let Some(record) = self.acquire(bus, clock)? {
                sink.roll_over(record.timestamp)?;
                sink.write_line(&self.format.render(&record))?;
                emitted += 1;
            }

            if self.config.single_read {
                break;
            }
            sleep_until(clock, deadline, cancel);

            // acquisition plus longue que la période : on repart de maintenant
            let now = clock.now();
            if now.saturating_duration_since(deadline) >= period {
                debug!("[RUN] Période de {:?} dépassée", period);
                deadline = now;
            }
        }

        info!("[RUN] Arrêt après {} mesure(s).", emitted);
        Ok(emitted)
    }
}

/// Dort jusqu'à `deadline` par tranches de `SLEEP_SLICE` en surveillant l'annulation
pub fn sleep_until<C: Clock + ?Sized>(clock: &C, deadline: Instant, cancel: &CancellationToken) {
    while !cancel.is_cancelled() {
        let remaining = deadline.saturating_duration_since(clock.now());
        if remaining.is_zero() {
            break;
        }
        clock.sleep(remaining.min(SLEEP_SLICE));
    }
}

fn format_cycle_count_block(block: &[u8]) -> String {
    let hex: Vec<String> = block.iter().map(|b| format!("{:#04x}", b)).collect();
    format!("Registres CCX_1..NOS (0x04..0x0A): {}", hex.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sensors::mag::SamplingMode;
    use crate::sensors::sim::SimBus;
    use std::fs;
    use tempfile::tempdir;

    /// Annule le jeton une fois `limit` écoulé
    struct CancelAfter {
        inner: ManualClock,
        limit: Duration,
        cancel: CancellationToken,
    }

    impl CancelAfter {
        fn new(limit: Duration, cancel: &CancellationToken) -> Self {
            CancelAfter { inner: ManualClock::new(Duration::from_millis(1)), limit, cancel: cancel.clone() }
        }
    }

    impl CancelAfter {
        fn check(&self) {
            if self.inner.elapsed() >= self.limit {
                self.cancel.cancel();
            }
        }
    }

    impl Clock for CancelAfter {
        fn now(&self) -> Instant {
            let now = self.inner.now();
            self.check();
            now
        }

        fn sleep(&self, duration: Duration) {
            self.inner.sleep(duration);
            self.check();
        }

        fn utc(&self) -> chrono::DateTime<chrono::Utc> {
            self.inner.utc()
        }
    }

    fn config() -> Config {
        let mut config = Config::new();
        config.cycle_counts = [200; 3];
        config.single_read = true;
        config.show_total = true;
        config
    }

    fn log_lines(dir: &std::path::Path) -> Vec<String> {
        let entry = fs::read_dir(dir).unwrap().next().unwrap().unwrap();
        fs::read_to_string(entry.path()).unwrap().lines().map(str::to_string).collect()
    }

    #[test]
    fn single_read_emits_one_scaled_record() -> Result<()> {
        let dir = tempdir()?;
        let mut bus = SimBus::new().with_sample([750, -750, 0]);
        let clock = ManualClock::new(Duration::from_millis(1));
        let mut runner = Runner::new(config())?;
        let mut sink = Sink::rolling(dir.path(), "TEST", runner.header(), clock.utc())?;

        runner.start(&mut bus, &clock)?;
        let emitted = runner.run(&mut bus, &clock, &mut sink, &CancellationToken::new())?;
        assert_eq!(emitted, 1);

        let lines = log_lines(dir.path());
        assert_eq!(lines[0], "\"time\", \"rtemp\", \"ltemp\", \"x\", \"y\", \"z\", \"rx\", \"ry\", \"rz\", \"total\"");
        assert!(lines[1].ends_with(", 25.00, 25.00, 10.0000, -10.0000, 0.0000, 750, -750, 0, 14.1421"));
        Ok(())
    }

    #[test]
    fn missing_thermometer_reports_error() -> Result<()> {
        let mut bus = SimBus::new().without_device(0x19).with_sample([75, 75, 75]);
        let clock = ManualClock::new(Duration::from_millis(1));
        let mut runner = Runner::new(config())?;

        runner.start(&mut bus, &clock)?;
        let record = runner.acquire(&mut bus, &clock)?.unwrap();
        assert_eq!(record.temperatures, vec![(TempSite::Remote, Some(25.0)), (TempSite::Local, None)]);
        assert_eq!(record.field.field.x, 1.0);
        Ok(())
    }

    #[test]
    fn timeout_skips_the_iteration() -> Result<()> {
        let mut config = config();
        config.magnetometer_only = true;
        let mut bus = SimBus::new().with_not_ready_polls(10_000);
        let clock = ManualClock::new(Duration::from_millis(1));
        let mut runner = Runner::new(config)?;

        runner.start(&mut bus, &clock)?;
        assert!(runner.acquire(&mut bus, &clock)?.is_none());
        Ok(())
    }

    #[test]
    fn wrong_revision_is_fatal() -> Result<()> {
        let mut bus = SimBus::new().with_revision(0x21);
        let clock = ManualClock::new(Duration::from_millis(1));
        let mut runner = Runner::new(config())?;
        assert!(runner.start(&mut bus, &clock).is_err());
        Ok(())
    }

    #[test]
    fn loop_stops_when_cancelled() -> Result<()> {
        let dir = tempdir()?;
        let mut config = config();
        config.single_read = false;
        config.json = true;
        config.mode = SamplingMode::Continuous;
        config.out_delay_ms = 250;

        let cancel = CancellationToken::new();
        // itérations vers 100, 350 et 600 ms, arrêt pendant la troisième pause
        let clock = CancelAfter::new(Duration::from_millis(840), &cancel);
        let mut bus = SimBus::new().with_sample([150, 0, -150]);
        let mut runner = Runner::new(config)?;
        let mut sink = Sink::rolling(dir.path(), "TEST", runner.header(), clock.utc())?;

        runner.start(&mut bus, &clock)?;
        let emitted = runner.run(&mut bus, &clock, &mut sink, &cancel)?;
        assert_eq!(emitted, 3);

        let lines = log_lines(dir.path());
        assert_eq!(lines.len(), 3);
        let value: serde_json::Value = serde_json::from_str(&lines[0])?;
        assert_eq!(value["x"], 2.0);
        assert_eq!(value["z"], -2.0);
        assert_eq!(value["rt"], 25.0);

        assert!(clock.inner.sleeps().iter().all(|d| *d <= SLEEP_SLICE));
        Ok(())
    }

    #[test]
    fn period_does_not_include_acquisition_time() -> Result<()> {
        let dir = tempdir()?;
        let mut config = config();
        config.single_read = false;
        config.magnetometer_only = true;
        config.json = true;
        config.ts_milliseconds = true;

        // ~200 ms d'attente de DRDY par mesure, une mesure par seconde
        let cancel = CancellationToken::new();
        let clock = CancelAfter::new(Duration::from_millis(4_500), &cancel);
        let mut bus = SimBus::new().with_not_ready_polls(200);
        let mut runner = Runner::new(config)?;
        let mut sink = Sink::rolling(dir.path(), "TEST", runner.header(), clock.utc())?;

        runner.start(&mut bus, &clock)?;
        assert_eq!(runner.run(&mut bus, &clock, &mut sink, &cancel)?, 5);

        let stamps: Vec<i64> = log_lines(dir.path())
            .iter()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["ts"].as_str().unwrap().parse().unwrap()
            })
            .collect();
        // à 2 ms près pour la première itération, sans dérive ensuite
        let periods: Vec<i64> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(periods.len(), 4);
        assert!(periods.iter().all(|p| (1000..=1002).contains(p)), "{:?}", periods);
        assert_eq!(periods[1..], [1000; 3]);
        Ok(())
    }

    #[test]
    fn slow_acquisition_restarts_the_period() -> Result<()> {
        let mut config = config();
        config.single_read = false;
        config.magnetometer_only = true;
        config.out_delay_ms = 100;

        // chaque mesure dure plus que la période : pas de rattrapage en rafale
        let cancel = CancellationToken::new();
        let clock = CancelAfter::new(Duration::from_millis(1_000), &cancel);
        let mut bus = SimBus::new().with_not_ready_polls(250);
        let mut runner = Runner::new(config)?;
        let dir = tempdir()?;
        let mut sink = Sink::rolling(dir.path(), "TEST", runner.header(), clock.utc())?;

        runner.start(&mut bus, &clock)?;
        let emitted = runner.run(&mut bus, &clock, &mut sink, &cancel)?;

        // ~250 ms par mesure sur 900 ms, aucune pause hormis la stabilisation
        assert!((3..=4).contains(&emitted), "{}", emitted);
        assert_eq!(clock.inner.sleeps(), vec![crate::sensors::mag::SETTLE_DELAY]);
        Ok(())
    }

    #[test]
    fn sleep_returns_early_when_cancelled() {
        let clock = ManualClock::new(Duration::ZERO);
        let cancel = CancellationToken::new();
        cancel.cancel();
        sleep_until(&clock, clock.now() + Duration::from_secs(5), &cancel);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn sleep_is_sliced() {
        let clock = ManualClock::new(Duration::ZERO);
        sleep_until(&clock, clock.now() + Duration::from_millis(250), &CancellationToken::new());
        assert_eq!(clock.sleeps(), vec![SLEEP_SLICE, SLEEP_SLICE, Duration::from_millis(50)]);
    }

    #[test]
    fn cycle_count_block_is_readable() {
        assert_eq!(
            format_cycle_count_block(&[0x00, 0xC8, 0x00, 0xC8, 0x00, 0xC8, 0x00]),
            "Registres CCX_1..NOS (0x04..0x0A): 0x00 0xc8 0x00 0xc8 0x00 0xc8 0x00"
        );
    }
}
