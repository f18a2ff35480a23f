use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Source de temps injectée dans les attentes du capteur et l'horodatage
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
    /// Heure UTC des enregistrements
    fn utc(&self) -> DateTime<Utc>;
}

/// Horloge système (thread::sleep)
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }

    fn utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub use self::manual::ManualClock;

mod manual {
    use std::cell::{Cell, RefCell};
    use std::time::{Duration, Instant};

    use chrono::{DateTime, TimeZone, Utc};

    use super::Clock;

    /// Horloge simulée : chaque lecture avance d'un pas fixe, `sleep` avance
    /// de la durée demandée sans bloquer. L'heure UTC part du 1er janvier 2026.
    pub struct ManualClock {
        origin: Instant,
        origin_utc: DateTime<Utc>,
        elapsed: Cell<Duration>,
        step: Duration,
        sleeps: RefCell<Vec<Duration>>,
    }

    impl ManualClock {
        pub fn new(step: Duration) -> Self {
            ManualClock {
                origin: Instant::now(),
                origin_utc: Utc.timestamp_opt(1_767_225_600, 0).single().unwrap_or_default(),
                elapsed: Cell::new(Duration::ZERO),
                step,
                sleeps: RefCell::new(Vec::new()),
            }
        }

        pub fn elapsed(&self) -> Duration {
            self.elapsed.get()
        }

        pub fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.borrow().clone()
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            let now = self.origin + self.elapsed.get();
            self.elapsed.set(self.elapsed.get() + self.step);
            now
        }

        fn sleep(&self, duration: Duration) {
            self.sleeps.borrow_mut().push(duration);
            self.elapsed.set(self.elapsed.get() + duration);
        }

        fn utc(&self) -> DateTime<Utc> {
            let elapsed = chrono::Duration::from_std(self.elapsed.get()).unwrap_or_default();
            self.origin_utc + elapsed
        }
    }
}
