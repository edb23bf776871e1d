//! Randomized pauses that keep the bot under chat backend and shop rate limits

use rand::Rng;
use tokio::time::{sleep, Duration};

/// A pause drawn uniformly from `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacer {
    min: Duration,
    max: Duration,
}

impl Pacer {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn from_secs(min: f64, max: f64) -> Self {
        Self::new(Duration::from_secs_f64(min.max(0.0)), Duration::from_secs_f64(max.max(0.0)))
    }

    /// No waiting at all; used by dry runs and tests.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn jitter(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let secs = rand::thread_rng().gen_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    pub async fn pause(&self) {
        let wait = self.jitter();
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}
