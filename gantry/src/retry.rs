//! Bounded retries with a fixed interval.
//!
//! Used around operations outside the execute contract, such as waiting for
//! a freshly booted guest to accept connections.

use std::fmt::Display;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    /// Total number of attempts, at least one is always made.
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            attempts: 3,
            interval: Duration::from_secs(5),
        }
    }
}

impl Retry {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Call `f` until it succeeds or the attempts are used up.
    ///
    /// Returns the last error when every attempt failed.
    pub fn run<T, E, F>(&self, label: &str, mut f: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match f() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "Succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        label,
                        attempt,
                        attempts,
                        "Attempt failed, retrying in {}s: {}",
                        self.interval.as_secs_f32(),
                        e
                    );
                    thread::sleep(self.interval);
                    attempt += 1;
                }
                Err(e) => {
                    warn!(label, attempts, "Giving up: {}", e);
                    return Err(e);
                }
            }
        }
    }
}
