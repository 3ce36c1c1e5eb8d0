use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::db::error::{ErrorClass, PersistenceError};
use crate::db::session::Session;

/// Bounded exponential backoff for persistence operations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            backoff: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps, for tests
    pub fn immediate(max_retries: u32) -> RetryPolicy {
        RetryPolicy { max_retries, initial_delay: Duration::ZERO, backoff: 1.0 }
    }

    /// Delay before retry number `attempt`, counting from zero
    pub fn delay(&self, attempt: u32) -> Duration {
        self.initial_delay.mul_f64(self.backoff.powi(attempt as i32))
    }

    /// Run `op`, retrying transient failures
    pub fn run<T, F>(&self, mut op: F) -> Result<T, PersistenceError>
    where
        F: FnMut() -> Result<T, PersistenceError>,
    {
        self.drive(&mut (), |_| op(), |_| {})
    }

    /// Run `op` against `session`; a broken session is reset and the
    /// operation retried once
    pub fn run_with_session<T, F>(&self, session: &mut Session, op: F) -> Result<T, PersistenceError>
    where
        F: FnMut(&mut Session) -> Result<T, PersistenceError>,
    {
        self.drive(session, op, |s| s.reset())
    }

    fn drive<S, T, F, R>(&self, state: &mut S, mut op: F, mut reset: R) -> Result<T, PersistenceError>
    where
        F: FnMut(&mut S) -> Result<T, PersistenceError>,
        R: FnMut(&mut S),
    {
        let mut attempt = 0;
        let mut reset_done = false;
        loop {
            let err = match op(state) {
                Ok(value) => {
                    if attempt > 0 {
                        info!("Database operation succeeded after {attempt} retries");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            match err.class() {
                ErrorClass::Transient if attempt < self.max_retries => {
                    let delay = self.delay(attempt);
                    attempt += 1;
                    warn!(
                        "Transient database error (attempt {attempt}/{}): {err}; retrying in {delay:?}",
                        self.max_retries + 1
                    );
                    thread::sleep(delay);
                }
                ErrorClass::Transient => {
                    warn!("Database operation failed after {} attempts: {err}", attempt + 1);
                    return Err(err);
                }
                ErrorClass::BrokenSession if !reset_done => {
                    warn!("Resetting broken database session: {err}");
                    reset(state);
                    reset_done = true;
                }
                ErrorClass::BrokenSession | ErrorClass::Permanent => return Err(err),
            }
        }
    }
}
