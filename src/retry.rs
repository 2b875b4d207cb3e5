use log::debug;
use std::thread;
use std::time::Duration;

/// Retries an operation a fixed number of times with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

/// The last error of an exhausted policy.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub error: E,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Calls `op` with the 1-based attempt number until it succeeds or attempts run out.
    pub fn run<T, E>(&self, mut op: impl FnMut(u32) -> Result<T, E>) -> Result<T, Exhausted<E>> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(error) if attempt >= max_attempts => {
                    return Err(Exhausted {
                        attempts: attempt,
                        error,
                    });
                }
                Err(_) => {
                    debug!(
                        "Attempt {}/{} failed, retrying in {:?}",
                        attempt, max_attempts, self.delay
                    );
                    thread::sleep(self.delay);
                    attempt += 1;
                }
            }
        }
    }
}
