//! Bounded retry for remote calls.

use std::fmt::Display;

use tracing::warn;

use crate::error::TransportError;

/// Result of a retried call along with how many attempts it took.
#[derive(Debug)]
pub struct Attempted<T, E = TransportError> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Call `op` until it succeeds or the attempt budget runs out.
    ///
    /// No backoff: the stores answer quickly or not at all.
    pub fn run<T, E, F>(&self, label: &str, mut op: F) -> Attempted<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(v) => {
                    return Attempted {
                        result: Ok(v),
                        attempts: attempt,
                    }
                }
                Err(e) if attempt < self.max_attempts => {
                    warn!(target: "cohort::retry", %label, attempt, max = self.max_attempts, error = %e, "retrying");
                }
                Err(e) => {
                    warn!(target: "cohort::retry", %label, attempts = attempt, error = %e, "giving up");
                    return Attempted {
                        result: Err(e),
                        attempts: attempt,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> TransportError {
        TransportError::Status {
            endpoint: "mem".into(),
            status: code,
            body: String::new(),
        }
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let out = RetryPolicy::new(5).run("import", || {
            calls += 1;
            if calls < 3 {
                Err(status(503))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(out.result, Ok(3));
        assert_eq!(out.attempts, 3);
    }

    #[test]
    fn gives_up_at_bound() {
        let mut calls = 0;
        let out: Attempted<()> = RetryPolicy::new(5).run("import", || {
            calls += 1;
            Err(status(500))
        });
        assert_eq!(calls, 5);
        assert_eq!(out.attempts, 5);
        assert!(out.result.is_err());
    }

    #[test]
    fn zero_is_clamped_to_one_attempt() {
        assert_eq!(RetryPolicy::new(0).max_attempts(), 1);
    }
}
