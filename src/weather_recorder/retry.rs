// weather_recorder - Record current weather observations into InfluxDB
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::shutdown::{Shutdown, DEFAULT_STEP};
use std::error;
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Decide how long to wait after a failed attempt, or whether to give up.
pub trait RetryPolicy {
    /// Delay before the next attempt, given the 1-based number of the attempt
    /// that just failed. `None` means no further attempts should be made.
    fn delay(&self, attempt: u32) -> Option<Duration>;
}

impl<P: RetryPolicy + ?Sized> RetryPolicy for &P {
    fn delay(&self, attempt: u32) -> Option<Duration> {
        (**self).delay(attempt)
    }
}

impl<P: RetryPolicy + ?Sized> RetryPolicy for Box<P> {
    fn delay(&self, attempt: u32) -> Option<Duration> {
        (**self).delay(attempt)
    }
}

/// Same delay after every failure, optionally bounded by a number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl FixedBackoff {
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);

    pub fn new(delay: Duration) -> Self {
        FixedBackoff {
            delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DELAY)
    }
}

impl RetryPolicy for FixedBackoff {
    fn delay(&self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt >= max => None,
            _ => Some(self.delay),
        }
    }
}

/// Delay doubling after each failure starting at `initial`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }

        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        Some(self.initial.saturating_mul(factor).min(self.max))
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    Cancelled { attempts: u32 },
    Exhausted { attempts: u32, last: E },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled { attempts } => write!(f, "cancelled after {} attempts", attempts),
            Self::Exhausted { attempts, last } => write!(f, "gave up after {} attempts: {}", attempts, last),
        }
    }
}

impl<E: error::Error + 'static> error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}

/// Run `op` until it succeeds, `policy` gives up, or `shutdown` is triggered.
///
/// Shutdown is only checked between attempts: an attempt that has started is
/// always allowed to finish. Waits between attempts are interruptible.
pub async fn retry<T, E, P, F, Fut>(policy: &P, shutdown: &Shutdown, mut op: F) -> Result<T, RetryError<E>>
where
    E: fmt::Display,
    P: RetryPolicy + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0;

    loop {
        if shutdown.is_triggered() {
            return Err(RetryError::Cancelled { attempts });
        }

        attempts += 1;
        let err = match op().await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        match policy.delay(attempts) {
            Some(delay) => {
                tracing::warn!(
                    message = "attempt failed, retrying",
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                );
                shutdown.sleep(delay, DEFAULT_STEP).await;
            }
            None => {
                return Err(RetryError::Exhausted { attempts, last: err });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{retry, ExponentialBackoff, FixedBackoff, RetryError, RetryPolicy};
    use crate::shutdown::Shutdown;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Policy that records every failed attempt it was asked about.
    struct Recording {
        delay: Duration,
        seen: Mutex<Vec<u32>>,
    }

    impl RetryPolicy for Recording {
        fn delay(&self, attempt: u32) -> Option<Duration> {
            self.seen.lock().unwrap().push(attempt);
            Some(self.delay)
        }
    }

    #[test]
    fn test_fixed_backoff() {
        let unbounded = FixedBackoff::default();
        assert_eq!(Some(Duration::from_secs(5)), unbounded.delay(1));
        assert_eq!(Some(Duration::from_secs(5)), unbounded.delay(10_000));

        let bounded = FixedBackoff::new(Duration::from_secs(1)).with_max_attempts(3);
        assert_eq!(Some(Duration::from_secs(1)), bounded.delay(2));
        assert_eq!(None, bounded.delay(3));
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = ExponentialBackoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            max_attempts: None,
        };

        assert_eq!(Some(Duration::from_millis(100)), policy.delay(1));
        assert_eq!(Some(Duration::from_millis(200)), policy.delay(2));
        assert_eq!(Some(Duration::from_millis(800)), policy.delay(4));
        assert_eq!(Some(Duration::from_secs(1)), policy.delay(5));
        assert_eq!(Some(Duration::from_secs(1)), policy.delay(64));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let (shutdown, _trigger) = Shutdown::new();
        let policy = Recording {
            delay: Duration::from_millis(5),
            seen: Mutex::new(Vec::new()),
        };

        let mut calls = 0;
        let res: Result<&str, RetryError<String>> = retry(&policy, &shutdown, || {
            calls += 1;
            let current = calls;
            async move {
                if current <= 3 {
                    Err(format!("connection refused #{}", current))
                } else {
                    Ok("document")
                }
            }
        })
        .await;

        assert_eq!("document", res.unwrap());
        assert_eq!(4, calls);
        assert_eq!(vec![1, 2, 3], *policy.seen.lock().unwrap());
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let (shutdown, _trigger) = Shutdown::new();
        let policy = FixedBackoff::new(Duration::ZERO).with_max_attempts(2);

        let res: Result<(), RetryError<&str>> = retry(&policy, &shutdown, || async { Err("nope") }).await;
        match res {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(2, attempts);
                assert_eq!("nope", last);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retry_cancelled_while_waiting() {
        let (shutdown, trigger) = Shutdown::new();
        let policy = FixedBackoff::default();

        let mut calls = 0;
        let res: Result<(), RetryError<&str>> = retry(&policy, &shutdown, || {
            calls += 1;
            trigger.trigger();
            async { Err("unreachable host") }
        })
        .await;

        assert!(matches!(res, Err(RetryError::Cancelled { attempts: 1 })));
        assert_eq!(1, calls);
    }

    #[tokio::test]
    async fn test_retry_not_attempted_after_shutdown() {
        let (shutdown, trigger) = Shutdown::new();
        trigger.trigger();

        let res: Result<(), RetryError<&str>> =
            retry(&FixedBackoff::default(), &shutdown, || async { Ok(()) }).await;
        assert!(matches!(res, Err(RetryError::Cancelled { attempts: 0 })));
    }
}
