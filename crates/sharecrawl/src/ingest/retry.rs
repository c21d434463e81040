//! Exponential backoff around fallible async calls.
//!
//! The delay schedule is a pure function of the attempt number. Sleeping goes
//! through [`Sleeper`] so tests can observe delays without waiting for them.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

/// Doubling delay: `base * 2^attempt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Delay before retry number `attempt` (0 for the first retry).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for std::io::Error {
    fn is_retryable(&self) -> bool {
        !matches!(
            self.kind(),
            std::io::ErrorKind::PermissionDenied
                | std::io::ErrorKind::NotFound
                | std::io::ErrorKind::InvalidInput
        )
    }
}

pub type SleepFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Source of delays.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> SleepFuture<'_>;
}

/// Real delays on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Records requested delays and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|delays| delays.clone())
            .unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
        Box::pin(std::future::ready(()))
    }
}

/// Result of a retried call plus how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Total attempts made, including the first.
    pub attempts: u32,
}

/// Call `op` until it succeeds, fails terminally, or `max_retries` retries are spent.
///
/// `op` receives the zero-based attempt number. Terminal errors return
/// immediately without sleeping.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &BackoffPolicy,
    max_retries: u32,
    sleeper: &dyn Sleeper,
    mut op: F,
) -> RetryOutcome<T, E>
where
    E: Retryable + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt + 1,
                }
            }
            Err(err) if err.is_retryable() && attempt < max_retries => {
                let delay = policy.delay(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retryable failure, backing off"
                );
                sleeper.sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt + 1,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Flaky {
        retryable: bool,
        label: String,
    }

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.label)
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    #[test]
    fn test_delay_doubles() {
        let policy = BackoffPolicy::new(Duration::from_millis(100));
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_saturates() {
        let policy = BackoffPolicy::new(Duration::from_secs(1));
        assert!(policy.delay(64) >= policy.delay(31));
    }

    #[tokio::test]
    async fn test_exhausts_retries_with_increasing_delays() {
        let sleeper = RecordingSleeper::new();
        let policy = BackoffPolicy::new(Duration::from_millis(10));

        let outcome: RetryOutcome<(), Flaky> =
            retry_with_backoff(&policy, 3, &sleeper, |attempt| async move {
                Err(Flaky {
                    retryable: true,
                    label: format!("attempt {}", attempt),
                })
            })
            .await;

        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.result.unwrap_err().label, "attempt 3");
        let delays = sleeper.delays();
        assert_eq!(delays.len(), 3);
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_terminal_error_skips_retries() {
        let sleeper = RecordingSleeper::new();
        let outcome: RetryOutcome<(), Flaky> =
            retry_with_backoff(&BackoffPolicy::default(), 3, &sleeper, |_| async {
                Err(Flaky {
                    retryable: false,
                    label: "bad request".into(),
                })
            })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let sleeper = RecordingSleeper::new();
        let outcome: RetryOutcome<u32, Flaky> =
            retry_with_backoff(&BackoffPolicy::default(), 3, &sleeper, |attempt| async move {
                if attempt < 2 {
                    Err(Flaky {
                        retryable: true,
                        label: "503".into(),
                    })
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(outcome.result.unwrap(), 2);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }
}
