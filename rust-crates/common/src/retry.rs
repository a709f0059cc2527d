//! Bounded polling shared by every wait loop in the workspace.

use std::{
    fmt,
    future::Future,
    time::Duration,
};

/// Outcome of a single probe attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T, E> {
    Ready(T),
    Pending,
    Failed(E),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    Exhausted { attempts: u32 },
    Terminal(E),
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts } => {
                write!(f, "gave up after {attempts} attempts")
            }
            RetryError::Terminal(e) => write!(f, "{e}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// `vercel whoami` polling after an interactive login (~5 minutes).
    pub const fn login_wait() -> Self {
        Self::new(150, Duration::from_secs(2))
    }

    /// Latest-deployment polling (~5 minutes).
    pub const fn deployment_wait() -> Self {
        Self::new(60, Duration::from_secs(5))
    }

    /// Short retry for HTTP 429 responses.
    pub const fn rate_limit() -> Self {
        Self::new(3, Duration::from_secs(2))
    }

    pub const fn with_interval(self, interval: Duration) -> Self {
        Self {
            max_attempts: self.max_attempts,
            interval,
        }
    }

    pub fn ceiling(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }

    /// Runs `probe` until it is ready, fails terminally, or the attempts run out.
    /// The probe receives the 1-based attempt number. No sleep follows the last attempt.
    pub async fn poll<T, E, F, Fut>(&self, mut probe: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Poll<T, E>>,
    {
        for attempt in 1..=self.max_attempts {
            match probe(attempt).await {
                Poll::Ready(value) => return Ok(value),
                Poll::Failed(e) => return Err(RetryError::Terminal(e)),
                Poll::Pending => {
                    tracing::debug!(attempt, max = self.max_attempts, "probe pending");
                    if attempt < self.max_attempts && !self.interval.is_zero() {
                        tokio::time::sleep(self.interval).await;
                    }
                }
            }
        }
        Err(RetryError::Exhausted {
            attempts: self.max_attempts,
        })
    }
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn poll__probe_never_ready__exhausts_after_max_attempts() {
        // given
        let policy = RetryPolicy::new(4, Duration::ZERO);
        let calls = Cell::new(0);

        // when
        let result: Result<(), RetryError<String>> = policy
            .poll(|_| {
                calls.set(calls.get() + 1);
                async { Poll::Pending }
            })
            .await;

        // then
        assert_eq!(result, Err(RetryError::Exhausted { attempts: 4 }));
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test]
    async fn poll__terminal_failure__stops_immediately() {
        // given
        let policy = RetryPolicy::new(10, Duration::ZERO);
        let calls = Cell::new(0);

        // when
        let result: Result<(), _> = policy
            .poll(|attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt == 2 {
                        Poll::Failed("ERROR")
                    } else {
                        Poll::Pending
                    }
                }
            })
            .await;

        // then
        assert_eq!(result, Err(RetryError::Terminal("ERROR")));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn poll__ready_on_third_attempt__returns_value() {
        let policy = RetryPolicy::new(5, Duration::ZERO);

        let result: Result<u32, RetryError<()>> = policy
            .poll(|attempt| async move {
                if attempt == 3 {
                    Poll::Ready(attempt)
                } else {
                    Poll::Pending
                }
            })
            .await;

        assert_eq!(result, Ok(3));
    }

    #[test]
    fn login_wait__ceiling_is_five_minutes() {
        assert_eq!(RetryPolicy::login_wait().ceiling(), Duration::from_secs(300));
        assert_eq!(
            RetryPolicy::deployment_wait().ceiling(),
            Duration::from_secs(300)
        );
    }
}
