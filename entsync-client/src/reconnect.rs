//! Transport reconnection policy
//!
//! [`Backoff`] tells the WebSocket channel how long to wait before each
//! connection attempt and when to give up. Attempts are numbered from zero;
//! `delay_for(n)` returning `None` ends the attempt cycle and the channel
//! reports itself disconnected.
//!
//! ```rust
//! use entsync_client::Backoff;
//! use std::time::Duration;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(100), Duration::from_secs(5))
//!     .with_max_attempts(3);
//!
//! assert_eq!(backoff.delay_for(0), Some(Duration::from_millis(100)));
//! assert_eq!(backoff.delay_for(2), Some(Duration::from_millis(400)));
//! assert_eq!(backoff.delay_for(3), None);
//! ```

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// `min * 2^attempt`, capped at `max`, plus up to 25% random jitter
    Exponential {
        min: Duration,
        max: Duration,
        max_attempts: Option<u32>,
        jitter: bool,
    },
    /// The same delay before every attempt
    Fixed {
        delay: Duration,
        max_attempts: Option<u32>,
    },
    /// A single attempt, no retries
    Never,
}

impl Backoff {
    pub fn exponential(min: Duration, max: Duration) -> Self {
        Backoff::Exponential {
            min,
            max,
            max_attempts: None,
            jitter: false,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Backoff::Fixed {
            delay,
            max_attempts: None,
        }
    }

    /// Limit the number of attempts; no effect on [`Backoff::Never`]
    pub fn with_max_attempts(mut self, limit: u32) -> Self {
        match &mut self {
            Backoff::Exponential { max_attempts, .. } | Backoff::Fixed { max_attempts, .. } => {
                *max_attempts = Some(limit)
            }
            Backoff::Never => {}
        }
        self
    }

    pub fn with_jitter(mut self) -> Self {
        if let Backoff::Exponential { jitter, .. } = &mut self {
            *jitter = true;
        }
        self
    }

    /// Whether the channel should reconnect on its own after a drop
    pub fn retries(&self) -> bool {
        !matches!(self, Backoff::Never)
    }

    /// Delay before attempt number `attempt`, or `None` to give up
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match self {
            Backoff::Never => (attempt == 0).then_some(Duration::ZERO),
            Backoff::Fixed {
                delay,
                max_attempts,
            } => within(attempt, *max_attempts).then_some(*delay),
            Backoff::Exponential {
                min,
                max,
                max_attempts,
                jitter,
            } => {
                if !within(attempt, *max_attempts) {
                    return None;
                }
                let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
                let delay = min.saturating_mul(factor).min(*max);
                if *jitter {
                    let spread = delay.as_millis() as u64 / 4;
                    let extra = rand::thread_rng().gen_range(0..=spread);
                    Some(delay + Duration::from_millis(extra))
                } else {
                    Some(delay)
                }
            }
        }
    }
}

fn within(attempt: u32, max_attempts: Option<u32>) -> bool {
    max_attempts.map_or(true, |limit| attempt < limit)
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::exponential(Duration::from_millis(100), Duration::from_secs(30))
            .with_max_attempts(10)
            .with_jitter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth_is_capped() {
        let backoff = Backoff::exponential(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(0), Some(Duration::from_millis(100)));
        assert_eq!(backoff.delay_for(1), Some(Duration::from_millis(200)));
        assert_eq!(backoff.delay_for(3), Some(Duration::from_millis(800)));
        assert_eq!(backoff.delay_for(4), Some(Duration::from_secs(1)));
        assert_eq!(backoff.delay_for(40), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let backoff =
            Backoff::exponential(Duration::from_millis(400), Duration::from_secs(10)).with_jitter();
        for _ in 0..20 {
            let delay = backoff.delay_for(0).unwrap();
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[test]
    fn test_max_attempts() {
        let fixed = Backoff::fixed(Duration::from_millis(50)).with_max_attempts(2);
        assert_eq!(fixed.delay_for(0), Some(Duration::from_millis(50)));
        assert_eq!(fixed.delay_for(1), Some(Duration::from_millis(50)));
        assert_eq!(fixed.delay_for(2), None);
    }

    #[test]
    fn test_never_allows_one_attempt() {
        let never = Backoff::Never.with_max_attempts(5).with_jitter();
        assert_eq!(never, Backoff::Never);
        assert_eq!(never.delay_for(0), Some(Duration::ZERO));
        assert_eq!(never.delay_for(1), None);
        assert!(!never.retries());
    }

    #[test]
    fn test_default_policy() {
        match Backoff::default() {
            Backoff::Exponential {
                min,
                max_attempts,
                jitter,
                ..
            } => {
                assert_eq!(min, Duration::from_millis(100));
                assert_eq!(max_attempts, Some(10));
                assert!(jitter);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
