use std::cmp::min;
use std::fmt::Debug;
use std::time::Duration;

/// A [Backoff] decides how long to wait for a reply after each transmission of a request. It is
///  stateless: everything it needs is passed in, so a single instance is shared by all
///  requests of a code.
pub trait Backoff: Debug + Send + Sync {
    /// The timeout after transmission number `attempt` (which is at least 2 - the first timeout
    ///  is always the policy's initial timeout), given the timeout used after the previous one.
    fn next_timeout(&self, initial_timeout: Duration, previous_timeout: Duration, attempt: u32) -> Duration;
}

/// Waits the initial timeout after every transmission
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedBackoff;
impl Backoff for FixedBackoff {
    fn next_timeout(&self, initial_timeout: Duration, _previous_timeout: Duration, _attempt: u32) -> Duration {
        initial_timeout
    }
}

/// Multiplies the timeout by a constant factor after every transmission, up to a maximum.
///
/// The factor is given in eighths to keep arithmetic integral, i.e. 16 doubles the timeout
///  and 12 increases it by half.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub factor_eighths: u32,
    pub max_timeout: Duration,
}

impl ExponentialBackoff {
    pub fn doubling(max_timeout: Duration) -> ExponentialBackoff {
        ExponentialBackoff {
            factor_eighths: 16,
            max_timeout,
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn next_timeout(&self, _initial_timeout: Duration, previous_timeout: Duration, _attempt: u32) -> Duration {
        let grown = previous_timeout.saturating_mul(self.factor_eighths) / 8;
        min(grown, self.max_timeout)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::second(1000, 1000, 2)]
    #[case::later(1000, 1000, 7)]
    fn test_fixed(#[case] initial_millis: u64, #[case] expected_millis: u64, #[case] attempt: u32) {
        let timeout = FixedBackoff.next_timeout(Duration::from_millis(initial_millis), Duration::from_millis(123), attempt);
        assert_eq!(timeout, Duration::from_millis(expected_millis));
    }

    #[rstest]
    #[case::doubling(16, 1000, 100_000, 2000)]
    #[case::doubling_capped(16, 6000, 10_000, 10_000)]
    #[case::factor_1_5(12, 2000, 100_000, 3000)]
    #[case::factor_1_5_capped(12, 8000, 10_000, 10_000)]
    #[case::factor_1(8, 2000, 100_000, 2000)]
    #[case::at_max(16, 10_000, 10_000, 10_000)]
    fn test_exponential(#[case] factor_eighths: u32, #[case] previous_millis: u64, #[case] max_millis: u64, #[case] expected_millis: u64) {
        let backoff = ExponentialBackoff {
            factor_eighths,
            max_timeout: Duration::from_millis(max_millis),
        };

        let timeout = backoff.next_timeout(Duration::from_millis(1), Duration::from_millis(previous_millis), 3);
        assert_eq!(timeout, Duration::from_millis(expected_millis));
    }

    #[test]
    fn test_exponential_saturates() {
        let backoff = ExponentialBackoff {
            factor_eighths: u32::MAX,
            max_timeout: Duration::MAX,
        };
        assert_eq!(backoff.next_timeout(Duration::from_secs(1), Duration::MAX, 3), Duration::MAX / 8);
    }
}
