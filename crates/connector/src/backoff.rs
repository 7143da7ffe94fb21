use rand::Rng;
use std::time::Duration;

/// Base of the exponential schedule, in milliseconds.
const BASE_MS: u64 = 100;
/// Ceiling on any single delay: five minutes.
const CAP_MS: u64 = 300_000;

/// Full-jitter delay for the given attempt count: uniform in
/// `[0, min(100 * 2^attempts, 300_000)]` milliseconds, and zero for
/// attempt 0. Full jitter keeps a fleet of retrying workers from
/// synchronizing into retry storms.
pub fn jittered_delay(attempts: u32) -> Duration {
    if attempts == 0 {
        return Duration::ZERO;
    }
    // 100 * 2^12 already exceeds the cap.
    let cap = if attempts >= 12 {
        CAP_MS
    } else {
        std::cmp::min(BASE_MS << attempts, CAP_MS)
    };
    Duration::from_millis(rand::thread_rng().gen_range(0..=cap))
}

/// Sleep for a jittered delay. No-op for attempt 0.
pub async fn wait(attempts: u32) {
    if attempts == 0 {
        return;
    }
    let delay = jittered_delay(attempts);
    tracing::trace!(attempts, ?delay, "backing off");
    tokio::time::sleep(delay).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_attempts() {
        assert_eq!(jittered_delay(0), Duration::ZERO);
    }

    #[test]
    fn test_bounds() {
        for attempts in 1..=20u32 {
            let cap = std::cmp::min(100u64.saturating_mul(1 << attempts.min(32)), 300_000);
            for _ in 0..100 {
                let delay = jittered_delay(attempts);
                assert!(
                    delay <= Duration::from_millis(cap),
                    "attempt {attempts}: {delay:?} exceeds {cap}ms",
                );
            }
        }
    }

    #[test]
    fn test_cap_reached() {
        // Far past the doubling range the bound stays pinned at 5 minutes.
        for _ in 0..100 {
            assert!(jittered_delay(1_000) <= Duration::from_secs(300));
        }
    }
}
