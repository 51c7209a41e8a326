//! Shared exponential-backoff-with-jitter helper used identically by the
//! credential provider, source-host client, and edge-platform client (spec
//! §5: "Backoff jitter of ±20% is applied to all retry delays").

use rand::Rng;
use std::time::Duration;

/// Returns `base` with up to ±20% jitter applied, never negative.
pub fn jittered(base: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let factor = rng.gen_range(0.8..=1.2);
    Duration::from_secs_f64(base.as_secs_f64() * factor)
}

/// Outcome an attempt reports to [`with_backoff`] so it can decide whether
/// to retry.
pub enum Attempt<T> {
    Done(T),
    Retry,
}

/// Runs `f` up to `max_attempts` times, sleeping `delays[attempt]` (jittered)
/// between attempts when the attempt reports [`Attempt::Retry`]. Returns the
/// done value, or `None` if every attempt was exhausted without succeeding.
pub async fn with_backoff<T, F, Fut>(delays: &[Duration], mut f: F) -> Option<T>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Attempt<T>>,
{
    for (attempt, delay) in delays.iter().enumerate() {
        match f(attempt as u32).await {
            Attempt::Done(value) => return Some(value),
            Attempt::Retry => {
                tokio::time::sleep(jittered(*delay)).await;
            }
        }
    }
    match f(delays.len() as u32).await {
        Attempt::Done(value) => Some(value),
        Attempt::Retry => None,
    }
}

/// Standard exponential backoff schedule for a given base and attempt count,
/// e.g. `exponential(Duration::from_secs(1), 3)` => `[1s, 2s, 3s]` matching
/// the source-host client's documented 1s/2s/3s schedule (spec §4.A).
pub fn linear(base: Duration, attempts: u32) -> Vec<Duration> {
    (1..=attempts).map(|n| base * n).collect()
}

/// Doubling backoff capped at `max`, e.g. the build monitor's run-discovery
/// poll: 10s, 15s, 22s, ... capped at 30s (spec §4.G uses a ~1.5x growth,
/// not a strict doubling, so the multiplier is a parameter).
pub fn growing(initial: Duration, multiplier: f64, cap: Duration, attempts: u32) -> Vec<Duration> {
    let mut delays = Vec::with_capacity(attempts as usize);
    let mut current = initial;
    for _ in 0..attempts {
        delays.push(current.min(cap));
        current = Duration::from_secs_f64((current.as_secs_f64() * multiplier).min(cap.as_secs_f64()));
    }
    delays
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_stays_within_twenty_percent() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let j = jittered(base);
            assert!(j.as_secs_f64() >= 8.0 && j.as_secs_f64() <= 12.0);
        }
    }

    #[test]
    fn linear_produces_1s_2s_3s_schedule() {
        let delays = linear(Duration::from_secs(1), 3);
        assert_eq!(delays, vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(3)]);
    }

    #[test]
    fn growing_caps_at_max() {
        let delays = growing(Duration::from_secs(10), 1.5, Duration::from_secs(30), 6);
        assert_eq!(delays[0], Duration::from_secs(10));
        assert!(delays.last().unwrap() <= &Duration::from_secs(30));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn with_backoff_returns_none_after_exhausting_retries() {
        let delays = [Duration::from_millis(1), Duration::from_millis(1)];
        let result: Option<()> = with_backoff(&delays, |_attempt| async { Attempt::Retry }).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn with_backoff_returns_first_success() {
        let delays = [Duration::from_millis(1), Duration::from_millis(1)];
        let result = with_backoff(&delays, |attempt| async move {
            if attempt == 1 {
                Attempt::Done(attempt)
            } else {
                Attempt::Retry
            }
        })
        .await;
        assert_eq!(result, Some(1));
    }
}
