//! Process-global pacing for probe requests.

use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Token-bucket limiter: one probe per `1/rps` seconds plus 300-700 ms of
/// jitter. Transfers themselves are not counted; each manager holds at most
/// one connection.
pub struct RateLimiter {
    interval: Duration,
    next_at: Mutex<Instant>,
}

impl RateLimiter {
    /// `rps <= 0` disables pacing.
    pub fn new(rps: f64) -> Self {
        let interval = if rps > 0.0 {
            Duration::from_secs_f64(1.0 / rps)
        } else {
            Duration::ZERO
        };
        RateLimiter {
            interval,
            next_at: Mutex::new(Instant::now()),
        }
    }

    /// Block until this caller's slot; callers across threads are serialized
    /// in arrival order at the granularity of the lock.
    pub fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }
        let slot = {
            let mut next_at = self.next_at.lock().unwrap();
            let now = Instant::now();
            let slot = (*next_at).max(now);
            *next_at = slot + self.interval + jitter();
            slot
        };
        let now = Instant::now();
        if slot > now {
            std::thread::sleep(slot - now);
        }
    }
}

/// 300-700 ms derived from the clock's sub-second noise; avoids pulling in a
/// PRNG for pacing.
fn jitter() -> Duration {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    Duration::from_millis(300 + u64::from(nanos % 400))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rate_never_blocks() {
        let rl = RateLimiter::new(0.0);
        let t0 = Instant::now();
        for _ in 0..100 {
            rl.acquire();
        }
        assert!(t0.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn second_acquire_waits_for_interval_and_jitter() {
        let rl = RateLimiter::new(10.0); // 100 ms interval
        rl.acquire();
        let t0 = Instant::now();
        rl.acquire();
        let waited = t0.elapsed();
        assert!(
            waited >= Duration::from_millis(300),
            "expected at least interval + minimum jitter, waited {:?}",
            waited
        );
    }

    #[test]
    fn jitter_is_bounded() {
        for _ in 0..32 {
            let j = jitter();
            assert!(j >= Duration::from_millis(300) && j < Duration::from_millis(700));
        }
    }
}
