// ── Adaptive inter-request delay ──
//
// One delay value shared by every outbound call in the process. Callers
// reserve a send slot with `acquire()`; slots are spaced by the current
// delay regardless of how many workers are queued.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

/// Tuning for [`AdaptiveThrottle`].
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Delay between calls at startup.
    pub initial_delay: Duration,
    /// Floor the delay never drops below.
    pub min_delay: Duration,
    /// Ceiling the delay never grows past.
    pub max_delay: Duration,
    /// Multiplier applied on a rate-limit response (2.0 halves throughput).
    pub backoff_factor: f64,
    /// Multiplier applied after a success streak (0.9 = 10% faster).
    pub speedup_factor: f64,
    /// Consecutive successes required before speeding up.
    pub success_streak: u32,
    /// Minimum time between two speed-ups.
    pub change_cooldown: Duration,
    /// Log cumulative stats every N calls. 0 disables periodic logging.
    pub stats_interval: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            min_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            speedup_factor: 0.9,
            success_streak: 50,
            change_cooldown: Duration::from_secs(10),
            stats_interval: 100,
        }
    }
}

/// Point-in-time view of the limiter, for logs and run summaries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleStats {
    pub current_delay: Duration,
    pub total_calls: u64,
    pub rate_limited: u64,
}

impl ThrottleStats {
    /// Requests per second the current delay allows.
    pub fn effective_rate(&self) -> f64 {
        let secs = self.current_delay.as_secs_f64();
        if secs > 0.0 { 1.0 / secs } else { f64::INFINITY }
    }
}

#[derive(Debug)]
struct State {
    delay: Duration,
    consecutive_successes: u32,
    last_change: Option<Instant>,
    next_slot: Option<Instant>,
    total_calls: u64,
    rate_limited: u64,
}

/// Shared adaptive rate limiter.
///
/// Backs off multiplicatively on rate-limit responses and creeps the delay
/// down after a streak of successes, never below `min_delay`. Speed-ups
/// are separated by `change_cooldown`; a rate-limit response for a request
/// issued before the most recent delay change does not back off again, so
/// a burst of 429s from one window counts as a single signal.
#[derive(Debug)]
pub struct AdaptiveThrottle {
    config: ThrottleConfig,
    state: Mutex<State>,
}

impl AdaptiveThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        let delay = config
            .initial_delay
            .max(config.min_delay)
            .min(config.max_delay.max(config.min_delay));
        Self {
            config,
            state: Mutex::new(State {
                delay,
                consecutive_successes: 0,
                last_change: None,
                next_slot: None,
                total_calls: 0,
                rate_limited: 0,
            }),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current inter-request delay.
    pub fn current_delay(&self) -> Duration {
        self.state().delay
    }

    /// Wait for the next send slot.
    pub async fn acquire(&self) {
        let wake = {
            let mut state = self.state();
            let now = Instant::now();
            let slot = state.next_slot.map_or(now, |next| next.max(now));
            state.next_slot = Some(slot + state.delay);
            slot
        };
        tokio::time::sleep_until(wake).await;
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let stats = {
            let mut state = self.state();
            state.total_calls += 1;
            state.consecutive_successes += 1;

            if state.consecutive_successes >= self.config.success_streak {
                self.try_speed_up(&mut state);
            }
            self.periodic_stats(&state)
        };
        if let Some(stats) = stats {
            log_stats(&stats);
        }
    }

    /// Record a rate-limit response for a request sent at `issued_at`.
    pub fn record_rate_limited(&self, issued_at: Instant) {
        let stats = {
            let mut state = self.state();
            state.total_calls += 1;
            state.rate_limited += 1;
            state.consecutive_successes = 0;

            let stale = state.last_change.is_some_and(|changed| issued_at < changed);
            if !stale {
                let old = state.delay;
                let new = old
                    .mul_f64(self.config.backoff_factor)
                    .min(self.config.max_delay);
                if new != old {
                    let now = Instant::now();
                    info!(
                        old_ms = duration_ms(old),
                        new_ms = duration_ms(new),
                        "rate limited, backing off"
                    );
                    state.delay = new;
                    state.last_change = Some(now);
                    state.next_slot = Some(state.next_slot.map_or(now + new, |n| n.max(now + new)));
                }
            }
            self.periodic_stats(&state)
        };
        if let Some(stats) = stats {
            log_stats(&stats);
        }
    }

    /// Record a failed call that was not a rate-limit response.
    pub fn record_failure(&self) {
        let mut state = self.state();
        state.total_calls += 1;
        state.consecutive_successes = 0;
    }

    pub fn stats(&self) -> ThrottleStats {
        let state = self.state();
        ThrottleStats {
            current_delay: state.delay,
            total_calls: state.total_calls,
            rate_limited: state.rate_limited,
        }
    }

    /// Emit the cumulative stats line now.
    pub fn log_stats(&self) {
        log_stats(&self.stats());
    }

    fn try_speed_up(&self, state: &mut State) {
        let now = Instant::now();
        if state
            .last_change
            .is_some_and(|changed| now.duration_since(changed) < self.config.change_cooldown)
        {
            return;
        }

        let old = state.delay;
        let new = old
            .mul_f64(self.config.speedup_factor)
            .max(self.config.min_delay);
        if new != old {
            info!(
                old_ms = duration_ms(old),
                new_ms = duration_ms(new),
                "success streak, speeding up"
            );
            state.delay = new;
            state.last_change = Some(now);
        }
        state.consecutive_successes = 0;
    }

    fn periodic_stats(&self, state: &State) -> Option<ThrottleStats> {
        let interval = self.config.stats_interval;
        (interval > 0 && state.total_calls % interval == 0).then_some(ThrottleStats {
            current_delay: state.delay,
            total_calls: state.total_calls,
            rate_limited: state.rate_limited,
        })
    }
}

impl Default for AdaptiveThrottle {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}

fn log_stats(stats: &ThrottleStats) {
    info!(
        calls = stats.total_calls,
        rate_limited = stats.rate_limited,
        delay_ms = duration_ms(stats.current_delay),
        rate_per_sec = format!("{:.1}", stats.effective_rate()),
        "API throttle stats"
    );
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ThrottleConfig {
        ThrottleConfig {
            initial_delay: Duration::from_millis(400),
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            speedup_factor: 0.5,
            success_streak: 3,
            change_cooldown: Duration::from_secs(10),
            stats_interval: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_spaces_calls_by_current_delay() {
        let throttle = AdaptiveThrottle::new(config());
        let start = Instant::now();

        throttle.acquire().await;
        throttle.acquire().await;
        throttle.acquire().await;

        assert_eq!(start.elapsed(), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_multiplies_delay_up_to_ceiling() {
        let throttle = AdaptiveThrottle::new(config());

        throttle.record_rate_limited(Instant::now());
        assert_eq!(throttle.current_delay(), Duration::from_millis(800));

        tokio::time::advance(Duration::from_millis(1)).await;
        throttle.record_rate_limited(Instant::now());
        tokio::time::advance(Duration::from_millis(1)).await;
        throttle.record_rate_limited(Instant::now());
        assert_eq!(throttle.current_delay(), Duration::from_secs(2));
        assert_eq!(throttle.stats().rate_limited, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_stale_rate_limits_backs_off_once() {
        let throttle = AdaptiveThrottle::new(config());
        let issued = Instant::now();
        tokio::time::advance(Duration::from_millis(5)).await;

        throttle.record_rate_limited(issued);
        tokio::time::advance(Duration::from_millis(5)).await;
        throttle.record_rate_limited(issued);
        throttle.record_rate_limited(issued);

        assert_eq!(throttle.current_delay(), Duration::from_millis(800));
        assert_eq!(throttle.stats().rate_limited, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn success_streak_speeds_up_with_cooldown_and_floor() {
        let throttle = AdaptiveThrottle::new(config());

        for _ in 0..3 {
            throttle.record_success();
        }
        assert_eq!(throttle.current_delay(), Duration::from_millis(200));

        // Inside the cooldown window: no further change.
        for _ in 0..3 {
            throttle.record_success();
        }
        assert_eq!(throttle.current_delay(), Duration::from_millis(200));

        tokio::time::advance(Duration::from_secs(11)).await;
        throttle.record_success();
        assert_eq!(throttle.current_delay(), Duration::from_millis(100));

        tokio::time::advance(Duration::from_secs(11)).await;
        for _ in 0..3 {
            throttle.record_success();
        }
        assert_eq!(throttle.current_delay(), Duration::from_millis(100));
    }

    #[test]
    fn effective_rate_is_inverse_of_delay() {
        let stats = ThrottleStats {
            current_delay: Duration::from_millis(250),
            total_calls: 10,
            rate_limited: 1,
        };
        assert!((stats.effective_rate() - 4.0).abs() < f64::EPSILON);
    }
}
