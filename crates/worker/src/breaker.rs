//! Per-channel circuit breakers.
//!
//! Closed trips to open after consecutive failures; open rejects for a
//! cooldown window, then half-open admits a bounded set of probes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use courier_core::types::Channel;

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip a closed breaker.
    pub failure_threshold: u32,
    /// How long an open breaker rejects before going half-open.
    pub open_timeout: Duration,
    /// Probe budget in half-open; this many successes close the breaker.
    pub half_open_max_probes: u32,
    /// Rolling window after which a closed breaker's counters reset.
    pub reset_interval: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            half_open_max_probes: 3,
            reset_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct Core {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    window_started: Instant,
    probes_in_flight: u32,
    probe_successes: u32,
}

#[derive(Debug)]
pub struct Breaker {
    name: &'static str,
    config: BreakerConfig,
    core: Mutex<Core>,
}

impl Breaker {
    pub fn new(name: &'static str, config: BreakerConfig) -> Self {
        Self {
            name,
            config,
            core: Mutex::new(Core {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                window_started: Instant::now(),
                probes_in_flight: 0,
                probe_successes: 0,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock_core().state
    }

    /// Ask for admission. A true return must be paired with exactly one
    /// `on_success` or `on_failure` once the guarded call finishes.
    pub fn try_acquire(&self) -> bool {
        let mut core = self.lock_core();
        match core.state {
            BreakerState::Closed => {
                if core.window_started.elapsed() >= self.config.reset_interval {
                    core.consecutive_failures = 0;
                    core.window_started = Instant::now();
                }
                true
            }
            BreakerState::Open => {
                let expired = core
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.open_timeout);
                if !expired {
                    return false;
                }
                core.state = BreakerState::HalfOpen;
                core.probes_in_flight = 1;
                core.probe_successes = 0;
                true
            }
            BreakerState::HalfOpen => {
                if core.probes_in_flight < self.config.half_open_max_probes {
                    core.probes_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut core = self.lock_core();
        match core.state {
            BreakerState::Closed => core.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                core.probes_in_flight = core.probes_in_flight.saturating_sub(1);
                core.probe_successes += 1;
                if core.probe_successes >= self.config.half_open_max_probes {
                    core.state = BreakerState::Closed;
                    core.consecutive_failures = 0;
                    core.opened_at = None;
                    core.window_started = Instant::now();
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn on_failure(&self) {
        let mut core = self.lock_core();
        match core.state {
            BreakerState::Closed => {
                core.consecutive_failures += 1;
                if core.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        breaker = self.name,
                        failures = core.consecutive_failures,
                        "circuit breaker opened"
                    );
                    Self::open(&mut core);
                }
            }
            BreakerState::HalfOpen => {
                warn!(breaker = self.name, "probe failed, circuit breaker re-opened");
                Self::open(&mut core);
            }
            BreakerState::Open => {}
        }
    }

    fn open(core: &mut Core) {
        core.state = BreakerState::Open;
        core.opened_at = Some(Instant::now());
        core.probes_in_flight = 0;
        core.probe_successes = 0;
    }

    fn lock_core(&self) -> std::sync::MutexGuard<'_, Core> {
        match self.core.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Debug)]
pub struct BreakerSet {
    breakers: HashMap<Channel, Breaker>,
}

impl BreakerSet {
    pub fn new(config: BreakerConfig) -> Self {
        let breakers = Channel::ALL
            .into_iter()
            .map(|channel| (channel, Breaker::new(channel.as_str(), config.clone())))
            .collect();
        Self { breakers }
    }

    pub fn get(&self, channel: Channel) -> &Breaker {
        &self.breakers[&channel]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 5,
            open_timeout: Duration::from_millis(20),
            half_open_max_probes: 3,
            reset_interval: Duration::from_millis(50),
        }
    }

    fn fail_times(breaker: &Breaker, times: u32) {
        for _ in 0..times {
            assert!(breaker.try_acquire());
            breaker.on_failure();
        }
    }

    #[test]
    fn trips_after_consecutive_failures() {
        let breaker = Breaker::new("sms", fast_config());
        fail_times(&breaker, 4);
        assert_eq!(breaker.state(), BreakerState::Closed);

        fail_times(&breaker, 1);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn success_resets_consecutive_count() {
        let breaker = Breaker::new("sms", fast_config());
        fail_times(&breaker, 4);
        assert!(breaker.try_acquire());
        breaker.on_success();
        fail_times(&breaker, 4);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_admits_bounded_probes() {
        let breaker = Breaker::new("email", fast_config());
        fail_times(&breaker, 5);
        assert!(!breaker.try_acquire());

        std::thread::sleep(Duration::from_millis(25));

        // Cooldown elapsed: three probes, no more.
        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(breaker.try_acquire());
        assert!(breaker.try_acquire());
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn all_probes_succeeding_closes() {
        let breaker = Breaker::new("email", fast_config());
        fail_times(&breaker, 5);
        std::thread::sleep(Duration::from_millis(25));

        for _ in 0..3 {
            assert!(breaker.try_acquire());
            breaker.on_success();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.try_acquire());
    }

    #[test]
    fn probe_failure_reopens() {
        let breaker = Breaker::new("push", fast_config());
        fail_times(&breaker, 5);
        std::thread::sleep(Duration::from_millis(25));

        assert!(breaker.try_acquire());
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn closed_counters_reset_on_rolling_window() {
        let breaker = Breaker::new("sms", fast_config());
        fail_times(&breaker, 4);

        std::thread::sleep(Duration::from_millis(60));

        // The window rolled over, so these four failures start from zero.
        fail_times(&breaker, 4);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn breaker_set_is_per_channel() {
        let set = BreakerSet::new(fast_config());
        fail_times(set.get(Channel::Sms), 5);
        assert_eq!(set.get(Channel::Sms).state(), BreakerState::Open);
        assert_eq!(set.get(Channel::Email).state(), BreakerState::Closed);
        assert!(set.get(Channel::Email).try_acquire());
    }
}
