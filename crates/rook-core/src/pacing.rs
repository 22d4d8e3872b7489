//! Adaptive request pacing as an explicit state machine.
//!
//! Observes fetch outcomes across a cycle and adapts inter-request delay
//! and batch size when the target site pushes back. Throttling is strictly
//! evidence-driven: a `RateLimited` outcome always throttles, while
//! `Transient`/`Forbidden` outcomes throttle only past a density threshold
//! within a sliding observation window.
//!
//! # States
//!
//! ```text
//! NOMINAL --[RateLimited | negative density]--> THROTTLED
//! THROTTLED --[cooldown with no negatives]--> RECOVERING
//! RECOVERING --[M consecutive successes]--> NOMINAL
//! RECOVERING --[any negative signal]--> THROTTLED
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::outcome::ThrottleSignal;

/// Current pacing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingState {
    /// Full speed: nominal delay and batch size.
    Nominal,
    /// Evidence of rate limiting: delay multiplied, batch reduced.
    Throttled,
    /// Probing: batch stays reduced until a run of successes confirms
    /// the site has calmed down.
    Recovering,
}

impl std::fmt::Display for PacingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacingState::Nominal => write!(f, "nominal"),
            PacingState::Throttled => write!(f, "throttled"),
            PacingState::Recovering => write!(f, "recovering"),
        }
    }
}

/// Tuning for the pacing controller.
#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Inter-request delay while nominal.
    pub base_delay: Duration,

    /// Multiplier applied to the current delay on each `RateLimited`.
    pub backoff_factor: f32,

    /// Hard ceiling on the throttled delay. Guarantees forward progress
    /// is never starved indefinitely.
    pub max_delay: Duration,

    /// Sliding window length (number of recent observations).
    pub window: usize,

    /// Negatives within the window that count as rate-limit evidence.
    pub negative_density: usize,

    /// Quiet period after the last negative signal before the controller
    /// starts probing again.
    pub cooldown: Duration,

    /// Consecutive successes required to leave `Recovering`.
    pub recovery_successes: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            backoff_factor: 4.0,
            max_delay: Duration::from_secs(120),
            window: 10,
            negative_density: 3,
            cooldown: Duration::from_secs(60),
            recovery_successes: 5,
        }
    }
}

#[derive(Debug)]
struct PacingInner {
    state: PacingState,
    current_delay: Duration,
    recent: VecDeque<ThrottleSignal>,
    success_streak: u32,
    last_negative_at: Option<Instant>,
}

/// Thread-safe pacing controller shared by all workers of a cycle.
#[derive(Clone)]
pub struct PacingController {
    config: PacingConfig,
    inner: Arc<Mutex<PacingInner>>,
}

impl PacingController {
    pub fn new(config: PacingConfig) -> Self {
        let inner = PacingInner {
            state: PacingState::Nominal,
            current_delay: config.base_delay,
            recent: VecDeque::with_capacity(config.window),
            success_streak: 0,
            last_negative_at: None,
        };
        Self {
            config,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, PacingInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned pacing mutex");
            poisoned.into_inner()
        })
    }

    /// Returns the current state, handling the lazy Throttled → Recovering
    /// transition once the cooldown has elapsed.
    pub fn state(&self) -> PacingState {
        let mut inner = self.lock_inner();
        self.maybe_start_recovering(&mut inner);
        inner.state
    }

    /// Delay to insert before the next request.
    pub fn current_delay(&self) -> Duration {
        let mut inner = self.lock_inner();
        self.maybe_start_recovering(&mut inner);
        match inner.state {
            PacingState::Nominal => self.config.base_delay,
            // Recovering keeps the elevated delay until confirmed calm.
            PacingState::Throttled | PacingState::Recovering => inner.current_delay,
        }
    }

    /// Batch size to use, derived from the nominal one. Reduced (but
    /// never below one) while throttled or recovering.
    pub fn current_batch_size(&self, nominal: usize) -> usize {
        match self.state() {
            PacingState::Nominal => nominal.max(1),
            PacingState::Throttled | PacingState::Recovering => (nominal / 2).max(1),
        }
    }

    /// Feed one fetch outcome's signal into the state machine.
    pub fn observe(&self, signal: ThrottleSignal) {
        let mut inner = self.lock_inner();
        self.maybe_start_recovering(&mut inner);

        inner.recent.push_back(signal);
        while inner.recent.len() > self.config.window {
            inner.recent.pop_front();
        }

        match signal {
            ThrottleSignal::Success => self.on_success(&mut inner),
            ThrottleSignal::RateLimited { retry_after } => {
                inner.last_negative_at = Some(Instant::now());
                self.enter_throttled(&mut inner, true, retry_after);
            }
            ThrottleSignal::Negative => {
                inner.last_negative_at = Some(Instant::now());
                match inner.state {
                    PacingState::Nominal => {
                        let negatives = inner
                            .recent
                            .iter()
                            .filter(|s| **s == ThrottleSignal::Negative)
                            .count();
                        if negatives >= self.config.negative_density {
                            self.enter_throttled(&mut inner, false, None);
                        }
                    }
                    PacingState::Recovering => self.enter_throttled(&mut inner, false, None),
                    PacingState::Throttled => {}
                }
            }
        }
    }

    /// Reset to nominal pacing, e.g. at engine start.
    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        inner.state = PacingState::Nominal;
        inner.current_delay = self.config.base_delay;
        inner.recent.clear();
        inner.success_streak = 0;
        inner.last_negative_at = None;
    }

    fn on_success(&self, inner: &mut PacingInner) {
        if inner.state == PacingState::Recovering {
            inner.success_streak += 1;
            if inner.success_streak >= self.config.recovery_successes {
                tracing::info!(
                    successes = inner.success_streak,
                    "Pacing back to nominal after confirmed recovery"
                );
                inner.state = PacingState::Nominal;
                inner.current_delay = self.config.base_delay;
                inner.success_streak = 0;
                inner.recent.clear();
            }
        }
    }

    fn enter_throttled(
        &self,
        inner: &mut PacingInner,
        grow_delay: bool,
        retry_after: Option<Duration>,
    ) {
        if grow_delay || inner.state == PacingState::Nominal {
            let grown = inner
                .current_delay
                .mul_f64(f64::from(self.config.backoff_factor))
                .max(self.config.base_delay);
            inner.current_delay = grown.min(self.config.max_delay);
        }
        // A server-sent Retry-After floors the delay. It never shrinks
        // what backoff already accumulated, and the ceiling still holds.
        if let Some(hint) = retry_after {
            inner.current_delay = inner
                .current_delay
                .max(hint)
                .min(self.config.max_delay);
        }
        if inner.state != PacingState::Throttled {
            tracing::warn!(
                from = %inner.state,
                delay_ms = inner.current_delay.as_millis(),
                "Pacing throttled on rate-limit evidence"
            );
        }
        inner.state = PacingState::Throttled;
        inner.success_streak = 0;
    }

    fn maybe_start_recovering(&self, inner: &mut PacingInner) {
        if inner.state == PacingState::Throttled
            && let Some(last) = inner.last_negative_at
            && last.elapsed() >= self.config.cooldown
        {
            tracing::info!("Pacing probing recovery after quiet cooldown");
            inner.state = PacingState::Recovering;
            inner.success_streak = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_limited() -> ThrottleSignal {
        ThrottleSignal::RateLimited { retry_after: None }
    }

    fn quick_config() -> PacingConfig {
        PacingConfig {
            base_delay: Duration::from_millis(10),
            backoff_factor: 4.0,
            max_delay: Duration::from_millis(500),
            window: 10,
            negative_density: 3,
            cooldown: Duration::from_millis(1),
            recovery_successes: 5,
        }
    }

    #[test]
    fn test_starts_nominal() {
        let pacing = PacingController::new(PacingConfig::default());
        assert_eq!(pacing.state(), PacingState::Nominal);
        assert_eq!(pacing.current_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_rate_limited_throttles_immediately() {
        let pacing = PacingController::new(quick_config());
        pacing.observe(rate_limited());
        assert_eq!(pacing.state(), PacingState::Throttled);
        assert_eq!(pacing.current_delay(), Duration::from_millis(40));
    }

    #[test]
    fn test_retry_after_hint_floors_delay() {
        let pacing = PacingController::new(quick_config());
        pacing.observe(ThrottleSignal::RateLimited {
            retry_after: Some(Duration::from_millis(200)),
        });
        assert_eq!(pacing.state(), PacingState::Throttled);
        assert_eq!(pacing.current_delay(), Duration::from_millis(200));

        // A hint shorter than the accumulated backoff does not shrink it.
        pacing.observe(ThrottleSignal::RateLimited {
            retry_after: Some(Duration::from_millis(50)),
        });
        assert!(pacing.current_delay() >= Duration::from_millis(200));

        // And a hint past the ceiling is clamped to it.
        pacing.observe(ThrottleSignal::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        });
        assert_eq!(pacing.current_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_single_negative_does_not_throttle() {
        let pacing = PacingController::new(quick_config());
        pacing.observe(ThrottleSignal::Negative);
        assert_eq!(pacing.state(), PacingState::Nominal);
    }

    #[test]
    fn test_negative_density_throttles() {
        let pacing = PacingController::new(quick_config());
        pacing.observe(ThrottleSignal::Success);
        pacing.observe(ThrottleSignal::Negative);
        pacing.observe(ThrottleSignal::Success);
        pacing.observe(ThrottleSignal::Negative);
        assert_eq!(pacing.state(), PacingState::Nominal);
        pacing.observe(ThrottleSignal::Negative);
        assert_eq!(pacing.state(), PacingState::Throttled);
    }

    #[test]
    fn test_delay_bounded_by_max() {
        let pacing = PacingController::new(quick_config());
        for _ in 0..10 {
            pacing.observe(rate_limited());
        }
        assert!(pacing.current_delay() <= Duration::from_millis(500));
    }

    #[test]
    fn test_batch_size_reduced_while_throttled() {
        let pacing = PacingController::new(quick_config());
        assert_eq!(pacing.current_batch_size(10), 10);
        pacing.observe(rate_limited());
        assert_eq!(pacing.current_batch_size(10), 5);
        assert_eq!(pacing.current_batch_size(1), 1);
    }

    #[test]
    fn test_recovery_needs_full_success_run() {
        // Success×5, RateLimited, Success×(M−1) must end Recovering.
        let pacing = PacingController::new(quick_config());
        for _ in 0..5 {
            pacing.observe(ThrottleSignal::Success);
        }
        pacing.observe(rate_limited());
        std::thread::sleep(Duration::from_millis(5));

        for _ in 0..4 {
            pacing.observe(ThrottleSignal::Success);
        }
        assert_eq!(pacing.state(), PacingState::Recovering);

        pacing.observe(ThrottleSignal::Success);
        assert_eq!(pacing.state(), PacingState::Nominal);
        assert_eq!(pacing.current_delay(), Duration::from_millis(10));
    }

    #[test]
    fn test_rate_limited_during_recovery_rethrottles() {
        let pacing = PacingController::new(quick_config());
        pacing.observe(rate_limited());
        std::thread::sleep(Duration::from_millis(5));
        pacing.observe(ThrottleSignal::Success);
        assert_eq!(pacing.state(), PacingState::Recovering);

        pacing.observe(rate_limited());
        assert_eq!(pacing.state(), PacingState::Throttled);
    }

    #[test]
    fn test_negative_during_recovery_rethrottles() {
        let pacing = PacingController::new(quick_config());
        pacing.observe(rate_limited());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(pacing.state(), PacingState::Recovering);

        pacing.observe(ThrottleSignal::Negative);
        assert_eq!(pacing.state(), PacingState::Throttled);
    }

    #[test]
    fn test_reset_returns_to_nominal() {
        let pacing = PacingController::new(quick_config());
        pacing.observe(rate_limited());
        pacing.reset();
        assert_eq!(pacing.state(), PacingState::Nominal);
        assert_eq!(pacing.current_delay(), Duration::from_millis(10));
    }
}
