//! Per-backend admission control: composes a [`LatencyWindow`] with the
//! [`Stage`] transition table to decide when a backend may be selected again.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::latency_window::LatencyWindow;
use crate::stage::Stage;

struct Inner {
    window: LatencyWindow,
    stage: Stage,
    cooldown: Duration,
    last_admitted: Instant,
}

/// Guards a single backend's recent latency history and the cooldown it
/// currently owes. Cheap to poll (`admit`), mutated once per completed
/// request (`record_latency`).
pub struct RateGate {
    inner: Mutex<Inner>,
}

impl RateGate {
    pub fn new() -> Self {
        Self::with_slow_threshold(Duration::from_millis(500))
    }

    pub fn with_slow_threshold(slow_threshold: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                window: LatencyWindow::with_threshold(slow_threshold),
                stage: Stage::Ok,
                cooldown: Duration::ZERO,
                last_admitted: Instant::now(),
            }),
        }
    }

    /// Records a completed request's duration and recomputes stage/cooldown.
    pub fn record_latency(&self, d: Duration) {
        let mut inner = self.inner.lock().expect("rate gate mutex poisoned");

        inner.window.record(d);
        let score = inner.window.score();
        let score_last_10 = inner.window.score_last_n(10);

        let old_stage = inner.stage;
        let new_stage = Stage::for_score(score);
        let new_cooldown =
            new_stage.next_cooldown(old_stage, inner.cooldown, score, score_last_10);

        inner.stage = new_stage;
        inner.cooldown = new_cooldown;
        inner.last_admitted = Instant::now();
    }

    /// Non-blocking; does not mutate state.
    pub fn admit(&self) -> bool {
        let inner = self.inner.lock().expect("rate gate mutex poisoned");
        Instant::now() >= inner.last_admitted + inner.cooldown
    }

    #[cfg(test)]
    pub fn stage(&self) -> Stage {
        self.inner.lock().expect("rate gate mutex poisoned").stage
    }

    #[cfg(test)]
    pub fn cooldown(&self) -> Duration {
        self.inner.lock().expect("rate gate mutex poisoned").cooldown
    }
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new()
    }
}
