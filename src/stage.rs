//! The three admission stages and the cooldown transition table.
//!
//! The original expresses stages as an interface with three implementations
//! (`okStage`, `slowStage`, `deadStage`). A closed, three-member set with a
//! small transition table is a tagged enum's whole reason for existing, so
//! `contains` collapses to a table lookup and `next_cooldown` to one `match`.

use std::time::Duration;

use crate::interval::Interval;

const OK_THRESHOLD: f64 = 0.99;
const DEAD_THRESHOLD: f64 = 0.10;

const OK_COOLDOWN: Duration = Duration::ZERO;
const SLOW_COOLDOWN: Duration = Duration::from_millis(100);
const DEAD_COOLDOWN: Duration = Duration::from_secs(10);
const SLOW_FROM_DEAD_COOLDOWN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ok,
    Slow,
    Dead,
}

impl Stage {
    fn interval(self) -> Interval {
        match self {
            Stage::Dead => Interval::new(0.0, true, DEAD_THRESHOLD, true),
            Stage::Slow => Interval::new(DEAD_THRESHOLD, false, OK_THRESHOLD, false),
            Stage::Ok => Interval::new(OK_THRESHOLD, true, 1.0, true),
        }
    }

    pub fn default_cooldown(self) -> Duration {
        match self {
            Stage::Ok => OK_COOLDOWN,
            Stage::Slow => SLOW_COOLDOWN,
            Stage::Dead => DEAD_COOLDOWN,
        }
    }

    /// The unique stage whose interval contains `score`. `score` must be
    /// finite and lie in `[0, 1]` (`record_latency` guarantees this).
    pub fn for_score(score: f64) -> Stage {
        for stage in [Stage::Dead, Stage::Slow, Stage::Ok] {
            if stage.interval().contains(score) {
                return stage;
            }
        }
        unreachable!("Dead/Slow/Ok partition [0,1]; score {score} fell outside it")
    }

    /// The cooldown to adopt when transitioning into `self` (which may equal
    /// `old_stage`, i.e. "staying put").
    pub fn next_cooldown(
        self,
        old_stage: Stage,
        old_cooldown: Duration,
        new_score: f64,
        new_score_last_10: f64,
    ) -> Duration {
        match self {
            Stage::Ok => OK_COOLDOWN,
            Stage::Dead => DEAD_COOLDOWN,
            Stage::Slow => match old_stage {
                Stage::Ok => SLOW_COOLDOWN,
                Stage::Dead => SLOW_FROM_DEAD_COOLDOWN,
                Stage::Slow => {
                    self.slow_stage_cooldown(old_cooldown, new_score, new_score_last_10)
                }
            },
        }
    }

    fn slow_stage_cooldown(
        self,
        old_cooldown: Duration,
        new_score: f64,
        new_score_last_10: f64,
    ) -> Duration {
        if old_cooldown.is_zero() {
            return SLOW_COOLDOWN;
        }

        if new_score_last_10 > 2.0 * new_score {
            return old_cooldown / 2;
        }

        if new_score_last_10 < 2.0 * new_score {
            return old_cooldown.saturating_mul(2);
        }

        // Linear interpolation across the Slow band: 100ms just below Ok,
        // up to 1s just above Dead.
        let factor = (1.0 - new_score) / (OK_THRESHOLD - DEAD_THRESHOLD);
        SLOW_COOLDOWN + Duration::from_secs_f64(factor)
    }
}
