use std::time::Duration;

use crate::config::{ScenarioExecutor, Stage};

#[derive(Debug, Clone)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Piecewise-linear VU target over cumulative stage boundaries.
#[derive(Debug, Clone)]
pub struct RampingSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl RampingSchedule {
    pub fn new(start: u64, stages: Vec<Stage>) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            stages,
            cumulative_ends,
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    /// Index of the stage containing `elapsed`, plus its `[start, end]` bounds
    /// and boundary targets. `elapsed` must be below the total duration.
    fn locate(&self, elapsed: Duration) -> Option<(usize, Duration, Duration, u64, u64)> {
        let idx = match self.cumulative_ends.binary_search(&elapsed) {
            Ok(i) | Err(i) => i,
        };
        let stage_end = *self.cumulative_ends.get(idx)?;
        let stage_start = match idx {
            0 => Duration::ZERO,
            i => self.cumulative_ends.get(i - 1).copied().unwrap_or(Duration::ZERO),
        };
        let start_target = match idx {
            0 => self.start,
            i => self.stages.get(i - 1).map_or(self.start, |s| s.target),
        };
        let end_target = self.stages.get(idx)?.target;
        Some((idx, stage_start, stage_end, start_target, end_target))
    }

    /// Target VUs at `elapsed`, rounded to the nearest integer.
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        if self.stages.is_empty() || elapsed.is_zero() {
            return self.start;
        }

        if elapsed >= self.total_duration() {
            return self.stages.last().map_or(self.start, |s| s.target);
        }

        let Some((_, stage_start, stage_end, start_target, end_target)) = self.locate(elapsed)
        else {
            return self.start;
        };

        let stage_duration = stage_end.saturating_sub(stage_start);
        if stage_duration.is_zero() {
            return end_target;
        }

        let start_i = start_target as i128;
        let delta = end_target as i128 - start_i;
        let num = elapsed.saturating_sub(stage_start).as_nanos() as i128;
        let den = (stage_duration.as_nanos() as i128).max(1);

        let cur = start_i + div_round(delta.saturating_mul(num), den);
        cur.clamp(0, u64::MAX as i128) as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        if self.stages.is_empty() {
            return None;
        }

        let total = self.total_duration();
        let clamped = elapsed.min(total);

        let (index, stage_start, stage_end, start_target, end_target) = if clamped >= total {
            let idx = self.stages.len() - 1;
            let start = match idx {
                0 => Duration::ZERO,
                i => self.cumulative_ends.get(i - 1).copied().unwrap_or(Duration::ZERO),
            };
            let start_target = match idx {
                0 => self.start,
                i => self.stages.get(i - 1).map_or(self.start, |s| s.target),
            };
            (idx, start, total, start_target, self.stages.get(idx)?.target)
        } else {
            self.locate(clamped)?
        };

        let stage_duration = stage_end.saturating_sub(stage_start);
        let stage_elapsed = clamped.saturating_sub(stage_start);

        Some(StageSnapshot {
            index,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: stage_duration.saturating_sub(stage_elapsed),
            start_target,
            end_target,
            current_target: self.target_at(clamped),
        })
    }

    /// How long a dormant VU with 1-based `vu_index` may sleep before the
    /// target could have reached it.
    pub fn next_recheck_in(&self, elapsed: Duration, vu_index: u64) -> Duration {
        let default_sleep = Duration::from_millis(50);

        if self.stages.is_empty() {
            return default_sleep;
        }
        if elapsed >= self.total_duration() {
            return Duration::ZERO;
        }
        if vu_index <= self.target_at(elapsed) {
            return Duration::ZERO;
        }

        let Some((_, stage_start, stage_end, start_target, end_target)) = self.locate(elapsed)
        else {
            return default_sleep;
        };

        if end_target <= start_target {
            return stage_end.saturating_sub(elapsed).min(default_sleep);
        }

        // Solve start + delta * t / dur >= vu_index - 0.5 (the rounding point).
        let start_2 = 2 * start_target as i128;
        let want_2 = 2 * vu_index as i128 - 1;
        let delta_2 = 2 * (end_target as i128 - start_target as i128);
        if want_2 > 2 * end_target as i128 {
            return stage_end.saturating_sub(elapsed).min(default_sleep);
        }

        let stage_ns = stage_end.saturating_sub(stage_start).as_nanos() as i128;
        let elapsed_ns = elapsed.saturating_sub(stage_start).as_nanos() as i128;
        let needed_ns = ((want_2 - start_2).max(0).saturating_mul(stage_ns) / delta_2).max(0);
        let wait_ns = needed_ns.saturating_sub(elapsed_ns).max(0);

        Duration::from_nanos(wait_ns.min(u64::MAX as i128) as u64).min(default_sleep)
    }
}

/// Rounds half away from zero.
fn div_round(num: i128, den: i128) -> i128 {
    if num >= 0 {
        (num + den / 2) / den
    } else {
        -((-num + den / 2) / den)
    }
}

/// Target-concurrency function for any executor, anchored at the scenario start.
#[derive(Debug, Clone)]
pub enum RampSchedule {
    Ramping(RampingSchedule),
    Constant { vus: u64, duration: Duration },
    PerVuIterations { vus: u64, max_duration: Duration },
}

impl RampSchedule {
    pub fn for_executor(executor: &ScenarioExecutor) -> Self {
        match executor {
            ScenarioExecutor::RampingVus { start_vus, stages } => {
                Self::Ramping(RampingSchedule::new(*start_vus, stages.clone()))
            }
            ScenarioExecutor::ConstantVus { vus, duration } => Self::Constant {
                vus: *vus,
                duration: *duration,
            },
            ScenarioExecutor::PerVuIterations {
                vus, max_duration, ..
            } => Self::PerVuIterations {
                vus: *vus,
                max_duration: *max_duration,
            },
        }
    }

    pub fn target_at(&self, elapsed: Duration) -> u64 {
        match self {
            Self::Ramping(s) => s.target_at(elapsed),
            Self::Constant { vus, duration } => {
                if elapsed < *duration {
                    *vus
                } else {
                    0
                }
            }
            Self::PerVuIterations { vus, max_duration } => {
                if elapsed < *max_duration {
                    *vus
                } else {
                    0
                }
            }
        }
    }

    /// Nominal length: the stage total, the fixed duration, or the safety cutoff.
    pub fn total_duration(&self) -> Duration {
        match self {
            Self::Ramping(s) => s.total_duration(),
            Self::Constant { duration, .. } => *duration,
            Self::PerVuIterations { max_duration, .. } => *max_duration,
        }
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        match self {
            Self::Ramping(s) => s.stage_snapshot_at(elapsed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn stage(duration: u64, target: u64) -> Stage {
        Stage {
            duration: secs(duration),
            target,
        }
    }

    #[test]
    fn interpolates_and_rounds_to_nearest() {
        let s = RampingSchedule::new(0, vec![stage(10, 100), stage(10, 100), stage(5, 0)]);
        assert_eq!(s.target_at(Duration::ZERO), 0);
        assert_eq!(s.target_at(secs(5)), 50);
        assert_eq!(s.target_at(secs(10)), 100);
        assert_eq!(s.target_at(secs(15)), 100);
        assert_eq!(s.target_at(Duration::from_millis(22_500)), 50);
        assert_eq!(s.target_at(secs(25)), 0);
        assert_eq!(s.target_at(secs(99)), 0);

        let s = RampingSchedule::new(0, vec![stage(4, 1)]);
        assert_eq!(s.target_at(Duration::from_millis(1_999)), 0);
        assert_eq!(s.target_at(secs(2)), 1);
    }

    #[test]
    fn start_value_applies_before_first_stage() {
        let s = RampingSchedule::new(7, vec![stage(10, 17)]);
        assert_eq!(s.target_at(Duration::ZERO), 7);
        assert_eq!(s.target_at(secs(5)), 12);
    }

    #[test]
    fn zero_duration_stage_jumps() {
        let s = RampingSchedule::new(0, vec![stage(0, 40), stage(10, 40)]);
        assert_eq!(s.target_at(Duration::from_millis(1)), 40);
        assert_eq!(s.total_duration(), secs(10));
    }

    #[test]
    fn is_done_after_last_stage() {
        let s = RampingSchedule::new(0, vec![stage(3, 10), stage(2, 0)]);
        assert!(!s.is_done(Duration::from_millis(4_999)));
        assert!(s.is_done(secs(5)));
    }

    #[test]
    fn stage_snapshot_tracks_position() {
        let s = RampingSchedule::new(0, vec![stage(10, 100), stage(10, 0)]);
        let Some(snap) = s.stage_snapshot_at(secs(15)) else {
            panic!("expected snapshot");
        };
        assert_eq!(snap.index, 1);
        assert_eq!(snap.count, 2);
        assert_eq!(snap.stage_elapsed, secs(5));
        assert_eq!(snap.stage_remaining, secs(5));
        assert_eq!((snap.start_target, snap.end_target), (100, 0));
        assert_eq!(snap.current_target, 50);

        let Some(end) = s.stage_snapshot_at(secs(60)) else {
            panic!("expected snapshot");
        };
        assert_eq!(end.index, 1);
        assert_eq!(end.stage_remaining, Duration::ZERO);
    }

    #[test]
    fn recheck_points_at_activation_time() {
        let s = RampingSchedule::new(0, vec![stage(10, 10)]);
        // VU 3 turns active at 2.5s (2.5 rounds to 3).
        let wait = s.next_recheck_in(Duration::from_millis(2_480), 3);
        assert_eq!(wait, Duration::from_millis(20));
        assert_eq!(s.next_recheck_in(secs(3), 3), Duration::ZERO);
        // Beyond this stage's end target: short bounded sleep.
        let s = RampingSchedule::new(0, vec![stage(10, 2), stage(10, 2)]);
        assert!(s.next_recheck_in(secs(1), 5) <= Duration::from_millis(50));
    }

    #[test]
    fn executor_schedules() {
        let c = RampSchedule::for_executor(&ScenarioExecutor::ConstantVus {
            vus: 10,
            duration: secs(5),
        });
        assert_eq!(c.target_at(Duration::ZERO), 10);
        assert_eq!(c.target_at(Duration::from_millis(4_999)), 10);
        assert_eq!(c.target_at(secs(5)), 0);

        let p = RampSchedule::for_executor(&ScenarioExecutor::PerVuIterations {
            vus: 5,
            iterations: 3,
            max_duration: secs(60),
        });
        assert_eq!(p.target_at(secs(1)), 5);
        assert_eq!(p.total_duration(), secs(60));
        assert!(p.stage_snapshot_at(secs(1)).is_none());
    }

    fn stages_strategy() -> impl Strategy<Value = (u64, Vec<(u64, u64)>)> {
        (
            0u64..500,
            proptest::collection::vec((0u64..20_000, 0u64..10_000), 1..8),
        )
    }

    proptest! {
        #[test]
        fn boundaries_hit_stage_targets_exactly((start, raw) in stages_strategy()) {
            let stages: Vec<Stage> = raw
                .iter()
                .map(|(ms, target)| Stage { duration: Duration::from_millis(*ms), target: *target })
                .collect();
            let s = RampingSchedule::new(start, stages.clone());

            prop_assert_eq!(s.target_at(Duration::ZERO), start);

            let ends: Vec<(Duration, u64)> = stages
                .iter()
                .scan(Duration::ZERO, |acc, st| {
                    *acc += st.duration;
                    Some((*acc, st.target))
                })
                .collect();

            for (end, _) in &ends {
                if end.is_zero() {
                    continue;
                }
                let observed = s.target_at(*end);
                if *end >= s.total_duration() {
                    prop_assert_eq!(Some(observed), stages.last().map(|s| s.target));
                } else {
                    // Zero-length stages share a boundary; any of their targets is exact.
                    let exact = ends.iter().any(|(e, t)| e == end && *t == observed);
                    prop_assert!(exact, "target {} at {:?} is not a stage target", observed, end);
                }
            }
        }

        #[test]
        fn target_stays_between_neighbouring_boundaries(
            (start, raw) in stages_strategy(),
            probe in 1u64..200_000,
        ) {
            let stages: Vec<Stage> = raw
                .iter()
                .map(|(ms, target)| Stage { duration: Duration::from_millis(*ms), target: *target })
                .collect();
            let s = RampingSchedule::new(start, stages);
            let t = Duration::from_millis(probe);
            let v = s.target_at(t);
            if let Some(snap) = s.stage_snapshot_at(t) {
                let lo = snap.start_target.min(snap.end_target);
                let hi = snap.start_target.max(snap.end_target);
                prop_assert!(v >= lo && v <= hi, "target {} outside [{}, {}]", v, lo, hi);
            }
        }
    }
}
