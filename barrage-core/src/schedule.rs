use std::time::Duration;

use crate::config::Stage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Piecewise-linear concurrency target over a list of stages, starting from zero.
#[derive(Debug, Clone)]
pub struct RampingSchedule {
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl RampingSchedule {
    pub fn new(stages: Vec<Stage>) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
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

    pub fn max_target(&self) -> u64 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Index of the stage whose interval `(start, end]` contains `elapsed`.
    ///
    /// Zero-duration stages are skipped over, so a boundary resolves to the stage that
    /// ends there rather than an instantaneous jump that follows it.
    fn stage_index(&self, elapsed: Duration) -> usize {
        match self
            .cumulative_ends
            .binary_search_by(|end| end.cmp(&elapsed))
        {
            Ok(i) => self.cumulative_ends[..=i].partition_point(|end| *end < elapsed),
            Err(i) => i,
        }
    }

    fn start_target(&self, idx: usize) -> u64 {
        if idx == 0 {
            0
        } else {
            self.stages[idx - 1].target
        }
    }

    fn stage_start(&self, idx: usize) -> Duration {
        if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        }
    }

    pub fn target_at(&self, elapsed: Duration) -> u64 {
        let Some(last) = self.stages.last() else {
            return 0;
        };

        if elapsed >= self.total_duration() {
            return last.target;
        }

        if elapsed.is_zero() {
            // Leading zero-duration stages jump immediately.
            let idx = self.cumulative_ends.partition_point(|end| end.is_zero());
            return if idx == 0 {
                0
            } else {
                self.stages[idx - 1].target
            };
        }

        let idx = self.stage_index(elapsed);
        let stage = &self.stages[idx];
        let stage_start = self.stage_start(idx);
        let stage_elapsed = elapsed.saturating_sub(stage_start);

        if stage.duration.is_zero() {
            return stage.target;
        }

        let start = self.start_target(idx) as f64;
        let end = stage.target as f64;
        let frac = stage_elapsed.as_secs_f64() / stage.duration.as_secs_f64();

        // Fractional interpolation, rounded to the nearest worker.
        let cur = start + (end - start) * frac;
        cur.round().clamp(0.0, u64::MAX as f64) as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        if self.stages.is_empty() {
            return None;
        }

        let total = self.total_duration();
        let clamped = elapsed.min(total);

        let idx = if clamped >= total {
            self.stages.len().saturating_sub(1)
        } else {
            self.stage_index(clamped)
        };

        let stage = &self.stages[idx];
        let stage_elapsed = clamped.saturating_sub(self.stage_start(idx));
        let stage_remaining = stage.duration.saturating_sub(stage_elapsed);

        Some(StageSnapshot {
            index: idx,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining,
            start_target: self.start_target(idx),
            end_target: stage.target,
            current_target: self.target_at(clamped),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn basic_load_profile() -> RampingSchedule {
        RampingSchedule::new(vec![
            Stage::new(secs(30), 10),
            Stage::new(secs(60), 10),
            Stage::new(secs(30), 0),
        ])
    }

    #[test]
    fn interpolates_within_stages() {
        let s = basic_load_profile();
        assert_eq!(s.target_at(Duration::ZERO), 0);
        assert_eq!(s.target_at(secs(15)), 5);
        assert_eq!(s.target_at(secs(30)), 10);
        assert_eq!(s.target_at(secs(60)), 10);
        assert_eq!(s.target_at(secs(105)), 5);
        assert_eq!(s.target_at(secs(120)), 0);
        assert_eq!(s.total_duration(), secs(120));
    }

    #[test]
    fn rounds_to_nearest_instead_of_flooring() {
        let s = RampingSchedule::new(vec![Stage::new(secs(10), 3)]);
        // 3 * 0.5 = 1.5 rounds up.
        assert_eq!(s.target_at(secs(5)), 2);
        // 3 * 0.4 = 1.2 rounds down.
        assert_eq!(s.target_at(secs(4)), 1);
    }

    #[test]
    fn past_the_end_holds_terminal_target() {
        let s = RampingSchedule::new(vec![Stage::new(secs(10), 4)]);
        assert_eq!(s.target_at(secs(60)), 4);
        assert!(s.is_done(secs(10)));
        assert!(!s.is_done(secs(9)));
    }

    #[test]
    fn zero_duration_stage_jumps() {
        let s = RampingSchedule::new(vec![
            Stage::new(Duration::ZERO, 8),
            Stage::new(secs(10), 8),
            Stage::new(Duration::ZERO, 2),
            Stage::new(secs(10), 2),
        ]);
        assert_eq!(s.target_at(Duration::ZERO), 8);
        assert_eq!(s.target_at(secs(5)), 8);
        assert_eq!(s.target_at(secs(10)), 8);
        assert_eq!(s.target_at(Duration::from_millis(10_001)), 2);
    }

    #[test]
    fn empty_schedule_is_immediately_done() {
        let s = RampingSchedule::new(Vec::new());
        assert_eq!(s.total_duration(), Duration::ZERO);
        assert!(s.is_done(Duration::ZERO));
        assert_eq!(s.target_at(secs(1)), 0);
        assert!(s.stage_snapshot_at(secs(1)).is_none());
    }

    #[test]
    fn stage_snapshot_reports_position() {
        let s = basic_load_profile();
        let snap = s
            .stage_snapshot_at(secs(45))
            .unwrap_or_else(|| panic!("expected snapshot"));
        assert_eq!(snap.index, 1);
        assert_eq!(snap.count, 3);
        assert_eq!(snap.stage_elapsed, secs(15));
        assert_eq!(snap.stage_remaining, secs(45));
        assert_eq!(snap.current_target, 10);

        let end = s
            .stage_snapshot_at(secs(500))
            .unwrap_or_else(|| panic!("expected snapshot"));
        assert_eq!(end.index, 2);
        assert_eq!(end.current_target, 0);
        assert_eq!(end.stage_remaining, Duration::ZERO);
    }
}
