use std::time::Duration;

use crate::config::Stage;

/// Direction of the concurrency curve at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    RampingUp,
    Holding,
    RampingDown,
    Finished,
}

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

#[derive(Debug, Clone, Copy)]
struct StagePos {
    idx: usize,
    stage_start: Duration,
    stage_end: Duration,
    start_target: u64,
    end_target: u64,
}

/// Piecewise-linear concurrency target over time.
///
/// Stage `i` runs over `[end(i-1), end(i))` and ramps linearly from the
/// previous stage's target (or `start`) to its own. A zero-length stage is an
/// instantaneous jump. Past the last stage the target is zero.
#[derive(Debug, Clone)]
pub struct StageSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl StageSchedule {
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

    fn target_before(&self, idx: usize) -> u64 {
        match idx.checked_sub(1) {
            Some(prev) => self.stages[prev].target,
            None => self.start,
        }
    }

    /// Stage whose half-open window contains `elapsed`. `None` at or past the end.
    fn locate(&self, elapsed: Duration) -> Option<StagePos> {
        let idx = self.cumulative_ends.partition_point(|end| *end <= elapsed);
        if idx >= self.stages.len() {
            return None;
        }
        let stage_start = match idx.checked_sub(1) {
            Some(prev) => self.cumulative_ends[prev],
            None => Duration::ZERO,
        };
        Some(StagePos {
            idx,
            stage_start,
            stage_end: self.cumulative_ends[idx],
            start_target: self.target_before(idx),
            end_target: self.stages[idx].target,
        })
    }

    pub fn target_at(&self, elapsed: Duration) -> u64 {
        if elapsed.is_zero() {
            // Leading zero-length stages have already jumped at t=0.
            return self
                .stages
                .iter()
                .take_while(|s| s.duration.is_zero())
                .last()
                .map_or(self.start, |s| s.target);
        }

        let total = self.total_duration();
        if elapsed > total {
            return 0;
        }
        if elapsed == total {
            return self.stages.last().map(|s| s.target).unwrap_or(self.start);
        }

        let Some(pos) = self.locate(elapsed) else {
            return 0;
        };

        let stage_duration = pos.stage_end.saturating_sub(pos.stage_start);
        let stage_elapsed = elapsed.saturating_sub(pos.stage_start);

        // Linear interpolation across the stage.
        let start_i = pos.start_target as i128;
        let end_i = pos.end_target as i128;
        let delta = end_i - start_i;

        let num = stage_elapsed.as_nanos() as i128;
        let den = stage_duration.as_nanos() as i128;

        let cur = start_i + (delta.saturating_mul(num) / den.max(1));
        cur.clamp(0, u64::MAX as i128) as u64
    }

    pub fn phase_at(&self, elapsed: Duration) -> Phase {
        match self.locate(elapsed) {
            None => Phase::Finished,
            Some(pos) if pos.end_target > pos.start_target => Phase::RampingUp,
            Some(pos) if pos.end_target < pos.start_target => Phase::RampingDown,
            Some(_) => Phase::Holding,
        }
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        let last = self.stages.len().checked_sub(1)?;

        let total = self.total_duration();
        let clamped = elapsed.min(total);

        let pos = self.locate(clamped).unwrap_or(StagePos {
            idx: last,
            stage_start: match last.checked_sub(1) {
                Some(prev) => self.cumulative_ends[prev],
                None => Duration::ZERO,
            },
            stage_end: total,
            start_target: self.target_before(last),
            end_target: self.stages[last].target,
        });

        let stage_duration = pos.stage_end.saturating_sub(pos.stage_start);
        let stage_elapsed = clamped.saturating_sub(pos.stage_start);

        Some(StageSnapshot {
            index: pos.idx,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: stage_duration.saturating_sub(stage_elapsed),
            start_target: pos.start_target,
            end_target: pos.end_target,
            current_target: self.target_at(clamped),
        })
    }
}
