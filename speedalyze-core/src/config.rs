use std::time::Duration;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    #[must_use]
    pub const fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// A validated ramping-VU scenario. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    start_vus: u64,
    stages: Vec<Stage>,
    ramp_down: Duration,
    stop: Duration,
}

pub const DEFAULT_GRACEFUL_WINDOW: Duration = Duration::from_secs(30);

impl Scenario {
    /// Every stage must last longer than zero; the list must not be empty.
    pub fn new(start_vus: u64, stages: Vec<Stage>, ramp_down: Duration, stop: Duration) -> Result<Self> {
        if stages.is_empty() {
            return Err(Error::EmptyStages);
        }
        if let Some(index) = stages.iter().position(|s| s.duration.is_zero()) {
            return Err(Error::ZeroDurationStage { index });
        }

        Ok(Self {
            start_vus,
            stages,
            ramp_down,
            stop,
        })
    }

    /// Three 10 -> 50 VU waves over 9m20s, with 30s graceful windows.
    #[must_use]
    pub fn reference() -> Self {
        let ramp = |target| Stage::new(Duration::from_secs(20), target);
        let hold = |target| Stage::new(Duration::from_secs(70), target);
        Self {
            start_vus: 0,
            stages: vec![
                ramp(10),
                hold(10),
                ramp(50),
                hold(50),
                ramp(10),
                hold(10),
                ramp(50),
                hold(50),
                ramp(10),
                hold(10),
                ramp(50),
                hold(50),
                ramp(0),
            ],
            ramp_down: DEFAULT_GRACEFUL_WINDOW,
            stop: DEFAULT_GRACEFUL_WINDOW,
        }
    }

    pub fn start_vus(&self) -> u64 {
        self.start_vus
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// How long a retired VU may keep running its current iteration.
    pub fn ramp_down(&self) -> Duration {
        self.ramp_down
    }

    /// How long VUs may drain after the last stage ends.
    pub fn stop(&self) -> Duration {
        self.stop
    }

    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration))
    }

    /// Highest concurrency the scenario ever asks for.
    pub fn max_vus(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .max()
            .unwrap_or(0)
            .max(self.start_vus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_profile_shape() {
        let s = Scenario::reference();
        assert_eq!(s.stages().len(), 13);
        assert_eq!(s.total_duration(), Duration::from_secs(560));
        assert_eq!(s.max_vus(), 50);
        assert_eq!(s.stages().last().map(|st| st.target), Some(0));
        assert_eq!(s.ramp_down(), Duration::from_secs(30));
        assert_eq!(s.stop(), Duration::from_secs(30));
    }

    #[test]
    fn rejects_empty_and_zero_duration_stages() {
        assert!(matches!(
            Scenario::new(0, Vec::new(), Duration::ZERO, Duration::ZERO),
            Err(Error::EmptyStages)
        ));

        let stages = vec![
            Stage::new(Duration::from_secs(1), 5),
            Stage::new(Duration::ZERO, 10),
        ];
        assert!(matches!(
            Scenario::new(0, stages, Duration::ZERO, Duration::ZERO),
            Err(Error::ZeroDurationStage { index: 1 })
        ));
    }

    #[test]
    fn max_vus_includes_start() {
        let s = Scenario::new(
            7,
            vec![Stage::new(Duration::from_secs(1), 3)],
            Duration::ZERO,
            Duration::ZERO,
        )
        .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(s.max_vus(), 7);
    }
}
