use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::utils::serde_duration;

/// How the active VU count moves toward a stage's target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RampPolicy {
    /// Move smoothly from the previous target to this target over the stage.
    #[default]
    Linear,

    /// Jump to the target as soon as the stage starts.
    Step,
}

/// A time-bounded segment of the run with a target VU count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(with = "serde_duration")]
    pub duration: Duration,
    pub target: usize,
    #[serde(default)]
    pub ramp: RampPolicy,
}

impl Stage {
    pub fn linear(duration: Duration, target: usize) -> Self {
        Self {
            duration,
            target,
            ramp: RampPolicy::Linear,
        }
    }

    pub fn step(duration: Duration, target: usize) -> Self {
        Self {
            duration,
            target,
            ramp: RampPolicy::Step,
        }
    }
}

/// Position of the run inside the stage list at some instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageCursor {
    /// Index of the current stage
    pub index: usize,

    /// Time elapsed since the current stage started
    pub elapsed_in_stage: Duration,
}

/// Ordered, immutable list of stages for a run.
///
/// The VU count before the first stage is zero, so a leading linear stage ramps
/// up from nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct StagePlan {
    stages: Vec<Stage>,
}

impl StagePlan {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Sum of all stage durations.
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Highest target across all stages.
    pub fn peak_target(&self) -> usize {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Target of the stage preceding `index` (zero for the first stage).
    pub fn previous_target(&self, index: usize) -> usize {
        if index == 0 {
            0
        } else {
            self.stages.get(index - 1).map_or(0, |s| s.target)
        }
    }

    /// Offset from the start of the run at which stage `index` ends.
    pub fn stage_end(&self, index: usize) -> Duration {
        self.stages.iter().take(index + 1).map(|s| s.duration).sum()
    }

    /// Locates the stage running at `elapsed`. Returns None once the plan is over.
    ///
    /// Stage boundaries belong to the later stage, so zero-duration stages are
    /// never "current" and are only applied at their boundary.
    pub fn cursor_at(&self, elapsed: Duration) -> Option<StageCursor> {
        let mut stage_start = Duration::ZERO;

        for (index, stage) in self.stages.iter().enumerate() {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                return Some(StageCursor {
                    index,
                    elapsed_in_stage: elapsed - stage_start,
                });
            }
            stage_start = stage_end;
        }

        None
    }

    /// Calculates how many VUs should be active at `elapsed`.
    ///
    /// After the last stage this is the last stage's target.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        match self.cursor_at(elapsed) {
            Some(cursor) => self.target_within(cursor),
            None => self.stages.last().map_or(0, |s| s.target),
        }
    }

    fn target_within(&self, cursor: StageCursor) -> usize {
        let stage = &self.stages[cursor.index];
        match stage.ramp {
            RampPolicy::Step => stage.target,
            RampPolicy::Linear => Self::linear_interpolate(
                self.previous_target(cursor.index) as f64,
                stage.target as f64,
                cursor.elapsed_in_stage.as_secs_f64(),
                stage.duration.as_secs_f64(),
            )
            .round() as usize,
        }
    }

    fn linear_interpolate(from: f64, to: f64, elapsed: f64, duration: f64) -> f64 {
        if duration <= 0.0 {
            return to;
        }
        from + (to - from) * (elapsed / duration)
    }
}
