//! Wall-clock timing of pipeline stages.

use std::time::{Duration, Instant};

use litequant_core::PipelineStage;
use tracing::{debug, span::EnteredSpan};

/// Times one stage and keeps its span entered until finished.
pub struct StageTimer {
    stage: PipelineStage,
    start: Instant,
    _span: EnteredSpan,
}

impl StageTimer {
    /// Enter the span for `stage` and start the clock.
    pub fn start(stage: PipelineStage) -> Self {
        Self {
            stage,
            start: Instant::now(),
            _span: crate::stage_span!(stage).entered(),
        }
    }

    /// Stage being timed.
    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// Stop the clock and leave the span.
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        debug!(elapsed_ms = elapsed.as_millis() as u64, "stage '{}' finished", self.stage.action());
        elapsed
    }
}

/// Durations of completed stages in execution order.
#[derive(Debug, Clone, Default)]
pub struct StageTimings {
    entries: Vec<(PipelineStage, Duration)>,
}

impl StageTimings {
    /// Create empty timings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished stage.
    pub fn record(&mut self, stage: PipelineStage, elapsed: Duration) {
        self.entries.push((stage, elapsed));
    }

    /// Finish a timer and record it.
    pub fn finish(&mut self, timer: StageTimer) -> Duration {
        let stage = timer.stage();
        let elapsed = timer.finish();
        self.record(stage, elapsed);
        elapsed
    }

    /// Duration of a stage, if recorded.
    pub fn get(&self, stage: PipelineStage) -> Option<Duration> {
        self.entries.iter().find(|(s, _)| *s == stage).map(|(_, d)| *d)
    }

    /// Sum of all recorded stages.
    pub fn total(&self) -> Duration {
        self.entries.iter().map(|(_, d)| *d).sum()
    }

    /// Iterate recorded stages.
    pub fn iter(&self) -> impl Iterator<Item = &(PipelineStage, Duration)> {
        self.entries.iter()
    }

    /// Number of recorded stages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
