//! Pipeline stage machine.
//!
//! `NotLoaded -> Loaded -> Converted -> Persisted -> SelfTested -> Verified -> Reported`

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// State of a conversion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Nothing loaded yet
    NotLoaded,
    /// Source model loaded
    Loaded,
    /// Quantized artifact built in memory
    Converted,
    /// Artifact written to disk
    Persisted,
    /// Artifact reloaded and executed once
    SelfTested,
    /// Parity check finished
    Verified,
    /// Report emitted
    Reported,
}

impl PipelineStage {
    /// All stages in order.
    pub const ALL: [PipelineStage; 7] = [
        PipelineStage::NotLoaded,
        PipelineStage::Loaded,
        PipelineStage::Converted,
        PipelineStage::Persisted,
        PipelineStage::SelfTested,
        PipelineStage::Verified,
        PipelineStage::Reported,
    ];

    /// Stage that follows this one, `None` once reported.
    pub fn next(self) -> Option<Self> {
        let idx = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    /// Short verb for the transition into this stage.
    pub fn action(self) -> &'static str {
        match self {
            PipelineStage::NotLoaded => "start",
            PipelineStage::Loaded => "load",
            PipelineStage::Converted => "convert",
            PipelineStage::Persisted => "persist",
            PipelineStage::SelfTested => "self_test",
            PipelineStage::Verified => "verify",
            PipelineStage::Reported => "report",
        }
    }

    /// Whether the pipeline has finished.
    pub fn is_terminal(self) -> bool {
        self == PipelineStage::Reported
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::NotLoaded => "not_loaded",
            PipelineStage::Loaded => "loaded",
            PipelineStage::Converted => "converted",
            PipelineStage::Persisted => "persisted",
            PipelineStage::SelfTested => "self_tested",
            PipelineStage::Verified => "verified",
            PipelineStage::Reported => "reported",
        };
        write!(f, "{name}")
    }
}

/// One-way tracker for the current stage.
#[derive(Debug, Clone)]
pub struct StageTracker {
    current: PipelineStage,
}

impl StageTracker {
    /// Start at `NotLoaded`.
    pub fn new() -> Self {
        Self {
            current: PipelineStage::NotLoaded,
        }
    }

    /// Current stage.
    pub fn current(&self) -> PipelineStage {
        self.current
    }

    /// Stage the tracker will move to next.
    pub fn pending(&self) -> Option<PipelineStage> {
        self.current.next()
    }

    /// Move to `to`, which must be the immediate successor.
    pub fn advance(&mut self, to: PipelineStage) -> Result<()> {
        match self.current.next() {
            Some(next) if next == to => {
                self.current = to;
                Ok(())
            }
            _ => Err(Error::internal(format!(
                "illegal stage transition {} -> {}",
                self.current, to
            ))),
        }
    }
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert_eq!(PipelineStage::NotLoaded.next(), Some(PipelineStage::Loaded));
        assert_eq!(PipelineStage::Verified.next(), Some(PipelineStage::Reported));
        assert_eq!(PipelineStage::Reported.next(), None);
        assert!(PipelineStage::Reported.is_terminal());
        assert!(PipelineStage::Loaded < PipelineStage::Converted);
    }

    #[test]
    fn test_tracker_walks_forward() {
        let mut tracker = StageTracker::new();
        for stage in &PipelineStage::ALL[1..] {
            tracker.advance(*stage).unwrap();
        }
        assert_eq!(tracker.current(), PipelineStage::Reported);
        assert!(tracker.pending().is_none());
    }

    #[test]
    fn test_tracker_rejects_skips_and_rewinds() {
        let mut tracker = StageTracker::new();
        assert!(tracker.advance(PipelineStage::Converted).is_err());
        tracker.advance(PipelineStage::Loaded).unwrap();
        assert!(tracker.advance(PipelineStage::Loaded).is_err());
        let err = tracker.advance(PipelineStage::NotLoaded).unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
        assert_eq!(tracker.current(), PipelineStage::Loaded);
    }
}
