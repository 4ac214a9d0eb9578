//! Publish run accounting

use serde::{Deserialize, Serialize};

use super::UnitError;
use crate::refs::Ref;

/// Result of one ref × package unit
#[derive(Debug)]
pub enum UnitOutcome {
    /// Already published at this target; nothing was run
    Skipped,
    /// Built (and signed/uploaded where configured)
    Published { out_paths: Vec<String> },
    /// Failed; not recorded, retried next run
    Failed(UnitError),
}

/// A failed unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub ref_name: String,
    pub target: String,
    pub package: String,
    pub error: String,
}

/// Counters for a publish run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishReport {
    /// Refs handed to the run
    pub refs: usize,
    /// Units attempted (including skips)
    pub units: usize,
    /// Units skipped because their target was already published
    pub skipped: usize,
    /// Units built and published
    pub published: usize,
    /// Units that failed
    pub failures: Vec<UnitFailure>,
    /// Run stopped early on operator interrupt
    pub interrupted: bool,
}

impl PublishReport {
    /// Empty report for a run over `refs` refs.
    pub fn new(refs: usize) -> Self {
        Self {
            refs,
            ..Self::default()
        }
    }

    /// Account for one unit.
    pub fn record(&mut self, r: &Ref, package: &str, outcome: UnitOutcome) {
        self.units += 1;
        match outcome {
            UnitOutcome::Skipped => self.skipped += 1,
            UnitOutcome::Published { .. } => self.published += 1,
            UnitOutcome::Failed(e) => self.failures.push(UnitFailure {
                ref_name: r.name.clone(),
                target: r.target.clone(),
                package: package.to_string(),
                error: e.to_string(),
            }),
        }
    }

    /// Number of failed units.
    pub fn error_count(&self) -> usize {
        self.failures.len()
    }

    /// True when nothing failed and the run was not interrupted.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.interrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::ToolchainError;

    #[test]
    fn test_record_counts() {
        let r = Ref::new("refs/heads/main", "abc");
        let mut report = PublishReport::new(1);

        report.record(&r, "a", UnitOutcome::Skipped);
        report.record(&r, "b", UnitOutcome::Published { out_paths: vec![] });
        report.record(&r, "c", UnitOutcome::Failed(UnitError::Build(ToolchainError::NoOutputs)));

        assert_eq!(report.units, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.published, 1);
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.failures[0].package, "c");
        assert!(report.failures[0].error.contains("no output paths"));
        assert!(!report.is_clean());
    }
}
