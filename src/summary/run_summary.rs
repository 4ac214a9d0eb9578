//! Run summary (summary JSON written at the end of a run)

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::exit::ExitCode;
use crate::gc::GcReport;
use crate::publish::PublishReport;

/// Which subcommand produced the summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Publish,
    Gc,
}

/// Run summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identifier (ULID)
    pub run_id: String,

    /// Producing subcommand
    pub kind: RunKind,

    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,

    /// Named counters; keys depend on `kind`
    pub counters: BTreeMap<String, u64>,

    /// One line per counted error
    pub errors: Vec<String>,

    /// Process exit code
    pub exit_code: i32,
}

impl RunSummary {
    /// Summarize a publish run.
    pub fn from_publish(run_id: String, started_at: DateTime<Utc>, report: &PublishReport) -> Self {
        let counters = BTreeMap::from([
            ("refs".to_string(), report.refs as u64),
            ("units".to_string(), report.units as u64),
            ("skipped".to_string(), report.skipped as u64),
            ("published".to_string(), report.published as u64),
            ("failed".to_string(), report.failures.len() as u64),
        ]);
        let errors = report
            .failures
            .iter()
            .map(|f| format!("{} ({}) {}: {}", f.ref_name, f.target, f.package, f.error))
            .collect();

        Self {
            run_id,
            kind: RunKind::Publish,
            started_at,
            finished_at: Utc::now(),
            counters,
            errors,
            exit_code: ExitCode::for_run(report.error_count(), report.interrupted).as_i32(),
        }
    }

    /// Summarize a gc run.
    pub fn from_gc(run_id: String, started_at: DateTime<Utc>, report: &GcReport) -> Self {
        let counters = BTreeMap::from([
            ("total_seen".to_string(), report.total_seen as u64),
            ("dropped".to_string(), report.dropped as u64),
            ("dropped_expired".to_string(), report.dropped_expired as u64),
            ("dropped_untrusted".to_string(), report.dropped_untrusted as u64),
            ("cascaded".to_string(), report.cascaded as u64),
        ]);
        let errors = report
            .failures
            .iter()
            .map(|f| format!("{}: {}", f.key, f.error))
            .collect();

        Self {
            run_id,
            kind: RunKind::Gc,
            started_at,
            finished_at: Utc::now(),
            counters,
            errors,
            exit_code: ExitCode::for_run(report.error_count(), report.interrupted).as_i32(),
        }
    }

    /// Summarize a run that failed before any unit was attempted.
    pub fn from_error(run_id: String, kind: RunKind, started_at: DateTime<Utc>, error: impl ToString) -> Self {
        Self {
            run_id,
            kind,
            started_at,
            finished_at: Utc::now(),
            counters: BTreeMap::new(),
            errors: vec![error.to_string()],
            exit_code: ExitCode::Errors.as_i32(),
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write to file, replacing any previous summary atomically.
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::GcFailure;
    use crate::publish::UnitFailure;

    #[test]
    fn test_publish_summary_counts_failures() {
        let mut report = PublishReport::new(2);
        report.units = 3;
        report.published = 2;
        report.failures.push(UnitFailure {
            ref_name: "refs/heads/main".to_string(),
            target: "abc".to_string(),
            package: "hello".to_string(),
            error: "build failed".to_string(),
        });

        let summary = RunSummary::from_publish("01J".to_string(), Utc::now(), &report);
        assert_eq!(summary.kind, RunKind::Publish);
        assert_eq!(summary.counters["published"], 2);
        assert_eq!(summary.counters["failed"], 1);
        assert_eq!(summary.exit_code, 1);
        assert!(summary.errors[0].contains("refs/heads/main"));
    }

    #[test]
    fn test_gc_summary_interrupted() {
        let report = GcReport {
            total_seen: 10,
            interrupted: true,
            failures: vec![GcFailure {
                key: "a.narinfo".to_string(),
                error: "denied".to_string(),
            }],
            ..GcReport::default()
        };

        let summary = RunSummary::from_gc("01J".to_string(), Utc::now(), &report);
        assert_eq!(summary.exit_code, 130);
        assert_eq!(summary.counters["total_seen"], 10);
        assert_eq!(summary.errors, vec!["a.narinfo: denied".to_string()]);
    }

    #[test]
    fn test_setup_failure_summary() {
        let summary = RunSummary::from_error(
            "01J".to_string(),
            RunKind::Publish,
            Utc::now(),
            "could not clone https://example.com/repo.git",
        );
        assert_eq!(summary.exit_code, 1);
        assert!(summary.counters.is_empty());
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("could not clone"));
    }

    #[test]
    fn test_write_to_file_roundtrip() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("out/summary.json");

        let summary = RunSummary::from_gc("01J".to_string(), Utc::now(), &GcReport::default());
        summary.write_to_file(&path).unwrap();

        let loaded = RunSummary::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.run_id, "01J");
        assert_eq!(loaded.exit_code, 0);
        assert_eq!(loaded.kind, RunKind::Gc);
    }
}
