//! Structured run reports.
//!
//! Every job produces one, whatever its outcome. Reports are exportable as
//! JSON independent of any interface layer.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Result, UserReport};
use crate::job::request::ComputeMode;
use crate::job::JobState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WarningKind {
    /// Metadata fields the output could not carry; critical, never blocking
    MetadataLoss,
    /// A unit ran a fallback instead of the requested model
    Substitution,
    /// License caveats on the model that ran
    License,
    /// Out-of-memory retry happened
    Resource,
    Other,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunWarning {
    pub kind: WarningKind,
    pub message: String,
    pub critical: bool,
}

impl RunWarning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            critical: false,
        }
    }

    pub fn critical(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            critical: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnitStatus {
    Completed,
    Failed,
    /// Never started: the job ended (cancel or fail-fast) before this unit
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub label: String,
    pub status: UnitStatus,
    pub outputs: Vec<PathBuf>,
    pub error: Option<UserReport>,
    pub duration_ms: u64,
    pub warnings: Vec<RunWarning>,
}

/// The per-job report artifact.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub job_id: String,
    pub state: JobState,
    pub model: String,
    pub compute: ComputeMode,
    pub scale: Option<u32>,
    pub tiling: Option<String>,
    pub precision: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub units: Vec<UnitReport>,
    pub warnings: Vec<RunWarning>,
    pub error: Option<UserReport>,
}

impl RunReport {
    pub fn completed_units(&self) -> usize {
        self.units
            .iter()
            .filter(|unit| unit.status == UnitStatus::Completed)
            .count()
    }

    pub fn failed_units(&self) -> Vec<&UnitReport> {
        self.units
            .iter()
            .filter(|unit| unit.status == UnitStatus::Failed)
            .collect()
    }

    pub fn has_partial_failures(&self) -> bool {
        self.state == JobState::Succeeded && !self.failed_units().is_empty()
    }

    /// All warnings, unit-level included.
    pub fn all_warnings(&self) -> Vec<&RunWarning> {
        self.warnings
            .iter()
            .chain(self.units.iter().flat_map(|unit| unit.warnings.iter()))
            .collect()
    }

    /// Write the report as pretty JSON; atomic replace.
    pub fn export(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, payload)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Human-readable end-of-run summary enumerating failures and fixes.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Job {} {}: {}/{} units completed in {} ms",
            self.job_id,
            self.state,
            self.completed_units(),
            self.units.len(),
            self.duration_ms
        )];
        for unit in self.failed_units() {
            let detail = unit
                .error
                .as_ref()
                .map(|error| {
                    let fixes = error.suggested_fixes.join(" / ");
                    if fixes.is_empty() {
                        error.summary.clone()
                    } else {
                        format!("{} Suggested: {fixes}", error.summary)
                    }
                })
                .unwrap_or_else(|| "unknown failure".into());
            lines.push(format!("  failed: {} — {detail}", unit.label));
        }
        for warning in self.all_warnings() {
            let mark = if warning.critical { "CRITICAL" } else { "warning" };
            lines.push(format!("  {mark}: {}", warning.message));
        }
        lines.join("\n")
    }
}
