//! Crash-recovery session persistence.
//!
//! The orchestrator snapshots every job after each unit completes, so an
//! ungraceful exit leaves enough on disk to offer the pending/partial jobs
//! back for resumption or discard. Mid-unit work is never resumed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::job::request::RunRequest;
use crate::job::JobState;

/// Last known state of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub state: JobState,
    pub completed_units: usize,
    pub total_units: usize,
    pub request: RunRequest,
    pub updated_at: DateTime<Utc>,
}

/// JSON-backed session store with atomic writes.
pub struct SessionStore {
    path: PathBuf,
    jobs: Mutex<BTreeMap<String, JobSnapshot>>,
}

impl SessionStore {
    pub fn open(path: PathBuf) -> Self {
        let jobs = load_snapshots(&path);
        Self {
            path,
            jobs: Mutex::new(jobs),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist a job snapshot; called after every unit completion and on
    /// each state transition.
    pub fn record(&self, snapshot: JobSnapshot) -> Result<()> {
        let payload = {
            let mut jobs = self
                .jobs
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            jobs.insert(snapshot.job_id.clone(), snapshot);
            serde_json::to_string_pretty(&*jobs)?
        };
        self.write(&payload)
    }

    /// Non-terminal jobs from the last session, oldest first.
    pub fn recover(&self) -> Vec<JobSnapshot> {
        let jobs = self
            .jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut pending: Vec<JobSnapshot> = jobs
            .values()
            .filter(|snapshot| !snapshot.state.is_terminal())
            .cloned()
            .collect();
        pending.sort_by_key(|snapshot| snapshot.updated_at);
        pending
    }

    /// Drop a recovered job the user chose not to resume.
    pub fn discard(&self, job_id: &str) -> Result<()> {
        let payload = {
            let mut jobs = self
                .jobs
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            jobs.remove(job_id);
            serde_json::to_string_pretty(&*jobs)?
        };
        self.write(&payload)
    }

    fn write(&self, payload: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, payload)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn load_snapshots(path: &Path) -> BTreeMap<String, JobSnapshot> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return BTreeMap::new();
    };
    serde_json::from_str(&raw).unwrap_or_default()
}
