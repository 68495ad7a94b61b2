//! License acceptance records.
//!
//! Copyleft-optional models are install-gated on an explicit acceptance
//! event. Acceptances are persisted so the gate survives restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptanceRecord {
    pub model: String,
    pub accepted_at: DateTime<Utc>,
}

/// JSON-backed ledger of per-model license acceptances.
pub struct LicenseLedger {
    path: PathBuf,
    records: RwLock<HashMap<String, AcceptanceRecord>>,
}

impl LicenseLedger {
    /// Open the ledger; a missing or corrupt file yields an empty ledger.
    pub fn open(path: PathBuf) -> Self {
        let records = load_records(&path);
        Self {
            path,
            records: RwLock::new(records),
        }
    }

    pub fn accepted(&self, model: &str) -> bool {
        self.records
            .read()
            .map(|records| records.contains_key(model))
            .unwrap_or(false)
    }

    /// Record an explicit acceptance event for a model.
    pub fn record_acceptance(&self, model: &str) -> Result<()> {
        {
            let mut records = self
                .records
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            records.insert(
                model.to_string(),
                AcceptanceRecord {
                    model: model.to_string(),
                    accepted_at: Utc::now(),
                },
            );
        }
        self.write()
    }

    pub fn records(&self) -> Vec<AcceptanceRecord> {
        let records = self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut out: Vec<AcceptanceRecord> = records.values().cloned().collect();
        out.sort_by(|a, b| a.model.cmp(&b.model));
        out
    }

    fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let records = self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let payload = serde_json::to_string_pretty(&*records)?;
        drop(records);
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, payload)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn load_records(path: &Path) -> HashMap<String, AcceptanceRecord> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return HashMap::new();
    };
    serde_json::from_str(&raw).unwrap_or_default()
}
