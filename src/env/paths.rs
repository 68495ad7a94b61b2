//! Filesystem layout for model environments and app data.

use std::path::{Path, PathBuf};

use crate::defaults::DATA_DIR_ENV;
use crate::registry::ModelDescriptor;

/// Per-model environment file layout.
#[derive(Debug, Clone)]
pub struct InstallPaths {
    pub root: PathBuf,
    pub weights: PathBuf,
    pub manifest: PathBuf,
    pub runtime_dir: PathBuf,
    pub lock_file: PathBuf,
}

/// Resolves every path the app persists under one data root.
#[derive(Debug, Clone)]
pub struct EnvPaths {
    data_root: PathBuf,
}

impl EnvPaths {
    /// Default data root: `SATLIFT_DATA_DIR`, else the platform data dir.
    pub fn resolve() -> Self {
        if let Ok(value) = std::env::var(DATA_DIR_ENV) {
            if !value.trim().is_empty() {
                return Self::with_root(PathBuf::from(value));
            }
        }
        let root = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("satlift");
        Self::with_root(root)
    }

    pub fn with_root(data_root: PathBuf) -> Self {
        Self { data_root }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data_root.join("models")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_root.join("logs")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.data_root.join("reports")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.data_root.join("tmp")
    }

    pub fn session_file(&self) -> PathBuf {
        self.data_root.join("session.json")
    }

    pub fn ledger_file(&self) -> PathBuf {
        self.data_root.join("license_acceptances.json")
    }

    pub fn profiles_file(&self) -> PathBuf {
        self.data_root.join("band_profiles.json")
    }

    pub fn model_dir(&self, name: &str, version: &str) -> PathBuf {
        let version = if version.trim().is_empty() {
            "latest"
        } else {
            version
        };
        self.models_dir().join(slugify(name)).join(slugify(version))
    }

    /// Environment layout for one descriptor.
    pub fn install_paths(&self, descriptor: &ModelDescriptor) -> InstallPaths {
        let root = self.model_dir(&descriptor.name, &descriptor.version);
        let weights_name = weights_filename(&descriptor.weights_url);
        InstallPaths {
            weights: root.join(weights_name),
            manifest: root.join("manifest.json"),
            runtime_dir: root.join("runtime"),
            lock_file: root.join(".install.lock"),
            root,
        }
    }
}

/// Lowercased, dash-separated slug for directory names.
pub fn slugify(value: &str) -> String {
    let mut out = String::new();
    for ch in value.trim().to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "model".into()
    } else {
        trimmed.to_string()
    }
}

fn weights_filename(weights_url: &str) -> String {
    let trimmed = weights_url.trim().trim_end_matches('/');
    let without_query = trimmed.split(['?', '#']).next().unwrap_or(trimmed);
    let name = without_query.rsplit('/').next().unwrap_or("");
    if name.is_empty() {
        "weights.bin".into()
    } else {
        name.to_string()
    }
}
