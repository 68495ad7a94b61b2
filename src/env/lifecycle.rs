//! Per-model environment state machine.
//!
//! States: NOT_INSTALLED -> INSTALLING -> INSTALLED -> VERIFYING -> HEALTHY,
//! with UNHEALTHY reachable from verification or a failed runtime probe and
//! UNINSTALLING reachable from any non-NOT_INSTALLED state. Exactly one
//! lifecycle transition is in flight per model id; different models proceed
//! independently of each other and of job execution.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, Notify, RwLock};

use crate::env::install::EnvInstaller;
use crate::env::license::LicenseLedger;
use crate::env::paths::EnvPaths;
use crate::env::probe::run_probe;
use crate::error::{Error, Result};
use crate::exec::ModelExecutionAdapter;
use crate::registry::{LicenseClass, ModelCatalog, ModelDescriptor};

/// Environment lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EnvState {
    /// No environment on disk
    NotInstalled,
    /// Download/extraction in progress
    Installing,
    /// On disk, not yet verified this session
    Installed,
    /// Checksum + probe in progress
    Verifying,
    /// Verified; may serve jobs
    Healthy,
    /// Failed verification or a runtime probe
    Unhealthy,
    /// Removal in progress
    Uninstalling,
}

impl std::fmt::Display for EnvState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInstalled => write!(f, "NOT_INSTALLED"),
            Self::Installing => write!(f, "INSTALLING"),
            Self::Installed => write!(f, "INSTALLED"),
            Self::Verifying => write!(f, "VERIFYING"),
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Unhealthy => write!(f, "UNHEALTHY"),
            Self::Uninstalling => write!(f, "UNINSTALLING"),
        }
    }
}

/// Point-in-time view of one model's environment.
#[derive(Debug, Clone, Serialize)]
pub struct EnvStatus {
    pub model: String,
    pub state: EnvState,
    pub error: Option<String>,
}

struct EnvEntry {
    state: EnvState,
    error: Option<String>,
}

struct EntryShared {
    /// Serializes lifecycle transitions for this model id.
    gate: Mutex<()>,
    cell: std::sync::RwLock<EnvEntry>,
    notify: Notify,
}

impl EntryShared {
    fn new(state: EnvState) -> Self {
        Self {
            gate: Mutex::new(()),
            cell: std::sync::RwLock::new(EnvEntry { state, error: None }),
            notify: Notify::new(),
        }
    }

    fn state(&self) -> EnvState {
        self.cell
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .state
    }

    fn error(&self) -> Option<String> {
        self.cell
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .error
            .clone()
    }

    fn set(&self, state: EnvState, error: Option<String>) {
        {
            let mut entry = self
                .cell
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            entry.state = state;
            entry.error = error;
        }
        self.notify.notify_waiters();
    }
}

/// Owns every `ModelEnvironment`; the only component that transitions them.
pub struct EnvironmentManager {
    catalog: Arc<ModelCatalog>,
    installer: EnvInstaller,
    ledger: LicenseLedger,
    paths: EnvPaths,
    entries: RwLock<HashMap<String, Arc<EntryShared>>>,
}

impl EnvironmentManager {
    /// Build the manager and pick up environments already on disk.
    ///
    /// A previously installed environment resumes as `Installed`: checksum
    /// and probe state do not carry across sessions, so `Healthy` must be
    /// re-earned through `verify`.
    pub fn new(catalog: Arc<ModelCatalog>, paths: EnvPaths) -> Self {
        let installer = EnvInstaller::new(paths.clone());
        let ledger = LicenseLedger::open(paths.ledger_file());
        let mut entries = HashMap::new();
        for descriptor in catalog.models() {
            if installer.is_installed(descriptor) {
                entries.insert(
                    descriptor.name.clone(),
                    Arc::new(EntryShared::new(EnvState::Installed)),
                );
            }
        }
        Self {
            catalog,
            installer,
            ledger,
            paths,
            entries: RwLock::new(entries),
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn env_paths(&self) -> &EnvPaths {
        &self.paths
    }

    /// Record an explicit license acceptance for a model.
    pub fn accept_license(&self, model: &str) -> Result<()> {
        let descriptor = self.descriptor(model)?;
        self.ledger.record_acceptance(&descriptor.name)
    }

    pub fn license_accepted(&self, model: &str) -> bool {
        self.ledger.accepted(model)
    }

    pub async fn state(&self, model: &str) -> EnvState {
        match self.entries.read().await.get(model) {
            Some(entry) => entry.state(),
            None => EnvState::NotInstalled,
        }
    }

    /// Status for every catalog model.
    pub async fn statuses(&self) -> Vec<EnvStatus> {
        let entries = self.entries.read().await;
        self.catalog
            .models()
            .iter()
            .map(|descriptor| match entries.get(&descriptor.name) {
                Some(entry) => EnvStatus {
                    model: descriptor.name.clone(),
                    state: entry.state(),
                    error: entry.error(),
                },
                None => EnvStatus {
                    model: descriptor.name.clone(),
                    state: EnvState::NotInstalled,
                    error: None,
                },
            })
            .collect()
    }

    /// Install a model environment. User-initiated and license-gated:
    /// a copyleft-optional model with no recorded acceptance fails with
    /// `LicenseBlocked` before any bytes move.
    pub async fn install(&self, model: &str) -> Result<()> {
        let descriptor = self.descriptor(model)?;
        let entry = self.entry(&descriptor.name).await;
        let _gate = entry.gate.lock().await;

        if descriptor.license_class == LicenseClass::CopyleftOptional
            && !self.ledger.accepted(&descriptor.name)
        {
            return Err(Error::LicenseBlocked(descriptor.name.clone()));
        }
        if matches!(entry.state(), EnvState::Healthy | EnvState::Installed) {
            return Ok(());
        }

        entry.set(EnvState::Installing, None);
        log::info!("Installing model environment '{}'", descriptor.name);
        match self.installer.install(&descriptor).await {
            Ok(_) => {
                entry.set(EnvState::Installed, None);
                Ok(())
            }
            Err(err) => {
                // Partial installs are removed rather than left ambiguous.
                self.installer.uninstall(&descriptor);
                entry.set(EnvState::NotInstalled, Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// Verify an installed environment: checksum the weights against the
    /// registry, then run the health probe through the adapter.
    pub async fn verify(
        &self,
        model: &str,
        adapter: &dyn ModelExecutionAdapter,
    ) -> Result<()> {
        let descriptor = self.descriptor(model)?;
        let entry = self.entry(&descriptor.name).await;
        let _gate = entry.gate.lock().await;

        match entry.state() {
            EnvState::Installed | EnvState::Healthy | EnvState::Unhealthy => {}
            state => {
                return Err(Error::EnvironmentNotReady(format!(
                    "model '{}' is {state}; install it before verifying",
                    descriptor.name
                )));
            }
        }

        entry.set(EnvState::Verifying, None);
        if let Err(err) = self.installer.verify_checksum(&descriptor) {
            log::warn!("Checksum verification failed for '{}': {err}", descriptor.name);
            entry.set(EnvState::Unhealthy, Some(err.to_string()));
            return Err(err);
        }

        let probe_scale = descriptor.scales.iter().copied().min().unwrap_or(2);
        match run_probe(adapter, &self.paths.scratch_dir(), probe_scale) {
            Ok(()) => {
                entry.set(EnvState::Healthy, None);
                log::info!("Model environment '{}' is healthy", descriptor.name);
                Ok(())
            }
            Err(err) => {
                entry.set(EnvState::Unhealthy, Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// Idempotent readiness check. Never installs: installation is a
    /// user-initiated, license-gated action.
    pub async fn ensure_healthy(&self, model: &str) -> Result<()> {
        let descriptor = self.descriptor(model)?;
        match self.state(&descriptor.name).await {
            EnvState::Healthy => Ok(()),
            EnvState::NotInstalled => Err(Error::EnvironmentNotReady(format!(
                "model '{}' is not installed",
                descriptor.name
            ))),
            state => Err(Error::EnvironmentNotReady(format!(
                "model '{}' is {state}",
                descriptor.name
            ))),
        }
    }

    /// Flag a previously healthy environment after a failed runtime probe.
    pub async fn mark_unhealthy(&self, model: &str, reason: &str) {
        let entry = self.entry(model).await;
        entry.set(EnvState::Unhealthy, Some(reason.to_string()));
        log::warn!("Model environment '{model}' marked unhealthy: {reason}");
    }

    /// Remove the environment. Best effort from any prior state; always
    /// terminates in `NotInstalled`.
    pub async fn uninstall(&self, model: &str) -> Result<()> {
        let descriptor = self.descriptor(model)?;
        let entry = self.entry(&descriptor.name).await;
        let _gate = entry.gate.lock().await;

        entry.set(EnvState::Uninstalling, None);
        self.installer.uninstall(&descriptor);
        entry.set(EnvState::NotInstalled, None);
        log::info!("Removed model environment '{}'", descriptor.name);
        Ok(())
    }

    /// Wait until the model leaves transitional states; used by callers that
    /// observe installs driven elsewhere.
    pub async fn await_settled(&self, model: &str) -> EnvState {
        loop {
            let entry = self.entry(model).await;
            let state = entry.state();
            match state {
                EnvState::Installing | EnvState::Verifying | EnvState::Uninstalling => {
                    entry.notify.notified().await;
                }
                settled => return settled,
            }
        }
    }

    fn descriptor(&self, model: &str) -> Result<ModelDescriptor> {
        self.catalog
            .get(model)
            .cloned()
            .ok_or_else(|| Error::Registry(format!("unknown model '{model}'")))
    }

    async fn entry(&self, model: &str) -> Arc<EntryShared> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(model) {
                return entry.clone();
            }
        }
        let mut entries = self.entries.write().await;
        entries
            .entry(model.to_string())
            .or_insert_with(|| Arc::new(EntryShared::new(EnvState::NotInstalled)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ExecError, InferenceOutcome, InferenceRequest};
    use sha2::{Digest, Sha256};
    use std::path::Path;

    struct EchoAdapter;

    impl ModelExecutionAdapter for EchoAdapter {
        fn infer(
            &self,
            request: &InferenceRequest,
        ) -> std::result::Result<InferenceOutcome, ExecError> {
            std::fs::copy(&request.input, &request.output)?;
            Ok(InferenceOutcome {
                output: request.output.clone(),
            })
        }
    }

    fn catalog_with_local_weights(source_dir: &Path, payload: &[u8]) -> Arc<ModelCatalog> {
        let weights_path = source_dir.join("weights.pth");
        std::fs::write(&weights_path, payload).unwrap();
        let digest = hex::encode(Sha256::digest(payload));

        let mut entries = Vec::new();
        for name in ["Satlas", "DSen2"] {
            let mut descriptor = ModelCatalog::builtin().get(name).unwrap().clone();
            descriptor.weights_url = weights_path.to_string_lossy().into_owned();
            descriptor.checksum = format!("sha256:{digest}");
            entries.push(descriptor);
        }
        Arc::new(ModelCatalog::from_entries(entries).unwrap())
    }

    fn manager(dir: &Path) -> (EnvironmentManager, Arc<ModelCatalog>) {
        let source = dir.join("source");
        std::fs::create_dir_all(&source).unwrap();
        let catalog = catalog_with_local_weights(&source, b"payload-bytes");
        let manager = EnvironmentManager::new(
            catalog.clone(),
            EnvPaths::with_root(dir.join("data")),
        );
        (manager, catalog)
    }

    #[tokio::test]
    async fn test_install_verify_healthy_flow() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager(dir.path());

        assert_eq!(manager.state("Satlas").await, EnvState::NotInstalled);
        manager.install("Satlas").await.unwrap();
        assert_eq!(manager.state("Satlas").await, EnvState::Installed);

        assert!(manager.ensure_healthy("Satlas").await.is_err());
        manager.verify("Satlas", &EchoAdapter).await.unwrap();
        assert_eq!(manager.state("Satlas").await, EnvState::Healthy);
        manager.ensure_healthy("Satlas").await.unwrap();
    }

    #[tokio::test]
    async fn test_copyleft_install_blocked_without_acceptance() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, catalog) = manager(dir.path());

        let err = manager.install("DSen2").await.unwrap_err();
        assert!(matches!(err, Error::LicenseBlocked(_)));
        assert_eq!(manager.state("DSen2").await, EnvState::NotInstalled);

        // No download happened: the environment directory does not exist.
        let descriptor = catalog.get("DSen2").unwrap();
        let paths = manager.env_paths().install_paths(descriptor);
        assert!(!paths.root.exists());

        manager.accept_license("DSen2").unwrap();
        manager.install("DSen2").await.unwrap();
        assert_eq!(manager.state("DSen2").await, EnvState::Installed);
    }

    #[tokio::test]
    async fn test_ensure_healthy_never_auto_installs() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, catalog) = manager(dir.path());

        let err = manager.ensure_healthy("Satlas").await.unwrap_err();
        assert!(matches!(err, Error::EnvironmentNotReady(_)));
        assert_eq!(manager.state("Satlas").await, EnvState::NotInstalled);
        let descriptor = catalog.get("Satlas").unwrap();
        assert!(!manager.env_paths().install_paths(descriptor).root.exists());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_marks_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, catalog) = manager(dir.path());

        manager.install("Satlas").await.unwrap();
        // Corrupt the installed weights behind the manager's back.
        let descriptor = catalog.get("Satlas").unwrap();
        let paths = manager.env_paths().install_paths(descriptor);
        std::fs::write(&paths.weights, b"tampered").unwrap();

        let err = manager.verify("Satlas", &EchoAdapter).await.unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
        assert_eq!(manager.state("Satlas").await, EnvState::Unhealthy);
        assert!(manager.ensure_healthy("Satlas").await.is_err());
    }

    #[tokio::test]
    async fn test_uninstall_always_reaches_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager(dir.path());

        // From NotInstalled.
        manager.uninstall("Satlas").await.unwrap();
        assert_eq!(manager.state("Satlas").await, EnvState::NotInstalled);

        // From Healthy.
        manager.install("Satlas").await.unwrap();
        manager.verify("Satlas", &EchoAdapter).await.unwrap();
        manager.uninstall("Satlas").await.unwrap();
        assert_eq!(manager.state("Satlas").await, EnvState::NotInstalled);

        // From Unhealthy.
        manager.install("Satlas").await.unwrap();
        manager.mark_unhealthy("Satlas", "probe timed out").await;
        manager.uninstall("Satlas").await.unwrap();
        assert_eq!(manager.state("Satlas").await, EnvState::NotInstalled);
    }

    #[tokio::test]
    async fn test_existing_install_resumes_as_installed() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (manager, _) = manager(dir.path());
            manager.install("Satlas").await.unwrap();
        }
        let source = dir.path().join("source");
        let catalog = catalog_with_local_weights(&source, b"payload-bytes");
        let manager =
            EnvironmentManager::new(catalog, EnvPaths::with_root(dir.path().join("data")));
        assert_eq!(manager.state("Satlas").await, EnvState::Installed);
    }

    #[tokio::test]
    async fn test_await_settled_reflects_resting_state() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager(dir.path());
        assert_eq!(manager.await_settled("Satlas").await, EnvState::NotInstalled);
        manager.install("Satlas").await.unwrap();
        assert_eq!(manager.await_settled("Satlas").await, EnvState::Installed);
    }

    #[tokio::test]
    async fn test_unknown_model_is_a_registry_error() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager(dir.path());
        assert!(matches!(
            manager.install("NoSuchModel").await.unwrap_err(),
            Error::Registry(_)
        ));
    }
}
