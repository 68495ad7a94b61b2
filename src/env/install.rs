//! Model weight download, verification, and removal.

use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::defaults::{DOWNLOAD_MAX_RETRIES, DOWNLOAD_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};
use crate::env::paths::{EnvPaths, InstallPaths};
use crate::error::{Error, Result};
use crate::registry::ModelDescriptor;

/// What an install produced.
#[derive(Debug, Clone)]
pub struct InstallReceipt {
    pub paths: InstallPaths,
    pub size_bytes: u64,
    pub digest: String,
}

/// Manifest written next to installed weights.
#[derive(Debug, Serialize, Deserialize)]
struct InstallManifest {
    name: String,
    version: String,
    weights_url: String,
    weights_filename: String,
    size_bytes: u64,
    checksum: String,
    /// Digest of the weights file on disk. For archive downloads this
    /// differs from the registry checksum, which covers the archive.
    weights_sha256: String,
    dependencies: Vec<String>,
    installed_at: String,
}

/// Downloads, verifies, and removes model environments.
///
/// Only ever touches the model-scoped directory it is installing into;
/// an exclusive lock file guards the slot against concurrent processes.
pub struct EnvInstaller {
    client: reqwest::Client,
    paths: EnvPaths,
}

impl EnvInstaller {
    pub fn new(paths: EnvPaths) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .connect_timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, paths }
    }

    pub fn env_paths(&self) -> &EnvPaths {
        &self.paths
    }

    pub fn is_installed(&self, descriptor: &ModelDescriptor) -> bool {
        let paths = self.paths.install_paths(descriptor);
        paths.manifest.is_file() && paths.weights.is_file()
    }

    /// Download declared weights into the model-scoped environment.
    ///
    /// Dependency pins are enforced up front and the downloaded bytes are
    /// digest-checked against the registry before anything lands at the
    /// final weights path.
    pub async fn install(&self, descriptor: &ModelDescriptor) -> Result<InstallReceipt> {
        if !descriptor.installable() {
            return Err(Error::Validation(format!(
                "model '{}' has no downloadable weights yet",
                descriptor.name
            )));
        }
        enforce_pinned_dependencies(&descriptor.dependencies)?;
        let expected = descriptor
            .sha256()
            .ok_or_else(|| {
                Error::Validation(format!(
                    "model '{}' declares no verifiable checksum",
                    descriptor.name
                ))
            })?
            .to_lowercase();

        let paths = self.paths.install_paths(descriptor);
        std::fs::create_dir_all(&paths.root)?;

        let lock_file = std::fs::File::create(&paths.lock_file)?;
        lock_file.lock_exclusive().map_err(|err| {
            Error::Execution(format!(
                "could not lock environment slot for '{}': {err}",
                descriptor.name
            ))
        })?;

        let result = self.install_locked(descriptor, &paths, &expected).await;
        let _ = FileExt::unlock(&lock_file);
        result
    }

    async fn install_locked(
        &self,
        descriptor: &ModelDescriptor,
        paths: &InstallPaths,
        expected: &str,
    ) -> Result<InstallReceipt> {
        let content = self
            .download_with_retry(&descriptor.weights_url, expected)
            .await?;
        let size_bytes = content.len() as u64;
        let digest = hex::encode(Sha256::digest(&content));

        if is_archive(&descriptor.weights_url) {
            extract_archive(&content, &paths.root)?;
            if !paths.weights.exists() {
                return Err(Error::Execution(format!(
                    "archive for '{}' did not contain {}",
                    descriptor.name,
                    paths.weights.display()
                )));
            }
        } else {
            let tmp_path = paths.weights.with_extension("download");
            std::fs::write(&tmp_path, &content)?;
            std::fs::rename(&tmp_path, &paths.weights)?;
        }
        let weights_sha256 = digest_file(&paths.weights)?;

        std::fs::create_dir_all(&paths.runtime_dir)?;
        let runtime_manifest = serde_json::json!({
            "dependencies": descriptor.dependencies,
            "entrypoint": descriptor.entrypoint,
            "created_at": iso_now(),
        });
        std::fs::write(
            paths.runtime_dir.join("runtime.json"),
            serde_json::to_string_pretty(&runtime_manifest)?,
        )?;

        let manifest = InstallManifest {
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
            weights_url: descriptor.weights_url.clone(),
            weights_filename: paths
                .weights
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "weights.bin".into()),
            size_bytes,
            checksum: descriptor.checksum.clone(),
            weights_sha256,
            dependencies: descriptor.dependencies.clone(),
            installed_at: iso_now(),
        };
        let tmp_manifest = paths.manifest.with_extension("tmp");
        std::fs::write(&tmp_manifest, serde_json::to_string_pretty(&manifest)?)?;
        std::fs::rename(&tmp_manifest, &paths.manifest)?;

        log::info!(
            "Installed model '{}' ({} bytes) into {}",
            descriptor.name,
            size_bytes,
            paths.root.display()
        );

        Ok(InstallReceipt {
            paths: paths.clone(),
            size_bytes,
            digest,
        })
    }

    /// Re-validate the on-disk weights against the registry checksum.
    ///
    /// For archive downloads the comparison target is the weights digest
    /// recorded at install time, since the registry checksum covers the
    /// archive itself.
    pub fn verify_checksum(&self, descriptor: &ModelDescriptor) -> Result<String> {
        let paths = self.paths.install_paths(descriptor);
        if !paths.weights.is_file() {
            return Err(Error::EnvironmentNotReady(format!(
                "weights for '{}' are not installed",
                descriptor.name
            )));
        }

        let expected = if is_archive(&descriptor.weights_url) {
            let raw = std::fs::read_to_string(&paths.manifest)?;
            let manifest: InstallManifest = serde_json::from_str(&raw)?;
            manifest.weights_sha256
        } else {
            descriptor
                .sha256()
                .ok_or_else(|| {
                    Error::Validation(format!(
                        "model '{}' declares no verifiable checksum",
                        descriptor.name
                    ))
                })?
                .to_lowercase()
        };

        let actual = digest_file(&paths.weights)?;
        if actual != expected {
            return Err(Error::Integrity {
                artifact: paths.weights.display().to_string(),
                expected,
                actual,
            });
        }
        Ok(actual)
    }

    /// Remove the environment directory; best effort, idempotent.
    pub fn uninstall(&self, descriptor: &ModelDescriptor) {
        let paths = self.paths.install_paths(descriptor);
        if paths.root.exists() {
            if let Err(err) = std::fs::remove_dir_all(&paths.root) {
                log::warn!(
                    "Could not fully remove environment {}: {err}",
                    paths.root.display()
                );
            }
        }
    }

    async fn download_with_retry(&self, url: &str, expected_sha256: &str) -> Result<Vec<u8>> {
        let mut last_error = Error::Network("download failed".into());
        for attempt in 0..DOWNLOAD_MAX_RETRIES {
            match self.fetch(url).await {
                Ok(content) => {
                    let actual = hex::encode(Sha256::digest(&content));
                    if actual != expected_sha256 {
                        return Err(Error::Integrity {
                            artifact: url.to_string(),
                            expected: expected_sha256.to_string(),
                            actual,
                        });
                    }
                    return Ok(content);
                }
                Err(err) => {
                    if attempt + 1 < DOWNLOAD_MAX_RETRIES {
                        log::warn!("Download attempt {} failed: {err}, retrying...", attempt + 1);
                    }
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if url.starts_with("http://") || url.starts_with("https://") {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|err| Error::Network(err.to_string()))?;
            if !response.status().is_success() {
                return Err(Error::Network(format!("HTTP {}", response.status())));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|err| Error::Network(err.to_string()))?;
            return Ok(bytes.to_vec());
        }

        // file:// URLs and plain paths: local registries and tests.
        let path = url.strip_prefix("file://").unwrap_or(url);
        Ok(std::fs::read(path)?)
    }
}

fn enforce_pinned_dependencies(dependencies: &[String]) -> Result<()> {
    let unpinned: Vec<&str> = dependencies
        .iter()
        .map(|dep| dep.trim())
        .filter(|dep| !dep.is_empty() && !is_pinned(dep))
        .collect();
    if unpinned.is_empty() {
        return Ok(());
    }
    Err(Error::Validation(format!(
        "model dependencies must be pinned to exact versions; unpinned: {}",
        unpinned.join(", ")
    )))
}

fn is_pinned(dependency: &str) -> bool {
    dependency.contains("==")
        || dependency.contains('@')
        || dependency.ends_with(".whl")
        || dependency.starts_with("file:")
}

fn is_archive(url: &str) -> bool {
    let lowered = url.to_lowercase();
    lowered.ends_with(".tar.gz") || lowered.ends_with(".tgz")
}

fn extract_archive(content: &[u8], dest: &Path) -> Result<()> {
    let decoder = flate2::read::GzDecoder::new(content);
    let mut archive = tar::Archive::new(decoder);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?;
        let path_str = path.to_string_lossy();
        if path_str.starts_with('/') || path_str.contains("..") {
            return Err(Error::Execution(format!(
                "unsafe path in weights archive: {path_str}"
            )));
        }
        let target: PathBuf = dest.join(&*path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if entry.header().entry_type().is_file() {
            let mut file = std::fs::File::create(&target)?;
            std::io::copy(&mut entry, &mut file)?;
        }
    }
    Ok(())
}

fn digest_file(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut file = std::fs::File::open(path)?;
    let mut buffer = vec![0u8; 1024 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn iso_now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModelCatalog;

    fn local_descriptor(dir: &Path, payload: &[u8]) -> ModelDescriptor {
        let weights_path = dir.join("weights.pth");
        std::fs::write(&weights_path, payload).unwrap();
        let digest = hex::encode(Sha256::digest(payload));
        let mut descriptor = ModelCatalog::builtin().get("Satlas").unwrap().clone();
        descriptor.weights_url = weights_path.to_string_lossy().into_owned();
        descriptor.checksum = format!("sha256:{digest}");
        descriptor
    }

    #[tokio::test]
    async fn test_local_install_and_checksum_verify() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        std::fs::create_dir_all(&source).unwrap();
        let descriptor = local_descriptor(&source, b"weights-bytes");

        let installer = EnvInstaller::new(EnvPaths::with_root(dir.path().join("data")));
        let receipt = installer.install(&descriptor).await.unwrap();
        assert!(receipt.paths.weights.is_file());
        assert!(receipt.paths.manifest.is_file());
        assert!(installer.is_installed(&descriptor));
        installer.verify_checksum(&descriptor).unwrap();

        installer.uninstall(&descriptor);
        assert!(!installer.is_installed(&descriptor));
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_integrity_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        std::fs::create_dir_all(&source).unwrap();
        let mut descriptor = local_descriptor(&source, b"weights-bytes");
        descriptor.checksum =
            "sha256:0000000000000000000000000000000000000000000000000000000000000000".into();

        let installer = EnvInstaller::new(EnvPaths::with_root(dir.path().join("data")));
        let err = installer.install(&descriptor).await.unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
        assert!(!installer.is_installed(&descriptor));
    }

    #[tokio::test]
    async fn test_unpinned_dependencies_rejected_before_download() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        std::fs::create_dir_all(&source).unwrap();
        let mut descriptor = local_descriptor(&source, b"weights-bytes");
        descriptor.dependencies = vec!["torch".into()];

        let installer = EnvInstaller::new(EnvPaths::with_root(dir.path().join("data")));
        let err = installer.install(&descriptor).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!installer.is_installed(&descriptor));
    }

    #[test]
    fn test_dependency_pin_forms() {
        assert!(is_pinned("torch==2.3.1"));
        assert!(is_pinned("pkg @ https://host/pkg.whl"));
        assert!(is_pinned("local.whl"));
        assert!(is_pinned("file:./vendored"));
        assert!(!is_pinned("torch"));
        assert!(!is_pinned("numpy>=1.0"));
    }

    #[tokio::test]
    async fn test_not_installable_descriptor_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut descriptor = ModelCatalog::builtin().get("Satlas").unwrap().clone();
        descriptor.weights_url = String::new();
        let installer = EnvInstaller::new(EnvPaths::with_root(dir.path().to_path_buf()));
        let err = installer.install(&descriptor).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
