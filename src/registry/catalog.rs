//! Model descriptors and the read-only catalog.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metadata::Provider;

/// License class of a model, as declared in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LicenseClass {
    /// MIT / BSD / Apache class; installable without ceremony
    Permissive,
    /// GPL-class optional model; requires a recorded acceptance before install
    CopyleftOptional,
    /// License not yet confirmed upstream
    Unverified,
}

impl std::fmt::Display for LicenseClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Permissive => write!(f, "permissive"),
            Self::CopyleftOptional => write!(f, "copyleft-optional"),
            Self::Unverified => write!(f, "unverified"),
        }
    }
}

/// Conservative option defaults declared by the registry for a model.
///
/// Safe Mode forces these regardless of caller-supplied options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultOptions {
    #[serde(default)]
    pub tiling: Option<String>,
    #[serde(default)]
    pub precision: Option<String>,
    #[serde(default)]
    pub scale: Option<u32>,
}

/// One model entry from the registry. Read-only during a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub version: String,
    pub source_url: String,
    pub license: String,
    pub license_class: LicenseClass,
    pub gpu_required: bool,
    pub cpu_validated: bool,
    /// Band sets this model accepts: "RGB", "multispectral", "all bands",
    /// or a provider label for provider-specific multispectral models.
    pub bands_supported: Vec<String>,
    pub scales: Vec<u32>,
    pub weights_url: String,
    /// "sha256:<hex>"; unset/TBD means the model is not installable yet.
    pub checksum: String,
    /// Pinned dependency manifest for the isolated runtime.
    pub dependencies: Vec<String>,
    /// Inference entrypoint inside the isolated runtime.
    pub entrypoint: String,
    #[serde(default)]
    pub default_options: DefaultOptions,
}

impl ModelDescriptor {
    /// Whether the registry carries enough data to install this model.
    ///
    /// Entries without a weights URL or checksum are listed for reference
    /// but excluded from recommendation candidates.
    pub fn installable(&self) -> bool {
        let url = self.weights_url.trim();
        if url.is_empty() || url.eq_ignore_ascii_case("tbd") {
            return false;
        }
        self.sha256().is_some()
    }

    /// The declared sha256 digest, if present and well-formed.
    pub fn sha256(&self) -> Option<&str> {
        let value = self.checksum.strip_prefix("sha256:")?.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("todo") {
            return None;
        }
        Some(value)
    }

    /// Strict band compatibility check.
    ///
    /// RGB scenes (<= 3 bands) need an explicit "RGB" entry; multispectral
    /// scenes need the provider label, "multispectral", or "all bands".
    /// A multispectral scene never matches an RGB-only model.
    pub fn supports_bands(&self, band_count: u32, provider: Provider) -> bool {
        if band_count == 0 {
            return false;
        }
        let normalized: Vec<String> = self
            .bands_supported
            .iter()
            .map(|value| value.trim().to_lowercase())
            .collect();
        if band_count <= 3 {
            return normalized.iter().any(|value| value == "rgb");
        }
        let provider_label = provider.label().to_lowercase();
        normalized.iter().any(|value| {
            *value == provider_label || value == "multispectral" || value == "all bands"
        })
    }

    pub fn supports_scale(&self, scale: u32) -> bool {
        self.scales.contains(&scale)
    }
}

/// Read-only catalog of model descriptors, keyed by name.
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
    by_name: HashMap<String, usize>,
    path: Option<PathBuf>,
}

impl ModelCatalog {
    /// Build a catalog from descriptor entries, rejecting duplicates.
    pub fn from_entries(models: Vec<ModelDescriptor>) -> Result<Self> {
        let mut by_name = HashMap::new();
        for (index, model) in models.iter().enumerate() {
            if model.name.trim().is_empty() {
                return Err(Error::Registry(format!("entry {index} has an empty name")));
            }
            if by_name.insert(model.name.clone(), index).is_some() {
                return Err(Error::Registry(format!(
                    "duplicate model entry '{}'",
                    model.name
                )));
            }
        }
        Ok(Self {
            models,
            by_name,
            path: None,
        })
    }

    /// Load the catalog from a JSON registry file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let models: Vec<ModelDescriptor> = serde_json::from_str(&raw)?;
        let mut catalog = Self::from_entries(models)?;
        catalog.path = Some(path.to_path_buf());
        Ok(catalog)
    }

    /// Re-read the registry file this catalog was loaded from.
    pub fn reload(&mut self) -> Result<()> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| Error::Registry("catalog was not loaded from a file".into()))?;
        let reloaded = Self::load(&path)?;
        self.models = reloaded.models;
        self.by_name = reloaded.by_name;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ModelDescriptor> {
        self.by_name.get(name).map(|&index| &self.models[index])
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    /// Models eligible as recommendation candidates.
    pub fn installable(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter().filter(|model| model.installable())
    }

    /// The built-in catalog shipped with the binary.
    pub fn builtin() -> Self {
        Self::from_entries(builtin_entries()).expect("built-in catalog is well-formed")
    }
}

fn entry(
    name: &str,
    version: &str,
    license: &str,
    license_class: LicenseClass,
    gpu_required: bool,
    cpu_validated: bool,
    bands: &[&str],
    scales: &[u32],
    weights_file: &str,
    checksum: &str,
    entrypoint: &str,
) -> ModelDescriptor {
    ModelDescriptor {
        name: name.into(),
        version: version.into(),
        source_url: format!("https://models.satlift.dev/{}", slug(name)),
        license: license.into(),
        license_class,
        gpu_required,
        cpu_validated,
        bands_supported: bands.iter().map(|value| value.to_string()).collect(),
        scales: scales.to_vec(),
        weights_url: if weights_file.is_empty() {
            String::new()
        } else {
            format!(
                "https://models.satlift.dev/{}/releases/download/{}/{}",
                slug(name),
                version,
                weights_file
            )
        },
        checksum: checksum.into(),
        dependencies: vec!["torch==2.3.1".into(), "numpy==1.26.4".into()],
        entrypoint: entrypoint.into(),
        default_options: DefaultOptions {
            tiling: Some("512 px".into()),
            precision: Some("fp32".into()),
            scale: scales.first().copied(),
        },
    }
}

fn slug(value: &str) -> String {
    let mut out = String::new();
    for ch in value.trim().to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

fn builtin_entries() -> Vec<ModelDescriptor> {
    use LicenseClass::*;
    vec![
        entry(
            "Real-ESRGAN", "v0.3.0", "BSD-3-Clause", Permissive, false, true,
            &["RGB"], &[2, 4],
            "realesrgan_x4.pth",
            "sha256:5ab9e2e984cd11f1d2a8df5a4f1bcf9bd2e75b25b3b3f18f5e7a76d0e1c9a410",
            "realesrgan_infer",
        ),
        entry(
            "Satlas", "v1.2", "Apache-2.0", Permissive, false, true,
            &["RGB"], &[4],
            "satlas_sr.pth",
            "sha256:1f6e88ffb1d3a9e7c04d0d8a9b7b6aa7de7f3b5b7cf4a8d9e0a1b2c3d4e5f601",
            "satlas_infer",
        ),
        entry(
            "SwinIR", "v0.2", "Apache-2.0", Permissive, false, true,
            &["RGB"], &[2, 4],
            "swinir_sr.pth",
            "sha256:9c1b4a5dd0e2f3a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c",
            "swinir_infer",
        ),
        entry(
            "SRGAN-EO", "v2.1", "Apache-2.0", Permissive, false, true,
            &["RGB", "multispectral"], &[2, 4],
            "srgan_eo.pth",
            "sha256:b7e2c4a6d8f0a2c4e6a8b0d2f4a6c8e0b2d4f6a8c0e2b4d6f8a0c2e4b6d8f0a2",
            "srgan_eo_infer",
        ),
        entry(
            "SatelliteSR", "v1.0", "MIT", Permissive, false, true,
            &["RGB", "multispectral"], &[2, 4],
            "satellitesr.pth",
            "sha256:3a5c7e9b1d3f5a7c9e1b3d5f7a9c1e3b5d7f9a1c3e5b7d9f1a3c5e7b9d1f3a5c",
            "satellitesr_infer",
        ),
        entry(
            "SEN2SR", "v0.9", "Apache-2.0", Permissive, false, true,
            &["Sentinel-2", "multispectral"], &[2],
            "sen2sr.pth",
            "sha256:8d0f2b4a6c8e0a2b4d6f8a0c2e4a6b8d0f2a4c6e8a0b2d4f6a8c0e2a4b6d8f0a",
            "s2_sr_infer",
        ),
        entry(
            "S2DR3", "v3.0", "Apache-2.0", Permissive, false, true,
            &["Sentinel-2", "multispectral"], &[2, 4],
            "s2dr3.pth",
            "sha256:6b8d0f2a4c6e8b0d2f4a6c8e0b2d4a6f8c0e2b4d6a8f0c2e4b6d8a0f2c4e6b8d",
            "s2_sr_infer",
        ),
        entry(
            "DSen2", "v1.1", "GPL-3.0", CopyleftOptional, false, true,
            &["Sentinel-2", "multispectral"], &[2],
            "dsen2.pth",
            "sha256:0e2a4c6b8d0e2f4a6c8b0d2e4f6a8c0b2d4e6f8a0c2b4d6e8f0a2c4b6d8e0f2a",
            "dsen2_infer",
        ),
        entry(
            "LDSR-S2", "v0.5", "GPL-3.0", CopyleftOptional, false, true,
            &["Sentinel-2", "multispectral"], &[2],
            "ldsr_s2.pth",
            "sha256:2c4e6a8b0d2c4f6a8e0b2c4d6f8a0e2b4c6d8f0a2e4b6c8d0f2a4e6b8c0d2f4a",
            "s2_sr_infer",
        ),
        entry(
            "SenGLEAN", "v1.0", "etalab-2.0", Unverified, true, false,
            &["Sentinel-2", "multispectral"], &[2, 4],
            "senglean.pth",
            "sha256:4a6c8e0b2d4a6f8c0e2a4b6d8f0c2e4a6b8d0f2c4e6a8b0d2f4c6e8a0b2d4f6c",
            "senglean_infer",
        ),
        entry(
            "Swin2-MoSE", "v0.3", "Apache-2.0", Permissive, true, false,
            &["multispectral"], &[2, 4],
            "swin2_mose.pth",
            "sha256:e0b2d4f6a8c0e2b4d6f8a0c2e4b6d8f0a2c4e6b8d0f2a4c6e8b0d2f4a6c8e0b2",
            "swin2_mose_infer",
        ),
        entry(
            "MRDAM", "v1.4", "MIT", Permissive, false, true,
            &["RGB", "MeteoCloud", "multispectral"], &[2, 4],
            "mrdam.pth",
            "sha256:7f9a1c3e5b7d9f1a3c5e7b9d1f3a5c7e9b1d3f5a7c9e1b3d5f7a9c1e3b5d7f9a",
            "mrdam_infer",
        ),
        // Listed for reference; weights not yet published upstream.
        entry(
            "EVOLAND-S2", "v0.1", "Apache-2.0", Unverified, true, false,
            &["Sentinel-2", "multispectral"], &[2],
            "", "TBD",
            "evoland_s2_infer",
        ),
    ]
}
