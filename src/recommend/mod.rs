//! Rule-based model recommendation.
//!
//! `recommend` is a pure function over the asset set, the catalog, and the
//! detected hardware: identical inputs always produce identical output. It
//! ranks every compatible, installable model; it never mutates anything.

use serde::Serialize;

use crate::defaults::{MINIMUM_RAM_GB, MINIMUM_VRAM_GB};
use crate::hardware::HardwareProfile;
use crate::metadata::{AssetMetadata, Provider};
use crate::registry::{LicenseClass, ModelCatalog, ModelDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Confidence {
    Confident,
    Ambiguous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Precision {
    Fp16,
    Fp32,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fp16 => "fp16",
            Self::Fp32 => "fp32",
        }
    }
}

/// One ranked candidate with the options the engine would run it at.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub model: String,
    pub scale: u32,
    pub tiling: bool,
    pub precision: Precision,
}

/// Ranked recommendation plus the reasoning behind it.
#[derive(Debug, Clone, Serialize)]
pub struct RecommendationResult {
    pub candidates: Vec<Candidate>,
    pub rationale: String,
    pub confidence: Confidence,
    pub warnings: Vec<String>,
}

impl RecommendationResult {
    pub fn top(&self) -> Option<&Candidate> {
        self.candidates.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BandProfile {
    Rgb,
    Multispectral,
}

impl BandProfile {
    fn label(&self) -> &'static str {
        match self {
            Self::Rgb => "RGB",
            Self::Multispectral => "multispectral",
        }
    }
}

/// Provider-specific model priority, strongest first.
fn priority_models(provider: Provider, profile: BandProfile) -> &'static [&'static str] {
    use BandProfile::*;
    match (provider, profile) {
        (Provider::Sentinel2, Multispectral) => &["S2DR3", "SEN2SR"],
        (Provider::Sentinel2, Rgb) => &["Satlas"],
        (Provider::PlanetScope, Multispectral) => &["SRGAN-EO", "SatelliteSR"],
        (Provider::PlanetScope, Rgb) => &["SwinIR", "Real-ESRGAN"],
        (Provider::Landsat, Multispectral) => &["SRGAN-EO"],
        (Provider::Landsat, Rgb) => &["SwinIR", "Real-ESRGAN"],
        (Provider::Vantor | Provider::TripleSat, Multispectral) => &["SRGAN-EO", "SatelliteSR"],
        (Provider::Vantor | Provider::TripleSat, Rgb) => &["SatelliteSR", "SRGAN-EO"],
        (Provider::MeteoCloud, _) => &["MRDAM"],
        (Provider::Unknown, Multispectral) => &["SRGAN-EO", "SatelliteSR"],
        (Provider::Unknown, Rgb) => &["Real-ESRGAN", "SwinIR"],
    }
}

/// Produce a ranked recommendation for the given asset set.
pub fn recommend(
    assets: &[AssetMetadata],
    catalog: &ModelCatalog,
    hardware: &HardwareProfile,
) -> RecommendationResult {
    let mut warnings = Vec::new();

    if assets.is_empty() {
        return RecommendationResult {
            candidates: Vec::new(),
            rationale: "No input assets; nothing to recommend.".into(),
            confidence: Confidence::Ambiguous,
            warnings,
        };
    }

    let provider = dominant_provider(assets, &mut warnings);
    let band_count = known_band_count(assets, &mut warnings);
    let profile = if band_count <= 3 {
        BandProfile::Rgb
    } else {
        BandProfile::Multispectral
    };
    let resolution_m = finest_resolution(assets);

    if provider == Provider::Landsat && profile == BandProfile::Multispectral {
        warnings
            .push("Landsat multispectral SR is experimental; validate outputs carefully.".into());
    }
    if !hardware.gpu_available {
        warnings.push("GPU not detected; only CPU-validated models are ranked.".into());
    }
    if hardware.gpu_available && hardware.below_vram_target() {
        warnings.push(format!(
            "VRAM below the {MINIMUM_VRAM_GB} GB target; tiling enabled for stability."
        ));
    }
    if hardware.below_ram_target() {
        warnings.push(format!(
            "System RAM below the {MINIMUM_RAM_GB} GB target; tiling enabled for stability."
        ));
    }
    if let Some(resolution) = resolution_m {
        if resolution <= 0.5 {
            warnings.push("Input appears high resolution; consider scale 2 or no upscale.".into());
        }
    }

    let ranked = rank_models(provider, profile, band_count, catalog, hardware);
    let tiling = should_tile(hardware);
    let precision = select_precision(hardware);

    let candidates: Vec<Candidate> = ranked
        .iter()
        .map(|descriptor| Candidate {
            model: descriptor.name.clone(),
            scale: select_scale(resolution_m, descriptor),
            tiling,
            precision,
        })
        .collect();

    let confidence = if candidates.is_empty() {
        Confidence::Ambiguous
    } else {
        Confidence::Confident
    };
    let rationale = build_rationale(provider, profile, resolution_m, candidates.first());

    RecommendationResult {
        candidates,
        rationale,
        confidence,
        warnings,
    }
}

fn dominant_provider(assets: &[AssetMetadata], warnings: &mut Vec<String>) -> Provider {
    let first = assets
        .iter()
        .map(|asset| asset.provider)
        .find(|provider| *provider != Provider::Unknown)
        .unwrap_or(Provider::Unknown);
    let mixed = assets
        .iter()
        .any(|asset| asset.provider != Provider::Unknown && asset.provider != first);
    if mixed {
        warnings.push(format!(
            "Assets come from multiple providers; ranking against {}.",
            first.label()
        ));
    }
    if first == Provider::Unknown {
        warnings.push("Provider unknown; using the generic model priority.".into());
    }
    first
}

fn known_band_count(assets: &[AssetMetadata], warnings: &mut Vec<String>) -> u32 {
    match assets.iter().filter_map(|asset| asset.band_count).max() {
        Some(count) if count > 0 => count,
        _ => {
            warnings.push("Band count unknown; candidates filtered as RGB.".into());
            3
        }
    }
}

fn finest_resolution(assets: &[AssetMetadata]) -> Option<f64> {
    assets
        .iter()
        .filter_map(|asset| asset.pixel_size_m)
        .filter(|value| *value > 0.0)
        .fold(None, |best: Option<f64>, value| match best {
            Some(current) if current <= value => Some(current),
            _ => Some(value),
        })
}

fn rank_models<'a>(
    provider: Provider,
    profile: BandProfile,
    band_count: u32,
    catalog: &'a ModelCatalog,
    hardware: &HardwareProfile,
) -> Vec<&'a ModelDescriptor> {
    let eligible = |descriptor: &&ModelDescriptor| -> bool {
        if !descriptor.supports_bands(band_count, provider) {
            return false;
        }
        if descriptor.gpu_required && !hardware.gpu_available {
            return false;
        }
        if !hardware.gpu_available && !descriptor.cpu_validated {
            return false;
        }
        true
    };

    let mut ranked: Vec<&ModelDescriptor> = Vec::new();
    for name in priority_models(provider, profile) {
        if let Some(descriptor) = catalog.get(name) {
            if descriptor.installable() && eligible(&descriptor) {
                ranked.push(descriptor);
            }
        }
    }

    // Remaining compatible models rank after the provider priorities,
    // CPU-validated first, then by name for determinism.
    let mut rest: Vec<&ModelDescriptor> = catalog
        .installable()
        .filter(eligible)
        .filter(|descriptor| !ranked.iter().any(|seen| seen.name == descriptor.name))
        .collect();
    rest.sort_by(|a, b| {
        b.cpu_validated
            .cmp(&a.cpu_validated)
            .then_with(|| a.name.cmp(&b.name))
    });
    ranked.extend(rest);
    ranked
}

fn preferred_scale(resolution_m: Option<f64>) -> u32 {
    match resolution_m {
        Some(resolution) if resolution <= 1.5 => 2,
        _ => 4,
    }
}

fn select_scale(resolution_m: Option<f64>, descriptor: &ModelDescriptor) -> u32 {
    let preferred = preferred_scale(resolution_m);
    if descriptor.supports_scale(preferred) {
        return preferred;
    }
    let mut scales = descriptor.scales.clone();
    scales.sort_unstable();
    scales
        .iter()
        .copied()
        .find(|scale| *scale >= preferred)
        .or_else(|| scales.last().copied())
        .unwrap_or(preferred)
}

fn should_tile(hardware: &HardwareProfile) -> bool {
    !hardware.gpu_available || hardware.below_vram_target() || hardware.below_ram_target()
}

fn select_precision(hardware: &HardwareProfile) -> Precision {
    if hardware.gpu_available && !hardware.below_vram_target() {
        Precision::Fp16
    } else {
        Precision::Fp32
    }
}

fn build_rationale(
    provider: Provider,
    profile: BandProfile,
    resolution_m: Option<f64>,
    top: Option<&Candidate>,
) -> String {
    let resolution = match resolution_m {
        Some(value) => format!("{value:.2}m GSD"),
        None => "resolution unknown".into(),
    };
    match top {
        Some(candidate) => format!(
            "{} {} scene at {}; mapped to {}.",
            provider.label(),
            profile.label(),
            resolution,
            candidate.model
        ),
        None => format!(
            "{} {} scene at {}; no compatible model available — select a provider/model manually.",
            provider.label(),
            profile.label(),
            resolution
        ),
    }
}

/// Concern raised when the caller substitutes their own model choice.
#[derive(Debug, Clone, Serialize)]
pub enum OverrideConcern {
    BandMismatch { band_count: u32 },
    GpuRequired,
    NotCpuValidated,
    LicenseClass(LicenseClass),
    ScaleUnsupported { scale: u32 },
    NotInstallable,
}

impl OverrideConcern {
    pub fn message(&self) -> String {
        match self {
            Self::BandMismatch { band_count } => format!(
                "The selected model does not declare support for {band_count}-band input."
            ),
            Self::GpuRequired => {
                "The selected model requires GPU acceleration, which was not detected.".into()
            }
            Self::NotCpuValidated => {
                "The selected model has not been validated on CPU-only hardware.".into()
            }
            Self::LicenseClass(class) => {
                format!("The selected model's license class is {class}.")
            }
            Self::ScaleUnsupported { scale } => {
                format!("The selected model does not declare scale factor x{scale}.")
            }
            Self::NotInstallable => {
                "The selected model has no published weights and cannot be installed.".into()
            }
        }
    }
}

/// Structured warning describing why an override is suboptimal.
///
/// This is data for the caller's UI, not an error; an empty concern list
/// means the override is as good as the recommendation.
#[derive(Debug, Clone, Serialize)]
pub struct OverrideWarning {
    pub model: String,
    pub concerns: Vec<OverrideConcern>,
}

impl OverrideWarning {
    pub fn is_clean(&self) -> bool {
        self.concerns.is_empty()
    }
}

/// Evaluate a caller-chosen model against the same rules the engine applies.
pub fn check_override(
    descriptor: &ModelDescriptor,
    assets: &[AssetMetadata],
    hardware: &HardwareProfile,
    scale: Option<u32>,
) -> OverrideWarning {
    let mut concerns = Vec::new();
    let mut ignored = Vec::new();
    let provider = dominant_provider(assets, &mut ignored);
    let band_count = known_band_count(assets, &mut ignored);

    if !descriptor.installable() {
        concerns.push(OverrideConcern::NotInstallable);
    }
    if !descriptor.supports_bands(band_count, provider) {
        concerns.push(OverrideConcern::BandMismatch { band_count });
    }
    if descriptor.gpu_required && !hardware.gpu_available {
        concerns.push(OverrideConcern::GpuRequired);
    }
    if !hardware.gpu_available && !descriptor.cpu_validated {
        concerns.push(OverrideConcern::NotCpuValidated);
    }
    if descriptor.license_class != LicenseClass::Permissive {
        concerns.push(OverrideConcern::LicenseClass(descriptor.license_class));
    }
    if let Some(scale) = scale {
        if !descriptor.supports_scale(scale) {
            concerns.push(OverrideConcern::ScaleUnsupported { scale });
        }
    }

    OverrideWarning {
        model: descriptor.name.clone(),
        concerns,
    }
}
