//! Dry-run estimation: runtime and VRAM projections without inference.
//!
//! Pure cost heuristics over metadata and the model descriptor. Never
//! touches model runtime state and performs no IO.

use serde::Serialize;

use crate::defaults::{
    BASE_CPU_SECONDS_PER_MEGAPIXEL, BASE_GPU_SECONDS_PER_MEGAPIXEL, DEFAULT_TILE_SIZE,
};
use crate::error::{Error, Result};
use crate::hardware::HardwareProfile;
use crate::job::request::{ComputeMode, RunRequest, RunUnit};
use crate::metadata::AssetMetadata;
use crate::registry::ModelCatalog;

/// Per-model runtime multiplier relative to the base cost.
const RUNTIME_MULTIPLIERS: [(&str, f64); 12] = [
    ("Real-ESRGAN", 1.0),
    ("Satlas", 0.9),
    ("SwinIR", 1.1),
    ("SRGAN-EO", 1.2),
    ("SatelliteSR", 1.15),
    ("SEN2SR", 1.1),
    ("S2DR3", 1.25),
    ("DSen2", 1.3),
    ("LDSR-S2", 1.2),
    ("SenGLEAN", 1.4),
    ("Swin2-MoSE", 1.35),
    ("MRDAM", 1.05),
];

/// Per-model resident VRAM overhead in GB.
const VRAM_OVERHEAD_GB: [(&str, f64); 12] = [
    ("Real-ESRGAN", 0.6),
    ("Satlas", 0.7),
    ("SwinIR", 0.8),
    ("SRGAN-EO", 0.9),
    ("SatelliteSR", 0.9),
    ("SEN2SR", 1.0),
    ("S2DR3", 1.2),
    ("DSen2", 1.1),
    ("LDSR-S2", 1.0),
    ("SenGLEAN", 1.4),
    ("Swin2-MoSE", 1.3),
    ("MRDAM", 0.8),
];

const ACTIVATION_MULTIPLIER: f64 = 1.8;
const ASSUMED_EDGE: u32 = 1024;

#[derive(Debug, Clone, Serialize)]
pub struct Estimate {
    pub runtime_seconds: f64,
    pub vram_gb: f64,
    pub notes: Vec<String>,
}

/// Estimate runtime and VRAM for a request before anything runs.
pub fn dry_run(
    request: &RunRequest,
    catalog: &ModelCatalog,
    hardware: &HardwareProfile,
) -> Result<Estimate> {
    if request.units.is_empty() {
        return Err(Error::Validation("request contains no units".into()));
    }

    let mut notes = Vec::new();
    let mut runtime_seconds = 0.0_f64;
    let mut vram_gb = 0.0_f64;
    let mut any_assumed = false;

    for unit in &request.units {
        let model = match unit {
            RunUnit::Compare { model, .. } => model.as_str(),
            _ => request.model.as_str(),
        };
        let descriptor = catalog
            .get(model)
            .ok_or_else(|| Error::Validation(format!("unknown model '{model}'")))?;

        let scale = request
            .options
            .scale
            .or(descriptor.default_options.scale)
            .or_else(|| descriptor.scales.first().copied())
            .unwrap_or(2);
        if scale == 0 {
            return Err(Error::Validation("scale must be positive".into()));
        }

        let (width, height, band_count, assumed) = unit_dimensions(unit);
        any_assumed |= assumed;

        let precision = request
            .options
            .precision
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_else(|| "fp32".into());
        let precision = match precision.as_str() {
            "fp16" | "fp32" => precision,
            _ => {
                notes.push("Precision override invalid; estimating with fp32.".into());
                "fp32".into()
            }
        };

        let gpu = uses_gpu(request.compute, hardware);
        let tiling = request.options.tiling.is_some();

        let base_seconds = if gpu {
            BASE_GPU_SECONDS_PER_MEGAPIXEL
        } else {
            BASE_CPU_SECONDS_PER_MEGAPIXEL
        };
        let precision_factor = if precision == "fp16" && gpu { 0.85 } else { 1.0 };
        let tiling_factor = if tiling { 1.25 } else { 1.0 };
        let band_factor = (band_count as f64 / 3.0).max(1.0);
        let scale_factor = (scale as f64).powi(2);
        let megapixels = (width as f64 * height as f64) / 1_000_000.0;

        runtime_seconds += (base_seconds
            * megapixels
            * scale_factor
            * band_factor
            * lookup(&RUNTIME_MULTIPLIERS, model, 1.0)
            * tiling_factor
            * precision_factor)
            .max(0.0)
            + 2.0;

        if gpu {
            let bytes_per_value: f64 = if precision == "fp16" { 2.0 } else { 4.0 };
            let (tile_width, tile_height) = if tiling {
                (width.min(DEFAULT_TILE_SIZE), height.min(DEFAULT_TILE_SIZE))
            } else {
                (width, height)
            };
            let input_bytes =
                tile_width as f64 * tile_height as f64 * band_count as f64 * bytes_per_value;
            let output_bytes = input_bytes * scale_factor;
            let mut overhead = lookup(&VRAM_OVERHEAD_GB, model, 0.8);
            if band_count > 3 {
                overhead += 0.2;
            }
            let unit_vram =
                (input_bytes + output_bytes) * ACTIVATION_MULTIPLIER / (1024_f64.powi(3)) + overhead;
            vram_gb = vram_gb.max(unit_vram);
        }
    }

    if any_assumed {
        notes.push(format!(
            "Some input dimensions are unknown; estimated at {ASSUMED_EDGE}x{ASSUMED_EDGE}."
        ));
    }
    if !uses_gpu(request.compute, hardware) {
        notes.push("GPU not in use; VRAM estimate is 0 GB.".into());
    } else if vram_gb > hardware.vram_gb as f64 {
        notes.push("Estimated VRAM exceeds available GPU memory.".into());
    }

    Ok(Estimate {
        runtime_seconds: runtime_seconds.max(1.0),
        vram_gb,
        notes,
    })
}

fn uses_gpu(compute: ComputeMode, hardware: &HardwareProfile) -> bool {
    match compute {
        ComputeMode::Gpu => true,
        ComputeMode::Cpu | ComputeMode::SafeMode => false,
        ComputeMode::Auto => hardware.gpu_available,
    }
}

fn unit_dimensions(unit: &RunUnit) -> (u32, u32, u32, bool) {
    match unit {
        RunUnit::Asset(asset) | RunUnit::Compare { asset, .. } => asset_dimensions(asset),
        RunUnit::Group { group, assets } => {
            if let (Some(extent), Some(grid)) = (&group.target_extent, &group.target_grid) {
                let width = (extent.width() / grid.pixel_width.abs()).round().abs() as u32;
                let height = (extent.height() / grid.pixel_height.abs()).round().abs() as u32;
                if width > 0 && height > 0 {
                    let bands = assets
                        .iter()
                        .filter_map(|asset| asset.band_count)
                        .max()
                        .unwrap_or(3);
                    return (width, height, bands, false);
                }
            }
            (ASSUMED_EDGE, ASSUMED_EDGE, 3, true)
        }
    }
}

fn asset_dimensions(asset: &AssetMetadata) -> (u32, u32, u32, bool) {
    match (asset.width, asset.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => {
            (width, height, asset.band_count.unwrap_or(3), false)
        }
        _ => (ASSUMED_EDGE, ASSUMED_EDGE, asset.band_count.unwrap_or(3), true),
    }
}

fn lookup(table: &[(&str, f64)], model: &str, fallback: f64) -> f64 {
    table
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, value)| *value)
        .unwrap_or(fallback)
}
