//! On-disk mosaic assembly through the external raster toolchain.

use std::path::{Path, PathBuf};
use std::process::Command;

use rand::Rng;
use serde::Serialize;

use crate::error::{Error, Result};

/// What a file-level stitch produced and which metadata fields the backing
/// toolchain could not guarantee. A non-empty `lost_fields` list becomes a
/// critical, non-blocking `PartialPreservation` warning in the run report.
#[derive(Debug, Clone, Serialize)]
pub struct StitchFileReport {
    pub output: PathBuf,
    pub lost_fields: Vec<String>,
}

/// Stitches rasters on disk. Implementations must preserve CRS and
/// geo-transform and itemize anything they drop.
pub trait RasterStitcher: Send + Sync {
    fn stitch(&self, inputs: &[PathBuf], output: &Path) -> Result<StitchFileReport>;
}

/// GDAL CLI backed stitcher: `gdalbuildvrt` + `gdal_translate`.
///
/// The VRT path carries CRS and geo-transform through; per-band metadata
/// tags are not guaranteed across `gdal_translate`, so they are reported as
/// lost rather than silently assumed preserved.
#[derive(Debug, Default)]
pub struct GdalCliStitcher;

impl RasterStitcher for GdalCliStitcher {
    fn stitch(&self, inputs: &[PathBuf], output: &Path) -> Result<StitchFileReport> {
        if inputs.is_empty() {
            return Err(Error::Validation(
                "no input rasters provided for stitching".into(),
            ));
        }
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let vrt_path = scratch_vrt_path();
        let build = run_tool(
            Command::new("gdalbuildvrt")
                .arg(&vrt_path)
                .args(inputs.iter()),
        );
        let result = build.and_then(|_| {
            run_tool(
                Command::new("gdal_translate")
                    .arg(&vrt_path)
                    .arg(output),
            )
        });
        let _ = std::fs::remove_file(&vrt_path);
        result?;

        Ok(StitchFileReport {
            output: output.to_path_buf(),
            lost_fields: vec!["per-band metadata tags".into()],
        })
    }
}

fn scratch_vrt_path() -> PathBuf {
    let token: u64 = rand::thread_rng().gen();
    std::env::temp_dir().join(format!("satlift-mosaic-{token:016x}.vrt"))
}

fn run_tool(command: &mut Command) -> Result<()> {
    let program = command.get_program().to_string_lossy().to_string();
    let output = command.output().map_err(|err| {
        Error::Execution(format!(
            "'{program}' is not available on this system: {err}"
        ))
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Execution(format!(
            "'{program}' failed: {}",
            stderr.trim()
        )));
    }
    Ok(())
}
