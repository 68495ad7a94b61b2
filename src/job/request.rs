//! Run requests: the confirmed unit of work.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metadata::{format_preserves_metadata, AssetMetadata};
use crate::registry::ModelCatalog;
use crate::stitch::StitchGroup;

/// Requested compute mode. `SafeMode` additionally disables advanced
/// options at job start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputeMode {
    Auto,
    Gpu,
    Cpu,
    SafeMode,
}

impl ComputeMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Auto => "Auto",
            Self::Gpu => "GPU",
            Self::Cpu => "CPU",
            Self::SafeMode => "Safe Mode",
        }
    }
}

/// Requested output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    GeoTiff,
    Png,
    Jpeg,
    MatchInput,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "geotiff" | "tif" | "tiff" => Ok(Self::GeoTiff),
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "match" | "match-input" | "match input" => Ok(Self::MatchInput),
            other => Err(Error::Validation(format!("unknown output format '{other}'"))),
        }
    }

    pub fn extension_for(&self, input: &Path) -> String {
        match self {
            Self::GeoTiff => "tif".into(),
            Self::Png => "png".into(),
            Self::Jpeg => "jpg".into(),
            Self::MatchInput => input
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .unwrap_or_else(|| "tif".into()),
        }
    }

    /// Whether this output can carry the input's geospatial metadata.
    pub fn preserves_metadata(&self, input_format: Option<&str>) -> bool {
        match self {
            Self::GeoTiff => true,
            Self::Png | Self::Jpeg => false,
            Self::MatchInput => format_preserves_metadata(input_format),
        }
    }
}

/// Caller-selected run options; `None` means use the recommendation or the
/// model defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    pub scale: Option<u32>,
    pub tiling: Option<String>,
    pub precision: Option<String>,
}

/// One unit of work inside a job. Units execute strictly in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunUnit {
    /// One asset through the request's model
    Asset(AssetMetadata),
    /// One stitch group: members are mosaicked, then upscaled as one raster
    Group {
        group: StitchGroup,
        assets: Vec<AssetMetadata>,
    },
    /// Comparison leg: this asset through this specific model
    Compare { asset: AssetMetadata, model: String },
}

impl RunUnit {
    pub fn label(&self) -> String {
        match self {
            Self::Asset(asset) => asset.asset_id(),
            Self::Group { group, .. } => format!(
                "mosaic[{}]",
                group.asset_ids.first().cloned().unwrap_or_default()
            ),
            Self::Compare { asset, model } => format!("{} via {model}", asset.asset_id()),
        }
    }
}

/// The confirmed unit of work. Immutable once a job is created from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub units: Vec<RunUnit>,
    pub model: String,
    pub options: RunOptions,
    pub compute: ComputeMode,
    pub output_format: OutputFormat,
    pub output_dir: PathBuf,
}

impl RunRequest {
    pub fn batch(
        units: Vec<RunUnit>,
        model: impl Into<String>,
        options: RunOptions,
        compute: ComputeMode,
        output_format: OutputFormat,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            units,
            model: model.into(),
            options,
            compute,
            output_format,
            output_dir,
        }
    }

    /// Comparison request: exactly one asset, up to two models, one unit per
    /// model within a single job.
    pub fn comparison(
        asset: AssetMetadata,
        models: &[String],
        options: RunOptions,
        compute: ComputeMode,
        output_format: OutputFormat,
        output_dir: PathBuf,
    ) -> Result<Self> {
        if models.is_empty() || models.len() > 2 {
            return Err(Error::Validation(
                "comparison runs take one or two models".into(),
            ));
        }
        let units = models
            .iter()
            .map(|model| RunUnit::Compare {
                asset: asset.clone(),
                model: model.clone(),
            })
            .collect();
        Ok(Self {
            units,
            model: models[0].clone(),
            options,
            compute,
            output_format,
            output_dir,
        })
    }

    pub fn is_comparison(&self) -> bool {
        self.units
            .iter()
            .any(|unit| matches!(unit, RunUnit::Compare { .. }))
    }

    /// Validation that must pass before a job is created.
    pub fn validate(&self, catalog: &ModelCatalog) -> Result<()> {
        if self.units.is_empty() {
            return Err(Error::Validation("request contains no units".into()));
        }
        let mut models: Vec<&str> = vec![self.model.as_str()];
        for unit in &self.units {
            if let RunUnit::Compare { model, .. } = unit {
                models.push(model.as_str());
            }
        }
        for model in models {
            let descriptor = catalog
                .get(model)
                .ok_or_else(|| Error::Validation(format!("unknown model '{model}'")))?;
            if let Some(scale) = self.options.scale {
                if !descriptor.supports_scale(scale) {
                    return Err(Error::Validation(format!(
                        "model '{}' does not support scale factor x{scale}",
                        descriptor.name
                    )));
                }
            }
        }
        for unit in &self.units {
            if let RunUnit::Group { group, .. } = unit {
                let reasons = group.blocking_reasons();
                if !reasons.is_empty() {
                    return Err(Error::Validation(format!(
                        "stitch group is not executable: {}",
                        reasons.join("; ")
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Provider;
    use crate::registry::ModelCatalog;

    fn asset(name: &str) -> AssetMetadata {
        let mut asset = AssetMetadata::unknown(PathBuf::from(format!("/data/{name}.tif")));
        asset.provider = Provider::Sentinel2;
        asset.band_count = Some(4);
        asset
    }

    #[test]
    fn test_batch_request_validates_model_and_scale() {
        let catalog = ModelCatalog::builtin();
        let request = RunRequest::batch(
            vec![RunUnit::Asset(asset("a"))],
            "S2DR3",
            RunOptions {
                scale: Some(4),
                ..Default::default()
            },
            ComputeMode::Auto,
            OutputFormat::GeoTiff,
            PathBuf::from("/out"),
        );
        request.validate(&catalog).unwrap();

        let bad_scale = RunRequest {
            options: RunOptions {
                scale: Some(3),
                ..Default::default()
            },
            ..request.clone()
        };
        assert!(bad_scale.validate(&catalog).is_err());

        let bad_model = RunRequest {
            model: "NoSuchModel".into(),
            ..request
        };
        assert!(bad_model.validate(&catalog).is_err());
    }

    #[test]
    fn test_comparison_takes_at_most_two_models() {
        let models: Vec<String> = vec!["S2DR3".into(), "SEN2SR".into(), "Satlas".into()];
        assert!(RunRequest::comparison(
            asset("a"),
            &models,
            RunOptions::default(),
            ComputeMode::Auto,
            OutputFormat::Png,
            PathBuf::from("/out"),
        )
        .is_err());

        let request = RunRequest::comparison(
            asset("a"),
            &models[..2],
            RunOptions::default(),
            ComputeMode::Auto,
            OutputFormat::Png,
            PathBuf::from("/out"),
        )
        .unwrap();
        assert!(request.is_comparison());
        assert_eq!(request.units.len(), 2);
    }

    #[test]
    fn test_output_format_semantics() {
        assert!(OutputFormat::GeoTiff.preserves_metadata(Some("GeoTIFF")));
        assert!(!OutputFormat::Png.preserves_metadata(Some("GeoTIFF")));
        assert!(OutputFormat::MatchInput.preserves_metadata(Some("GeoTIFF")));
        assert!(!OutputFormat::MatchInput.preserves_metadata(Some("PNG")));
        assert_eq!(
            OutputFormat::MatchInput.extension_for(Path::new("in.JP2")),
            "jp2"
        );
        assert_eq!(OutputFormat::Jpeg.extension_for(Path::new("in.tif")), "jpg");
    }

    #[test]
    fn test_empty_request_is_invalid() {
        let catalog = ModelCatalog::builtin();
        let request = RunRequest::batch(
            Vec::new(),
            "Satlas",
            RunOptions::default(),
            ComputeMode::Auto,
            OutputFormat::GeoTiff,
            PathBuf::from("/out"),
        );
        assert!(matches!(
            request.validate(&catalog),
            Err(Error::Validation(_))
        ));
    }
}
