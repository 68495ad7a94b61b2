//! Asset metadata model.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Satellite data providers this build knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    Sentinel2,
    PlanetScope,
    Landsat,
    Vantor,
    TripleSat,
    MeteoCloud,
    Unknown,
}

impl Provider {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sentinel2 => "Sentinel-2",
            Self::PlanetScope => "PlanetScope",
            Self::Landsat => "Landsat",
            Self::Vantor => "Vantor",
            Self::TripleSat => "TripleSat",
            Self::MeteoCloud => "MeteoCloud",
            Self::Unknown => "Unknown",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "sentinel-2" | "sentinel2" => Self::Sentinel2,
            "planetscope" => Self::PlanetScope,
            "landsat" => Self::Landsat,
            "vantor" | "worldview" => Self::Vantor,
            "triplesat" | "21at" => Self::TripleSat,
            "meteocloud" => Self::MeteoCloud,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Axis-aligned spatial extent in the asset's CRS units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Strictly positive interior overlap on both axes.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        let overlap_x = self.max_x.min(other.max_x) - self.min_x.max(other.min_x);
        let overlap_y = self.max_y.min(other.max_y) - self.min_y.max(other.min_y);
        overlap_x > 0.0 && overlap_y > 0.0
    }

    /// Shares an edge within `tolerance`: the boxes touch on one axis while
    /// overlapping on the other.
    pub fn touches_edge(&self, other: &BoundingBox, tolerance: f64) -> bool {
        let overlap_x = self.max_x.min(other.max_x) - self.min_x.max(other.min_x);
        let overlap_y = self.max_y.min(other.max_y) - self.min_y.max(other.min_y);

        let touch_x = (self.max_x - other.min_x).abs() <= tolerance
            || (other.max_x - self.min_x).abs() <= tolerance;
        let touch_y = (self.max_y - other.min_y).abs() <= tolerance
            || (other.max_y - self.min_y).abs() <= tolerance;

        (touch_x && overlap_y > 0.0) || (touch_y && overlap_x > 0.0)
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }
}

/// CRS + pixel-grid identity of a raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSignature {
    pub crs: String,
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GridSignature {
    /// Same CRS, same pixel size within tolerance, origins offset by an
    /// integer number of pixels.
    pub fn compatible_with(&self, other: &GridSignature, tolerance: f64) -> bool {
        if self.crs != other.crs {
            return false;
        }
        if !self.same_spacing(other, tolerance) {
            return false;
        }
        aligned(self.origin_x, other.origin_x, self.pixel_width, tolerance)
            && aligned(self.origin_y, other.origin_y, self.pixel_height, tolerance)
    }

    pub fn same_spacing(&self, other: &GridSignature, tolerance: f64) -> bool {
        relative_eq(self.pixel_width, other.pixel_width, tolerance)
            && relative_eq(self.pixel_height, other.pixel_height, tolerance)
    }
}

fn aligned(a: f64, b: f64, spacing: f64, tolerance: f64) -> bool {
    if spacing == 0.0 {
        return false;
    }
    let offset = (a - b) / spacing;
    (offset - offset.round()).abs() <= tolerance
}

fn relative_eq(a: f64, b: f64, tolerance: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= tolerance * scale
}

/// Everything known about one input file. Immutable once produced by the
/// metadata reader; fields the reader could not establish stay `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub path: PathBuf,
    pub provider: Provider,
    pub sensor: Option<String>,
    pub scene_id: Option<String>,
    pub format: Option<String>,
    pub band_count: Option<u32>,
    pub band_names: Option<Vec<String>>,
    pub pixel_size_m: Option<f64>,
    pub crs: Option<String>,
    pub grid: Option<GridSignature>,
    pub extent: Option<BoundingBox>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub acquisition_time: Option<String>,
    pub nodata: Option<f64>,
    pub dtype: Option<String>,
}

impl AssetMetadata {
    /// Bare-bones metadata for a path; every derived field unknown.
    pub fn unknown(path: PathBuf) -> Self {
        Self {
            path,
            provider: Provider::Unknown,
            sensor: None,
            scene_id: None,
            format: None,
            band_count: None,
            band_names: None,
            pixel_size_m: None,
            crs: None,
            grid: None,
            extent: None,
            width: None,
            height: None,
            acquisition_time: None,
            nodata: None,
            dtype: None,
        }
    }

    /// Stable identifier: the scene id when known, else the file stem.
    pub fn asset_id(&self) -> String {
        if let Some(scene_id) = &self.scene_id {
            return scene_id.clone();
        }
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string_lossy().to_string())
    }

    pub fn is_geospatial(&self) -> bool {
        format_preserves_metadata(self.format.as_deref())
    }

    /// Geospatial fields that could not be established for this asset.
    pub fn preservation_gaps(&self) -> Vec<&'static str> {
        if !self.is_geospatial() {
            return Vec::new();
        }
        let mut gaps = Vec::new();
        if self.crs.is_none() {
            gaps.push("CRS");
        }
        if self.grid.is_none() {
            gaps.push("geotransform");
        }
        if self.band_count.is_none() {
            gaps.push("band_count");
        }
        if self.band_names.is_none() {
            gaps.push("band_names");
        }
        if self.dtype.is_none() {
            gaps.push("dtype");
        }
        gaps
    }
}

const GEOSPATIAL_FORMATS: [&str; 5] = ["GEOTIFF", "TIFF", "TIF", "JP2", "JPEG2000"];

/// Canonicalize a container format label; `None` for unknown/non-image.
pub fn normalize_format_label(label: Option<&str>) -> Option<String> {
    let normalized = label?.trim().to_uppercase();
    if normalized.is_empty() || normalized == "UNKNOWN" || normalized == "NOT AN IMAGE" {
        return None;
    }
    if normalized == "JPG" {
        return Some("JPEG".into());
    }
    Some(normalized)
}

/// Whether a container format carries geospatial metadata through a write.
pub fn format_preserves_metadata(label: Option<&str>) -> bool {
    match normalize_format_label(label) {
        Some(normalized) => GEOSPATIAL_FORMATS.contains(&normalized.as_str()),
        None => false,
    }
}
