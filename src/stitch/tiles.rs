//! Pure in-memory mosaic assembly.
//!
//! Tiles are blitted onto the union grid without resampling; inputs must
//! already share a CRS, pixel size, and grid alignment. The transform is
//! (origin_x, origin_y, pixel_width, pixel_height) with x growing right and
//! y growing down.

use crate::error::{Error, Result};

/// One raster tile: band-major, row-major samples.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterTile {
    /// One `width * height` buffer per band.
    pub bands: Vec<Vec<f32>>,
    pub width: usize,
    pub height: usize,
    pub transform: (f64, f64, f64, f64),
    pub crs: Option<String>,
    pub band_names: Option<Vec<String>>,
    pub nodata: Option<f32>,
}

impl RasterTile {
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    fn validate(&self) -> Result<()> {
        if self.bands.is_empty() {
            return Err(Error::Validation("tile must contain at least one band".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::Validation("tile bands must be non-empty".into()));
        }
        let expected = self.width * self.height;
        if self.bands.iter().any(|band| band.len() != expected) {
            return Err(Error::Validation(
                "every band must hold width * height samples".into(),
            ));
        }
        if let Some(names) = &self.band_names {
            if names.len() != self.bands.len() {
                return Err(Error::Validation(
                    "band names length must match band count".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Stitch aligned tiles into one raster, preserving CRS, transform, band
/// names, and nodata. Overlapping samples must agree; conflicting overlap is
/// an error, not a silent overwrite.
pub fn stitch_tiles(tiles: &[RasterTile]) -> Result<RasterTile> {
    let Some(reference) = tiles.first() else {
        return Err(Error::Validation("no tiles supplied for stitching".into()));
    };
    reference.validate()?;

    let (_, _, pixel_width, pixel_height) = reference.transform;
    if pixel_width == 0.0 || pixel_height == 0.0 {
        return Err(Error::Validation("pixel size must be non-zero".into()));
    }

    let band_count = reference.band_count();
    let mut band_names = reference.band_names.clone();

    for tile in &tiles[1..] {
        tile.validate()?;
        if tile.transform.2 != pixel_width || tile.transform.3 != pixel_height {
            return Err(Error::Validation(
                "all tiles must share the same pixel size".into(),
            ));
        }
        if tile.crs != reference.crs {
            return Err(Error::Validation("all tiles must share the same CRS".into()));
        }
        if tile.band_count() != band_count {
            return Err(Error::Validation(
                "all tiles must share the same band count".into(),
            ));
        }
        match (&band_names, &tile.band_names) {
            (Some(expected), Some(actual)) if expected != actual => {
                return Err(Error::Validation(
                    "band names must match across tiles".into(),
                ));
            }
            (None, Some(actual)) => band_names = Some(actual.clone()),
            _ => {}
        }
        if tile.nodata != reference.nodata && tile.nodata.is_some() && reference.nodata.is_some() {
            return Err(Error::Validation(
                "all tiles must share the same nodata value".into(),
            ));
        }
    }

    let min_x = fold_min(tiles.iter().map(|tile| tile.transform.0));
    let min_y = fold_min(tiles.iter().map(|tile| tile.transform.1));
    let max_x = fold_max(
        tiles
            .iter()
            .map(|tile| tile.transform.0 + tile.width as f64 * pixel_width),
    );
    let max_y = fold_max(
        tiles
            .iter()
            .map(|tile| tile.transform.1 + tile.height as f64 * pixel_height),
    );

    let width = span_to_pixels(min_x, max_x, pixel_width)?;
    let height = span_to_pixels(min_y, max_y, pixel_height)?;

    let fill = reference.nodata.unwrap_or(0.0);
    let mut bands = vec![vec![fill; width * height]; band_count];

    for tile in tiles {
        let offset_x = offset_to_pixels(min_x, tile.transform.0, pixel_width)?;
        let offset_y = offset_to_pixels(min_y, tile.transform.1, pixel_height)?;
        blit(tile, &mut bands, width, offset_x, offset_y, fill)?;
    }

    Ok(RasterTile {
        bands,
        width,
        height,
        transform: (min_x, min_y, pixel_width, pixel_height),
        crs: reference.crs.clone(),
        band_names,
        nodata: reference.nodata,
    })
}

fn fold_min(values: impl Iterator<Item = f64>) -> f64 {
    values.fold(f64::INFINITY, f64::min)
}

fn fold_max(values: impl Iterator<Item = f64>) -> f64 {
    values.fold(f64::NEG_INFINITY, f64::max)
}

fn span_to_pixels(start: f64, end: f64, pixel_size: f64) -> Result<usize> {
    let span = (end - start) / pixel_size;
    let rounded = span.round();
    if (span - rounded).abs() > 1e-6 {
        return Err(Error::Validation(
            "tile extents do not align to the pixel grid".into(),
        ));
    }
    Ok(rounded as usize)
}

fn offset_to_pixels(origin: f64, value: f64, pixel_size: f64) -> Result<usize> {
    let offset = (value - origin) / pixel_size;
    let rounded = offset.round();
    if (offset - rounded).abs() > 1e-6 {
        return Err(Error::Validation(
            "tile offsets do not align to the pixel grid".into(),
        ));
    }
    Ok(rounded as usize)
}

fn blit(
    tile: &RasterTile,
    stitched: &mut [Vec<f32>],
    stitched_width: usize,
    offset_x: usize,
    offset_y: usize,
    fill: f32,
) -> Result<()> {
    for (band_index, band) in tile.bands.iter().enumerate() {
        let target = &mut stitched[band_index];
        for row in 0..tile.height {
            for col in 0..tile.width {
                let value = band[row * tile.width + col];
                let slot = (offset_y + row) * stitched_width + offset_x + col;
                let existing = target[slot];
                if existing != fill && existing != value {
                    return Err(Error::Validation(
                        "overlapping tiles contain conflicting values".into(),
                    ));
                }
                target[slot] = value;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(origin_x: f64, origin_y: f64, width: usize, height: usize, value: f32) -> RasterTile {
        RasterTile {
            bands: vec![vec![value; width * height]; 2],
            width,
            height,
            transform: (origin_x, origin_y, 10.0, 10.0),
            crs: Some("EPSG:32633".into()),
            band_names: Some(vec!["B04".into(), "B03".into()]),
            nodata: Some(0.0),
        }
    }

    #[test]
    fn test_side_by_side_stitch() {
        let left = tile(0.0, 0.0, 4, 4, 1.0);
        let right = tile(40.0, 0.0, 4, 4, 2.0);
        let stitched = stitch_tiles(&[left, right]).unwrap();

        assert_eq!(stitched.width, 8);
        assert_eq!(stitched.height, 4);
        assert_eq!(stitched.transform, (0.0, 0.0, 10.0, 10.0));
        assert_eq!(stitched.crs.as_deref(), Some("EPSG:32633"));
        assert_eq!(
            stitched.band_names.as_deref(),
            Some(&["B04".to_string(), "B03".to_string()][..])
        );
        assert_eq!(stitched.bands[0][0], 1.0);
        assert_eq!(stitched.bands[0][7], 2.0);
    }

    #[test]
    fn test_agreeing_overlap_is_allowed() {
        let a = tile(0.0, 0.0, 4, 4, 3.0);
        let b = tile(20.0, 0.0, 4, 4, 3.0);
        let stitched = stitch_tiles(&[a, b]).unwrap();
        assert_eq!(stitched.width, 6);
    }

    #[test]
    fn test_conflicting_overlap_rejected() {
        let a = tile(0.0, 0.0, 4, 4, 1.0);
        let b = tile(20.0, 0.0, 4, 4, 2.0);
        assert!(stitch_tiles(&[a, b]).is_err());
    }

    #[test]
    fn test_crs_mismatch_rejected() {
        let a = tile(0.0, 0.0, 4, 4, 1.0);
        let mut b = tile(40.0, 0.0, 4, 4, 2.0);
        b.crs = Some("EPSG:32634".into());
        assert!(stitch_tiles(&[a, b]).is_err());
    }

    #[test]
    fn test_misaligned_origin_rejected() {
        let a = tile(0.0, 0.0, 4, 4, 1.0);
        let b = tile(43.0, 0.0, 4, 4, 2.0);
        assert!(stitch_tiles(&[a, b]).is_err());
    }

    #[test]
    fn test_gap_filled_with_nodata() {
        let a = tile(0.0, 0.0, 2, 2, 1.0);
        let b = tile(40.0, 0.0, 2, 2, 2.0);
        let stitched = stitch_tiles(&[a, b]).unwrap();
        assert_eq!(stitched.width, 6);
        // Column 2..4 is the gap between the tiles.
        assert_eq!(stitched.bands[0][2], 0.0);
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(stitch_tiles(&[]).is_err());
    }
}
