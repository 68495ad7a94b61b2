//! Filename-token tile signals.
//!
//! Tile/grid tokens in file names are a weak, corroborating signal for
//! mosaic grouping. They are heuristic by nature — unrelated files can share
//! similar names — so the planner never groups on them alone.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

/// Grid position parsed from a file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileIndex {
    pub row: i64,
    pub col: i64,
    pub zoom: Option<i64>,
}

impl TileIndex {
    /// Manhattan-adjacent tiles in the same zoom group.
    pub fn adjacent_to(&self, other: &TileIndex) -> bool {
        if self.zoom != other.zoom {
            return false;
        }
        (self.row - other.row).abs() + (self.col - other.col).abs() == 1
    }
}

/// Pixel-space bounding box parsed from a file name (x, y, w, h).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameBounds {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

fn bbox_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)x(-?\d+)[^0-9]+y(-?\d+)[^0-9]+w(\d+)[^0-9]+h(\d+)").unwrap()
    })
}

fn grid_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // z12_x345_y678 / x345_y678_z12
            r"(?i)(?:^|[^a-z0-9])z(?P<zoom>\d+)[^a-z0-9]+x(?P<col>\d+)[^0-9]+y(?P<row>\d+)",
            r"(?i)(?:^|[^a-z0-9])x(?P<col>\d+)[^0-9]+y(?P<row>\d+)[^0-9]+z(?P<zoom>\d+)",
            // r1_c2 / row1_col2, both orders
            r"(?i)(?:^|[^a-z0-9])r(?:ow)?(?P<row>\d+)[^a-z0-9]+c(?:ol)?(?P<col>\d+)",
            r"(?i)(?:^|[^a-z0-9])c(?:ol)?(?P<col>\d+)[^a-z0-9]+r(?:ow)?(?P<row>\d+)",
            // tile_1_2
            r"(?i)(?:^|[^a-z0-9])tile[^0-9]*(?P<row>\d+)[^0-9]+(?P<col>\d+)",
            // bare x/y pair, weakest form
            r"(?i)(?:^|[^a-z0-9])x(?P<col>\d+)[^0-9]+y(?P<row>\d+)",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).unwrap())
        .collect()
    })
}

/// Parse a pixel bbox token from the file name, if present.
pub fn parse_bounds(path: &Path) -> Option<NameBounds> {
    let name = path.file_name()?.to_string_lossy();
    let captures = bbox_pattern().captures(&name)?;
    let bounds = NameBounds {
        x: captures[1].parse().ok()?,
        y: captures[2].parse().ok()?,
        w: captures[3].parse().ok()?,
        h: captures[4].parse().ok()?,
    };
    if bounds.w <= 0 || bounds.h <= 0 {
        return None;
    }
    Some(bounds)
}

/// Parse a grid index token from the file name, if present.
pub fn parse_tile_index(path: &Path) -> Option<TileIndex> {
    let name = path.file_name()?.to_string_lossy();
    for pattern in grid_patterns() {
        if let Some(captures) = pattern.captures(&name) {
            let row = captures.name("row")?.as_str().parse().ok()?;
            let col = captures.name("col")?.as_str().parse().ok()?;
            let zoom = captures
                .name("zoom")
                .and_then(|value| value.as_str().parse().ok());
            return Some(TileIndex { row, col, zoom });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_grid_index_forms() {
        let cases = [
            ("scene_r1_c2.tif", (1, 2)),
            ("scene_row3_col4.tif", (3, 4)),
            ("tile_5_6.tif", (5, 6)),
            ("mosaic_x7_y8.tif", (8, 7)),
        ];
        for (name, (row, col)) in cases {
            let index = parse_tile_index(&PathBuf::from(name)).unwrap();
            assert_eq!((index.row, index.col), (row, col), "{name}");
        }
    }

    #[test]
    fn test_zoom_grouping() {
        let a = parse_tile_index(&PathBuf::from("z12_x10_y20.png")).unwrap();
        let b = parse_tile_index(&PathBuf::from("z12_x10_y21.png")).unwrap();
        let c = parse_tile_index(&PathBuf::from("z13_x10_y21.png")).unwrap();
        assert_eq!(a.zoom, Some(12));
        assert!(a.adjacent_to(&b));
        assert!(!b.adjacent_to(&c));
    }

    #[test]
    fn test_bbox_token() {
        let bounds = parse_bounds(&PathBuf::from("chip_x100_y-50_w256_h256.tif")).unwrap();
        assert_eq!((bounds.x, bounds.y, bounds.w, bounds.h), (100, -50, 256, 256));
        assert!(parse_bounds(&PathBuf::from("chip_x1_y1_w0_h5.tif")).is_none());
    }

    #[test]
    fn test_plain_names_have_no_signal() {
        assert!(parse_tile_index(&PathBuf::from("overview.tif")).is_none());
        assert!(parse_bounds(&PathBuf::from("overview.tif")).is_none());
    }
}
