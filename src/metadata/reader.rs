//! Metadata reader interface and the built-in header sniffer.
//!
//! The built-in reader establishes what it can from magic bytes and filename
//! evidence: container format, pixel dimensions, provider, sensor, scene id,
//! acquisition time. Driver-level fields (CRS, geotransform, per-band tags)
//! come from an external reader implementation; here they stay `None`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::Result;
use crate::metadata::asset::{AssetMetadata, Provider};
use crate::metadata::provider::{detect_provider, infer_sensor};

/// Produces `AssetMetadata` for an input file. Implementations may leave
/// fields absent; absent never means a guessed default.
pub trait MetadataReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<AssetMetadata>;
}

/// Header- and filename-based metadata reader.
#[derive(Debug, Default)]
pub struct FileMetadataReader;

impl MetadataReader for FileMetadataReader {
    fn read(&self, path: &Path) -> Result<AssetMetadata> {
        let mut asset = AssetMetadata::unknown(path.to_path_buf());

        let evidence = detect_provider(path);
        if let Some(provider) = evidence.best {
            asset.provider = provider;
            asset.sensor = infer_sensor(path, provider);
        }

        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        asset.scene_id = infer_scene_id(&stem, asset.provider);
        asset.acquisition_time = infer_acquisition_time(&stem);

        if let Ok(mut file) = File::open(path) {
            if let Some(header) = sniff_header(&mut file) {
                asset.format = Some(header.format.to_string());
                asset.width = header.width;
                asset.height = header.height;
            }
        }

        Ok(asset)
    }
}

struct HeaderInfo {
    format: &'static str,
    width: Option<u32>,
    height: Option<u32>,
}

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
const JP2_SIGNATURE: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0c, b'j', b'P', b' ', b' ', b'\r', b'\n', 0x87, b'\n',
];

fn sniff_header(file: &mut File) -> Option<HeaderInfo> {
    let mut head = [0u8; 32];
    let read = file.read(&mut head).ok()?;
    let head = &head[..read];

    if head.starts_with(&PNG_SIGNATURE) {
        return parse_png(head);
    }
    if head.starts_with(&[0xff, 0xd8]) {
        return parse_jpeg(file);
    }
    if head.starts_with(b"II*\x00") || head.starts_with(b"MM\x00*") {
        return parse_tiff(file, head);
    }
    if head.starts_with(b"II+\x00") || head.starts_with(b"MM\x00+") {
        // BigTIFF: recognized but dimensions left unknown.
        return Some(HeaderInfo {
            format: "TIFF",
            width: None,
            height: None,
        });
    }
    if head.starts_with(&JP2_SIGNATURE) {
        return Some(HeaderInfo {
            format: "JP2",
            width: None,
            height: None,
        });
    }
    None
}

fn parse_png(head: &[u8]) -> Option<HeaderInfo> {
    if head.len() < 24 || &head[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(head[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(head[20..24].try_into().ok()?);
    Some(HeaderInfo {
        format: "PNG",
        width: Some(width),
        height: Some(height),
    })
}

fn parse_jpeg(file: &mut File) -> Option<HeaderInfo> {
    // Walk segment markers until a start-of-frame carries the dimensions.
    const SOF_MARKERS: [u8; 13] = [
        0xc0, 0xc1, 0xc2, 0xc3, 0xc5, 0xc6, 0xc7, 0xc9, 0xca, 0xcb, 0xcd, 0xce, 0xcf,
    ];
    file.seek(SeekFrom::Start(2)).ok()?;
    loop {
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte).ok()?;
        if byte[0] != 0xff {
            continue;
        }
        let mut marker = [0u8; 1];
        file.read_exact(&mut marker).ok()?;
        while marker[0] == 0xff {
            file.read_exact(&mut marker).ok()?;
        }
        match marker[0] {
            0xd8 | 0xd9 => continue,
            0xda => return None,
            value => {
                let mut length_bytes = [0u8; 2];
                file.read_exact(&mut length_bytes).ok()?;
                let length = u16::from_be_bytes(length_bytes);
                if length < 2 {
                    return None;
                }
                if SOF_MARKERS.contains(&value) {
                    let mut sof = vec![0u8; (length - 2) as usize];
                    file.read_exact(&mut sof).ok()?;
                    if sof.len() < 5 {
                        return None;
                    }
                    let height = u16::from_be_bytes([sof[1], sof[2]]) as u32;
                    let width = u16::from_be_bytes([sof[3], sof[4]]) as u32;
                    return Some(HeaderInfo {
                        format: "JPEG",
                        width: Some(width),
                        height: Some(height),
                    });
                }
                file.seek(SeekFrom::Current((length - 2) as i64)).ok()?;
            }
        }
    }
}

const GEO_TAGS: [u16; 5] = [33550, 33922, 34735, 34736, 34737];

fn parse_tiff(file: &mut File, head: &[u8]) -> Option<HeaderInfo> {
    let little_endian = head.starts_with(b"II");
    let offset = read_u32(&head[4..8], little_endian)? as u64;
    file.seek(SeekFrom::Start(offset)).ok()?;

    let mut count_bytes = [0u8; 2];
    file.read_exact(&mut count_bytes).ok()?;
    let entry_count = read_u16(&count_bytes, little_endian)?;

    let mut width = None;
    let mut height = None;
    let mut geo = false;

    for _ in 0..entry_count {
        let mut entry = [0u8; 12];
        if file.read_exact(&mut entry).is_err() {
            break;
        }
        let tag = read_u16(&entry[0..2], little_endian)?;
        let field_type = read_u16(&entry[2..4], little_endian)?;
        if GEO_TAGS.contains(&tag) {
            geo = true;
        }
        if tag == 256 || tag == 257 {
            // SHORT (3) or LONG (4), value inlined in the entry.
            let value = match field_type {
                3 => read_u16(&entry[8..10], little_endian)? as u32,
                4 => read_u32(&entry[8..12], little_endian)?,
                _ => continue,
            };
            if tag == 256 {
                width = Some(value);
            } else {
                height = Some(value);
            }
        }
    }

    Some(HeaderInfo {
        format: if geo { "GeoTIFF" } else { "TIFF" },
        width,
        height,
    })
}

fn read_u16(bytes: &[u8], little_endian: bool) -> Option<u16> {
    let array: [u8; 2] = bytes.get(0..2)?.try_into().ok()?;
    Some(if little_endian {
        u16::from_le_bytes(array)
    } else {
        u16::from_be_bytes(array)
    })
}

fn read_u32(bytes: &[u8], little_endian: bool) -> Option<u32> {
    let array: [u8; 4] = bytes.get(0..4)?.try_into().ok()?;
    Some(if little_endian {
        u32::from_le_bytes(array)
    } else {
        u32::from_be_bytes(array)
    })
}

/// File suffixes accepted as imagery inputs.
pub const SUPPORTED_INPUT_SUFFIXES: [&str; 6] = ["tif", "tiff", "jp2", "png", "jpg", "jpeg"];

/// Expand files and directories into a deduplicated, ordered input list.
/// Directories are walked recursively for supported imagery suffixes.
pub fn expand_input_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut expanded = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for candidate in paths {
        if candidate.is_dir() {
            let mut children: Vec<PathBuf> = walkdir::WalkDir::new(candidate)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| {
                    path.extension()
                        .map(|ext| {
                            SUPPORTED_INPUT_SUFFIXES
                                .contains(&ext.to_string_lossy().to_lowercase().as_str())
                        })
                        .unwrap_or(false)
                })
                .collect();
            children.sort();
            for child in children {
                if seen.insert(child.clone()) {
                    expanded.push(child);
                }
            }
            continue;
        }
        if seen.insert(candidate.clone()) {
            expanded.push(candidate.clone());
        }
    }
    expanded
}

fn datetime_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(20\d{2})(\d{2})(\d{2})[T_](\d{2})(\d{2})(\d{2})(Z|z)?").unwrap(),
            Regex::new(r"(20\d{2})[-_](\d{2})[-_](\d{2})[T_](\d{2})[-_]?(\d{2})[-_]?(\d{2})(Z|z)?")
                .unwrap(),
        ]
    })
}

fn date_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(20\d{2})(\d{2})(\d{2})").unwrap(),
            Regex::new(r"(20\d{2})[-_](\d{2})[-_](\d{2})").unwrap(),
        ]
    })
}

/// ISO-8601 acquisition time recovered from filename tokens, if any.
pub fn infer_acquisition_time(stem: &str) -> Option<String> {
    for pattern in datetime_patterns() {
        if let Some(captures) = pattern.captures(stem) {
            let suffix = if captures.get(7).is_some() { "Z" } else { "" };
            return Some(format!(
                "{}-{}-{}T{}:{}:{}{}",
                &captures[1], &captures[2], &captures[3], &captures[4], &captures[5], &captures[6],
                suffix
            ));
        }
    }
    for pattern in date_patterns() {
        if let Some(captures) = pattern.captures(stem) {
            return Some(format!(
                "{}-{}-{}",
                &captures[1], &captures[2], &captures[3]
            ));
        }
    }
    None
}

fn scene_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(
                r"(?i)(S2[ABC]_[A-Z0-9]{4,}_[0-9]{8}T[0-9]{6}_[A-Z0-9]{3,}_[A-Z0-9]{4}_[A-Z0-9]{5,6}_[0-9]{8}T[0-9]{6})",
            )
            .unwrap(),
            Regex::new(r"(?i)(L[COTEM]\d{2}_[A-Z0-9_]{20,})").unwrap(),
            Regex::new(r"(?i)(\d{8}_\d{6}_\d{2}_[0-9A-Z]{2,4})").unwrap(),
        ]
    })
}

fn suffix_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)[_\-]B\d{1,2}A?$",
            r"(?i)[_\-]TCI$",
            r"(?i)[_\-]VISUAL$",
            r"(?i)[_\-]ANALYTIC(?:MS)?$",
            r"(?i)[_\-]UDM2?$",
            r"(?i)[_\-]R\d+[_\-]C\d+$",
            r"(?i)[_\-]X\d+[_\-]Y\d+$",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).unwrap())
        .collect()
    })
}

/// Scene identifier recovered from the filename, if any.
///
/// Tile/band suffixes are stripped first so sibling tiles of one scene
/// resolve to the same id.
pub fn infer_scene_id(stem: &str, provider: Provider) -> Option<String> {
    let cleaned = strip_scene_suffixes(stem);
    let patterns = scene_patterns();

    let preferred = match provider {
        Provider::Sentinel2 => Some(&patterns[0]),
        Provider::Landsat => Some(&patterns[1]),
        Provider::PlanetScope => Some(&patterns[2]),
        _ => None,
    };
    if let Some(pattern) = preferred {
        if let Some(captures) = pattern.captures(&cleaned) {
            return Some(captures[1].to_string());
        }
    }
    for pattern in patterns {
        if let Some(captures) = pattern.captures(&cleaned) {
            return Some(captures[1].to_string());
        }
    }
    if cleaned.len() >= 12 && cleaned.contains('_') && cleaned.chars().any(|ch| ch.is_ascii_digit())
    {
        return Some(cleaned);
    }
    None
}

fn strip_scene_suffixes(stem: &str) -> String {
    let mut current = stem.to_string();
    for _ in 0..4 {
        let previous = current.clone();
        for pattern in suffix_patterns() {
            current = pattern.replace(&current, "").into_owned();
        }
        if current == previous {
            break;
        }
    }
    current.trim_matches(['_', '-']).to_string()
}
