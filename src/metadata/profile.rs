//! Provider band profiles: user-maintained band semantics.
//!
//! A profile records which bands render as RGB and how each band resamples,
//! keyed by (provider, sensor). Profiles are persisted as JSON and mutated
//! only through explicit saves.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::metadata::asset::Provider;

/// Resampling class of one band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BandClass {
    /// Reflectance-like values; bilinear/cubic accumulation is valid
    Continuous,
    /// Class/mask values; nearest-neighbour only, no interpolation
    Categorical,
}

/// Zero-based band indexes rendered as red/green/blue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RgbMapping {
    pub red: u32,
    pub green: u32,
    pub blue: u32,
}

/// Band semantics for one (provider, sensor) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub provider: String,
    pub sensor: String,
    pub rgb: RgbMapping,
    /// Band index -> resampling class, for bands the user has classified.
    #[serde(default)]
    pub band_classes: BTreeMap<u32, BandClass>,
    pub updated_at: DateTime<Utc>,
}

/// JSON-backed store of provider profiles.
pub struct ProfileStore {
    path: PathBuf,
    profiles: HashMap<String, ProviderProfile>,
}

impl ProfileStore {
    /// Open the store, loading whatever is on disk; a missing or corrupt
    /// file yields an empty store rather than an error.
    pub fn open(path: PathBuf) -> Self {
        let profiles = load_profiles(&path);
        Self { path, profiles }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, provider: Provider, sensor: &str) -> Option<&ProviderProfile> {
        self.profiles.get(&profile_key(provider.label(), sensor))
    }

    /// Persist a profile. This is the only mutation path.
    pub fn save(&mut self, profile: ProviderProfile) -> Result<()> {
        let key = profile_key(&profile.provider, &profile.sensor);
        self.profiles.insert(key, profile);
        self.write()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(&self.profiles)?;
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, payload)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn load_profiles(path: &Path) -> HashMap<String, ProviderProfile> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return HashMap::new();
    };
    serde_json::from_str(&raw).unwrap_or_default()
}

fn profile_key(provider: &str, sensor: &str) -> String {
    let left = provider.trim().to_lowercase();
    let right = sensor.trim().to_lowercase();
    format!(
        "{}::{}",
        if left.is_empty() { "unknown-provider" } else { &left },
        if right.is_empty() { "unknown-sensor" } else { &right },
    )
}

/// Default RGB mapping for a provider when no saved profile exists.
///
/// `None` means the mapping is genuinely ambiguous and the user must define
/// a profile before RGB rendering.
pub fn default_rgb_mapping(provider: Provider, band_count: u32) -> Option<RgbMapping> {
    match band_count {
        0 => None,
        1 => Some(RgbMapping {
            red: 0,
            green: 0,
            blue: 0,
        }),
        2 => Some(RgbMapping {
            red: 0,
            green: 1,
            blue: 1,
        }),
        3 => Some(RgbMapping {
            red: 0,
            green: 1,
            blue: 2,
        }),
        _ => match provider {
            Provider::Sentinel2 | Provider::Landsat => Some(RgbMapping {
                red: 3,
                green: 2,
                blue: 1,
            }),
            Provider::PlanetScope => Some(RgbMapping {
                red: 2,
                green: 1,
                blue: 0,
            }),
            Provider::Vantor | Provider::TripleSat => Some(RgbMapping {
                red: 0,
                green: 1,
                blue: 2,
            }),
            _ => None,
        },
    }
}
