//! Asset metadata: the per-input facts every other component consumes.
//!
//! Absent fields stay absent (`None` / `Provider::Unknown`); downstream
//! components must never substitute silent guesses for them.

pub mod asset;
pub mod profile;
pub mod provider;
pub mod reader;

pub use asset::{
    format_preserves_metadata, normalize_format_label, AssetMetadata, BoundingBox, GridSignature,
    Provider,
};
pub use profile::{BandClass, ProfileStore, ProviderProfile, RgbMapping};
pub use provider::{detect_provider, DetectionConfidence, ProviderEvidence, ProviderMatch};
pub use reader::{expand_input_paths, FileMetadataReader, MetadataReader};
