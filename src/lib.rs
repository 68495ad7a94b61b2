//! Satlift - orchestration core for local satellite-imagery super-resolution.
//!
//! Satlift decides which SR model fits an input set, plans how tiles combine
//! into mosaics, drives a strictly sequential job pipeline with cancellation
//! and fallback policy, and manages the lifecycle of each model's isolated
//! runtime environment. Pixel IO and the model runtimes themselves live
//! behind external adapter interfaces.

pub mod defaults;
pub mod error;
pub mod logging;

pub mod env;
pub mod exec;
pub mod hardware;
pub mod job;
pub mod metadata;
pub mod recommend;
pub mod registry;
pub mod stitch;

pub use error::{Error, ErrorClass, Result, UserReport};

pub use registry::{DefaultOptions, LicenseClass, ModelCatalog, ModelDescriptor};

pub use metadata::{
    detect_provider, expand_input_paths, AssetMetadata, BandClass, BoundingBox,
    DetectionConfidence, FileMetadataReader, GridSignature, MetadataReader, ProfileStore, Provider,
    ProviderProfile,
};

pub use hardware::{detect_hardware, HardwareProfile};

pub use recommend::{
    check_override, recommend, Candidate, Confidence, OverrideConcern, OverrideWarning, Precision,
    RecommendationResult,
};

pub use stitch::{
    plan, stitch_tiles, GdalCliStitcher, GroupStatus, PlanOutcome, RasterStitcher, RasterTile,
    StitchFileReport, StitchGroup, StitchPlan,
};

pub use exec::{
    visual_upscale, CommandAdapter, ExecError, InferenceOutcome, InferenceRequest,
    ModelExecutionAdapter,
};

pub use env::{
    AcceptanceRecord, EnvInstaller, EnvPaths, EnvState, EnvStatus, EnvironmentManager,
    InstallPaths, LicenseLedger,
};

pub use job::{
    dry_run, AdapterFactory, CommandAdapterFactory, ComputeMode, Estimate, JobQueue, JobRunner,
    JobSnapshot, JobState, OutputFormat, RunOptions, RunReport, RunRequest, RunUnit, RunWarning,
    SessionStore, UnitReport, UnitStatus, WarningKind,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
