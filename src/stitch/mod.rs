//! Stitch planning and mosaic assembly.
//!
//! The planner groups assets that form one mosaic and decides how each band
//! resamples; `tiles` assembles aligned in-memory tiles; `files` drives the
//! external raster toolchain for on-disk mosaics.

pub mod filename;
pub mod files;
pub mod planner;
pub mod tiles;

pub use files::{GdalCliStitcher, RasterStitcher, StitchFileReport};
pub use planner::{plan, GroupStatus, PlanOutcome, StitchGroup, StitchPlan};
pub use tiles::{stitch_tiles, RasterTile};
