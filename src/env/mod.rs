//! Model environment management.
//!
//! Each model runs out of an isolated, model-scoped environment. This module
//! owns those environments end to end:
//! - directory layout and locking (`paths`)
//! - license acceptance records (`license`)
//! - weight download, verification, and removal (`install`)
//! - the lightweight health probe (`probe`)
//! - the per-model state machine (`lifecycle`)

pub mod install;
pub mod license;
pub mod lifecycle;
pub mod paths;
pub mod probe;

pub use install::{EnvInstaller, InstallReceipt};
pub use license::{AcceptanceRecord, LicenseLedger};
pub use lifecycle::{EnvState, EnvStatus, EnvironmentManager};
pub use paths::{EnvPaths, InstallPaths};
