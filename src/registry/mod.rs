//! Model catalog: descriptors for every known SR model.
//!
//! The catalog is loaded once at startup and read-only for the session;
//! `reload` is the only sanctioned way to pick up registry changes.

pub mod catalog;

pub use catalog::{DefaultOptions, LicenseClass, ModelCatalog, ModelDescriptor};
