// src/config/mod.rs

//! Plan file loading and validation.
//!
//! - [`model`] is the direct serde mapping of `Pipeline.toml`.
//! - [`loader`] reads TOML from disk.
//! - [`validate`] turns a [`RawPlanFile`] into a checked [`PlanFile`].

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{parse_duration, ConfigSection, PlanFile, RawPlanFile, StepConfig};
