//! # rx-pipeline
//!
//! From a run catalogue to a snapshot archive.
//!
//! - [`config`] / [`registry`]: the JSON run catalogue and the `beam:period`
//!   registry it loads into.
//! - [`stage`] / [`stages`]: the per-origin processing chain (weights, truth
//!   classification, blips, muon candidates, reconstruction flags,
//!   preselection).
//! - [`sample`]: one configured sample, its nominal node and its detector
//!   variations.
//! - [`builder`]: combines every sample of a beam and its periods and writes
//!   the events tree, metadata and (optionally) the hub catalogue.
//!
//! ```no_run
//! use rx_pipeline::{BeamPeriodRegistry, SnapshotPipelineBuilder, VariableRegistry};
//!
//! let mut registry = BeamPeriodRegistry::new();
//! rx_pipeline::config::load_catalogue("samples.json", &mut registry).unwrap();
//! let base = registry.base_directory().unwrap().to_path_buf();
//! let builder = SnapshotPipelineBuilder::new(
//!     &registry,
//!     VariableRegistry::new(),
//!     "numi-fhc",
//!     &["run1".to_string()],
//!     base,
//!     false,
//! )
//! .unwrap();
//! let columns = vec!["run".to_string(), "sub".to_string(), "evt".to_string()];
//! builder.snapshot("pass_final", "out.hub", &columns).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod catalogue;
pub mod config;
pub mod descriptor;
pub mod names;
pub mod registry;
pub mod sample;
pub mod stage;
pub mod stages;
pub mod validation;
pub mod variables;

pub use builder::{SnapshotOptions, SnapshotPipelineBuilder, SnapshotSummary};
pub use config::{CatalogueFile, PeriodConfig, SampleConfig, VariationConfig, load_catalogue};
pub use descriptor::{SampleDescriptor, VariationDescriptor};
pub use names::{RunArguments, canonicalise_beam, canonicalise_period, parse_periods, resolve_beam, resolve_periods};
pub use registry::{BeamPeriodConfig, BeamPeriodRegistry};
pub use sample::SamplePipeline;
pub use stage::{Stage, StageChain};
pub use variables::{ColumnPlan, VariableRegistry};
