//! # rx-core
//!
//! Core types for rarexsec: the shared error type and the identity of a
//! sample (its key, its origin class and its detector variation).
//!
//! Every other crate in the workspace builds on these definitions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{SampleKey, SampleOrigin, SampleVariation};
