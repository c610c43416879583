//! Shared primitives for the stereo spatial-omics crates.
//!
//! - **Error types**: [`StereoError`] and [`Result`] for structured error handling
//! - **Traits**: [`Summarizable`] for one-line descriptions of data objects

pub mod error;
pub mod traits;

pub use error::{Result, StereoError};
pub use traits::*;
