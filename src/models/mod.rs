//! Serializable views of the build engine's state.
//!
//! - [`BuildStatus`]: where a build is in its lifecycle.
//! - [`BuildSummary`]: the JSON snapshot served for a project and reference.

mod build;

pub use build::*;
