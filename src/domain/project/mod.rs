//! Project State
//!
//! Feature lists, raw data files and the store tasks commit them into.

pub mod model;
pub mod store;

pub use model::{
    AppliedMethod, ArtifactId, Feature, FeatureIdentity, FeatureList, FeatureListRow, RawDataFile,
};
pub use store::{ArtifactStore, ParameterValues, Project};
