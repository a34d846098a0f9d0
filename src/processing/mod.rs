//! Processing Tasks
//!
//! Concrete tasks built on the task layer: feature table import with raw
//! file children, and linear normalization of feature lists.

pub mod import;
pub mod normalize;

pub use import::{FeatureTableImport, FileProbe, RawFileReader, RawImportTask, TableSource};
pub use normalize::{
    FeatureMeasure, LinearNormalizerTask, NormalizationType, NormalizerParameters,
    MAX_NORMALIZED_HEIGHT,
};
