//! Domain Layer
//!
//! Task execution model and the shared project state tasks publish into.

pub mod project;
pub mod task;
