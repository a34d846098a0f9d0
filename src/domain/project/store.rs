//! Artifact Store
//!
//! Shared process state tasks commit their results into. A commit is one
//! insert under the write lock, so consumers see an artifact either fully
//! built or not at all.

use super::model::{ArtifactId, FeatureList, RawDataFile};
use crate::error::{StoreError, StoreResult};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Shared-state interface tasks publish through
pub trait ArtifactStore: Send + Sync {
    /// Insert a fully built artifact
    fn commit_artifact(&self, artifact: FeatureList) -> StoreResult<()>;

    /// Remove a committed artifact (used by tasks that replace their input)
    fn remove_artifact(&self, id: ArtifactId) -> StoreResult<Arc<FeatureList>>;
}

/// Values of one project parameter, keyed by raw file name
pub type ParameterValues = BTreeMap<String, String>;

/// In-process project holding feature lists, raw data files and
/// per-file parameters
#[derive(Debug, Default)]
pub struct Project {
    name: String,
    feature_lists: RwLock<Vec<Arc<FeatureList>>>,
    raw_files: RwLock<Vec<RawDataFile>>,
    parameters: RwLock<BTreeMap<String, ParameterValues>>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of all committed feature lists, in commit order
    #[must_use]
    pub fn feature_lists(&self) -> Vec<Arc<FeatureList>> {
        self.feature_lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn feature_list(&self, id: ArtifactId) -> Option<Arc<FeatureList>> {
        self.feature_lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|list| list.id == id)
            .cloned()
    }

    #[must_use]
    pub fn feature_list_by_name(&self, name: &str) -> Option<Arc<FeatureList>> {
        self.feature_lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|list| list.name == name)
            .cloned()
    }

    #[must_use]
    pub fn artifact_count(&self) -> usize {
        self.feature_lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Register a raw data file; returns `false` if the name is taken
    pub fn add_raw_file(&self, file: RawDataFile) -> bool {
        let mut raw_files = self.raw_files.write().unwrap_or_else(PoisonError::into_inner);
        if raw_files.iter().any(|f| f.name == file.name) {
            return false;
        }
        debug!(project = %self.name, file = %file.name, "Registered raw data file");
        raw_files.push(file);
        true
    }

    #[must_use]
    pub fn raw_files(&self) -> Vec<RawDataFile> {
        self.raw_files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn find_raw_file(&self, name: &str) -> Option<RawDataFile> {
        self.raw_files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|f| f.name == name)
            .cloned()
    }

    /// Declare a per-file parameter; returns `false` if it already exists
    pub fn add_parameter(&self, parameter: impl Into<String>) -> bool {
        let parameter = parameter.into();
        let mut parameters = self.parameters.write().unwrap_or_else(PoisonError::into_inner);
        if parameters.contains_key(&parameter) {
            return false;
        }
        debug!(project = %self.name, %parameter, "Added project parameter");
        parameters.insert(parameter, ParameterValues::new());
        true
    }

    /// Set a parameter's value for one raw file, declaring it if needed
    pub fn set_parameter_value(
        &self,
        parameter: &str,
        raw_file: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.parameters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(parameter.to_string())
            .or_default()
            .insert(raw_file.into(), value.into());
    }

    #[must_use]
    pub fn parameter_value(&self, parameter: &str, raw_file: &str) -> Option<String> {
        self.parameters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(parameter)
            .and_then(|values| values.get(raw_file))
            .cloned()
    }

    /// Declared parameter names, sorted
    #[must_use]
    pub fn parameters(&self) -> Vec<String> {
        self.parameters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl ArtifactStore for Project {
    fn commit_artifact(&self, artifact: FeatureList) -> StoreResult<()> {
        let mut lists = self
            .feature_lists
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if lists.iter().any(|list| list.id == artifact.id) {
            return Err(StoreError::DuplicateArtifact { id: artifact.id });
        }
        info!(
            project = %self.name,
            artifact = %artifact.name,
            rows = artifact.row_count(),
            "Committed feature list"
        );
        lists.push(Arc::new(artifact));
        Ok(())
    }

    fn remove_artifact(&self, id: ArtifactId) -> StoreResult<Arc<FeatureList>> {
        let mut lists = self
            .feature_lists
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let index = lists
            .iter()
            .position(|list| list.id == id)
            .ok_or(StoreError::ArtifactNotFound { id })?;
        let removed = lists.remove(index);
        info!(project = %self.name, artifact = %removed.name, "Removed feature list");
        Ok(removed)
    }
}
