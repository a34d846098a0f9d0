//! Project Model
//!
//! Artifacts that tasks publish into shared project state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Artifact identifier
pub type ArtifactId = Uuid;

/// An imported raw data file, identified by name within a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDataFile {
    pub name: String,
    pub path: Option<PathBuf>,
    /// Sum of the total ion current over all MS1 scans
    pub total_ion_current: f64,
}

impl RawDataFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            total_ion_current: 0.0,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    #[must_use]
    pub fn with_total_ion_current(mut self, tic: f64) -> Self {
        self.total_ion_current = tic;
        self
    }
}

/// One detected feature of a row in one raw data file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub mz: f64,
    pub rt: f64,
    pub height: f64,
    pub area: f64,
}

/// Compound annotation attached to a row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FeatureIdentity {
    pub name: String,
    pub formula: Option<String>,
    pub method: Option<String>,
    pub identifier: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureListRow {
    pub id: u32,
    /// Average m/z over all features
    pub mz: f64,
    /// Average retention time in seconds
    pub rt: f64,
    pub charge: Option<i32>,
    pub identity: Option<FeatureIdentity>,
    /// Features keyed by raw data file name
    pub features: BTreeMap<String, Feature>,
}

impl FeatureListRow {
    #[must_use]
    pub fn new(id: u32, mz: f64, rt: f64) -> Self {
        Self {
            id,
            mz,
            rt,
            charge: None,
            identity: None,
            features: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_charge(mut self, charge: i32) -> Self {
        self.charge = Some(charge);
        self
    }

    #[must_use]
    pub fn with_identity(mut self, identity: FeatureIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn add_feature(&mut self, raw_file: impl Into<String>, feature: Feature) {
        self.features.insert(raw_file.into(), feature);
    }

    #[must_use]
    pub fn feature(&self, raw_file: &str) -> Option<&Feature> {
        self.features.get(raw_file)
    }
}

/// Record of one processing step applied to an artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedMethod {
    pub description: String,
    pub parameters: serde_json::Value,
    pub applied_at: DateTime<Utc>,
}

impl AppliedMethod {
    pub fn new(description: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            description: description.into(),
            parameters,
            applied_at: Utc::now(),
        }
    }
}

/// Feature list: the artifact composite and processing tasks publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureList {
    pub id: ArtifactId,
    pub name: String,
    pub raw_files: Vec<RawDataFile>,
    pub rows: Vec<FeatureListRow>,
    /// Processing history, oldest first
    pub applied_methods: Vec<AppliedMethod>,
}

impl FeatureList {
    pub fn new(name: impl Into<String>, raw_files: Vec<RawDataFile>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            raw_files,
            rows: Vec::new(),
            applied_methods: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: FeatureListRow) {
        self.rows.push(row);
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Prepend history carried over from an input artifact
    pub fn inherit_history(&mut self, prior: &[AppliedMethod]) {
        if prior.is_empty() {
            return;
        }
        let own = std::mem::take(&mut self.applied_methods);
        self.applied_methods = prior.iter().cloned().chain(own).collect();
    }

    pub fn add_applied_method(&mut self, method: AppliedMethod) {
        self.applied_methods.push(method);
    }
}

impl std::fmt::Display for FeatureList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
