//! Feature table import
//!
//! Imports a tabular feature file (one column block per MS run) as a
//! feature list. Referenced raw files are optionally imported first as
//! child tasks; runs are then matched to project raw files by name.
//! Placeholder raw files and study variable values reach the project only
//! once the feature list is committed.

use super::raw::{file_name, RawFileReader, RawImportTask};
use crate::config::ImportConfig;
use crate::domain::project::{
    AppliedMethod, ArtifactId, Feature, FeatureIdentity, FeatureList, FeatureListRow,
    ParameterValues, Project, RawDataFile,
};
use crate::domain::task::{ChildOutcome, Orchestrator, TaskContext};
use crate::error::TaskResult;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Parsed feature table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    pub runs: Vec<MsRun>,
    pub study_variables: Vec<StudyVariable>,
    pub rows: Vec<TableRow>,
}

/// Sample grouping declared in the table metadata
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudyVariable {
    pub description: String,
    /// Indices into `FeatureTable::runs`
    pub assays: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MsRun {
    /// Location as written in the table; may point to another machine
    pub location: PathBuf,
}

/// Per-run values of one row
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TableCell {
    pub mz: Option<f64>,
    pub rt: Option<f64>,
    pub height: Option<f64>,
    pub abundance: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRow {
    pub mz: f64,
    /// Seconds
    pub rt: f64,
    pub charge: Option<i32>,
    pub name: Option<String>,
    pub formula: Option<String>,
    pub method: Option<String>,
    pub identifier: Option<String>,
    pub url: Option<String>,
    /// Indexed like `FeatureTable::runs`
    pub cells: Vec<TableCell>,
}

impl TableRow {
    /// Annotation for the row; the identifier stands in for a missing name
    #[must_use]
    pub fn identity(&self) -> Option<FeatureIdentity> {
        let identifier = present(&self.identifier);
        let name = present(&self.name).or_else(|| identifier.clone())?;
        Some(FeatureIdentity {
            name,
            formula: present(&self.formula),
            method: present(&self.method),
            identifier,
            url: present(&self.url),
        })
    }
}

/// Table writers emit the literal string "null" for empty cells.
fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .filter(|v| !v.is_empty() && *v != "null")
        .map(str::to_string)
}

/// Parses feature table files
pub trait TableSource: Send + Sync + 'static {
    fn read_table(&self, path: &Path, cx: &TaskContext<'_>) -> TaskResult<FeatureTable>;
}

/// Project updates held back until the feature list is committed
#[derive(Debug, Default)]
struct PendingUpdates {
    placeholders: Vec<RawDataFile>,
    study_variable: Option<(String, ParameterValues)>,
}

/// Orchestrates a feature table import as a composite task
pub struct FeatureTableImport {
    table_path: PathBuf,
    source: Arc<dyn TableSource>,
    reader: Arc<dyn RawFileReader>,
    project: Arc<Project>,
    settings: ImportConfig,
    table: Mutex<Option<FeatureTable>>,
    pending: Mutex<PendingUpdates>,
}

impl FeatureTableImport {
    pub fn new(
        table_path: PathBuf,
        source: Arc<dyn TableSource>,
        reader: Arc<dyn RawFileReader>,
        project: Arc<Project>,
        settings: ImportConfig,
    ) -> Self {
        Self {
            table_path,
            source,
            reader,
            project,
            settings,
            table: Mutex::new(None),
            pending: Mutex::new(PendingUpdates::default()),
        }
    }

    /// Feature list name: the table file name without `.mzTab`
    #[must_use]
    pub fn artifact_name(&self) -> String {
        file_name(&self.table_path).replace(".mzTab", "")
    }

    /// Find a readable file for a run location.
    ///
    /// Tries the location as given, then the same file name next to the
    /// table, then that name with each fallback suffix appended.
    #[must_use]
    pub fn locate_run(&self, location: &Path) -> Option<PathBuf> {
        if is_readable(location) {
            return Some(location.to_path_buf());
        }
        let dir = self.table_path.parent()?;
        let name = location.file_name()?;
        let sibling = dir.join(name);
        if is_readable(&sibling) {
            return Some(sibling);
        }
        self.settings.location_fallbacks.iter().find_map(|suffix| {
            let mut candidate = name.to_os_string();
            candidate.push(suffix);
            let candidate = dir.join(candidate);
            is_readable(&candidate).then_some(candidate)
        })
    }

    /// Project parameter holding each raw file's study variable
    #[must_use]
    pub fn study_variable_parameter(&self) -> String {
        format!("{} study variable", file_name(&self.table_path))
    }

    /// Project raw file for a run, or a placeholder (`Err`) if none exists
    fn raw_file_for(&self, run: &MsRun) -> Result<RawDataFile, RawDataFile> {
        let run_name = file_name(&run.location);
        self.project
            .raw_files()
            .into_iter()
            .find(|f| {
                f.name == run_name
                    || self
                        .settings
                        .location_fallbacks
                        .iter()
                        .any(|suffix| f.name == format!("{run_name}{suffix}"))
            })
            .ok_or_else(|| RawDataFile::new(run_name))
    }

    /// Study variable description per raw file name
    fn study_values(
        &self,
        cx: &TaskContext<'_>,
        variables: &[StudyVariable],
        raw_files: &[RawDataFile],
    ) -> TaskResult<ParameterValues> {
        let mut values = ParameterValues::new();
        for variable in variables {
            cx.checkpoint()?;
            for &assay in &variable.assays {
                match raw_files.get(assay) {
                    Some(file) => {
                        values.insert(file.name.clone(), variable.description.clone());
                    }
                    None => warn!(
                        variable = %variable.description,
                        assay,
                        "Study variable refers to an unknown run"
                    ),
                }
            }
        }
        Ok(values)
    }
}

fn is_readable(path: &Path) -> bool {
    path.is_file() && std::fs::File::open(path).is_ok()
}

impl Orchestrator for FeatureTableImport {
    type Input = PathBuf;
    type Child = RawImportTask;

    fn description(&self) -> String {
        format!(
            "Loading feature list from feature table {}",
            self.table_path.display()
        )
    }

    fn resolve(&self, cx: &TaskContext<'_>) -> TaskResult<Vec<PathBuf>> {
        let table = self.source.read_table(&self.table_path, cx)?;
        debug!(
            table = %self.table_path.display(),
            runs = table.runs.len(),
            rows = table.rows.len(),
            "Parsed feature table"
        );

        let files = if self.settings.import_raw_files {
            table
                .runs
                .iter()
                .filter_map(|run| {
                    let found = self.locate_run(&run.location);
                    if found.is_none() {
                        warn!(location = %run.location.display(), "Raw data file not found");
                    }
                    found
                })
                .collect()
        } else {
            Vec::new()
        };

        *self.table.lock().unwrap_or_else(PoisonError::into_inner) = Some(table);
        Ok(files)
    }

    fn build_child(&self, path: PathBuf) -> Arc<RawImportTask> {
        Arc::new(RawImportTask::new(
            path,
            Arc::clone(&self.reader),
            Arc::clone(&self.project),
        ))
    }

    fn assemble(
        &self,
        cx: &TaskContext<'_>,
        _outcomes: Vec<ChildOutcome<RawDataFile>>,
    ) -> TaskResult<FeatureList> {
        let table = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();

        // Imported children registered themselves; match runs by name.
        let mut placeholders = Vec::new();
        let raw_files: Vec<RawDataFile> = table
            .runs
            .iter()
            .map(|run| {
                self.raw_file_for(run).unwrap_or_else(|placeholder| {
                    placeholders.push(placeholder.clone());
                    placeholder
                })
            })
            .collect();
        let study_variable = if table.study_variables.is_empty() {
            None
        } else {
            let values = self.study_values(cx, &table.study_variables, &raw_files)?;
            Some((self.study_variable_parameter(), values))
        };
        let mut list = FeatureList::new(self.artifact_name(), raw_files.clone());

        for (counter, row) in table.rows.iter().enumerate() {
            cx.checkpoint()?;
            let id = u32::try_from(counter + 1).unwrap_or(u32::MAX);
            let mut out = FeatureListRow::new(id, row.mz, row.rt);
            if let Some(charge) = row.charge {
                out = out.with_charge(charge);
            }
            if let Some(identity) = row.identity() {
                out = out.with_identity(identity);
            }
            for (index, file) in raw_files.iter().enumerate() {
                let cell = row.cells.get(index).copied().unwrap_or_default();
                out.add_feature(
                    file.name.clone(),
                    Feature {
                        mz: cell.mz.unwrap_or(row.mz),
                        rt: cell.rt.unwrap_or(row.rt),
                        height: cell.height.unwrap_or(0.0),
                        area: cell.abundance.unwrap_or(0.0),
                    },
                );
            }
            list.add_row(out);
        }

        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = PendingUpdates {
            placeholders,
            study_variable,
        };
        Ok(list)
    }

    fn applied_method(&self) -> Option<AppliedMethod> {
        Some(AppliedMethod::new(
            "Feature table import",
            json!({
                "file": self.table_path.display().to_string(),
                "import_raw_files": self.settings.import_raw_files,
            }),
        ))
    }

    fn after_commit(&self, _committed: ArtifactId) {
        let pending = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for file in pending.placeholders {
            self.project.add_raw_file(file);
        }
        if let Some((parameter, values)) = pending.study_variable {
            self.project.add_parameter(parameter.as_str());
            for (raw_file, description) in values {
                self.project.set_parameter_value(&parameter, raw_file, description);
            }
        }
    }
}
