//! Linear Normalizer
//!
//! Divides every feature by a per-file normalization factor, then rescales
//! the whole list so that the largest feature height becomes
//! [`MAX_NORMALIZED_HEIGHT`].

use crate::domain::project::{
    AppliedMethod, ArtifactStore, Feature, FeatureList, FeatureListRow, RawDataFile,
};
use crate::domain::task::{BaseTask, StatusSignal, Task, TaskContext, TaskId, TaskStatus};
use crate::error::{TaskError, TaskResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Height of the largest feature after normalization
pub const MAX_NORMALIZED_HEIGHT: f64 = 100_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationType {
    AverageIntensity,
    AverageSquaredIntensity,
    MaximumFeatureHeight,
    TotalRawSignal,
}

impl std::fmt::Display for NormalizationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NormalizationType::AverageIntensity => write!(f, "Average intensity"),
            NormalizationType::AverageSquaredIntensity => write!(f, "Average squared intensity"),
            NormalizationType::MaximumFeatureHeight => write!(f, "Maximum feature height"),
            NormalizationType::TotalRawSignal => write!(f, "Total raw signal"),
        }
    }
}

/// Which feature value the intensity-based factors use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeatureMeasure {
    #[default]
    Height,
    Area,
}

impl FeatureMeasure {
    fn of(self, feature: &Feature) -> f64 {
        match self {
            FeatureMeasure::Height => feature.height,
            FeatureMeasure::Area => feature.area,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizerParameters {
    /// Appended to the input list's name
    pub suffix: String,
    pub normalization: NormalizationType,
    pub measure: FeatureMeasure,
    /// Remove the input list once the normalized one is committed
    pub remove_original: bool,
}

impl Default for NormalizerParameters {
    fn default() -> Self {
        Self {
            suffix: "norm".to_string(),
            normalization: NormalizationType::AverageIntensity,
            measure: FeatureMeasure::Height,
            remove_original: false,
        }
    }
}

pub struct LinearNormalizerTask {
    base: BaseTask,
    store: Arc<dyn ArtifactStore>,
    original: Arc<FeatureList>,
    parameters: NormalizerParameters,
}

impl LinearNormalizerTask {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        original: Arc<FeatureList>,
        parameters: NormalizerParameters,
    ) -> Self {
        Self {
            base: BaseTask::new(),
            store,
            original,
            parameters,
        }
    }

    fn factor(&self, file: &RawDataFile) -> f64 {
        let measure = self.parameters.measure;
        let values: Vec<f64> = self
            .original
            .rows
            .iter()
            .filter_map(|row| row.feature(&file.name))
            .map(|feature| measure.of(feature))
            .collect();

        match self.parameters.normalization {
            NormalizationType::AverageIntensity => mean(values.iter().copied()),
            NormalizationType::AverageSquaredIntensity => mean(values.iter().map(|v| v * v)),
            NormalizationType::MaximumFeatureHeight => values.iter().copied().fold(0.0, f64::max),
            NormalizationType::TotalRawSignal => file.total_ion_current,
        }
    }

    fn normalize(&self, cx: &TaskContext<'_>) -> TaskResult<()> {
        info!(
            list = %self.original.name,
            normalization = %self.parameters.normalization,
            "Running linear normalizer"
        );
        let files = &self.original.raw_files;
        let mut rows: Vec<FeatureListRow> = self
            .original
            .rows
            .iter()
            .map(|row| FeatureListRow {
                features: Default::default(),
                ..row.clone()
            })
            .collect();

        for (processed, file) in files.iter().enumerate() {
            cx.checkpoint()?;
            let factor = self.factor(file);
            let has_features = self
                .original
                .rows
                .iter()
                .any(|row| row.feature(&file.name).is_some());
            if has_features && !(factor.is_finite() && factor > 0.0) {
                return Err(TaskError::input(
                    file.name.clone(),
                    format!("normalization factor is {factor}"),
                ));
            }

            for (row, out) in self.original.rows.iter().zip(rows.iter_mut()) {
                cx.checkpoint()?;
                if let Some(feature) = row.feature(&file.name) {
                    out.add_feature(
                        file.name.clone(),
                        Feature {
                            height: feature.height / factor,
                            area: feature.area / factor,
                            ..*feature
                        },
                    );
                }
            }
            cx.set_progress((processed + 1) as f64 / files.len() as f64);
        }

        let max_height = rows
            .iter()
            .flat_map(|row| row.features.values())
            .map(|feature| feature.height)
            .fold(0.0, f64::max);
        if max_height > 0.0 {
            let scale = MAX_NORMALIZED_HEIGHT / max_height;
            for feature in rows.iter_mut().flat_map(|row| row.features.values_mut()) {
                feature.height *= scale;
                feature.area *= scale;
            }
        }

        let mut normalized = FeatureList::new(
            format!("{} {}", self.original.name, self.parameters.suffix),
            files.clone(),
        );
        for row in rows.into_iter().filter(|row| !row.features.is_empty()) {
            normalized.add_row(row);
        }
        normalized.inherit_history(&self.original.applied_methods);
        normalized.add_applied_method(AppliedMethod::new(
            format!("Linear normalization by {}", self.parameters.normalization),
            serde_json::to_value(&self.parameters).unwrap_or_default(),
        ));

        cx.checkpoint()?;
        self.store.commit_artifact(normalized)?;

        if self.parameters.remove_original {
            if let Err(e) = self.store.remove_artifact(self.original.id) {
                warn!(list = %self.original.name, error = %e, "Could not remove original list");
            }
        }
        info!(list = %self.original.name, "Finished linear normalizer");
        Ok(())
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

impl Task for LinearNormalizerTask {
    fn id(&self) -> TaskId {
        self.base.id()
    }

    fn status(&self) -> TaskStatus {
        self.base.status()
    }

    fn progress(&self) -> f64 {
        self.base.progress()
    }

    fn description(&self) -> String {
        format!(
            "Linear normalization of {} by {}",
            self.original, self.parameters.normalization
        )
    }

    fn error_message(&self) -> Option<String> {
        self.base.error_message()
    }

    fn cancel(&self) {
        self.base.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.base.is_cancelled()
    }

    fn execute(&self) {
        self.base.run(|cx| self.normalize(cx));
    }

    fn watch(&self, signal: &Arc<StatusSignal>) {
        self.base.watch(signal);
    }
}
