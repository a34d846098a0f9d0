//! Raw data file import
//!
//! One child task per raw file. Parsing is left to a [`RawFileReader`];
//! the task registers the result in the project once the reader returns.

use crate::domain::project::{Project, RawDataFile};
use crate::domain::task::{BaseTask, ChildTask, StatusSignal, Task, TaskContext, TaskId, TaskStatus};
use crate::error::{TaskError, TaskResult};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Reads one raw data file
pub trait RawFileReader: Send + Sync + 'static {
    /// May report progress and should checkpoint on long reads
    fn read(&self, path: &Path, cx: &TaskContext<'_>) -> TaskResult<RawDataFile>;
}

/// Reader that only checks the file can be opened.
///
/// Scans are not parsed, so `total_ion_current` stays zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileProbe;

impl RawFileReader for FileProbe {
    fn read(&self, path: &Path, _cx: &TaskContext<'_>) -> TaskResult<RawDataFile> {
        std::fs::File::open(path)
            .map_err(|e| TaskError::input(path.display().to_string(), e.to_string()))?;
        Ok(RawDataFile::new(file_name(path)).with_path(path.to_path_buf()))
    }
}

/// File name component as a string, or the whole path if it has none
pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub struct RawImportTask {
    base: BaseTask,
    path: PathBuf,
    reader: Arc<dyn RawFileReader>,
    project: Arc<Project>,
    output: Mutex<Option<RawDataFile>>,
}

impl RawImportTask {
    pub fn new(path: PathBuf, reader: Arc<dyn RawFileReader>, project: Arc<Project>) -> Self {
        Self {
            base: BaseTask::new(),
            path,
            reader,
            project,
            output: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn import(&self, cx: &TaskContext<'_>) -> TaskResult<()> {
        let file = self.reader.read(&self.path, cx).map_err(|e| match e {
            e @ (TaskError::Input { .. } | TaskError::Internal(_)) => e,
            e if e.is_cancelled() => e,
            other => TaskError::input(file_name(&self.path), other.to_string()),
        })?;
        cx.checkpoint()?;

        if !self.project.add_raw_file(file.clone()) {
            debug!(file = %file.name, "Raw data file already registered");
        }
        *self.output.lock().unwrap_or_else(PoisonError::into_inner) = Some(file);
        Ok(())
    }
}

impl Task for RawImportTask {
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
        format!("Importing raw data file {}", self.path.display())
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
        self.base.run(|cx| self.import(cx));
    }

    fn watch(&self, signal: &Arc<StatusSignal>) {
        self.base.watch(signal);
    }
}

impl ChildTask for RawImportTask {
    type Output = RawDataFile;

    fn take_output(&self) -> Option<RawDataFile> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}
