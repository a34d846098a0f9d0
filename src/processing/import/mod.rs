//! Import tasks

pub mod raw;
pub mod table;

pub use raw::{FileProbe, RawFileReader, RawImportTask};
pub use table::{
    FeatureTable, FeatureTableImport, MsRun, StudyVariable, TableCell, TableRow, TableSource,
};
