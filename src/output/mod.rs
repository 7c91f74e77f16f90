//! Spreadsheet output
//!
//! Writers consume positioned cells and produce one file per table. An
//! existing file at the target path is replaced.

pub mod delimited;
pub mod xlsx;

pub use delimited::CsvWriter;
pub use xlsx::XlsxWriter;

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::table::SheetCell;

/// Sink for assembled table cells
pub trait SheetWriter {
    /// Write all cells to a single sheet at `path`
    fn write_sheet(&mut self, path: &Path, cells: &[SheetCell]) -> Result<(), OutputError>;
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XLSX write error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("cell ({row}, {column}) is outside the sheet limits")]
    OutOfRange { row: usize, column: usize },
}

/// Output file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetFormat {
    #[default]
    Xlsx,
    Csv,
}

impl SheetFormat {
    /// Pick a format from the file extension, if it names one
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "xlsx" => Some(SheetFormat::Xlsx),
            "csv" => Some(SheetFormat::Csv),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SheetFormat::Xlsx => "xlsx",
            SheetFormat::Csv => "csv",
        }
    }

    /// Create a writer for this format
    pub fn writer(&self) -> Box<dyn SheetWriter + Send> {
        match self {
            SheetFormat::Xlsx => Box::new(XlsxWriter::new()),
            SheetFormat::Csv => Box::new(CsvWriter::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SheetFormat::from_path(Path::new("a/b.xlsx")), Some(SheetFormat::Xlsx));
        assert_eq!(SheetFormat::from_path(Path::new("b.CSV")), Some(SheetFormat::Csv));
        assert_eq!(SheetFormat::from_path(Path::new("b.ods")), None);
        assert_eq!(SheetFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_format_serde_names() {
        let toml_str = toml::to_string(&std::collections::BTreeMap::from([(
            "format",
            SheetFormat::Csv,
        )]))
        .unwrap();
        assert!(toml_str.contains("\"csv\""));
    }
}
