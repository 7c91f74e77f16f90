//! XLSX writer backed by rust_xlsxwriter

use std::path::Path;

use rust_xlsxwriter::Workbook;
use tracing::debug;

use super::{OutputError, SheetWriter};
use crate::table::SheetCell;

/// Excel's worksheet limits
const MAX_ROWS: usize = 1_048_576;
const MAX_COLUMNS: usize = 16_384;

/// Writes cells to the first worksheet of a new workbook
#[derive(Debug, Clone, Default)]
pub struct XlsxWriter;

impl XlsxWriter {
    pub fn new() -> Self {
        Self
    }
}

impl SheetWriter for XlsxWriter {
    fn write_sheet(&mut self, path: &Path, cells: &[SheetCell]) -> Result<(), OutputError> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();

        for cell in cells {
            if cell.row >= MAX_ROWS || cell.column >= MAX_COLUMNS {
                return Err(OutputError::OutOfRange {
                    row: cell.row,
                    column: cell.column,
                });
            }
            worksheet.write_string(cell.row as u32, cell.column as u16, cell.text.as_str())?;
        }

        workbook.save(path)?;
        debug!("Saved workbook with {} cells to {:?}", cells.len(), path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cell(row: usize, column: usize, text: &str) -> SheetCell {
        SheetCell {
            row,
            column,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_writes_workbook_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.xlsx");

        XlsxWriter::new()
            .write_sheet(&path, &[cell(0, 0, "Name"), cell(0, 1, "Qty"), cell(1, 0, "Bolt")])
            .unwrap();

        let bytes = std::fs::read(&path).unwrap();
        // xlsx is a zip container
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn test_empty_sheet_is_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.xlsx");
        XlsxWriter::new().write_sheet(&path, &[]).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_overwrites_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.xlsx");
        std::fs::write(&path, b"stale").unwrap();

        XlsxWriter::new().write_sheet(&path, &[cell(0, 0, "x")]).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_ne!(bytes, b"stale");
    }

    #[test]
    fn test_rejects_column_beyond_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wide.xlsx");
        let result = XlsxWriter::new().write_sheet(&path, &[cell(0, MAX_COLUMNS, "x")]);
        assert!(matches!(result, Err(OutputError::OutOfRange { .. })));
    }

    #[test]
    fn test_unwritable_path_propagates() {
        let result = XlsxWriter::new().write_sheet(
            Path::new("/nonexistent/dir/table.xlsx"),
            &[cell(0, 0, "x")],
        );
        assert!(result.is_err());
    }
}
