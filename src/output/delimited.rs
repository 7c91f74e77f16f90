//! CSV writer

use std::path::Path;

use csv::WriterBuilder;

use super::{OutputError, SheetWriter};
use crate::table::SheetCell;

/// Writes one record per table row. Rows keep their own length.
#[derive(Debug, Clone)]
pub struct CsvWriter {
    delimiter: u8,
}

impl Default for CsvWriter {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl CsvWriter {
    pub fn with_delimiter(delimiter: u8) -> Self {
        Self { delimiter }
    }
}

/// Lay positioned cells out as ragged rows, filling skipped positions with ""
fn to_records(cells: &[SheetCell]) -> Vec<Vec<&str>> {
    let row_count = cells.iter().map(|c| c.row + 1).max().unwrap_or(0);
    let mut records: Vec<Vec<&str>> = vec![Vec::new(); row_count];

    for cell in cells {
        let record = &mut records[cell.row];
        if record.len() <= cell.column {
            record.resize(cell.column + 1, "");
        }
        record[cell.column] = cell.text.as_str();
    }

    records
}

impl SheetWriter for CsvWriter {
    fn write_sheet(&mut self, path: &Path, cells: &[SheetCell]) -> Result<(), OutputError> {
        let mut writer = WriterBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .from_path(path)?;

        for record in to_records(cells) {
            if record.is_empty() {
                // csv refuses zero-field records; an empty row is a single empty field
                writer.write_record([""])?;
            } else {
                writer.write_record(&record)?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}
