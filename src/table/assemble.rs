//! Table assembly
//!
//! Flattens grouped rows into positional `(row, column, text)` triples for a
//! spreadsheet writer. Positions come from sequence order only; cells are not
//! snapped to columns across rows.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{CellRecord, Row, Table, TableError};
use crate::error::ConvertError;
use crate::output::SheetWriter;

/// One positioned spreadsheet cell (0-based indices)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetCell {
    pub row: usize,
    pub column: usize,
    pub text: String,
}

/// Map every cell of the table to its grid position.
///
/// Fails when a record carries a degenerate (zero-sized) box, which only
/// happens when rows were built outside the detection pipeline.
pub fn assemble(table: &Table) -> Result<Vec<SheetCell>, TableError> {
    let mut cells = Vec::with_capacity(table.cell_count());

    for (row_idx, row) in table.rows.iter().enumerate() {
        for (col_idx, record) in row.iter().enumerate() {
            if record.bbox.is_empty() {
                return Err(TableError::MalformedRow {
                    row: row_idx,
                    column: col_idx,
                    reason: format!("zero-sized cell box {:?}", record.bbox.as_tuple()),
                });
            }
            cells.push(SheetCell {
                row: row_idx,
                column: col_idx,
                text: record.text.clone(),
            });
        }
    }

    Ok(cells)
}

/// Assemble the table and hand it to `writer`. Returns the number of cells written.
pub fn write_table(
    table: &Table,
    path: &Path,
    writer: &mut dyn SheetWriter,
) -> Result<usize, ConvertError> {
    let cells = assemble(table)?;
    writer.write_sheet(path, &cells)?;
    debug!("Wrote {} cells to {:?}", cells.len(), path);
    Ok(cells.len())
}

/// Parse a rows document produced by `detect` (or by hand).
///
/// The document is a JSON array of rows; each row is an array whose items are
/// either `{"bbox": {..}, "text": ".."}` objects or `[[x, y, w, h], "text"]`
/// pairs. Any other item shape is rejected with its position.
pub fn rows_from_json(input: &str) -> Result<Table, TableError> {
    let document: Value = serde_json::from_str(input)?;

    let Value::Array(raw_rows) = document else {
        return Err(TableError::MalformedRow {
            row: 0,
            column: 0,
            reason: "expected an array of rows".to_string(),
        });
    };

    let mut rows = Vec::with_capacity(raw_rows.len());
    for (row_idx, raw_row) in raw_rows.into_iter().enumerate() {
        let Value::Array(items) = raw_row else {
            return Err(TableError::MalformedRow {
                row: row_idx,
                column: 0,
                reason: format!("row is not an array: {raw_row}"),
            });
        };

        let mut row: Row = Vec::with_capacity(items.len());
        for (col_idx, item) in items.into_iter().enumerate() {
            let record = parse_item(&item).ok_or_else(|| TableError::MalformedRow {
                row: row_idx,
                column: col_idx,
                reason: format!("expected a (bbox, text) pair, found {item}"),
            })?;
            row.push(record);
        }
        rows.push(row);
    }

    Ok(Table::new(rows))
}

fn parse_item(item: &Value) -> Option<CellRecord> {
    match item {
        Value::Object(_) => serde_json::from_value(item.clone()).ok(),
        Value::Array(pair) if pair.len() == 2 => {
            let text = pair[1].as_str()?;
            let coords: Vec<u32> = pair[0]
                .as_array()?
                .iter()
                .map(|v| v.as_u64().and_then(|n| u32::try_from(n).ok()))
                .collect::<Option<_>>()?;
            let [x, y, width, height] = coords.as_slice() else {
                return None;
            };
            Some(CellRecord::new(
                (*x, *y, *width, *height).into(),
                text.to_string(),
            ))
        }
        _ => None,
    }
}
