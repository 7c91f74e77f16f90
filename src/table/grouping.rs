//! Row grouping
//!
//! Clusters cells into rows by vertical proximity, then orders each row by x.
//! The tolerance is a single global value and does not adapt to row height, so
//! strongly skewed photos or mixed font sizes can split or merge rows.

use tracing::debug;

use super::{CellRecord, Row, Table};

/// Group cells into rows.
///
/// Cells are walked in (y, x) order. A cell joins the open row when its `y`
/// differs from the last cell added to that row by less than `row_threshold`
/// pixels; otherwise the open row is closed and a new one starts.
pub fn group_rows(mut cells: Vec<CellRecord>, row_threshold: u32) -> Table {
    cells.sort_by_key(|cell| (cell.bbox.y, cell.bbox.x));

    let mut rows: Vec<Row> = Vec::new();
    let mut current: Row = Vec::new();

    for cell in cells {
        let joins = current
            .last()
            .map(|last| cell.bbox.y.abs_diff(last.bbox.y) < row_threshold)
            .unwrap_or(true);

        if !joins {
            rows.push(std::mem::take(&mut current));
        }
        current.push(cell);
    }

    if !current.is_empty() {
        rows.push(current);
    }

    for row in &mut rows {
        row.sort_by_key(|cell| cell.bbox.x);
    }

    debug!(
        "Grouped {} cells into {} rows (threshold {}px)",
        rows.iter().map(Vec::len).sum::<usize>(),
        rows.len(),
        row_threshold
    );

    Table::new(rows)
}
