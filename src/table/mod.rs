//! Table data model
//!
//! Cell geometry and the logical row structure recovered from it. All of these
//! are read-only products of a single conversion run.

pub mod assemble;
pub mod grouping;

pub use assemble::{assemble, rows_from_json, write_table, SheetCell};
pub use grouping::group_rows;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Axis-aligned cell rectangle in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// True when `other` lies entirely inside this box (edges may touch)
    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Bounds as (x, y, width, height)
    pub fn as_tuple(&self) -> (u32, u32, u32, u32) {
        (self.x, self.y, self.width, self.height)
    }

    /// Clamp the box to an image of the given size
    pub fn clamp_to(&self, img_width: u32, img_height: u32) -> BoundingBox {
        let x = self.x.min(img_width);
        let y = self.y.min(img_height);
        BoundingBox {
            x,
            y,
            width: self.width.min(img_width - x),
            height: self.height.min(img_height - y),
        }
    }
}

impl From<(u32, u32, u32, u32)> for BoundingBox {
    fn from((x, y, width, height): (u32, u32, u32, u32)) -> Self {
        Self::new(x, y, width, height)
    }
}

/// A detected cell paired with its recognized text (possibly empty)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRecord {
    pub bbox: BoundingBox,
    pub text: String,
}

impl CellRecord {
    pub fn new(bbox: BoundingBox, text: impl Into<String>) -> Self {
        Self {
            bbox,
            text: text.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.is_empty()
    }
}

/// Cells of one table row, ordered left to right
pub type Row = Vec<CellRecord>;

/// Rows ordered top to bottom. Rows may be ragged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn cell_count(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// Texts of every row, for display and assertions
    pub fn texts(&self) -> Vec<Vec<&str>> {
        self.rows
            .iter()
            .map(|row| row.iter().map(|cell| cell.text.as_str()).collect())
            .collect()
    }
}

/// Violations of the row/cell contract at assembly time
#[derive(Debug, Error)]
pub enum TableError {
    #[error("invalid row item at row {row}, column {column}: {reason}")]
    MalformedRow {
        row: usize,
        column: usize,
        reason: String,
    },

    #[error("rows document is invalid: {0}")]
    InvalidJson(#[from] serde_json::Error),
}
