//! table2sheet - Ruled table photos to spreadsheets
//!
//! Finds cell boundaries from the table's rule lines, recognizes the text in
//! each cell, rebuilds the row structure and writes an XLSX or CSV sheet.

pub mod app;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod storage;
pub mod table;
pub mod vision;

pub use error::ConvertError;
pub use pipeline::{ConversionSummary, Stage, TableExtractor};
pub use table::{BoundingBox, CellRecord, Row, Table};
