//! Conversion errors
//!
//! Only conditions the caller must report end up here. Expected degeneracies
//! (no ruling lines, blank cells, unreadable crops) are absorbed as empty
//! results inside the pipeline and never surface as errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::output::OutputError;
use crate::table::TableError;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("failed to read image {path:?}: {source}")]
    ImageRead {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Output(#[from] OutputError),
}
