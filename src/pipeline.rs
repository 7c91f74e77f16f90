//! Conversion pipeline
//!
//! One conversion is strictly sequential: preprocess, detect, filter,
//! recognize every cell, group rows, then assemble and write. All buffers are
//! owned by the call, so separate conversions can run on separate threads as
//! long as they do not share an unsynchronized engine.

use image::DynamicImage;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::ConvertError;
use crate::output::SheetWriter;
use crate::table::{group_rows, write_table, Table};
use crate::vision::{
    filter_nested, prepare, CellDetector, DebugImageWriter, DetectionObserver, RecognitionAdapter,
    RecognitionEngine,
};

/// Pipeline checkpoints reported to a [`ProgressObserver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Started,
    CellsDetected,
    TextRecognized,
    Written,
}

impl Stage {
    /// Overall completion at this checkpoint
    pub fn percent(&self) -> u8 {
        match self {
            Stage::Started => 0,
            Stage::CellsDetected => 30,
            Stage::TextRecognized => 70,
            Stage::Written => 100,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Started => "started",
            Stage::CellsDetected => "cells detected",
            Stage::TextRecognized => "text recognized",
            Stage::Written => "written",
        }
    }
}

/// Receives pipeline checkpoints
pub trait ProgressObserver {
    fn on_stage(&self, stage: Stage);
}

impl<F: Fn(Stage)> ProgressObserver for F {
    fn on_stage(&self, stage: Stage) {
        self(stage)
    }
}

/// Observer that ignores progress
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_stage(&self, _stage: Stage) {}
}

/// Table plus detection diagnostics
#[derive(Debug, Clone)]
pub struct Extraction {
    pub table: Table,
    pub horizontal_lines: usize,
    pub vertical_lines: usize,
}

/// Outcome of a full conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConversionSummary {
    pub cells: usize,
    pub rows: usize,
    pub horizontal_lines: usize,
    pub vertical_lines: usize,
}

/// Image-to-table extraction with fixed settings
pub struct TableExtractor {
    config: AppConfig,
    detector: CellDetector,
    observer: Option<Box<dyn DetectionObserver + Send + Sync>>,
}

impl TableExtractor {
    /// Extractor without a detection observer
    pub fn new(config: AppConfig) -> Self {
        let detector = CellDetector::new(config.detection.clone());
        Self {
            config,
            detector,
            observer: None,
        }
    }

    /// Extractor with the debug image writer attached when enabled in config
    pub fn from_config(config: AppConfig) -> Self {
        let debug = config.debug.clone();
        let extractor = Self::new(config);
        if debug.enabled {
            extractor.with_observer(DebugImageWriter::new(debug.directory))
        } else {
            extractor
        }
    }

    pub fn with_observer(
        mut self,
        observer: impl DetectionObserver + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Run every stage up to row grouping on a decoded image
    pub fn extract<E: RecognitionEngine + ?Sized>(
        &self,
        source: &str,
        image: &DynamicImage,
        engine: &mut E,
        progress: &dyn ProgressObserver,
    ) -> Extraction {
        let start = Instant::now();

        let prepared = prepare(image, &self.config.preprocess);
        let detection = self.detector.detect(&prepared.binary);
        let cells = filter_nested(&detection.cells);

        if let Some(observer) = &self.observer {
            if let Err(e) = observer.cells_detected(source, &prepared.color, &cells) {
                warn!("Detection observer failed for {}: {:#}", source, e);
            }
        }
        progress.on_stage(Stage::CellsDetected);

        let mut adapter = RecognitionAdapter::new(engine, self.config.recognition.smoothing_radius);
        let records = adapter.recognize_all(&prepared.gray, &cells);
        progress.on_stage(Stage::TextRecognized);

        let table = group_rows(records, self.config.grouping.row_threshold);
        debug!(
            "Extracted {} rows from {} in {:?}",
            table.row_count(),
            source,
            start.elapsed()
        );

        Extraction {
            table,
            horizontal_lines: detection.horizontal_lines,
            vertical_lines: detection.vertical_lines,
        }
    }

    /// Read an image file and extract its table
    pub fn extract_from_path<E: RecognitionEngine + ?Sized>(
        &self,
        input: &Path,
        engine: &mut E,
        progress: &dyn ProgressObserver,
    ) -> Result<Extraction, ConvertError> {
        progress.on_stage(Stage::Started);
        let image = image::open(input).map_err(|source| ConvertError::ImageRead {
            path: input.to_path_buf(),
            source,
        })?;

        let source = input.to_string_lossy();
        Ok(self.extract(&source, &image, engine, progress))
    }

    /// Convert an image file into a spreadsheet file
    pub fn convert<E: RecognitionEngine + ?Sized>(
        &self,
        input: &Path,
        output: &Path,
        engine: &mut E,
        writer: &mut dyn SheetWriter,
        progress: &dyn ProgressObserver,
    ) -> Result<ConversionSummary, ConvertError> {
        info!("Converting {:?} -> {:?}", input, output);

        let extraction = self.extract_from_path(input, engine, progress)?;
        let cells = write_table(&extraction.table, output, writer)?;
        progress.on_stage(Stage::Written);

        let summary = ConversionSummary {
            cells,
            rows: extraction.table.row_count(),
            horizontal_lines: extraction.horizontal_lines,
            vertical_lines: extraction.vertical_lines,
        };
        info!(
            "Wrote {} cells in {} rows to {:?}",
            summary.cells, summary.rows, output
        );
        Ok(summary)
    }
}
