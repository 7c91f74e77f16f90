//! OCR (Optical Character Recognition) module
//!
//! Cell crops are handed to a [`RecognitionEngine`]. The engine is a seam:
//! the pipeline only needs "image in, text fragments out", so backends can be
//! swapped without touching detection or assembly.

use anyhow::Result;
use image::{imageops, DynamicImage, GrayImage, RgbImage};
use imageproc::filter::median_filter;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::table::{BoundingBox, CellRecord};

/// Single recognized text fragment
#[derive(Debug, Clone, PartialEq)]
pub struct TextFragment {
    /// Recognized text
    pub text: String,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
}

impl TextFragment {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Text recognition backend
pub trait RecognitionEngine {
    /// Recognize the text in a 3-channel image.
    ///
    /// An empty list means no text was found.
    fn recognize(&mut self, image: &RgbImage) -> Result<Vec<TextFragment>>;
}

impl<E: RecognitionEngine + ?Sized> RecognitionEngine for Box<E> {
    fn recognize(&mut self, image: &RgbImage) -> Result<Vec<TextFragment>> {
        (**self).recognize(image)
    }
}

/// Engine that never finds text. Used for geometry-only runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlankEngine;

impl RecognitionEngine for BlankEngine {
    fn recognize(&mut self, _image: &RgbImage) -> Result<Vec<TextFragment>> {
        Ok(Vec::new())
    }
}

/// One engine instance shared between worker threads
pub struct SharedEngine<E> {
    inner: Arc<Mutex<E>>,
}

impl<E> SharedEngine<E> {
    pub fn new(engine: E) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }
}

impl<E> Clone for SharedEngine<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: RecognitionEngine> RecognitionEngine for SharedEngine<E> {
    fn recognize(&mut self, image: &RgbImage) -> Result<Vec<TextFragment>> {
        self.inner.lock().recognize(image)
    }
}

/// Crop a cell out of the grayscale image, clamped to the image bounds
pub fn crop_cell(gray: &GrayImage, bbox: &BoundingBox) -> GrayImage {
    let (width, height) = gray.dimensions();
    let b = bbox.clamp_to(width, height);
    imageops::crop_imm(gray, b.x, b.y, b.width, b.height).to_image()
}

/// Prepares cell crops and collects the engine's text for each cell
pub struct RecognitionAdapter<'e, E: ?Sized> {
    engine: &'e mut E,
    smoothing_radius: u32,
}

impl<'e, E: RecognitionEngine + ?Sized> RecognitionAdapter<'e, E> {
    pub fn new(engine: &'e mut E, smoothing_radius: u32) -> Self {
        Self {
            engine,
            smoothing_radius,
        }
    }

    /// Text inside one cell, or "" when nothing is recognized.
    ///
    /// Engine failures are logged and treated as an empty cell so a single
    /// unreadable crop never aborts the table.
    pub fn recognize_cell(&mut self, gray: &GrayImage, bbox: &BoundingBox) -> String {
        let crop = crop_cell(gray, bbox);
        if crop.width() == 0 || crop.height() == 0 {
            debug!("Cell {:?} lies outside the image", bbox);
            return String::new();
        }

        let smoothed = if self.smoothing_radius > 0 {
            median_filter(&crop, self.smoothing_radius, self.smoothing_radius)
        } else {
            crop
        };
        let rgb = DynamicImage::ImageLuma8(smoothed).to_rgb8();

        match self.engine.recognize(&rgb) {
            Ok(fragments) => fragments
                .iter()
                .filter(|f| !f.text.is_empty())
                .map(|f| f.text.as_str())
                .collect(),
            Err(e) => {
                warn!("Recognition failed for cell {:?}: {:#}", bbox, e);
                String::new()
            }
        }
    }

    /// Recognize every cell, in input order
    pub fn recognize_all(&mut self, gray: &GrayImage, cells: &[BoundingBox]) -> Vec<CellRecord> {
        cells
            .iter()
            .map(|bbox| CellRecord::new(*bbox, self.recognize_cell(gray, bbox)))
            .collect()
    }
}
