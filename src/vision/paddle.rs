//! PaddleOCR recognition via ONNX Runtime
//!
//! Runs the CRNN recognition model on a whole cell crop. Cells hold a single
//! line of text in the common case, so no separate text detection stage runs.

use anyhow::{bail, Context, Result};
use image::RgbImage;
use ort::session::Session;
use ort::value::TensorRef;
use tracing::{debug, info};

use super::models::ModelManager;
use super::ocr::{RecognitionEngine, TextFragment};
use super::tensor::{recognition_tensor, TensorConfig};
use crate::config::RecognitionSettings;

/// Greedy CTC decoder over a character list whose index 0 is the blank
#[derive(Debug, Clone)]
pub struct CtcDecoder {
    characters: Vec<String>,
}

impl CtcDecoder {
    pub fn new(dictionary: Vec<String>, use_space_char: bool) -> Self {
        let mut characters = Vec::with_capacity(dictionary.len() + 2);
        characters.push(String::new());
        characters.extend(dictionary);
        if use_space_char {
            characters.push(" ".to_string());
        }
        Self { characters }
    }

    /// Class count including the blank
    pub fn num_classes(&self) -> usize {
        self.characters.len()
    }

    /// Decode a `[timesteps, classes]` row-major probability matrix.
    ///
    /// Returns the text and the mean probability of the emitted characters.
    pub fn decode(&self, probs: &[f32], num_classes: usize) -> (String, f32) {
        if num_classes == 0 {
            return (String::new(), 0.0);
        }

        let mut text = String::new();
        let mut score_sum = 0.0;
        let mut emitted = 0usize;
        let mut previous = None;

        for step in probs.chunks_exact(num_classes) {
            let (index, score) = step
                .iter()
                .copied()
                .enumerate()
                .fold((0, f32::MIN), |best, (i, p)| if p > best.1 { (i, p) } else { best });

            if index != 0 && previous != Some(index) {
                if let Some(symbol) = self.characters.get(index) {
                    text.push_str(symbol);
                    score_sum += score;
                    emitted += 1;
                }
            }
            previous = Some(index);
        }

        let confidence = if emitted == 0 {
            0.0
        } else {
            score_sum / emitted as f32
        };
        (text, confidence)
    }
}

/// Recognition engine backed by a PaddleOCR ONNX model
pub struct PaddleRecognizer {
    session: Session,
    input_name: String,
    output_name: String,
    decoder: CtcDecoder,
    tensor_config: TensorConfig,
    min_confidence: f32,
}

impl PaddleRecognizer {
    /// Load model and dictionary through the manager, downloading if needed
    pub fn load(
        manager: &ModelManager,
        settings: &RecognitionSettings,
        intra_threads: usize,
    ) -> Result<Self> {
        let dictionary = manager.load_dictionary()?;
        let session = manager.load_session(intra_threads)?;
        Self::from_session(session, dictionary, settings)
    }

    pub fn from_session(
        session: Session,
        dictionary: Vec<String>,
        settings: &RecognitionSettings,
    ) -> Result<Self> {
        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .context("Recognition model has no inputs")?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .context("Recognition model has no outputs")?;

        let decoder = CtcDecoder::new(dictionary, settings.use_space_char);
        info!(
            "Recognition model loaded ({} classes, input {:?}, output {:?})",
            decoder.num_classes(),
            input_name,
            output_name
        );

        Ok(Self {
            session,
            input_name,
            output_name,
            decoder,
            tensor_config: TensorConfig {
                target_height: settings.target_height,
                max_width: settings.max_width,
                ..TensorConfig::default()
            },
            min_confidence: settings.min_confidence,
        })
    }
}

impl RecognitionEngine for PaddleRecognizer {
    fn recognize(&mut self, image: &RgbImage) -> Result<Vec<TextFragment>> {
        let input = recognition_tensor(image, &self.tensor_config);
        let dims: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let data = input
            .as_slice()
            .context("Recognition tensor is not contiguous")?;
        let tensor = TensorRef::from_array_view((dims, data))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])?;
        let (shape, probs) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;

        // [batch, timesteps, classes]
        if shape.len() != 3 {
            bail!("Unexpected recognition output shape {:?}", shape);
        }
        let num_classes = shape[2] as usize;
        if num_classes != self.decoder.num_classes() {
            debug!(
                "Model reports {} classes, dictionary has {}",
                num_classes,
                self.decoder.num_classes()
            );
        }

        let (text, confidence) = self.decoder.decode(probs, num_classes);
        if text.is_empty() || confidence < self.min_confidence {
            return Ok(Vec::new());
        }

        Ok(vec![TextFragment::new(text, confidence)])
    }
}
