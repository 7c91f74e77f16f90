//! Vision Layer
//!
//! Image-side stages of a conversion:
//! - binarization of the photographed page
//! - rule line and cell detection with the containment filter
//! - per-cell text recognition (PaddleOCR via ONNX Runtime)

pub mod detection;
pub mod filter;
pub mod models;
pub mod ocr;
pub mod paddle;
pub mod preprocess;
pub mod tensor;

pub use detection::{CellDetector, DebugImageWriter, Detection, DetectionObserver};
pub use filter::filter_nested;
pub use models::{ModelManager, ModelType};
pub use ocr::{BlankEngine, RecognitionAdapter, RecognitionEngine, SharedEngine, TextFragment};
pub use paddle::{CtcDecoder, PaddleRecognizer};
pub use preprocess::{prepare, PreparedImage};
