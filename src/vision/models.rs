//! Model management for ONNX Runtime
//!
//! Downloads and caches the PaddleOCR recognition model and its character
//! dictionary, one directory per language.

use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use ort::session::{builder::GraphOptimizationLevel, Session};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::runtime::Runtime;
use tracing::{debug, info};

const MODEL_REPO: &str = "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages";

/// Set to skip all network access
pub const OFFLINE_ENV: &str = "TABLE2SHEET_OFFLINE";

/// Files needed for recognition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Text recognition model (CRNN with CTC head)
    Recognition,
    /// Character dictionary, one symbol per line
    Dictionary,
}

impl ModelType {
    pub const ALL: [ModelType; 2] = [ModelType::Recognition, ModelType::Dictionary];

    pub fn filename(&self) -> &'static str {
        match self {
            ModelType::Recognition => "rec.onnx",
            ModelType::Dictionary => "dict.txt",
        }
    }

    pub fn download_url(&self, language: &str) -> String {
        format!("{}/{}/{}", MODEL_REPO, language, self.filename())
    }

    /// Plausible file size in bytes, used to reject truncated downloads
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelType::Recognition => (1_000_000, 50_000_000),
            ModelType::Dictionary => (100, 1_000_000),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::Recognition => "Text Recognition",
            ModelType::Dictionary => "Character Dictionary",
        }
    }
}

/// Record of downloaded files, stored as `manifest.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub language: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Unix seconds
    pub downloaded_at: u64,
}

/// Availability of one model file
#[derive(Debug, Clone)]
pub struct ModelStatus {
    pub model_type: ModelType,
    pub path: PathBuf,
    pub available: bool,
    pub size_bytes: Option<u64>,
}

/// Model manager for downloading and caching ONNX models
pub struct ModelManager {
    models_dir: PathBuf,
    language: String,
}

impl ModelManager {
    /// Manager rooted in the per-user data directory
    pub fn new(language: &str) -> Result<Self> {
        let models_dir = crate::storage::get_data_dir()?.join("models").join(language);
        Self::with_dir(models_dir, language)
    }

    /// Manager rooted in an explicit directory
    pub fn with_dir(models_dir: PathBuf, language: &str) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create model directory {:?}", models_dir))?;
        Ok(Self {
            models_dir,
            language: language.to_string(),
        })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        self.models_dir.join(model_type.filename())
    }

    /// Present and of plausible size
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        match std::fs::metadata(self.model_path(model_type)) {
            Ok(metadata) => {
                let (min, max) = model_type.expected_size_range();
                (min..=max).contains(&metadata.len())
            }
            Err(_) => false,
        }
    }

    pub fn are_models_ready(&self) -> bool {
        ModelType::ALL.iter().all(|&m| self.is_model_available(m))
    }

    pub fn get_model_status(&self) -> Vec<ModelStatus> {
        ModelType::ALL
            .iter()
            .map(|&model_type| {
                let path = self.model_path(model_type);
                let size_bytes = std::fs::metadata(&path).ok().map(|m| m.len());
                ModelStatus {
                    model_type,
                    available: self.is_model_available(model_type),
                    path,
                    size_bytes,
                }
            })
            .collect()
    }

    /// Path to the model file, downloading it first if needed
    pub fn ensure_model(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(model_type);

        if self.is_model_available(model_type) {
            debug!("Model {:?} already available at {:?}", model_type, path);
            return Ok(path);
        }

        self.download_model(model_type)?;
        Ok(path)
    }

    pub fn ensure_all_models(&self) -> Result<()> {
        for model_type in ModelType::ALL {
            self.ensure_model(model_type)?;
        }
        Ok(())
    }

    /// Download a specific model (blocking)
    pub fn download_model(&self, model_type: ModelType) -> Result<()> {
        let url = model_type.download_url(&self.language);
        let path = self.model_path(model_type);

        if std::env::var_os(OFFLINE_ENV).is_some() {
            bail!(
                "Offline mode: cannot download models. Download {} manually and place it at {:?}",
                url,
                path
            );
        }

        info!("Downloading {} model from {}", model_type.display_name(), url);

        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        let sha256 = rt.block_on(download_file(&url, &path))?;

        if !self.is_model_available(model_type) {
            bail!(
                "Downloaded {} has an implausible size, refusing to use it",
                model_type.filename()
            );
        }

        self.record_download(model_type, sha256)?;
        info!("Successfully downloaded {} model", model_type.display_name());
        Ok(())
    }

    fn record_download(&self, model_type: ModelType, sha256: String) -> Result<()> {
        let mut manifest = self.load_manifest()?;
        let size_bytes = std::fs::metadata(self.model_path(model_type))?.len();
        let downloaded_at = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let model_info = ModelInfo {
            filename: model_type.filename().to_string(),
            size_bytes,
            sha256,
            downloaded_at,
        };

        match manifest
            .models
            .iter_mut()
            .find(|m| m.filename == model_info.filename)
        {
            Some(existing) => *existing = model_info,
            None => manifest.models.push(model_info),
        }

        self.save_manifest(&manifest)
    }

    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(ModelManifest {
                language: self.language.clone(),
                models: Vec::new(),
            })
        }
    }

    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(self.models_dir.join("manifest.json"), content)?;
        Ok(())
    }

    /// Read the dictionary, one symbol per line
    pub fn load_dictionary(&self) -> Result<Vec<String>> {
        let path = self.ensure_model(ModelType::Dictionary)?;
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read dictionary {:?}", path))?;
        Ok(parse_dictionary(&content))
    }

    /// Open an ONNX Runtime session for the recognition model
    pub fn load_session(&self, intra_threads: usize) -> Result<Session> {
        let path = self.ensure_model(ModelType::Recognition)?;
        info!("Loading ONNX model from {:?}", path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads.max(1))?
            .commit_from_file(&path)
            .context("Failed to load ONNX model")?;

        Ok(session)
    }
}

/// Dictionary lines, trailing `\r` stripped
pub fn parse_dictionary(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|l| l.trim_end_matches('\r').to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Stream `url` into `path` through a temp file. Returns the SHA-256 hex digest.
async fn download_file(url: &str, path: &Path) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to send download request")?;

    if !response.status().is_success() {
        bail!("Download failed with status {}: {}", response.status(), url);
    }

    let total_size = response.content_length();
    debug!("Download size: {:?} bytes", total_size);

    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;
        file.write_all(&chunk).context("Failed to write to temp file")?;
        hasher.update(&chunk);
        downloaded += chunk.len() as u64;
    }

    file.flush().context("Failed to flush temp file")?;
    drop(file);
    debug!("Downloaded {} bytes from {}", downloaded, url);

    std::fs::rename(&temp_path, path)
        .context("Failed to move downloaded file to final location")?;

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_model_type_filenames() {
        assert_eq!(ModelType::Recognition.filename(), "rec.onnx");
        assert_eq!(ModelType::Dictionary.filename(), "dict.txt");
    }

    #[test]
    fn test_download_url_uses_language() {
        assert_eq!(
            ModelType::Dictionary.download_url("korean"),
            "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/korean/dict.txt"
        );
    }

    #[test]
    fn test_missing_and_truncated_models_are_unavailable() {
        let dir = TempDir::new().unwrap();
        let manager = ModelManager::with_dir(dir.path().join("english"), "english").unwrap();
        assert!(!manager.are_models_ready());

        std::fs::write(manager.model_path(ModelType::Recognition), b"short").unwrap();
        assert!(!manager.is_model_available(ModelType::Recognition));

        std::fs::write(manager.model_path(ModelType::Dictionary), "a\n".repeat(100)).unwrap();
        assert!(manager.is_model_available(ModelType::Dictionary));

        let status = manager.get_model_status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].size_bytes, Some(5));
    }

    #[test]
    fn test_dictionary_is_read_from_cache() {
        let dir = TempDir::new().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf(), "english").unwrap();
        let mut content = String::new();
        for c in "0123456789abcdefghijklmnopqrstuvwxyz".chars().cycle().take(60) {
            content.push(c);
            content.push_str("\r\n");
        }
        std::fs::write(manager.model_path(ModelType::Dictionary), content).unwrap();

        let dict = manager.load_dictionary().unwrap();
        assert_eq!(dict.len(), 60);
        assert_eq!(dict[0], "0");
        assert_eq!(dict[10], "a");
    }

    #[test]
    fn test_manifest_defaults_to_language() {
        let dir = TempDir::new().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf(), "latin").unwrap();
        let manifest = manager.load_manifest().unwrap();
        assert_eq!(manifest.language, "latin");
        assert!(manifest.models.is_empty());

        manager.save_manifest(&manifest).unwrap();
        assert!(dir.path().join("manifest.json").exists());
    }

    #[test]
    fn test_parse_dictionary_skips_blank_lines() {
        assert_eq!(parse_dictionary("a\n\nb\r\n"), vec!["a", "b"]);
    }
}
