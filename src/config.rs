//! Runtime configuration.
//!
//! Loaded from an optional TOML file and then overridden by environment
//! variables. Every field has a default so an empty file (or none at all)
//! yields a working configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PrismError, Result};

const DEFAULT_CONFIG_PATH: &str = "config/prism.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub auto_learning: AutoLearningConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on an uploaded image body.
    pub max_image_bytes: usize,
    pub request_timeout_secs: u64,
    /// Uploads whose longer side exceeds this are downscaled before detection.
    pub max_image_side: u32,
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_image_bytes: 10 * 1024 * 1024,
            request_timeout_secs: 30,
            max_image_side: 1920,
            cors_permissive: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub patch_size: u32,
    pub stride: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            patch_size: 224,
            stride: 112,
        }
    }
}

/// What to do when the persisted index cannot be restored at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePolicy {
    /// Log the failure and start with an empty index.
    #[default]
    Empty,
    /// Refuse to start.
    Fail,
}

impl FromStr for RestorePolicy {
    type Err = PrismError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "empty" => Ok(RestorePolicy::Empty),
            "fail" => Ok(RestorePolicy::Fail),
            other => Err(PrismError::Config(format!(
                "unknown restore policy '{other}' (expected 'empty' or 'fail')"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub dimension: usize,
    /// Base path of the two persisted artifacts (`<path>.vectors`, `<path>.meta.json`).
    pub path: PathBuf,
    pub restore_policy: RestorePolicy,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: 512,
            path: PathBuf::from("data/index/product_index"),
            restore_policy: RestorePolicy::Empty,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub min_confidence: f32,
    /// Matches fetched from the index per region.
    pub top_k: usize,
    /// Longer side above which a region is downscaled before OCR.
    pub ocr_max_side: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.75,
            top_k: 3,
            ocr_max_side: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoLearningConfig {
    pub enabled: bool,
    pub threshold: f32,
    pub max_references_per_product: usize,
    pub learned_dir: PathBuf,
}

impl Default for AutoLearningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.95,
            max_references_per_product: 50,
            learned_dir: PathBuf::from("data/references/learned"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// JSON product catalog.
    pub path: PathBuf,
    /// Uploaded references are stored under `<reference_dir>/<product_id>/`.
    pub reference_dir: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("config/products.json"),
            reference_dir: PathBuf::from("data/references"),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// The file is `path` if given, else `$PRISM_CONFIG`, else
    /// `config/prism.toml` when it exists. Environment overrides are applied
    /// last and the result is validated.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let explicit = path
            .map(PathBuf::from)
            .or_else(|| std::env::var("PRISM_CONFIG").ok().map(PathBuf::from));

        let mut config = match explicit {
            Some(p) => Self::from_file(&p)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PrismError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| PrismError::Config(e.to_string()))
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_string("API_HOST") {
            self.server.host = v;
        }
        if let Some(v) = env_parse("API_PORT")? {
            self.server.port = v;
        }
        if let Some(mb) = env_parse::<usize>("MAX_IMAGE_SIZE_MB")? {
            self.server.max_image_bytes = mb * 1024 * 1024;
        }
        if let Some(v) = env_parse("REQUEST_TIMEOUT_SECONDS")? {
            self.server.request_timeout_secs = v;
        }
        if let Some(v) = env_string("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env_string("LOG_FORMAT") {
            self.logging.format = v;
        }
        if let Some(v) = env_string("CONFIG_PATH") {
            self.catalog.path = PathBuf::from(v);
        }
        if let Some(v) = env_string("INDEX_PATH") {
            self.index.path = PathBuf::from(v);
        }
        if let Some(v) = env_parse("INDEX_DIMENSION")? {
            self.index.dimension = v;
        }
        if let Some(v) = env_parse("INDEX_RESTORE_POLICY")? {
            self.index.restore_policy = v;
        }
        if let Some(v) = env_parse("MIN_CONFIDENCE")? {
            self.detection.min_confidence = v;
        }
        if let Some(v) = env_parse("PATCH_SIZE")? {
            self.scanner.patch_size = v;
        }
        if let Some(v) = env_parse("PATCH_STRIDE")? {
            self.scanner.stride = v;
        }
        if let Some(v) = env_parse("AUTO_LEARN_ENABLED")? {
            self.auto_learning.enabled = v;
        }
        if let Some(v) = env_parse("AUTO_LEARN_THRESHOLD")? {
            self.auto_learning.threshold = v;
        }
        if let Some(v) = env_parse("MAX_REFERENCES_PER_PRODUCT")? {
            self.auto_learning.max_references_per_product = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.scanner.patch_size == 0 || self.scanner.stride == 0 {
            return Err(PrismError::Config(
                "scanner.patch_size and scanner.stride must be > 0".into(),
            ));
        }
        if self.index.dimension == 0 {
            return Err(PrismError::Config("index.dimension must be > 0".into()));
        }
        if self.detection.top_k == 0 {
            return Err(PrismError::Config("detection.top_k must be > 0".into()));
        }
        for (name, value) in [
            ("detection.min_confidence", self.detection.min_confidence),
            ("auto_learning.threshold", self.auto_learning.threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PrismError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.auto_learning.max_references_per_product == 0 {
            return Err(PrismError::Config(
                "auto_learning.max_references_per_product must be > 0".into(),
            ));
        }
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| PrismError::Config(format!("{key}={raw}: {e}"))),
        None => Ok(None),
    }
}
