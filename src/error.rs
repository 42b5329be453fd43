use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrismError {
    // Input errors
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("product not found: {product_id}")]
    ProductNotFound { product_id: String },

    #[error("product already exists: {product_id}")]
    ProductAlreadyExists { product_id: String },

    #[error("product is locked: {product_id}")]
    ProductLocked { product_id: String },

    #[error("reference not found: {ref_id}")]
    ReferenceNotFound { ref_id: String },

    #[error("validation error: {0}")]
    Validation(String),

    // Index integrity errors
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding is not unit-normalized (norm = {norm})")]
    NotNormalized { norm: f32 },

    // Persistence errors
    #[error("index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u64, actual: u64 },

    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bincode serialization error: {0}")]
    Bincode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // Stage failures
    #[error("encoder error: {0}")]
    Encoder(String),

    #[error("ocr error: {0}")]
    Ocr(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    // Config errors
    #[error("config error: {0}")]
    Config(String),

    // Internal
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<Box<bincode::ErrorKind>> for PrismError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        PrismError::Bincode(e.to_string())
    }
}

impl From<tempfile::PersistError> for PrismError {
    fn from(e: tempfile::PersistError) -> Self {
        PrismError::Io(e.error)
    }
}

pub type Result<T> = std::result::Result<T, PrismError>;

impl PrismError {
    pub fn status_code(&self) -> u16 {
        match self {
            PrismError::ProductNotFound { .. } | PrismError::ReferenceNotFound { .. } => 404,

            PrismError::ProductAlreadyExists { .. } | PrismError::ProductLocked { .. } => 409,

            PrismError::Image(image::ImageError::IoError(_)) => 500,

            PrismError::InvalidImage(_)
            | PrismError::Image(_)
            | PrismError::DimensionMismatch { .. }
            | PrismError::NotNormalized { .. }
            | PrismError::Validation(_) => 400,

            _ => 500,
        }
    }
}
