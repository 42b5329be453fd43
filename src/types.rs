use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier of a product in the catalog.
pub type ProductId = String;

/// Index-assigned identifier of a stored embedding. Never reused.
pub type Uid = u64;

/// Axis-aligned rectangle in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
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

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True when the two rectangles share a region of positive area.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        x2 > x1 && y2 > y1
    }

    /// Smallest rectangle containing both boxes.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        BoundingBox::new(x, y, right - x, bottom - y)
    }

    /// Restrict the box to a `width` x `height` image. May produce an empty box.
    pub fn clamp(&self, width: u32, height: u32) -> BoundingBox {
        let x = self.x.min(width);
        let y = self.y.min(height);
        let right = self.right().min(width);
        let bottom = self.bottom().min(height);
        BoundingBox::new(x, y, right - x, bottom - y)
    }

    /// Multiply every coordinate by `factor`, truncating toward zero.
    pub fn scaled(&self, factor: f64) -> BoundingBox {
        BoundingBox::new(
            (self.x as f64 * factor) as u32,
            (self.y as f64 * factor) as u32,
            (self.width as f64 * factor) as u32,
            (self.height as f64 * factor) as u32,
        )
    }
}

/// Per-product validation settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_shape_tolerance")]
    pub shape_tolerance: f32,
}

fn default_shape_tolerance() -> f32 {
    0.15
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            shape_tolerance: default_shape_tolerance(),
        }
    }
}

/// A stored example image owned by a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceImage {
    pub id: String,
    pub url: String,
    #[serde(default = "default_angle")]
    pub angle: String,
    #[serde(default = "Utc::now")]
    pub added_at: DateTime<Utc>,
}

fn default_angle() -> String {
    "unknown".to_string()
}

/// A catalog product and its curated references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub reference_images: Vec<ReferenceImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl Product {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            active: true,
            locked: false,
            keywords: Vec::new(),
            validation: ValidationConfig::default(),
            reference_images: Vec::new(),
            created_at: None,
        }
    }

    /// Metadata template for an index entry created from one of this product's references.
    pub fn entry_metadata(&self, ref_id: &str) -> EntryMetadata {
        EntryMetadata {
            name: self.name.clone(),
            keywords: self.keywords.clone(),
            validation: self.validation,
            ref_id: Some(ref_id.to_string()),
            learned: false,
            source_confidence: None,
            timestamp: None,
        }
    }
}

/// Structured metadata snapshot stored alongside each embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,
    #[serde(default)]
    pub learned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_confidence: Option<f32>,
    /// Unix seconds at which the reference was learned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl EntryMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keywords: Vec::new(),
            validation: ValidationConfig::default(),
            ref_id: None,
            learned: false,
            source_confidence: None,
            timestamp: None,
        }
    }
}

/// One accepted product detection in an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub product_id: ProductId,
    pub product_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub text_verified: bool,
    pub shape_valid: bool,
    #[serde(default)]
    pub matched_keywords: Vec<String>,
    pub processing_ms: f64,
}
