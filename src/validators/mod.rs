//! Secondary checks applied to index matches.

pub mod shape;
pub mod text;

pub use shape::ShapeValidator;
pub use text::{
    match_keywords, NullTextExtractor, TextExtractor, TextFragment, TextValidator,
    TextVerification,
};
