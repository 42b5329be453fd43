//! Prism: visual product detection over a reference-embedding index.

pub mod catalog;
pub mod config;
pub mod detector;
pub mod embedding;
pub mod error;
pub mod index;
pub mod learning;
pub mod metrics;
pub mod scanner;
pub mod server;
pub mod types;
pub mod validators;
