//! Shared helpers for model argument parsing and image preprocessing

pub mod models;
pub mod preprocessing;

pub use models::ModelSpecParser;
pub use preprocessing::{ImagePreprocessor, Letterbox};
