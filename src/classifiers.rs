//! Classifiers shipped with the pipeline.

pub mod strokes;
pub mod template_matcher;

pub use strokes::{StrokeClassifier, StrokeThresholds, Surface};
pub use template_matcher::TemplateMatcher;
