//! Model collaborators.
//!
//! The engine never loads a model itself. Detectors and classifiers are
//! constructed once at process start, bundled into a `ModelSet`, and handed
//! to the pipeline.

mod backend;
pub mod backends;

pub use backend::{BrandClassifier, HelmetClassifier, ModelSet, ObjectDetector, PoseClassifier};
pub use backends::ReplayScript;
