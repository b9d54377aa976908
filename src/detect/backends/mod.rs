pub mod replay;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use replay::{
    ReplayBrandClassifier, ReplayDetector, ReplayHelmetClassifier, ReplayPoseClassifier,
    ReplayScript,
};

#[cfg(feature = "backend-tract")]
pub use tract::TractPoseClassifier;
