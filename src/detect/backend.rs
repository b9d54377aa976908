use anyhow::Result;

use crate::decision::{BrandLabel, HelmetReport, PoseClass};
use crate::frame::Photo;
use crate::geometry::BoundingBox;

/// Object detector for the two classes the engine reasons about.
///
/// Either list may be empty. An `Err` means the detector itself failed and
/// aborts the report; it is not the same as finding nothing.
pub trait ObjectDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Kickboard boxes in photo pixels, in detector order.
    fn detect_kickboards(&mut self, photo: &Photo) -> Result<Vec<BoundingBox>>;

    /// Person boxes in photo pixels, in detector order.
    fn detect_people(&mut self, photo: &Photo) -> Result<Vec<BoundingBox>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Rider/pedestrian classifier, run on one person's crop.
///
/// Errors are recovered by the caller as `PoseClass::Unknown`.
pub trait PoseClassifier: Send {
    fn name(&self) -> &'static str;

    fn classify_pose(&mut self, person: &Photo) -> Result<PoseClass>;
}

/// Kickboard brand classifier, run on the group crop.
pub trait BrandClassifier: Send {
    fn name(&self) -> &'static str;

    /// `Ok(None)` when no brand could be recognised.
    fn classify_brand(&mut self, crop: &Photo) -> Result<Option<BrandLabel>>;
}

/// Helmet detector, run on the group crop. Returned boxes are crop-relative.
pub trait HelmetClassifier: Send {
    fn name(&self) -> &'static str;

    fn classify_helmet(&mut self, crop: &Photo) -> Result<HelmetReport>;
}

/// The models one pipeline owns. Built once at startup and injected.
pub struct ModelSet {
    pub detector: Box<dyn ObjectDetector>,
    pub pose: Box<dyn PoseClassifier>,
    pub brand: Box<dyn BrandClassifier>,
    pub helmet: Box<dyn HelmetClassifier>,
}

impl ModelSet {
    pub fn warm_up(&mut self) -> Result<()> {
        self.detector.warm_up()
    }

    pub fn describe(&self) -> String {
        format!(
            "detector={} pose={} brand={} helmet={}",
            self.detector.name(),
            self.pose.name(),
            self.brand.name(),
            self.helmet.name()
        )
    }
}
