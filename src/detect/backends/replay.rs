use std::collections::VecDeque;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::decision::{BrandLabel, HelmetReport, PoseClass};
use crate::detect::backend::{
    BrandClassifier, HelmetClassifier, ModelSet, ObjectDetector, PoseClassifier,
};
use crate::frame::Photo;
use crate::geometry::BoundingBox;

/// Recorded model outputs for one photograph.
///
/// Classifier answers are queues consumed in call order. The pipeline calls
/// classifiers sequentially (people in group order, groups in kickboard
/// order), so a script replays deterministically. A drained queue behaves
/// like a failing classifier.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReplayScript {
    pub kickboards: Vec<BoundingBox>,
    pub people: Vec<BoundingBox>,
    pub poses: Vec<PoseClass>,
    pub brands: Vec<Option<BrandLabel>>,
    pub helmets: Vec<HelmetReport>,
}

impl ReplayScript {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read replay script {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid replay script {}", path.display()))
    }

    pub fn into_models(self) -> ModelSet {
        ModelSet {
            detector: Box::new(ReplayDetector {
                kickboards: self.kickboards,
                people: self.people,
            }),
            pose: Box::new(ReplayPoseClassifier {
                answers: self.poses.into(),
            }),
            brand: Box::new(ReplayBrandClassifier {
                answers: self.brands.into(),
            }),
            helmet: Box::new(ReplayHelmetClassifier {
                answers: self.helmets.into(),
            }),
        }
    }
}

pub struct ReplayDetector {
    kickboards: Vec<BoundingBox>,
    people: Vec<BoundingBox>,
}

impl ReplayDetector {
    pub fn new(kickboards: Vec<BoundingBox>, people: Vec<BoundingBox>) -> Self {
        Self { kickboards, people }
    }
}

impl ObjectDetector for ReplayDetector {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect_kickboards(&mut self, _photo: &Photo) -> Result<Vec<BoundingBox>> {
        Ok(self.kickboards.clone())
    }

    fn detect_people(&mut self, _photo: &Photo) -> Result<Vec<BoundingBox>> {
        Ok(self.people.clone())
    }
}

pub struct ReplayPoseClassifier {
    answers: VecDeque<PoseClass>,
}

impl ReplayPoseClassifier {
    pub fn new(answers: Vec<PoseClass>) -> Self {
        Self {
            answers: answers.into(),
        }
    }
}

impl PoseClassifier for ReplayPoseClassifier {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn classify_pose(&mut self, _person: &Photo) -> Result<PoseClass> {
        self.answers
            .pop_front()
            .ok_or_else(|| anyhow!("replay pose answers exhausted"))
    }
}

pub struct ReplayBrandClassifier {
    answers: VecDeque<Option<BrandLabel>>,
}

impl ReplayBrandClassifier {
    pub fn new(answers: Vec<Option<BrandLabel>>) -> Self {
        Self {
            answers: answers.into(),
        }
    }
}

impl BrandClassifier for ReplayBrandClassifier {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn classify_brand(&mut self, _crop: &Photo) -> Result<Option<BrandLabel>> {
        self.answers
            .pop_front()
            .ok_or_else(|| anyhow!("replay brand answers exhausted"))
    }
}

pub struct ReplayHelmetClassifier {
    answers: VecDeque<HelmetReport>,
}

impl ReplayHelmetClassifier {
    pub fn new(answers: Vec<HelmetReport>) -> Self {
        Self {
            answers: answers.into(),
        }
    }
}

impl HelmetClassifier for ReplayHelmetClassifier {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn classify_helmet(&mut self, _crop: &Photo) -> Result<HelmetReport> {
        self.answers
            .pop_front()
            .ok_or_else(|| anyhow!("replay helmet answers exhausted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn photo() -> Photo {
        Photo::from_rgb(RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])))
    }

    #[test]
    fn script_parses_and_replays_in_order() {
        let script: ReplayScript = serde_json::from_str(
            r#"{
                "kickboards": [[100, 100, 200, 200]],
                "people": [[120, 120, 180, 180], [400, 400, 450, 450]],
                "poses": ["rider", "pedestrian"],
                "brands": ["BrandX", null],
                "helmets": [{"detected": false, "confidence": 0.42}]
            }"#,
        )
        .unwrap();
        let mut models = script.into_models();
        let p = photo();

        assert_eq!(models.detector.detect_kickboards(&p).unwrap().len(), 1);
        assert_eq!(models.detector.detect_people(&p).unwrap().len(), 2);
        assert_eq!(models.pose.classify_pose(&p).unwrap(), PoseClass::Rider);
        assert_eq!(
            models.pose.classify_pose(&p).unwrap(),
            PoseClass::Pedestrian
        );
        assert!(models.pose.classify_pose(&p).is_err());
        assert_eq!(
            models.brand.classify_brand(&p).unwrap(),
            Some(BrandLabel("BrandX".to_string()))
        );
        assert_eq!(models.brand.classify_brand(&p).unwrap(), None);
        let helmet = models.helmet.classify_helmet(&p).unwrap();
        assert!(!helmet.detected);
        assert!(helmet.boxes.is_empty());
        assert_eq!(helmet.confidence, 0.42);
        assert!(models.helmet.classify_helmet(&p).is_err());
    }

    #[test]
    fn empty_script_detects_nothing() {
        let mut models = ReplayScript::default().into_models();
        assert!(models.detector.detect_people(&photo()).unwrap().is_empty());
        assert_eq!(
            models.describe(),
            "detector=replay pose=replay brand=replay helmet=replay"
        );
        assert!(models.warm_up().is_ok());
    }
}
