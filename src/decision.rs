//! Verdict state machine for one kickboard group.
//!
//! ```text
//!   poses ──► judge_poses ──┬─ n_rider >= 2 ─────────────► DoubleRidingSuspected
//!                           ├─ n_rider == 1 ─► NeedBrand
//!                           ├─ pedestrians only ─────────► PedestrianRejected
//!                           └─ unknown only ─────────────► Undeterminable
//!   NeedBrand ──► judge_brand ──┬─ none ─────────────────► Rejected(BrandDetectionFailed)
//!                               └─ label ─► NeedHelmet
//!   NeedHelmet ─► judge_helmet ────────────────────────────► SingleRider
//! ```
//!
//! Every transition is a pure function. The pipeline performs the classifier
//! call a state asks for and feeds the answer into the next transition.

use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseClass {
    Rider,
    Pedestrian,
    Unknown,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoseTally {
    pub riders: usize,
    pub pedestrians: usize,
    pub unknown: usize,
}

impl PoseTally {
    pub fn record(&mut self, pose: PoseClass) {
        match pose {
            PoseClass::Rider => self.riders += 1,
            PoseClass::Pedestrian => self.pedestrians += 1,
            PoseClass::Unknown => self.unknown += 1,
        }
    }
}

impl FromIterator<PoseClass> for PoseTally {
    fn from_iter<I: IntoIterator<Item = PoseClass>>(iter: I) -> Self {
        let mut tally = PoseTally::default();
        for pose in iter {
            tally.record(pose);
        }
        tally
    }
}

/// Brand label reported by the brand classifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrandLabel(pub String);

impl BrandLabel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Output of the helmet classifier. Boxes are in group-crop pixels.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HelmetReport {
    pub detected: bool,
    #[serde(default)]
    pub boxes: Vec<BoundingBox>,
    #[serde(default)]
    pub confidence: f32,
}

impl HelmetReport {
    /// Stand-in used when the classifier fails.
    pub fn not_detected() -> Self {
        Self::default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HelmetStatus {
    Compliant,
    Violation,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    DetectionFailure {
        kickboard_missing: bool,
        person_missing: bool,
    },
    BrandDetectionFailed,
    DegenerateCrop,
}

impl RejectReason {
    pub fn tags(&self) -> Vec<String> {
        match self {
            RejectReason::DetectionFailure {
                kickboard_missing,
                person_missing,
            } => {
                let mut tags = Vec::new();
                if *kickboard_missing {
                    tags.push(TAG_KICKBOARD_MISSING.to_string());
                }
                if *person_missing {
                    tags.push(TAG_PERSON_MISSING.to_string());
                }
                tags
            }
            RejectReason::BrandDetectionFailed => vec![TAG_BRAND_FAILED.to_string()],
            RejectReason::DegenerateCrop => vec![TAG_DEGENERATE_CROP.to_string()],
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::DetectionFailure { .. } => write!(f, "detection failure"),
            RejectReason::BrandDetectionFailed => write!(f, "brand detection failed"),
            RejectReason::DegenerateCrop => write!(f, "degenerate crop"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verdict {
    Rejected {
        reason: RejectReason,
    },
    DoubleRidingSuspected,
    SingleRider {
        helmet: HelmetStatus,
        brand: BrandLabel,
        confidence: f32,
    },
    PedestrianRejected,
    Undeterminable,
}

pub const TAG_KICKBOARD_MISSING: &str = "kickboard not detected";
pub const TAG_PERSON_MISSING: &str = "person not detected";
pub const TAG_DOUBLE_RIDING: &str = "double riding suspected";
pub const TAG_PEDESTRIAN: &str = "judged as pedestrian";
pub const TAG_BRAND_FAILED: &str = "brand detection failed";
pub const TAG_DEGENERATE_CROP: &str = "crop region degenerate";
pub const TAG_NO_VIOLATION: &str = "no violation found";
pub const TAG_HELMET_NOT_WORN: &str = "helmet not worn";
pub const TAG_UNDETERMINABLE: &str = "analysis not possible";

/// Review state a conclusion is filed under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Automatically rejected; no human review needed.
    Rejected,
    /// Awaiting human confirmation.
    Unconfirmed,
}

impl Verdict {
    pub fn rejected(reason: RejectReason) -> Self {
        Verdict::Rejected { reason }
    }

    pub fn status(&self) -> ReviewStatus {
        match self {
            Verdict::Rejected { .. } | Verdict::PedestrianRejected | Verdict::Undeterminable => {
                ReviewStatus::Rejected
            }
            Verdict::DoubleRidingSuspected | Verdict::SingleRider { .. } => {
                ReviewStatus::Unconfirmed
            }
        }
    }

    /// Human-readable findings stored alongside the verdict.
    pub fn tags(&self) -> Vec<String> {
        match self {
            Verdict::Rejected { reason } => reason.tags(),
            Verdict::DoubleRidingSuspected => vec![TAG_DOUBLE_RIDING.to_string()],
            Verdict::SingleRider {
                helmet: HelmetStatus::Compliant,
                ..
            } => vec![TAG_NO_VIOLATION.to_string()],
            Verdict::SingleRider {
                helmet: HelmetStatus::Violation,
                ..
            } => vec![TAG_HELMET_NOT_WORN.to_string()],
            Verdict::PedestrianRejected => vec![TAG_PEDESTRIAN.to_string()],
            Verdict::Undeterminable => vec![TAG_UNDETERMINABLE.to_string()],
        }
    }

    /// Short stable name, used for logs and run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Verdict::Rejected { .. } => "rejected",
            Verdict::DoubleRidingSuspected => "double_riding_suspected",
            Verdict::SingleRider {
                helmet: HelmetStatus::Compliant,
                ..
            } => "single_rider_compliant",
            Verdict::SingleRider {
                helmet: HelmetStatus::Violation,
                ..
            } => "single_rider_violation",
            Verdict::PedestrianRejected => "pedestrian_rejected",
            Verdict::Undeterminable => "undeterminable",
        }
    }

    /// Whether a conclusion record is written for this verdict.
    pub fn is_persisted(&self) -> bool {
        !matches!(self, Verdict::Undeterminable)
    }
}

/// Position in the per-group state machine.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    NeedBrand,
    NeedHelmet(BrandLabel),
    Done(Verdict),
}

/// Rider count rules, in priority order.
pub fn judge_poses(tally: PoseTally) -> Step {
    if tally.riders >= 2 {
        Step::Done(Verdict::DoubleRidingSuspected)
    } else if tally.riders == 1 {
        Step::NeedBrand
    } else if tally.pedestrians >= 1 {
        Step::Done(Verdict::PedestrianRejected)
    } else {
        Step::Done(Verdict::Undeterminable)
    }
}

pub fn judge_brand(brand: Option<BrandLabel>) -> Step {
    match brand {
        Some(label) => Step::NeedHelmet(label),
        None => Step::Done(Verdict::rejected(RejectReason::BrandDetectionFailed)),
    }
}

pub fn judge_helmet(brand: BrandLabel, helmet: &HelmetReport) -> Verdict {
    let status = if helmet.detected {
        HelmetStatus::Compliant
    } else {
        HelmetStatus::Violation
    };
    Verdict::SingleRider {
        helmet: status,
        brand,
        confidence: helmet.confidence,
    }
}

/// Runs the whole table over already-collected classifier outputs.
///
/// `brand` and `helmet` are only consulted when the state machine reaches the
/// step that asks for them, so callers may pass answers that were never
/// requested.
pub fn decide(
    tally: PoseTally,
    mut brand: Option<BrandLabel>,
    helmet: Option<&HelmetReport>,
) -> Verdict {
    let fallback = HelmetReport::not_detected();
    let mut step = judge_poses(tally);
    loop {
        step = match step {
            Step::Done(verdict) => return verdict,
            Step::NeedBrand => judge_brand(brand.take()),
            Step::NeedHelmet(label) => Step::Done(judge_helmet(label, helmet.unwrap_or(&fallback))),
        };
    }
}
