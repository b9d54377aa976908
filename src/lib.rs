//! Kickboard violation review engine
//!
//! Takes a citizen report (one photograph plus metadata) and decides, for
//! every kickboard in the picture, whether the report shows a violation.
//!
//! # Flow
//!
//! 1. Detect kickboards and people (`detect::ObjectDetector`).
//! 2. Assign each person to the nearest kickboard and keep the closest
//!    `top_k` per kickboard (`assign`).
//! 3. Crop each group with padding (`geometry`) and classify each member's
//!    pose; then, if exactly one rider remains, the brand and the helmet
//!    (`decision`).
//! 4. Persist one conclusion per group, with an annotated evidence crop
//!    (`evidence`, `conclusion`, `storage`).
//!
//! Models are injected; the engine never loads one itself. `pipeline` ties
//! the steps together.
//!
//! # Module Structure
//!
//! - `geometry`: boxes, centers, padded crop regions
//! - `assign`: nearest-kickboard assignment and top-K grouping
//! - `decision`: pose tally, verdicts and the per-group decision table
//! - `detect`: model traits and backends (replay, optional ONNX)
//! - `ingest`: report events and photo loading
//! - `pipeline`: per-report orchestration

use anyhow::Result;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod assign;
pub mod conclusion;
pub mod config;
pub mod decision;
pub mod detect;
pub mod evidence;
pub mod frame;
pub mod geo;
pub mod geometry;
pub mod ingest;
pub mod pipeline;
pub mod storage;

pub use assign::{assign_people, form_groups, Assignment, Group, GroupMember};
pub use conclusion::{ConclusionBuilder, ConclusionKey, ConclusionRecord};
pub use config::{EvidenceSettings, ReviewConfig};
pub use decision::{
    decide, BrandLabel, HelmetReport, HelmetStatus, PoseClass, PoseTally, RejectReason,
    ReviewStatus, Verdict,
};
pub use detect::{
    BrandClassifier, HelmetClassifier, ModelSet, ObjectDetector, PoseClassifier, ReplayScript,
};
pub use evidence::{EvidenceRef, EvidenceSink, FilesystemEvidenceSink, InMemoryEvidenceSink};
pub use frame::Photo;
pub use geo::{GeoResolver, GpsPoint, StaticGeoResolver};
pub use geometry::{union_with_padding, BoundingBox, CropRegion, GeometryError};
pub use ingest::{load_photo, read_reports, ReportEvent};
pub use pipeline::{
    analyze_photo, EngineSettings, GroupOutcome, PhotoAnalysis, ReviewOutcome, ReviewPipeline,
};
pub use storage::{ConclusionSink, InMemoryConclusionStore, SqliteConclusionStore};

#[cfg(feature = "geocode-vworld")]
pub use geo::VworldGeoResolver;

fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}
