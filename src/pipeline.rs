//! One report, start to finish.
//!
//! `analyze_photo` is the engine proper: detector outputs in, one verdict per
//! group out. It owns no storage and, given the same model answers, always
//! returns the same verdicts and crops. `ReviewPipeline` wraps it with the
//! side effects: evidence images, conclusion records, geocoding.

use anyhow::Result;

use crate::assign::{assign_people, form_groups, Group};
use crate::conclusion::{ConclusionBuilder, ConclusionKey, ConclusionRecord};
use crate::decision::{
    judge_brand, judge_helmet, judge_poses, BrandLabel, HelmetReport, PoseClass, PoseTally,
    RejectReason, Step, Verdict,
};
use crate::detect::ModelSet;
use crate::evidence::EvidenceSink;
use crate::frame::{Photo, BOX_THICKNESS, HELMET_COLOR, KICKBOARD_COLOR, PERSON_COLOR};
use crate::geo::GeoResolver;
use crate::geometry::{union_with_padding, CropRegion, GeometryError};
use crate::ingest::{validate_report_id, ReportEvent};
use crate::storage::ConclusionSink;

pub const DEFAULT_CROP_PADDING: u32 = 200;
pub const DEFAULT_TOP_K: usize = 3;
pub const COMPACT_CROP_PADDING: u32 = 100;
pub const COMPACT_TOP_K: usize = 2;
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Tunables of the grouping step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    /// Pixels added on every side of a group's union before cropping.
    pub crop_padding: u32,
    /// People kept per kickboard, closest first.
    pub top_k: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            crop_padding: DEFAULT_CROP_PADDING,
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl EngineSettings {
    /// Tighter crops around at most two people.
    pub fn compact() -> Self {
        Self {
            crop_padding: COMPACT_CROP_PADDING,
            top_k: COMPACT_TOP_K,
        }
    }

    pub fn group_crop(
        &self,
        group: &Group,
        photo: &Photo,
    ) -> std::result::Result<CropRegion, GeometryError> {
        union_with_padding(
            &group.boxes(),
            self.crop_padding,
            photo.width(),
            photo.height(),
        )
    }
}

/// Verdict and working data for one group.
#[derive(Clone, Debug)]
pub struct GroupOutcome {
    pub group: Group,
    /// `None` when the padded union collapsed to nothing.
    pub crop: Option<CropRegion>,
    /// One entry per member, in member order.
    pub poses: Vec<PoseClass>,
    pub tally: PoseTally,
    pub helmet: Option<HelmetReport>,
    pub verdict: Verdict,
    /// Annotated crop, present for verdicts that are persisted with evidence.
    pub evidence: Option<Photo>,
}

#[derive(Clone, Debug)]
pub enum PhotoAnalysis {
    /// No kickboard or no person; the whole photograph is rejected.
    DetectionFailure(RejectReason),
    Groups(Vec<GroupOutcome>),
}

impl PhotoAnalysis {
    pub fn verdicts(&self) -> Vec<Verdict> {
        match self {
            PhotoAnalysis::DetectionFailure(reason) => vec![Verdict::rejected(reason.clone())],
            PhotoAnalysis::Groups(groups) => groups.iter().map(|g| g.verdict.clone()).collect(),
        }
    }
}

/// Runs detection, grouping and the per-group decision table on one photo.
///
/// Only detector errors are returned. Classifier errors are folded into the
/// decision (`Unknown` pose, missing brand, helmet not detected).
pub fn analyze_photo(
    settings: &EngineSettings,
    models: &mut ModelSet,
    photo: &Photo,
) -> Result<PhotoAnalysis> {
    let kickboards = models.detector.detect_kickboards(photo)?;
    let people = models.detector.detect_people(photo)?;
    log::info!(
        "detected {} kickboard(s), {} person(s)",
        kickboards.len(),
        people.len()
    );

    if kickboards.is_empty() || people.is_empty() {
        return Ok(PhotoAnalysis::DetectionFailure(
            RejectReason::DetectionFailure {
                kickboard_missing: kickboards.is_empty(),
                person_missing: people.is_empty(),
            },
        ));
    }

    let assignments = assign_people(&kickboards, &people);
    let groups = form_groups(&kickboards, &people, &assignments, settings.top_k);
    let mut outcomes = Vec::with_capacity(groups.len());
    for group in groups {
        outcomes.push(evaluate_group(settings, models, photo, group)?);
    }
    Ok(PhotoAnalysis::Groups(outcomes))
}

fn evaluate_group(
    settings: &EngineSettings,
    models: &mut ModelSet,
    photo: &Photo,
    group: Group,
) -> Result<GroupOutcome> {
    let crop_region = match settings.group_crop(&group, photo) {
        Ok(region) => region,
        Err(err) => {
            log::warn!("kickboard {}: {}; rejecting group", group.kickboard, err);
            return Ok(GroupOutcome {
                group,
                crop: None,
                poses: Vec::new(),
                tally: PoseTally::default(),
                helmet: None,
                verdict: Verdict::rejected(RejectReason::DegenerateCrop),
                evidence: None,
            });
        }
    };
    let crop = photo.crop(&crop_region)?;

    let poses: Vec<PoseClass> = group
        .members
        .iter()
        .map(|member| match crop_region.relative(&member.bbox) {
            Some(local) => classify_person(models, &crop, &local, member.person),
            None => {
                log::warn!("person {} lies outside the group crop", member.person);
                PoseClass::Unknown
            }
        })
        .collect();
    let tally: PoseTally = poses.iter().copied().collect();

    let mut helmet = None;
    let mut step = judge_poses(tally);
    let verdict = loop {
        step = match step {
            Step::Done(verdict) => break verdict,
            Step::NeedBrand => judge_brand(classify_brand(models, &crop)),
            Step::NeedHelmet(label) => {
                let report = classify_helmet(models, &crop);
                let verdict = judge_helmet(label, &report);
                helmet = Some(report);
                Step::Done(verdict)
            }
        };
    };
    log::info!(
        "kickboard {}: riders={} pedestrians={} unknown={} -> {}",
        group.kickboard,
        tally.riders,
        tally.pedestrians,
        tally.unknown,
        verdict.kind()
    );

    let evidence = verdict
        .is_persisted()
        .then(|| annotate_group(&crop, &crop_region, &group, helmet.as_ref()));

    Ok(GroupOutcome {
        group,
        crop: Some(crop_region),
        poses,
        tally,
        helmet,
        verdict,
        evidence,
    })
}

fn classify_person(
    models: &mut ModelSet,
    crop: &Photo,
    local: &CropRegion,
    person: usize,
) -> PoseClass {
    let person_crop = match crop.crop(local) {
        Ok(person_crop) => person_crop,
        Err(err) => {
            log::warn!("person {}: {:#}", person, err);
            return PoseClass::Unknown;
        }
    };
    match models.pose.classify_pose(&person_crop) {
        Ok(pose) => pose,
        Err(err) => {
            log::warn!(
                "pose classifier {} failed on person {}: {:#}",
                models.pose.name(),
                person,
                err
            );
            PoseClass::Unknown
        }
    }
}

fn classify_brand(models: &mut ModelSet, crop: &Photo) -> Option<BrandLabel> {
    match models.brand.classify_brand(crop) {
        Ok(brand) => brand,
        Err(err) => {
            log::warn!(
                "brand classifier {} failed: {:#}",
                models.brand.name(),
                err
            );
            None
        }
    }
}

fn classify_helmet(models: &mut ModelSet, crop: &Photo) -> HelmetReport {
    match models.helmet.classify_helmet(crop) {
        Ok(report) => report,
        Err(err) => {
            log::warn!(
                "helmet classifier {} failed: {:#}",
                models.helmet.name(),
                err
            );
            HelmetReport::not_detected()
        }
    }
}

/// Copy of `crop` with the kickboard, its people and any detected helmets
/// outlined.
pub fn annotate_group(
    crop: &Photo,
    crop_region: &CropRegion,
    group: &Group,
    helmet: Option<&HelmetReport>,
) -> Photo {
    let mut annotated = crop.clone();
    if let Some(local) = crop_region.relative(&group.kickboard_box) {
        annotated.draw_box(&local, KICKBOARD_COLOR, BOX_THICKNESS);
    }
    for member in &group.members {
        if let Some(local) = crop_region.relative(&member.bbox) {
            annotated.draw_box(&local, PERSON_COLOR, BOX_THICKNESS);
        }
    }
    if let Some(report) = helmet.filter(|report| report.detected) {
        let whole = CropRegion {
            x1: 0,
            y1: 0,
            x2: crop.width(),
            y2: crop.height(),
        };
        for bbox in &report.boxes {
            if let Some(local) = whole.relative(bbox) {
                annotated.draw_box(&local, HELMET_COLOR, BOX_THICKNESS);
            }
        }
    }
    annotated
}

/// What happened to one report.
#[derive(Clone, Debug)]
pub struct ReviewOutcome {
    pub report_id: String,
    /// Kickboard index (none for a whole-photo verdict) and verdict, in order.
    pub verdicts: Vec<(Option<usize>, Verdict)>,
    pub persisted: Vec<ConclusionKey>,
}

/// Owns the models and sinks for a run. `process` takes `&mut self`, so
/// reports are handled strictly one at a time.
pub struct ReviewPipeline<E, C> {
    settings: EngineSettings,
    jpeg_quality: u8,
    models: ModelSet,
    evidence: E,
    conclusions: C,
    geo: Option<Box<dyn GeoResolver>>,
}

impl<E: EvidenceSink, C: ConclusionSink> ReviewPipeline<E, C> {
    pub fn new(settings: EngineSettings, models: ModelSet, evidence: E, conclusions: C) -> Self {
        Self {
            settings,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            models,
            evidence,
            conclusions,
            geo: None,
        }
    }

    pub fn with_geo(mut self, geo: Box<dyn GeoResolver>) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Replaces the models, e.g. with a per-report replay script.
    pub fn set_models(&mut self, models: ModelSet) {
        self.models = models;
    }

    pub fn models_mut(&mut self) -> &mut ModelSet {
        &mut self.models
    }

    pub fn evidence(&self) -> &E {
        &self.evidence
    }

    pub fn conclusions(&self) -> &C {
        &self.conclusions
    }

    pub fn process(&mut self, report: &ReportEvent, photo: &Photo) -> Result<ReviewOutcome> {
        validate_report_id(&report.id)?;
        log::info!(
            "report {}: reviewing {}x{} photo",
            report.id,
            photo.width(),
            photo.height()
        );

        let analysis = analyze_photo(&self.settings, &mut self.models, photo)?;
        let mut outcome = ReviewOutcome {
            report_id: report.id.clone(),
            verdicts: Vec::new(),
            persisted: Vec::new(),
        };

        // Evidence is written first and is idempotent for identical bytes;
        // records are committed in one batch at the end. A failed report can
        // therefore be reprocessed without leaving partial conclusions.
        let mut entries = Vec::new();
        match analysis {
            PhotoAnalysis::DetectionFailure(reason) => {
                log::info!("report {}: {}; rejecting photo", report.id, reason);
                let verdict = Verdict::rejected(reason);
                let region = self.resolve_region(report);
                let builder = ConclusionBuilder::new(report, verdict.clone()).region(region);
                entries.push((builder.key(), builder.build()));
                outcome.verdicts.push((None, verdict));
            }
            PhotoAnalysis::Groups(groups) => {
                for group in groups {
                    let kickboard = group.group.kickboard;
                    outcome.verdicts.push((Some(kickboard), group.verdict.clone()));
                    if !group.verdict.is_persisted() {
                        log::info!(
                            "report {} kickboard {}: undeterminable, nothing persisted",
                            report.id,
                            kickboard
                        );
                        continue;
                    }
                    entries.push(self.prepare_group(report, group)?);
                }
            }
        }

        if !entries.is_empty() {
            self.conclusions.persist_all(&entries)?;
        }
        for (key, _) in entries {
            log::info!("{}: conclusion persisted", key);
            outcome.persisted.push(key);
        }
        Ok(outcome)
    }

    fn prepare_group(
        &mut self,
        report: &ReportEvent,
        outcome: GroupOutcome,
    ) -> Result<(ConclusionKey, ConclusionRecord)> {
        let region = self.resolve_region(report);
        let mut builder = ConclusionBuilder::new(report, outcome.verdict)
            .kickboard(outcome.group.kickboard)
            .region(region);
        let key = builder.key();
        if let Some(crop) = outcome.crop {
            builder = builder.crop(crop);
        }
        if let Some(annotated) = outcome.evidence {
            let jpeg = annotated.encode_jpeg(self.jpeg_quality)?;
            let evidence = self.evidence.store(&key.evidence_name(), &jpeg)?;
            log::info!("{}: evidence stored at {}", key, evidence.url);
            builder = builder.evidence(evidence);
        }
        Ok((key, builder.build()))
    }

    fn resolve_region(&mut self, report: &ReportEvent) -> Option<String> {
        let point = match report.gps()? {
            Ok(point) => point,
            Err(err) => {
                log::warn!("report {}: {:#}", report.id, err);
                return None;
            }
        };
        let geo = self.geo.as_mut()?;
        match geo.resolve(point) {
            Ok(address) => Some(address),
            Err(err) => {
                log::warn!(
                    "report {}: geocoder {} failed: {:#}",
                    report.id,
                    geo.name(),
                    err
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{HelmetStatus, ReviewStatus, TAG_BRAND_FAILED};
    use crate::detect::backends::{
        ReplayBrandClassifier, ReplayDetector, ReplayPoseClassifier,
    };
    use crate::detect::{HelmetClassifier, ReplayScript};
    use crate::evidence::InMemoryEvidenceSink;
    use crate::geo::StaticGeoResolver;
    use crate::geometry::BoundingBox;
    use crate::storage::InMemoryConclusionStore;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32) -> BoundingBox {
        BoundingBox::new(x1, y1, x2, y2).unwrap()
    }

    fn photo(w: u32, h: u32) -> Photo {
        Photo::from_rgb(RgbImage::from_pixel(w, h, Rgb([90, 90, 90])))
    }

    fn report(id: &str) -> ReportEvent {
        serde_json::from_str(&format!(
            r#"{{"id":"{}","imageUrl":"https://img.example/{}.jpg","date":"2025-07-27","userId":"u1","violation":"no helmet","gpsInfo":"37.5 127.0"}}"#,
            id, id
        ))
        .unwrap()
    }

    fn pipeline(
        settings: EngineSettings,
        models: ModelSet,
    ) -> ReviewPipeline<InMemoryEvidenceSink, InMemoryConclusionStore> {
        ReviewPipeline::new(
            settings,
            models,
            InMemoryEvidenceSink::new(),
            InMemoryConclusionStore::new(),
        )
        .with_geo(Box::new(StaticGeoResolver::new("Seoul Jongno-gu")))
    }

    struct CountingHelmet {
        calls: Arc<AtomicUsize>,
        report: HelmetReport,
    }

    impl HelmetClassifier for CountingHelmet {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn classify_helmet(&mut self, _crop: &Photo) -> Result<HelmetReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.report.clone())
        }
    }

    fn one_kickboard_script(poses: Vec<PoseClass>) -> ReplayScript {
        ReplayScript {
            kickboards: vec![bbox(100.0, 100.0, 200.0, 200.0)],
            people: vec![
                bbox(120.0, 120.0, 180.0, 180.0),
                bbox(400.0, 400.0, 450.0, 450.0),
            ],
            poses,
            ..ReplayScript::default()
        }
    }

    #[test]
    fn missing_people_rejects_whole_photo() {
        let script = ReplayScript {
            kickboards: vec![bbox(10.0, 10.0, 50.0, 50.0)],
            ..ReplayScript::default()
        };
        let mut p = pipeline(EngineSettings::default(), script.into_models());
        let outcome = p.process(&report("r1"), &photo(100, 100)).unwrap();

        assert_eq!(outcome.persisted, vec![ConclusionKey::photo("r1")]);
        let record = p.conclusions().get(&ConclusionKey::photo("r1")).unwrap();
        assert_eq!(record.result, ReviewStatus::Rejected);
        assert_eq!(record.ai_conclusion, vec!["person not detected".to_string()]);
        assert_eq!(record.image_url, "https://img.example/r1.jpg");
        assert_eq!(record.region.as_deref(), Some("Seoul Jongno-gu"));
        assert!(p.evidence().names().is_empty());
    }

    #[test]
    fn missing_kickboards_rejects_whole_photo() {
        let script = ReplayScript {
            people: vec![bbox(10.0, 10.0, 50.0, 90.0)],
            ..ReplayScript::default()
        };
        let mut p = pipeline(EngineSettings::default(), script.into_models());
        let outcome = p.process(&report("r1k"), &photo(100, 100)).unwrap();

        assert_eq!(
            outcome.verdicts,
            vec![(
                None,
                Verdict::rejected(RejectReason::DetectionFailure {
                    kickboard_missing: true,
                    person_missing: false,
                })
            )]
        );
        assert_eq!(outcome.persisted, vec![ConclusionKey::photo("r1k")]);
        assert_eq!(p.conclusions().len(), 1);
        let record = p.conclusions().get(&ConclusionKey::photo("r1k")).unwrap();
        assert_eq!(record.result, ReviewStatus::Rejected);
        assert_eq!(record.ai_conclusion, vec!["kickboard not detected".to_string()]);
        assert!(record.kickboard_index.is_none());
    }

    #[test]
    fn empty_photo_lists_both_missing_classes() {
        let mut models = ReplayScript::default().into_models();
        let analysis =
            analyze_photo(&EngineSettings::default(), &mut models, &photo(64, 64)).unwrap();
        assert_eq!(
            analysis.verdicts(),
            vec![Verdict::rejected(RejectReason::DetectionFailure {
                kickboard_missing: true,
                person_missing: true,
            })]
        );

        let mut p = pipeline(EngineSettings::default(), ReplayScript::default().into_models());
        p.process(&report("r0"), &photo(64, 64)).unwrap();
        let record = p.conclusions().get(&ConclusionKey::photo("r0")).unwrap();
        assert_eq!(
            record.ai_conclusion,
            vec![
                "kickboard not detected".to_string(),
                "person not detected".to_string()
            ]
        );
    }

    #[test]
    fn underscored_report_id_does_not_clash_with_group_keys() {
        let mut p = pipeline(EngineSettings::compact(), two_pedestrian_groups().into_models());
        p.process(&report("a"), &photo(640, 480)).unwrap();

        p.set_models(ReplayScript::default().into_models());
        let outcome = p.process(&report("a_1"), &photo(640, 480)).unwrap();
        assert_eq!(outcome.persisted, vec![ConclusionKey::photo("a_1")]);
        assert_eq!(p.conclusions().len(), 3);
    }

    struct FlakyEvidence {
        inner: InMemoryEvidenceSink,
        calls: usize,
        fail_on: usize,
    }

    impl EvidenceSink for FlakyEvidence {
        fn store(&mut self, name: &str, jpeg: &[u8]) -> Result<crate::evidence::EvidenceRef> {
            self.calls += 1;
            if self.calls == self.fail_on {
                return Err(anyhow::anyhow!("disk full"));
            }
            self.inner.store(name, jpeg)
        }
    }

    struct FlakyConclusions {
        inner: InMemoryConclusionStore,
        fail_next: bool,
    }

    impl ConclusionSink for FlakyConclusions {
        fn persist_all(&mut self, entries: &[(ConclusionKey, ConclusionRecord)]) -> Result<()> {
            if std::mem::take(&mut self.fail_next) {
                return Err(anyhow::anyhow!("database is locked"));
            }
            self.inner.persist_all(entries)
        }
    }

    fn two_pedestrian_groups() -> ReplayScript {
        ReplayScript {
            kickboards: vec![
                bbox(50.0, 300.0, 120.0, 380.0),
                bbox(400.0, 300.0, 470.0, 380.0),
            ],
            people: vec![
                bbox(60.0, 200.0, 100.0, 330.0),
                bbox(420.0, 200.0, 460.0, 330.0),
            ],
            poses: vec![PoseClass::Pedestrian, PoseClass::Pedestrian],
            ..ReplayScript::default()
        }
    }

    #[test]
    fn evidence_failure_leaves_nothing_and_retry_completes() {
        let script = two_pedestrian_groups();
        let mut p = ReviewPipeline::new(
            EngineSettings::compact(),
            script.clone().into_models(),
            FlakyEvidence {
                inner: InMemoryEvidenceSink::new(),
                calls: 0,
                fail_on: 2,
            },
            InMemoryConclusionStore::new(),
        );
        let err = p.process(&report("r"), &photo(640, 480)).unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert!(p.conclusions().is_empty());
        assert_eq!(p.evidence().inner.names(), vec!["r_0".to_string()]);

        p.set_models(script.into_models());
        let outcome = p.process(&report("r"), &photo(640, 480)).unwrap();
        assert_eq!(
            outcome.persisted,
            vec![ConclusionKey::group("r", 0), ConclusionKey::group("r", 1)]
        );
        assert_eq!(
            p.conclusions().keys(),
            vec!["conclusion_r_0".to_string(), "conclusion_r_1".to_string()]
        );
        assert_eq!(
            p.evidence().inner.names(),
            vec!["r_0".to_string(), "r_1".to_string()]
        );
    }

    #[test]
    fn record_failure_is_retried_over_stored_evidence() {
        let script = two_pedestrian_groups();
        let mut p = ReviewPipeline::new(
            EngineSettings::compact(),
            script.clone().into_models(),
            InMemoryEvidenceSink::new(),
            FlakyConclusions {
                inner: InMemoryConclusionStore::new(),
                fail_next: true,
            },
        );
        assert!(p.process(&report("r"), &photo(640, 480)).is_err());
        assert!(p.conclusions().inner.is_empty());
        assert_eq!(p.evidence().names().len(), 2);

        p.set_models(script.into_models());
        p.process(&report("r"), &photo(640, 480)).unwrap();
        assert_eq!(p.conclusions().inner.len(), 2);

        p.set_models(two_pedestrian_groups().into_models());
        assert!(p.process(&report("r"), &photo(640, 480)).is_err());
        assert_eq!(p.conclusions().inner.len(), 2);
    }

    struct CountingPose {
        calls: Arc<AtomicUsize>,
    }

    impl crate::detect::PoseClassifier for CountingPose {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn classify_pose(&mut self, _person: &Photo) -> Result<PoseClass> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PoseClass::Rider)
        }
    }

    #[test]
    fn person_outside_photo_is_unknown_without_classifier_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut models = ReplayScript {
            kickboards: vec![bbox(10.0, 10.0, 50.0, 50.0)],
            people: vec![
                bbox(20.0, 20.0, 40.0, 40.0),
                bbox(300.0, 20.0, 340.0, 40.0),
            ],
            ..ReplayScript::default()
        }
        .into_models();
        models.pose = Box::new(CountingPose {
            calls: calls.clone(),
        });
        let settings = EngineSettings {
            crop_padding: 0,
            top_k: 3,
        };
        let analysis = analyze_photo(&settings, &mut models, &photo(200, 100)).unwrap();
        let PhotoAnalysis::Groups(groups) = analysis else {
            panic!("expected groups");
        };
        assert_eq!(groups[0].group.members.len(), 2);
        assert_eq!(groups[0].poses, vec![PoseClass::Rider, PoseClass::Unknown]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            groups[0].crop,
            Some(CropRegion {
                x1: 10,
                y1: 10,
                x2: 200,
                y2: 50
            })
        );
    }

    #[test]
    fn two_riders_are_double_riding_without_brand_or_helmet() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut models =
            one_kickboard_script(vec![PoseClass::Rider, PoseClass::Rider]).into_models();
        models.helmet = Box::new(CountingHelmet {
            calls: calls.clone(),
            report: HelmetReport::default(),
        });
        let mut p = pipeline(EngineSettings::default(), models);
        let outcome = p.process(&report("r2"), &photo(640, 480)).unwrap();

        assert_eq!(
            outcome.verdicts,
            vec![(Some(0), Verdict::DoubleRidingSuspected)]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let record = p.conclusions().get(&ConclusionKey::group("r2", 0)).unwrap();
        assert_eq!(record.result, ReviewStatus::Unconfirmed);
        assert_eq!(record.image_url, "memory://Conclusion/r2_0.jpg");
        assert!(record.evidence_sha256.is_some());
        assert_eq!(p.evidence().names(), vec!["r2_0".to_string()]);
    }

    #[test]
    fn missing_brand_rejects_and_skips_helmet() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut models = ReplayScript {
            kickboards: vec![bbox(100.0, 100.0, 200.0, 200.0)],
            people: vec![bbox(120.0, 120.0, 180.0, 180.0)],
            poses: vec![PoseClass::Rider],
            brands: vec![None],
            ..ReplayScript::default()
        }
        .into_models();
        models.helmet = Box::new(CountingHelmet {
            calls: calls.clone(),
            report: HelmetReport::default(),
        });
        let mut p = pipeline(EngineSettings::default(), models);
        let outcome = p.process(&report("r3"), &photo(640, 480)).unwrap();

        assert_eq!(
            outcome.verdicts[0].1,
            Verdict::rejected(RejectReason::BrandDetectionFailed)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let record = p.conclusions().get(&ConclusionKey::group("r3", 0)).unwrap();
        assert_eq!(record.ai_conclusion, vec![TAG_BRAND_FAILED.to_string()]);
        assert_eq!(record.result, ReviewStatus::Rejected);
    }

    #[test]
    fn helmet_violation_carries_brand_and_confidence() {
        let script = ReplayScript {
            kickboards: vec![bbox(100.0, 100.0, 200.0, 200.0)],
            people: vec![bbox(120.0, 60.0, 180.0, 180.0)],
            poses: vec![PoseClass::Rider],
            brands: vec![Some(BrandLabel("BrandX".to_string()))],
            helmets: vec![HelmetReport {
                detected: false,
                boxes: vec![],
                confidence: 0.42,
            }],
            ..ReplayScript::default()
        };
        let mut p = pipeline(EngineSettings::compact(), script.into_models());
        p.process(&report("r4"), &photo(640, 480)).unwrap();

        let record = p.conclusions().get(&ConclusionKey::group("r4", 0)).unwrap();
        assert_eq!(
            record.verdict,
            Verdict::SingleRider {
                helmet: HelmetStatus::Violation,
                brand: BrandLabel("BrandX".to_string()),
                confidence: 0.42,
            }
        );
        assert_eq!(record.detected_brand.as_deref(), Some("BrandX"));
        assert_eq!(record.confidence, Some(0.42));
        assert_eq!(
            record.crop,
            Some(CropRegion {
                x1: 0,
                y1: 0,
                x2: 300,
                y2: 300
            })
        );
    }

    #[test]
    fn classifier_failures_degrade_instead_of_aborting() {
        // Pose answers run out after the first person, so the second is Unknown;
        // brand and helmet queues are empty, so both fail.
        let models = one_kickboard_script(vec![PoseClass::Rider]).into_models();
        let mut p = pipeline(EngineSettings::default(), models);
        let outcome = p.process(&report("r5"), &photo(640, 480)).unwrap();
        assert_eq!(
            outcome.verdicts[0].1,
            Verdict::rejected(RejectReason::BrandDetectionFailed)
        );

        let mut models = ReplayScript {
            kickboards: vec![bbox(100.0, 100.0, 200.0, 200.0)],
            people: vec![bbox(120.0, 120.0, 180.0, 180.0)],
            poses: vec![PoseClass::Rider],
            brands: vec![Some(BrandLabel("BrandY".to_string()))],
            ..ReplayScript::default()
        }
        .into_models();
        let analysis =
            analyze_photo(&EngineSettings::default(), &mut models, &photo(640, 480)).unwrap();
        let PhotoAnalysis::Groups(groups) = analysis else {
            panic!("expected groups");
        };
        assert_eq!(groups[0].helmet, Some(HelmetReport::not_detected()));
        assert_eq!(groups[0].verdict.kind(), "single_rider_violation");
    }

    #[test]
    fn unknown_only_group_is_not_persisted() {
        let models =
            one_kickboard_script(vec![PoseClass::Unknown, PoseClass::Unknown]).into_models();
        let mut p = pipeline(EngineSettings::default(), models);
        let outcome = p.process(&report("r6"), &photo(640, 480)).unwrap();
        assert_eq!(outcome.verdicts, vec![(Some(0), Verdict::Undeterminable)]);
        assert!(outcome.persisted.is_empty());
        assert!(p.conclusions().is_empty());
        assert!(p.evidence().names().is_empty());
    }

    #[test]
    fn pedestrian_group_is_rejected_with_evidence() {
        let models =
            one_kickboard_script(vec![PoseClass::Pedestrian, PoseClass::Unknown]).into_models();
        let mut p = pipeline(EngineSettings::default(), models);
        p.process(&report("r7"), &photo(640, 480)).unwrap();
        let record = p.conclusions().get(&ConclusionKey::group("r7", 0)).unwrap();
        assert_eq!(record.verdict, Verdict::PedestrianRejected);
        assert_eq!(record.result, ReviewStatus::Rejected);
        assert_eq!(record.image_url, "memory://Conclusion/r7_0.jpg");
    }

    #[test]
    fn group_outside_photo_is_rejected_as_degenerate() {
        let script = ReplayScript {
            kickboards: vec![bbox(900.0, 900.0, 950.0, 950.0)],
            people: vec![bbox(910.0, 910.0, 940.0, 940.0)],
            ..ReplayScript::default()
        };
        let mut p = pipeline(
            EngineSettings {
                crop_padding: 10,
                top_k: 3,
            },
            script.into_models(),
        );
        let outcome = p.process(&report("r8"), &photo(640, 480)).unwrap();
        assert_eq!(
            outcome.verdicts[0].1,
            Verdict::rejected(RejectReason::DegenerateCrop)
        );
        let record = p.conclusions().get(&ConclusionKey::group("r8", 0)).unwrap();
        assert_eq!(record.image_url, "https://img.example/r8.jpg");
        assert!(record.crop.is_none());
    }

    #[test]
    fn two_kickboards_get_distinct_keys_in_order() {
        let script = ReplayScript {
            kickboards: vec![
                bbox(50.0, 300.0, 120.0, 380.0),
                bbox(400.0, 300.0, 470.0, 380.0),
            ],
            people: vec![
                bbox(420.0, 200.0, 460.0, 330.0),
                bbox(60.0, 200.0, 100.0, 330.0),
            ],
            poses: vec![PoseClass::Pedestrian, PoseClass::Rider],
            brands: vec![Some(BrandLabel("BrandZ".to_string()))],
            helmets: vec![HelmetReport {
                detected: true,
                boxes: vec![bbox(10.0, 10.0, 40.0, 40.0)],
                confidence: 0.91,
            }],
        };
        let mut p = pipeline(EngineSettings::compact(), script.into_models());
        let outcome = p.process(&report("r9"), &photo(640, 480)).unwrap();

        assert_eq!(
            outcome.persisted,
            vec![ConclusionKey::group("r9", 0), ConclusionKey::group("r9", 1)]
        );
        assert_eq!(outcome.verdicts[0].1, Verdict::PedestrianRejected);
        assert_eq!(outcome.verdicts[1].1.kind(), "single_rider_compliant");
    }

    #[test]
    fn invalid_report_id_is_refused() {
        let mut p = pipeline(EngineSettings::default(), ReplayScript::default().into_models());
        let mut bad = report("ok");
        bad.id = "../x".to_string();
        assert!(p.process(&bad, &photo(10, 10)).is_err());
        assert!(p.conclusions().is_empty());
    }

    #[test]
    fn analysis_is_repeatable() {
        let run = || {
            let mut models = ReplayScript {
                kickboards: vec![bbox(100.0, 100.0, 200.0, 200.0)],
                people: vec![
                    bbox(120.0, 120.0, 180.0, 180.0),
                    bbox(140.0, 90.0, 190.0, 170.0),
                ],
                poses: vec![PoseClass::Rider, PoseClass::Rider],
                ..ReplayScript::default()
            }
            .into_models();
            let analysis =
                analyze_photo(&EngineSettings::default(), &mut models, &photo(640, 480)).unwrap();
            let PhotoAnalysis::Groups(groups) = analysis else {
                panic!("expected groups");
            };
            groups
                .into_iter()
                .map(|g| (g.verdict, g.crop, g.poses))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn each_member_is_classified_once_in_distance_order() {
        let mut models = ModelSet {
            detector: Box::new(ReplayDetector::new(
                vec![bbox(0.0, 0.0, 20.0, 20.0)],
                vec![
                    bbox(60.0, 0.0, 80.0, 20.0),
                    bbox(20.0, 0.0, 40.0, 20.0),
                    bbox(100.0, 0.0, 120.0, 20.0),
                ],
            )),
            pose: Box::new(ReplayPoseClassifier::new(vec![
                PoseClass::Rider,
                PoseClass::Pedestrian,
            ])),
            brand: Box::new(ReplayBrandClassifier::new(vec![])),
            helmet: Box::new(CountingHelmet {
                calls: Arc::new(AtomicUsize::new(0)),
                report: HelmetReport::default(),
            }),
        };
        let settings = EngineSettings {
            crop_padding: 0,
            top_k: 2,
        };
        let analysis = analyze_photo(&settings, &mut models, &photo(200, 50)).unwrap();
        let PhotoAnalysis::Groups(groups) = analysis else {
            panic!("expected groups");
        };
        let order: Vec<_> = groups[0].group.members.iter().map(|m| m.person).collect();
        assert_eq!(order, vec![1, 0]);
        assert_eq!(groups[0].poses, vec![PoseClass::Rider, PoseClass::Pedestrian]);
        assert_eq!(
            groups[0].crop,
            Some(CropRegion {
                x1: 0,
                y1: 0,
                x2: 80,
                y2: 20
            })
        );
    }
}
