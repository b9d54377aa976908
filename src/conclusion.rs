//! Conclusion records: the persisted outcome of reviewing one group, or one
//! photograph that failed detection outright.

use serde::{Deserialize, Serialize};

use crate::decision::{ReviewStatus, Verdict};
use crate::evidence::EvidenceRef;
use crate::geometry::CropRegion;
use crate::ingest::ReportEvent;

const PHOTO_SUFFIX: &str = "photo";

/// Storage key of a conclusion.
///
/// `conclusion_<report>_<kickboard>` for a group and
/// `conclusion_<report>_photo` for a whole-photograph reject. Report ids may
/// contain `_`, but the last segment is always a bare index or `photo`, so two
/// keys are equal only when report and kickboard both are.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConclusionKey {
    report_id: String,
    kickboard: Option<usize>,
}

impl ConclusionKey {
    pub fn photo(report_id: &str) -> Self {
        Self {
            report_id: report_id.to_string(),
            kickboard: None,
        }
    }

    pub fn group(report_id: &str, kickboard: usize) -> Self {
        Self {
            report_id: report_id.to_string(),
            kickboard: Some(kickboard),
        }
    }

    pub fn report_id(&self) -> &str {
        &self.report_id
    }

    pub fn kickboard(&self) -> Option<usize> {
        self.kickboard
    }

    /// File name (without extension) for this key's evidence image.
    pub fn evidence_name(&self) -> String {
        match self.kickboard {
            Some(idx) => format!("{}_{}", self.report_id, idx),
            None => format!("{}_{}", self.report_id, PHOTO_SUFFIX),
        }
    }
}

impl std::fmt::Display for ConclusionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conclusion_{}", self.evidence_name())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConclusionRecord {
    pub report_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kickboard_index: Option<usize>,
    pub date: String,
    pub user_id: String,
    pub violation: String,
    pub result: ReviewStatus,
    pub ai_conclusion: Vec<String>,
    pub verdict: Verdict,
    pub region: Option<String>,
    pub gps_info: Option<String>,
    /// Evidence crop, or the source photo when no crop exists.
    pub image_url: String,
    pub report_img_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop: Option<CropRegion>,
}

pub struct ConclusionBuilder<'a> {
    report: &'a ReportEvent,
    verdict: Verdict,
    kickboard: Option<usize>,
    evidence: Option<EvidenceRef>,
    crop: Option<CropRegion>,
    region: Option<String>,
}

impl<'a> ConclusionBuilder<'a> {
    pub fn new(report: &'a ReportEvent, verdict: Verdict) -> Self {
        Self {
            report,
            verdict,
            kickboard: None,
            evidence: None,
            crop: None,
            region: None,
        }
    }

    pub fn kickboard(mut self, index: usize) -> Self {
        self.kickboard = Some(index);
        self
    }

    pub fn evidence(mut self, evidence: EvidenceRef) -> Self {
        self.evidence = Some(evidence);
        self
    }

    pub fn crop(mut self, crop: CropRegion) -> Self {
        self.crop = Some(crop);
        self
    }

    pub fn region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    pub fn key(&self) -> ConclusionKey {
        match self.kickboard {
            Some(idx) => ConclusionKey::group(&self.report.id, idx),
            None => ConclusionKey::photo(&self.report.id),
        }
    }

    pub fn build(self) -> ConclusionRecord {
        let source_url = self.report.image_url.clone().unwrap_or_default();
        let (detected_brand, confidence) = match &self.verdict {
            Verdict::SingleRider {
                brand, confidence, ..
            } => (Some(brand.as_str().to_string()), Some(*confidence)),
            _ => (None, None),
        };
        let gps_info = self
            .report
            .gps_info
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(str::to_string);

        ConclusionRecord {
            report_id: self.report.id.clone(),
            kickboard_index: self.kickboard,
            date: self.report.date.clone(),
            user_id: self.report.user_id.clone(),
            violation: self.report.violation.clone(),
            result: self.verdict.status(),
            ai_conclusion: self.verdict.tags(),
            image_url: self
                .evidence
                .as_ref()
                .map(|evidence| evidence.url.clone())
                .unwrap_or_else(|| source_url.clone()),
            evidence_sha256: self.evidence.map(|evidence| evidence.sha256),
            report_img_url: source_url,
            verdict: self.verdict,
            region: self.region,
            gps_info,
            detected_brand,
            confidence,
            crop: self.crop,
        }
    }
}
