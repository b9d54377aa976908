use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::pipeline::{EngineSettings, DEFAULT_JPEG_QUALITY};

const DEFAULT_DB_PATH: &str = "conclusions.db";
const DEFAULT_EVIDENCE_DIR: &str = "evidence";
const MAX_TOP_K: usize = 8;
const MAX_CROP_PADDING: u32 = 2000;

#[derive(Debug, Deserialize, Default)]
struct ReviewConfigFile {
    db_path: Option<String>,
    engine: Option<EngineConfigFile>,
    evidence: Option<EvidenceConfigFile>,
    geocode: Option<GeocodeConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    crop_padding: Option<u32>,
    top_k: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct EvidenceConfigFile {
    dir: Option<PathBuf>,
    public_base_url: Option<String>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct GeocodeConfigFile {
    vworld_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReviewConfig {
    pub db_path: String,
    pub engine: EngineSettings,
    pub evidence: EvidenceSettings,
    pub vworld_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EvidenceSettings {
    pub dir: PathBuf,
    /// Prefix for evidence URLs; `None` yields `file://` URLs.
    pub public_base_url: Option<String>,
    pub jpeg_quality: u8,
}

impl ReviewConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("REVIEW_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ReviewConfigFile) -> Self {
        let defaults = EngineSettings::default();
        let engine = EngineSettings {
            crop_padding: file
                .engine
                .as_ref()
                .and_then(|engine| engine.crop_padding)
                .unwrap_or(defaults.crop_padding),
            top_k: file
                .engine
                .as_ref()
                .and_then(|engine| engine.top_k)
                .unwrap_or(defaults.top_k),
        };
        let evidence = EvidenceSettings {
            dir: file
                .evidence
                .as_ref()
                .and_then(|evidence| evidence.dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EVIDENCE_DIR)),
            public_base_url: file
                .evidence
                .as_ref()
                .and_then(|evidence| evidence.public_base_url.clone()),
            jpeg_quality: file
                .evidence
                .as_ref()
                .and_then(|evidence| evidence.jpeg_quality)
                .unwrap_or(DEFAULT_JPEG_QUALITY),
        };
        Self {
            db_path: file
                .db_path
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            engine,
            evidence,
            vworld_api_key: file.geocode.and_then(|geocode| geocode.vworld_api_key),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("REVIEW_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(dir) = std::env::var("REVIEW_EVIDENCE_DIR") {
            if !dir.trim().is_empty() {
                self.evidence.dir = PathBuf::from(dir);
            }
        }
        if let Ok(base) = std::env::var("REVIEW_PUBLIC_BASE_URL") {
            if !base.trim().is_empty() {
                self.evidence.public_base_url = Some(base);
            }
        }
        if let Ok(key) = std::env::var("VWORLD_API_KEY") {
            if !key.trim().is_empty() {
                self.vworld_api_key = Some(key);
            }
        }
        if let Ok(padding) = std::env::var("REVIEW_CROP_PADDING") {
            self.engine.crop_padding = padding
                .parse()
                .map_err(|_| anyhow!("REVIEW_CROP_PADDING must be a whole number of pixels"))?;
        }
        if let Ok(top_k) = std::env::var("REVIEW_TOP_K") {
            self.engine.top_k = top_k
                .parse()
                .map_err(|_| anyhow!("REVIEW_TOP_K must be a positive integer"))?;
        }
        if let Ok(quality) = std::env::var("REVIEW_JPEG_QUALITY") {
            self.evidence.jpeg_quality = quality
                .parse()
                .map_err(|_| anyhow!("REVIEW_JPEG_QUALITY must be an integer in 1..=100"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.engine.top_k == 0 || self.engine.top_k > MAX_TOP_K {
            return Err(anyhow!("top_k must be between 1 and {}", MAX_TOP_K));
        }
        if self.engine.crop_padding > MAX_CROP_PADDING {
            return Err(anyhow!(
                "crop_padding must be at most {} pixels",
                MAX_CROP_PADDING
            ));
        }
        if !(1..=100).contains(&self.evidence.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be between 1 and 100"));
        }
        if let Some(base) = &self.evidence.public_base_url {
            let url = Url::parse(base)
                .map_err(|e| anyhow!("invalid public_base_url {}: {}", base, e))?;
            if !matches!(url.scheme(), "http" | "https" | "file") {
                return Err(anyhow!(
                    "public_base_url must be http(s) or file, got '{}'",
                    url.scheme()
                ));
            }
            self.evidence.public_base_url = Some(base.trim_end_matches('/').to_string());
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ReviewConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
