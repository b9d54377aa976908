//! Report documents and photo loading.
//!
//! A report is one user submission: a photo URL plus the metadata that is
//! copied onto every conclusion derived from it. Reports are read as JSON
//! Lines and handed to the pipeline one at a time.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::detect::ReplayScript;
use crate::frame::Photo;
use crate::geo::GpsPoint;

#[cfg(feature = "fetch-http")]
const MAX_PHOTO_BYTES: u64 = 20 * 1024 * 1024;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEvent {
    pub id: String,
    /// Source photo. Reports without one are skipped by the runner.
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub user_id: String,
    /// Reporter-selected violation labels, joined with ", ".
    #[serde(default, deserialize_with = "violation_text")]
    pub violation: String,
    /// `"<lat> <lon>"` as captured by the reporting app.
    #[serde(default)]
    pub gps_info: Option<String>,
    /// Recorded model outputs, used by the replay backend.
    #[serde(default)]
    pub replay: Option<ReplayScript>,
}

impl ReportEvent {
    pub fn gps(&self) -> Option<Result<GpsPoint>> {
        self.gps_info
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .map(GpsPoint::parse)
    }
}

fn violation_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Violation {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<Violation>::deserialize(deserializer)? {
        Some(Violation::One(text)) => text,
        Some(Violation::Many(items)) => items.join(", "),
        None => String::new(),
    })
}

/// Report ids become storage keys and file names.
///
/// Allowed: letters, digits, `_` and `-`, 1 to 128 characters.
pub fn validate_report_id(report_id: &str) -> Result<()> {
    static REPORT_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = REPORT_ID_RE
        .get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("static regex"));
    if !re.is_match(report_id) {
        return Err(anyhow!(
            "report id {:?} must match ^[A-Za-z0-9_-]{{1,128}}$",
            report_id
        ));
    }
    Ok(())
}

/// Reads a JSON Lines file of reports. Blank lines are ignored.
pub fn read_reports(path: &Path) -> Result<Vec<ReportEvent>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read reports {}", path.display()))?;
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("invalid report on line {} of {}", idx + 1, path.display()))
        })
        .collect()
}

/// Loads the photo behind a report's image URL.
///
/// Plain paths and `file://` URLs are read from disk. `http(s)` URLs need the
/// `fetch-http` feature.
pub fn load_photo(image_url: &str) -> Result<Photo> {
    match Url::parse(image_url) {
        Ok(url) if url.scheme() == "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| anyhow!("invalid file url {}", image_url))?;
            Photo::open(&path)
        }
        Ok(url) if matches!(url.scheme(), "http" | "https") => fetch_photo(url.as_str()),
        Ok(url) if url.scheme().len() > 1 => {
            Err(anyhow!("unsupported photo url scheme '{}'", url.scheme()))
        }
        // Relative paths and Windows drive letters are not URLs.
        _ => Photo::open(&PathBuf::from(image_url)),
    }
}

#[cfg(feature = "fetch-http")]
fn fetch_photo(url: &str) -> Result<Photo> {
    use std::io::Read;

    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch photo from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_PHOTO_BYTES + 1)
        .read_to_end(&mut bytes)
        .context("read photo body")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty photo body from {}", url));
    }
    if bytes.len() as u64 > MAX_PHOTO_BYTES {
        return Err(anyhow!("photo at {} exceeds {} bytes", url, MAX_PHOTO_BYTES));
    }
    Photo::decode(&bytes)
}

#[cfg(not(feature = "fetch-http"))]
fn fetch_photo(url: &str) -> Result<Photo> {
    Err(anyhow!(
        "cannot fetch {}: built without the fetch-http feature",
        url
    ))
}
