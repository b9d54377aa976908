//! Evidence image storage.
//!
//! Annotated group crops are written once under `Conclusion/<name>.jpg` and
//! referenced from the conclusion record by URL and SHA-256.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use url::Url;

use crate::config::EvidenceSettings;

const EVIDENCE_PREFIX: &str = "Conclusion";

/// Where a stored evidence image can be fetched from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub url: String,
    /// Hex SHA-256 of the stored JPEG bytes.
    pub sha256: String,
}

impl EvidenceRef {
    fn new(url: String, jpeg: &[u8]) -> Self {
        Self {
            url,
            sha256: hex::encode(Sha256::digest(jpeg)),
        }
    }
}

pub trait EvidenceSink: Send {
    /// Stores `jpeg` under `name` (no extension) and returns its reference.
    ///
    /// Storing the same bytes under an existing name returns the existing
    /// reference; different bytes under an existing name are an error.
    fn store(&mut self, name: &str, jpeg: &[u8]) -> Result<EvidenceRef>;
}

pub struct FilesystemEvidenceSink {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl FilesystemEvidenceSink {
    pub fn new(settings: &EvidenceSettings) -> Result<Self> {
        let root = settings.dir.join(EVIDENCE_PREFIX);
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create evidence dir {}", root.display()))?;
        Ok(Self {
            root,
            public_base_url: settings.public_base_url.clone(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn url_for(&self, path: &Path, file_name: &str) -> Result<String> {
        match &self.public_base_url {
            Some(base) => Ok(format!("{}/{}/{}", base, EVIDENCE_PREFIX, file_name)),
            None => {
                let absolute = fs::canonicalize(path)
                    .with_context(|| format!("failed to resolve {}", path.display()))?;
                Url::from_file_path(&absolute)
                    .map(|url| url.to_string())
                    .map_err(|_| anyhow!("cannot build file url for {}", absolute.display()))
            }
        }
    }
}

impl EvidenceSink for FilesystemEvidenceSink {
    fn store(&mut self, name: &str, jpeg: &[u8]) -> Result<EvidenceRef> {
        let file_name = format!("{}.jpg", sanitize_name(name)?);
        let path = self.root.join(&file_name);
        if path.exists() {
            let existing = fs::read(&path)
                .with_context(|| format!("failed to read evidence {}", path.display()))?;
            if existing != jpeg {
                return Err(anyhow!(
                    "evidence {} already exists with different content",
                    path.display()
                ));
            }
            log::debug!("evidence {} already stored", path.display());
        } else {
            write_atomic(&path, jpeg)?;
        }
        let url = self.url_for(&path, &file_name)?;
        Ok(EvidenceRef::new(url, jpeg))
    }
}

/// Keeps evidence in memory; URLs use the `memory://` scheme.
#[derive(Default)]
pub struct InMemoryEvidenceSink {
    blobs: BTreeMap<String, Vec<u8>>,
}

impl InMemoryEvidenceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.blobs.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> Vec<String> {
        self.blobs.keys().cloned().collect()
    }
}

impl EvidenceSink for InMemoryEvidenceSink {
    fn store(&mut self, name: &str, jpeg: &[u8]) -> Result<EvidenceRef> {
        let name = sanitize_name(name)?;
        match self.blobs.get(&name) {
            Some(existing) if existing.as_slice() != jpeg => {
                return Err(anyhow!(
                    "evidence {} already exists with different content",
                    name
                ));
            }
            Some(_) => {}
            None => {
                self.blobs.insert(name.clone(), jpeg.to_vec());
            }
        }
        Ok(EvidenceRef::new(
            format!("memory://{}/{}.jpg", EVIDENCE_PREFIX, name),
            jpeg,
        ))
    }
}

fn sanitize_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("evidence name cannot be empty"));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(anyhow!("evidence name must be [A-Za-z0-9_-] only"));
    }
    Ok(trimmed.to_string())
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}
