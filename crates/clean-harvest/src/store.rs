//! Per-keyword cache of harvested pairs.
//!
//! One JSON file per keyword holding `[[thumbnail, original], ...]`. The
//! presence of the file is the only cache signal: there is no TTL and no
//! schema version, and a file that fails to parse is reported as corruption
//! rather than treated as a miss.

use std::io::Write;
use std::path::PathBuf;

use crate::layout::Layout;
use crate::types::{CurateError, CurateResult, ImagePair, KeywordHarvest};

/// Filesystem-backed harvest cache for a single category.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    layout: Layout,
    category: String,
}

impl MetadataStore {
    pub fn new(layout: Layout, category: impl Into<String>) -> Self {
        Self {
            layout,
            category: category.into(),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Location of the artifact for `keyword`.
    pub fn path_for(&self, keyword: &str) -> PathBuf {
        self.layout.cache_path(&self.category, keyword)
    }

    /// Load the cached harvest, or `None` when no artifact exists.
    pub fn load(&self, keyword: &str) -> CurateResult<Option<KeywordHarvest>> {
        let path = self.path_for(keyword);
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read(&path)?;
        let pairs: Vec<ImagePair> = serde_json::from_slice(&raw)
            .map_err(|source| CurateError::CacheCorruption {
                path: path.clone(),
                source,
            })?;

        tracing::debug!("Cache hit for '{keyword}': {} pairs", pairs.len());

        Ok(Some(KeywordHarvest {
            keyword: keyword.to_string(),
            category: self.category.clone(),
            pairs,
        }))
    }

    /// Write the pair list for `keyword`.
    ///
    /// The payload goes to a sibling temp file which is then renamed over
    /// the artifact, so readers never observe a half-written file.
    pub fn save(&self, keyword: &str, pairs: &[ImagePair]) -> CurateResult<PathBuf> {
        let path = self.path_for(keyword);
        let parent = path
            .parent()
            .ok_or_else(|| CurateError::Config(format!("no parent for {}", path.display())))?;
        std::fs::create_dir_all(parent)?;

        let payload = serde_json::to_vec(pairs)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(&payload)?;
        tmp.persist(&path).map_err(|e| CurateError::Io(e.error))?;

        tracing::debug!("Cached {} pairs for '{keyword}' at {}", pairs.len(), path.display());
        Ok(path)
    }
}
