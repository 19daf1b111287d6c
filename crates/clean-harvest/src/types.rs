//! Core data types for harvested image pairs and curation results.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A thumbnail/original association believed to reference the same image.
///
/// Identity is positional: a pair is addressed by its index in the harvest,
/// never by URL value. On disk a pair is a two-element array
/// `[thumbnail_url, original_url]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct ImagePair {
    pub thumbnail_url: String,
    pub original_url: String,
}

impl ImagePair {
    pub fn new(thumbnail_url: impl Into<String>, original_url: impl Into<String>) -> Self {
        Self {
            thumbnail_url: thumbnail_url.into(),
            original_url: original_url.into(),
        }
    }
}

impl From<(String, String)> for ImagePair {
    fn from((thumbnail_url, original_url): (String, String)) -> Self {
        Self {
            thumbnail_url,
            original_url,
        }
    }
}

impl From<ImagePair> for (String, String) {
    fn from(pair: ImagePair) -> Self {
        (pair.thumbnail_url, pair.original_url)
    }
}

/// All pairs discovered for one keyword under one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordHarvest {
    pub keyword: String,
    pub category: String,
    pub pairs: Vec<ImagePair>,
}

/// Where a harvest came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestSource {
    Cache,
    Live,
}

/// A file materialized on disk from a remote or inline URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAsset {
    pub source_url: String,
    pub path: PathBuf,
}

/// Outcome of a single asset fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Bytes were retrieved or decoded and written.
    Fetched(LocalAsset),
    /// A file already existed at the destination; nothing was written.
    AlreadyPresent(LocalAsset),
    /// Remote retrieval failed. The caller skips this asset.
    Failed { url: String, reason: String },
}

impl FetchOutcome {
    /// The local path, or `None` when the fetch failed.
    pub fn path(&self) -> Option<&Path> {
        match self {
            FetchOutcome::Fetched(asset) | FetchOutcome::AlreadyPresent(asset) => {
                Some(&asset.path)
            }
            FetchOutcome::Failed { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.path().is_some()
    }
}

/// Outcome of screening an image for visible text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Clean,
    HasText,
    /// Detection could not be performed. Treated as [`Classification::Clean`]
    /// by the pipeline.
    Unavailable(String),
}

impl Classification {
    /// Fail-open reduction: only a positive detection counts as text.
    pub fn has_text(&self) -> bool {
        matches!(self, Classification::HasText)
    }
}

/// Per-keyword curation summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurationResult {
    pub keyword: String,
    pub total_pairs: usize,
    pub good_count: usize,
    pub thumbnail_failures: usize,
    pub text_rejected: usize,
    pub classifier_unavailable: usize,
    pub original_failures: usize,
}

impl CurationResult {
    pub fn new(keyword: impl Into<String>, total_pairs: usize) -> Self {
        Self {
            keyword: keyword.into(),
            total_pairs,
            ..Default::default()
        }
    }
}

/// Errors that can abort a keyword.
#[derive(thiserror::Error, Debug)]
pub enum CurateError {
    #[error("Harvest failed for '{keyword}': {message}")]
    Harvest { keyword: String, message: String },

    #[error("Corrupt cache artifact {path}: {source}")]
    CacheCorruption {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid inline payload: {0}")]
    InlinePayload(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CurateResult<T> = Result<T, CurateError>;
