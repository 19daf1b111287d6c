//! Curation orchestrator.
//!
//! Per keyword: resolve pairs (cache hit, or live harvest persisted
//! immediately), then for every pair fetch the thumbnail, screen it for
//! text, and fetch the original only when the thumbnail is clean. A failing
//! pair never stops the loop; only harvest failures and cache corruption
//! abort a keyword.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::browser::{BrowserEngine, NoopBrowser};
use crate::classifier::TextClassifier;
use crate::config::CuratorConfig;
use crate::driver::SessionDriver;
use crate::fetcher::AssetFetcher;
use crate::layout::Layout;
use crate::store::MetadataStore;
use crate::types::{
    Classification, CurateResult, CurationResult, HarvestSource, ImagePair, KeywordHarvest,
};

/// What happened to one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairOutcome {
    /// Thumbnail clean and original stored.
    Good(PathBuf),
    ThumbnailFailed,
    TextRejected,
    OriginalFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairReport {
    pub index: usize,
    pub outcome: PairOutcome,
    /// `None` when the thumbnail never reached the classifier.
    pub classification: Option<Classification>,
}

/// Composes the driver, store, classifier, and fetcher.
pub struct Curator {
    layout: Layout,
    driver: SessionDriver,
    classifier: TextClassifier,
    fetcher: AssetFetcher,
    pair_concurrency: usize,
}

impl Curator {
    pub fn new(
        config: &CuratorConfig,
        engine: Arc<dyn BrowserEngine>,
        classifier: TextClassifier,
        fetcher: AssetFetcher,
    ) -> CurateResult<Self> {
        Ok(Self {
            layout: Layout::new(config.root.clone()),
            driver: SessionDriver::new(engine, config)?,
            classifier,
            fetcher,
            pair_concurrency: config.pair_concurrency.max(1),
        })
    }

    /// A curator that never opens a browser: keywords without a cache
    /// artifact fail with a harvest error.
    pub fn cache_only(
        config: &CuratorConfig,
        classifier: TextClassifier,
        fetcher: AssetFetcher,
    ) -> CurateResult<Self> {
        Self::new(config, Arc::new(NoopBrowser), classifier, fetcher)
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    fn store(&self, category: &str) -> MetadataStore {
        MetadataStore::new(self.layout.clone(), category)
    }

    /// Load pairs from the cache, or harvest live and persist them.
    ///
    /// A failed live harvest persists nothing.
    pub async fn resolve_pairs(
        &self,
        keyword: &str,
        category: &str,
    ) -> CurateResult<(KeywordHarvest, HarvestSource)> {
        let store = self.store(category);
        if let Some(harvest) = store.load(keyword)? {
            tracing::info!("[images] loaded from cache: {}", harvest.pairs.len());
            return Ok((harvest, HarvestSource::Cache));
        }

        let pairs = self.driver.harvest(keyword, category).await?;
        let path = store.save(keyword, &pairs)?;
        tracing::info!("[images] harvested {} pairs -> {}", pairs.len(), path.display());

        Ok((
            KeywordHarvest {
                keyword: keyword.to_string(),
                category: category.to_string(),
                pairs,
            },
            HarvestSource::Live,
        ))
    }

    /// Resolve and curate every pair for `keyword`.
    pub async fn run(&self, keyword: &str, category: &str) -> CurateResult<CurationResult> {
        tracing::info!("[keyword] started '{keyword}' under '{category}'");
        self.layout.ensure_dirs(category, keyword)?;

        let (harvest, _) = self.resolve_pairs(keyword, category).await?;
        let result = self.curate(&harvest).await;

        tracing::info!(
            "[images] good: {} / {} (text: {}, thumbnail failures: {}, original failures: {}, classifier unavailable: {})",
            result.good_count,
            result.total_pairs,
            result.text_rejected,
            result.thumbnail_failures,
            result.original_failures,
            result.classifier_unavailable
        );
        Ok(result)
    }

    /// Run the per-pair pipeline over an already resolved harvest.
    pub async fn curate(&self, harvest: &KeywordHarvest) -> CurationResult {
        let staging = self.layout.staging_dir(&harvest.category, &harvest.keyword);
        let output = self.layout.output_dir(&harvest.category, &harvest.keyword);

        let reports: Vec<PairReport> = stream::iter(harvest.pairs.iter().enumerate())
            .map(|(index, pair)| self.process_pair(&harvest.keyword, index, pair, &staging, &output))
            .buffer_unordered(self.pair_concurrency)
            .collect()
            .await;

        tally(&harvest.keyword, harvest.pairs.len(), &reports)
    }

    /// FetchThumbnail → Classify → FetchOriginal for one pair.
    pub async fn process_pair(
        &self,
        keyword: &str,
        index: usize,
        pair: &ImagePair,
        staging: &Path,
        output: &Path,
    ) -> PairReport {
        let thumb_stem = Layout::asset_stem(staging, index);
        let thumb_path = match self.fetcher.fetch(&pair.thumbnail_url, &thumb_stem).await {
            Ok(outcome) => outcome.path().map(Path::to_path_buf),
            Err(e) => {
                tracing::warn!(keyword, index, url = %short(&pair.thumbnail_url), "[download] thumbnail: {e}");
                None
            }
        };
        let Some(thumb_path) = thumb_path else {
            return PairReport {
                index,
                outcome: PairOutcome::ThumbnailFailed,
                classification: None,
            };
        };

        let classification = self.classifier.classify(&thumb_path).await;
        tracing::info!(
            "[vision] has text: {}, path: {}",
            classification.has_text(),
            thumb_path.display()
        );
        if classification.has_text() {
            return PairReport {
                index,
                outcome: PairOutcome::TextRejected,
                classification: Some(classification),
            };
        }

        let ori_stem = Layout::asset_stem(output, index);
        let outcome = match self.fetcher.fetch(&pair.original_url, &ori_stem).await {
            Ok(fetched) => match fetched.path() {
                Some(path) => PairOutcome::Good(path.to_path_buf()),
                None => PairOutcome::OriginalFailed,
            },
            Err(e) => {
                tracing::warn!(keyword, index, url = %short(&pair.original_url), "[download] original: {e}");
                PairOutcome::OriginalFailed
            }
        };

        PairReport {
            index,
            outcome,
            classification: Some(classification),
        }
    }
}

fn tally(keyword: &str, total_pairs: usize, reports: &[PairReport]) -> CurationResult {
    let mut result = CurationResult::new(keyword, total_pairs);
    for report in reports {
        if matches!(report.classification, Some(Classification::Unavailable(_))) {
            result.classifier_unavailable += 1;
        }
        match report.outcome {
            PairOutcome::Good(_) => result.good_count += 1,
            PairOutcome::ThumbnailFailed => result.thumbnail_failures += 1,
            PairOutcome::TextRejected => result.text_rejected += 1,
            PairOutcome::OriginalFailed => result.original_failures += 1,
        }
    }
    result
}

/// Inline payloads can be megabytes long; keep log lines readable.
fn short(url: &str) -> &str {
    match url.char_indices().nth(120) {
        Some((cut, _)) => &url[..cut],
        None => url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(index: usize, outcome: PairOutcome, classification: Option<Classification>) -> PairReport {
        PairReport {
            index,
            outcome,
            classification,
        }
    }

    #[test]
    fn test_tally_counts_each_outcome() {
        let reports = vec![
            report(0, PairOutcome::Good("a.gif".into()), Some(Classification::Clean)),
            report(1, PairOutcome::TextRejected, Some(Classification::HasText)),
            report(
                2,
                PairOutcome::Good("c.gif".into()),
                Some(Classification::Unavailable("quota".into())),
            ),
            report(3, PairOutcome::ThumbnailFailed, None),
            report(4, PairOutcome::OriginalFailed, Some(Classification::Clean)),
        ];

        let result = tally("rain", 5, &reports);
        assert_eq!(result.total_pairs, 5);
        assert_eq!(result.good_count, 2);
        assert_eq!(result.text_rejected, 1);
        assert_eq!(result.thumbnail_failures, 1);
        assert_eq!(result.original_failures, 1);
        assert_eq!(result.classifier_unavailable, 1);
        assert!(result.good_count <= result.total_pairs);
    }

    #[test]
    fn test_short_truncates_long_urls() {
        let long = format!("data:image/gif;base64,{}", "A".repeat(500));
        assert_eq!(short(&long).len(), 120);
        assert_eq!(short("https://x/a.gif"), "https://x/a.gif");
    }
}
