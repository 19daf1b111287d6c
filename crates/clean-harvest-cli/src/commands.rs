//! Keyword loop shared by the `run`, `harvest`, and `curate` subcommands.

use std::path::PathBuf;

use serde::Serialize;

use clean_harvest::{CurationResult, Curator, CuratorConfig, HarvestSource};

/// What to do for each keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Resolve pairs, then screen and fetch.
    Run,
    /// Resolve pairs only.
    Harvest,
    /// Screen and fetch from existing caches only.
    Curate,
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub root: Option<PathBuf>,
    pub category: Option<String>,
    pub keywords: Option<PathBuf>,
    pub headed: bool,
}

impl Overrides {
    pub fn apply(self, config: &mut CuratorConfig) {
        if let Some(root) = self.root {
            config.root = root;
        }
        if let Some(category) = self.category {
            config.category = category;
        }
        if let Some(keywords) = self.keywords {
            config.keywords_file = keywords;
        }
        if self.headed {
            config.headless = false;
        }
        config.normalize();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestRecord {
    pub keyword: String,
    pub pairs: usize,
    pub source: HarvestSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct AbortedKeyword {
    pub keyword: String,
    pub error: String,
}

/// Everything the keyword loop produced, printed as JSON at the end.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub category: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub curated: Vec<CurationResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub harvested: Vec<HarvestRecord>,
    pub aborted: Vec<AbortedKeyword>,
}

impl RunSummary {
    pub fn good_total(&self) -> usize {
        self.curated.iter().map(|r| r.good_count).sum()
    }
}

/// Process keywords in order. An aborted keyword is logged and recorded;
/// the loop moves on to the next one.
pub async fn process_keywords(
    curator: &Curator,
    mode: Mode,
    category: &str,
    keywords: &[String],
) -> RunSummary {
    let mut summary = RunSummary {
        category: category.to_string(),
        ..RunSummary::default()
    };

    for (n, keyword) in keywords.iter().enumerate() {
        tracing::info!("[keyword] {}/{}: '{keyword}'", n + 1, keywords.len());

        let outcome = match mode {
            Mode::Run | Mode::Curate => curator
                .run(keyword, category)
                .await
                .map(|result| summary.curated.push(result)),
            Mode::Harvest => curator
                .resolve_pairs(keyword, category)
                .await
                .map(|(harvest, source)| {
                    tracing::info!("[images] {} pairs ({source:?})", harvest.pairs.len());
                    summary.harvested.push(HarvestRecord {
                        keyword: keyword.clone(),
                        pairs: harvest.pairs.len(),
                        source,
                    });
                }),
        };

        if let Err(e) = outcome {
            tracing::error!(keyword = %keyword, "[keyword] aborted: {e}");
            summary.aborted.push(AbortedKeyword {
                keyword: keyword.clone(),
                error: e.to_string(),
            });
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use clean_harvest::{
        AssetFetcher, HttpClient, ImagePair, Layout, MetadataStore, TextClassifier, TextDetection,
        TextDetector,
    };

    struct NoText;

    #[async_trait]
    impl TextDetector for NoText {
        async fn detect(&self, _image: &[u8]) -> anyhow::Result<TextDetection> {
            Ok(TextDetection::default())
        }
    }

    fn cache_only(config: &CuratorConfig) -> Curator {
        Curator::cache_only(
            config,
            TextClassifier::new(Arc::new(NoText)),
            AssetFetcher::new(HttpClient::new(Duration::from_secs(1))),
        )
        .unwrap()
    }

    fn config_in(dir: &tempfile::TempDir) -> CuratorConfig {
        CuratorConfig {
            root: dir.path().to_path_buf(),
            ..CuratorConfig::default()
        }
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = CuratorConfig::default();
        Overrides {
            root: Some("/data".into()),
            category: Some("  Vapor Wave ".into()),
            keywords: None,
            headed: true,
        }
        .apply(&mut config);

        assert_eq!(config.root, PathBuf::from("/data"));
        assert_eq!(config.category, "vapor wave");
        assert_eq!(config.keywords_file, PathBuf::from("keywords.txt"));
        assert!(!config.headless);
    }

    #[tokio::test]
    async fn test_aborted_keyword_does_not_stop_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);

        // Inline on both sides so nothing touches the network.
        let pair = ImagePair::new("data:image/gif;base64,R0lGODlh", "data:image/png;base64,iVBORw0K");
        MetadataStore::new(Layout::new(dir.path()), "cyberpunk")
            .save("cached", &[pair])
            .unwrap();

        let keywords = vec!["missing".to_string(), "cached".to_string()];
        let summary = process_keywords(&cache_only(&config), Mode::Curate, "cyberpunk", &keywords).await;

        assert_eq!(summary.aborted.len(), 1);
        assert_eq!(summary.aborted[0].keyword, "missing");
        assert_eq!(summary.curated.len(), 1);
        assert_eq!(summary.good_total(), 1);
        assert!(dir.path().join("dumps/cyberpunk/cached/image_0.png").exists());
    }

    #[tokio::test]
    async fn test_harvest_mode_reports_cache_source() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        MetadataStore::new(Layout::new(dir.path()), "cyberpunk")
            .save("neon", &[ImagePair::new("https://t/0.jpg", "https://o/0.gif")])
            .unwrap();

        let keywords = vec!["neon".to_string()];
        let summary =
            process_keywords(&cache_only(&config), Mode::Harvest, "cyberpunk", &keywords).await;

        assert!(summary.curated.is_empty());
        assert_eq!(summary.harvested.len(), 1);
        assert_eq!(summary.harvested[0].pairs, 1);
        assert_eq!(summary.harvested[0].source, HarvestSource::Cache);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["harvested"][0]["source"], "cache");
        assert!(json.get("curated").is_none());
    }
}
