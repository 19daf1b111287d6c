//! Session driver: render the full, paginated results page for a keyword.
//!
//! ## Pagination
//!
//! Scroll to the bottom, wait `settle_delay`, re-measure the page height.
//! While the height grows, keep going. Once it stops growing, look for the
//! "load more" button: if it becomes clickable within `load_more_timeout`,
//! click it and keep going, otherwise stop. `max_scroll_rounds` and the
//! optional `max_scroll_duration` bound the loop on pages that never settle.
//!
//! ## Materialization
//!
//! Result anchors only carry the full-size URL after they have been
//! activated, so every displayed anchor is clicked once before the document
//! is captured. Anchors that are hidden or covered are skipped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::browser::{BrowserEngine, BrowserSession, SessionGuard};
use crate::config::{CuratorConfig, PaginationConfig, SearchConfig, Selectors};
use crate::extractor::{ExtractionReport, LinkExtractor};
use crate::types::{CurateError, CurateResult, ImagePair};

pub(crate) const PAGE_HEIGHT_JS: &str = "document.body.scrollHeight";
pub(crate) const SCROLL_TO_BOTTOM_JS: &str = "window.scrollTo(0, document.body.scrollHeight)";

/// Why the pagination loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollStop {
    /// Height stopped growing and no "load more" button was clickable.
    Converged,
    RoundLimit,
    Deadline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationReport {
    pub rounds: u32,
    pub load_more_clicks: u32,
    pub final_height: u64,
    pub stop: ScrollStop,
}

/// The captured results page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub url: String,
    pub html: String,
    pub pagination: PaginationReport,
    /// Result anchors successfully clicked during materialization.
    pub activated: usize,
    /// Result anchors skipped as hidden or not interactable.
    pub skipped: usize,
}

/// Everything a live harvest produced.
#[derive(Debug, Clone)]
pub struct LiveHarvest {
    pub page: RenderedPage,
    pub extraction: ExtractionReport,
}

impl LiveHarvest {
    pub fn pairs(&self) -> &[ImagePair] {
        &self.extraction.pairs
    }
}

/// Build the image-search URL for `keyword`.
///
/// The keyword is sent as an exact phrase with the animated-image filter.
/// The category is appended to the phrase only when `include_category` is set.
pub fn build_search_url(search: &SearchConfig, keyword: &str, category: &str) -> CurateResult<String> {
    let mut url = url::Url::parse(&search.base_url)
        .map_err(|e| CurateError::Config(format!("invalid search base_url: {e}")))?;

    let phrase = if search.include_category && !category.is_empty() {
        format!("{keyword} {category}")
    } else {
        keyword.to_string()
    };

    url.query_pairs_mut()
        .append_pair("as_st", "y")
        .append_pair("tbm", "isch")
        .append_pair("hl", "en")
        .append_pair("as_q", "")
        .append_pair("as_epq", &phrase)
        .append_pair("as_oq", "")
        .append_pair("as_eq", &search.exclude_terms.join(" "))
        .append_pair("cr", "")
        .append_pair("as_sitesearch", "")
        .append_pair("tbs", "itp:animated");

    Ok(url.to_string())
}

/// Drives one browser session per harvest.
pub struct SessionDriver {
    engine: Arc<dyn BrowserEngine>,
    extractor: LinkExtractor,
    search: SearchConfig,
    pagination: PaginationConfig,
    selectors: Selectors,
    navigation_timeout: Duration,
}

impl SessionDriver {
    pub fn new(engine: Arc<dyn BrowserEngine>, config: &CuratorConfig) -> CurateResult<Self> {
        Ok(Self {
            engine,
            extractor: LinkExtractor::new(&config.selectors)?,
            search: config.search.clone(),
            pagination: config.pagination.clone(),
            selectors: config.selectors.clone(),
            navigation_timeout: config.navigation_timeout(),
        })
    }

    /// Ordered pairs for `keyword`, scraped live.
    pub async fn harvest(&self, keyword: &str, category: &str) -> CurateResult<Vec<ImagePair>> {
        Ok(self.harvest_report(keyword, category).await?.extraction.pairs)
    }

    /// Render and extract, keeping the pagination and extraction counters.
    pub async fn harvest_report(&self, keyword: &str, category: &str) -> CurateResult<LiveHarvest> {
        let page = self.render(keyword, category).await?;
        let extraction = self.extractor.extract_report(&page.html);
        Ok(LiveHarvest { page, extraction })
    }

    /// Render the fully paginated, materialized results page.
    ///
    /// The session is closed whether or not rendering succeeds.
    pub async fn render(&self, keyword: &str, category: &str) -> CurateResult<RenderedPage> {
        let harvest_err = |e: anyhow::Error| CurateError::Harvest {
            keyword: keyword.to_string(),
            message: format!("{e:#}"),
        };

        let url = build_search_url(&self.search, keyword, category)?;
        let session = self.engine.open_session().await.map_err(harvest_err)?;
        let mut guard = SessionGuard::new(session);

        let result = self.drive(&mut *guard, &url).await;

        if let Err(e) = guard.close().await {
            tracing::warn!("[chrome] failed to close session for '{keyword}': {e:#}");
        }

        result.map_err(harvest_err)
    }

    async fn drive(&self, session: &mut dyn BrowserSession, url: &str) -> Result<RenderedPage> {
        let nav = session.navigate(url, self.navigation_timeout).await?;
        tracing::info!("[chrome] webpage: opened {url} ({}ms)", nav.load_time_ms);

        let pagination = self.paginate(session).await?;
        tracing::info!(
            "[chrome] webpage: pagination stopped ({:?}) after {} rounds, {} load-more clicks",
            pagination.stop,
            pagination.rounds,
            pagination.load_more_clicks
        );

        tracing::info!("[chrome] webpage: clicking on all images");
        let (activated, skipped) = self.materialize(session).await?;
        tracing::debug!("[chrome] activated {activated} results, skipped {skipped}");

        let html = session.get_html().await?;

        Ok(RenderedPage {
            url: nav.final_url,
            html,
            pagination,
            activated,
            skipped,
        })
    }

    async fn paginate(&self, session: &dyn BrowserSession) -> Result<PaginationReport> {
        let started = Instant::now();
        let deadline = self.pagination.max_scroll_duration();
        let mut height = page_height(session).await?;
        let mut rounds = 0u32;
        let mut load_more_clicks = 0u32;

        let stop = loop {
            if rounds >= self.pagination.max_scroll_rounds {
                tracing::warn!("[chrome] scroll round limit ({rounds}) reached");
                break ScrollStop::RoundLimit;
            }
            if deadline.is_some_and(|d| started.elapsed() >= d) {
                tracing::warn!("[chrome] scroll deadline reached after {rounds} rounds");
                break ScrollStop::Deadline;
            }
            rounds += 1;

            session.execute_js(SCROLL_TO_BOTTOM_JS).await?;
            tokio::time::sleep(self.pagination.settle_delay()).await;
            let new_height = page_height(session).await?;

            if new_height <= height {
                if !self.click_load_more(session).await {
                    height = new_height;
                    break ScrollStop::Converged;
                }
                load_more_clicks += 1;
            }

            tracing::debug!("[chrome] webpage: scrolling (height {new_height})");
            height = new_height;
        };

        Ok(PaginationReport {
            rounds,
            load_more_clicks,
            final_height: height,
            stop,
        })
    }

    /// Try the "load more" button. Any failure counts as "not available".
    async fn click_load_more(&self, session: &dyn BrowserSession) -> bool {
        let selector = &self.selectors.load_more;
        match session
            .wait_until_clickable(selector, self.pagination.load_more_timeout())
            .await
        {
            Ok(true) => match session.click(selector, 0).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!("[chrome] load-more click failed: {e:#}");
                    false
                }
            },
            Ok(false) => false,
            Err(e) => {
                tracing::debug!("[chrome] load-more check failed: {e:#}");
                false
            }
        }
    }

    /// Click every displayed result anchor. Returns (activated, skipped).
    async fn materialize(&self, session: &dyn BrowserSession) -> Result<(usize, usize)> {
        let selector = &self.selectors.original_link;
        let count = session.count_elements(selector).await?;
        let mut activated = 0;
        let mut skipped = 0;

        for index in 0..count {
            match session.is_displayed(selector, index).await {
                Ok(true) => {}
                Ok(false) => {
                    skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::trace!("[chrome] visibility check {index} failed: {e:#}");
                    skipped += 1;
                    continue;
                }
            }

            match session.click(selector, index).await {
                Ok(()) => activated += 1,
                Err(e) => {
                    tracing::trace!("[chrome] result {index} not clickable: {e:#}");
                    skipped += 1;
                }
            }
        }

        Ok((activated, skipped))
    }
}

async fn page_height(session: &dyn BrowserSession) -> Result<u64> {
    let value = session.execute_js(PAGE_HEIGHT_JS).await?;
    value
        .as_u64()
        .or_else(|| value.as_f64().map(|h| h as u64))
        .ok_or_else(|| anyhow::anyhow!("page height is not a number: {value}"))
}
