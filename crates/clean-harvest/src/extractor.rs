//! Link extraction from a rendered results page.
//!
//! Two independent selector passes: original-link anchors, whose href hides
//! the full-size URL between `imgurl=` and `&imgrefurl`, and thumbnail
//! images. The passes are zipped by position and truncated to the shorter
//! one. Both passes are assumed to preserve the same visual order; a count
//! mismatch is logged as an extraction gap.

use scraper::{Html, Selector};

use crate::config::Selectors;
use crate::types::{CurateError, CurateResult, ImagePair};

const URL_START: &str = "imgurl=";
const URL_END: &str = "&imgrefurl";

/// Pairs plus counters describing what the selectors matched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub pairs: Vec<ImagePair>,
    /// Original-link elements whose href yielded a URL.
    pub originals_found: usize,
    /// Thumbnail elements matched (with or without a source).
    pub thumbnails_found: usize,
    /// Original-link elements whose href was missing or did not match.
    pub rejected_links: usize,
    /// Pairs dropped because their thumbnail had no `src`/`data-src`.
    pub sourceless_thumbnails: usize,
}

impl ExtractionReport {
    /// Whether the two selector passes disagreed in count.
    pub fn has_gap(&self) -> bool {
        self.originals_found != self.thumbnails_found
    }
}

/// Extracts image pairs from a rendered results document.
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    original_link: Selector,
    thumbnail: Selector,
}

impl LinkExtractor {
    pub fn new(selectors: &Selectors) -> CurateResult<Self> {
        Ok(Self {
            original_link: parse_selector(&selectors.original_link)?,
            thumbnail: parse_selector(&selectors.thumbnail)?,
        })
    }

    /// Ordered pairs, top-to-bottom as rendered.
    pub fn extract(&self, document: &str) -> Vec<ImagePair> {
        self.extract_report(document).pairs
    }

    pub fn extract_report(&self, document: &str) -> ExtractionReport {
        let html = Html::parse_document(document);

        let mut rejected_links = 0;
        let originals: Vec<String> = html
            .select(&self.original_link)
            .filter_map(|el| {
                let url = el.value().attr("href").and_then(original_from_href);
                if url.is_none() {
                    rejected_links += 1;
                }
                url
            })
            .collect();

        let thumbnails: Vec<Option<String>> = html
            .select(&self.thumbnail)
            .map(|el| {
                let attrs = el.value();
                attrs
                    .attr("src")
                    .filter(|s| !s.is_empty())
                    .or_else(|| attrs.attr("data-src").filter(|s| !s.is_empty()))
                    .map(str::to_string)
            })
            .collect();

        let mut sourceless_thumbnails = 0;
        let pairs: Vec<ImagePair> = thumbnails
            .iter()
            .zip(originals.iter())
            .filter_map(|(thumb, original)| match thumb {
                Some(thumb) => Some(ImagePair::new(thumb.clone(), original.clone())),
                None => {
                    sourceless_thumbnails += 1;
                    None
                }
            })
            .collect();

        let report = ExtractionReport {
            pairs,
            originals_found: originals.len(),
            thumbnails_found: thumbnails.len(),
            rejected_links,
            sourceless_thumbnails,
        };

        if report.has_gap() {
            tracing::warn!(
                "Extraction gap: {} originals vs {} thumbnails, keeping {} pairs",
                report.originals_found,
                report.thumbnails_found,
                report.pairs.len()
            );
        }
        tracing::info!("[extract] gathered {} urls", report.originals_found);

        report
    }
}

fn parse_selector(raw: &str) -> CurateResult<Selector> {
    Selector::parse(raw).map_err(|e| CurateError::Config(format!("invalid selector '{raw}': {e:?}")))
}

/// Recover the full-size image URL from a result anchor's href.
///
/// The href is percent-decoded first; the URL is the text between the first
/// `imgurl=` and the next `&imgrefurl`. Marker matching ignores ASCII case.
pub fn original_from_href(href: &str) -> Option<String> {
    let decoded = urlencoding::decode_binary(href.as_bytes());
    let decoded = String::from_utf8_lossy(&decoded);
    // ASCII lowercasing keeps byte offsets aligned with `decoded`.
    let lower = decoded.to_ascii_lowercase();

    let start = lower.find(URL_START)? + URL_START.len();
    let len = lower[start..].find(URL_END)?;
    Some(decoded[start..start + len].to_string())
}
