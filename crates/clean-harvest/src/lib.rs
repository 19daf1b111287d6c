//! CleanHarvest — harvest image pairs per keyword and keep the originals whose thumbnails carry no text.

pub mod auth;
pub mod browser;
pub mod classifier;
pub mod config;
pub mod curator;
pub mod driver;
pub mod extractor;
pub mod fetcher;
pub mod http;
pub mod layout;
pub mod store;
pub mod types;

pub use auth::{ServiceAccountKey, ServiceAccountTokens};
pub use browser::chromium::{find_chromium, ChromiumBrowser};
pub use browser::{BrowserEngine, BrowserSession, NoopBrowser, SessionGuard};
pub use classifier::{GoogleVisionDetector, TextClassifier, TextDetection, TextDetector};
pub use config::{load_keywords, CuratorConfig, VisionCredentials};
pub use curator::{Curator, PairOutcome, PairReport};
pub use driver::{build_search_url, SessionDriver};
pub use extractor::{original_from_href, ExtractionReport, LinkExtractor};
pub use fetcher::AssetFetcher;
pub use http::HttpClient;
pub use layout::{slugify, Layout};
pub use store::MetadataStore;
pub use types::*;
