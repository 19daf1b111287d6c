//! Asset fetcher: materialize a remote URL or an inline `data:` payload as a
//! local file with an inferred extension.
//!
//! The destination is passed without extension; the fetcher appends the one
//! it infers. A file already present at the final path is never rewritten.

use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine;

use crate::http::HttpClient;
use crate::types::{CurateError, CurateResult, FetchOutcome, LocalAsset};

/// Extension used when a remote path carries none.
pub const DEFAULT_EXTENSION: &str = "jpg";

/// Resolves image URLs into files.
#[derive(Clone)]
pub struct AssetFetcher {
    http: HttpClient,
}

impl AssetFetcher {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// Fetch `url` into `dest_stem.<ext>`.
    ///
    /// Inline payloads that fail to decode return `Err`. Remote failures are
    /// logged and reported as [`FetchOutcome::Failed`].
    pub async fn fetch(&self, url: &str, dest_stem: &Path) -> CurateResult<FetchOutcome> {
        if is_inline(url) {
            fetch_inline(url, dest_stem)
        } else {
            Ok(self.fetch_remote(url, dest_stem).await)
        }
    }

    async fn fetch_remote(&self, url: &str, dest_stem: &Path) -> FetchOutcome {
        let ext = match remote_extension(url) {
            Ok(ext) => ext,
            Err(reason) => {
                tracing::warn!("[download] {url}: {reason}");
                return FetchOutcome::Failed {
                    url: url.to_string(),
                    reason,
                };
            }
        };

        let path = with_extension(dest_stem, &ext);
        if path.exists() {
            return FetchOutcome::AlreadyPresent(asset(url, path));
        }

        let resp = match self.http.get_bytes(url).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!("[download] {url}: {e}");
                return FetchOutcome::Failed {
                    url: url.to_string(),
                    reason: e.to_string(),
                };
            }
        };

        match write_new_file(&path, &resp.body) {
            Ok(()) => {
                tracing::debug!("[download] {} bytes -> {}", resp.body.len(), path.display());
                FetchOutcome::Fetched(asset(url, path))
            }
            Err(e) => {
                tracing::warn!("[download] {url}: write {} failed: {e}", path.display());
                FetchOutcome::Failed {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Whether `url` embeds its image bytes.
pub fn is_inline(url: &str) -> bool {
    url.trim_start().starts_with("data:")
}

/// Split a `data:` URL into (extension, base64 body).
fn parse_inline(url: &str) -> CurateResult<(String, &str)> {
    let rest = url
        .trim_start()
        .strip_prefix("data:")
        .ok_or_else(|| CurateError::InlinePayload("missing data: scheme".into()))?;
    let (head, body) = rest
        .split_once(',')
        .ok_or_else(|| CurateError::InlinePayload("missing ',' separator".into()))?;

    let mime = head.split(';').next().unwrap_or_default();
    let subtype = mime
        .split_once('/')
        .map(|(_, sub)| sub)
        .ok_or_else(|| CurateError::InlinePayload(format!("bad MIME type '{mime}'")))?;

    // "svg+xml" -> "svg"
    let ext: String = subtype
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    if ext.is_empty() {
        return Err(CurateError::InlinePayload(format!(
            "bad MIME subtype '{subtype}'"
        )));
    }

    Ok((ext, body))
}

fn fetch_inline(url: &str, dest_stem: &Path) -> CurateResult<FetchOutcome> {
    let (ext, body) = parse_inline(url)?;
    let path = with_extension(dest_stem, &ext);
    if path.exists() {
        return Ok(FetchOutcome::AlreadyPresent(asset(url, path)));
    }

    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| CurateError::InlinePayload(format!("Invalid base64: {e}")))?;

    write_new_file(&path, &bytes)?;
    Ok(FetchOutcome::Fetched(asset(url, path)))
}

/// Extension from the final path segment of a remote URL.
///
/// `.../pic.PNG?x=1` -> `png`, `.../pic` -> `jpg`. Suffixes that are not
/// plain alphanumerics fall back to the default as well.
pub fn remote_extension(url: &str) -> Result<String, String> {
    let parsed = url::Url::parse(url).map_err(|e| format!("unparsable URL: {e}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", parsed.scheme()));
    }

    let segment = parsed
        .path_segments()
        .and_then(|segments| segments.last())
        .unwrap_or_default();

    let ext = match segment.rsplit_once('.') {
        Some((_, suffix))
            if !suffix.is_empty()
                && suffix.len() <= 8
                && suffix.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            suffix.to_ascii_lowercase()
        }
        _ => DEFAULT_EXTENSION.to_string(),
    };
    Ok(ext)
}

fn with_extension(dest_stem: &Path, ext: &str) -> PathBuf {
    let mut name = dest_stem.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

fn asset(url: &str, path: PathBuf) -> LocalAsset {
    LocalAsset {
        source_url: url.to_string(),
        path,
    }
}

/// Write through a sibling temp file so an interrupted write never leaves a
/// partial file that later looks complete.
fn write_new_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> AssetFetcher {
        AssetFetcher::new(HttpClient::new(Duration::from_secs(5)))
    }

    #[test]
    fn test_remote_extension() {
        assert_eq!(remote_extension("https://x.com/a/pic.PNG?x=1").unwrap(), "png");
        assert_eq!(remote_extension("https://x.com/a/pic").unwrap(), "jpg");
        assert_eq!(remote_extension("https://x.com/a/anim.tar.gif").unwrap(), "gif");
        assert_eq!(remote_extension("https://x.com/").unwrap(), "jpg");
        assert_eq!(remote_extension("https://x.com/pic.").unwrap(), "jpg");
        assert_eq!(remote_extension("https://x.com/p.i%20c").unwrap(), "jpg");
        assert!(remote_extension("not a url").is_err());
        assert!(remote_extension("ftp://x.com/a.png").is_err());
    }

    #[test]
    fn test_parse_inline() {
        let (ext, body) = parse_inline("data:image/gif;base64,R0lGOD").unwrap();
        assert_eq!(ext, "gif");
        assert_eq!(body, "R0lGOD");

        let (ext, _) = parse_inline("data:image/svg+xml;base64,AAAA").unwrap();
        assert_eq!(ext, "svg");

        assert!(parse_inline("data:image/gif;base64").is_err());
        assert!(parse_inline("data:;base64,AAAA").is_err());
    }

    #[tokio::test]
    async fn test_inline_gif_decodes_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let raw = b"GIF89a\x01\x00\x01\x00\x00\xff\x00,";
        let b64 = base64::engine::general_purpose::STANDARD.encode(raw);
        let url = format!("data:image/gif;base64,{b64}");

        let outcome = fetcher()
            .fetch(&url, &dir.path().join("image_0"))
            .await
            .unwrap();

        let path = outcome.path().unwrap();
        assert_eq!(path, dir.path().join("image_0.gif"));
        assert_eq!(std::fs::read(path).unwrap(), raw);
        assert!(matches!(outcome, FetchOutcome::Fetched(_)));
    }

    #[tokio::test]
    async fn test_inline_bad_base64_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let result = fetcher()
            .fetch("data:image/png;base64,!!!notbase64", &dir.path().join("image_0"))
            .await;
        assert!(matches!(result, Err(CurateError::InlinePayload(_))));
        assert!(!dir.path().join("image_0.png").exists());
    }

    #[tokio::test]
    async fn test_remote_fetch_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/pic.PNG"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let url = format!("{}/img/pic.PNG?x=1", server.uri());
        let stem = dir.path().join("image_3");
        let fetcher = fetcher();

        let first = fetcher.fetch(&url, &stem).await.unwrap();
        assert!(matches!(first, FetchOutcome::Fetched(_)));
        assert_eq!(first.path().unwrap(), dir.path().join("image_3.png"));

        let second = fetcher.fetch(&url, &stem).await.unwrap();
        assert!(matches!(second, FetchOutcome::AlreadyPresent(_)));
        assert_eq!(second.path(), first.path());
        assert_eq!(std::fs::read(second.path().unwrap()).unwrap(), b"png-bytes");
    }

    #[tokio::test]
    async fn test_remote_without_extension_defaults_to_jpg() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pic"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let outcome = fetcher()
            .fetch(&format!("{}/pic", server.uri()), &dir.path().join("image_0"))
            .await
            .unwrap();
        assert_eq!(outcome.path().unwrap(), dir.path().join("image_0.jpg"));
    }

    #[tokio::test]
    async fn test_remote_failure_is_absent_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let outcome = fetcher()
            .fetch(&format!("{}/gone.gif", server.uri()), &dir.path().join("image_0"))
            .await
            .unwrap();
        assert!(outcome.path().is_none());
        assert!(!dir.path().join("image_0.gif").exists());
    }

    #[tokio::test]
    async fn test_existing_file_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("image_1.gif");
        std::fs::write(&existing, b"original").unwrap();

        let b64 = base64::engine::general_purpose::STANDARD.encode(b"replacement");
        let outcome = fetcher()
            .fetch(
                &format!("data:image/gif;base64,{b64}"),
                &dir.path().join("image_1"),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, FetchOutcome::AlreadyPresent(_)));
        assert_eq!(std::fs::read(&existing).unwrap(), b"original");
    }
}
