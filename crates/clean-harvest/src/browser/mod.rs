//! Browser abstraction for driving the results page.
//!
//! Defines the `BrowserEngine` and `BrowserSession` traits that abstract over
//! the browser engine (currently Chromium via chromiumoxide), plus
//! [`SessionGuard`], which guarantees a session is closed on every exit path.

pub mod chromium;

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// A browser engine that can open sessions.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Open a new session (tab).
    async fn open_session(&self) -> Result<Box<dyn BrowserSession>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> Result<()>;
}

/// A single browser session (tab).
///
/// Elements are addressed by `(selector, index)` into the list the selector
/// matches at call time.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<NavigationResult>;
    /// Execute JavaScript in the page context and return the result.
    async fn execute_js(&self, script: &str) -> Result<serde_json::Value>;
    /// Wait until the first element matching `selector` is displayed and
    /// enabled. Returns `false` if that does not happen within `timeout`.
    async fn wait_until_clickable(&self, selector: &str, timeout: Duration) -> Result<bool>;
    /// Number of elements currently matching `selector`.
    async fn count_elements(&self, selector: &str) -> Result<usize>;
    /// Whether the element is rendered with a non-empty box.
    async fn is_displayed(&self, selector: &str, index: usize) -> Result<bool>;
    /// Click the element. Fails if it is gone or not interactable.
    async fn click(&self, selector: &str, index: usize) -> Result<()>;
    /// Get the full page HTML.
    async fn get_html(&self) -> Result<String>;
    /// Close this session.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Owns a session and closes it on drop if [`SessionGuard::close`] was not
/// called.
///
/// `close` is async, so the drop path spawns it on the runtime captured at
/// construction.
pub struct SessionGuard {
    session: Option<Box<dyn BrowserSession>>,
    runtime: tokio::runtime::Handle,
}

impl SessionGuard {
    /// Must be called from within a tokio runtime.
    pub fn new(session: Box<dyn BrowserSession>) -> Self {
        Self {
            session: Some(session),
            runtime: tokio::runtime::Handle::current(),
        }
    }

    /// Close the session, consuming the guard.
    pub async fn close(mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => session.close().await,
            None => Ok(()),
        }
    }
}

impl Deref for SessionGuard {
    type Target = dyn BrowserSession;

    fn deref(&self) -> &Self::Target {
        // Only `close` and `drop` take the session, and both consume the guard.
        self.session
            .as_deref()
            .expect("SessionGuard: session already closed")
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
            .as_deref_mut()
            .expect("SessionGuard: session already closed")
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.runtime.spawn(async move {
                if let Err(e) = session.close().await {
                    tracing::warn!("session cleanup on drop failed: {e}");
                }
            });
        }
    }
}

/// JS string literal for embedding `value` in a script.
pub(crate) fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// A no-op engine used when Chromium is unavailable.
///
/// Curation from existing caches works without a browser; any live harvest
/// fails with a harvest error.
pub struct NoopBrowser;

#[async_trait]
impl BrowserEngine for NoopBrowser {
    async fn open_session(&self) -> Result<Box<dyn BrowserSession>> {
        Err(anyhow::anyhow!("Browser not available — cache-only mode"))
    }
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct ClosingSession(Arc<AtomicBool>);

    #[async_trait]
    impl BrowserSession for ClosingSession {
        async fn navigate(&mut self, url: &str, _t: Duration) -> Result<NavigationResult> {
            Ok(NavigationResult {
                final_url: url.to_string(),
                load_time_ms: 0,
            })
        }
        async fn execute_js(&self, _s: &str) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
        async fn wait_until_clickable(&self, _s: &str, _t: Duration) -> Result<bool> {
            Ok(false)
        }
        async fn count_elements(&self, _s: &str) -> Result<usize> {
            Ok(0)
        }
        async fn is_displayed(&self, _s: &str, _i: usize) -> Result<bool> {
            Ok(false)
        }
        async fn click(&self, _s: &str, _i: usize) -> Result<()> {
            Ok(())
        }
        async fn get_html(&self) -> Result<String> {
            Ok(String::new())
        }
        async fn close(self: Box<Self>) -> Result<()> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_guard_explicit_close() {
        let closed = Arc::new(AtomicBool::new(false));
        let guard = SessionGuard::new(Box::new(ClosingSession(Arc::clone(&closed))));
        guard.close().await.unwrap();
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_guard_closes_on_drop() {
        let closed = Arc::new(AtomicBool::new(false));
        {
            let mut guard = SessionGuard::new(Box::new(ClosingSession(Arc::clone(&closed))));
            guard.navigate("about:blank", Duration::from_secs(1)).await.unwrap();
        }
        // Let the spawned cleanup run.
        for _ in 0..10 {
            if closed.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_js_string_escapes() {
        assert_eq!(js_string(r#"a[x="y"]"#), r#""a[x=\"y\"]""#);
    }

    #[tokio::test]
    async fn test_noop_browser_refuses_sessions() {
        assert!(NoopBrowser.open_session().await.is_err());
    }
}
