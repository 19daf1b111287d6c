//! Chromium-based browser engine using chromiumoxide.

use super::{js_string, BrowserEngine, BrowserSession, NavigationResult};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Poll interval for clickability waits.
const CLICKABLE_POLL: Duration = Duration::from_millis(250);

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. CLEAN_HARVEST_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("CLEAN_HARVEST_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. System PATH
    for name in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 3. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Chromium-based engine.
pub struct ChromiumBrowser {
    browser: Browser,
}

impl ChromiumBrowser {
    /// Launch a Chromium instance. `headless = false` opens a visible window.
    pub async fn launch(headless: bool) -> Result<Self> {
        let chrome_path = find_chromium()
            .context("Chromium not found. Set CLEAN_HARVEST_CHROMIUM_PATH or install Chrome.")?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--start-maximized")
            .window_size(1920, 1080);

        builder = if headless {
            builder.arg("--headless=new").arg("--disable-gpu")
        } else {
            builder.with_head()
        };

        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        // Spawn the handler task
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self { browser })
    }
}

#[async_trait]
impl BrowserEngine for ChromiumBrowser {
    async fn open_session(&self) -> Result<Box<dyn BrowserSession>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;

        Ok(Box::new(ChromiumSession { page }))
    }

    async fn shutdown(&self) -> Result<()> {
        // Browser is dropped when ChromiumBrowser is dropped
        Ok(())
    }
}

/// A single Chromium page.
pub struct ChromiumSession {
    page: Page,
}

impl ChromiumSession {
    async fn eval_bool(&self, script: &str) -> Result<bool> {
        Ok(self.execute_js(script).await?.as_bool().unwrap_or(false))
    }
}

/// Script evaluating to whether `selector[index]` has a visible, non-empty box.
fn displayed_script(selector: &str, index: usize) -> String {
    format!(
        r#"(() => {{
            const el = document.querySelectorAll({sel})[{index}];
            if (!el) return false;
            const style = window.getComputedStyle(el);
            if (style.visibility === 'hidden' || style.display === 'none') return false;
            const rect = el.getBoundingClientRect();
            return rect.width > 0 && rect.height > 0;
        }})()"#,
        sel = js_string(selector),
    )
}

/// Script evaluating to whether the first match is displayed and enabled.
fn clickable_script(selector: &str) -> String {
    format!(
        r#"(() => {{
            const el = document.querySelector({sel});
            if (!el || el.disabled) return false;
            const style = window.getComputedStyle(el);
            if (style.visibility === 'hidden' || style.display === 'none') return false;
            const rect = el.getBoundingClientRect();
            return rect.width > 0 && rect.height > 0;
        }})()"#,
        sel = js_string(selector),
    )
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<NavigationResult> {
        let start = Instant::now();

        let result = tokio::time::timeout(timeout, self.page.goto(url)).await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(_)) => {
                let _ = self.page.wait_for_navigation().await;

                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .unwrap_or_else(|| url.to_string());

                Ok(NavigationResult {
                    final_url,
                    load_time_ms,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {}ms", timeout.as_millis()),
        }
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS execution failed")?;

        // Scripts that return `undefined` carry no value.
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn wait_until_clickable(&self, selector: &str, timeout: Duration) -> Result<bool> {
        let script = clickable_script(selector);
        let deadline = Instant::now() + timeout;
        loop {
            if self.eval_bool(&script).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(CLICKABLE_POLL).await;
        }
    }

    async fn count_elements(&self, selector: &str) -> Result<usize> {
        let script = format!(
            "document.querySelectorAll({}).length",
            js_string(selector)
        );
        Ok(self.execute_js(&script).await?.as_u64().unwrap_or(0) as usize)
    }

    async fn is_displayed(&self, selector: &str, index: usize) -> Result<bool> {
        self.eval_bool(&displayed_script(selector, index)).await
    }

    async fn click(&self, selector: &str, index: usize) -> Result<()> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .with_context(|| format!("failed to query '{selector}'"))?;
        let element = elements
            .get(index)
            .with_context(|| format!("'{selector}'[{index}] no longer exists"))?;

        // Scrolls into view and dispatches a real mouse click at the element's
        // clickable point; fails when another element covers it.
        element
            .click()
            .await
            .with_context(|| format!("'{selector}'[{index}] not interactable"))?;
        Ok(())
    }

    async fn get_html(&self) -> Result<String> {
        self.page.content().await.context("failed to get HTML")
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.page.close().await.context("failed to close page")?;
        Ok(())
    }
}
