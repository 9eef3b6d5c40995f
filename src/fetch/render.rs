//! Script-rendered retrieval through headless Chromium.
//!
//! Every call launches its own browser, so no context is ever shared between fetches. The
//! browser is closed on every exit path: [RenderSession::close] on the normal path, and the
//! session's `Drop` (which aborts the CDP handler; chromiumoxide kills the child process when
//! the `Browser` drops) if the future is cancelled by a timeout.

use crate::fetch::error::FetchError;
use crate::model::{FetchedPage, Strategy};
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

pub const DEFAULT_NAVIGATION_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SETTLE_SECS: u64 = 5;
const RENDER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0 Safari/537.36";

/// Rendering settings. `chrome_path` of None lets chromiumoxide locate a local Chrome.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub chrome_path: Option<PathBuf>,
    pub navigation_timeout: Duration,
    pub settle: Duration,
    pub user_agent: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            navigation_timeout: Duration::from_secs(DEFAULT_NAVIGATION_TIMEOUT_SECS),
            settle: Duration::from_secs(DEFAULT_SETTLE_SECS),
            user_agent: RENDER_USER_AGENT.to_string(),
        }
    }
}

/// Blocking facade over chromiumoxide; owns a private current-thread tokio runtime.
pub struct Renderer {
    runtime: Runtime,
    config: RenderConfig,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Renderer {
    pub fn new(config: RenderConfig) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self { runtime, config })
    }

    /// Render `url` and return the realized markup. Failures come back as [FetchError::Render].
    pub fn render(&self, url: &str) -> Result<FetchedPage, FetchError> {
        tracing::info!(url, "rendering with headless browser");
        let render_error = |reason: String| FetchError::Render {
            url: url.to_string(),
            reason,
        };
        // Launch + navigate + settle + capture, with slack for browser start-up and shutdown.
        let budget = self.config.navigation_timeout * 2 + self.config.settle;
        let html = self
            .runtime
            .block_on(async {
                tokio::time::timeout(budget, render_once(&self.config, url))
                    .await
                    .map_err(|_| format!("gave up after {:?}", budget))?
            })
            .map_err(render_error)?;
        if html.trim().is_empty() {
            return Err(FetchError::Render {
                url: url.to_string(),
                reason: "rendered page is empty".to_string(),
            });
        }
        Ok(FetchedPage {
            html,
            strategy: Strategy::Rendered,
        })
    }
}

async fn render_once(config: &RenderConfig, url: &str) -> Result<String, String> {
    let mut session = RenderSession::launch(config).await?;
    let captured = session.capture(url, config).await;
    session.close().await;
    captured
}

/// One browser process plus the task driving its CDP connection.
struct RenderSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl RenderSession {
    async fn launch(config: &RenderConfig) -> Result<Self, String> {
        let mut builder = BrowserConfig::builder()
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg(format!("--user-agent={}", config.user_agent));
        if let Some(path) = &config.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let browser_config = builder
            .build()
            .map_err(|e| format!("browser config: {}", e))?;
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| format!("launch: {}", e))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        Ok(Self { browser, handler })
    }

    async fn capture(&self, url: &str, config: &RenderConfig) -> Result<String, String> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| format!("new page: {}", e))?;
        tokio::time::timeout(config.navigation_timeout, page.goto(url))
            .await
            .map_err(|_| format!("navigation timed out after {:?}", config.navigation_timeout))?
            .map_err(|e| format!("navigation: {}", e))?;
        tokio::time::sleep(config.settle).await;
        page.content().await.map_err(|e| format!("content: {}", e))
    }

    async fn close(&mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::debug!(error = %e, "browser close failed");
        }
        if let Err(e) = self.browser.wait().await {
            tracing::debug!(error = %e, "browser wait failed");
        }
        self.handler.abort();
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}
