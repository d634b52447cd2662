pub mod controls;
pub mod dynamic;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// One method per capability the dynamic extractor uses, so tests can
/// substitute deterministic fakes without standing up a real browser.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn navigate(&self, url: &str) -> anyhow::Result<()>;
    async fn wait_for_visible(&self, selector: &str, timeout_ms: u64) -> anyhow::Result<()>;
    async fn evaluate(&self, script: &str) -> anyhow::Result<serde_json::Value>;
    async fn click(&self, selector: &str) -> anyhow::Result<()>;
    async fn inner_text(&self) -> anyhow::Result<String>;
    async fn content(&self) -> anyhow::Result<String>;
    async fn screenshot(&self) -> anyhow::Result<Vec<u8>>;
}

#[async_trait]
pub trait BrowserEngine: Send + Sync {
    async fn open_page(&self) -> anyhow::Result<Box<dyn BrowserPage>>;
}

/// A guard that ensures the page is closed when dropped, including when the
/// parent request context is cancelled mid-extraction.
struct PageGuard {
    page: Page,
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let page = self.page.clone();
        tokio::spawn(async move {
            if let Err(e) = page.close().await {
                debug!("Failed to close page in Drop: {}", e);
            }
        });
    }
}

#[derive(Clone)]
pub struct HeadlessBrowser {
    browser: Arc<Browser>,
    _handle: Arc<JoinHandle<()>>,
}

impl HeadlessBrowser {
    pub async fn launch() -> anyhow::Result<Self> {
        let (browser, mut handler) = Browser::launch(
            BrowserConfig::builder()
                .build()
                .map_err(|e| anyhow::anyhow!(e))?,
        )
        .await?;

        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    debug!("Browser handler error: {:?}", h);
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            _handle: Arc::new(handle),
        })
    }
}

#[async_trait]
impl BrowserEngine for HeadlessBrowser {
    async fn open_page(&self) -> anyhow::Result<Box<dyn BrowserPage>> {
        let page = self.browser.new_page("about:blank").await?;
        Ok(Box::new(ChromiumPage {
            guard: PageGuard { page },
        }))
    }
}

pub struct ChromiumPage {
    guard: PageGuard,
}

impl ChromiumPage {
    fn page(&self) -> &Page {
        &self.guard.page
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn navigate(&self, url: &str) -> anyhow::Result<()> {
        self.page().goto(url).await?;
        self.page().wait_for_navigation().await?;
        Ok(())
    }

    async fn wait_for_visible(&self, selector: &str, timeout_ms: u64) -> anyhow::Result<()> {
        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(timeout_ms);
        let mut delay = Duration::from_millis(50);

        while start.elapsed() < timeout {
            if self.page().find_element(selector).await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_millis(500));
        }

        Err(anyhow::anyhow!("Timeout waiting for selector: {}", selector))
    }

    async fn evaluate(&self, script: &str) -> anyhow::Result<serde_json::Value> {
        let result = self.page().evaluate(script).await?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn click(&self, selector: &str) -> anyhow::Result<()> {
        self.page().find_element(selector).await?.click().await?;
        Ok(())
    }

    async fn inner_text(&self) -> anyhow::Result<String> {
        let value = self
            .evaluate("document.body ? document.body.innerText : ''")
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn content(&self) -> anyhow::Result<String> {
        Ok(self.page().content().await?)
    }

    async fn screenshot(&self) -> anyhow::Result<Vec<u8>> {
        Ok(self
            .page()
            .screenshot(chromiumoxide::page::ScreenshotParams::builder().build())
            .await?)
    }
}
