//! Browser-backed page fetcher.
//!
//! One fetch call = one fresh tab, navigated, scrolled to trigger lazy-loaded
//! content, read back, closed. The tab is wrapped in an RAII guard so an
//! error mid-fetch cannot leak the handle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::domain::error::FetchError;
use crate::domain::ports::{PageSource, WaitPolicy};
use crate::infrastructure::session::BrowserSession;

/// Guard that closes the tab on drop. chromiumoxide pages have no Drop of
/// their own; an unclosed tab survives in the browser process and
/// accumulates memory under concurrent load.
struct TabGuard {
    page: Option<Page>,
    url: String,
    runtime: tokio::runtime::Handle,
}

impl TabGuard {
    fn new(page: Page, url: String) -> Self {
        Self { page: Some(page), url, runtime: tokio::runtime::Handle::current() }
    }

    fn page(&self) -> &Page {
        // Invariant: only `close` takes the page out, and it consumes self.
        self.page.as_ref().expect("tab already closed")
    }

    /// Preferred cleanup path; awaits the CDP close command.
    async fn close(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                warn!(url = %self.url, error = %e, "tab close failed");
            }
        }
    }
}

impl Drop for TabGuard {
    fn drop(&mut self) {
        // Error-path fallback: Drop is sync, so cleanup is spawned.
        if let Some(page) = self.page.take() {
            let url = std::mem::take(&mut self.url);
            self.runtime.spawn(async move {
                if let Err(e) = page.close().await {
                    trace!(%url, error = %e, "tab cleanup after drop failed");
                }
            });
        }
    }
}

/// Fetches rendered markup through the shared browser session.
pub struct PageFetcher {
    session: Arc<BrowserSession>,
}

impl PageFetcher {
    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session }
    }

    async fn map_cdp_error(&self, context: &str, err: chromiumoxide::error::CdpError) -> FetchError {
        if self.session.is_alive().await {
            FetchError::Timeout(format!("{context}: {err}"))
        } else {
            FetchError::SessionClosed
        }
    }

    /// Poll for the readiness selector until it appears or the deadline
    /// passes.
    async fn await_selector(
        &self,
        page: &Page,
        selector: &str,
        deadline: Duration,
    ) -> Result<(), FetchError> {
        let started = tokio::time::Instant::now();
        loop {
            match page.find_element(selector).await {
                Ok(_) => return Ok(()),
                Err(_) if started.elapsed() < deadline => {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
                Err(_) => {
                    if !self.session.is_alive().await {
                        return Err(FetchError::SessionClosed);
                    }
                    return Err(FetchError::SelectorNotFound(selector.to_string()));
                }
            }
        }
    }

    /// Scroll to the bottom repeatedly until the document height stops
    /// growing, bounded by the policy's round count.
    async fn trigger_lazy_content(&self, page: &Page, policy: &WaitPolicy) {
        let mut last_height: i64 = -1;
        for round in 0..policy.scroll_rounds {
            let _ = page
                .evaluate("window.scrollTo(0, document.body.scrollHeight)")
                .await;
            tokio::time::sleep(policy.scroll_pause).await;
            let height = page
                .evaluate("document.body.scrollHeight")
                .await
                .ok()
                .and_then(|v| v.into_value::<i64>().ok())
                .unwrap_or(last_height);
            if height == last_height {
                trace!(round, "document height stable, stopping scroll");
                break;
            }
            last_height = height;
        }
    }
}

#[async_trait]
impl PageSource for PageFetcher {
    async fn fetch(&self, url: &str, policy: &WaitPolicy) -> Result<String, FetchError> {
        let tab = TabGuard::new(self.session.new_tab().await?, url.to_string());
        let page = tab.page();

        match timeout(policy.nav_timeout, page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(self.map_cdp_error("navigation", e).await),
            Err(_) => return Err(FetchError::Timeout(format!("navigation to {url}"))),
        }

        if let Some(selector) = &policy.ready_selector {
            self.await_selector(page, selector, policy.selector_timeout).await?;
        }

        self.trigger_lazy_content(page, policy).await;

        let html = match timeout(policy.nav_timeout, page.content()).await {
            Ok(Ok(html)) => html,
            Ok(Err(e)) => return Err(self.map_cdp_error("content read", e).await),
            Err(_) => return Err(FetchError::Timeout(format!("content read for {url}"))),
        };

        debug!(%url, bytes = html.len(), "page fetched");
        tab.close().await;
        Ok(html)
    }
}
