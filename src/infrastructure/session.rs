//! Browser session lifecycle.
//!
//! Owns the headless Chromium process: launch, warm-up navigation, periodic
//! restart to bound memory growth, and shutdown. Item tasks never hold a tab
//! across a restart; the engine only recycles the session between category
//! batches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::error::FetchError;
use crate::infrastructure::config::BrowserConfig;

struct SessionInner {
    browser: Browser,
    handler_task: JoinHandle<()>,
    alive: Arc<AtomicBool>,
}

/// Shared handle to the running browser process. Tabs are opened per fetch
/// call; the session itself is shared read-only between item tasks.
pub struct BrowserSession {
    config: BrowserConfig,
    inner: RwLock<SessionInner>,
}

impl BrowserSession {
    /// Launch the browser process and start draining its event handler.
    pub async fn launch(config: BrowserConfig) -> Result<Self> {
        let inner = Self::launch_inner(&config).await?;
        let session = Self { config, inner: RwLock::new(inner) };
        session.warm_up().await;
        Ok(session)
    }

    async fn launch_inner(config: &BrowserConfig) -> Result<SessionInner> {
        let mut builder = ChromeConfig::builder();
        if !config.headless {
            builder = builder.with_head();
        }
        let chrome_config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("invalid browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(chrome_config)
            .await
            .context("failed to launch browser process")?;

        let alive = Arc::new(AtomicBool::new(true));
        let alive_flag = Arc::clone(&alive);
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
            alive_flag.store(false, Ordering::SeqCst);
            debug!("browser event handler exited");
        });

        info!(headless = config.headless, "browser session started");
        Ok(SessionInner { browser, handler_task, alive })
    }

    /// Whether the backing browser process is still reachable.
    pub async fn is_alive(&self) -> bool {
        self.inner.read().await.alive.load(Ordering::SeqCst)
    }

    /// Open a fresh tab. `SessionClosed` when the process is gone.
    pub async fn new_tab(&self) -> Result<Page, FetchError> {
        let inner = self.inner.read().await;
        if !inner.alive.load(Ordering::SeqCst) {
            return Err(FetchError::SessionClosed);
        }
        inner.browser.new_page("about:blank").await.map_err(|e| {
            if inner.alive.load(Ordering::SeqCst) {
                FetchError::Timeout(format!("failed to open tab: {e}"))
            } else {
                FetchError::SessionClosed
            }
        })
    }

    /// Navigate one throwaway tab to the configured warm-up URL. Some
    /// sources only serve fully rendered listings to a warmed session.
    async fn warm_up(&self) {
        let Some(url) = self.config.warmup_url.clone() else {
            return;
        };
        match self.new_tab().await {
            Ok(page) => {
                if let Err(e) = page.goto(url.as_str()).await {
                    warn!(%url, error = %e, "warm-up navigation failed");
                }
                if let Err(e) = page.close().await {
                    debug!(error = %e, "warm-up tab close failed");
                }
            }
            Err(e) => warn!(%url, error = %e, "warm-up tab could not be opened"),
        }
    }

    /// Tear the process down and launch a fresh one. Callers must ensure no
    /// item task is in flight; the engine only restarts between batches.
    pub async fn restart(&self) -> Result<()> {
        info!("restarting browser session");
        {
            let mut inner = self.inner.write().await;
            Self::teardown(&mut inner).await;
            *inner = Self::launch_inner(&self.config).await?;
        }
        self.warm_up().await;
        Ok(())
    }

    /// Final shutdown at the end of a run.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.write().await;
        Self::teardown(&mut inner).await;
        info!("browser session closed");
    }

    async fn teardown(inner: &mut SessionInner) {
        inner.alive.store(false, Ordering::SeqCst);
        if let Err(e) = inner.browser.close().await {
            warn!(error = %e, "browser close failed");
        }
        if let Err(e) = inner.browser.wait().await {
            debug!(error = %e, "browser wait failed");
        }
        inner.handler_task.abort();
    }
}
