//! Browser Driver (C2): a scoped headless-browser session with an explicit
//! init/reset/teardown lifecycle. No session is ever shared across two jobs.

use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig, HeadlessMode};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{error, warn};

const LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One job's exclusive browser session. Reset tears the whole thing down and
/// relaunches; it is the only recovery action exposed to the scraper.
pub struct Session {
    browser: Browser,
    handler: JoinHandle<()>,
    executable_path: Option<String>,
}

impl Session {
    /// Open a new `about:blank` page for this session.
    pub async fn new_page(&self) -> Result<Page> {
        Ok(self.browser.new_page("about:blank").await?)
    }

    /// Full teardown + reinitialize, in place. This is the only recovery
    /// action the driver exposes; callers never see the old session again.
    pub async fn reset(&mut self) -> Result<()> {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "browser close failed during reset");
        }
        self.handler.abort();

        let fresh = launch(self.executable_path.clone()).await?;
        self.browser = fresh.browser;
        self.handler = fresh.handler;
        Ok(())
    }

    pub async fn quit(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "browser close failed during teardown");
        }
        self.handler.abort();
        let _ = (&mut self.handler).await;
    }
}

/// Initialize a fresh headless session. `executable_path` overrides the
/// system-search fallback baked into `BrowserConfig`'s default builder.
pub async fn initialize(executable_path: Option<String>) -> Result<Session> {
    launch(executable_path).await
}

async fn launch(executable_path: Option<String>) -> Result<Session> {
    let mut builder = BrowserConfig::builder()
        .request_timeout(LAUNCH_TIMEOUT)
        .headless_mode(HeadlessMode::default())
        .no_sandbox()
        .arg("--disable-dev-shm-usage")
        .arg("--disable-gpu");

    if let Some(path) = &executable_path {
        builder = builder.chrome_executable(path);
    }

    let config = builder
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .context("failed to launch browser")?;

    let handler = tokio::task::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                error!(error = %e, "browser handler event failed");
            }
        }
    });

    Ok(Session {
        browser,
        handler,
        executable_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exercises only the config-building path; launching a real browser is
    /// left to integration coverage since it needs a Chrome binary present.
    #[test]
    fn builder_accepts_no_sandbox_and_custom_path() {
        let config = BrowserConfig::builder()
            .request_timeout(LAUNCH_TIMEOUT)
            .headless_mode(HeadlessMode::default())
            .no_sandbox()
            .arg("--disable-dev-shm-usage")
            .chrome_executable("/usr/bin/chromium")
            .build();
        assert!(config.is_ok());
    }
}
