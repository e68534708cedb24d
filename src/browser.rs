use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Handler, Page};
use futures::StreamExt;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::EkwError;

/// One Chromium process plus the task pumping its CDP events.
///
/// Owned by whichever fetch is running; call [`BrowserSession::close`] on
/// every exit path. Dropping without closing still kills the child process
/// (chromiumoxide does that on drop), it just skips the graceful shutdown.
pub struct BrowserSession {
    browser: Browser,
    handler_task: tokio::task::JoinHandle<()>,
    closed: Arc<AtomicBool>,
    user_agent: String,
}

impl BrowserSession {
    pub async fn launch(config: &Config, headless: bool) -> Result<Self, EkwError> {
        let (width, height) = config.window_size;
        let mut builder = BrowserConfig::builder()
            .window_size(width, height)
            .viewport(None)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        builder = if headless {
            builder.new_headless_mode()
        } else {
            builder.with_head()
        };
        if let Some(exe) = &config.chrome_executable {
            builder = builder.chrome_executable(exe);
        }
        let browser_config = builder
            .build()
            .map_err(|e| EkwError::navigation("configure browser", e))?;

        info!(
            "Launching browser ({})",
            if headless { "headless" } else { "visible" }
        );
        let (browser, handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| EkwError::navigation("launch browser", e))?;

        let closed = Arc::new(AtomicBool::new(false));
        let handler_task = spawn_handler_task(handler, Arc::clone(&closed));

        Ok(Self {
            browser,
            handler_task,
            closed,
            user_agent: config.user_agent.clone(),
        })
    }

    /// Open a blank tab with the stealth patches applied before any navigation.
    pub async fn new_page(&self) -> Result<Page, EkwError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| EkwError::navigation("open tab", e))?;
        page.enable_stealth_mode_with_agent(&self.user_agent)
            .await
            .map_err(|e| EkwError::navigation("apply stealth mode", e))?;
        Ok(page)
    }

    /// False once the CDP connection has dropped (browser crashed or was closed).
    pub fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    pub async fn close(mut self) {
        info!("Closing browser");
        if let Err(e) = self.browser.close().await {
            warn!("browser close: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            warn!("browser wait: {}", e);
        }
        self.handler_task.abort();
    }
}

fn spawn_handler_task(mut handler: Handler, closed: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                tracing::debug!("cdp handler: {}", e);
            }
        }
        closed.store(true, Ordering::SeqCst);
    })
}

/// Dump a full-page screenshot and the page HTML next to each other.
///
/// Best-effort: failures are logged and otherwise ignored.
pub async fn capture_failure(page: &Page, dir: &Path, stem: &str) {
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        warn!("debug dir {}: {}", dir.display(), e);
        return;
    }

    let png_path = dir.join(format!("{}_error.png", stem));
    match page
        .screenshot(ScreenshotParams::builder().full_page(true).build())
        .await
    {
        Ok(png) => match tokio::fs::write(&png_path, png).await {
            Ok(()) => info!("Screenshot saved: {}", png_path.display()),
            Err(e) => warn!("{}: {}", png_path.display(), e),
        },
        Err(e) => warn!("screenshot failed: {}", e),
    }

    let html_path = dir.join(format!("{}_error.html", stem));
    match page.content().await {
        Ok(html) => match tokio::fs::write(&html_path, html).await {
            Ok(()) => info!("Page HTML saved: {}", html_path.display()),
            Err(e) => warn!("{}: {}", html_path.display(), e),
        },
        Err(e) => warn!("page content unavailable: {}", e),
    }
}
