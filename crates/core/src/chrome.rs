//! Headless Chrome render backend.
//!
//! Every surface gets its own browser process sized to the requested
//! viewport, with the document written to a private temp directory and
//! loaded over `file://` so that it is same-origin with nothing else.

use crate::config::{RenderConfig, Viewport};
use crate::error::{ExportError, Result};
use crate::surface::{RenderBackend, RenderSurface};
use headless_chrome::protocol::cdp::Page;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptionsBuilder, Tab};
use serde_json::Value;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info};

/// Chrome flags shared by every surface.
const CHROME_ARGS: &[&str] = &[
    "--force-device-scale-factor=1",
    "--hide-scrollbars",
    "--allow-file-access-from-files",
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-background-networking",
    "--disable-sync",
];

/// Backend that opens each surface in a fresh headless Chrome.
pub struct ChromeBackend {
    browser_path: PathBuf,
    config: RenderConfig,
}

impl ChromeBackend {
    /// Locate Chrome and create the backend.
    pub fn new(config: RenderConfig) -> Result<Self> {
        let browser_path = Self::find_browser(&config)?;
        info!("Using browser at {:?}", browser_path);
        Ok(Self {
            browser_path,
            config,
        })
    }

    pub fn browser_path(&self) -> &PathBuf {
        &self.browser_path
    }

    /// Find the Chrome/Chromium executable.
    pub fn find_browser(config: &RenderConfig) -> Result<PathBuf> {
        if let Some(ref path) = config.browser_path {
            if path.exists() {
                return Ok(path.clone());
            }
            return Err(ExportError::BrowserNotFound);
        }

        let candidates = [
            // macOS
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            // Linux
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            // Snap (Ubuntu)
            "/snap/bin/chromium",
        ];

        for candidate in candidates {
            let path = PathBuf::from(candidate);
            if path.exists() {
                return Ok(path);
            }
        }

        which::which("google-chrome")
            .or_else(|_| which::which("chromium"))
            .or_else(|_| which::which("chromium-browser"))
            .map_err(|_| ExportError::BrowserNotFound)
    }

    fn launch(&self, viewport: Viewport) -> Result<Browser> {
        let args: Vec<&OsStr> = CHROME_ARGS.iter().map(OsStr::new).collect();
        let options = LaunchOptionsBuilder::default()
            .headless(self.config.headless)
            .path(Some(self.browser_path.clone()))
            .window_size(Some((viewport.width, viewport.height)))
            .idle_browser_timeout(self.config.load_timeout * 4)
            .args(args)
            .build()
            .map_err(|e| ExportError::Browser(e.to_string()))?;
        Ok(Browser::new(options)?)
    }
}

impl RenderBackend for ChromeBackend {
    type Surface = ChromeSurface;

    fn open(&self, html: &str, viewport: Viewport) -> Result<ChromeSurface> {
        let start = Instant::now();
        let workdir = tempfile::Builder::new().prefix("gdoc-fixer-").tempdir()?;
        let page_path = workdir
            .path()
            .join(format!("{}.html", uuid::Uuid::new_v4()));
        std::fs::write(&page_path, html)?;

        let browser = self.launch(viewport)?;
        let tab = browser.new_tab()?;
        tab.set_default_timeout(self.config.load_timeout);
        tab.navigate_to(&format!("file://{}", page_path.display()))?;
        tab.wait_until_navigated()?;

        debug!(
            "Opened {} surface in {:?}",
            viewport.label(),
            start.elapsed()
        );
        Ok(ChromeSurface {
            browser: Some(browser),
            tab,
            _workdir: workdir,
        })
    }
}

/// One browser tab showing one document.
pub struct ChromeSurface {
    browser: Option<Browser>,
    tab: Arc<Tab>,
    _workdir: TempDir,
}

impl RenderSurface for ChromeSurface {
    fn evaluate(&self, script: &str, await_promise: bool) -> Result<Value> {
        let result = self
            .tab
            .evaluate(script, await_promise)
            .map_err(|e| ExportError::ScriptFailed(e.to_string()))?;
        Ok(result.value.unwrap_or(Value::Null))
    }

    fn capture_png(&self, clip: Viewport, pixel_ratio: f64) -> Result<Vec<u8>> {
        let clip = Page::Viewport {
            x: 0.0,
            y: 0.0,
            width: clip.width as f64,
            height: clip.height as f64,
            scale: pixel_ratio,
        };
        let png = self
            .tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, Some(clip), true)?;
        if png.is_empty() {
            return Err(ExportError::NoImageProduced);
        }
        Ok(png)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(browser) = self.browser.take() {
            let closed = self.tab.close(false);
            // Dropping the browser kills the process either way.
            drop(browser);
            closed.map_err(|e| ExportError::Browser(e.to_string()))?;
        }
        Ok(())
    }
}
