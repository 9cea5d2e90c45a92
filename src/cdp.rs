//! Chrome DevTools Protocol scroll driver (uses the `headless_chrome` crate)
//!
//! Launches a headless Chrome instance, manages a single tab, and provides
//! the [`ScrollDriver`] contract over it: programmatic scrolling, settle
//! waits, content-height measurement, and viewport screenshots.

use std::path::Path;
use std::time::{Duration, Instant};

use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use image::RgbaImage;
use log::{debug, warn};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::{ScrollDriver, SessionConfig, ViewportSpec, WaitStrategy};

const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_0 like Mac OS X) \
     AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.0 Mobile/15E148 Safari/604.1";

/// Render-settle pause applied after the wait strategy resolves, so layout
/// catches up with whatever the network delivered
const RENDER_SETTLE: Duration = Duration::from_millis(250);

/// Budget for the network-idle poll after a scroll
const NETWORK_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for network idle
const NETWORK_IDLE_POLL: Duration = Duration::from_millis(250);

/// A cookie as found in an exported cookies.json file
#[derive(Debug, Clone, Deserialize)]
pub struct CookieParam {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: Option<bool>,
    #[serde(default, rename = "httpOnly")]
    pub http_only: Option<bool>,
    #[serde(default, rename = "sameSite")]
    pub same_site: Option<String>,
    #[serde(default)]
    pub expires: Option<f64>,
}

/// CDP-backed scroll driver
///
/// One driver owns one browser and one tab; a page's tiles are captured
/// strictly sequentially on it, so nothing here needs to be shareable.
pub struct CdpDriver {
    browser: Browser,
    tab: Arc<headless_chrome::browser::tab::Tab>,
    viewport: ViewportSpec,
    wait: WaitStrategy,
}

impl CdpDriver {
    /// Launch a browser configured for the session and open its capture tab
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .window_size(Some((config.viewport.width, config.viewport.height)))
            .user_data_dir(config.user_data_dir.clone())
            .args(vec![std::ffi::OsStr::new("--disable-gpu")])
            .build()
            .map_err(|e| Error::Driver(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::Driver(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| Error::Driver(format!("Failed to create tab: {}", e)))?;

        tab.set_default_timeout(Duration::from_millis(config.nav_timeout_ms));

        let user_agent = match (&config.user_agent, config.viewport.mobile) {
            (Some(ua), _) => Some(ua.clone()),
            (None, true) => Some(MOBILE_USER_AGENT.to_string()),
            (None, false) => None,
        };
        if let Some(ua) = user_agent {
            tab.set_user_agent(&ua, None, None)
                .map_err(|e| Error::Driver(format!("Failed to set user agent: {}", e)))?;
        }

        Ok(Self {
            browser,
            tab,
            viewport: config.viewport,
            wait: config.wait,
        })
    }

    /// Load cookies from an exported cookies.json file into the browser
    /// context. Call before `navigate`.
    pub fn load_cookies_from(&mut self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path)?;
        let jar: Vec<CookieParam> = serde_json::from_str(&raw)
            .map_err(|e| Error::Driver(format!("Failed to parse {}: {}", path.display(), e)))?;
        self.set_cookies(jar)
    }

    /// Set cookies on the browser context
    pub fn set_cookies(&mut self, cookies: Vec<CookieParam>) -> Result<()> {
        use headless_chrome::protocol::cdp::Network::CookieParam as NetCookieParam;
        let net_cookies = cookies
            .into_iter()
            .map(|c| NetCookieParam {
                name: c.name,
                value: c.value,
                url: c.url,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
                same_site: c.same_site.and_then(|s| match s.as_str() {
                    "Strict" | "strict" => Some(headless_chrome::protocol::cdp::Network::CookieSameSite::Strict),
                    "Lax" | "lax" => Some(headless_chrome::protocol::cdp::Network::CookieSameSite::Lax),
                    "None" | "none" => Some(headless_chrome::protocol::cdp::Network::CookieSameSite::None),
                    _ => None,
                }),
                expires: c.expires,
                priority: None,
                same_party: None,
                source_scheme: None,
                source_port: None,
                partition_key: None,
            })
            .collect();

        self.tab
            .set_cookies(net_cookies)
            .map_err(|e| Error::Driver(format!("Failed to set cookies: {}", e)))?;
        Ok(())
    }

    /// Close the browser explicitly so the child process terminates promptly
    pub fn close(self) -> Result<()> {
        drop(self.tab);
        drop(self.browser);
        Ok(())
    }

    /// Evaluate an expression that yields a number
    fn eval_u32(&self, expr: &str) -> Result<u32> {
        let eval = self
            .tab
            .evaluate(expr, false)
            .map_err(|e| Error::Driver(format!("Evaluation failed: {}", e)))?;

        let value = eval
            .value
            .ok_or_else(|| Error::Driver("No value returned from evaluation".to_string()))?;

        let number = value
            .as_u64()
            .or_else(|| value.as_f64().map(|f| f.max(0.0) as u64))
            .ok_or_else(|| Error::Driver(format!("Expected a number, got {}", value)))?;

        Ok(u32::try_from(number).unwrap_or(u32::MAX))
    }

    /// Apply the session wait strategy, then the short render-settle pause
    fn settle(&self) -> Result<()> {
        match self.wait {
            WaitStrategy::FixedDelay(ms) => std::thread::sleep(Duration::from_millis(ms)),
            WaitStrategy::NetworkIdle => {
                self.wait_for_network_idle()?;
                std::thread::sleep(RENDER_SETTLE);
            }
        }
        Ok(())
    }

    /// Approximate network-idle over CDP by polling the page's
    /// resource-timing entry count until it stops changing.
    ///
    /// Lazy-loading content shows up as new resource entries; two unchanged
    /// polls in a row mean nothing new arrived for a poll interval. The
    /// timeout is a soft bound: running out of budget logs and proceeds,
    /// matching how a still-loading page is treated elsewhere.
    fn wait_for_network_idle(&self) -> Result<()> {
        let deadline = Instant::now() + NETWORK_IDLE_TIMEOUT;
        let mut previous = self.eval_u32("performance.getEntriesByType('resource').length")?;
        while Instant::now() < deadline {
            std::thread::sleep(NETWORK_IDLE_POLL);
            let current = self.eval_u32("performance.getEntriesByType('resource').length")?;
            if current == previous {
                return Ok(());
            }
            previous = current;
        }
        warn!("network did not go idle within {:?}; continuing", NETWORK_IDLE_TIMEOUT);
        Ok(())
    }

    /// Inject the session's CSS zoom into the current page
    fn apply_zoom(&self) -> Result<()> {
        if (self.viewport.scale - 1.0).abs() < f32::EPSILON {
            return Ok(());
        }
        self.tab
            .evaluate(
                &format!("document.body.style.zoom = '{}'", self.viewport.scale),
                false,
            )
            .map_err(|e| Error::Driver(format!("Failed to apply zoom: {}", e)))?;
        Ok(())
    }
}

impl ScrollDriver for CdpDriver {
    fn set_viewport(&mut self, spec: &ViewportSpec) -> Result<()> {
        // Window size is fixed at launch; what can change per page is the
        // zoom, re-applied on the next navigation
        self.viewport = *spec;
        Ok(())
    }

    fn navigate(&mut self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .map_err(|e| Error::Driver(format!("Navigation failed: {}", e)))?;

        self.tab
            .wait_until_navigated()
            .map_err(|e| Error::Driver(format!("Wait for navigation failed: {}", e)))?;

        self.settle()?;
        self.apply_zoom()?;
        Ok(())
    }

    fn scroll_to(&mut self, offset: u32) -> Result<u32> {
        self.tab
            .evaluate(&format!("window.scrollTo(0, {})", offset), false)
            .map_err(|e| Error::Driver(format!("Scroll failed: {}", e)))?;

        self.settle()?;
        self.current_content_height()
    }

    fn capture_viewport(&mut self) -> Result<RgbaImage> {
        let png_data = self
            .tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| Error::Driver(format!("Screenshot failed: {}", e)))?;

        let image = image::load_from_memory(&png_data)?.to_rgba8();
        if image.width() != self.viewport.width || image.height() != self.viewport.height {
            debug!(
                "screenshot is {}x{} for a {}x{} viewport",
                image.width(),
                image.height(),
                self.viewport.width,
                self.viewport.height
            );
        }
        Ok(image)
    }

    fn current_content_height(&mut self) -> Result<u32> {
        self.eval_u32(
            "Math.max(document.body.scrollHeight, document.documentElement.scrollHeight)",
        )
    }
}
