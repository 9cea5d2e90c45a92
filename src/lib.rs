//! Scrollsnap
//!
//! Captures a tall web page as a sequence of viewport-sized image tiles while
//! scrolling, and optionally stitches the tiles into one continuous long image.
//!
//! # Features
//!
//! - **CDP Backend** (default): drives a headless Chrome via the Chrome
//!   DevTools Protocol to scroll, settle, and screenshot
//! - **Pluggable Driver**: the capture pipeline is written against the
//!   [`ScrollDriver`] trait, so tests run on scripted fakes
//! - **Crash-safe Tiles**: every tile is streamed to disk as it is captured;
//!   a failure mid-page keeps everything captured so far
//!
//! # Example
//!
//! ```no_run
//! use scrollsnap::capture::{capture_page, CancelToken};
//! use scrollsnap::cdp::CdpDriver;
//! use scrollsnap::session::SessionWriter;
//! use scrollsnap::{ScrollDriver, SessionConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig {
//!     tile_overlap: 80,
//!     ..Default::default()
//! };
//! config.validate()?;
//!
//! let mut driver = CdpDriver::new(&config)?;
//! driver.navigate("https://example.com")?;
//!
//! let mut sink = SessionWriter::new("out/example.com", "https://example.com")?;
//! let outcome = capture_page(&mut driver, &config, &mut sink, &CancelToken::new())?;
//! println!("captured {} tiles", outcome.tiles.len());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use image::RgbaImage;
use serde::Serialize;

pub mod error;
pub use error::{Error, Result};

pub mod geometry;
pub mod planner;

pub mod capture;
pub mod stitch;

// Session/output layout and the multi-URL runner
pub mod session;

#[cfg(feature = "cdp")]
pub mod cdp;

pub use capture::{CancelToken, CaptureOutcome, PersistenceSink, Tile};
pub use geometry::Geometry;
pub use planner::{HeightOracle, PlannedOffset, ScrollPlan, ScrollPlanner};
pub use stitch::{stitch, StitchSpec};

/// Viewport geometry for a capture session
///
/// Immutable once a session starts: every tile of a page is captured at the
/// same viewport size, which is what lets the stitcher assume uniform tile
/// dimensions.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ViewportSpec {
    /// Viewport width in pixels
    pub width: u32,
    /// Viewport height in pixels (the tile height baseline)
    pub height: u32,
    /// CSS zoom applied to the page body after navigation
    pub scale: f32,
    /// Emulate a mobile-like user agent
    pub mobile: bool,
}

impl Default for ViewportSpec {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 1000,
            scale: 1.0,
            mobile: false,
        }
    }
}

/// How the driver settles the page after navigation and after every scroll
///
/// Selected once per session and applied identically after each scroll step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WaitStrategy {
    /// Block until the page reports no pending network activity (bounded by
    /// an internal timeout), then a short render-settle pause
    NetworkIdle,
    /// Block for a literal duration in milliseconds
    FixedDelay(u64),
}

impl Default for WaitStrategy {
    fn default() -> Self {
        WaitStrategy::NetworkIdle
    }
}

impl std::fmt::Display for WaitStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitStrategy::NetworkIdle => write!(f, "networkidle"),
            WaitStrategy::FixedDelay(ms) => write!(f, "{}ms", ms),
        }
    }
}

/// Configuration for one capture session
///
/// The defaults mirror the tool's CLI defaults: a 1280x1000 viewport, 80 px of
/// tile overlap, a 50000 px cap on page height, and network-idle settling.
///
/// # Examples
///
/// ```
/// let cfg = scrollsnap::SessionConfig::default();
/// assert!(cfg.validate().is_ok());
/// assert_eq!(cfg.viewport.height, 1000);
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Viewport size, zoom, and mobile flag
    pub viewport: ViewportSpec,
    /// Settle strategy applied after navigation and after every scroll
    pub wait: WaitStrategy,
    /// Vertical pixel band captured in both of two consecutive tiles
    pub tile_overlap: u32,
    /// Upper bound on the page height considered for capture; `None` captures
    /// the full measured height
    pub cap_height: Option<u32>,
    /// Hard limit on tiles per page, guarding against runaway growth
    pub max_tiles: u32,
    /// Pixels cropped from the top of tiles 2..N when stitching
    pub sticky_top: u32,
    /// Pixels cropped from the bottom of tiles 1..N-1 when stitching
    pub sticky_bottom: u32,
    /// Stitch the captured tiles into one long image
    pub stitch: bool,
    /// Run the browser headless
    pub headless: bool,
    /// Path to a cookies.json file loaded before navigation
    pub cookies: Option<PathBuf>,
    /// Chromium user data dir for persistent logins
    pub user_data_dir: Option<PathBuf>,
    /// Override the user agent; `None` uses the browser default (or a mobile
    /// UA when `viewport.mobile` is set)
    pub user_agent: Option<String>,
    /// Timeout for page loads in milliseconds
    pub nav_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            viewport: ViewportSpec::default(),
            wait: WaitStrategy::default(),
            tile_overlap: 80,
            cap_height: Some(50_000),
            max_tiles: 150,
            sticky_top: 0,
            sticky_bottom: 0,
            stitch: false,
            headless: true,
            cookies: None,
            user_data_dir: None,
            user_agent: None,
            nav_timeout_ms: 30_000,
        }
    }
}

impl SessionConfig {
    /// Validate the configuration before any capture begins.
    ///
    /// Every invalid combination is rejected here so a session never partially
    /// executes on bad geometry: a zero-sized viewport, a non-positive zoom,
    /// an overlap that prevents forward progress, or crop bands that would
    /// leave a middle tile with nothing to contribute.
    pub fn validate(&self) -> Result<()> {
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(Error::Configuration(format!(
                "viewport must be non-empty, got {}x{}",
                self.viewport.width, self.viewport.height
            )));
        }
        if !self.viewport.scale.is_finite() || self.viewport.scale <= 0.0 {
            return Err(Error::Configuration(format!(
                "scale must be a positive number, got {}",
                self.viewport.scale
            )));
        }
        if self.tile_overlap >= self.viewport.height {
            return Err(Error::Configuration(format!(
                "tile overlap ({}) must be smaller than the viewport height ({})",
                self.tile_overlap, self.viewport.height
            )));
        }
        if u64::from(self.sticky_top) + u64::from(self.sticky_bottom) >= u64::from(self.viewport.height) {
            return Err(Error::Configuration(format!(
                "sticky crops ({} + {}) must leave a middle tile some height (viewport is {})",
                self.sticky_top, self.sticky_bottom, self.viewport.height
            )));
        }
        if self.cap_height == Some(0) {
            return Err(Error::Configuration(
                "cap height must be positive when set".to_string(),
            ));
        }
        if self.max_tiles == 0 {
            return Err(Error::Configuration(
                "max tiles must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The stitch parameters implied by this session's crops and overlap
    pub fn stitch_spec(&self) -> StitchSpec {
        StitchSpec {
            overlap: self.tile_overlap,
            sticky_top: self.sticky_top,
            sticky_bottom: self.sticky_bottom,
        }
    }
}

/// Contract between the capture pipeline and a browser backend
///
/// The planner only depends on [`current_content_height`]; the orchestrator
/// uses the rest. `scroll_to` owns settling: it applies the session's
/// [`WaitStrategy`] after moving and reports the content height observed once
/// the page came to rest, which is what feeds the planner's height re-checks.
///
/// [`current_content_height`]: ScrollDriver::current_content_height
pub trait ScrollDriver {
    /// Apply viewport size, zoom, and mobile emulation
    fn set_viewport(&mut self, spec: &ViewportSpec) -> Result<()>;

    /// Load a URL and wait for it to be ready per the session wait strategy
    fn navigate(&mut self, url: &str) -> Result<()>;

    /// Scroll the window to a vertical offset, settle, and return the content
    /// height measured after settling
    fn scroll_to(&mut self, offset: u32) -> Result<u32>;

    /// Capture the current viewport as a decoded image
    fn capture_viewport(&mut self) -> Result<RgbaImage>;

    /// Measure the current scrollable content height
    fn current_content_height(&mut self) -> Result<u32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.viewport.width, 1280);
        assert_eq!(config.viewport.height, 1000);
        assert_eq!(config.tile_overlap, 80);
        assert_eq!(config.cap_height, Some(50_000));
        assert!(config.headless);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overlap_must_leave_progress() {
        let config = SessionConfig {
            tile_overlap: 1000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let config = SessionConfig {
            tile_overlap: 1001,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_degenerate_crops_rejected_before_capture() {
        let config = SessionConfig {
            sticky_top: 500,
            sticky_bottom: 600,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_zero_viewport_rejected() {
        let config = SessionConfig {
            viewport: ViewportSpec {
                width: 0,
                height: 1000,
                scale: 1.0,
                mobile: false,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wait_strategy_display() {
        assert_eq!(WaitStrategy::NetworkIdle.to_string(), "networkidle");
        assert_eq!(WaitStrategy::FixedDelay(350).to_string(), "350ms");
    }
}
