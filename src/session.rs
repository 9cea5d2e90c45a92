//! Session output layout, metadata files, and the multi-URL runner
//!
//! Layout per run: `out/<timestamp>/<sanitized-url>/tiles/tile_0001.png ...`
//! plus `page_meta.json` and optional `stitched.png` per URL, and a session
//! level `meta.json`. Tile numbering is 1-based, zero-padded, and gap-free;
//! downstream tooling orders tiles by name.

use std::path::{Path, PathBuf};
#[cfg(feature = "cdp")]
use std::sync::Arc;

use chrono::Local;
#[cfg(feature = "cdp")]
use chrono::Utc;
use image::RgbaImage;
#[cfg(feature = "cdp")]
use log::warn;
use serde::Serialize;
use url::Url;

use crate::capture::{PersistenceSink, Tile};
use crate::error::{Error, Result};
use crate::planner::ScrollPlan;
use crate::stitch::StitchSpec;
use crate::{SessionConfig, ViewportSpec};

#[cfg(feature = "cdp")]
use crate::capture::{capture_page, CancelToken};
#[cfg(feature = "cdp")]
use crate::cdp::CdpDriver;
#[cfg(feature = "cdp")]
use crate::ScrollDriver;
#[cfg(feature = "cdp")]
use crate::stitch::stitch;
#[cfg(feature = "cdp")]
use log::info;
#[cfg(feature = "cdp")]
use tokio::sync::Semaphore;
#[cfg(feature = "cdp")]
use tokio::task::JoinSet;

/// Session directory timestamp, matching the tool's historical layout
pub fn timestamp() -> String {
    Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

#[cfg(feature = "cdp")]
fn unix_seconds() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Turn a URL into a filesystem-safe directory name: scheme dropped, runs of
/// unsafe characters collapsed to `_`, truncated to 120 characters.
pub fn safe_dirname(url: &str) -> String {
    let flattened = match Url::parse(url) {
        Ok(parsed) => format!(
            "{}{}{}",
            parsed.host_str().unwrap_or_default(),
            parsed.path(),
            parsed
                .query()
                .map(|q| format!("_{}", q))
                .unwrap_or_default()
        ),
        Err(_) => url.to_string(),
    };

    let mut name = String::with_capacity(flattened.len());
    let mut gap = false;
    for ch in flattened.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            name.push(ch);
            gap = false;
        } else if !gap {
            name.push('_');
            gap = true;
        }
    }
    name.truncate(120);
    name
}

/// One persisted tile, as recorded in the metadata files
#[derive(Debug, Clone, Serialize)]
pub struct TileRecord {
    pub url: String,
    pub tile: String,
    pub y: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize)]
struct StitchRecord {
    path: String,
    width: u32,
    height: u32,
    spec: StitchSpec,
}

#[derive(Serialize)]
struct PageMeta<'a> {
    url: &'a str,
    total_height: u32,
    viewport: ViewportSpec,
    wait: String,
    tile_overlap: u32,
    tiles: Vec<&'a str>,
    plan: &'a ScrollPlan,
    stitched: Option<&'a StitchRecord>,
}

#[cfg(feature = "cdp")]
#[derive(Serialize)]
struct SessionMeta {
    urls: Vec<String>,
    started_at: f64,
    finished_at: f64,
    tiles: Vec<TileRecord>,
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    std::fs::write(path, body)?;
    Ok(())
}

/// Persistence sink for one URL: streams tiles to `tiles/tile_%04d.png` as
/// they are captured and records everything needed for `page_meta.json`
pub struct SessionWriter {
    url: String,
    url_dir: PathBuf,
    tiles_dir: PathBuf,
    records: Vec<TileRecord>,
    stitched: Option<StitchRecord>,
}

impl SessionWriter {
    pub fn new(url_dir: impl Into<PathBuf>, url: &str) -> Result<Self> {
        let url_dir = url_dir.into();
        let tiles_dir = url_dir.join("tiles");
        std::fs::create_dir_all(&tiles_dir)?;
        Ok(Self {
            url: url.to_string(),
            url_dir,
            tiles_dir,
            records: Vec::new(),
            stitched: None,
        })
    }

    /// Path of the stitched image, once one has been written
    pub fn stitched_path(&self) -> Option<PathBuf> {
        self.stitched.as_ref().map(|s| PathBuf::from(&s.path))
    }

    /// Write `page_meta.json` next to the tiles
    pub fn write_page_meta(&self, config: &SessionConfig, plan: &ScrollPlan) -> Result<PathBuf> {
        let meta = PageMeta {
            url: &self.url,
            total_height: plan
                .offsets
                .last()
                .map(|p| p.bounded_height)
                .unwrap_or_default(),
            viewport: config.viewport,
            wait: config.wait.to_string(),
            tile_overlap: config.tile_overlap,
            tiles: self.records.iter().map(|r| r.tile.as_str()).collect(),
            plan,
            stitched: self.stitched.as_ref(),
        };
        let path = self.url_dir.join("page_meta.json");
        write_json(&path, &meta)?;
        Ok(path)
    }

    /// Hand the tile records over for session-level aggregation
    pub fn into_records(self) -> Vec<TileRecord> {
        self.records
    }
}

impl PersistenceSink for SessionWriter {
    fn tile_captured(&mut self, tile: &Tile) -> Result<()> {
        let path = self.tiles_dir.join(format!("tile_{:04}.png", tile.index));
        tile.image.save(&path)?;
        self.records.push(TileRecord {
            url: self.url.clone(),
            tile: path.display().to_string(),
            y: tile.offset,
            height: tile.image.height(),
        });
        Ok(())
    }

    fn stitched(&mut self, image: &RgbaImage, spec: &StitchSpec, _plan: &ScrollPlan) -> Result<()> {
        let path = self.url_dir.join("stitched.png");
        image.save(&path)?;
        self.stitched = Some(StitchRecord {
            path: path.display().to_string(),
            width: image.width(),
            height: image.height(),
            spec: *spec,
        });
        Ok(())
    }
}

/// Which stage of a page's pipeline failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Navigate,
    Capture,
    Stitch,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Navigate => write!(f, "navigate"),
            Stage::Capture => write!(f, "capture"),
            Stage::Stitch => write!(f, "stitch"),
        }
    }
}

/// Per-URL outcome surfaced to the user: how many tiles were produced and,
/// on failure, which stage gave out first
#[derive(Debug)]
pub struct PageReport {
    pub url: String,
    pub tiles: usize,
    pub cancelled: bool,
    pub failed_stage: Option<Stage>,
    pub error: Option<String>,
    pub records: Vec<TileRecord>,
}

impl PageReport {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            tiles: 0,
            cancelled: false,
            failed_stage: None,
            error: None,
            records: Vec::new(),
        }
    }

    #[cfg(feature = "cdp")]
    fn failed(mut self, stage: Stage, err: &Error) -> Self {
        self.mark_failed(stage, err);
        self
    }

    /// Record a failure; the first failed stage wins so a stitch error never
    /// masks the capture error that preceded it
    fn mark_failed(&mut self, stage: Stage, err: &Error) {
        if self.failed_stage.is_none() {
            self.failed_stage = Some(stage);
            self.error = Some(err.to_string());
        }
    }

    pub fn ok(&self) -> bool {
        self.failed_stage.is_none()
    }
}

/// Everything a finished session run produced
#[derive(Debug)]
pub struct SessionSummary {
    pub session_dir: PathBuf,
    pub reports: Vec<PageReport>,
}

impl SessionSummary {
    pub fn all_ok(&self) -> bool {
        self.reports.iter().all(|r| r.ok())
    }
}

/// Capture (and optionally stitch) one URL with its own browser.
///
/// Failures are contained here: whatever stage gives out, the report says so
/// and the run moves on to other URLs. Tiles persisted before a failure stay
/// on disk, and a partial tile set is still stitched when stitching was
/// requested.
#[cfg(feature = "cdp")]
fn capture_url(
    config: &SessionConfig,
    url: &str,
    url_dir: &Path,
    cancel: &CancelToken,
) -> PageReport {
    info!("==> {}", url);
    let mut report = PageReport::new(url);

    let mut driver = match CdpDriver::new(config) {
        Ok(d) => d,
        Err(e) => return report.failed(Stage::Navigate, &e),
    };

    if let Err(e) = driver.set_viewport(&config.viewport) {
        return report.failed(Stage::Navigate, &e);
    }

    if let Some(cookies) = &config.cookies {
        // A malformed cookie file is survivable: log and carry on
        if let Err(e) = driver.load_cookies_from(cookies) {
            warn!("failed to load cookies: {}", e);
        }
    }

    if let Err(e) = driver.navigate(url) {
        return report.failed(Stage::Navigate, &e);
    }

    let mut sink = match SessionWriter::new(url_dir, url) {
        Ok(s) => s,
        Err(e) => return report.failed(Stage::Capture, &e),
    };

    let outcome = match capture_page(&mut driver, config, &mut sink, cancel) {
        Ok(o) => o,
        Err(e) => return report.failed(Stage::Capture, &e),
    };

    report.tiles = outcome.tiles.len();
    report.cancelled = outcome.cancelled;
    if let Some(e) = &outcome.error {
        report.mark_failed(Stage::Capture, e);
    }

    // Stitch whatever exists, unless the run was cancelled mid-page
    if config.stitch && !outcome.cancelled && !outcome.tiles.is_empty() {
        match stitch(&outcome.tiles, &config.stitch_spec()) {
            Ok(image) => {
                if let Err(e) = sink.stitched(&image, &config.stitch_spec(), &outcome.plan) {
                    report.mark_failed(Stage::Stitch, &e);
                } else if let Some(path) = sink.stitched_path() {
                    info!("stitched -> {}", path.display());
                }
            }
            Err(e) => report.mark_failed(Stage::Stitch, &e),
        }
    }

    if let Err(e) = sink.write_page_meta(config, &outcome.plan) {
        warn!("failed to write page metadata for {}: {}", url, e);
    }

    if let Err(e) = driver.close() {
        warn!("failed to close browser for {}: {}", url, e);
    }

    report.records = sink.into_records();
    report
}

/// Run a whole session: one timestamped directory, every URL captured with
/// its own browser, at most `jobs` pages in flight at once.
///
/// Page pipelines never share mutable state; a settling page only occupies
/// its own blocking task. Cancellation stops every page at its next tile
/// boundary.
#[cfg(feature = "cdp")]
pub async fn run_session(
    config: SessionConfig,
    urls: Vec<String>,
    out_root: PathBuf,
    jobs: usize,
    cancel: CancelToken,
) -> Result<SessionSummary> {
    config.validate()?;

    let session_dir = out_root.join(timestamp());
    std::fs::create_dir_all(&session_dir)?;
    let started_at = unix_seconds();

    let config = Arc::new(config);
    let semaphore = Arc::new(Semaphore::new(jobs.max(1)));
    let mut tasks: JoinSet<(usize, PageReport)> = JoinSet::new();

    for (position, url) in urls.iter().enumerate() {
        let config = Arc::clone(&config);
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();
        let url = url.clone();
        let url_dir = session_dir.join(safe_dirname(&url));

        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let fallback_url = url.clone();
            let report = tokio::task::spawn_blocking(move || {
                capture_url(&config, &url, &url_dir, &cancel)
            })
            .await
            .unwrap_or_else(|e| {
                let mut report = PageReport::new(&fallback_url);
                report.mark_failed(Stage::Capture, &Error::Driver(format!("worker panicked: {}", e)));
                report
            });
            (position, report)
        });
    }

    let mut indexed: Vec<(usize, PageReport)> = Vec::with_capacity(urls.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(pair) => indexed.push(pair),
            Err(e) => warn!("page task failed to join: {}", e),
        }
    }
    indexed.sort_by_key(|(position, _)| *position);
    let reports: Vec<PageReport> = indexed.into_iter().map(|(_, r)| r).collect();

    let meta = SessionMeta {
        urls,
        started_at,
        finished_at: unix_seconds(),
        tiles: reports.iter().flat_map(|r| r.records.clone()).collect(),
    };
    write_json(&session_dir.join("meta.json"), &meta)?;

    Ok(SessionSummary {
        session_dir,
        reports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_dirname_strips_scheme_and_collapses_unsafe_runs() {
        assert_eq!(
            safe_dirname("https://example.com/docs/page"),
            "example.com_docs_page"
        );
        assert_eq!(
            safe_dirname("http://example.com/a b/c?x=1&y=2"),
            "example.com_a_20b_c_x_1_y_2"
        );
    }

    #[test]
    fn safe_dirname_handles_non_url_input() {
        assert_eq!(safe_dirname("not a url!!"), "not_a_url_");
    }

    #[test]
    fn safe_dirname_is_bounded() {
        let long = format!("https://example.com/{}", "x".repeat(500));
        assert!(safe_dirname(&long).len() <= 120);
    }

    #[test]
    fn first_failed_stage_wins() {
        let mut report = PageReport::new("https://example.com");
        report.mark_failed(Stage::Capture, &Error::Driver("boom".to_string()));
        report.mark_failed(Stage::Stitch, &Error::Stitch("later".to_string()));
        assert_eq!(report.failed_stage, Some(Stage::Capture));
        assert!(report.error.as_deref().unwrap().contains("boom"));
    }

    #[test]
    fn timestamp_matches_directory_format() {
        let ts = timestamp();
        // YYYY-MM-DD_HH-MM-SS
        assert_eq!(ts.len(), 19);
        assert_eq!(ts.chars().filter(|c| *c == '_').count(), 1);
    }
}
