//! Capture orchestration: drives a browser through the plan, one tile at a time
//!
//! A single page is strictly sequential: scroll, settle, capture, persist,
//! re-measure, decide again. Every tile is handed to the persistence sink the
//! moment it exists so a crash mid-page keeps everything captured so far.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use image::RgbaImage;
use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::geometry::Geometry;
use crate::planner::{PlannedOffset, ScrollPlan, ScrollPlanner};
use crate::stitch::StitchSpec;
use crate::{ScrollDriver, SessionConfig};

/// One viewport-sized screenshot captured at a specific scroll offset
///
/// Indices are 1-based, sequential, and gap-free; index order is capture
/// order and equals vertical order in the stitched image.
#[derive(Debug, Clone)]
pub struct Tile {
    pub index: u32,
    pub offset: u32,
    pub image: RgbaImage,
    pub captured_at: SystemTime,
}

/// Write-only stream of capture outputs
///
/// `tile_captured` fires once per tile as it is produced (streaming, not
/// buffered to the end); `stitched` fires at most once, after all tiles
/// exist. Implementations never get read back.
pub trait PersistenceSink {
    fn tile_captured(&mut self, tile: &Tile) -> Result<()>;

    fn stitched(&mut self, image: &RgbaImage, spec: &StitchSpec, plan: &ScrollPlan) -> Result<()>;
}

/// Cooperative cancellation flag, consulted between tile boundaries only
///
/// Cancelling mid-run leaves already-captured tiles intact and skips
/// stitching; no tile is ever interrupted mid-capture.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// What one page's capture produced
///
/// `tiles` holds everything successfully captured and persisted, even when
/// `error` is set: a partial tile set remains eligible for stitching. `plan`
/// records every decision the planner made, including one the capture may
/// have failed on.
#[derive(Debug)]
pub struct CaptureOutcome {
    pub tiles: Vec<Tile>,
    pub plan: ScrollPlan,
    pub cancelled: bool,
    pub error: Option<Error>,
}

impl CaptureOutcome {
    /// True when the whole plan was captured without failure or cancellation
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && !self.cancelled
    }
}

/// Capture one page: plan incrementally, scroll, settle, screenshot, persist.
///
/// Returns `Err` only for pre-flight configuration problems, before the
/// driver is touched. Runtime failures land in [`CaptureOutcome::error`] so
/// the tiles captured before the failure stay available to the caller.
pub fn capture_page<D: ScrollDriver>(
    driver: &mut D,
    config: &SessionConfig,
    sink: &mut dyn PersistenceSink,
    cancel: &CancelToken,
) -> Result<CaptureOutcome> {
    config.validate()?;
    let geometry = Geometry::new(
        config.viewport.height,
        config.tile_overlap,
        config.cap_height,
    )?;
    let mut planner = ScrollPlanner::new(geometry, config.max_tiles);

    let mut outcome = CaptureOutcome {
        tiles: Vec::new(),
        plan: ScrollPlan::default(),
        cancelled: false,
        error: None,
    };

    let mut height = match driver.current_content_height() {
        Ok(h) => h,
        Err(e) => {
            outcome.error = Some(Error::Capture {
                index: 1,
                message: e.to_string(),
            });
            return Ok(outcome);
        }
    };

    let mut next_index: u32 = 1;
    loop {
        if cancel.is_cancelled() {
            info!(
                "cancellation requested; stopping after {} tiles",
                outcome.tiles.len()
            );
            outcome.cancelled = true;
            break;
        }

        let planned = match planner.next(height) {
            Some(p) => p,
            None => break,
        };
        outcome.plan.push(planned);

        match capture_tile(driver, &geometry, planned, next_index, sink) {
            Ok((tile, settled_height)) => {
                outcome.tiles.push(tile);
                height = settled_height;
                next_index += 1;
            }
            Err(e) => {
                warn!("aborting page after {} tiles: {}", outcome.tiles.len(), e);
                outcome.error = Some(e);
                break;
            }
        }
    }

    Ok(outcome)
}

/// Scroll to one planned offset, settle, capture, and persist.
///
/// Returns the tile plus the content height observed after settling, which
/// feeds the planner's next decision.
fn capture_tile<D: ScrollDriver>(
    driver: &mut D,
    geometry: &Geometry,
    planned: PlannedOffset,
    index: u32,
    sink: &mut dyn PersistenceSink,
) -> Result<(Tile, u32)> {
    let fail = |e: Error| Error::Capture {
        index,
        message: e.to_string(),
    };

    let settled_height = driver.scroll_to(planned.offset).map_err(fail)?;

    // Drift between the height the planner decided on and the page state at
    // capture time is logged, never fatal
    let settled_bound = geometry.bounded_height(settled_height);
    if settled_bound != planned.bounded_height {
        debug!(
            "tile {}: planned against {} px but page settled at {} px",
            index, planned.bounded_height, settled_bound
        );
    }

    let image = driver.capture_viewport().map_err(fail)?;
    let tile = Tile {
        index,
        offset: planned.offset,
        image,
        captured_at: SystemTime::now(),
    };
    sink.tile_captured(&tile).map_err(fail)?;
    info!("captured tile {} at offset {}", index, planned.offset);

    Ok((tile, settled_height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ViewportSpec;
    use image::Rgba;

    /// Scripted driver: fixed-size solid tiles, a height sequence, and an
    /// optional capture failure
    struct FakeDriver {
        heights: Vec<u32>,
        measurements: usize,
        width: u32,
        height: u32,
        captures: u32,
        fail_capture_at: Option<u32>,
        scrolled_to: Vec<u32>,
    }

    impl FakeDriver {
        fn new(heights: &[u32], width: u32, height: u32) -> Self {
            Self {
                heights: heights.to_vec(),
                measurements: 0,
                width,
                height,
                captures: 0,
                fail_capture_at: None,
                scrolled_to: Vec::new(),
            }
        }

        fn measure(&mut self) -> u32 {
            let h = self.heights[self.measurements.min(self.heights.len() - 1)];
            self.measurements += 1;
            h
        }
    }

    impl ScrollDriver for FakeDriver {
        fn set_viewport(&mut self, _spec: &ViewportSpec) -> Result<()> {
            Ok(())
        }

        fn navigate(&mut self, _url: &str) -> Result<()> {
            Ok(())
        }

        fn scroll_to(&mut self, offset: u32) -> Result<u32> {
            self.scrolled_to.push(offset);
            Ok(self.measure())
        }

        fn capture_viewport(&mut self) -> Result<RgbaImage> {
            self.captures += 1;
            if self.fail_capture_at == Some(self.captures) {
                return Err(Error::Driver("screenshot failed".to_string()));
            }
            Ok(RgbaImage::from_pixel(
                self.width,
                self.height,
                Rgba([self.captures as u8, 0, 0, 255]),
            ))
        }

        fn current_content_height(&mut self) -> Result<u32> {
            Ok(self.measure())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        tiles: Vec<(u32, u32)>,
        fail_on_index: Option<u32>,
        cancel_after_first: Option<CancelToken>,
    }

    impl PersistenceSink for RecordingSink {
        fn tile_captured(&mut self, tile: &Tile) -> Result<()> {
            if self.fail_on_index == Some(tile.index) {
                return Err(Error::Io(std::io::Error::other("disk full")));
            }
            if let Some(token) = &self.cancel_after_first {
                token.cancel();
            }
            self.tiles.push((tile.index, tile.offset));
            Ok(())
        }

        fn stitched(
            &mut self,
            _image: &RgbaImage,
            _spec: &StitchSpec,
            _plan: &ScrollPlan,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            viewport: ViewportSpec {
                width: 4,
                height: 1000,
                scale: 1.0,
                mobile: false,
            },
            tile_overlap: 0,
            cap_height: None,
            ..Default::default()
        }
    }

    #[test]
    fn captures_every_planned_tile_in_order() {
        let mut driver = FakeDriver::new(&[3000], 4, 1000);
        let mut sink = RecordingSink::default();
        let outcome =
            capture_page(&mut driver, &config(), &mut sink, &CancelToken::new()).unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.tiles.len(), 3);
        assert_eq!(sink.tiles, vec![(1, 0), (2, 1000), (3, 2000)]);
        assert_eq!(driver.scrolled_to, vec![0, 1000, 2000]);
        assert_eq!(outcome.plan.len(), 3);
    }

    #[test]
    fn tile_indices_are_one_based_and_gap_free() {
        let mut driver = FakeDriver::new(&[5000], 4, 1000);
        let mut sink = RecordingSink::default();
        let outcome =
            capture_page(&mut driver, &config(), &mut sink, &CancelToken::new()).unwrap();

        let indices: Vec<u32> = outcome.tiles.iter().map(|t| t.index).collect();
        assert_eq!(indices, (1..=outcome.tiles.len() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn capture_failure_keeps_earlier_tiles() {
        let mut driver = FakeDriver::new(&[3000], 4, 1000);
        driver.fail_capture_at = Some(2);
        let mut sink = RecordingSink::default();
        let outcome =
            capture_page(&mut driver, &config(), &mut sink, &CancelToken::new()).unwrap();

        assert_eq!(outcome.tiles.len(), 1);
        assert!(matches!(
            outcome.error,
            Some(Error::Capture { index: 2, .. })
        ));
        // The failed decision is still on record
        assert_eq!(outcome.plan.len(), 2);
    }

    #[test]
    fn sink_failure_aborts_the_page() {
        let mut driver = FakeDriver::new(&[3000], 4, 1000);
        let mut sink = RecordingSink {
            fail_on_index: Some(2),
            ..Default::default()
        };
        let outcome =
            capture_page(&mut driver, &config(), &mut sink, &CancelToken::new()).unwrap();

        assert_eq!(outcome.tiles.len(), 1);
        assert!(matches!(
            outcome.error,
            Some(Error::Capture { index: 2, .. })
        ));
    }

    #[test]
    fn cancellation_is_observed_between_tiles() {
        let mut driver = FakeDriver::new(&[5000], 4, 1000);
        let token = CancelToken::new();
        let mut sink = RecordingSink {
            cancel_after_first: Some(token.clone()),
            ..Default::default()
        };
        let outcome = capture_page(&mut driver, &config(), &mut sink, &token).unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.tiles.len(), 1);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn pre_cancelled_token_captures_nothing() {
        let mut driver = FakeDriver::new(&[5000], 4, 1000);
        let token = CancelToken::new();
        token.cancel();
        let mut sink = RecordingSink::default();
        let outcome = capture_page(&mut driver, &config(), &mut sink, &token).unwrap();

        assert!(outcome.cancelled);
        assert!(outcome.tiles.is_empty());
        assert!(driver.scrolled_to.is_empty());
    }

    #[test]
    fn invalid_config_never_touches_the_driver() {
        let mut driver = FakeDriver::new(&[5000], 4, 1000);
        let mut sink = RecordingSink::default();
        let bad = SessionConfig {
            tile_overlap: 1000,
            ..config()
        };
        let result = capture_page(&mut driver, &bad, &mut sink, &CancelToken::new());

        assert!(matches!(result, Err(Error::Configuration(_))));
        assert!(driver.scrolled_to.is_empty());
        assert_eq!(driver.measurements, 0);
    }
}
