//! Scroll/tile planning: capture offsets, termination, and height re-checks
//!
//! The planner is the one place that decides how many tiles a page needs and
//! where each one starts. It is deliberately pull-based: the live page height
//! is only observable after a scroll settles, so the planner asks for a fresh
//! measurement before every decision instead of being pushed updates. Tests
//! inject a scripted [`HeightOracle`] instead of a browser.

use log::warn;
use serde::Serialize;

use crate::error::Result;
use crate::geometry::Geometry;

/// Consecutive growth observations tolerated before the planner gives up on
/// the page ever stabilizing and freezes the bound it has.
const MAX_GROWTH_CHECKS: u32 = 25;

/// A pull-based source of the page's current scrollable content height
///
/// Production code wraps the browser driver; tests script a height sequence.
pub trait HeightOracle {
    /// Measure the current content height in pixels
    fn content_height(&mut self) -> Result<u32>;
}

/// One planned capture: a scroll offset plus the bounded content height the
/// planner saw when it made the decision
///
/// The orchestrator compares the recorded height against the page state it
/// actually observes at capture time and logs drift; capture proceeds either
/// way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlannedOffset {
    /// Vertical scroll offset in pixels
    pub offset: u32,
    /// Content height (after the cap) at decision time
    pub bounded_height: u32,
}

/// The ordered sequence of planned captures for one page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScrollPlan {
    pub offsets: Vec<PlannedOffset>,
}

impl ScrollPlan {
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// The last planned scroll offset, if any tile was planned
    pub fn final_offset(&self) -> Option<u32> {
        self.offsets.last().map(|p| p.offset)
    }

    pub fn push(&mut self, planned: PlannedOffset) {
        self.offsets.push(planned);
    }
}

/// Incremental planner: one decision per measured height
///
/// Offsets start at 0 and advance by the geometry's effective step while a
/// full viewport still fits above the bounded bottom. The final offset is
/// clamped so the last tile ends exactly at the bounded bottom, which keeps
/// blank space out of the capture even though it shortens the last step.
///
/// Height measurements feed [`next`] once per decision. The first measurement
/// that shows no growth over the previous one freezes the bound for the rest
/// of the plan (shrinkage counts as stable); a page that keeps growing past
/// the re-check budget is logged and frozen at its last bound rather than
/// treated as fatal.
///
/// [`next`]: ScrollPlanner::next
#[derive(Debug)]
pub struct ScrollPlanner {
    geometry: Geometry,
    max_tiles: u32,
    planned: u32,
    last_offset: Option<u32>,
    last_bound: Option<u32>,
    frozen_bound: Option<u32>,
    growth_checks: u32,
    done: bool,
}

impl ScrollPlanner {
    pub fn new(geometry: Geometry, max_tiles: u32) -> Self {
        Self {
            geometry,
            max_tiles,
            planned: 0,
            last_offset: None,
            last_bound: None,
            frozen_bound: None,
            growth_checks: 0,
            done: false,
        }
    }

    /// Decide the next capture offset given a fresh height measurement, or
    /// `None` when the page is fully planned.
    ///
    /// The first call always plans offset 0, even for pages shorter than the
    /// viewport.
    pub fn next(&mut self, measured_height: u32) -> Option<PlannedOffset> {
        if self.done {
            return None;
        }

        let bound = self.observe(measured_height);
        let viewport = self.geometry.viewport_height();

        let offset = match self.last_offset {
            // First tile captures the top of the page
            None => 0,
            Some(prev) => {
                if prev.saturating_add(viewport) >= bound {
                    // Previous tile already reached the bounded bottom
                    self.done = true;
                    return None;
                }
                let candidate = prev.saturating_add(self.geometry.effective_step());
                if candidate.saturating_add(viewport) < bound {
                    candidate
                } else {
                    // Clamp the final tile so it ends exactly at the bounded
                    // bottom. prev + viewport < bound here, so this neither
                    // underflows nor moves backwards past prev.
                    let clamped = bound - viewport;
                    if clamped <= prev {
                        self.done = true;
                        return None;
                    }
                    clamped
                }
            }
        };

        // Only trip the guard when another tile would actually be planned,
        // so a plan that finishes exactly at the limit stays silent
        if self.planned >= self.max_tiles {
            warn!(
                "reached max tiles limit ({}); capture may be incomplete",
                self.max_tiles
            );
            self.done = true;
            return None;
        }

        self.last_offset = Some(offset);
        self.planned += 1;
        Some(PlannedOffset {
            offset,
            bounded_height: bound,
        })
    }

    /// Fold a height measurement into the stabilization state and return the
    /// bound to plan against.
    fn observe(&mut self, measured: u32) -> u32 {
        if let Some(frozen) = self.frozen_bound {
            return frozen;
        }

        let bound = self.geometry.bounded_height(measured);
        match self.last_bound {
            None => {
                self.last_bound = Some(bound);
                bound
            }
            Some(prev) if bound <= prev => {
                // No growth: the height has stabilized, stop re-checking
                self.frozen_bound = Some(bound);
                bound
            }
            Some(_) => {
                self.growth_checks += 1;
                if self.growth_checks >= MAX_GROWTH_CHECKS {
                    warn!(
                        "content height did not stabilize after {} re-checks; \
                         proceeding with last measured bound of {} px",
                        self.growth_checks, bound
                    );
                    self.frozen_bound = Some(bound);
                }
                self.last_bound = Some(bound);
                bound
            }
        }
    }

    /// Run a planner to completion against a height oracle.
    ///
    /// With a fixed oracle this is deterministic: identical inputs always
    /// produce the identical offset sequence.
    pub fn plan<O: HeightOracle>(
        geometry: Geometry,
        max_tiles: u32,
        oracle: &mut O,
    ) -> Result<ScrollPlan> {
        let mut planner = Self::new(geometry, max_tiles);
        let mut plan = ScrollPlan::default();
        loop {
            let measured = oracle.content_height()?;
            match planner.next(measured) {
                Some(p) => plan.push(p),
                None => break,
            }
        }
        Ok(plan)
    }
}
