//! Pure scroll geometry: step size and bounded content height
//!
//! No side effects and no state; the planner layers termination logic on top
//! of these values.

use crate::error::{Error, Result};

/// The fixed geometry of a scroll problem
///
/// Derived once from the session configuration. The cap is fixed for the whole
/// session even though content height is re-measured while scrolling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    viewport_height: u32,
    overlap: u32,
    cap_height: Option<u32>,
}

impl Geometry {
    /// Build a geometry, rejecting an overlap that would prevent forward
    /// progress.
    ///
    /// An overlap at or above the viewport height would make the scroll step
    /// zero or negative and the capture loop would never terminate, so it is
    /// a configuration error rather than something to clamp around.
    pub fn new(viewport_height: u32, overlap: u32, cap_height: Option<u32>) -> Result<Self> {
        if viewport_height == 0 {
            return Err(Error::Configuration(
                "viewport height must be positive".to_string(),
            ));
        }
        if overlap >= viewport_height {
            return Err(Error::Configuration(format!(
                "overlap ({}) must be smaller than the viewport height ({})",
                overlap, viewport_height
            )));
        }
        Ok(Self {
            viewport_height,
            overlap,
            cap_height,
        })
    }

    /// Viewport height in pixels (the tile height baseline)
    pub fn viewport_height(&self) -> u32 {
        self.viewport_height
    }

    /// Overlap between consecutive tiles in pixels
    pub fn overlap(&self) -> u32 {
        self.overlap
    }

    /// How far each scroll advances: viewport height minus overlap, never
    /// below one pixel
    pub fn effective_step(&self) -> u32 {
        (self.viewport_height - self.overlap).max(1)
    }

    /// The measured content height clamped to the session cap, if one is set
    pub fn bounded_height(&self, measured_content_height: u32) -> u32 {
        match self.cap_height {
            Some(cap) => measured_content_height.min(cap),
            None => measured_content_height,
        }
    }
}
