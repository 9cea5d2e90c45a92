//! Shared test fixtures: a scripted scroll driver standing in for a browser

use image::{Rgba, RgbaImage};
use scrollsnap::error::{Error, Result};
use scrollsnap::{ScrollDriver, ViewportSpec};

/// Renders a synthetic "page" whose every row encodes its absolute vertical
/// position, so stitched output can be checked against the page itself.
/// Heights are scripted like a live page's lazy loading; the last entry
/// repeats forever.
pub struct FakeDriver {
    heights: Vec<u32>,
    measurements: usize,
    width: u32,
    height: u32,
    offset: u32,
    captures: u32,
    pub fail_capture_at: Option<u32>,
}

impl FakeDriver {
    pub fn new(heights: &[u32], width: u32, height: u32) -> Self {
        Self {
            heights: heights.to_vec(),
            measurements: 0,
            width,
            height,
            offset: 0,
            captures: 0,
            fail_capture_at: None,
        }
    }

    fn measure(&mut self) -> u32 {
        let h = self.heights[self.measurements.min(self.heights.len() - 1)];
        self.measurements += 1;
        h
    }

    /// The pixel the synthetic page shows at an absolute row
    pub fn page_pixel(row: u32) -> Rgba<u8> {
        Rgba([(row % 256) as u8, ((row / 256) % 256) as u8, 0, 255])
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
        self.offset = offset;
        Ok(self.measure())
    }

    fn capture_viewport(&mut self) -> Result<RgbaImage> {
        self.captures += 1;
        if self.fail_capture_at == Some(self.captures) {
            return Err(Error::Driver("screenshot failed".to_string()));
        }
        let offset = self.offset;
        Ok(RgbaImage::from_fn(self.width, self.height, move |_, y| {
            Self::page_pixel(offset + y)
        }))
    }

    fn current_content_height(&mut self) -> Result<u32> {
        Ok(self.measure())
    }
}
