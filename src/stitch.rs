//! Composes an ordered tile sequence into one long image
//!
//! Overlap removal is purely geometric: fixed crop bands are taken off tile
//! edges, independent of pixel content. The first tile keeps its full height
//! (nothing above it to deduplicate), middle tiles lose `sticky_top` rows at
//! the top and `sticky_bottom` rows at the bottom, and the last tile loses
//! only its top band since the planner already aligned its bottom edge to the
//! true page end.

use image::{imageops, RgbaImage};
use serde::Serialize;

use crate::capture::Tile;
use crate::error::{Error, Result};

/// Crop parameters applied at stitch time
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StitchSpec {
    /// Overlap height used during planning, recorded alongside the output
    pub overlap: u32,
    /// Pixels removed from the top of tiles 2..N
    pub sticky_top: u32,
    /// Pixels removed from the bottom of tiles 2..N-1
    pub sticky_bottom: u32,
}

/// The vertical band a tile contributes to the stitched image
#[derive(Debug, Clone, Copy)]
struct Contribution {
    top: u32,
    height: u32,
}

/// Work out every tile's contribution band, rejecting degenerate inputs
/// before any pixel work happens.
fn contributions(tiles: &[Tile], spec: &StitchSpec) -> Result<Vec<Contribution>> {
    let last = tiles.len() - 1;
    tiles
        .iter()
        .enumerate()
        .map(|(i, tile)| {
            let height = tile.image.height();
            // A single tile is copied verbatim; crops only ever apply to a
            // shared edge
            let top = if i == 0 { 0 } else { spec.sticky_top };
            let bottom = if i == 0 || i == last { 0 } else { spec.sticky_bottom };
            if u64::from(top) + u64::from(bottom) >= u64::from(height) {
                return Err(Error::Stitch(format!(
                    "crop bands ({} top, {} bottom) leave tile {} with no content (height {})",
                    top, bottom, tile.index, height
                )));
            }
            Ok(Contribution {
                top,
                height: height - top - bottom,
            })
        })
        .collect()
}

/// Stitch an ordered tile sequence into one image.
///
/// Tiles are written top-to-bottom in index order, each starting immediately
/// below the previous tile's contribution. Fails on an empty sequence,
/// mismatched tile widths, or crop bands that leave a tile with zero or
/// negative height; a failure here never touches the persisted tiles.
pub fn stitch(tiles: &[Tile], spec: &StitchSpec) -> Result<RgbaImage> {
    let first = tiles
        .first()
        .ok_or_else(|| Error::Stitch("no tiles to compose".to_string()))?;

    let width = first.image.width();
    for tile in tiles {
        if tile.image.width() != width {
            return Err(Error::Stitch(format!(
                "tile {} is {} px wide but tile {} is {} px; the viewport is fixed per session",
                first.index,
                width,
                tile.index,
                tile.image.width()
            )));
        }
    }

    let bands = contributions(tiles, spec)?;
    let total_height: u64 = bands.iter().map(|b| u64::from(b.height)).sum();
    let total_height = u32::try_from(total_height)
        .map_err(|_| Error::Stitch(format!("stitched height {} exceeds image limits", total_height)))?;

    let mut canvas = RgbaImage::new(width, total_height);
    let mut y = 0_i64;
    for (tile, band) in tiles.iter().zip(&bands) {
        let cropped = imageops::crop_imm(&tile.image, 0, band.top, width, band.height).to_image();
        imageops::replace(&mut canvas, &cropped, 0, y);
        y += i64::from(band.height);
    }

    Ok(canvas)
}
