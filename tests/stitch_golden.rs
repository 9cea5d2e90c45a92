//! Golden stitch geometry: contribution accounting across tile counts

use std::time::SystemTime;

use image::{Rgba, RgbaImage};
use scrollsnap::{stitch, Error, StitchSpec, Tile};

fn solid_tile(index: u32, width: u32, height: u32) -> Tile {
    Tile {
        index,
        offset: (index - 1) * height,
        image: RgbaImage::from_pixel(width, height, Rgba([index as u8, 7, 7, 255])),
        captured_at: SystemTime::now(),
    }
}

fn tiles(n: u32, width: u32, height: u32) -> Vec<Tile> {
    (1..=n).map(|i| solid_tile(i, width, height)).collect()
}

/// H + (N-2)*(H-t-b) + (H-t) for N >= 2, H for N == 1
fn expected_height(n: u32, h: u32, t: u32, b: u32) -> u32 {
    if n == 1 {
        h
    } else {
        h + (n - 2) * (h - t - b) + (h - t)
    }
}

#[test]
fn stitched_height_follows_the_contribution_formula() {
    let spec = StitchSpec {
        overlap: 80,
        sticky_top: 80,
        sticky_bottom: 80,
    };
    for n in [1_u32, 2, 3, 5, 10] {
        let out = stitch(&tiles(n, 4, 1000), &spec).unwrap();
        assert_eq!(
            out.height(),
            expected_height(n, 1000, 80, 80),
            "wrong stitched height for {} tiles",
            n
        );
    }
    // The worked example: 1000 + 840 + 920
    assert_eq!(expected_height(3, 1000, 80, 80), 2760);
}

#[test]
fn single_tile_output_is_byte_identical_to_the_tile() {
    let tile = solid_tile(1, 16, 400);
    let spec = StitchSpec {
        overlap: 80,
        sticky_top: 120,
        sticky_bottom: 90,
    };
    let out = stitch(std::slice::from_ref(&tile), &spec).unwrap();
    assert_eq!(out.as_raw(), tile.image.as_raw());
}

#[test]
fn degenerate_middle_crop_raises_instead_of_clamping() {
    let spec = StitchSpec {
        overlap: 80,
        sticky_top: 500,
        sticky_bottom: 600,
    };
    let err = stitch(&tiles(3, 4, 1000), &spec).unwrap_err();
    assert!(matches!(err, Error::Stitch(_)));

    // Two tiles have no middle, so the same crops are fine for the pair
    let out = stitch(&tiles(2, 4, 1000), &spec).unwrap();
    assert_eq!(out.height(), 1000 + 500);
}

#[test]
fn seams_sit_exactly_where_the_crops_say() {
    let spec = StitchSpec {
        overlap: 80,
        sticky_top: 80,
        sticky_bottom: 80,
    };
    let out = stitch(&tiles(3, 4, 1000), &spec).unwrap();

    // Tile 1 occupies rows 0..1000, tile 2 rows 1000..1840, tile 3 the rest
    assert_eq!(out.get_pixel(0, 999).0[0], 1);
    assert_eq!(out.get_pixel(0, 1000).0[0], 2);
    assert_eq!(out.get_pixel(0, 1839).0[0], 2);
    assert_eq!(out.get_pixel(0, 1840).0[0], 3);
    assert_eq!(out.get_pixel(0, 2759).0[0], 3);
}
