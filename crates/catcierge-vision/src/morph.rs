//! Binary morphology with rectangular kernels.
//!
//! The prey pipeline uses 2x2, 3x3 and 5x1 structuring elements anchored
//! at the top-left corner. imageproc's distance-based morphology only
//! expresses odd square kernels, so the handful of operations needed here
//! are written out directly over binary images.

use image::{GrayImage, Luma};

fn morph_pass(img: &GrayImage, kw: u32, kh: u32, take_max: bool) -> GrayImage {
    let (w, h) = img.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let mut acc: Option<u8> = None;
        for dy in 0..kh {
            for dx in 0..kw {
                let sx = x + dx;
                let sy = y + dy;
                if sx >= w || sy >= h {
                    continue;
                }
                let v = img.get_pixel(sx, sy).0[0];
                acc = Some(match acc {
                    None => v,
                    Some(a) if take_max => a.max(v),
                    Some(a) => a.min(v),
                });
            }
        }
        Luma([acc.unwrap_or(0)])
    })
}

/// Dilate with a `kw` x `kh` kernel anchored at (0, 0).
pub fn dilate(img: &GrayImage, kw: u32, kh: u32, iterations: u32) -> GrayImage {
    let mut out = img.clone();
    for _ in 0..iterations {
        out = morph_pass(&out, kw, kh, true);
    }
    out
}

/// Erode with a `kw` x `kh` kernel anchored at (0, 0).
pub fn erode(img: &GrayImage, kw: u32, kh: u32, iterations: u32) -> GrayImage {
    let mut out = img.clone();
    for _ in 0..iterations {
        out = morph_pass(&out, kw, kh, false);
    }
    out
}

/// Morphological opening: `iterations` erosions then as many dilations.
pub fn open(img: &GrayImage, kw: u32, kh: u32, iterations: u32) -> GrayImage {
    dilate(&erode(img, kw, kh, iterations), kw, kh, iterations)
}

/// Pixel-wise saturating combine of two binary images.
pub fn combine_max(a: &GrayImage, b: &GrayImage) -> GrayImage {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        Luma([a.get_pixel(x, y).0[0].max(b.get_pixel(x, y).0[0])])
    })
}

/// Invert a binary image in place.
pub fn invert(img: &mut GrayImage) {
    image::imageops::invert(img);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn img_from(rows: &[&[u8]]) -> GrayImage {
        let h = rows.len() as u32;
        let w = rows[0].len() as u32;
        GrayImage::from_fn(w, h, |x, y| Luma([rows[y as usize][x as usize]]))
    }

    #[test]
    fn test_dilate_grows_blob() {
        let img = img_from(&[
            &[0, 0, 0, 0],
            &[0, 255, 0, 0],
            &[0, 0, 0, 0],
            &[0, 0, 0, 0],
        ]);
        let out = dilate(&img, 2, 2, 1);
        // Anchor (0,0): output white where the kernel footprint covers
        // the white pixel.
        assert_eq!(out.get_pixel(0, 0).0[0], 255);
        assert_eq!(out.get_pixel(1, 1).0[0], 255);
        assert_eq!(out.get_pixel(0, 1).0[0], 255);
        assert_eq!(out.get_pixel(2, 2).0[0], 0);
    }

    #[test]
    fn test_erode_removes_speck() {
        let img = img_from(&[
            &[0, 0, 0, 0],
            &[0, 255, 0, 0],
            &[0, 0, 0, 0],
            &[0, 0, 0, 0],
        ]);
        let out = erode(&img, 2, 2, 1);
        assert!(out.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_open_removes_noise_keeps_block() {
        let mut img = GrayImage::new(12, 12);
        // A 4x4 solid block...
        for y in 2..6 {
            for x in 2..6 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        // ...and an isolated speck.
        img.put_pixel(10, 10, Luma([255]));

        let out = open(&img, 2, 2, 1);
        assert_eq!(out.get_pixel(3, 3).0[0], 255);
        assert_eq!(out.get_pixel(10, 10).0[0], 0);
    }

    #[test]
    fn test_combine_max() {
        let a = img_from(&[&[0, 255], &[0, 0]]);
        let b = img_from(&[&[0, 0], &[255, 0]]);
        let out = combine_max(&a, &b);
        assert_eq!(out.get_pixel(1, 0).0[0], 255);
        assert_eq!(out.get_pixel(0, 1).0[0], 255);
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
    }
}
