//! Roster photo enhancement: denoise, luma CLAHE, unsharp mask.
//!
//! Reference photos come from arbitrary cameras and phones. A fixed filter
//! chain evens out contrast before the photo is embedded.

use crate::config::EnhanceConfig;
use image::{imageops, RgbImage};

const CLAHE_TILES: u32 = 8;
const UNSHARP_SIGMA: f32 = 2.0;
const UNSHARP_AMOUNT: f32 = 1.5;

/// Run the configured filter chain over a photo. Disabled → unchanged copy.
pub fn enhance_photo(photo: &RgbImage, config: &EnhanceConfig) -> RgbImage {
    if !config.enabled {
        return photo.clone();
    }

    let mut img = if config.denoise_strength > 0 {
        imageops::blur(photo, 0.1 * config.denoise_strength as f32)
    } else {
        photo.clone()
    };

    equalize_luma(&mut img, config.clahe_clip_limit);
    unsharp_mask(&img)
}

/// BT.601 luma.
fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

/// CLAHE on the luma channel; colour is kept by scaling RGB with the luma gain.
fn equalize_luma(img: &mut RgbImage, clip_limit: f32) {
    let (w, h) = img.dimensions();
    let original: Vec<u8> = img
        .pixels()
        .map(|p| luma(p[0], p[1], p[2]).round().clamp(0.0, 255.0) as u8)
        .collect();

    let mut equalized = original.clone();
    // Clip limit is given per uniform bin height; the tile histogram works in
    // fractions of the tile area.
    clahe_enhance(&mut equalized, w, h, CLAHE_TILES, clip_limit / 256.0);

    for (pixel, (&before, &after)) in img.pixels_mut().zip(original.iter().zip(equalized.iter())) {
        if before == 0 {
            pixel.0 = [after; 3];
            continue;
        }
        let gain = after as f32 / before as f32;
        for c in pixel.0.iter_mut() {
            *c = (*c as f32 * gain).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// `amount·img − (amount − 1)·gaussian(img)`.
fn unsharp_mask(img: &RgbImage) -> RgbImage {
    let blurred = imageops::blur(img, UNSHARP_SIGMA);
    let mut out = img.clone();
    for (dst, soft) in out.pixels_mut().zip(blurred.pixels()) {
        for (c, s) in dst.0.iter_mut().zip(soft.0.iter()) {
            let v = UNSHARP_AMOUNT * *c as f32 - (UNSHARP_AMOUNT - 1.0) * *s as f32;
            *c = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Contrast-limited adaptive histogram equalization over a `tiles`×`tiles`
/// grid, in place, with bilinear blending between neighbouring tile maps.
///
/// `clip_limit` is a fraction of the tile area; the per-bin clip never drops
/// below one count, so tiny tiles and small limits still equalize. A tile
/// holding a single grey level maps through the identity instead of being
/// stretched, which keeps flat photo backgrounds at their original level.
/// `tiles == 0` or a tile smaller than one pixel leaves the buffer untouched.
pub fn clahe_enhance(gray: &mut [u8], width: u32, height: u32, tiles: u32, clip_limit: f32) {
    let w = width as usize;
    let h = height as usize;
    if w == 0 || h == 0 || tiles == 0 || gray.len() < w * h {
        return;
    }

    let t = tiles as usize;
    let tile_w = w / t;
    let tile_h = h / t;
    if tile_w == 0 || tile_h == 0 {
        return;
    }
    let tile_pixels = tile_w * tile_h;

    let mut cdfs: Vec<[f32; 256]> = Vec::with_capacity(t * t);
    for row in 0..t {
        for col in 0..t {
            let mut hist = [0u32; 256];
            let (y0, x0) = (row * tile_h, col * tile_w);
            for y in y0..y0 + tile_h {
                for x in x0..x0 + tile_w {
                    hist[gray[y * w + x] as usize] += 1;
                }
            }

            cdfs.push(tile_mapping(hist, tile_pixels, clip_limit));
        }
    }

    for y in 0..h {
        for x in 0..w {
            let pixel = gray[y * w + x] as usize;

            let fy = ((y as f32 / tile_h as f32) - 0.5).clamp(0.0, (t - 1) as f32);
            let fx = ((x as f32 / tile_w as f32) - 0.5).clamp(0.0, (t - 1) as f32);

            let r0 = fy as usize;
            let c0 = fx as usize;
            let r1 = (r0 + 1).min(t - 1);
            let c1 = (c0 + 1).min(t - 1);
            let dy = fy - r0 as f32;
            let dx = fx - c0 as f32;

            let top = cdfs[r0 * t + c0][pixel] * (1.0 - dx) + cdfs[r0 * t + c1][pixel] * dx;
            let bot = cdfs[r1 * t + c0][pixel] * (1.0 - dx) + cdfs[r1 * t + c1][pixel] * dx;
            let val = top * (1.0 - dy) + bot * dy;

            gray[y * w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Clipped, redistributed and normalized CDF of one tile histogram.
fn tile_mapping(mut hist: [u32; 256], tile_pixels: usize, clip_limit: f32) -> [f32; 256] {
    let clip = ((clip_limit * tile_pixels as f32) as u32).max(1);
    let excess: u32 = hist.iter().map(|&bin| bin.saturating_sub(clip)).sum();
    let (share, leftover) = (excess / 256, (excess % 256) as usize);
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin = (*bin).min(clip) + share + u32::from(i < leftover);
    }

    let mut mapping = [0f32; 256];
    let mut running = 0f32;
    for (slot, &count) in mapping.iter_mut().zip(hist.iter()) {
        running += count as f32;
        *slot = running;
    }

    let first = mapping.iter().copied().find(|&v| v > 0.0).unwrap_or(0.0);
    let span = tile_pixels as f32 - first;
    if span <= 0.0 {
        for (i, v) in mapping.iter_mut().enumerate() {
            *v = i as f32;
        }
        return mapping;
    }
    for v in mapping.iter_mut() {
        *v = ((*v - first) / span * 255.0).clamp(0.0, 255.0);
    }
    mapping
}
