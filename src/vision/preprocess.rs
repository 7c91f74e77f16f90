//! Image preprocessing for rule detection
//!
//! Turns a table photo into a binary image where rule lines and text strokes
//! are white (255) on black. Local operations are used throughout so uneven
//! lighting across the photo does not break line continuity.

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::filter::{gaussian_blur_f32, median_filter};
use imageproc::rect::Rect;
use tracing::debug;

use crate::config::PreprocessSettings;

/// Intermediate images produced by preprocessing
pub struct PreparedImage {
    /// Source image with the closing border drawn in
    pub color: RgbImage,
    /// Grayscale of `color`, used for cell crops
    pub gray: GrayImage,
    /// Binarized, inverted image (foreground = 255)
    pub binary: GrayImage,
}

/// Run the full preprocessing chain on a decoded image
pub fn prepare(image: &DynamicImage, settings: &PreprocessSettings) -> PreparedImage {
    let mut color = image.to_rgb8();
    draw_border(&mut color, settings.border_thickness);

    let gray = image::imageops::grayscale(&color);
    let binary = binarize(&gray, settings);

    debug!(
        "Preprocessed {}x{} image ({} foreground pixels)",
        gray.width(),
        gray.height(),
        binary.pixels().filter(|p| p.0[0] > 0).count()
    );

    PreparedImage {
        color,
        gray,
        binary,
    }
}

/// Smooth, sharpen, equalize and threshold a grayscale image
pub fn binarize(gray: &GrayImage, settings: &PreprocessSettings) -> GrayImage {
    let blurred = if settings.blur_sigma > 0.0 {
        gaussian_blur_f32(gray, settings.blur_sigma)
    } else {
        gray.clone()
    };
    let denoised = if settings.denoise_radius > 0 {
        median_filter(&blurred, settings.denoise_radius, settings.denoise_radius)
    } else {
        blurred
    };
    let sharpened = unsharp(gray, &denoised, settings.sharpen_amount);
    let equalized = clahe(&sharpened, settings.clahe_clip_limit, settings.clahe_tile_grid);

    adaptive_mean_threshold_inv(
        &equalized,
        settings.threshold_block_size,
        settings.threshold_offset,
    )
}

/// Draw a black frame along the image margin so tables cut off by the photo
/// edge still form closed cells
pub fn draw_border(image: &mut RgbImage, thickness: u32) {
    let (width, height) = image.dimensions();
    for i in 0..thickness {
        if width <= 2 * i || height <= 2 * i {
            break;
        }
        let rect = Rect::at(i as i32, i as i32).of_size(width - 2 * i, height - 2 * i);
        draw_hollow_rect_mut(image, rect, Rgb([0, 0, 0]));
    }
}

/// `original * (1 + amount) - smoothed * amount`, saturated to u8
fn unsharp(original: &GrayImage, smoothed: &GrayImage, amount: f32) -> GrayImage {
    let mut result = GrayImage::new(original.width(), original.height());
    for ((out, src), soft) in result
        .pixels_mut()
        .zip(original.pixels())
        .zip(smoothed.pixels())
    {
        let value = src.0[0] as f32 * (1.0 + amount) - soft.0[0] as f32 * amount;
        *out = Luma([value.round().clamp(0.0, 255.0) as u8]);
    }
    result
}

/// Contrast limited adaptive histogram equalization.
///
/// Each of the `grid x grid` tiles gets its own clipped histogram mapping;
/// pixels are mapped through a bilinear blend of the four nearest tiles.
pub fn clahe(image: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let grid_x = grid.clamp(1, width) as usize;
    let grid_y = grid.clamp(1, height) as usize;
    let w = width as usize;
    let h = height as usize;

    let tile_bounds = |index: usize, count: usize, len: usize| {
        (index * len / count, (index + 1) * len / count)
    };

    let mut luts = vec![[0u8; 256]; grid_x * grid_y];
    for ty in 0..grid_y {
        let (y0, y1) = tile_bounds(ty, grid_y, h);
        for tx in 0..grid_x {
            let (x0, x1) = tile_bounds(tx, grid_x, w);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[image.get_pixel(x as u32, y as u32).0[0] as usize] += 1;
                }
            }

            let area = ((x1 - x0) * (y1 - y0)) as u32;
            clip_histogram(&mut hist, clip_limit, area);
            luts[ty * grid_x + tx] = histogram_lut(&hist, area);
        }
    }

    let tile_w = w as f32 / grid_x as f32;
    let tile_h = h as f32 / grid_y as f32;
    let mut result = GrayImage::new(width, height);

    for y in 0..h {
        let fy = (y as f32 + 0.5) / tile_h - 0.5;
        let ty0 = (fy.floor().max(0.0) as usize).min(grid_y - 1);
        let ty1 = (ty0 + 1).min(grid_y - 1);
        let ay = (fy - ty0 as f32).clamp(0.0, 1.0);

        for x in 0..w {
            let fx = (x as f32 + 0.5) / tile_w - 0.5;
            let tx0 = (fx.floor().max(0.0) as usize).min(grid_x - 1);
            let tx1 = (tx0 + 1).min(grid_x - 1);
            let ax = (fx - tx0 as f32).clamp(0.0, 1.0);

            let v = image.get_pixel(x as u32, y as u32).0[0] as usize;
            let top = luts[ty0 * grid_x + tx0][v] as f32 * (1.0 - ax)
                + luts[ty0 * grid_x + tx1][v] as f32 * ax;
            let bottom = luts[ty1 * grid_x + tx0][v] as f32 * (1.0 - ax)
                + luts[ty1 * grid_x + tx1][v] as f32 * ax;
            let value = top * (1.0 - ay) + bottom * ay;

            result.put_pixel(x as u32, y as u32, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }

    result
}

/// Clip bins at `clip_limit * area / 256` and spread the excess evenly
fn clip_histogram(hist: &mut [u32; 256], clip_limit: f32, area: u32) {
    let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);

    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }

    let per_bin = excess / 256;
    let mut remainder = excess % 256;
    for bin in hist.iter_mut() {
        *bin += per_bin;
    }
    if remainder > 0 {
        let step = (256 / remainder).max(1) as usize;
        for bin in hist.iter_mut().step_by(step) {
            if remainder == 0 {
                break;
            }
            *bin += 1;
            remainder -= 1;
        }
    }
}

/// Cumulative distribution mapped to 0..=255
fn histogram_lut(hist: &[u32; 256], area: u32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if area == 0 {
        return lut;
    }
    let scale = 255.0 / area as f32;
    let mut cumulative = 0u32;
    for (value, count) in hist.iter().enumerate() {
        cumulative += count;
        lut[value] = (cumulative as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Inverted adaptive mean threshold.
///
/// A pixel becomes foreground (255) when it is at most `local_mean - offset`,
/// where the mean is taken over a `block_size` square clipped to the image.
pub fn adaptive_mean_threshold_inv(image: &GrayImage, block_size: u32, offset: i32) -> GrayImage {
    let (width, height) = image.dimensions();
    let w = width as usize;
    let h = height as usize;
    let radius = (block_size / 2) as usize;

    // Summed-area table with a zero row and column in front
    let stride = w + 1;
    let mut integral = vec![0u64; stride * (h + 1)];
    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += image.get_pixel(x as u32, y as u32).0[0] as u64;
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
        }
    }

    let mut result = GrayImage::new(width, height);
    for y in 0..h {
        let y0 = y.saturating_sub(radius);
        let y1 = (y + radius + 1).min(h);
        for x in 0..w {
            let x0 = x.saturating_sub(radius);
            let x1 = (x + radius + 1).min(w);

            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let count = ((x1 - x0) * (y1 - y0)) as f64;
            let mean = (sum as f64 / count).round() as i32;

            let value = image.get_pixel(x as u32, y as u32).0[0] as i32;
            if value <= mean - offset {
                result.put_pixel(x as u32, y as u32, Luma([255]));
            }
        }
    }

    result
}
