//! Rule line and cell detection
//!
//! Isolates long horizontal and vertical runs in the binary image, merges them
//! into a structure mask and takes the bounding rectangle of every contour in
//! the mask's contour hierarchy as a candidate cell. Working from rule lines
//! instead of glyphs keeps detection independent of the cell contents.

use anyhow::{Context, Result};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::contours::{find_contours, Contour};
use imageproc::distance_transform::Norm;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::morphology::dilate;
use imageproc::rect::Rect;
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use crate::config::DetectionSettings;
use crate::table::BoundingBox;

/// Line direction for directional opening
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// Output of one detection pass
#[derive(Debug, Clone, Default)]
pub struct Detection {
    /// Candidate cells within the plausible size range
    pub cells: Vec<BoundingBox>,
    /// Horizontal rule segments found by the diagnostic pass
    pub horizontal_lines: usize,
    /// Vertical rule segments found by the diagnostic pass
    pub vertical_lines: usize,
    /// Contours in the structure mask before size filtering
    pub contours: usize,
}

/// Detects cell rectangles from a binarized table image
#[derive(Debug, Clone, Default)]
pub struct CellDetector {
    settings: DetectionSettings,
}

impl CellDetector {
    pub fn new(settings: DetectionSettings) -> Self {
        Self { settings }
    }

    /// Find candidate cells in a binary image (foreground = non-zero)
    pub fn detect(&self, binary: &GrayImage) -> Detection {
        let start = Instant::now();
        let s = &self.settings;

        // Low-iteration pass: line counts for diagnostics only. More
        // iterations close gaps reliably but also fuse thin double rules.
        let horizontal_lines = count_components(&open_lines(
            binary,
            Orientation::Horizontal,
            s.horizontal_kernel,
            s.count_iterations,
        ));
        let vertical_lines = count_components(&open_lines(
            binary,
            Orientation::Vertical,
            s.vertical_kernel,
            s.count_iterations,
        ));

        let mask = self.structure_mask(binary);
        let contours = find_contours::<u32>(&mask);
        let contour_count = contours.len();

        let cells: Vec<BoundingBox> = contours
            .iter()
            .filter_map(contour_bounds)
            .filter(|b| self.is_plausible(b))
            .collect();

        info!(
            "Detected {} candidate cells ({} horizontal / {} vertical lines, {} contours)",
            cells.len(),
            horizontal_lines,
            vertical_lines,
            contour_count
        );
        debug!("Cell detection took {:?}", start.elapsed());

        Detection {
            cells,
            horizontal_lines,
            vertical_lines,
            contours: contour_count,
        }
    }

    /// Horizontal and vertical rules merged and dilated
    pub fn structure_mask(&self, binary: &GrayImage) -> GrayImage {
        let s = &self.settings;
        let horizontal = open_lines(
            binary,
            Orientation::Horizontal,
            s.horizontal_kernel,
            s.mask_iterations,
        );
        let vertical = open_lines(
            binary,
            Orientation::Vertical,
            s.vertical_kernel,
            s.mask_iterations,
        );
        let combined = combine_masks(&horizontal, &vertical);

        if s.dilate_radius > 0 {
            dilate(&combined, Norm::LInf, s.dilate_radius)
        } else {
            combined
        }
    }

    /// Both sides strictly inside (min_dim, max_dim)
    fn is_plausible(&self, bbox: &BoundingBox) -> bool {
        let (min, max) = (self.settings.min_dim, self.settings.max_dim);
        bbox.width > min && bbox.width < max && bbox.height > min && bbox.height < max
    }
}

/// Morphological opening with a 1-pixel-thick line element.
///
/// Opening with a line of length `k` keeps exactly the foreground runs that
/// are at least `k` long. Repeating erosion and dilation `n` times behaves
/// like a single element of length `n * (k - 1) + 1`.
pub fn open_lines(
    binary: &GrayImage,
    orientation: Orientation,
    kernel: u32,
    iterations: u32,
) -> GrayImage {
    let (width, height) = binary.dimensions();
    let min_run = iterations.max(1) * kernel.saturating_sub(1) + 1;
    let mut out = GrayImage::new(width, height);

    let (lines, length) = match orientation {
        Orientation::Horizontal => (height, width),
        Orientation::Vertical => (width, height),
    };
    let coords = |line: u32, pos: u32| match orientation {
        Orientation::Horizontal => (pos, line),
        Orientation::Vertical => (line, pos),
    };

    for line in 0..lines {
        let mut run_start = None;
        // One extra step closes a run that reaches the image edge
        for pos in 0..=length {
            let on = pos < length && {
                let (x, y) = coords(line, pos);
                binary.get_pixel(x, y).0[0] > 0
            };
            match (on, run_start) {
                (true, None) => run_start = Some(pos),
                (false, Some(start)) => {
                    if pos - start >= min_run {
                        for p in start..pos {
                            let (x, y) = coords(line, p);
                            out.put_pixel(x, y, Luma([255]));
                        }
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
    }

    out
}

/// Saturating per-pixel sum of two masks
pub fn combine_masks(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let mut out = a.clone();
    for (dst, src) in out.pixels_mut().zip(b.pixels()) {
        dst.0[0] = dst.0[0].saturating_add(src.0[0]);
    }
    out
}

/// Number of 8-connected foreground regions.
///
/// Counted from region labels, not contour borders: the border stroke puts
/// foreground on the image origin, where outer/hole labels come out swapped.
pub fn count_components(mask: &GrayImage) -> usize {
    connected_components(mask, Connectivity::Eight, Luma([0u8]))
        .pixels()
        .map(|p| p.0[0])
        .filter(|&label| label > 0)
        .collect::<HashSet<u32>>()
        .len()
}

/// Axis-aligned bounding rectangle of a contour, inclusive of edge pixels
fn contour_bounds(contour: &Contour<u32>) -> Option<BoundingBox> {
    let first = contour.points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in &contour.points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some(BoundingBox::new(
        min_x,
        min_y,
        max_x - min_x + 1,
        max_y - min_y + 1,
    ))
}

/// Hook invoked with the final cell boxes of a run
pub trait DetectionObserver {
    fn cells_detected(&self, source: &str, image: &RgbImage, cells: &[BoundingBox]) -> Result<()>;
}

/// Writes `<source stem>_debug.jpg` with every cell outlined
#[derive(Debug, Clone)]
pub struct DebugImageWriter {
    directory: PathBuf,
}

impl DebugImageWriter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Target path for a given input name
    pub fn image_path(&self, source: &str) -> PathBuf {
        let stem = Path::new(source)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image");
        self.directory.join(format!("{}_debug.jpg", stem))
    }
}

impl DetectionObserver for DebugImageWriter {
    fn cells_detected(&self, source: &str, image: &RgbImage, cells: &[BoundingBox]) -> Result<()> {
        std::fs::create_dir_all(&self.directory)
            .with_context(|| format!("Failed to create debug directory {:?}", self.directory))?;

        let annotated = annotate_cells(image, cells);
        let path = self.image_path(source);
        annotated
            .save(&path)
            .with_context(|| format!("Failed to write debug image {:?}", path))?;

        debug!("Wrote debug image with {} cells to {:?}", cells.len(), path);
        Ok(())
    }
}

/// Copy of `image` with a 1px green outline around each cell
pub fn annotate_cells(image: &RgbImage, cells: &[BoundingBox]) -> RgbImage {
    let mut annotated = image.clone();
    for cell in cells.iter().filter(|c| !c.is_empty()) {
        let rect = Rect::at(cell.x as i32, cell.y as i32).of_size(cell.width, cell.height);
        draw_hollow_rect_mut(&mut annotated, rect, Rgb([0, 255, 0]));
    }
    annotated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreprocessSettings;
    use crate::vision::preprocess::prepare;
    use image::DynamicImage;
    use imageproc::drawing::draw_filled_rect_mut;
    use tempfile::TempDir;

    /// Binary grid: `rows x cols` cells of `cell` px with 2px rules
    fn grid_mask(rows: u32, cols: u32, cell: u32) -> GrayImage {
        let rule = 2;
        let width = cols * cell + rule;
        let height = rows * cell + rule;
        let mut img = GrayImage::new(width + 20, height + 20);
        for r in 0..=rows {
            draw_filled_rect_mut(
                &mut img,
                Rect::at(10, (10 + r * cell) as i32).of_size(width, rule),
                Luma([255]),
            );
        }
        for c in 0..=cols {
            draw_filled_rect_mut(
                &mut img,
                Rect::at((10 + c * cell) as i32, 10).of_size(rule, height),
                Luma([255]),
            );
        }
        img
    }

    /// Photo-like 3x3 table: 120x80 cells, 3px black rules on a 40px white margin
    fn ruled_page() -> RgbImage {
        let (cols, rows, cw, ch, rule, margin) = (3u32, 3u32, 120u32, 80u32, 3u32, 40u32);
        let width = cols * cw + rule;
        let height = rows * ch + rule;
        let white = Rgb([255, 255, 255]);
        let mut img = RgbImage::from_pixel(width + 2 * margin, height + 2 * margin, white);
        for r in 0..=rows {
            let rect = Rect::at(margin as i32, (margin + r * ch) as i32).of_size(width, rule);
            draw_filled_rect_mut(&mut img, rect, Rgb([0, 0, 0]));
        }
        for c in 0..=cols {
            let rect = Rect::at((margin + c * cw) as i32, margin as i32).of_size(rule, height);
            draw_filled_rect_mut(&mut img, rect, Rgb([0, 0, 0]));
        }
        img
    }

    fn small_settings() -> DetectionSettings {
        DetectionSettings {
            horizontal_kernel: 40,
            vertical_kernel: 40,
            ..DetectionSettings::default()
        }
    }

    #[test]
    fn test_open_lines_keeps_long_runs_only() {
        let mut img = GrayImage::new(100, 10);
        for x in 0..80 {
            img.put_pixel(x, 2, Luma([255]));
        }
        for x in 0..30 {
            img.put_pixel(x, 6, Luma([255]));
        }

        let opened = open_lines(&img, Orientation::Horizontal, 40, 1);
        assert_eq!(opened.get_pixel(50, 2).0[0], 255);
        assert_eq!(opened.get_pixel(10, 6).0[0], 0);

        // two iterations need runs of 2 * 39 + 1 = 79
        let opened = open_lines(&img, Orientation::Horizontal, 40, 2);
        assert_eq!(opened.get_pixel(50, 2).0[0], 255);
        let opened = open_lines(&img, Orientation::Horizontal, 41, 2);
        assert_eq!(opened.get_pixel(50, 2).0[0], 0);
    }

    #[test]
    fn test_open_lines_vertical_ignores_text_strokes() {
        let mut img = GrayImage::new(20, 120);
        for y in 0..110 {
            img.put_pixel(3, y, Luma([255]));
        }
        // a short glyph-like stroke
        for y in 50..62 {
            img.put_pixel(12, y, Luma([255]));
        }

        let opened = open_lines(&img, Orientation::Vertical, 100, 1);
        assert_eq!(opened.get_pixel(3, 105).0[0], 255);
        assert_eq!(opened.get_pixel(12, 55).0[0], 0);
    }

    #[test]
    fn test_detects_grid_cells_and_outer_border() {
        let mask = grid_mask(2, 3, 50);
        let detector = CellDetector::new(small_settings());

        let detection = detector.detect(&mask);

        assert_eq!(detection.horizontal_lines, 3);
        assert_eq!(detection.vertical_lines, 4);
        // 6 inner cells plus the outer table boundary
        assert_eq!(detection.cells.len(), 7);
        assert!(detection
            .cells
            .iter()
            .any(|c| c.width > 140 && c.height > 90));
        let inner = detection
            .cells
            .iter()
            .filter(|c| c.width < 60 && c.height < 60)
            .count();
        assert_eq!(inner, 6);
    }

    #[test]
    fn test_count_components_with_foreground_at_origin() {
        let mut mask = GrayImage::new(100, 200);
        for x in [0, 50, 98] {
            draw_filled_rect_mut(&mut mask, Rect::at(x, 0).of_size(2, 200), Luma([255]));
        }
        assert_eq!(count_components(&mask), 3);

        let mut corner = GrayImage::new(50, 50);
        draw_filled_rect_mut(&mut corner, Rect::at(0, 0).of_size(50, 2), Luma([255]));
        assert_eq!(count_components(&corner), 1);
        assert_eq!(count_components(&GrayImage::new(10, 10)), 0);
    }

    #[test]
    fn test_default_preprocessing_line_counts_include_border() {
        let image = DynamicImage::ImageRgb8(ruled_page());
        let prepared = prepare(&image, &PreprocessSettings::default());

        let detection = CellDetector::new(DetectionSettings::default()).detect(&prepared.binary);

        // 4 rules each way plus the two border strokes
        assert_eq!(detection.horizontal_lines, 6);
        assert_eq!(detection.vertical_lines, 6);
    }

    #[test]
    fn test_blank_image_yields_no_cells() {
        let detector = CellDetector::default();
        let detection = detector.detect(&GrayImage::new(300, 200));
        assert!(detection.cells.is_empty());
        assert_eq!(detection.horizontal_lines, 0);
        assert_eq!(detection.vertical_lines, 0);
    }

    #[test]
    fn test_size_filter_is_exclusive() {
        let mut settings = small_settings();
        settings.min_dim = 20;
        settings.max_dim = 1000;
        let detector = CellDetector::new(settings);

        assert!(!detector.is_plausible(&BoundingBox::new(0, 0, 20, 50)));
        assert!(detector.is_plausible(&BoundingBox::new(0, 0, 21, 50)));
        assert!(!detector.is_plausible(&BoundingBox::new(0, 0, 50, 1000)));
    }

    #[test]
    fn test_combine_masks_saturates() {
        let a = GrayImage::from_pixel(2, 1, Luma([255]));
        let mut b = GrayImage::new(2, 1);
        b.put_pixel(1, 0, Luma([255]));
        let combined = combine_masks(&a, &b);
        assert_eq!(combined.get_pixel(0, 0).0[0], 255);
        assert_eq!(combined.get_pixel(1, 0).0[0], 255);
    }

    #[test]
    fn test_debug_writer_creates_directory_and_file() {
        let dir = TempDir::new().unwrap();
        let writer = DebugImageWriter::new(dir.path().join("debug_detected_cells"));
        let image = RgbImage::from_pixel(80, 60, Rgb([255, 255, 255]));

        writer
            .cells_detected("/photos/invoice.png", &image, &[BoundingBox::new(5, 5, 30, 30)])
            .unwrap();

        let expected = dir.path().join("debug_detected_cells").join("invoice_debug.jpg");
        assert_eq!(writer.image_path("/photos/invoice.png"), expected);
        assert!(expected.exists());
    }

    #[test]
    fn test_annotate_outlines_cells() {
        let image = RgbImage::from_pixel(40, 40, Rgb([255, 255, 255]));
        let annotated = annotate_cells(&image, &[BoundingBox::new(5, 5, 10, 10)]);
        assert_eq!(annotated.get_pixel(5, 5), &Rgb([0, 255, 0]));
        assert_eq!(annotated.get_pixel(14, 14), &Rgb([0, 255, 0]));
        assert_eq!(annotated.get_pixel(10, 10), &Rgb([255, 255, 255]));
    }
}
