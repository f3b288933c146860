//! Image compositor: pure, deterministic transforms from captured frames to
//! gallery artifacts and print-ready rasters. No device or network access
//! happens here; identical inputs always produce byte-identical outputs.

use image::imageops::{self, FilterType};
use image::imageops::colorops::{BiLevel, dither};
use image::{GrayImage, Rgb, RgbImage};

/// Vertical white gap between panels of a photo strip, in pixels.
pub const STRIP_SPACING: u32 = 20;

/// Contrast boost applied before dithering, in percent.
const THERMAL_CONTRAST: f32 = 40.0;
/// Flat brightness lift applied before dithering.
const THERMAL_BRIGHTEN: i32 = 12;
/// 3x3 sharpen kernel, matching a standard unsharp convolution.
const SHARPEN_KERNEL: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];

/// Scale an image to the given width, preserving aspect ratio.
pub fn scale_to_width(img: &RgbImage, width: u32) -> RgbImage {
    if img.width() == width {
        return img.clone();
    }
    let height = ((width as u64 * img.height() as u64) / img.width() as u64).max(1) as u32;
    imageops::resize(img, width, height, FilterType::Lanczos3)
}

/// Stack frames into a vertical strip with white spacing between panels.
/// This is the color artifact persisted to the gallery.
pub fn stack_strip(frames: &[RgbImage], width: u32) -> RgbImage {
    let panels: Vec<RgbImage> = frames.iter().map(|f| scale_to_width(f, width)).collect();
    let gaps = panels.len().saturating_sub(1) as u32;
    let total_height: u32 = panels.iter().map(|p| p.height()).sum::<u32>() + STRIP_SPACING * gaps;

    let mut strip = RgbImage::from_pixel(width, total_height.max(1), Rgb([255, 255, 255]));
    let mut y = 0u32;
    for panel in &panels {
        imageops::replace(&mut strip, panel, 0, i64::from(y));
        y += panel.height() + STRIP_SPACING;
    }
    strip
}

/// Convert a color image into a high-contrast bi-level raster sized for the
/// thermal head: resize, grayscale, sharpen, contrast, brighten, then
/// Floyd-Steinberg dither down to pure black and white.
pub fn thermal_prepare(img: &RgbImage, dots_per_line: u32) -> GrayImage {
    let resized = scale_to_width(img, dots_per_line);
    let gray = imageops::grayscale(&resized);
    let sharpened = imageops::filter3x3(&gray, &SHARPEN_KERNEL);
    let contrasted = imageops::contrast(&sharpened, THERMAL_CONTRAST);
    let mut adjusted = imageops::colorops::brighten(&contrasted, THERMAL_BRIGHTEN);
    dither(&mut adjusted, &BiLevel);
    adjusted
}

/// Print-ready raster for a single photo.
pub fn compose_single(frame: &RgbImage, dots_per_line: u32) -> GrayImage {
    thermal_prepare(frame, dots_per_line)
}

/// Print-ready raster for a multi-shot strip.
pub fn compose_strip(frames: &[RgbImage], dots_per_line: u32) -> GrayImage {
    thermal_prepare(&stack_strip(frames, dots_per_line), dots_per_line)
}
