use crate::error::{Error, Result};
use crate::preprocess::resize_mask_nearest;
use crate::taxonomy::BACKGROUND_CLASS;
use image::{Rgb, RgbImage};
use ndarray::ArrayView2;
use std::collections::HashMap;
use std::path::Path;

/// Class index to RGB colour.
pub type Palette = HashMap<u8, [u8; 3]>;

/// Colour for a labelled class the palette does not cover.
const UNMAPPED_COLOR: [u8; 3] = [255, 255, 255];

const DEFAULT_COLORS: &[[u8; 3]] = &[
    [0, 0, 0],
    [255, 0, 0],
    [0, 255, 0],
    [0, 0, 255],
    [255, 255, 0],
    [0, 255, 255],
    [255, 0, 255],
    [255, 128, 0],
    [128, 0, 255],
];

pub fn default_palette() -> Palette {
    DEFAULT_COLORS
        .iter()
        .enumerate()
        .map(|(idx, color)| (idx as u8, *color))
        .collect()
}

/// Paints every labelled class of `mask` with its palette colour. Background
/// and indices at or beyond `num_classes` stay black.
pub fn render_mask(mask: ArrayView2<'_, u8>, palette: &Palette, num_classes: usize) -> RgbImage {
    let (height, width) = mask.dim();
    let mut img = RgbImage::new(width as u32, height as u32);
    for ((y, x), &class_idx) in mask.indexed_iter() {
        let class = class_idx as usize;
        if class == BACKGROUND_CLASS || class >= num_classes {
            continue;
        }
        let color = palette.get(&class_idx).copied().unwrap_or(UNMAPPED_COLOR);
        img.put_pixel(x as u32, y as u32, Rgb(color));
    }
    img
}

pub fn save_mask_preview(
    mask: ArrayView2<'_, u8>,
    output_path: &Path,
    palette: &Palette,
    num_classes: usize,
) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    render_mask(mask, palette, num_classes).save(output_path)?;
    Ok(())
}

/// Blends the colourised mask over `frame`. The mask is projected to the
/// frame's size first; background pixels keep their original colour.
pub fn blend_overlay(
    frame: &RgbImage,
    mask: ArrayView2<'_, u8>,
    palette: &Palette,
    alpha: f32,
) -> Result<RgbImage> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(Error::Config(format!("overlay alpha {alpha} outside [0, 1]")));
    }
    let (width, height) = frame.dimensions();
    let mask = resize_mask_nearest(mask, width as usize, height as usize);
    let mut out = frame.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let class_idx = mask[[y as usize, x as usize]];
        if class_idx as usize == BACKGROUND_CLASS {
            continue;
        }
        let color = palette.get(&class_idx).copied().unwrap_or(UNMAPPED_COLOR);
        for c in 0..3 {
            let blended = (1.0 - alpha) * pixel.0[c] as f32 + alpha * color[c] as f32;
            pixel.0[c] = blended.round().clamp(0.0, 255.0) as u8;
        }
    }
    Ok(out)
}
