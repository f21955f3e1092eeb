use crate::error::{Error, Result};
use image::RgbImage;
use ndarray::{Array2, Array3, Array4, ArrayView2, ArrayView3, ArrayViewD, Axis, Ix3};

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Turns an `H x W x 3` frame of 0-255 values into a normalized
/// `1 x 3 x size x size` tensor. The same tensor feeds both networks.
pub fn preprocess_frame(frame: ArrayViewD<'_, u8>, size: usize) -> Result<Array4<f32>> {
    let frame = validate_frame(frame)?;
    let (h, w, _) = frame.dim();

    let mut chw = Array3::<f32>::zeros((3, h, w));
    for ((y, x, c), value) in frame.indexed_iter() {
        chw[[c, y, x]] = *value as f32 / 255.0;
    }

    let mut resized = resize_bilinear(chw.view(), size, size);
    for (c, mut plane) in resized.axis_iter_mut(Axis(0)).enumerate() {
        let mean = IMAGENET_MEAN[c];
        let std = IMAGENET_STD[c];
        plane.mapv_inplace(|v| (v - mean) / std);
    }
    Ok(resized.insert_axis(Axis(0)))
}

fn validate_frame(frame: ArrayViewD<'_, u8>) -> Result<ArrayView3<'_, u8>> {
    if frame.ndim() != 3 {
        return Err(Error::InvalidFrame(format!(
            "expected a rank-3 HxWx3 pixel array, got rank {}",
            frame.ndim()
        )));
    }
    let shape = frame.shape();
    if shape[2] != 3 {
        return Err(Error::InvalidFrame(format!(
            "expected 3 colour channels, got {}",
            shape[2]
        )));
    }
    if shape[0] == 0 || shape[1] == 0 {
        return Err(Error::InvalidFrame(format!(
            "frame has an empty dimension: {}x{}",
            shape[0], shape[1]
        )));
    }
    Ok(frame.into_dimensionality::<Ix3>()?)
}

pub fn frame_from_image(img: &RgbImage) -> Result<Array3<u8>> {
    let (w, h) = img.dimensions();
    Ok(Array3::from_shape_vec(
        (h as usize, w as usize, 3),
        img.as_raw().clone(),
    )?)
}

struct AxisTaps {
    lo: usize,
    hi: usize,
    w_lo: f32,
    w_hi: f32,
}

// Half-pixel source coordinates, clamped at zero (no corner alignment).
fn axis_taps(in_len: usize, out_len: usize) -> Vec<AxisTaps> {
    let scale = in_len as f32 / out_len as f32;
    (0..out_len)
        .map(|dst| {
            let src = (scale * (dst as f32 + 0.5) - 0.5).max(0.0);
            let lo = (src.floor() as usize).min(in_len - 1);
            let hi = if lo < in_len - 1 { lo + 1 } else { lo };
            let w_hi = src - lo as f32;
            AxisTaps {
                lo,
                hi,
                w_lo: 1.0 - w_hi,
                w_hi,
            }
        })
        .collect()
}

/// Bilinear resize of a channel-first `C x H x W` array.
pub fn resize_bilinear(input: ArrayView3<'_, f32>, out_h: usize, out_w: usize) -> Array3<f32> {
    let (channels, in_h, in_w) = input.dim();
    if in_h == out_h && in_w == out_w {
        return input.to_owned();
    }
    let rows = axis_taps(in_h, out_h);
    let cols = axis_taps(in_w, out_w);
    let mut out = Array3::<f32>::zeros((channels, out_h, out_w));
    for c in 0..channels {
        let plane = input.index_axis(Axis(0), c);
        for (y, r) in rows.iter().enumerate() {
            for (x, k) in cols.iter().enumerate() {
                let top = k.w_lo * plane[[r.lo, k.lo]] + k.w_hi * plane[[r.lo, k.hi]];
                let bottom = k.w_lo * plane[[r.hi, k.lo]] + k.w_hi * plane[[r.hi, k.hi]];
                out[[c, y, x]] = r.w_lo * top + r.w_hi * bottom;
            }
        }
    }
    out
}

/// Nearest-neighbour projection of a class map to `height x width`; source
/// index is `floor(dst * in / out)`.
pub fn resize_mask_nearest(mask: ArrayView2<'_, u8>, width: usize, height: usize) -> Array2<u8> {
    let (in_h, in_w) = mask.dim();
    if (in_h, in_w) == (height, width) {
        return mask.to_owned();
    }
    if in_h == 0 || in_w == 0 {
        return Array2::zeros((height, width));
    }
    Array2::from_shape_fn((height, width), |(y, x)| {
        let sy = (y * in_h / height).min(in_h - 1);
        let sx = (x * in_w / width).min(in_w - 1);
        mask[[sy, sx]]
    })
}
