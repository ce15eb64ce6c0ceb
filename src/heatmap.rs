//! Diagnostic heatmap rendering.
//!
//! Composes input image, ground-truth mask and a jet-colormapped anomaly
//! heatmap into one horizontal strip and writes it as a fixed-size PNG.
//! Rendering is fully deterministic: per-sample min/max normalization, a
//! fixed colormap, and box-filter resampling with no randomness, so the same
//! inputs always produce byte-identical files.

use std::fs;
use std::path::Path;

use candle_core::Tensor;
use image::{imageops, Rgb, RgbImage};
use tracing::debug;

use crate::error::{MemSegError, MemSegResult};

/// Guard against a flat (zero-variance) anomaly map.
const NORM_EPS: f32 = 1e-10;

/// Output size of the composite: three square panels side by side.
const PANEL_SIZE: u32 = 256;

/// Render the three-panel composite for one sample and write it to
/// `save_path`, creating the parent directory when absent and overwriting any
/// existing file.
///
/// `input_image` is `(C, H, W)` or `(H, W)` with values in `[0, 1]`;
/// `anomaly_map` and `ground_truth` are `(H, W)`. `source_path`, when known,
/// names the validation file the sample came from and is only logged.
pub fn render_heatmap(
    input_image: &Tensor,
    anomaly_map: &Tensor,
    ground_truth: &Tensor,
    save_path: &Path,
    source_path: Option<&Path>,
) -> MemSegResult<()> {
    if let Some(parent) = save_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let input_panel = input_to_rgb(input_image)?;
    let (h, w) = (input_panel.height(), input_panel.width());
    let gt_panel = gray_to_rgb(ground_truth, h, w)?;
    let heat_panel = anomaly_to_rgb(anomaly_map, h, w)?;

    let mut combined = RgbImage::new(w * 3, h);
    for (i, panel) in [&input_panel, &gt_panel, &heat_panel].iter().enumerate() {
        for y in 0..h {
            for x in 0..w {
                combined.put_pixel(i as u32 * w + x, y, *panel.get_pixel(x, y));
            }
        }
    }

    let resized = imageops::resize(
        &combined,
        PANEL_SIZE * 3,
        PANEL_SIZE,
        imageops::FilterType::Triangle,
    );
    resized.save(save_path)?;
    debug!(path = %save_path.display(), source = ?source_path, "wrote diagnostic heatmap");
    Ok(())
}

fn tensor_plane(tensor: &Tensor) -> MemSegResult<(Vec<f32>, usize, usize)> {
    let (h, w) = tensor.dims2()?;
    let values = tensor.contiguous()?.flatten_all()?.to_vec1::<f32>()?;
    Ok((values, h, w))
}

fn input_to_rgb(input_image: &Tensor) -> MemSegResult<RgbImage> {
    let (channels, h, w) = match input_image.dims() {
        [c, h, w] => (*c, *h, *w),
        [h, w] => (1, *h, *w),
        dims => {
            return Err(MemSegError::data(format!(
                "expected (C,H,W) or (H,W) input image, got {dims:?}"
            )))
        }
    };
    let flat = input_image.contiguous()?.flatten_all()?.to_vec1::<f32>()?;
    let plane = h * w;
    let mut img = RgbImage::new(w as u32, h as u32);
    for y in 0..h {
        for x in 0..w {
            let pixel = if channels >= 3 {
                Rgb([
                    to_u8(flat[y * w + x]),
                    to_u8(flat[plane + y * w + x]),
                    to_u8(flat[2 * plane + y * w + x]),
                ])
            } else {
                let v = to_u8(flat[y * w + x]);
                Rgb([v, v, v])
            };
            img.put_pixel(x as u32, y as u32, pixel);
        }
    }
    Ok(img)
}

fn gray_to_rgb(tensor: &Tensor, out_h: u32, out_w: u32) -> MemSegResult<RgbImage> {
    let (values, h, w) = tensor_plane(tensor)?;
    let mut img = RgbImage::new(out_w, out_h);
    for y in 0..out_h {
        for x in 0..out_w {
            let v = to_u8(sample_nearest(&values, h, w, y, x, out_h, out_w));
            img.put_pixel(x, y, Rgb([v, v, v]));
        }
    }
    Ok(img)
}

fn anomaly_to_rgb(anomaly_map: &Tensor, out_h: u32, out_w: u32) -> MemSegResult<RgbImage> {
    let (values, h, w) = tensor_plane(anomaly_map)?;
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min + NORM_EPS;

    let mut img = RgbImage::new(out_w, out_h);
    for y in 0..out_h {
        for x in 0..out_w {
            let raw = sample_nearest(&values, h, w, y, x, out_h, out_w);
            let t = (raw - min) / range;
            img.put_pixel(x, y, jet(t));
        }
    }
    Ok(img)
}

/// Nearest-neighbor lookup into a `(h, w)` plane at output coordinates.
fn sample_nearest(values: &[f32], h: usize, w: usize, y: u32, x: u32, out_h: u32, out_w: u32) -> f32 {
    let sy = (y as usize * h / out_h as usize).min(h.saturating_sub(1));
    let sx = (x as usize * w / out_w as usize).min(w.saturating_sub(1));
    values[sy * w + sx]
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0) as u8
}

/// Jet colormap: blue through green to red over `t` in `[0, 1]`.
fn jet(t: f32) -> Rgb<u8> {
    let t = t.clamp(0.0, 1.0);
    let r = (1.5 - (4.0 * t - 3.0).abs()).clamp(0.0, 1.0);
    let g = (1.5 - (4.0 * t - 2.0).abs()).clamp(0.0, 1.0);
    let b = (1.5 - (4.0 * t - 1.0).abs()).clamp(0.0, 1.0);
    Rgb([(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn fixture() -> (Tensor, Tensor, Tensor) {
        let device = Device::Cpu;
        let input: Vec<f32> = (0..3 * 8 * 8).map(|i| i as f32 / 192.0).collect();
        let input = Tensor::from_vec(input, (3, 8, 8), &device).unwrap();
        let map: Vec<f32> = (0..64).map(|i| (i as f32 / 63.0).sin()).collect();
        let map = Tensor::from_vec(map, (8, 8), &device).unwrap();
        let mut gt = vec![0.0f32; 64];
        gt[27] = 1.0;
        gt[28] = 1.0;
        let gt = Tensor::from_vec(gt, (8, 8), &device).unwrap();
        (input, map, gt)
    }

    #[test]
    fn render_writes_fixed_size_png() {
        let dir = tempfile::tempdir().unwrap();
        let (input, map, gt) = fixture();
        let path = dir.path().join("combined_sample_0.png");
        render_heatmap(&input, &map, &gt, &path, None).unwrap();
        let img = image::open(&path).unwrap();
        assert_eq!(img.width(), 768);
        assert_eq!(img.height(), 256);
    }

    #[test]
    fn render_is_byte_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let (input, map, gt) = fixture();
        let path_a = dir.path().join("a.png");
        let path_b = dir.path().join("b.png");
        render_heatmap(&input, &map, &gt, &path_a, None).unwrap();
        render_heatmap(&input, &map, &gt, &path_b, None).unwrap();
        let a = std::fs::read(&path_a).unwrap();
        let b = std::fs::read(&path_b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn flat_map_does_not_divide_by_zero() {
        let dir = tempfile::tempdir().unwrap();
        let (input, _, gt) = fixture();
        let flat = Tensor::full(0.3f32, (8, 8), &Device::Cpu).unwrap();
        let path = dir.path().join("flat.png");
        render_heatmap(&input, &flat, &gt, &path, None).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn render_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (input, map, gt) = fixture();
        let path = dir.path().join("nested").join("sample.png");
        render_heatmap(&input, &map, &gt, &path, None).unwrap();
        assert!(path.exists());
    }
}
