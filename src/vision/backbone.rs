//! Frozen image featurizers used as the transfer-learning backbone.

use image::RgbImage;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Side length images are resized to before featurization.
pub const INPUT_SIZE: u32 = 64;

const COLOR_BINS: usize = 4;
const EDGE_GRID: usize = 4;
const EDGE_ORIENTATIONS: usize = 8;
const TINY_SIZE: usize = 16;

/// Backbone choice. None of them has trainable parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    ColorHistogram,
    EdgeHistogram,
    TinyImage,
    #[default]
    Composite,
}

impl Architecture {
    /// Stable identifier stored with cached bottleneck values.
    pub fn id(self) -> &'static str {
        match self {
            Self::ColorHistogram => "color_histogram_v1",
            Self::EdgeHistogram => "edge_histogram_v1",
            Self::TinyImage => "tiny_image_v1",
            Self::Composite => "composite_v1",
        }
    }

    pub fn output_len(self) -> usize {
        match self {
            Self::ColorHistogram => COLOR_BINS * COLOR_BINS * COLOR_BINS,
            Self::EdgeHistogram => EDGE_GRID * EDGE_GRID * EDGE_ORIENTATIONS,
            Self::TinyImage => TINY_SIZE * TINY_SIZE,
            Self::Composite => 64 + 128 + 256,
        }
    }

    /// Decode encoded image bytes and compute the bottleneck vector.
    pub fn featurize(self, bytes: &[u8]) -> PipelineResult<Vec<f32>> {
        let image = image::load_from_memory(bytes)
            .map_err(|err| PipelineError::DecodeImage(err.to_string()))?
            .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
            .to_rgb8();
        Ok(self.featurize_rgb(&image))
    }

    fn featurize_rgb(self, image: &RgbImage) -> Vec<f32> {
        match self {
            Self::ColorHistogram => color_histogram(image),
            Self::EdgeHistogram => edge_histogram(&luma(image)),
            Self::TinyImage => tiny_image(&luma(image)),
            Self::Composite => {
                let luma = luma(image);
                let mut out = color_histogram(image);
                out.extend(edge_histogram(&luma));
                out.extend(tiny_image(&luma));
                out
            }
        }
    }
}

/// Row-major luma plane of a resized image, values in `[0, 1]`.
struct Luma {
    width: usize,
    height: usize,
    values: Vec<f32>,
}

impl Luma {
    fn at(&self, x: usize, y: usize) -> f32 {
        self.values[y * self.width + x]
    }
}

fn luma(image: &RgbImage) -> Luma {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let values = image
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32) / 255.0
        })
        .collect();
    Luma {
        width,
        height,
        values,
    }
}

/// Joint RGB histogram, normalized to sum to one.
fn color_histogram(image: &RgbImage) -> Vec<f32> {
    let mut hist = vec![0.0f32; COLOR_BINS * COLOR_BINS * COLOR_BINS];
    let shift = 8 - COLOR_BINS.trailing_zeros();
    for pixel in image.pixels() {
        let [r, g, b] = pixel.0.map(|c| (c >> shift) as usize);
        hist[(r * COLOR_BINS + g) * COLOR_BINS + b] += 1.0;
    }
    let total = (image.width() * image.height()).max(1) as f32;
    hist.iter_mut().for_each(|v| *v /= total);
    hist
}

/// Gradient-orientation histograms over a grid of cells, L2-normalized.
fn edge_histogram(luma: &Luma) -> Vec<f32> {
    let mut hist = vec![0.0f32; EDGE_GRID * EDGE_GRID * EDGE_ORIENTATIONS];
    let cell_w = (luma.width / EDGE_GRID).max(1);
    let cell_h = (luma.height / EDGE_GRID).max(1);
    for y in 1..luma.height.saturating_sub(1) {
        for x in 1..luma.width.saturating_sub(1) {
            let gx = luma.at(x + 1, y) - luma.at(x - 1, y);
            let gy = luma.at(x, y + 1) - luma.at(x, y - 1);
            let magnitude = (gx * gx + gy * gy).sqrt();
            if magnitude == 0.0 {
                continue;
            }
            // Unsigned orientation in [0, pi).
            let angle = gy.atan2(gx).rem_euclid(std::f32::consts::PI);
            let bin = ((angle / std::f32::consts::PI * EDGE_ORIENTATIONS as f32) as usize)
                .min(EDGE_ORIENTATIONS - 1);
            let cell = (y / cell_h).min(EDGE_GRID - 1) * EDGE_GRID + (x / cell_w).min(EDGE_GRID - 1);
            hist[cell * EDGE_ORIENTATIONS + bin] += magnitude;
        }
    }
    l2_normalize(&mut hist);
    hist
}

/// Block-averaged thumbnail with zero mean and unit L2 norm.
fn tiny_image(luma: &Luma) -> Vec<f32> {
    let block_w = (luma.width / TINY_SIZE).max(1);
    let block_h = (luma.height / TINY_SIZE).max(1);
    let mut out = vec![0.0f32; TINY_SIZE * TINY_SIZE];
    for ty in 0..TINY_SIZE {
        for tx in 0..TINY_SIZE {
            let mut sum = 0.0f32;
            let mut count = 0usize;
            for y in ty * block_h..((ty + 1) * block_h).min(luma.height) {
                for x in tx * block_w..((tx + 1) * block_w).min(luma.width) {
                    sum += luma.at(x, y);
                    count += 1;
                }
            }
            out[ty * TINY_SIZE + tx] = if count == 0 { 0.0 } else { sum / count as f32 };
        }
    }
    let mean = out.iter().sum::<f32>() / out.len() as f32;
    out.iter_mut().for_each(|v| *v -= mean);
    l2_normalize(&mut out);
    out
}

fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|v| *v /= norm);
    }
}
