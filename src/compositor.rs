use std::{fs, io::Cursor, path::Path};

use image::{
    codecs::jpeg::JpegEncoder, imageops, DynamicImage, GrayImage, ImageFormat, Luma, RgbaImage,
};
use tracing::info;

use crate::{
    container::{replace_atomically, Container},
    polygon_metadata::{self, Polygon},
    Error, Result,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BakeStyle {
    pub fill_color: [u8; 3],
    pub peak_alpha: u8,
    pub feather_radius: f32,
}

impl Default for BakeStyle {
    fn default() -> Self {
        BakeStyle {
            fill_color: [255, 0, 0],
            peak_alpha: 51,
            feather_radius: 14.0,
        }
    }
}

pub fn polygon_coverage(width: u32, height: u32, polygon: &Polygon) -> Vec<f32> {
    let (w, h) = (width as usize, height as usize);
    let mut coverage = vec![0.0f32; w * h];
    let points = polygon.points();
    let mut crossings: Vec<f64> = Vec::with_capacity(points.len());

    for row in 0..h {
        let yc = row as f64 + 0.5;
        crossings.clear();
        for (i, &[x0, y0]) in points.iter().enumerate() {
            let [x1, y1] = points[(i + 1) % points.len()];
            if (y0 <= yc) != (y1 <= yc) {
                crossings.push(x0 + (yc - y0) * (x1 - x0) / (y1 - y0));
            }
        }
        crossings.sort_by(f64::total_cmp);

        for span in crossings.chunks_exact(2) {
            let first = (span[0] - 0.5).ceil().max(0.0);
            let end = (span[1] - 0.5).ceil().min(w as f64);
            if end <= first {
                continue;
            }
            let offset = row * w;
            coverage[offset + first as usize..offset + end as usize].fill(1.0);
        }
    }
    coverage
}

/// Feathering wider than this is rejected by config validation and capped
/// here.
pub const MAX_FEATHER_RADIUS: f32 = 512.0;

// Blurred with sigma = radius / 3, so the falloff dies out within the
// radius, then scaled so the brightest pixel is exactly `peak_alpha`.
pub fn feather_mask(
    width: u32,
    height: u32,
    polygon: &Polygon,
    peak_alpha: u8,
    feather_radius: f32,
) -> GrayImage {
    let coverage = polygon_coverage(width, height, polygon);
    let mut mask = GrayImage::new(width, height);
    for (pixel, value) in mask.pixels_mut().zip(coverage) {
        *pixel = Luma([(value * 255.0) as u8]);
    }

    let radius = feather_radius.min(MAX_FEATHER_RADIUS);
    if radius >= 1.0 {
        mask = imageops::blur(&mask, radius / 3.0);
    }

    let max = mask.pixels().map(|p| p[0]).max().unwrap_or(0);
    if max == 0 {
        return mask;
    }
    let scale = f32::from(peak_alpha) / f32::from(max);
    for pixel in mask.pixels_mut() {
        pixel[0] = (f32::from(pixel[0]) * scale).round().clamp(0.0, 255.0) as u8;
    }
    mask
}

pub fn composite(base: &mut RgbaImage, mask: &GrayImage, color: [u8; 3]) {
    for (pixel, alpha) in base.pixels_mut().zip(mask.pixels()) {
        let a = f32::from(alpha[0]) / 255.0;
        if a == 0.0 {
            continue;
        }
        for channel in 0..3 {
            let under = f32::from(pixel[channel]);
            pixel[channel] = (under * (1.0 - a) + f32::from(color[channel]) * a).round() as u8;
        }
        let under = f32::from(pixel[3]) / 255.0;
        pixel[3] = ((a + under * (1.0 - a)) * 255.0).round() as u8;
    }
}

fn encode(
    canvas: RgbaImage,
    keep_alpha: bool,
    format: ImageFormat,
    jpeg_quality: u8,
) -> Result<Vec<u8>> {
    let canvas = DynamicImage::ImageRgba8(canvas);
    let image = if keep_alpha && format != ImageFormat::Jpeg {
        canvas
    } else {
        DynamicImage::ImageRgb8(canvas.to_rgb8())
    };
    let mut bytes = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut bytes, jpeg_quality);
            image.write_with_encoder(encoder)?;
        }
        _ => image.write_to(&mut Cursor::new(&mut bytes), format)?,
    }
    Ok(bytes)
}

/// Permanently paints the feathered polygon into the image at `path`.
///
/// The file keeps its container format, ICC profile and EXIF, and the
/// polygon payload is embedded in the same save. On any error the original
/// file is left as it was.
pub fn bake(path: &Path, polygon: &Polygon, style: &BakeStyle, jpeg_quality: u8) -> Result<()> {
    let original = fs::read(path).map_err(|e| Error::io(path, e))?;
    let container = Container::from_bytes(path, original.clone())?;
    let format = container.format();
    let icc_profile = container.icc_profile();
    let exif = container.exif_fields()?;

    let decoded = image::load_from_memory_with_format(&original, format)?;
    let keep_alpha = decoded.color().has_alpha();
    let mut canvas = decoded.to_rgba8();
    let mask = feather_mask(
        canvas.width(),
        canvas.height(),
        polygon,
        style.peak_alpha,
        style.feather_radius,
    );
    composite(&mut canvas, &mask, style.fill_color);

    let encoded = encode(canvas, keep_alpha, format, jpeg_quality)?;
    let mut output = Container::from_bytes(path, encoded)?;
    output.set_icc_profile(icc_profile);
    output.set_exif_fields(&exif)?;
    polygon_metadata::embed_into(&mut output, Some(polygon))?;
    replace_atomically(path, &output.into_bytes())?;

    info!(
        "baked {}-point polygon into {} (alpha {}, feather {}px)",
        polygon.points().len(),
        path.display(),
        style.peak_alpha,
        style.feather_radius
    );
    Ok(())
}
