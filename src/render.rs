/*
   Export pipeline for Publish My Pictures: validate, render and archive.
   Copyright (C) 2022 Matheus Xavier <mxavier@neonimp.com>

   This program is free software: you can redistribute it and/or modify
   it under the terms of the GNU Lesser General Public License as published by
   the Free Software Foundation, either version 3 of the License, or
   (at your option) any later version.

   This program is distributed in the hope that it will be useful,
   but WITHOUT ANY WARRANTY; without even the implied warranty of
   MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
   GNU General Public License for more details.

   You should have received a copy of the GNU Lesser General Public License
   along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

//! Pre-processing of pictures before they are archived.
//!
//! The worker hands every source file to a [`Preprocessor`] and archives
//! whatever it returns. [`Passthrough`] archives files untouched;
//! [`ImageRenderer`] applies the job's resize, watermark and format settings.

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::job::{CanvasSize, ExportJob, Quality, ResizeMode, WatermarkPosition};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("cannot encode {name}: {source}")]
    Encode {
        name: String,
        #[source]
        source: image::ImageError,
    },
    #[error("unsupported output format {0:?}")]
    UnsupportedFormat(String),
    #[error("{} has no file name", .0.display())]
    Unnamed(PathBuf),
}

/// What ends up in the archive for one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Stream this file as-is, named by its file name.
    File(PathBuf),
    /// Already encoded bytes and the entry name to store them under.
    Encoded { name: String, bytes: Vec<u8> },
}

pub trait Preprocessor: Send + Sync {
    fn prepare(&self, source: &Path, job: &ExportJob) -> Result<Payload, RenderError>;
}

/// Archives source files byte for byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Preprocessor for Passthrough {
    fn prepare(&self, source: &Path, _job: &ExportJob) -> Result<Payload, RenderError> {
        Ok(Payload::File(source.to_path_buf()))
    }
}

/// Decodes each picture, fits it into the output canvas, stamps the
/// watermark and encodes it in the requested format.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageRenderer;

impl Preprocessor for ImageRenderer {
    fn prepare(&self, source: &Path, job: &ExportJob) -> Result<Payload, RenderError> {
        let format = ImageFormat::from_extension(job.output_format())
            .filter(|f| f.writing_enabled())
            .ok_or_else(|| RenderError::UnsupportedFormat(job.output_format().to_owned()))?;
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| RenderError::Unnamed(source.to_path_buf()))?;
        let name = format!("{}.{}", stem, job.output_format());

        let picture = image::open(source).map_err(|source_err| RenderError::Decode {
            path: source.to_path_buf(),
            source: source_err,
        })?;
        let filter = filter_for(job.quality());
        let mut canvas = fit(&picture, job.canvas(), job.resize_mode(), filter).into_rgba8();

        if let Some(mark_path) = job.watermark() {
            let mark = image::open(mark_path).map_err(|source_err| RenderError::Decode {
                path: mark_path.to_path_buf(),
                source: source_err,
            })?;
            let mark = match job.watermark_size() {
                Some(size) => mark.resize_exact(size.width.max(1), size.height.max(1), FilterType::Lanczos3),
                None => mark,
            };
            stamp(&mut canvas, mark.into_rgba8(), job.watermark_position(), job.watermark_transparency());
        }

        let encoded = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).into_rgb8()),
            _ => DynamicImage::ImageRgba8(canvas),
        };
        let mut bytes = Cursor::new(Vec::new());
        encoded
            .write_to(&mut bytes, format)
            .map_err(|source_err| RenderError::Encode {
                name: name.clone(),
                source: source_err,
            })?;

        debug!(source = %source.display(), entry = %name, "rendered picture");
        Ok(Payload::Encoded {
            name,
            bytes: bytes.into_inner(),
        })
    }
}

fn filter_for(quality: Quality) -> FilterType {
    match quality {
        Quality::Unsmoothed => FilterType::Nearest,
        Quality::Smoothed => FilterType::Lanczos3,
    }
}

fn fit(picture: &DynamicImage, canvas: CanvasSize, mode: ResizeMode, filter: FilterType) -> DynamicImage {
    match mode {
        ResizeMode::IgnoreAspect => picture.resize_exact(canvas.width, canvas.height, filter),
        ResizeMode::KeepAspect => picture.resize(canvas.width, canvas.height, filter),
        ResizeMode::KeepAspectByExpanding => {
            let (w, h) = covering_dimensions(picture.width(), picture.height(), canvas);
            picture.resize_exact(w, h, filter)
        }
    }
}

/// Smallest size with the picture's aspect ratio that covers `canvas`.
fn covering_dimensions(width: u32, height: u32, canvas: CanvasSize) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (canvas.width, canvas.height);
    }
    let scale = f64::max(
        canvas.width as f64 / width as f64,
        canvas.height as f64 / height as f64,
    );
    let w = ((width as f64 * scale).round() as u32).max(canvas.width).max(1);
    let h = ((height as f64 * scale).round() as u32).max(canvas.height).max(1);
    (w, h)
}

/// Top-left corner of a `mark` sized watermark on a `base` sized picture.
fn watermark_origin(base: (u32, u32), mark: (u32, u32), position: WatermarkPosition) -> (i64, i64) {
    let (bw, bh) = (base.0 as i64, base.1 as i64);
    let (mw, mh) = (mark.0 as i64, mark.1 as i64);
    let center_x = (bw - mw) / 2;
    let center_y = (bh - mh) / 2;
    let right = bw - mw;
    let bottom = bh - mh;
    match position {
        WatermarkPosition::Centered => (center_x, center_y),
        WatermarkPosition::TopLeft => (0, 0),
        WatermarkPosition::TopRight => (right, 0),
        WatermarkPosition::TopCentered => (center_x, 0),
        WatermarkPosition::BottomLeft => (0, bottom),
        WatermarkPosition::BottomRight => (right, bottom),
        WatermarkPosition::BottomCentered => (center_x, bottom),
    }
}

fn stamp(canvas: &mut RgbaImage, mut mark: RgbaImage, position: WatermarkPosition, transparency: u8) {
    let opacity = 100 - transparency.min(100) as u32;
    for pixel in mark.pixels_mut() {
        pixel[3] = (pixel[3] as u32 * opacity / 100) as u8;
    }
    let (x, y) = watermark_origin(canvas.dimensions(), mark.dimensions(), position);
    imageops::overlay(canvas, &mark, x, y);
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba};
    use tempfile::tempdir;

    fn solid(path: &Path, width: u32, height: u32, color: [u8; 4]) {
        RgbaImage::from_pixel(width, height, Rgba(color)).save(path).unwrap();
    }

    #[test]
    fn passthrough_keeps_the_file() {
        let job = ExportJob::builder(["a.png"], "out.zip").build();
        assert_eq!(
            Passthrough.prepare(Path::new("a.png"), &job).unwrap(),
            Payload::File(PathBuf::from("a.png"))
        );
    }

    #[test]
    fn origin_for_every_position() {
        let base = (100, 50);
        let mark = (10, 4);
        assert_eq!(watermark_origin(base, mark, WatermarkPosition::TopLeft), (0, 0));
        assert_eq!(watermark_origin(base, mark, WatermarkPosition::TopCentered), (45, 0));
        assert_eq!(watermark_origin(base, mark, WatermarkPosition::TopRight), (90, 0));
        assert_eq!(watermark_origin(base, mark, WatermarkPosition::Centered), (45, 23));
        assert_eq!(watermark_origin(base, mark, WatermarkPosition::BottomLeft), (0, 46));
        assert_eq!(watermark_origin(base, mark, WatermarkPosition::BottomCentered), (45, 46));
        assert_eq!(watermark_origin(base, mark, WatermarkPosition::BottomRight), (90, 46));
    }

    #[test]
    fn covering_keeps_aspect_and_fills_canvas() {
        assert_eq!(covering_dimensions(400, 200, CanvasSize::new(100, 100)), (200, 100));
        assert_eq!(covering_dimensions(200, 400, CanvasSize::new(100, 100)), (100, 200));
        assert_eq!(covering_dimensions(50, 50, CanvasSize::new(80, 60)), (80, 80));
    }

    #[test]
    fn resize_modes() {
        let picture = DynamicImage::ImageRgba8(RgbaImage::new(400, 200));
        let canvas = CanvasSize::new(100, 100);
        let f = FilterType::Nearest;
        assert_eq!(fit(&picture, canvas, ResizeMode::IgnoreAspect, f).dimensions(), (100, 100));
        assert_eq!(fit(&picture, canvas, ResizeMode::KeepAspect, f).dimensions(), (100, 50));
        assert_eq!(fit(&picture, canvas, ResizeMode::KeepAspectByExpanding, f).dimensions(), (200, 100));
    }

    #[test]
    fn renders_resized_watermarked_png() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("photo.jpg.png");
        solid(&src, 200, 100, [0, 0, 255, 255]);
        let mark = dir.path().join("mark.png");
        solid(&mark, 10, 10, [255, 0, 0, 255]);

        let job = ExportJob::builder([&src], dir.path().join("out.zip"))
            .canvas(100, 100)
            .resize_mode(ResizeMode::KeepAspect)
            .watermark(&mark)
            .watermark_position(WatermarkPosition::TopLeft)
            .watermark_transparency(0)
            .output_format("*.png")
            .quality(Quality::Unsmoothed)
            .build();

        let Payload::Encoded { name, bytes } = ImageRenderer.prepare(&src, &job).unwrap() else {
            panic!("renderer should encode");
        };
        assert_eq!(name, "photo.jpg.png");
        let out = image::load_from_memory(&bytes).unwrap();
        assert_eq!(out.dimensions(), (100, 50));
        assert_eq!(out.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
        assert_eq!(out.get_pixel(50, 25), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn watermark_is_scaled_to_the_requested_size() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("photo.png");
        solid(&src, 100, 50, [0, 0, 255, 255]);
        let mark = dir.path().join("mark.png");
        solid(&mark, 10, 10, [255, 0, 0, 255]);

        let job = ExportJob::builder([&src], dir.path().join("out.zip"))
            .canvas(100, 50)
            .watermark(&mark)
            .watermark_size(20, 4)
            .watermark_position(WatermarkPosition::TopLeft)
            .watermark_transparency(0)
            .output_format("png")
            .build();

        let Payload::Encoded { bytes, .. } = ImageRenderer.prepare(&src, &job).unwrap() else {
            panic!("renderer should encode");
        };
        let out = image::load_from_memory(&bytes).unwrap().into_rgba8();
        let is_mark = |x, y| {
            let p = out.get_pixel(x, y);
            p[0] > 200 && p[2] < 50
        };
        assert!(is_mark(0, 0));
        assert!(is_mark(19, 3));
        assert!(!is_mark(20, 0));
        assert!(!is_mark(0, 4));
    }

    #[test]
    fn jpeg_output_drops_alpha() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.png");
        solid(&src, 20, 20, [10, 200, 10, 128]);
        let job = ExportJob::builder([&src], dir.path().join("out.zip"))
            .canvas(20, 20)
            .build();

        let Payload::Encoded { name, bytes } = ImageRenderer.prepare(&src, &job).unwrap() else {
            panic!("renderer should encode");
        };
        assert_eq!(name, "a.jpg");
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let job = ExportJob::builder(["a.png"], "out.zip").output_format("xyz").build();
        assert!(matches!(
            ImageRenderer.prepare(Path::new("a.png"), &job),
            Err(RenderError::UnsupportedFormat(f)) if f == "xyz"
        ));
    }

    #[test]
    fn undecodable_source_is_reported() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("broken.png");
        std::fs::write(&src, b"nope").unwrap();
        let job = ExportJob::builder([&src], dir.path().join("out.zip")).output_format("png").build();
        assert!(matches!(
            ImageRenderer.prepare(&src, &job),
            Err(RenderError::Decode { path, .. }) if path == src
        ));
    }
}
