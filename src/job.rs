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

//! The parameter bundle describing one export request.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the watermark is placed on the output picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkPosition {
    Centered,
    TopLeft,
    TopRight,
    TopCentered,
    BottomLeft,
    #[default]
    BottomRight,
    BottomCentered,
}

/// How pictures are fitted into the output canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMode {
    /// Stretch to exactly the canvas size.
    IgnoreAspect,
    /// Largest size that fits inside the canvas.
    #[default]
    KeepAspect,
    /// Smallest size that covers the canvas.
    KeepAspectByExpanding,
}

/// Resampling filter choice for scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Unsmoothed,
    #[default]
    Smoothed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub const fn new(width: u32, height: u32) -> Self {
        CanvasSize { width, height }
    }

    /// True when a `width` x `height` picture fits without scaling.
    pub fn contains(&self, width: u32, height: u32) -> bool {
        width <= self.width && height <= self.height
    }

    /// This size scaled to `width`, height following the aspect ratio.
    pub fn with_width_keeping_aspect(&self, width: u32) -> CanvasSize {
        match self.width {
            0 => CanvasSize::new(width, self.height),
            w => CanvasSize::new(width, (width as f64 / w as f64 * self.height as f64) as u32),
        }
    }

    /// This size scaled to `height`, width following the aspect ratio.
    pub fn with_height_keeping_aspect(&self, height: u32) -> CanvasSize {
        match self.height {
            0 => CanvasSize::new(self.width, height),
            h => CanvasSize::new((height as f64 / h as f64 * self.width as f64) as u32, height),
        }
    }
}

impl Default for CanvasSize {
    fn default() -> Self {
        DEFAULT_CANVAS
    }
}

pub const DEFAULT_CANVAS: CanvasSize = CanvasSize::new(800, 600);
pub const DEFAULT_TRANSPARENCY: u8 = 50;
pub const DEFAULT_FORMAT: &str = "jpg";

/// Normalise "*.JPG", ".jpg" and "jpg" to "jpg".
pub fn normalize_format(format: &str) -> String {
    format
        .trim()
        .trim_start_matches('*')
        .trim_start_matches('.')
        .to_ascii_lowercase()
}

/// One export request. Built once through [`ExportJob::builder`] and not
/// changed after it is handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportJob {
    sources: Vec<PathBuf>,
    destination: PathBuf,
    watermark: Option<PathBuf>,
    watermark_position: WatermarkPosition,
    watermark_transparency: u8,
    watermark_size: Option<CanvasSize>,
    canvas: CanvasSize,
    resize_mode: ResizeMode,
    output_format: String,
    quality: Quality,
}

impl ExportJob {
    pub fn builder<I, P>(sources: I, destination: impl Into<PathBuf>) -> ExportJobBuilder
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        ExportJobBuilder {
            job: ExportJob {
                sources: sources.into_iter().map(Into::into).collect(),
                destination: destination.into(),
                watermark: None,
                watermark_position: WatermarkPosition::default(),
                watermark_transparency: DEFAULT_TRANSPARENCY,
                watermark_size: None,
                canvas: DEFAULT_CANVAS,
                resize_mode: ResizeMode::default(),
                output_format: DEFAULT_FORMAT.to_owned(),
                quality: Quality::default(),
            },
        }
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn watermark(&self) -> Option<&Path> {
        self.watermark.as_deref()
    }

    pub fn watermark_position(&self) -> WatermarkPosition {
        self.watermark_position
    }

    /// Size the watermark is scaled to, `None` keeps its own size.
    pub fn watermark_size(&self) -> Option<CanvasSize> {
        self.watermark_size
    }

    /// 0 is opaque, 100 invisible.
    pub fn watermark_transparency(&self) -> u8 {
        self.watermark_transparency
    }

    pub fn canvas(&self) -> CanvasSize {
        self.canvas
    }

    pub fn resize_mode(&self) -> ResizeMode {
        self.resize_mode
    }

    /// File extension of the encoded pictures, lowercase without a dot.
    pub fn output_format(&self) -> &str {
        &self.output_format
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    /// The same job with the watermark dropped, for continuing after the
    /// watermark turned out to be unreadable.
    pub fn without_watermark(&self) -> ExportJob {
        ExportJob {
            watermark: None,
            ..self.clone()
        }
    }
}

pub struct ExportJobBuilder {
    job: ExportJob,
}

impl ExportJobBuilder {
    pub fn watermark(mut self, path: impl Into<PathBuf>) -> Self {
        self.job.watermark = Some(path.into());
        self
    }

    pub fn watermark_size(mut self, width: u32, height: u32) -> Self {
        self.job.watermark_size = Some(CanvasSize::new(width, height));
        self
    }

    pub fn watermark_position(mut self, position: WatermarkPosition) -> Self {
        self.job.watermark_position = position;
        self
    }

    pub fn watermark_transparency(mut self, percent: u8) -> Self {
        self.job.watermark_transparency = percent;
        self
    }

    pub fn canvas(mut self, width: u32, height: u32) -> Self {
        self.job.canvas = CanvasSize::new(width, height);
        self
    }

    pub fn resize_mode(mut self, mode: ResizeMode) -> Self {
        self.job.resize_mode = mode;
        self
    }

    pub fn output_format(mut self, format: &str) -> Self {
        self.job.output_format = normalize_format(format);
        self
    }

    pub fn quality(mut self, quality: Quality) -> Self {
        self.job.quality = quality;
        self
    }

    pub fn build(self) -> ExportJob {
        self.job
    }
}
