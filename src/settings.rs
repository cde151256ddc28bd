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

//! Export dialog settings remembered between runs.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::job::{
    CanvasSize, ExportJob, Quality, ResizeMode, WatermarkPosition, DEFAULT_FORMAT,
    DEFAULT_TRANSPARENCY,
};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("no user configuration directory")]
    NoConfigDir,
    #[error("settings IO failed: {0}")]
    Io(#[from] io::Error),
    #[error("cannot parse settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("cannot serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub watermark: Option<PathBuf>,
    pub watermark_position: WatermarkPosition,
    pub watermark_transparency: u8,
    pub watermark_size: Option<CanvasSize>,
    pub canvas: CanvasSize,
    pub resize_mode: ResizeMode,
    pub output_format: String,
    pub quality: Quality,
    pub last_destination_dir: Option<PathBuf>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        ExportSettings {
            watermark: None,
            watermark_position: WatermarkPosition::default(),
            watermark_transparency: DEFAULT_TRANSPARENCY,
            watermark_size: None,
            canvas: CanvasSize::default(),
            resize_mode: ResizeMode::default(),
            output_format: DEFAULT_FORMAT.to_owned(),
            quality: Quality::default(),
            last_destination_dir: None,
        }
    }
}

impl ExportSettings {
    /// Returns the user settings file path, if a config directory is available.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("pump").join("export.toml"))
    }

    /// Loads settings from disk, falling back to defaults on any error.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        Self::load_from(&path).unwrap_or_else(|e| {
            debug!(path = %path.display(), "using default export settings: {e}");
            Self::default()
        })
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        let path = Self::config_path().ok_or(SettingsError::NoConfigDir)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// A job exporting `sources` into `destination` with these settings.
    pub fn job_for<I, P>(&self, sources: I, destination: impl Into<PathBuf>) -> ExportJob
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut builder = ExportJob::builder(sources, destination)
            .watermark_position(self.watermark_position)
            .watermark_transparency(self.watermark_transparency)
            .canvas(self.canvas.width, self.canvas.height)
            .resize_mode(self.resize_mode)
            .output_format(&self.output_format)
            .quality(self.quality);
        if let Some(size) = self.watermark_size {
            builder = builder.watermark_size(size.width, size.height);
        }
        if let Some(mark) = &self.watermark {
            builder = builder.watermark(mark);
        }
        builder.build()
    }

    /// Take over the parameters of `job` for the next export.
    pub fn remember(&mut self, job: &ExportJob) {
        self.watermark = job.watermark().map(Path::to_path_buf);
        self.watermark_position = job.watermark_position();
        self.watermark_transparency = job.watermark_transparency();
        self.watermark_size = job.watermark_size();
        self.canvas = job.canvas();
        self.resize_mode = job.resize_mode();
        self.output_format = job.output_format().to_owned();
        self.quality = job.quality();
        self.last_destination_dir = job
            .destination()
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_an_error_for_load_from() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            ExportSettings::load_from(&dir.path().join("none.toml")),
            Err(SettingsError::Io(_))
        ));
    }

    #[test]
    fn saved_settings_load_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("export.toml");
        let settings = ExportSettings {
            watermark: Some("/pics/mark.png".into()),
            watermark_position: WatermarkPosition::TopCentered,
            watermark_transparency: 15,
            watermark_size: Some(CanvasSize::new(64, 32)),
            canvas: CanvasSize::new(1920, 1080),
            resize_mode: ResizeMode::KeepAspectByExpanding,
            output_format: "png".to_owned(),
            quality: Quality::Unsmoothed,
            last_destination_dir: Some("/exports".into()),
        };
        settings.save_to(&path).unwrap();
        assert_eq!(ExportSettings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("export.toml");
        fs::write(&path, "watermark_position = \"top_left\"\n").unwrap();
        let settings = ExportSettings::load_from(&path).unwrap();
        assert_eq!(settings.watermark_position, WatermarkPosition::TopLeft);
        assert_eq!(settings.watermark_transparency, DEFAULT_TRANSPARENCY);
        assert_eq!(settings.output_format, "jpg");
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("export.toml");
        fs::write(&path, "canvas = 12").unwrap();
        assert!(matches!(ExportSettings::load_from(&path), Err(SettingsError::Parse(_))));
    }

    #[test]
    fn jobs_carry_the_settings_and_back() {
        let mut settings = ExportSettings {
            watermark: Some("mark.png".into()),
            watermark_size: Some(CanvasSize::new(32, 32)),
            canvas: CanvasSize::new(640, 480),
            ..ExportSettings::default()
        };
        let job = settings.job_for(["a.png"], "/out/pics.zip");
        assert_eq!(job.watermark(), Some(Path::new("mark.png")));
        assert_eq!(job.canvas(), CanvasSize::new(640, 480));
        assert_eq!(job.watermark_size(), Some(CanvasSize::new(32, 32)));
        assert_eq!(job.output_format(), "jpg");

        let other = ExportJob::builder(["b.png"], "/elsewhere/x.zip")
            .quality(Quality::Unsmoothed)
            .build();
        settings.remember(&other);
        assert_eq!(settings.watermark, None);
        assert_eq!(settings.watermark_size, None);
        assert_eq!(settings.quality, Quality::Unsmoothed);
        assert_eq!(settings.last_destination_dir, Some(PathBuf::from("/elsewhere")));
    }
}
