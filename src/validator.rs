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

//! Checks run on an [`ExportJob`] before anything is written.

#[cfg(feature = "multi-thread")]
use rayon::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::job::{CanvasSize, ExportJob};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no files selected for export")]
    NoFiles,
    #[error("cannot read {}", .0.display())]
    SourceUnreadable(PathBuf),
    #[error("{} already exists", .0.display())]
    DestinationExists(PathBuf),
    #[error("cannot write to {}", .0.display())]
    DestinationNotWritable(PathBuf),
    #[error("cannot read watermark {}", .0.display())]
    WatermarkUnreadable(PathBuf),
    #[error("watermark is {width}x{height} pixels, larger than the {}x{} output", .canvas.width, .canvas.height)]
    WatermarkTooLarge {
        width: u32,
        height: u32,
        canvas: CanvasSize,
    },
    #[error("watermark transparency must be between 0 and 100 percent, got {0}")]
    TransparencyOutOfRange(u8),
}

impl ValidationError {
    /// The caller may go on without the watermark instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ValidationError::WatermarkUnreadable(_))
    }

    /// Reported but does not stop the export.
    pub fn is_soft(&self) -> bool {
        matches!(self, ValidationError::DestinationNotWritable(_))
    }
}

/// Outcome of a successful validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Soft findings, see [`ValidationError::is_soft`].
    pub warnings: Vec<ValidationError>,
}

/// Check `job` in a fixed order, stopping at the first hard failure.
pub fn validate(job: &ExportJob) -> Result<ValidationReport, ValidationError> {
    let mut report = ValidationReport::default();

    if job.sources().is_empty() {
        return Err(ValidationError::NoFiles);
    }

    if let Some(path) = first_unreadable(job.sources()) {
        return Err(ValidationError::SourceUnreadable(path.clone()));
    }

    let destination = job.destination();
    if fs::symlink_metadata(destination).is_ok() {
        return Err(ValidationError::DestinationExists(destination.to_path_buf()));
    }

    let dir = containing_dir(destination);
    if !is_writable_dir(dir) {
        warn!(directory = %dir.display(), "export destination does not look writable");
        report
            .warnings
            .push(ValidationError::DestinationNotWritable(dir.to_path_buf()));
    }

    if let Some(watermark) = job.watermark() {
        if !is_readable_file(watermark) {
            return Err(ValidationError::WatermarkUnreadable(watermark.to_path_buf()));
        }
        let native = image::image_dimensions(watermark)
            .map_err(|_| ValidationError::WatermarkUnreadable(watermark.to_path_buf()))?;
        let (width, height) = job
            .watermark_size()
            .map_or(native, |size| (size.width, size.height));
        let canvas = job.canvas();
        if !canvas.contains(width, height) {
            return Err(ValidationError::WatermarkTooLarge { width, height, canvas });
        }
    }

    if job.watermark_transparency() > 100 {
        return Err(ValidationError::TransparencyOutOfRange(job.watermark_transparency()));
    }

    debug!(files = job.sources().len(), warnings = report.warnings.len(), "export job is valid");
    Ok(report)
}

#[cfg(feature = "multi-thread")]
fn first_unreadable(sources: &[PathBuf]) -> Option<&PathBuf> {
    sources.par_iter().find_first(|path| !is_readable_file(path))
}

#[cfg(not(feature = "multi-thread"))]
fn first_unreadable(sources: &[PathBuf]) -> Option<&PathBuf> {
    sources.iter().find(|path| !is_readable_file(path))
}

fn is_readable_file(path: &Path) -> bool {
    match File::open(path) {
        Ok(file) => file.metadata().map(|m| m.is_file()).unwrap_or(false),
        Err(_) => false,
    }
}

fn containing_dir(destination: &Path) -> &Path {
    match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Permission bits lie for root and on network shares, so actually try to
/// create a file. The temporary file is removed when it goes out of scope.
fn is_writable_dir(dir: &Path) -> bool {
    dir.is_dir()
        && tempfile::Builder::new()
            .prefix(".pump-export-")
            .tempfile_in(dir)
            .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::tempdir;

    fn write_png(path: &Path, width: u32, height: u32) {
        RgbaImage::from_pixel(width, height, Rgba([255, 0, 0, 255]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn empty_job_is_no_files() {
        let job = ExportJob::builder(Vec::<PathBuf>::new(), "/does/not/matter.zip").build();
        assert_eq!(validate(&job), Err(ValidationError::NoFiles));
    }

    #[test]
    fn first_missing_source_is_reported() {
        let dir = tempdir().unwrap();
        let ok = dir.path().join("ok.png");
        fs::write(&ok, b"x").unwrap();
        let missing_a = dir.path().join("missing-a.png");
        let missing_b = dir.path().join("missing-b.png");
        let job = ExportJob::builder([&ok, &missing_a, &missing_b], dir.path().join("out.zip")).build();
        assert_eq!(validate(&job), Err(ValidationError::SourceUnreadable(missing_a)));
    }

    #[test]
    fn directories_are_not_sources() {
        let dir = tempdir().unwrap();
        let job = ExportJob::builder([dir.path()], dir.path().join("out.zip")).build();
        assert_eq!(
            validate(&job),
            Err(ValidationError::SourceUnreadable(dir.path().to_path_buf()))
        );
    }

    #[test]
    fn existing_destination_is_left_alone() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.png");
        fs::write(&src, b"x").unwrap();
        let dest = dir.path().join("out.zip");
        fs::write(&dest, b"precious").unwrap();

        let job = ExportJob::builder([&src], &dest).build();
        assert_eq!(validate(&job), Err(ValidationError::DestinationExists(dest.clone())));
        assert_eq!(fs::read(&dest).unwrap(), b"precious");
    }

    #[test]
    fn missing_destination_dir_is_only_a_warning() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.png");
        fs::write(&src, b"x").unwrap();
        let dest = dir.path().join("no-such-dir").join("out.zip");

        let report = validate(&ExportJob::builder([&src], &dest).build()).unwrap();
        assert_eq!(
            report.warnings,
            vec![ValidationError::DestinationNotWritable(dir.path().join("no-such-dir"))]
        );
        assert!(report.warnings[0].is_soft());
    }

    #[test]
    fn concurrent_checks_of_one_directory_agree() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.png");
        fs::write(&src, b"x").unwrap();
        // A stale file from an earlier fixed-name check.
        fs::write(dir.path().join(format!(".pump-export-check-{}", std::process::id())), b"").unwrap();

        let checks: Vec<_> = (0..8)
            .map(|i| {
                let job = ExportJob::builder([&src], dir.path().join(format!("out-{i}.zip"))).build();
                std::thread::spawn(move || validate(&job))
            })
            .collect();
        for check in checks {
            assert_eq!(check.join().unwrap().unwrap().warnings, vec![]);
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn watermark_checks() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.png");
        fs::write(&src, b"x").unwrap();
        let dest = dir.path().join("out.zip");

        let missing = dir.path().join("mark.png");
        let job = ExportJob::builder([&src], &dest).watermark(&missing).build();
        let err = validate(&job).unwrap_err();
        assert_eq!(err, ValidationError::WatermarkUnreadable(missing.clone()));
        assert!(err.is_recoverable());
        assert!(validate(&job.without_watermark()).is_ok());

        let garbage = dir.path().join("garbage.png");
        fs::write(&garbage, b"not an image").unwrap();
        let job = ExportJob::builder([&src], &dest).watermark(&garbage).build();
        assert_eq!(validate(&job), Err(ValidationError::WatermarkUnreadable(garbage)));

        let mark = dir.path().join("real.png");
        write_png(&mark, 40, 30);
        let fits = ExportJob::builder([&src], &dest).watermark(&mark).canvas(40, 30).build();
        assert!(validate(&fits).is_ok());
        let scaled_down = ExportJob::builder([&src], &dest)
            .watermark(&mark)
            .watermark_size(20, 15)
            .canvas(20, 15)
            .build();
        assert!(validate(&scaled_down).is_ok());
        let scaled_up = ExportJob::builder([&src], &dest)
            .watermark(&mark)
            .watermark_size(80, 60)
            .canvas(40, 30)
            .build();
        assert_eq!(
            validate(&scaled_up),
            Err(ValidationError::WatermarkTooLarge {
                width: 80,
                height: 60,
                canvas: CanvasSize::new(40, 30),
            })
        );
        let too_small = ExportJob::builder([&src], &dest).watermark(&mark).canvas(40, 29).build();
        assert_eq!(
            validate(&too_small),
            Err(ValidationError::WatermarkTooLarge {
                width: 40,
                height: 30,
                canvas: CanvasSize::new(40, 29),
            })
        );
    }

    #[test]
    fn transparency_is_a_percentage() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.png");
        fs::write(&src, b"x").unwrap();
        let job = ExportJob::builder([&src], dir.path().join("out.zip"))
            .watermark_transparency(101)
            .build();
        assert_eq!(validate(&job), Err(ValidationError::TransparencyOutOfRange(101)));
    }
}
