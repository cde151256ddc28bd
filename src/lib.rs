/*
   Zip file reader and writer, in pure Rust.
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

//! Export pipeline of "PuMP - Publish My Pictures".
//!
//! An [`ExportJob`] describes which pictures go into which zip archive. The
//! [`ExportWorker`] validates the job, runs each picture through a
//! [`Preprocessor`](render::Preprocessor) and appends the result to the
//! archive with the [`ArchiveWriter`], one deflate-compressed entry per file,
//! on a background thread.

use std::path::PathBuf;
use std::string::FromUtf8Error;
use thiserror::Error;

pub mod compression_codecs;
pub mod job;
pub mod reader;
pub mod render;
pub mod settings;
pub mod structures;
pub mod validator;
pub mod worker;
pub mod writer;

pub mod codecs {
    pub mod deflate_codec;
    pub mod store_codec;
}

pub use job::{CanvasSize, ExportJob, Quality, ResizeMode, WatermarkPosition};
pub use validator::{validate, ValidationError, ValidationReport};
pub use worker::{
    CancelToken, ExportError, ExportEvent, ExportProgress, ExportWorker, WorkerError, WorkerState,
};
pub use writer::{ArchiveError, ArchiveHandle, ArchiveWriter};

pub const EOCD_SIG: u32 = 0x06054b50;
pub const CD_SIG: u32 = 0x02014b50;
pub const LFH_SIG: u32 = 0x04034b50;

#[derive(Debug, Error)]
pub enum ZipError {
    #[error("IO exception: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid signature: {0:#010x}")]
    InvalidSignature(u32),
    #[error("Invalid zip file")]
    EndOfCentralDirectoryNotFound,
    #[error("Invalid entry in archive at offset {0}")]
    InvalidEntry(u64),
    #[error("Entry name is not valid UTF-8: {0}")]
    InvalidFileName(#[from] FromUtf8Error),
    #[error("Entry name cannot be used: {0:?}")]
    InvalidEntryName(String),
    #[error("No such entry: {}", .0.display())]
    EntryNotFound(PathBuf),
    #[error("Unsupported compression method: {0}")]
    UnsupportedCompression(u16),
    #[error("Invalid compression level: {0}")]
    InvalidCompressionLevel(u32),
    #[error("Checksum mismatch in {name}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },
    #[error("Zip64 is not supported: {0}")]
    Zip64Unsupported(&'static str),
}

impl PartialEq for ZipError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ZipError::IOError(a), ZipError::IOError(b)) => a.kind() == b.kind(),
            (ZipError::InvalidSignature(a), ZipError::InvalidSignature(b)) => a == b,
            (ZipError::EndOfCentralDirectoryNotFound, ZipError::EndOfCentralDirectoryNotFound) => true,
            (ZipError::InvalidEntry(a), ZipError::InvalidEntry(b)) => a == b,
            (ZipError::InvalidFileName(a), ZipError::InvalidFileName(b)) => a == b,
            (ZipError::InvalidEntryName(a), ZipError::InvalidEntryName(b)) => a == b,
            (ZipError::EntryNotFound(a), ZipError::EntryNotFound(b)) => a == b,
            (ZipError::UnsupportedCompression(a), ZipError::UnsupportedCompression(b)) => a == b,
            (ZipError::InvalidCompressionLevel(a), ZipError::InvalidCompressionLevel(b)) => a == b,
            (
                ZipError::ChecksumMismatch { name: a, expected: b, actual: c },
                ZipError::ChecksumMismatch { name: d, expected: e, actual: f },
            ) => a == d && b == e && c == f,
            (ZipError::Zip64Unsupported(a), ZipError::Zip64Unsupported(b)) => a == b,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ZipError>;
