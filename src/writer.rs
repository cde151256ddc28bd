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

//! Incremental zip writer.
//!
//! Every call to [`ArchiveWriter::append`] leaves a complete, openable
//! archive on disk: the new entry is written where the previous central
//! directory started, and a fresh central directory follows it. An
//! [`ArchiveHandle`] that goes out of scope without being closed rewrites
//! the directory for the entries that were completed, so an interrupted
//! entry never leaves a corrupt file behind.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use neoncore::int_util::Endianness::LittleEndian;
use neoncore::int_util::StreamWriteInt;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::codecs::deflate_codec::DeflateCodec;
use crate::compression_codecs::CompressionCodec;
use crate::reader::{find_eocd, read_central_directory};
use crate::structures::{CentralDirectory, DosDateTime, EndOfCentralDirectory, LocalFileHeader, FLAG_UTF8};
use crate::ZipError;

/// Size of the pieces a source file is streamed through the compressor in.
pub const CHUNK_SIZE: usize = 64 * 1024;

const VERSION_NEEDED: u16 = 20;
/// Unix host, version 2.0 of the zip format, so extractors honour the permission bits.
const VERSION_MADE_BY: u16 = (3 << 8) | 20;
/// Regular file, rw-r--r--.
const REGULAR_FILE_ATTRIBUTES: u32 = 0o100644 << 16;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("cannot open {}: {source}", path.display())]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: ZipError,
    },
    #[error("writing to {} failed: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: ZipError,
    },
    #[error("cannot finalize {}: {source}", path.display())]
    CloseFailed {
        path: PathBuf,
        #[source]
        source: ZipError,
    },
}

impl ArchiveError {
    /// The file the failing operation was working on.
    pub fn path(&self) -> &Path {
        match self {
            ArchiveError::OpenFailed { path, .. }
            | ArchiveError::WriteFailed { path, .. }
            | ArchiveError::CloseFailed { path, .. } => path,
        }
    }

    fn open(path: &Path, source: impl Into<ZipError>) -> Self {
        ArchiveError::OpenFailed {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }

    fn write(path: &Path, source: impl Into<ZipError>) -> Self {
        ArchiveError::WriteFailed {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }

    fn close(path: &Path, source: impl Into<ZipError>) -> Self {
        ArchiveError::CloseFailed {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }
}

/// An archive open for appending.
///
/// Owns the file for as long as entries are being added. [`close`](Self::close)
/// writes the central directory; dropping the handle without closing it does
/// the same for every entry that was fully written.
pub struct ArchiveHandle {
    path: PathBuf,
    file: File,
    entries: Vec<CentralDirectory>,
    /// Where the next local header, or the central directory, goes.
    next_offset: u64,
    /// Entry count and directory offset of the last directory on disk.
    committed: (usize, u64),
    codec: DeflateCodec,
    chunk_size: usize,
    closed: bool,
}

impl ArchiveHandle {
    /// Create `path`, or reopen it and pick up its existing entries.
    pub fn open(path: &Path, codec: DeflateCodec, chunk_size: usize) -> Result<Self, ArchiveError> {
        let (file, entries, next_offset) = if path.exists() {
            let mut file = File::options()
                .read(true)
                .write(true)
                .open(path)
                .map_err(|e| ArchiveError::open(path, e))?;
            let (entries, cd_offset) = {
                let mut reader = BufReader::new(&mut file);
                let (_, eocd) = find_eocd(&mut reader).map_err(|e| ArchiveError::open(path, e))?;
                let index = read_central_directory(&mut reader, &eocd)
                    .map_err(|e| ArchiveError::open(path, e))?;
                (index.into_entries(), eocd.offset_of_start_of_central_directory as u64)
            };
            debug!(archive = %path.display(), entries = entries.len(), "reopened archive");
            (file, entries, cd_offset)
        } else {
            let file = File::options()
                .read(true)
                .write(true)
                .create_new(true)
                .open(path)
                .map_err(|e| ArchiveError::open(path, e))?;
            debug!(archive = %path.display(), "created archive");
            (file, Vec::new(), 0)
        };

        let entries_len = entries.len();
        Ok(ArchiveHandle {
            path: path.to_path_buf(),
            file,
            entries,
            next_offset,
            committed: (entries_len, next_offset),
            codec,
            chunk_size: chunk_size.max(1),
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of the entries in the archive, in order.
    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.filename.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add `source` as a new entry named by its file name.
    pub fn append_file(&mut self, source: &Path) -> Result<(), ArchiveError> {
        let (mut file, name, modified) = open_source(source)?;
        self.append_reader(&name, &mut file, modified)
    }

    /// Add everything `reader` yields as a new entry called `name`.
    pub fn append_reader(&mut self, name: &str, reader: &mut dyn Read, modified: SystemTime) -> Result<(), ArchiveError> {
        if self.entries.len() >= u16::MAX as usize {
            return Err(ArchiveError::write(&self.path, ZipError::Zip64Unsupported("too many entries")));
        }
        if name.len() > u16::MAX as usize {
            return Err(ArchiveError::write(&self.path, ZipError::InvalidEntryName(name.to_owned())));
        }
        check_offset(self.next_offset).map_err(|e| ArchiveError::write(&self.path, e))?;

        let dos = DosDateTime::from_system_time(modified);
        let mut header = LocalFileHeader {
            offset: self.next_offset,
            version: VERSION_NEEDED,
            flags: if name.is_ascii() { 0 } else { FLAG_UTF8 },
            compression: self.codec.int_id(),
            last_mod_time: dos.time,
            last_mod_date: dos.date,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            filename: name.to_owned(),
            extra_field: Vec::new(),
            data_offset: 0,
        };
        header.data_offset = header.offset + header.encoded_len();

        self.write_entry(&mut header, reader)
            .map_err(|e| ArchiveError::write(&self.path, e))?;

        debug!(
            archive = %self.path.display(),
            entry = name,
            size = header.uncompressed_size,
            compressed = header.compressed_size,
            "appended entry"
        );
        self.next_offset = header.data_offset + header.compressed_size as u64;
        self.entries
            .push(CentralDirectory::from_local(&header, VERSION_MADE_BY, REGULAR_FILE_ATTRIBUTES));
        Ok(())
    }

    /// Stream the entry, then go back and fill in the crc and sizes.
    fn write_entry(&mut self, header: &mut LocalFileHeader, reader: &mut dyn Read) -> crate::Result<()> {
        self.file.seek(SeekFrom::Start(header.offset))?;
        let mut out = BufWriter::new(&mut self.file);
        header.write_to(&mut out)?;
        let stats = self.codec.compress_stream(reader, &mut out, self.chunk_size)?;
        out.into_inner().map_err(|e| e.into_error())?;

        if stats.bytes_in > u32::MAX as u64 || stats.bytes_out > u32::MAX as u64 {
            return Err(ZipError::Zip64Unsupported("entry larger than 4 GiB"));
        }
        // The central directory starts right after this entry.
        check_offset(header.data_offset + stats.bytes_out)?;
        header.crc32 = stats.crc32;
        header.compressed_size = stats.bytes_out as u32;
        header.uncompressed_size = stats.bytes_in as u32;

        self.file
            .seek(SeekFrom::Start(header.offset + LocalFileHeader::CRC_FIELD_OFFSET))?;
        self.file.write_u32(header.crc32, LittleEndian)?;
        self.file.write_u32(header.compressed_size, LittleEndian)?;
        self.file.write_u32(header.uncompressed_size, LittleEndian)?;
        Ok(())
    }

    /// Write the central directory and end record after the last complete
    /// entry, then cut the file there.
    fn write_central_directory(&mut self) -> crate::Result<()> {
        check_offset(self.next_offset)?;
        self.file.seek(SeekFrom::Start(self.next_offset))?;
        let mut out = BufWriter::new(&mut self.file);
        let mut cd_size = 0u64;
        for entry in &self.entries {
            entry.write_to(&mut out)?;
            cd_size += entry.encoded_len();
        }
        let eocd = EndOfCentralDirectory::new(self.entries.len() as u16, cd_size as u32, self.next_offset as u32);
        eocd.write_to(&mut out)?;
        out.into_inner().map_err(|e| e.into_error())?;

        self.file.set_len(self.next_offset + cd_size + eocd.encoded_len())?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Write the directory for every entry. When that fails, the entries
    /// added since the last directory are given up and the previous
    /// directory is put back, so the file keeps opening as before.
    fn commit(&mut self) -> crate::Result<()> {
        match self.write_central_directory() {
            Ok(()) => {
                self.committed = (self.entries.len(), self.next_offset);
                Ok(())
            }
            Err(e) => {
                let (count, offset) = self.committed;
                warn!(
                    archive = %self.path.display(),
                    dropped = self.entries.len() - count,
                    "central directory write failed, restoring the previous one"
                );
                self.entries.truncate(count);
                self.next_offset = offset;
                if let Err(restore) = self.write_central_directory() {
                    error!(archive = %self.path.display(), error = %restore, "could not restore archive");
                }
                Err(e)
            }
        }
    }

    /// Finalize the archive and release the file.
    pub fn close(mut self) -> Result<(), ArchiveError> {
        let result = self.commit();
        self.closed = true;
        result.map_err(|e| ArchiveError::close(&self.path, e))
    }
}

/// Offsets past 4 GiB need zip64 records.
fn check_offset(offset: u64) -> crate::Result<()> {
    if offset > u32::MAX as u64 {
        return Err(ZipError::Zip64Unsupported("archive larger than 4 GiB"));
    }
    Ok(())
}

impl Drop for ArchiveHandle {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        match self.commit() {
            Ok(()) => warn!(
                archive = %self.path.display(),
                entries = self.entries.len(),
                "archive was not closed, recovered the completed entries"
            ),
            Err(e) => error!(
                archive = %self.path.display(),
                error = %e,
                "archive was not closed, kept {} entries",
                self.entries.len()
            ),
        }
    }
}

fn open_source(source: &Path) -> Result<(File, String, SystemTime), ArchiveError> {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ArchiveError::open(source, ZipError::InvalidEntryName(source.display().to_string())))?;
    let file = File::open(source).map_err(|e| ArchiveError::open(source, e))?;
    let meta = file.metadata().map_err(|e| ArchiveError::open(source, e))?;
    if !meta.is_file() {
        return Err(ArchiveError::open(source, ZipError::InvalidEntryName(name)));
    }
    let modified = meta.modified().unwrap_or_else(|_| SystemTime::now());
    Ok((file, name, modified))
}

/// Appends files to zip archives, one entry per call.
#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    codec: DeflateCodec,
    chunk_size: usize,
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        ArchiveWriter {
            codec: DeflateCodec::default(),
            chunk_size: CHUNK_SIZE,
        }
    }
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Open `archive` for a series of appends.
    pub fn open(&self, archive: &Path) -> Result<ArchiveHandle, ArchiveError> {
        ArchiveHandle::open(archive, self.codec, self.chunk_size)
    }

    /// Append `source` to `archive`, creating the archive on first use.
    pub fn append(&self, source: &Path, archive: &Path) -> Result<(), ArchiveError> {
        let (mut file, name, modified) = open_source(source)?;
        let mut handle = self.open(archive)?;
        handle.append_reader(&name, &mut file, modified)?;
        handle.close()
    }

    /// Append an in-memory entry, used for pictures rendered before archiving.
    pub fn append_bytes(&self, name: &str, bytes: &[u8], archive: &Path) -> Result<(), ArchiveError> {
        let mut handle = self.open(archive)?;
        handle.append_reader(name, &mut &bytes[..], SystemTime::now())?;
        handle.close()
    }

    /// Make sure `archive` exists as a valid, possibly empty, archive.
    pub fn ensure_exists(&self, archive: &Path) -> Result<(), ArchiveError> {
        if archive.exists() {
            return Ok(());
        }
        self.open(archive)?.close()
    }
}
