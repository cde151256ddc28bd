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

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use chrono::NaiveDateTime;
use neoncore::int_util::Endianness::LittleEndian;
use neoncore::int_util::StreamReadInt;

use crate::compression_codecs::{codec_for_method, ZIP_CRC};
use crate::structures::{CentralDirectory, DosDateTime, EndOfCentralDirectory, LocalFileHeader};
use crate::{Result, ZipError, CD_SIG, EOCD_SIG, LFH_SIG};

/// Central directory records in archive order.
#[derive(Debug, Clone, Default)]
pub struct ZipIndex(Vec<CentralDirectory>);

impl ZipIndex {
    pub fn new(entries: Vec<CentralDirectory>) -> Self {
        ZipIndex(entries)
    }

    pub fn files(&self) -> impl Iterator<Item = &CentralDirectory> {
        self.0.iter().filter(|info| !info.is_directory())
    }

    pub fn dirs(&self) -> impl Iterator<Item = &CentralDirectory> {
        self.0.iter().filter(|info| info.is_directory())
    }

    /// First entry called `name`. Names are not unique in a zip file.
    pub fn get(&self, name: &str) -> Option<&CentralDirectory> {
        self.0.iter().find(|info| info.filename == name)
    }

    pub fn push(&mut self, info: CentralDirectory) {
        self.0.push(info)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CentralDirectory> {
        self.0.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|info| info.filename.as_str())
    }

    pub fn into_entries(self) -> Vec<CentralDirectory> {
        self.0
    }
}

impl IntoIterator for ZipIndex {
    type Item = CentralDirectory;
    type IntoIter = std::vec::IntoIter<CentralDirectory>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ZipIndex {
    type Item = &'a CentralDirectory;
    type IntoIter = std::slice::Iter<'a, CentralDirectory>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

pub struct ZipReader<R: Read + Seek> {
    reader: BufReader<R>,
    eocd: EndOfCentralDirectory,
    index: ZipIndex,
}

#[derive(Debug, Clone)]
pub struct ZipEntryInfo {
    pub name: String,
    pub is_dir: bool,
    pub is_compressed: bool,
    pub size: u64,
    pub compressed_size: u64,
    pub crc32: u32,
    pub compression_method: u16,
    pub last_modified: Option<NaiveDateTime>,
    pub comment: Option<String>,
    pub offset: u64,
}

impl ZipEntryInfo {
    pub(crate) fn from_central_dir(entry: &CentralDirectory) -> Self {
        ZipEntryInfo {
            name: entry.filename.clone(),
            is_dir: entry.is_directory(),
            is_compressed: entry.compression != 0,
            size: entry.uncompressed_size as u64,
            compressed_size: entry.compressed_size as u64,
            crc32: entry.crc32,
            compression_method: entry.compression,
            last_modified: DosDateTime {
                time: entry.last_mod_time,
                date: entry.last_mod_date,
            }
            .to_naive(),
            comment: if entry.file_comment.is_empty() {
                None
            } else {
                Some(String::from_utf8_lossy(&entry.file_comment).into_owned())
            },
            offset: entry.local_header_rel_offset as u64,
        }
    }
}

/// Locate the end of central directory record by scanning backwards from the
/// end of the stream. The record is at most a 64 KiB comment away from the
/// end, and scanning from the back keeps signature look-alikes inside
/// compressed data from being picked up.
pub fn find_eocd<R: Read + Seek>(reader: &mut R) -> Result<(u64, EndOfCentralDirectory)> {
    use neoncore::int_util::SliceReadInt;

    let len = reader.seek(SeekFrom::End(0))?;
    let fixed = EndOfCentralDirectory::FIXED_LEN;
    if len < fixed {
        return Err(ZipError::EndOfCentralDirectoryNotFound);
    }
    let window = len.min(fixed + u16::MAX as u64);
    let start = len - window;
    reader.seek(SeekFrom::Start(start))?;
    let tail = read_bytes(reader, window as usize)?;
    let sig = EOCD_SIG.to_le_bytes();

    for pos in (0..=tail.len() - fixed as usize).rev() {
        if tail[pos..pos + 4] != sig {
            continue;
        }
        let comment_len = tail.read_u16(pos + 20, LittleEndian)? as usize;
        let comment_start = pos + fixed as usize;
        // A comment running past the end of the file means a look-alike.
        if comment_len > tail.len() - comment_start {
            continue;
        }
        let eocd = EndOfCentralDirectory {
            disk_number: tail.read_u16(pos + 4, LittleEndian)?,
            disk_with_central_directory: tail.read_u16(pos + 6, LittleEndian)?,
            number_of_central_directory_records_on_this_disk: tail.read_u16(pos + 8, LittleEndian)?,
            total_number_of_central_directory_records: tail.read_u16(pos + 10, LittleEndian)?,
            size_of_central_directory: tail.read_u32(pos + 12, LittleEndian)?,
            offset_of_start_of_central_directory: tail.read_u32(pos + 16, LittleEndian)?,
            zip_file_comment: tail[comment_start..comment_start + comment_len].to_vec(),
        };
        return Ok((start + pos as u64, eocd));
    }

    Err(ZipError::EndOfCentralDirectoryNotFound)
}

/// Read exactly `len` bytes into a fresh buffer.
fn read_bytes<R: Read>(data: &mut R, len: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    data.read_exact(&mut buf)?;
    Ok(buf)
}

/// Parse the central directory record at `offset`.
fn parse_central_dir<T: Read + Seek>(data: &mut T, offset: u64) -> Result<CentralDirectory> {
    data.seek(SeekFrom::Start(offset))?;
    let sig_candidate = data.read_u32(LittleEndian)?;
    if sig_candidate != CD_SIG {
        return Err(ZipError::InvalidSignature(sig_candidate));
    }

    let version_made_by = data.read_u16(LittleEndian)?;
    let version_needed_to_extract = data.read_u16(LittleEndian)?;
    let flags = data.read_u16(LittleEndian)?;
    let compression = data.read_u16(LittleEndian)?;
    let last_mod_time = data.read_u16(LittleEndian)?;
    let last_mod_date = data.read_u16(LittleEndian)?;
    let crc32 = data.read_u32(LittleEndian)?;
    let compressed_size = data.read_u32(LittleEndian)?;
    let uncompressed_size = data.read_u32(LittleEndian)?;
    // The lengths are stored here but the data is at the end of the structure.
    let fname_len = data.read_u16(LittleEndian)? as usize;
    let extra_len = data.read_u16(LittleEndian)? as usize;
    let comment_len = data.read_u16(LittleEndian)? as usize;
    let disk_number_start = data.read_u16(LittleEndian)?;
    let internal_file_attributes = data.read_u16(LittleEndian)?;
    let external_file_attributes = data.read_u32(LittleEndian)?;
    let relative_offset_of_local_header = data.read_u32(LittleEndian)?;
    let filename = String::from_utf8(read_bytes(data, fname_len)?)?;
    let extra_field = read_bytes(data, extra_len)?;
    let file_comment = read_bytes(data, comment_len)?;
    let len = data.stream_position()? - offset;

    Ok(CentralDirectory {
        offset,
        version_made_by,
        version_needed_to_extract,
        flags,
        compression,
        last_mod_time,
        last_mod_date,
        crc32,
        compressed_size,
        uncompressed_size,
        filename,
        extra_field,
        file_comment,
        disk_number_start,
        internal_file_attributes,
        external_file_attributes,
        local_header_rel_offset: relative_offset_of_local_header,
        len,
    })
}

/// Parse a local file header.
/// the offset is relative to the start of the file.
fn parse_header<T: Read + Seek>(data: &mut T, offset: u64) -> Result<LocalFileHeader> {
    data.seek(SeekFrom::Start(offset))?;

    let sig_candidate = match data.read_u32(LittleEndian) {
        Ok(sig) => sig,
        Err(e) => {
            return if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Err(ZipError::InvalidEntry(offset))
            } else {
                Err(ZipError::IOError(e))
            };
        }
    };

    if sig_candidate != LFH_SIG {
        return Err(ZipError::InvalidSignature(sig_candidate));
    }

    let version = data.read_u16(LittleEndian)?;
    let flags = data.read_u16(LittleEndian)?;
    let compression = data.read_u16(LittleEndian)?;
    let last_mod_time = data.read_u16(LittleEndian)?;
    let last_mod_date = data.read_u16(LittleEndian)?;
    // Zero here when bit 3 is set, the central directory has the real values.
    let crc32 = data.read_u32(LittleEndian)?;
    let compressed_size = data.read_u32(LittleEndian)?;
    let uncompressed_size = data.read_u32(LittleEndian)?;
    let fname_len = data.read_u16(LittleEndian)? as usize;
    let extra_len = data.read_u16(LittleEndian)? as usize;
    let filename = String::from_utf8(read_bytes(data, fname_len)?)?;
    let extra_field = read_bytes(data, extra_len)?;
    let data_offset = data.stream_position()?;

    Ok(LocalFileHeader {
        offset,
        version,
        flags,
        compression,
        last_mod_time,
        last_mod_date,
        crc32,
        compressed_size,
        uncompressed_size,
        filename,
        extra_field,
        data_offset,
    })
}

/// Read every central directory record announced by `eocd`, in archive order.
pub fn read_central_directory<R: Read + Seek>(
    reader: &mut R,
    eocd: &EndOfCentralDirectory,
) -> Result<ZipIndex> {
    let mut index = ZipIndex::default();
    let mut offset = eocd.offset_of_start_of_central_directory as u64;
    let end = offset + eocd.size_of_central_directory as u64;

    for _ in 0..eocd.total_number_of_central_directory_records {
        if offset >= end {
            return Err(ZipError::InvalidEntry(offset));
        }
        let header = parse_central_dir(reader, offset)?;
        offset += header.len;
        index.push(header);
    }

    Ok(index)
}

/// Dump the file as it's stored in the zip file.
pub fn dump_file<T: Read + Seek>(data: &mut T, cd: &CentralDirectory) -> Result<Vec<u8>> {
    let header = get_local_file_header(data, cd)?;
    data.seek(SeekFrom::Start(header.data_offset))?;
    Ok(read_bytes(data, cd.compressed_size as usize)?)
}

/// Get the local file header for a file from a central directory entry.
pub fn get_local_file_header<T: Read + Seek>(
    data: &mut T,
    cd: &CentralDirectory,
) -> Result<LocalFileHeader> {
    parse_header(data, cd.local_header_rel_offset as u64)
}

/// Decompress the entry described by `cd` into `writer`, verifying its crc32.
pub fn extract_entry<R: Read + Seek, W: std::io::Write>(
    reader: &mut R,
    cd: &CentralDirectory,
    writer: &mut W,
) -> Result<u64> {
    let codec = codec_for_method(cd.compression)?;
    let header = get_local_file_header(reader, cd)?;
    reader.seek(SeekFrom::Start(header.data_offset))?;

    let mut digest_writer = CrcWriter {
        inner: writer,
        digest: ZIP_CRC.digest(),
    };
    let mut stored = reader.by_ref().take(cd.compressed_size as u64);
    let written = codec.expand_stream(&mut stored, &mut digest_writer)?;
    let actual = digest_writer.digest.finalize();

    if actual != cd.crc32 || written != cd.uncompressed_size as u64 {
        return Err(ZipError::ChecksumMismatch {
            name: cd.filename.clone(),
            expected: cd.crc32,
            actual,
        });
    }
    Ok(written)
}

struct CrcWriter<'a, W: std::io::Write> {
    inner: &'a mut W,
    digest: crc::Digest<'static, u32>,
}

impl<W: std::io::Write> std::io::Write for CrcWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.digest.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Entry names become paths on extraction, only plain relative names pass.
fn safe_relative_path(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    if name.is_empty() || !path.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(ZipError::InvalidEntryName(name.to_owned()));
    }
    Ok(path.to_path_buf())
}

impl ZipReader<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        ZipReader::new(File::open(path)?)
    }
}

impl<R: Read + Seek> ZipReader<R> {
    /// Read and index a ZIP archive.
    pub fn new(reader: R) -> Result<ZipReader<R>> {
        let mut reader = BufReader::new(reader);
        let (_, eocd) = find_eocd(&mut reader)?;
        let index = read_central_directory(&mut reader, &eocd)?;

        Ok(ZipReader { reader, eocd, index })
    }

    /// Get the index of the archive.
    pub fn index(&self) -> &ZipIndex {
        &self.index
    }

    pub fn end_of_central_directory(&self) -> &EndOfCentralDirectory {
        &self.eocd
    }

    fn entry(&self, name: &str) -> Result<CentralDirectory> {
        self.index
            .get(name)
            .cloned()
            .ok_or_else(|| ZipError::EntryNotFound(name.into()))
    }

    pub fn file_info(&self, name: &str) -> Result<ZipEntryInfo> {
        Ok(ZipEntryInfo::from_central_dir(&self.entry(name)?))
    }

    /// Dump a file from the archive, without decompressing it.
    pub fn dump_file(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self.entry(name)?;
        dump_file(&mut self.reader, &entry)
    }

    /// Decompress a file from the archive into memory.
    pub fn extract_file(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self.entry(name)?;
        let mut out = Vec::with_capacity(entry.uncompressed_size as usize);
        extract_entry(&mut self.reader, &entry, &mut out)?;
        Ok(out)
    }

    /// Extract all entries below `dir`. Existing files are never overwritten.
    pub fn extract_all_files<P: AsRef<Path>>(&mut self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        let entries = self.index.iter().cloned().collect::<Vec<_>>();

        for entry in entries {
            let dest = dir.join(safe_relative_path(&entry.filename)?);
            if entry.is_directory() {
                std::fs::create_dir_all(&dest)?;
                continue;
            }
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = File::options().write(true).create_new(true).open(&dest)?;
            extract_entry(&mut self.reader, &entry, &mut file)?;
        }

        Ok(())
    }
}
