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

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use std::io::{self, Write};
use std::time::SystemTime;

use neoncore::int_util::Endianness::LittleEndian;
use neoncore::int_util::StreamWriteInt;

use crate::{CD_SIG, EOCD_SIG, LFH_SIG};

/// General purpose flag: entry name and comment are UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

/// Describes a file in the zip archive.
#[derive(Debug, Clone)]
pub struct LocalFileHeader {
    /// The offset of the local file header in the file.
    pub offset: u64,
    /// The version of the zip format needed to extract the file.
    pub version: u16,
    /// The flags that are set for the file.
    pub flags: u16,
    /// The compression method used for the file.
    pub compression: u16,
    /// The last modified time of the file.
    pub last_mod_time: u16,
    /// The last modified date of the file.
    pub last_mod_date: u16,
    /// The crc32 checksum of the file.
    pub crc32: u32,
    /// The size of the file after compression.
    pub compressed_size: u32,
    /// The size of the file before compression.
    pub uncompressed_size: u32,
    /// The filename of the file.
    pub filename: String,
    /// The extra field of the file.
    pub extra_field: Vec<u8>,
    /// The offset of the file data in the file.
    pub data_offset: u64,
}

impl LocalFileHeader {
    pub const FIXED_LEN: u64 = 30;
    /// Position of the crc32 field, the two size fields follow it.
    pub const CRC_FIELD_OFFSET: u64 = 14;

    pub fn encoded_len(&self) -> u64 {
        Self::FIXED_LEN + self.filename.len() as u64 + self.extra_field.len() as u64
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_u32(LFH_SIG, LittleEndian)?;
        out.write_u16(self.version, LittleEndian)?;
        out.write_u16(self.flags, LittleEndian)?;
        out.write_u16(self.compression, LittleEndian)?;
        out.write_u16(self.last_mod_time, LittleEndian)?;
        out.write_u16(self.last_mod_date, LittleEndian)?;
        out.write_u32(self.crc32, LittleEndian)?;
        out.write_u32(self.compressed_size, LittleEndian)?;
        out.write_u32(self.uncompressed_size, LittleEndian)?;
        out.write_u16(self.filename.len() as u16, LittleEndian)?;
        out.write_u16(self.extra_field.len() as u16, LittleEndian)?;
        out.write_all(self.filename.as_bytes())?;
        out.write_all(&self.extra_field)
    }
}

/// Due to the way the zip format is designed, the central directory is
/// placed at the end of the file.
#[derive(Debug, Clone)]
pub struct CentralDirectory {
    pub offset: u64,
    pub version_made_by: u16,
    pub version_needed_to_extract: u16,
    pub flags: u16,
    pub compression: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub filename: String,
    pub extra_field: Vec<u8>,
    pub file_comment: Vec<u8>,
    pub disk_number_start: u16,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub local_header_rel_offset: u32,
    pub len: u64,
}

impl CentralDirectory {
    pub const FIXED_LEN: u64 = 46;

    /// Build the directory record for an entry whose local header has been
    /// completed (crc and sizes filled in).
    pub fn from_local(header: &LocalFileHeader, version_made_by: u16, external_file_attributes: u32) -> Self {
        let mut cd = CentralDirectory {
            offset: 0,
            version_made_by,
            version_needed_to_extract: header.version,
            flags: header.flags,
            compression: header.compression,
            last_mod_time: header.last_mod_time,
            last_mod_date: header.last_mod_date,
            crc32: header.crc32,
            compressed_size: header.compressed_size,
            uncompressed_size: header.uncompressed_size,
            filename: header.filename.clone(),
            extra_field: Vec::new(),
            file_comment: Vec::new(),
            disk_number_start: 0,
            internal_file_attributes: 0,
            external_file_attributes,
            local_header_rel_offset: header.offset as u32,
            len: 0,
        };
        cd.len = cd.encoded_len();
        cd
    }

    pub fn is_directory(&self) -> bool {
        self.filename.ends_with('/')
    }

    pub fn encoded_len(&self) -> u64 {
        Self::FIXED_LEN
            + self.filename.len() as u64
            + self.extra_field.len() as u64
            + self.file_comment.len() as u64
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_u32(CD_SIG, LittleEndian)?;
        out.write_u16(self.version_made_by, LittleEndian)?;
        out.write_u16(self.version_needed_to_extract, LittleEndian)?;
        out.write_u16(self.flags, LittleEndian)?;
        out.write_u16(self.compression, LittleEndian)?;
        out.write_u16(self.last_mod_time, LittleEndian)?;
        out.write_u16(self.last_mod_date, LittleEndian)?;
        out.write_u32(self.crc32, LittleEndian)?;
        out.write_u32(self.compressed_size, LittleEndian)?;
        out.write_u32(self.uncompressed_size, LittleEndian)?;
        out.write_u16(self.filename.len() as u16, LittleEndian)?;
        out.write_u16(self.extra_field.len() as u16, LittleEndian)?;
        out.write_u16(self.file_comment.len() as u16, LittleEndian)?;
        out.write_u16(self.disk_number_start, LittleEndian)?;
        out.write_u16(self.internal_file_attributes, LittleEndian)?;
        out.write_u32(self.external_file_attributes, LittleEndian)?;
        out.write_u32(self.local_header_rel_offset, LittleEndian)?;
        out.write_all(self.filename.as_bytes())?;
        out.write_all(&self.extra_field)?;
        out.write_all(&self.file_comment)
    }
}

/// Very last structure in a zip archive, it has information that
/// helps the reader find the central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub number_of_central_directory_records_on_this_disk: u16,
    pub total_number_of_central_directory_records: u16,
    pub size_of_central_directory: u32,
    pub offset_of_start_of_central_directory: u32,
    pub zip_file_comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    pub const FIXED_LEN: u64 = 22;

    /// Single-disk record for `records` entries.
    pub fn new(records: u16, size: u32, offset: u32) -> Self {
        EndOfCentralDirectory {
            disk_number: 0,
            disk_with_central_directory: 0,
            number_of_central_directory_records_on_this_disk: records,
            total_number_of_central_directory_records: records,
            size_of_central_directory: size,
            offset_of_start_of_central_directory: offset,
            zip_file_comment: Vec::new(),
        }
    }

    pub fn encoded_len(&self) -> u64 {
        Self::FIXED_LEN + self.zip_file_comment.len() as u64
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_u32(EOCD_SIG, LittleEndian)?;
        out.write_u16(self.disk_number, LittleEndian)?;
        out.write_u16(self.disk_with_central_directory, LittleEndian)?;
        out.write_u16(self.number_of_central_directory_records_on_this_disk, LittleEndian)?;
        out.write_u16(self.total_number_of_central_directory_records, LittleEndian)?;
        out.write_u32(self.size_of_central_directory, LittleEndian)?;
        out.write_u32(self.offset_of_start_of_central_directory, LittleEndian)?;
        out.write_u16(self.zip_file_comment.len() as u16, LittleEndian)?;
        out.write_all(&self.zip_file_comment)
    }
}

/// MS-DOS time and date words as stored in zip headers. The format covers
/// 1980-01-01 to 2107-12-31 with a two second resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00
    pub const MIN: DosDateTime = DosDateTime { time: 0, date: (1 << 5) | 1 };

    pub fn from_system_time(time: SystemTime) -> Self {
        let local: DateTime<Local> = time.into();
        Self::from_naive(&local.naive_local())
    }

    pub fn from_naive(dt: &NaiveDateTime) -> Self {
        let year = dt.year();
        if year < 1980 {
            return Self::MIN;
        }
        if year > 2107 {
            return DosDateTime {
                time: (23 << 11) | (59 << 5) | 29,
                date: (127 << 9) | (12 << 5) | 31,
            };
        }
        DosDateTime {
            time: ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2),
            date: (((year - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16,
        }
    }

    /// `None` for words that do not name a real date.
    pub fn to_naive(self) -> Option<NaiveDateTime> {
        let year = 1980 + (self.date >> 9) as i32;
        let month = ((self.date >> 5) & 0x0f) as u32;
        let day = (self.date & 0x1f) as u32;
        let hour = (self.time >> 11) as u32;
        let minute = ((self.time >> 5) & 0x3f) as u32;
        let second = ((self.time & 0x1f) * 2) as u32;
        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
    }
}
