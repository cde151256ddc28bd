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

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

use crate::compression_codecs::{pump, CompressionCodec, CountingWriter, StreamStats};
use crate::{Result, ZipError};

/// Raw (headerless) deflate, zip compression method 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeflateCodec {
    level: u32,
}

impl DeflateCodec {
    /// Level used for exported archives.
    pub const EXPORT_LEVEL: u32 = 4;

    pub fn new(level: u32) -> Result<Self> {
        if level > 9 {
            return Err(ZipError::InvalidCompressionLevel(level));
        }
        Ok(Self { level })
    }

    pub fn level(&self) -> u32 {
        self.level
    }
}

impl Default for DeflateCodec {
    fn default() -> Self {
        Self {
            level: Self::EXPORT_LEVEL,
        }
    }
}

impl CompressionCodec for DeflateCodec {
    fn int_id(&self) -> u16 {
        8
    }

    fn compress_stream(
        &self,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
        chunk_size: usize,
    ) -> Result<StreamStats> {
        let mut counter = CountingWriter::new(writer);
        let mut encoder = DeflateEncoder::new(&mut counter, Compression::new(self.level));
        let (crc32, bytes_in) = pump(reader, &mut encoder, chunk_size)?;
        encoder.finish()?;
        Ok(StreamStats {
            crc32,
            bytes_in,
            bytes_out: counter.count(),
        })
    }

    fn expand_stream(&self, reader: &mut dyn Read, writer: &mut dyn Write) -> Result<u64> {
        let mut decoder = DeflateDecoder::new(reader);
        Ok(io::copy(&mut decoder, writer)?)
    }
}
