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

use std::io::{self, Read, Write};

use crate::compression_codecs::{pump, CompressionCodec, StreamStats};
use crate::Result;

/// No compression codec.
/// Just passes the data through as is, zip compression method 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreCodec;

impl CompressionCodec for StoreCodec {
    fn int_id(&self) -> u16 {
        0
    }

    fn compress_stream(
        &self,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
        chunk_size: usize,
    ) -> Result<StreamStats> {
        let (crc32, bytes_in) = pump(reader, writer, chunk_size)?;
        Ok(StreamStats {
            crc32,
            bytes_in,
            bytes_out: bytes_in,
        })
    }

    fn expand_stream(&self, reader: &mut dyn Read, writer: &mut dyn Write) -> Result<u64> {
        Ok(io::copy(reader, writer)?)
    }
}
