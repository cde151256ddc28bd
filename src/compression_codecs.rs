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

use crc::{Crc, CRC_32_ISO_HDLC};
use std::io::{self, ErrorKind, Read, Write};

use crate::codecs::deflate_codec::DeflateCodec;
use crate::codecs::store_codec::StoreCodec;
use crate::{Result, ZipError};

/// The crc32 flavour used by zip.
pub static ZIP_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// What a compression pass saw on its way through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamStats {
    pub crc32: u32,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Trait for valid compression codecs.
/// Compression codecs are used to compress and decompress data.
pub trait CompressionCodec: Sync + Send {
    /// Returns the int identifier for the compression codec.
    fn int_id(&self) -> u16;

    /// Compress everything `reader` yields into `writer`, reading at most
    /// `chunk_size` bytes at a time.
    fn compress_stream(
        &self,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
        chunk_size: usize,
    ) -> Result<StreamStats>;

    /// Expand a compressed stream, returns the number of bytes written.
    fn expand_stream(&self, reader: &mut dyn Read, writer: &mut dyn Write) -> Result<u64>;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.compress_stream(&mut &data[..], &mut out, data.len().max(1))?;
        Ok(out)
    }

    fn expand(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.expand_stream(&mut &data[..], &mut out)?;
        Ok(out)
    }
}

/// Codec able to expand entries stored with compression `method`.
pub fn codec_for_method(method: u16) -> Result<Box<dyn CompressionCodec>> {
    match method {
        0 => Ok(Box::new(StoreCodec)),
        8 => Ok(Box::new(DeflateCodec::default())),
        other => Err(ZipError::UnsupportedCompression(other)),
    }
}

/// Copy `reader` into `sink` in `chunk_size` pieces, returning the crc32 and
/// length of what was read.
pub(crate) fn pump(reader: &mut dyn Read, sink: &mut dyn Write, chunk_size: usize) -> io::Result<(u32, u64)> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut digest = ZIP_CRC.digest();
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        digest.update(&buf[..n]);
        sink.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok((digest.finalize(), total))
}

/// Passes writes through while counting them.
pub(crate) struct CountingWriter<W: Write> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        CountingWriter { inner, count: 0 }
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
