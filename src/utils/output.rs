/*!
Byte-order-aware sequential writing of track files.

[`OrderedDataOutput`] wraps any `Write + Seek` sink with a fixed byte
order, a `tell`/`seek` pair for backpatching reserved regions, and a
scoped [`with_block`][OrderedDataOutput::with_block] that buffers writes
through an in-memory compressor and reports the uncompressed length so a
writer can maintain the per-file maximum.
*/
use std::fs::File;
use std::io::{BufWriter, Cursor, Seek, SeekFrom, Write};
use std::path::Path;

use byteordered::{Endian, Endianness};

use crate::error::Result;
use crate::utils::rom::Compression;

pub struct OrderedDataOutput<W: Write + Seek> {
    inner: W,
    order: Endianness,
}

impl OrderedDataOutput<BufWriter<File>> {
    pub fn create(path: &Path, order: Endianness) -> Result<Self> {
        let file = File::create(path)?;
        Ok(OrderedDataOutput {
            inner: BufWriter::new(file),
            order,
        })
    }
}

impl<W: Write + Seek> OrderedDataOutput<W> {
    pub fn new(inner: W, order: Endianness) -> Self {
        OrderedDataOutput { inner, order }
    }

    pub fn order(&self) -> Endianness {
        self.order
    }

    pub fn tell(&mut self) -> Result<u64> {
        Ok(self.inner.seek(SeekFrom::Current(0))?)
    }

    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn seek_end(&mut self) -> Result<u64> {
        Ok(self.inner.seek(SeekFrom::End(0))?)
    }

    /// Advances the position by `n` zero bytes, reserving space to be
    /// backpatched later.
    pub fn skip_bytes(&mut self, n: usize) -> Result<()> {
        const ZEROS: [u8; 256] = [0; 256];
        let mut left = n;
        while left > 0 {
            let chunk = left.min(ZEROS.len());
            self.inner.write_all(&ZEROS[..chunk])?;
            left -= chunk;
        }
        Ok(())
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.inner.write_all(&[v])?;
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        self.order.write_u16(&mut self.inner, v)?;
        Ok(())
    }

    pub fn write_i16(&mut self, v: i16) -> Result<()> {
        self.order.write_i16(&mut self.inner, v)?;
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.order.write_u32(&mut self.inner, v)?;
        Ok(())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        self.order.write_i32(&mut self.inner, v)?;
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.order.write_u64(&mut self.inner, v)?;
        Ok(())
    }

    pub fn write_i64(&mut self, v: i64) -> Result<()> {
        self.order.write_i64(&mut self.inner, v)?;
        Ok(())
    }

    pub fn write_f32(&mut self, v: f32) -> Result<()> {
        self.order.write_f32(&mut self.inner, v)?;
        Ok(())
    }

    pub fn write_f64(&mut self, v: f64) -> Result<()> {
        self.order.write_f64(&mut self.inner, v)?;
        Ok(())
    }

    /// Writes the string bytes followed by a NUL terminator.
    pub fn write_cstring(&mut self, s: &str) -> Result<()> {
        self.inner.write_all(s.as_bytes())?;
        self.inner.write_all(&[0])?;
        Ok(())
    }

    /// Runs `f` against an in-memory buffer, then appends the (possibly
    /// compressed) result here. Returns the uncompressed length.
    pub fn with_block<F>(&mut self, compression: Compression, f: F) -> Result<u64>
    where
        F: FnOnce(&mut OrderedDataOutput<Cursor<Vec<u8>>>) -> Result<()>,
    {
        let mut block = OrderedDataOutput::new(Cursor::new(Vec::new()), self.order);
        f(&mut block)?;
        let raw = block.inner.into_inner();
        let uncompressed_len = raw.len() as u64;
        match compression {
            Compression::None => self.inner.write_all(&raw)?,
            Compression::Deflate => {
                let mut encoder = flate2::write::ZlibEncoder::new(
                    &mut self.inner,
                    flate2::Compression::default(),
                );
                encoder.write_all(&raw)?;
                encoder.finish()?;
            }
            Compression::Snappy => {
                let compressed = snap::raw::Encoder::new()
                    .compress_vec(&raw)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                self.inner.write_all(&compressed)?;
            }
        }
        Ok(uncompressed_len)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
