/*!
Random-access reading of track files.

A [`RomFile`] owns the backing storage for one on-disk file and hands out
[`RomBuffer`] cursors over it. A buffer has a fixed byte order, a current
position, and an exclusive upper bound; every typed `get_*` call advances
the position and fails with [`TrackError::Truncated`] rather than reading
past the bound. Buffers over the decompressed contents of a file region are
obtained with [`RomBuffer::decompress`].

The backing storage comes in four interchangeable flavors, selected with
[`RomAccess`]; all of them produce bit-identical data and differ only in
how they behave under concurrent readers.
*/
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use byteordered::{Endian, Endianness};
use memmap2::Mmap;

use crate::error::{Result, TrackError};

/// Per-block compression scheme of a track file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Compression {
    None,
    Deflate,
    Snappy,
}

/// How a [`RomFile`] accesses the underlying file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RomAccess {
    /// One file handle shared behind a mutex. Concurrent readers are
    /// serialized on the lock.
    Synchronized,
    /// One file handle per cursor; `duplicate` reopens the path. A single
    /// cursor must not be shared across threads without duplication.
    PerCursor,
    /// Positional reads over one shared descriptor. Concurrent readers
    /// proceed in parallel with no locking.
    ThreadSafe,
    /// The whole file is memory-mapped. Fastest random access.
    MemoryMap,
}

impl Default for RomAccess {
    fn default() -> Self {
        RomAccess::ThreadSafe
    }
}

#[derive(Debug)]
enum Backing {
    Synchronized { file: Arc<Mutex<File>>, len: u64 },
    PerCursor { path: PathBuf, file: Arc<Mutex<File>>, len: u64 },
    ThreadSafe { file: Arc<File>, len: u64 },
    Mmap(Arc<Mmap>),
    Mem(Arc<[u8]>),
}

impl Backing {
    fn open(path: &Path, access: RomAccess) -> Result<Backing> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(match access {
            RomAccess::Synchronized => Backing::Synchronized {
                file: Arc::new(Mutex::new(file)),
                len,
            },
            RomAccess::PerCursor => Backing::PerCursor {
                path: path.to_path_buf(),
                file: Arc::new(Mutex::new(file)),
                len,
            },
            RomAccess::ThreadSafe => Backing::ThreadSafe {
                file: Arc::new(file),
                len,
            },
            RomAccess::MemoryMap => {
                let map = unsafe { Mmap::map(&file)? };
                Backing::Mmap(Arc::new(map))
            }
        })
    }

    fn len(&self) -> u64 {
        match self {
            Backing::Synchronized { len, .. } => *len,
            Backing::PerCursor { len, .. } => *len,
            Backing::ThreadSafe { len, .. } => *len,
            Backing::Mmap(map) => map.len() as u64,
            Backing::Mem(data) => data.len() as u64,
        }
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        match self {
            Backing::Synchronized { file, .. } | Backing::PerCursor { file, .. } => {
                let mut file = file.lock().expect("rom handle lock poisoned");
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(buf)?;
            }
            Backing::ThreadSafe { file, .. } => {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::FileExt;
                    file.read_exact_at(buf, offset)?;
                }
                #[cfg(windows)]
                {
                    use std::os::windows::fs::FileExt;
                    let mut pos = offset;
                    let mut filled = 0;
                    while filled < buf.len() {
                        let n = file.seek_read(&mut buf[filled..], pos)?;
                        if n == 0 {
                            return Err(TrackError::Truncated);
                        }
                        pos += n as u64;
                        filled += n;
                    }
                }
            }
            Backing::Mmap(map) => {
                let end = offset as usize + buf.len();
                if end > map.len() {
                    return Err(TrackError::Truncated);
                }
                buf.copy_from_slice(&map[offset as usize..end]);
            }
            Backing::Mem(data) => {
                let end = offset as usize + buf.len();
                if end > data.len() {
                    return Err(TrackError::Truncated);
                }
                buf.copy_from_slice(&data[offset as usize..end]);
            }
        }
        Ok(())
    }

    fn duplicate(&self) -> Result<Backing> {
        Ok(match self {
            Backing::Synchronized { file, len } => Backing::Synchronized {
                file: file.clone(),
                len: *len,
            },
            Backing::PerCursor { path, len, .. } => Backing::PerCursor {
                path: path.clone(),
                file: Arc::new(Mutex::new(File::open(path)?)),
                len: *len,
            },
            Backing::ThreadSafe { file, len } => Backing::ThreadSafe {
                file: file.clone(),
                len: *len,
            },
            Backing::Mmap(map) => Backing::Mmap(map.clone()),
            Backing::Mem(data) => Backing::Mem(data.clone()),
        })
    }
}

/// Factory for [`RomBuffer`] cursors over one file.
#[derive(Debug)]
pub struct RomFile {
    backing: Backing,
    order: Endianness,
}

impl RomFile {
    pub fn open(path: &Path, access: RomAccess, order: Endianness) -> Result<RomFile> {
        Ok(RomFile {
            backing: Backing::open(path, access)?,
            order,
        })
    }

    pub fn len(&self) -> u64 {
        self.backing.len()
    }

    pub fn order(&self) -> Endianness {
        self.order
    }

    /// Sets the byte order of every buffer created afterwards. Used once the
    /// order has been guessed from a file's magic number.
    pub fn set_order(&mut self, order: Endianness) {
        self.order = order;
    }

    /// A cursor over the whole file, positioned at the start.
    pub fn buffer(&self) -> Result<RomBuffer> {
        self.buffer_at(0)
    }

    pub fn buffer_at(&self, offset: u64) -> Result<RomBuffer> {
        Ok(RomBuffer {
            backing: self.backing.duplicate()?,
            order: self.order,
            pos: offset,
            limit: self.backing.len(),
        })
    }

    /// An independent handle over the same file.
    pub fn duplicate(&self) -> Result<RomFile> {
        Ok(RomFile {
            backing: self.backing.duplicate()?,
            order: self.order,
        })
    }
}

/// A positioned, byte-order-aware view over a file region.
pub struct RomBuffer {
    backing: Backing,
    order: Endianness,
    pos: u64,
    limit: u64,
}

impl RomBuffer {
    /// A buffer over an in-memory byte sequence, e.g. a decompressed block.
    pub fn from_bytes(data: Arc<[u8]>, order: Endianness) -> RomBuffer {
        let limit = data.len() as u64;
        RomBuffer {
            backing: Backing::Mem(data),
            order,
            pos: 0,
            limit,
        }
    }

    pub fn order(&self) -> Endianness {
        self.order
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn set_position(&mut self, pos: u64) {
        self.pos = pos;
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.pos)
    }

    /// An independent cursor over the same data, at the same position.
    pub fn duplicate(&self) -> Result<RomBuffer> {
        Ok(RomBuffer {
            backing: self.backing.duplicate()?,
            order: self.order,
            pos: self.pos,
            limit: self.limit,
        })
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        if self.pos + N as u64 > self.limit {
            return Err(TrackError::Truncated);
        }
        let mut buf = [0u8; N];
        self.backing.read_at(self.pos, &mut buf)?;
        self.pos += N as u64;
        Ok(buf)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    pub fn get_i8(&mut self) -> Result<i8> {
        Ok(self.take::<1>()?[0] as i8)
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        let buf = self.take::<2>()?;
        Ok(self.order.read_u16(&buf[..])?)
    }

    pub fn get_i16(&mut self) -> Result<i16> {
        let buf = self.take::<2>()?;
        Ok(self.order.read_i16(&buf[..])?)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        let buf = self.take::<4>()?;
        Ok(self.order.read_u32(&buf[..])?)
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        let buf = self.take::<4>()?;
        Ok(self.order.read_i32(&buf[..])?)
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        let buf = self.take::<8>()?;
        Ok(self.order.read_u64(&buf[..])?)
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        let buf = self.take::<8>()?;
        Ok(self.order.read_i64(&buf[..])?)
    }

    pub fn get_f32(&mut self) -> Result<f32> {
        let buf = self.take::<4>()?;
        Ok(self.order.read_f32(&buf[..])?)
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        let buf = self.take::<8>()?;
        Ok(self.order.read_f64(&buf[..])?)
    }

    pub fn get_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        if self.pos + n as u64 > self.limit {
            return Err(TrackError::Truncated);
        }
        let mut buf = vec![0u8; n];
        self.backing.read_at(self.pos, &mut buf)?;
        self.pos += n as u64;
        Ok(buf)
    }

    /// Reads a NUL-terminated string. The terminator is consumed but not
    /// included in the result.
    pub fn get_cstring(&mut self) -> Result<String> {
        let mut bytes = Vec::new();
        loop {
            let b = self.get_u8()?;
            if b == 0 {
                break;
            }
            bytes.push(b);
        }
        String::from_utf8(bytes).map_err(|_| TrackError::Format("string data"))
    }

    pub fn get_ints(&mut self, n: usize) -> Result<Vec<i32>> {
        let raw = self.get_bytes(n * 4)?;
        let mut out = vec![0i32; n];
        match self.order {
            Endianness::Big => BigEndian::read_i32_into(&raw, &mut out),
            Endianness::Little => LittleEndian::read_i32_into(&raw, &mut out),
        }
        Ok(out)
    }

    pub fn get_floats(&mut self, n: usize) -> Result<Vec<f32>> {
        let raw = self.get_bytes(n * 4)?;
        let mut out = vec![0f32; n];
        match self.order {
            Endianness::Big => BigEndian::read_f32_into(&raw, &mut out),
            Endianness::Little => LittleEndian::read_f32_into(&raw, &mut out),
        }
        Ok(out)
    }

    pub fn skip(&mut self, n: u64) -> Result<()> {
        if self.pos + n > self.limit {
            return Err(TrackError::Truncated);
        }
        self.pos += n;
        Ok(())
    }

    /// Returns a fresh buffer over the decompressed contents of the file
    /// region `[offset, offset + size)`. `size_hint` is the expected
    /// decompressed length and is only used to presize the output.
    pub fn decompress(
        &self,
        offset: u64,
        size: u64,
        compression: Compression,
        size_hint: usize,
    ) -> Result<RomBuffer> {
        if offset + size > self.backing.len() {
            return Err(TrackError::Truncated);
        }
        let mut raw = vec![0u8; size as usize];
        self.backing.read_at(offset, &mut raw)?;
        let data: Vec<u8> = match compression {
            Compression::None => raw,
            Compression::Deflate => {
                let mut out = Vec::with_capacity(size_hint);
                flate2::read::ZlibDecoder::new(&raw[..]).read_to_end(&mut out)?;
                out
            }
            Compression::Snappy => snap::raw::Decoder::new()
                .decompress_vec(&raw)
                .map_err(|_| TrackError::Format("snappy block"))?,
        };
        Ok(RomBuffer::from_bytes(Arc::from(data), self.order))
    }

    /// The backing bytes, when this buffer is an in-memory block.
    pub(crate) fn mem_bytes(&self) -> Option<Arc<[u8]>> {
        match &self.backing {
            Backing::Mem(data) => Some(data.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch_file(data: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(data).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn access_strategies_agree() {
        let data: Vec<u8> = (0u16..512).map(|i| (i % 251) as u8).collect();
        let f = scratch_file(&data);

        let strategies = [
            RomAccess::Synchronized,
            RomAccess::PerCursor,
            RomAccess::ThreadSafe,
            RomAccess::MemoryMap,
        ];
        for access in strategies {
            let rom = RomFile::open(f.path(), access, Endianness::Little).unwrap();
            assert_eq!(rom.len(), 512);
            let mut buf = rom.buffer_at(10).unwrap();
            assert_eq!(buf.get_bytes(16).unwrap(), data[10..26].to_vec());
            let mut dup = buf.duplicate().unwrap();
            assert_eq!(buf.get_u32().unwrap(), dup.get_u32().unwrap());
        }
    }

    #[test]
    fn typed_reads_honor_byte_order() {
        let f = scratch_file(&[0x12, 0x34, 0x56, 0x78]);
        let rom = RomFile::open(f.path(), RomAccess::ThreadSafe, Endianness::Big).unwrap();
        assert_eq!(rom.buffer().unwrap().get_u32().unwrap(), 0x1234_5678);
        let mut little = rom.buffer().unwrap();
        little.order = Endianness::Little;
        assert_eq!(little.get_u32().unwrap(), 0x7856_3412);
    }

    #[test]
    fn read_past_limit_is_truncated() {
        let f = scratch_file(&[1, 2, 3]);
        let rom = RomFile::open(f.path(), RomAccess::MemoryMap, Endianness::Little).unwrap();
        let mut buf = rom.buffer().unwrap();
        assert!(matches!(buf.get_u32(), Err(TrackError::Truncated)));
        assert_eq!(buf.get_u8().unwrap(), 1);
    }

    #[test]
    fn cstring_and_bulk_reads() {
        let mut data = b"chr12\0".to_vec();
        data.extend_from_slice(&1i32.to_le_bytes());
        data.extend_from_slice(&(-7i32).to_le_bytes());
        data.extend_from_slice(&1.5f32.to_le_bytes());
        let f = scratch_file(&data);
        let rom = RomFile::open(f.path(), RomAccess::ThreadSafe, Endianness::Little).unwrap();
        let mut buf = rom.buffer().unwrap();
        assert_eq!(buf.get_cstring().unwrap(), "chr12");
        assert_eq!(buf.get_ints(2).unwrap(), vec![1, -7]);
        assert_eq!(buf.get_floats(1).unwrap(), vec![1.5]);
    }

    #[test]
    fn decompress_region_deflate_and_snappy() {
        use std::io::Write as _;
        let payload: Vec<u8> = (0u16..300).map(|i| (i % 7) as u8).collect();

        let mut z = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        z.write_all(&payload).unwrap();
        let deflated = z.finish().unwrap();

        let snapped = snap::raw::Encoder::new().compress_vec(&payload).unwrap();

        let mut data = vec![0xEEu8; 8];
        data.extend_from_slice(&deflated);
        let snappy_at = data.len() as u64;
        data.extend_from_slice(&snapped);
        let f = scratch_file(&data);
        let rom = RomFile::open(f.path(), RomAccess::ThreadSafe, Endianness::Little).unwrap();
        let buf = rom.buffer().unwrap();

        let mut inflated = buf
            .decompress(8, deflated.len() as u64, Compression::Deflate, payload.len())
            .unwrap();
        assert_eq!(inflated.get_bytes(payload.len()).unwrap(), payload);

        let mut unsnapped = buf
            .decompress(
                snappy_at,
                snapped.len() as u64,
                Compression::Snappy,
                payload.len(),
            )
            .unwrap();
        assert_eq!(unsnapped.get_bytes(payload.len()).unwrap(), payload);
    }
}
