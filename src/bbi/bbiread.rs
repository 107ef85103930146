/*!
Shared plumbing for reading bbi (bigWig/bigBed) files: byte-order
detection, the 64-byte header, the zoom table, chromosome resolution, and
block fetch with a single-slot decompression cache.
*/
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use byteordered::Endianness;
use log::debug;

use crate::bbi::bptree::BPlusTree;
use crate::bbi::rtree::{RTreeIndex, RTreeLeaf};
use crate::bbi::{
    BBIFile, BigSummary, ChromInfo, ZoomLevel, ZoomRecord, BIGBED_MAGIC, BIGWIG_MAGIC,
    PREFETCH_LEVEL_DETAILED, PREFETCH_LEVEL_FAST,
};
use crate::error::{Result, TrackError};
use crate::utils::rom::{Compression, RomAccess, RomBuffer, RomFile};

/// Header info for a bbi file
///
/// Note that info on internal properties like file offsets are not public.
/// Reading data is available through higher-level functions.
#[derive(Copy, Clone, Debug)]
pub struct BBIHeader {
    pub endianness: Endianness,
    pub version: u16,
    pub field_count: u16,
    pub defined_field_count: u16,

    pub(crate) chrom_tree_offset: u64,
    pub(crate) full_data_offset: u64,
    pub(crate) full_index_offset: u64,
    pub(crate) auto_sql_offset: u64,
    pub(crate) total_summary_offset: u64,
    pub(crate) uncompress_buf_size: u32,
}

/// Info on a bbi file
#[derive(Clone, Debug)]
pub struct BBIFileInfo {
    /// The type of the bbi file - either a bigBed or a bigWig
    pub filetype: BBIFile,
    /// Header info
    pub header: BBIHeader,
    /// Info on zooms in the bbi file, ascending by reduction
    pub zoom_levels: Vec<ZoomLevel>,
    /// The chromosomes the bbi file covers, in key order
    pub chrom_info: Vec<ChromInfo>,
}

/// Reader internals shared by the bigWig and bigBed front ends.
#[derive(Debug)]
pub(crate) struct BBIReader {
    pub(crate) rom: RomFile,
    pub(crate) info: BBIFileInfo,
    prefetch: u8,
    chrom_tree: BPlusTree,
    index: Option<RTreeIndex>,
    zoom_indexes: HashMap<u32, RTreeIndex>,
    last_block: Option<((u32, u64, u64), Arc<[u8]>)>,
}

fn guess_order(raw: [u8; 4], magic: u32) -> Option<Endianness> {
    if u32::from_be_bytes(raw) == magic {
        Some(Endianness::Big)
    } else if u32::from_le_bytes(raw) == magic {
        Some(Endianness::Little)
    } else {
        None
    }
}

impl BBIReader {
    pub(crate) fn open(
        path: &Path,
        access: RomAccess,
        prefetch: u8,
        filetype: BBIFile,
    ) -> Result<BBIReader> {
        let mut rom = RomFile::open(path, access, Endianness::Little)?;
        let magic = match filetype {
            BBIFile::BigWig => BIGWIG_MAGIC,
            BBIFile::BigBed => BIGBED_MAGIC,
        };

        let raw = rom.buffer()?.get_bytes(4)?;
        let endianness = guess_order([raw[0], raw[1], raw[2], raw[3]], magic)
            .ok_or(TrackError::BadSignature)?;
        rom.set_order(endianness);

        let mut buf = rom.buffer_at(4)?;
        let version = buf.get_u16()?;
        if !(3..=5).contains(&version) {
            return Err(TrackError::UnsupportedVersion(version));
        }
        let zoom_level_count = buf.get_u16()?;
        let chrom_tree_offset = buf.get_u64()?;
        let full_data_offset = buf.get_u64()?;
        let full_index_offset = buf.get_u64()?;
        let field_count = buf.get_u16()?;
        let defined_field_count = buf.get_u16()?;
        let auto_sql_offset = buf.get_u64()?;
        let total_summary_offset = buf.get_u64()?;
        let uncompress_buf_size = buf.get_u32()?;
        let _reserved = buf.get_u64()?;

        let mut zoom_levels = Vec::with_capacity(zoom_level_count as usize);
        for _ in 0..zoom_level_count {
            let reduction = buf.get_u32()?;
            let _reserved = buf.get_u32()?;
            let data_offset = buf.get_u64()?;
            let index_offset = buf.get_u64()?;
            zoom_levels.push(ZoomLevel {
                reduction,
                data_offset,
                index_offset,
            });
        }

        let chrom_tree = BPlusTree::read(&mut buf, chrom_tree_offset)?;
        let chrom_info = chrom_tree.traverse(&mut buf)?;

        let info = BBIFileInfo {
            filetype,
            header: BBIHeader {
                endianness,
                version,
                field_count,
                defined_field_count,
                chrom_tree_offset,
                full_data_offset,
                full_index_offset,
                auto_sql_offset,
                total_summary_offset,
                uncompress_buf_size,
            },
            zoom_levels,
            chrom_info,
        };

        let mut reader = BBIReader {
            rom,
            info,
            prefetch,
            chrom_tree,
            index: None,
            zoom_indexes: HashMap::new(),
            last_block: None,
        };
        if prefetch >= PREFETCH_LEVEL_FAST {
            reader.ensure_index()?;
        }
        Ok(reader)
    }

    /// An independent reader over the same file. The block cache is not
    /// shared between duplicates.
    pub(crate) fn duplicate(&self) -> Result<BBIReader> {
        Ok(BBIReader {
            rom: self.rom.duplicate()?,
            info: self.info.clone(),
            prefetch: self.prefetch,
            chrom_tree: self.chrom_tree.clone(),
            index: self.index.clone(),
            zoom_indexes: self.zoom_indexes.clone(),
            last_block: None,
        })
    }

    pub(crate) fn compression(&self) -> Compression {
        if self.info.header.uncompress_buf_size == 0 {
            Compression::None
        } else if self.info.header.version >= 5 {
            Compression::Snappy
        } else {
            Compression::Deflate
        }
    }

    /// Resolves a chromosome name through the B+ tree.
    pub(crate) fn chrom_id(&self, chrom_name: &str) -> Result<u32> {
        let mut buf = self.rom.buffer()?;
        match self.chrom_tree.find(&mut buf, chrom_name)? {
            Some((id, _length)) => Ok(id),
            None => Err(TrackError::NoSuchElement(chrom_name.to_owned())),
        }
    }

    fn ensure_index(&mut self) -> Result<()> {
        if self.index.is_none() {
            let mut buf = self.rom.buffer()?;
            let mut index = RTreeIndex::read(&mut buf, self.info.header.full_index_offset)?;
            if self.prefetch >= PREFETCH_LEVEL_DETAILED {
                index.prefetch(&mut buf)?;
            }
            self.index = Some(index);
        }
        Ok(())
    }

    /// The overlapping data blocks for a query, in on-disk order.
    pub(crate) fn search_blocks(
        &mut self,
        chrom_ix: u32,
        start: u32,
        end: u32,
    ) -> Result<Vec<RTreeLeaf>> {
        self.ensure_index()?;
        let mut buf = self.rom.buffer()?;
        let index = self.index.as_ref().expect("index loaded above");
        index.overlapping_blocks(&mut buf, chrom_ix, start, end)
    }

    /// The decompressed contents of one block. The most recent block is
    /// kept so query loops touching it repeatedly skip the decompression.
    pub(crate) fn fetch_block(&mut self, chrom_ix: u32, leaf: &RTreeLeaf) -> Result<RomBuffer> {
        let key = (chrom_ix, leaf.data_offset, leaf.data_size);
        if let Some((cached_key, data)) = &self.last_block {
            if *cached_key == key {
                debug!("block cache hit at offset {}", leaf.data_offset);
                return Ok(RomBuffer::from_bytes(data.clone(), self.rom.order()));
            }
        }
        let buf = self.rom.buffer()?.decompress(
            leaf.data_offset,
            leaf.data_size,
            self.compression(),
            self.info.header.uncompress_buf_size as usize,
        )?;
        let data = buf
            .mem_bytes()
            .expect("decompressed blocks are memory backed");
        self.last_block = Some((key, data));
        Ok(buf)
    }

    /// The whole-file summary stored in the header, or the identity for
    /// files written without one.
    pub(crate) fn total_summary(&self) -> Result<BigSummary> {
        let offset = self.info.header.total_summary_offset;
        if offset == 0 {
            return Ok(BigSummary::default());
        }
        let mut buf = self.rom.buffer_at(offset)?;
        let count = buf.get_u64()?;
        if count == 0 {
            // The slot is zeroed when nothing was summarized; hand back
            // the identity instead of the raw zeros.
            return Ok(BigSummary::default());
        }
        Ok(BigSummary {
            count,
            min: buf.get_f64()?,
            max: buf.get_f64()?,
            sum: buf.get_f64()?,
            sum_squares: buf.get_f64()?,
        })
    }

    /// Total number of records, stored ahead of the first data block.
    pub(crate) fn record_count(&self) -> Result<u64> {
        let mut buf = self.rom.buffer_at(self.info.header.full_data_offset)?;
        buf.get_u64()
    }

    /// The zoom level with the largest reduction not exceeding
    /// `desired_reduction`, or `None` meaning the unzoomed data.
    pub(crate) fn zoom_for(&self, desired_reduction: u32) -> Option<&ZoomLevel> {
        if desired_reduction < 2 {
            return None;
        }
        self.info
            .zoom_levels
            .iter()
            .filter(|z| z.reduction <= desired_reduction)
            .max_by_key(|z| z.reduction)
    }

    fn zoom_index(&mut self, reduction: u32) -> Result<&RTreeIndex> {
        if !self.zoom_indexes.contains_key(&reduction) {
            let level = self
                .info
                .zoom_levels
                .iter()
                .find(|z| z.reduction == reduction)
                .ok_or_else(|| TrackError::NoSuchElement(format!("zoom level {}", reduction)))?;
            let mut buf = self.rom.buffer()?;
            let mut index = RTreeIndex::read(&mut buf, level.index_offset)?;
            if self.prefetch >= PREFETCH_LEVEL_DETAILED {
                index.prefetch(&mut buf)?;
            }
            self.zoom_indexes.insert(reduction, index);
        }
        Ok(&self.zoom_indexes[&reduction])
    }

    /// Decodes the zoom records of one level overlapping the query.
    pub(crate) fn zoom_records(
        &mut self,
        reduction: u32,
        chrom_ix: u32,
        start: u32,
        end: u32,
    ) -> Result<Vec<ZoomRecord>> {
        let blocks = {
            let mut buf = self.rom.buffer()?;
            let index = self.zoom_index(reduction)?;
            index.overlapping_blocks(&mut buf, chrom_ix, start, end)?
        };

        let mut records = Vec::new();
        for block in blocks {
            let mut data = self.fetch_block(chrom_ix, &block)?;
            while data.remaining() >= 32 {
                let chrom = data.get_u32()?;
                let record_start = data.get_u32()?;
                let record_end = data.get_u32()?;
                let count = u64::from(data.get_u32()?);
                let min = f64::from(data.get_f32()?);
                let max = f64::from(data.get_f32()?);
                let sum = f64::from(data.get_f32()?);
                let sum_squares = f64::from(data.get_f32()?);
                if chrom == chrom_ix && record_start < end && record_end > start {
                    records.push(ZoomRecord {
                        chrom,
                        start: record_start,
                        end: record_end,
                        summary: BigSummary {
                            count,
                            min,
                            max,
                            sum,
                            sum_squares,
                        },
                    });
                }
            }
        }
        Ok(records)
    }
}

/// Distributes `(start, end, summary)` records over `num_bins` equal bins
/// covering `[start, end)`. A record overlapping several bins contributes
/// to each in proportion to the overlap.
pub(crate) fn summarize_records(
    records: impl Iterator<Item = (u32, u32, BigSummary)>,
    start: u32,
    end: u32,
    num_bins: usize,
) -> Vec<BigSummary> {
    let mut bins = vec![BigSummary::default(); num_bins];
    if end <= start || num_bins == 0 {
        return bins;
    }
    let width = (end - start) as f64 / num_bins as f64;

    for (record_start, record_end, summary) in records {
        if record_end <= record_start {
            continue;
        }
        let clip_start = record_start.max(start);
        let clip_end = record_end.min(end);
        if clip_start >= clip_end {
            continue;
        }
        let record_len = (record_end - record_start) as f64;
        let first_bin = ((clip_start - start) as f64 / width) as usize;
        for (i, bin) in bins.iter_mut().enumerate().skip(first_bin) {
            let bin_start = start as f64 + i as f64 * width;
            let bin_end = start as f64 + (i + 1) as f64 * width;
            if bin_start >= clip_end as f64 {
                break;
            }
            let overlap = (clip_end as f64).min(bin_end) - (clip_start as f64).max(bin_start);
            if overlap > 0.0 {
                bin.merge_scaled(&summary, overlap / record_len);
            }
        }
    }
    bins
}
