/*!
Provides the interface for reading bigBed files.
*/
use std::path::Path;
use std::vec;

use crate::bbi::bbiread::{summarize_records, BBIFileInfo, BBIReader};
use crate::bbi::rtree::RTreeLeaf;
use crate::bbi::{
    coverage_runs, BBIFile, BedEntry, BigSummary, ChromInfo, ZoomRecord, PREFETCH_LEVEL_FAST,
};
use crate::error::Result;
use crate::utils::rom::{RomAccess, RomBuffer};

/// The struct used to read a bigBed file
pub struct BigBedRead {
    reader: BBIReader,
}

/// Yields the entries consistent with a query, block by block.
pub struct BedEntryIter<'a> {
    reader: &'a mut BBIReader,
    blocks: vec::IntoIter<RTreeLeaf>,
    entries: Option<vec::IntoIter<BedEntry>>,
    chrom: String,
    chrom_ix: u32,
    start: u32,
    end: u32,
    overlaps: bool,
}

impl Iterator for BedEntryIter<'_> {
    type Item = Result<BedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.entries {
                Some(entries) => match entries.next() {
                    Some(entry) => return Some(Ok(entry)),
                    None => self.entries = None,
                },
                None => {
                    let block = self.blocks.next()?;
                    let mut data = match self.reader.fetch_block(self.chrom_ix, &block) {
                        Ok(data) => data,
                        Err(e) => return Some(Err(e)),
                    };
                    match decode_bed_block(
                        &mut data,
                        &self.chrom,
                        self.chrom_ix,
                        self.start,
                        self.end,
                        self.overlaps,
                    ) {
                        Ok(entries) => self.entries = Some(entries.into_iter()),
                        Err(e) => return Some(Err(e)),
                    }
                }
            }
        }
    }
}

impl BigBedRead {
    /// Opens a bigBed with the default access strategy and prefetching.
    pub fn open(path: &Path) -> Result<BigBedRead> {
        BigBedRead::open_with(path, RomAccess::default(), PREFETCH_LEVEL_FAST)
    }

    pub fn open_with(path: &Path, access: RomAccess, prefetch: u8) -> Result<BigBedRead> {
        Ok(BigBedRead {
            reader: BBIReader::open(path, access, prefetch, BBIFile::BigBed)?,
        })
    }

    /// Get basic info about this bigBed
    pub fn info(&self) -> &BBIFileInfo {
        &self.reader.info
    }

    /// Gets the chromosomes present in this bigBed
    pub fn chroms(&self) -> &[ChromInfo] {
        &self.reader.info.chrom_info
    }

    /// An independent reader over the same file, with its own cursor and
    /// block cache.
    pub fn duplicate(&self) -> Result<BigBedRead> {
        Ok(BigBedRead {
            reader: self.reader.duplicate()?,
        })
    }

    /// For a given chromosome and range, returns an iterator over the
    /// consistent entries. With `overlaps`, entries intersecting the range
    /// are consistent; otherwise only entries fully contained in it are.
    pub fn query(
        &mut self,
        chrom: &str,
        start: u32,
        end: u32,
        overlaps: bool,
    ) -> Result<BedEntryIter<'_>> {
        let chrom_ix = self.reader.chrom_id(chrom)?;
        let blocks = self.reader.search_blocks(chrom_ix, start, end)?;
        Ok(BedEntryIter {
            reader: &mut self.reader,
            blocks: blocks.into_iter(),
            entries: None,
            chrom: chrom.to_owned(),
            chrom_ix,
            start,
            end,
            overlaps,
        })
    }

    /// The pre-aggregated coverage records of the zoom level with the
    /// given reduction, restricted to the query range.
    pub fn zoom_records(
        &mut self,
        chrom: &str,
        start: u32,
        end: u32,
        reduction: u32,
    ) -> Result<Vec<ZoomRecord>> {
        let chrom_ix = self.reader.chrom_id(chrom)?;
        self.reader.zoom_records(reduction, chrom_ix, start, end)
    }

    /// Summarizes coverage depth over `[start, end)` in `num_bins` equal
    /// bins. Each base contributes the number of entries stacked over it.
    pub fn summarize(
        &mut self,
        chrom: &str,
        start: u32,
        end: u32,
        num_bins: usize,
    ) -> Result<Vec<BigSummary>> {
        let chrom_ix = self.reader.chrom_id(chrom)?;
        let bin_width = if num_bins == 0 {
            0
        } else {
            (end.saturating_sub(start)) / num_bins as u32
        };
        if let Some(reduction) = self.reader.zoom_for(bin_width).map(|z| z.reduction) {
            let records = self.reader.zoom_records(reduction, chrom_ix, start, end)?;
            return Ok(summarize_records(
                records.into_iter().map(|r| (r.start, r.end, r.summary)),
                start,
                end,
                num_bins,
            ));
        }

        let mut intervals = Vec::new();
        for entry in self.query(chrom, start, end, true)? {
            let entry = entry?;
            intervals.push((chrom_ix, entry.start, entry.end));
        }
        let records = coverage_runs(intervals.into_iter()).into_iter().map(
            |(_, run_start, run_end, depth)| {
                let mut summary = BigSummary::default();
                summary.update(depth, (run_end - run_start) as u64);
                (run_start, run_end, summary)
            },
        );
        Ok(summarize_records(records, start, end, num_bins))
    }

    /// The whole-file summary from the header.
    pub fn total_summary(&self) -> Result<BigSummary> {
        self.reader.total_summary()
    }

    /// Total number of entries in the file.
    pub fn record_count(&self) -> Result<u64> {
        self.reader.record_count()
    }
}

/// Decodes the entries of one block that are consistent with the query.
/// Entries are sorted by `(chrom, start)` within a block, so decoding
/// stops at the first non-consistent entry after a consistent one.
fn decode_bed_block(
    data: &mut RomBuffer,
    chrom: &str,
    chrom_ix: u32,
    start: u32,
    end: u32,
    overlaps: bool,
) -> Result<Vec<BedEntry>> {
    let mut entries = Vec::new();
    while data.remaining() > 0 {
        let entry_chrom = data.get_u32()?;
        let entry_start = data.get_u32()?;
        let entry_end = data.get_u32()?;
        let rest = data.get_cstring()?;
        let consistent = entry_chrom == chrom_ix
            && if overlaps {
                entry_start < end && entry_end > start
            } else {
                entry_start >= start && entry_end <= end
            };
        if consistent {
            entries.push(BedEntry {
                chrom: chrom.to_owned(),
                start: entry_start,
                end: entry_end,
                rest,
            });
        } else if !entries.is_empty() {
            break;
        }
    }
    Ok(entries)
}
