/*!
Provides the interface for reading bigWig files.

## Example
```rust,no_run
# use std::error::Error;
# use std::path::Path;
# use bigtrack::BigWigRead;
# fn main() -> Result<(), Box<dyn Error>> {
// First, we open a bigWig using a file name.
let mut bwread = BigWigRead::open(Path::new("example.bigWig"))?;

// Then, we could get the chromosomes and lengths
let chroms = bwread.chroms().to_vec();

// Or we can read data from an interval
for section in bwread.query(&chroms[0].name, 0, 1000, true)? {
    let section = section?;
    println!("{} values starting at {}", section.len(), section.start());
}
# Ok(())
# }
```
*/
use std::path::Path;
use std::vec;

use crate::bbi::bbiread::{summarize_records, BBIFileInfo, BBIReader};
use crate::bbi::rtree::RTreeLeaf;
use crate::bbi::{
    BBIFile, BigSummary, ChromInfo, WigSection, ZoomRecord, PREFETCH_LEVEL_FAST,
    WIG_TYPE_BED_GRAPH, WIG_TYPE_FIXED_STEP, WIG_TYPE_VARIABLE_STEP,
};
use crate::error::{Result, TrackError};
use crate::utils::rom::{RomAccess, RomBuffer};

/// The struct used to read a bigWig file
#[derive(Debug)]
pub struct BigWigRead {
    reader: BBIReader,
}

/// Yields one decoded [`WigSection`] per data block that holds records
/// consistent with the query.
#[derive(Debug)]
pub struct WigSectionIter<'a> {
    reader: &'a mut BBIReader,
    blocks: vec::IntoIter<RTreeLeaf>,
    chrom: String,
    chrom_ix: u32,
    start: u32,
    end: u32,
    overlaps: bool,
}

impl Iterator for WigSectionIter<'_> {
    type Item = Result<WigSection>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let block = self.blocks.next()?;
            let mut data = match self.reader.fetch_block(self.chrom_ix, &block) {
                Ok(data) => data,
                Err(e) => return Some(Err(e)),
            };
            match decode_wig_block(
                &mut data,
                &self.chrom,
                self.chrom_ix,
                self.start,
                self.end,
                self.overlaps,
            ) {
                Ok(Some(section)) => return Some(Ok(section)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl BigWigRead {
    /// Opens a bigWig with the default access strategy and prefetching.
    pub fn open(path: &Path) -> Result<BigWigRead> {
        BigWigRead::open_with(path, RomAccess::default(), PREFETCH_LEVEL_FAST)
    }

    pub fn open_with(path: &Path, access: RomAccess, prefetch: u8) -> Result<BigWigRead> {
        Ok(BigWigRead {
            reader: BBIReader::open(path, access, prefetch, BBIFile::BigWig)?,
        })
    }

    /// Get basic info about this bigWig
    pub fn info(&self) -> &BBIFileInfo {
        &self.reader.info
    }

    /// Gets the chromosomes present in this bigWig
    pub fn chroms(&self) -> &[ChromInfo] {
        &self.reader.info.chrom_info
    }

    /// An independent reader over the same file, with its own cursor and
    /// block cache.
    pub fn duplicate(&self) -> Result<BigWigRead> {
        Ok(BigWigRead {
            reader: self.reader.duplicate()?,
        })
    }

    /// For a given chromosome and range, returns an iterator of the
    /// sections with consistent records. With `overlaps`, records
    /// intersecting the range are consistent; otherwise only records fully
    /// contained in it are.
    pub fn query(
        &mut self,
        chrom: &str,
        start: u32,
        end: u32,
        overlaps: bool,
    ) -> Result<WigSectionIter<'_>> {
        let chrom_ix = self.reader.chrom_id(chrom)?;
        let blocks = self.reader.search_blocks(chrom_ix, start, end)?;
        Ok(WigSectionIter {
            reader: &mut self.reader,
            blocks: blocks.into_iter(),
            chrom: chrom.to_owned(),
            chrom_ix,
            start,
            end,
            overlaps,
        })
    }

    /// The pre-aggregated records of the zoom level with the given
    /// reduction, restricted to the query range.
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

    /// Summarizes `[start, end)` into `num_bins` equal bins, reading from
    /// the coarsest zoom level that still resolves the bins, or from the
    /// raw data when none does.
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

        let mut records = Vec::new();
        for section in self.query(chrom, start, end, true)? {
            for (record_start, record_end, value) in section?.iter() {
                let mut summary = BigSummary::default();
                summary.update(value as f64, (record_end - record_start) as u64);
                records.push((record_start, record_end, summary));
            }
        }
        Ok(summarize_records(records.into_iter(), start, end, num_bins))
    }

    /// The whole-file summary from the header.
    pub fn total_summary(&self) -> Result<BigSummary> {
        self.reader.total_summary()
    }

    /// Total number of value records in the file.
    pub fn record_count(&self) -> Result<u64> {
        self.reader.record_count()
    }

    /// The values between `start` and `end` as one `f32` per base.
    /// Positions with no data are `NAN`.
    pub fn values(&mut self, chrom: &str, start: u32, end: u32) -> Result<Vec<f32>> {
        let mut values = vec![f32::NAN; (end.saturating_sub(start)) as usize];
        let sections: Vec<WigSection> = self.query(chrom, start, end, true)?.collect::<Result<_>>()?;
        for section in sections {
            for (record_start, record_end, value) in section.iter() {
                let fill_start = record_start.max(start);
                let fill_end = record_end.min(end);
                if fill_start >= fill_end {
                    continue;
                }
                for slot in &mut values[(fill_start - start) as usize..(fill_end - start) as usize]
                {
                    *slot = value;
                }
            }
        }
        Ok(values)
    }
}

/// Decodes one block into a section holding the records consistent with
/// the query. Records are sorted by start within a block, so decoding
/// stops at the first non-consistent record after a consistent one.
fn decode_wig_block(
    data: &mut RomBuffer,
    chrom: &str,
    chrom_ix: u32,
    start: u32,
    end: u32,
    overlaps: bool,
) -> Result<Option<WigSection>> {
    let block_chrom = data.get_u32()?;
    let block_start = data.get_u32()?;
    let _block_end = data.get_u32()?;
    let step = data.get_u32()?;
    let span = data.get_u32()?;
    let kind = data.get_u8()?;
    let _reserved = data.get_u8()?;
    let count = data.get_u16()? as usize;

    if block_chrom != chrom_ix {
        return Ok(None);
    }

    match kind {
        WIG_TYPE_BED_GRAPH => {
            let mut starts = Vec::new();
            let mut ends = Vec::new();
            let mut values = Vec::new();
            for _ in 0..count {
                let record_start = data.get_u32()?;
                let record_end = data.get_u32()?;
                let value = data.get_f32()?;
                let consistent = if overlaps {
                    record_start < end && record_end > start
                } else {
                    record_start >= start && record_end <= end
                };
                if consistent {
                    starts.push(record_start);
                    ends.push(record_end);
                    values.push(value);
                } else if !values.is_empty() {
                    break;
                }
            }
            if values.is_empty() {
                return Ok(None);
            }
            Ok(Some(WigSection::BedGraph {
                chrom: chrom.to_owned(),
                starts,
                ends,
                values,
            }))
        }
        WIG_TYPE_VARIABLE_STEP => {
            let mut positions = Vec::new();
            let mut values = Vec::new();
            for _ in 0..count {
                let position = data.get_u32()?;
                let value = data.get_f32()?;
                let consistent = if overlaps {
                    position < end && position + span > start
                } else {
                    position >= start && position + span <= end
                };
                if consistent {
                    positions.push(position);
                    values.push(value);
                } else if !values.is_empty() {
                    break;
                }
            }
            if values.is_empty() {
                return Ok(None);
            }
            Ok(Some(WigSection::VariableStep {
                chrom: chrom.to_owned(),
                span,
                positions,
                values,
            }))
        }
        WIG_TYPE_FIXED_STEP => {
            if step == 0 {
                return Err(TrackError::Format("wig section header"));
            }
            // The consistency window is realigned to the step grid: down to
            // it when overlapping records count, up to it when only
            // contained records do.
            let margin = start % step;
            let shift: i64 = if margin == 0 {
                0
            } else if overlaps {
                -(margin as i64)
            } else {
                (step - margin) as i64
            };
            let aligned = (start as i64 + shift).max(block_start as i64) as u32;

            let mut section_start = 0;
            let mut values = Vec::new();
            for i in 0..count {
                let value = data.get_f32()?;
                let position = block_start + i as u32 * step;
                let consistent = if overlaps {
                    position < end && position + step > aligned
                } else {
                    position >= aligned && position + step <= end
                };
                if consistent {
                    if values.is_empty() {
                        section_start = position;
                    }
                    values.push(value);
                } else if !values.is_empty() {
                    break;
                }
            }
            if values.is_empty() {
                return Ok(None);
            }
            Ok(Some(WigSection::FixedStep {
                chrom: chrom.to_owned(),
                start: section_start,
                step,
                span,
                values,
            }))
        }
        _ => Err(TrackError::Format("wig section header")),
    }
}
