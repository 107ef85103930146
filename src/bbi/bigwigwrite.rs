/*!
Provides the interface for writing bigWig files.

## Example
```rust,no_run
# use std::collections::HashMap;
# use std::error::Error;
# use std::path::PathBuf;
# use bigtrack::{BigWigWrite, WigSection};
# fn main() -> Result<(), Box<dyn Error>> {
// Set up the sections to write. Sections must be sorted by chromosome
// and start, and must not overlap.
let sections = vec![WigSection::FixedStep {
    chrom: "chr17".to_string(),
    start: 100,
    step: 10,
    span: 5,
    values: vec![1.0, 2.0, 3.0],
}];

// We need to know what the chromosome sizes are.
let mut chrom_map = HashMap::new();
chrom_map.insert("chr17".to_string(), 83257441);

// Finally, we can create a `BigWigWrite` and write.
let out = BigWigWrite::create_file(PathBuf::from("example.bigWig"));
out.write(&sections, &chrom_map)?;
# Ok(())
# }
```
*/
use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;

use itertools::Itertools;

use crate::bbi::bbiwrite::{
    assign_chrom_ids, build_zoom_levels, initial_zoom_reduction, reserve_header, write_header,
    BBIWriteOptions,
};
use crate::bbi::bptree::BPlusTree;
use crate::bbi::rtree::{RTreeIndex, RTreeLeaf};
use crate::bbi::{BigSummary, WigSection, BIGWIG_MAGIC};
use crate::error::{Result, TrackError};
use crate::utils::output::OrderedDataOutput;
use crate::utils::rom::Compression;

/// The struct used to write a bigWig file
pub struct BigWigWrite {
    pub path: PathBuf,
    pub options: BBIWriteOptions,
}

impl BigWigWrite {
    pub fn create_file(path: PathBuf) -> Self {
        BigWigWrite {
            path,
            options: BBIWriteOptions::default(),
        }
    }

    pub fn with_options(path: PathBuf, options: BBIWriteOptions) -> Self {
        BigWigWrite { path, options }
    }

    /// Writes `sections` as a bigWig. Each section becomes one data block.
    /// The zoom pyramid and the total summary are computed in a post-pass
    /// over the same input.
    pub fn write(&self, sections: &[WigSection], chrom_sizes: &HashMap<String, u32>) -> Result<()> {
        let options = self.options;
        let sections: Vec<&WigSection> = sections.iter().filter(|s| !s.is_empty()).collect();

        validate_sections(&sections)?;
        let chroms = assign_chrom_ids(sections.iter().map(|s| s.chrom()), chrom_sizes)?;
        let chrom_of: HashMap<&str, u32> = chroms.iter().map(|c| (c.name.as_str(), c.id)).collect();
        let longest_chrom = chroms.iter().map(|c| c.length).max().unwrap_or(0);

        let mut total_summary = BigSummary::default();
        let mut record_count = 0u64;
        let mut span_sum = 0u64;
        for section in &sections {
            for (start, end, value) in section.iter() {
                total_summary.update(value as f64, (end - start) as u64);
                span_sum += (end - start) as u64;
                record_count += 1;
            }
        }

        let keyed: Vec<(u32, &WigSection)> = sections
            .iter()
            .map(|s| (chrom_of[s.chrom()], *s))
            .collect();

        let mut out = OrderedDataOutput::create(&self.path, options.byte_order)?;
        let total_summary_offset = reserve_header(&mut out, options.zoom_level_count)?;

        let chrom_tree_offset = out.tell()?;
        BPlusTree::write(&mut out, &chroms, options.block_size)?;

        let full_data_offset = out.tell()?;
        out.skip_bytes(8)?;

        let mut max_uncompressed = 0u64;
        let mut leaves = Vec::with_capacity(keyed.len());
        for (chrom_ix, section) in &keyed {
            let offset = out.tell()?;
            let len = out.with_block(options.compression, |block| {
                encode_wig_section(block, section, *chrom_ix)
            })?;
            max_uncompressed = max_uncompressed.max(len);
            let size = out.tell()? - offset;
            leaves.push(RTreeLeaf {
                start_chrom_ix: *chrom_ix,
                start_base: section.start(),
                end_chrom_ix: *chrom_ix,
                end_base: section.index_end(),
                data_offset: offset,
                data_size: size,
            });
        }

        let full_index_offset = out.tell()?;
        RTreeIndex::write(
            &mut out,
            &leaves,
            options.block_size,
            1,
            full_index_offset,
            record_count,
        )?;

        let zoom_levels = build_zoom_levels(
            &mut out,
            &options,
            || {
                keyed.iter().flat_map(|(chrom_ix, section)| {
                    let chrom_ix = *chrom_ix;
                    section
                        .iter()
                        .map(move |(start, end, value)| (chrom_ix, start, end, value as f64))
                })
            },
            initial_zoom_reduction(span_sum, record_count),
            longest_chrom,
            &mut max_uncompressed,
        )?;

        let version = if options.compression == Compression::Snappy {
            5
        } else {
            4
        };
        let uncompress_buf_size = if options.compression == Compression::None {
            0
        } else {
            max_uncompressed as u32
        };
        write_header(
            &mut out,
            BIGWIG_MAGIC,
            version,
            &zoom_levels,
            chrom_tree_offset,
            full_data_offset,
            full_index_offset,
            0,
            0,
            total_summary_offset,
            uncompress_buf_size,
            &total_summary,
            record_count,
        )?;
        out.flush()
    }
}

fn validate_sections(sections: &[&WigSection]) -> Result<()> {
    for section in sections {
        match section {
            WigSection::BedGraph { starts, ends, values, .. } => {
                if starts.len() != values.len() || ends.len() != values.len() {
                    return Err(TrackError::SortOrder(
                        "bedGraph arrays differ in length".to_owned(),
                    ));
                }
                for ((&s0, &e0), &s1) in starts.iter().zip(ends.iter()).zip(starts.iter().skip(1)) {
                    if e0 <= s0 || s1 < e0 {
                        return Err(TrackError::SortOrder(format!(
                            "bedGraph records out of order on {}",
                            section.chrom()
                        )));
                    }
                }
                if let (Some(&s), Some(&e)) = (starts.last(), ends.last()) {
                    if e <= s {
                        return Err(TrackError::SortOrder(format!(
                            "bedGraph records out of order on {}",
                            section.chrom()
                        )));
                    }
                }
            }
            WigSection::VariableStep { span, positions, values, .. } => {
                if positions.len() != values.len() || *span == 0 {
                    return Err(TrackError::SortOrder(
                        "variable-step arrays differ in length or span is zero".to_owned(),
                    ));
                }
                for (&p0, &p1) in positions.iter().tuple_windows() {
                    if p1 < p0 + span {
                        return Err(TrackError::SortOrder(format!(
                            "variable-step records overlap on {}",
                            section.chrom()
                        )));
                    }
                }
            }
            WigSection::FixedStep { step, span, .. } => {
                if *step == 0 || *span == 0 || span > step {
                    return Err(TrackError::SortOrder(
                        "fixed-step span must be within a nonzero step".to_owned(),
                    ));
                }
            }
        }
        if section.len() > u16::MAX as usize {
            return Err(TrackError::Format("section with more than 65535 records"));
        }
    }

    for (a, b) in sections.iter().tuple_windows() {
        if a.chrom() == b.chrom() && b.start() < a.end() {
            return Err(TrackError::SortOrder(format!(
                "sections out of order or overlapping on {}",
                a.chrom()
            )));
        }
    }
    Ok(())
}

pub(crate) fn encode_wig_section(
    block: &mut OrderedDataOutput<Cursor<Vec<u8>>>,
    section: &WigSection,
    chrom_ix: u32,
) -> Result<()> {
    block.write_u32(chrom_ix)?;
    block.write_u32(section.start())?;
    block.write_u32(section.end())?;
    let (step, span) = match section {
        WigSection::BedGraph { .. } => (0, 0),
        WigSection::VariableStep { span, .. } => (0, *span),
        WigSection::FixedStep { step, span, .. } => (*step, *span),
    };
    block.write_u32(step)?;
    block.write_u32(span)?;
    block.write_u8(section.kind())?;
    block.write_u8(0)?;
    block.write_u16(section.len() as u16)?;

    match section {
        WigSection::BedGraph { starts, ends, values, .. } => {
            for ((&start, &end), &value) in starts.iter().zip(ends.iter()).zip(values.iter()) {
                block.write_u32(start)?;
                block.write_u32(end)?;
                block.write_f32(value)?;
            }
        }
        WigSection::VariableStep { positions, values, .. } => {
            for (&position, &value) in positions.iter().zip(values.iter()) {
                block.write_u32(position)?;
                block.write_f32(value)?;
            }
        }
        WigSection::FixedStep { values, .. } => {
            for &value in values {
                block.write_f32(value)?;
            }
        }
    }
    Ok(())
}
