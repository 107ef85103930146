/*!
Provides the interface for writing bigBed files.
*/
use std::collections::HashMap;
use std::path::PathBuf;

use itertools::Itertools;

use crate::bbi::bbiwrite::{
    assign_chrom_ids, build_zoom_levels, initial_zoom_reduction, reserve_header, write_header,
    BBIWriteOptions,
};
use crate::bbi::bptree::BPlusTree;
use crate::bbi::rtree::{RTreeIndex, RTreeLeaf};
use crate::bbi::{coverage_runs, BedEntry, BigSummary, BIGBED_MAGIC};
use crate::error::{Result, TrackError};
use crate::utils::output::OrderedDataOutput;
use crate::utils::rom::Compression;

/// The struct used to write a bigBed file
pub struct BigBedWrite {
    pub path: PathBuf,
    pub options: BBIWriteOptions,
}

impl BigBedWrite {
    pub fn create_file(path: PathBuf) -> Self {
        BigBedWrite {
            path,
            options: BBIWriteOptions::default(),
        }
    }

    pub fn with_options(path: PathBuf, options: BBIWriteOptions) -> Self {
        BigBedWrite { path, options }
    }

    /// Writes `entries` as a bigBed. Entries must be sorted by chromosome
    /// then start (they may overlap); runs of `items_per_slot` same-chrom
    /// entries share a data block.
    pub fn write(&self, entries: &[BedEntry], chrom_sizes: &HashMap<String, u32>) -> Result<()> {
        let options = self.options;

        for (a, b) in entries.iter().tuple_windows() {
            if a.chrom == b.chrom && b.start < a.start {
                return Err(TrackError::SortOrder(format!(
                    "entries out of order on {}",
                    a.chrom
                )));
            }
        }
        let chroms = assign_chrom_ids(entries.iter().map(|e| e.chrom.as_str()), chrom_sizes)?;
        let chrom_of: HashMap<&str, u32> = chroms.iter().map(|c| (c.name.as_str(), c.id)).collect();
        let longest_chrom = chroms.iter().map(|c| c.length).max().unwrap_or(0);

        let mut span_sum = 0u64;
        for entry in entries {
            if entry.end <= entry.start {
                return Err(TrackError::SortOrder(format!(
                    "empty entry on {} at {}",
                    entry.chrom, entry.start
                )));
            }
            span_sum += (entry.end - entry.start) as u64;
        }

        let keyed: Vec<(u32, &BedEntry)> = entries
            .iter()
            .map(|e| (chrom_of[e.chrom.as_str()], e))
            .collect();

        // Summaries store depth of coverage: each base counts the number
        // of entries stacked over it, not a flat one per entry.
        let runs = coverage_runs(keyed.iter().map(|(c, e)| (*c, e.start, e.end)));
        let mut total_summary = BigSummary::default();
        for &(_, run_start, run_end, depth) in &runs {
            total_summary.update(depth, (run_end - run_start) as u64);
        }

        let mut out = OrderedDataOutput::create(&self.path, options.byte_order)?;
        let total_summary_offset = reserve_header(&mut out, options.zoom_level_count)?;

        let chrom_tree_offset = out.tell()?;
        BPlusTree::write(&mut out, &chroms, options.block_size)?;

        let full_data_offset = out.tell()?;
        out.skip_bytes(8)?;

        let mut max_uncompressed = 0u64;
        let mut leaves = Vec::new();
        // One block per run of same-chromosome entries, capped at
        // items_per_slot.
        let mut block_start = 0;
        while block_start < keyed.len() {
            let chrom_ix = keyed[block_start].0;
            let block_end = keyed[block_start..]
                .iter()
                .take(options.items_per_slot as usize)
                .take_while(|(c, _)| *c == chrom_ix)
                .count()
                + block_start;
            let chunk = &keyed[block_start..block_end];

            let offset = out.tell()?;
            let len = out.with_block(options.compression, |block| {
                for (chrom_ix, entry) in chunk {
                    block.write_u32(*chrom_ix)?;
                    block.write_u32(entry.start)?;
                    block.write_u32(entry.end)?;
                    block.write_cstring(&entry.rest)?;
                }
                Ok(())
            })?;
            max_uncompressed = max_uncompressed.max(len);
            let size = out.tell()? - offset;
            leaves.push(RTreeLeaf {
                start_chrom_ix: chrom_ix,
                start_base: chunk[0].1.start,
                end_chrom_ix: chrom_ix,
                end_base: chunk
                    .iter()
                    .map(|(_, e)| e.end)
                    .max()
                    .expect("blocks are never empty"),
                data_offset: offset,
                data_size: size,
            });
            block_start = block_end;
        }

        let full_index_offset = out.tell()?;
        RTreeIndex::write(
            &mut out,
            &leaves,
            options.block_size,
            1,
            full_index_offset,
            entries.len() as u64,
        )?;

        let zoom_levels = build_zoom_levels(
            &mut out,
            &options,
            || runs.iter().copied(),
            initial_zoom_reduction(span_sum, entries.len() as u64),
            longest_chrom,
            &mut max_uncompressed,
        )?;

        let (field_count, defined_field_count) = match entries.first() {
            Some(first) if !first.rest.is_empty() => {
                (3 + first.rest.split('\t').count() as u16, 3)
            }
            Some(_) => (3, 3),
            None => (3, 3),
        };
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
            BIGBED_MAGIC,
            version,
            &zoom_levels,
            chrom_tree_offset,
            full_data_offset,
            full_index_offset,
            field_count,
            defined_field_count,
            total_summary_offset,
            uncompress_buf_size,
            &total_summary,
            entries.len() as u64,
        )?;
        out.flush()
    }
}
