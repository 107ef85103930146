/*!
Shared plumbing for writing bbi files: header reservation and backpatch,
chromosome id assignment, and the zoom pyramid post-pass.

Writing is synchronous and two-pass: the caller's in-memory input is
walked once to validate ordering and collect the summary, then again to
emit data blocks; the zoom pyramid re-walks the raw records once per
level.
*/
use std::collections::{BTreeMap, HashMap};
use std::io::{Seek, Write};

use byteordered::Endianness;

use crate::bbi::rtree::{RTreeIndex, RTreeLeaf};
use crate::bbi::{BigSummary, ChromInfo, ZoomLevel, ZoomRecord};
use crate::error::{Result, TrackError};
use crate::utils::output::OrderedDataOutput;
use crate::utils::rom::Compression;

/// The default block size used when writing a bbi file
pub const DEFAULT_BLOCK_SIZE: u32 = 256;
/// The default items per slot used when writing a bbi file
pub const DEFAULT_ITEMS_PER_SLOT: u32 = 1024;
/// The default number of zoom levels attempted when writing a bbi file
pub const DEFAULT_ZOOM_LEVELS: u32 = 8;

/// Options for writing to a bbi file
#[derive(Copy, Clone)]
pub struct BBIWriteOptions {
    pub compression: Compression,
    pub byte_order: Endianness,
    pub block_size: u32,
    pub items_per_slot: u32,
    pub zoom_level_count: u32,
}

impl Default for BBIWriteOptions {
    fn default() -> Self {
        BBIWriteOptions {
            compression: Compression::Deflate,
            byte_order: Endianness::native(),
            block_size: DEFAULT_BLOCK_SIZE,
            items_per_slot: DEFAULT_ITEMS_PER_SLOT,
            zoom_level_count: DEFAULT_ZOOM_LEVELS,
        }
    }
}

/// Reserves the fixed header, the zoom table and the total summary slot.
/// Returns the total summary offset.
pub(crate) fn reserve_header<W: Write + Seek>(
    out: &mut OrderedDataOutput<W>,
    zoom_slots: u32,
) -> Result<u64> {
    out.skip_bytes(64)?;
    out.skip_bytes(zoom_slots as usize * 24)?;
    let total_summary_offset = out.tell()?;
    out.skip_bytes(40)?;
    Ok(total_summary_offset)
}

/// Backpatches the header, the zoom table, the total summary, and the
/// record count, then appends the trailing magic.
#[allow(clippy::too_many_arguments)]
pub(crate) fn write_header<W: Write + Seek>(
    out: &mut OrderedDataOutput<W>,
    magic: u32,
    version: u16,
    zoom_levels: &[ZoomLevel],
    chrom_tree_offset: u64,
    full_data_offset: u64,
    full_index_offset: u64,
    field_count: u16,
    defined_field_count: u16,
    total_summary_offset: u64,
    uncompress_buf_size: u32,
    total_summary: &BigSummary,
    record_count: u64,
) -> Result<()> {
    out.seek(0)?;
    out.write_u32(magic)?;
    out.write_u16(version)?;
    out.write_u16(zoom_levels.len() as u16)?;
    out.write_u64(chrom_tree_offset)?;
    out.write_u64(full_data_offset)?;
    out.write_u64(full_index_offset)?;
    out.write_u16(field_count)?;
    out.write_u16(defined_field_count)?;
    out.write_u64(0)?; // autoSql
    out.write_u64(total_summary_offset)?;
    out.write_u32(uncompress_buf_size)?;
    out.write_u64(0)?; // reserved
    for level in zoom_levels {
        out.write_u32(level.reduction)?;
        out.write_u32(0)?;
        out.write_u64(level.data_offset)?;
        out.write_u64(level.index_offset)?;
    }

    out.seek(total_summary_offset)?;
    if total_summary.count == 0 {
        out.skip_bytes(40)?;
    } else {
        out.write_u64(total_summary.count)?;
        out.write_f64(total_summary.min)?;
        out.write_f64(total_summary.max)?;
        out.write_f64(total_summary.sum)?;
        out.write_f64(total_summary.sum_squares)?;
    }

    out.seek(full_data_offset)?;
    out.write_u64(record_count)?;

    out.seek_end()?;
    out.write_u32(magic)?;
    Ok(())
}

/// Numbers the chromosomes in first-appearance order, resolving lengths
/// from `chrom_sizes`. Chromosome groups must be contiguous.
pub(crate) fn assign_chrom_ids<'a>(
    names: impl Iterator<Item = &'a str>,
    chrom_sizes: &HashMap<String, u32>,
) -> Result<Vec<ChromInfo>> {
    let mut chroms: Vec<ChromInfo> = Vec::new();
    let mut last: Option<&str> = None;
    for name in names {
        if last == Some(name) {
            continue;
        }
        if chroms.iter().any(|c| c.name == name) {
            return Err(TrackError::SortOrder(format!(
                "chromosome {} appears in more than one run",
                name
            )));
        }
        let length = *chrom_sizes
            .get(name)
            .ok_or_else(|| TrackError::NoSuchElement(name.to_owned()))?;
        chroms.push(ChromInfo {
            name: name.to_owned(),
            length,
            id: chroms.len() as u32,
        });
        last = Some(name);
    }
    Ok(chroms)
}

/// Aggregates `(chrom, start, end, value)` records into reduction-width
/// windows. Records may overlap (bed entries do), so windows are keyed
/// rather than built by adjacency.
fn reduce_records(
    records: impl Iterator<Item = (u32, u32, u32, f64)>,
    reduction: u32,
) -> Vec<ZoomRecord> {
    let mut windows: BTreeMap<(u32, u32), ZoomRecord> = BTreeMap::new();
    for (chrom, start, end, value) in records {
        let mut pos = start;
        while pos < end {
            let bin = pos / reduction;
            let bin_end = ((bin as u64 + 1) * reduction as u64).min(u32::MAX as u64) as u32;
            let piece_end = end.min(bin_end);
            let len = (piece_end - pos) as u64;
            let window = windows.entry((chrom, bin)).or_insert_with(|| ZoomRecord {
                chrom,
                start: pos,
                end: piece_end,
                summary: BigSummary::default(),
            });
            window.start = window.start.min(pos);
            window.end = window.end.max(piece_end);
            window.summary.update(value, len);
            pos = piece_end;
        }
    }
    windows.into_values().collect()
}

/// Appends the zoom pyramid. Each level aggregates the raw records into
/// windows of `reduction` bases, written as 32-byte records in blocks of
/// `items_per_slot`, each level indexed by its own tree.
pub(crate) fn build_zoom_levels<W, F, I>(
    out: &mut OrderedDataOutput<W>,
    options: &BBIWriteOptions,
    make_records: F,
    initial_reduction: u32,
    longest_chrom: u32,
    max_uncompressed: &mut u64,
) -> Result<Vec<ZoomLevel>>
where
    W: Write + Seek,
    F: Fn() -> I,
    I: Iterator<Item = (u32, u32, u32, f64)>,
{
    let mut zoom_levels = Vec::new();
    let reductions = std::iter::successors(Some(initial_reduction), |r| r.checked_mul(4))
        .take(options.zoom_level_count as usize);
    for reduction in reductions {
        if longest_chrom > 0 && reduction > longest_chrom {
            break;
        }
        let records = reduce_records(make_records(), reduction);
        if records.is_empty() {
            break;
        }

        let data_offset = out.tell()?;
        let mut leaves = Vec::with_capacity(records.len());
        for chunk in records.chunks(options.items_per_slot as usize) {
            let offset = out.tell()?;
            let len = out.with_block(options.compression, |block| {
                for record in chunk {
                    block.write_u32(record.chrom)?;
                    block.write_u32(record.start)?;
                    block.write_u32(record.end)?;
                    block.write_u32(record.summary.count.min(u32::MAX as u64) as u32)?;
                    block.write_f32(record.summary.min as f32)?;
                    block.write_f32(record.summary.max as f32)?;
                    block.write_f32(record.summary.sum as f32)?;
                    block.write_f32(record.summary.sum_squares as f32)?;
                }
                Ok(())
            })?;
            *max_uncompressed = (*max_uncompressed).max(len);
            let size = out.tell()? - offset;
            let (end_chrom_ix, end_base) = chunk
                .iter()
                .map(|r| (r.chrom, r.end))
                .max()
                .expect("chunks are never empty");
            leaves.push(RTreeLeaf {
                start_chrom_ix: chunk[0].chrom,
                start_base: chunk[0].start,
                end_chrom_ix,
                end_base,
                data_offset: offset,
                data_size: size,
            });
        }

        let index_offset = out.tell()?;
        RTreeIndex::write(
            out,
            &leaves,
            options.block_size,
            options.items_per_slot,
            index_offset,
            records.len() as u64,
        )?;
        zoom_levels.push(ZoomLevel {
            reduction,
            data_offset,
            index_offset,
        });
    }
    Ok(zoom_levels)
}

/// First-level reduction: ten times the mean record span, as whole bases.
pub(crate) fn initial_zoom_reduction(span_sum: u64, record_count: u64) -> u32 {
    if record_count == 0 {
        return 10;
    }
    let mean = (span_sum + record_count - 1) / record_count;
    (mean.max(1) as u32).saturating_mul(10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduction_bins_split_and_merge() {
        let records = vec![(0u32, 5u32, 25u32, 2.0f64), (0, 25, 30, 4.0)];
        let zoomed = reduce_records(records.into_iter(), 10);
        assert_eq!(zoomed.len(), 3);

        assert_eq!((zoomed[0].start, zoomed[0].end), (5, 10));
        assert_eq!(zoomed[0].summary.count, 5);

        assert_eq!((zoomed[1].start, zoomed[1].end), (10, 20));
        assert_eq!(zoomed[1].summary.count, 10);

        // Third window holds both the tail of the first record and the
        // whole second record.
        assert_eq!((zoomed[2].start, zoomed[2].end), (20, 30));
        assert_eq!(zoomed[2].summary.count, 10);
        assert_eq!(zoomed[2].summary.min, 2.0);
        assert_eq!(zoomed[2].summary.max, 4.0);
        assert!((zoomed[2].summary.sum - (2.0 * 5.0 + 4.0 * 5.0)).abs() < 1e-9);
    }

    #[test]
    fn chrom_ids_follow_first_appearance() {
        let sizes = HashMap::from([
            ("chr1".to_owned(), 1000u32),
            ("chr2".to_owned(), 2000),
            ("chrM".to_owned(), 16000),
        ]);
        let chroms =
            assign_chrom_ids(["chrM", "chrM", "chr1", "chr2"].into_iter(), &sizes).unwrap();
        let ids: Vec<(String, u32)> = chroms.iter().map(|c| (c.name.clone(), c.id)).collect();
        assert_eq!(
            ids,
            vec![
                ("chrM".to_owned(), 0),
                ("chr1".to_owned(), 1),
                ("chr2".to_owned(), 2)
            ]
        );
    }

    #[test]
    fn split_chromosome_runs_are_rejected() {
        let sizes = HashMap::from([("chr1".to_owned(), 1000u32), ("chr2".to_owned(), 2000)]);
        let err = assign_chrom_ids(["chr1", "chr2", "chr1"].into_iter(), &sizes).unwrap_err();
        assert!(matches!(err, TrackError::SortOrder(_)));
    }

    #[test]
    fn unknown_chromosomes_are_lookup_misses() {
        let sizes = HashMap::from([("chr1".to_owned(), 1000u32)]);
        let err = assign_chrom_ids(["chr9"].into_iter(), &sizes).unwrap_err();
        assert!(matches!(err, TrackError::NoSuchElement(name) if name == "chr9"));
    }
}
