pub(crate) mod bbiread;
pub(crate) mod bbiwrite;
pub(crate) mod bigbedread;
pub(crate) mod bigbedwrite;
pub(crate) mod bigwigread;
pub(crate) mod bigwigwrite;
pub(crate) mod bptree;
pub(crate) mod rtree;

pub(crate) const BIGWIG_MAGIC: u32 = 0x888F_FC26;
pub(crate) const BIGBED_MAGIC: u32 = 0x8789_F2EB;

pub(crate) const CIR_TREE_MAGIC: u32 = 0x2468_ACE0;
pub(crate) const CHROM_TREE_MAGIC: u32 = 0x78CA_8C91;

/// Only file headers are read eagerly when opening.
pub const PREFETCH_LEVEL_OFF: u8 = 0;
/// Chromosome and index tree headers are read when opening. The default.
pub const PREFETCH_LEVEL_FAST: u8 = 1;
/// Additionally materializes every internal index node in memory.
pub const PREFETCH_LEVEL_DETAILED: u8 = 2;

/// Info on a specific zoom level in a bbi file
#[derive(Copy, Clone, Debug)]
pub struct ZoomLevel {
    /// Number of base pairs summarized by one record at this level.
    pub reduction: u32,
    pub(crate) data_offset: u64,
    pub(crate) index_offset: u64,
}

/// A single pre-aggregated summary item from a zoom level
#[derive(Copy, Clone, Debug)]
pub struct ZoomRecord {
    pub(crate) chrom: u32,
    pub start: u32,
    pub end: u32,
    pub summary: BigSummary,
}

/// Running statistics over a region of values.
///
/// `count` is the number of bases covered. The no-data value is the monoid
/// identity, so summaries can be merged in any grouping.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BigSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub sum_squares: f64,
}

impl Default for BigSummary {
    fn default() -> Self {
        BigSummary {
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            sum_squares: 0.0,
        }
    }
}

impl BigSummary {
    /// Folds in `value` covering `bases` base pairs.
    pub fn update(&mut self, value: f64, bases: u64) {
        self.count += bases;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value * bases as f64;
        self.sum_squares += value * value * bases as f64;
    }

    pub fn merge(&mut self, other: &BigSummary) {
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.sum_squares += other.sum_squares;
    }

    /// Folds in `fraction` (in `0.0..=1.0`) of `other`, for records that
    /// only partially overlap a bin.
    pub(crate) fn merge_scaled(&mut self, other: &BigSummary, fraction: f64) {
        if fraction <= 0.0 || other.count == 0 {
            return;
        }
        self.count += (other.count as f64 * fraction).round() as u64;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum * fraction;
        self.sum_squares += other.sum_squares * fraction;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }
}

/// Information on a chromosome in a bbi file
#[derive(Clone, Debug)]
pub struct ChromInfo {
    pub name: String,
    pub length: u32,
    pub(crate) id: u32,
}

impl PartialEq for ChromInfo {
    fn eq(&self, other: &ChromInfo) -> bool {
        self.name == other.name
    }
}

/// A single entry in a bigBed file. `rest` holds the tab-separated
/// columns past the first three, and may be empty.
#[derive(Clone, Debug, PartialEq)]
pub struct BedEntry {
    pub chrom: String,
    pub start: u32,
    pub end: u32,
    pub rest: String,
}

pub(crate) const WIG_TYPE_BED_GRAPH: u8 = 1;
pub(crate) const WIG_TYPE_VARIABLE_STEP: u8 = 2;
pub(crate) const WIG_TYPE_FIXED_STEP: u8 = 3;

/// One section of wiggle data, in any of the three encodings.
///
/// Within a section the record intervals are sorted by start and do not
/// overlap; the writer rejects input violating this.
#[derive(Clone, Debug, PartialEq)]
pub enum WigSection {
    BedGraph {
        chrom: String,
        starts: Vec<u32>,
        ends: Vec<u32>,
        values: Vec<f32>,
    },
    VariableStep {
        chrom: String,
        span: u32,
        positions: Vec<u32>,
        values: Vec<f32>,
    },
    FixedStep {
        chrom: String,
        start: u32,
        step: u32,
        span: u32,
        values: Vec<f32>,
    },
}

impl WigSection {
    pub fn chrom(&self) -> &str {
        match self {
            WigSection::BedGraph { chrom, .. } => chrom,
            WigSection::VariableStep { chrom, .. } => chrom,
            WigSection::FixedStep { chrom, .. } => chrom,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            WigSection::BedGraph { values, .. } => values.len(),
            WigSection::VariableStep { values, .. } => values.len(),
            WigSection::FixedStep { values, .. } => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The first covered position.
    pub fn start(&self) -> u32 {
        match self {
            WigSection::BedGraph { starts, .. } => starts.first().copied().unwrap_or(0),
            WigSection::VariableStep { positions, .. } => positions.first().copied().unwrap_or(0),
            WigSection::FixedStep { start, .. } => *start,
        }
    }

    /// One past the last covered position.
    pub fn end(&self) -> u32 {
        match self {
            WigSection::BedGraph { ends, .. } => ends.last().copied().unwrap_or(0),
            WigSection::VariableStep {
                span, positions, ..
            } => positions.last().map(|p| p + span).unwrap_or(0),
            WigSection::FixedStep {
                start,
                step,
                span,
                values,
                ..
            } => {
                if values.is_empty() {
                    *start
                } else {
                    start + (values.len() as u32 - 1) * step + span
                }
            }
        }
    }

    /// Upper bound used when indexing this section. Fixed-step queries are
    /// judged on step-wide strides, so the bound must reach the end of the
    /// last stride even when `span < step`.
    pub(crate) fn index_end(&self) -> u32 {
        match self {
            WigSection::FixedStep {
                start,
                step,
                values,
                ..
            } if !values.is_empty() => self.end().max(start + values.len() as u32 * step),
            _ => self.end(),
        }
    }

    pub(crate) fn kind(&self) -> u8 {
        match self {
            WigSection::BedGraph { .. } => WIG_TYPE_BED_GRAPH,
            WigSection::VariableStep { .. } => WIG_TYPE_VARIABLE_STEP,
            WigSection::FixedStep { .. } => WIG_TYPE_FIXED_STEP,
        }
    }

    /// Iterates the section as `(start, end, value)` records, with ends
    /// derived from the span where the encoding leaves them implicit.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, f32)> + '_ {
        let items: Box<dyn Iterator<Item = (u32, u32, f32)> + '_> = match self {
            WigSection::BedGraph {
                starts,
                ends,
                values,
                ..
            } => Box::new(
                starts
                    .iter()
                    .zip(ends.iter())
                    .zip(values.iter())
                    .map(|((&s, &e), &v)| (s, e, v)),
            ),
            WigSection::VariableStep {
                span,
                positions,
                values,
                ..
            } => {
                let span = *span;
                Box::new(
                    positions
                        .iter()
                        .zip(values.iter())
                        .map(move |(&p, &v)| (p, p + span, v)),
                )
            }
            WigSection::FixedStep {
                start,
                step,
                span,
                values,
                ..
            } => {
                let (start, step, span) = (*start, *step, *span);
                Box::new(values.iter().enumerate().map(move |(i, &v)| {
                    let s = start + i as u32 * step;
                    (s, s + span, v)
                }))
            }
        };
        items
    }
}

/// The type of bbi file
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BBIFile {
    BigWig,
    BigBed,
}

/// Collapses `(chrom_ix, start, end)` intervals, ordered by chromosome and
/// start, into disjoint runs tagged with the number of intervals covering
/// each base. Overlapping features stack, so the run value is the depth of
/// coverage.
pub(crate) fn coverage_runs(
    intervals: impl Iterator<Item = (u32, u32, u32)>,
) -> Vec<(u32, u32, u32, f64)> {
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    // Emits a run at every depth change among the interval ends up to
    // `limit`, then one run for the still-open intervals reaching it.
    fn drain_until(
        active: &mut BinaryHeap<Reverse<u32>>,
        runs: &mut Vec<(u32, u32, u32, f64)>,
        chrom: u32,
        pos: &mut u32,
        limit: u32,
    ) {
        while let Some(&Reverse(end)) = active.peek() {
            if end > limit {
                break;
            }
            if *pos < end {
                runs.push((chrom, *pos, end, active.len() as f64));
                *pos = end;
            }
            active.pop();
        }
        if !active.is_empty() && *pos < limit {
            runs.push((chrom, *pos, limit, active.len() as f64));
            *pos = limit;
        }
    }

    let mut runs = Vec::new();
    let mut active = BinaryHeap::new();
    let mut chrom = 0;
    let mut pos = 0;
    for (interval_chrom, start, end) in intervals {
        if interval_chrom != chrom {
            drain_until(&mut active, &mut runs, chrom, &mut pos, u32::MAX);
            chrom = interval_chrom;
            pos = 0;
        }
        drain_until(&mut active, &mut runs, chrom, &mut pos, start);
        pos = pos.max(start);
        active.push(Reverse(end));
    }
    drain_until(&mut active, &mut runs, chrom, &mut pos, u32::MAX);
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coverage_runs_track_depth() {
        let runs = coverage_runs(vec![(0, 0, 60), (0, 40, 100), (1, 5, 10)].into_iter());
        assert_eq!(
            runs,
            vec![
                (0, 0, 40, 1.0),
                (0, 40, 60, 2.0),
                (0, 60, 100, 1.0),
                (1, 5, 10, 1.0)
            ]
        );
    }

    #[test]
    fn nested_intervals_raise_the_middle() {
        let runs = coverage_runs(vec![(0, 0, 100), (0, 20, 30)].into_iter());
        assert_eq!(
            runs,
            vec![(0, 0, 20, 1.0), (0, 20, 30, 2.0), (0, 30, 100, 1.0)]
        );
    }

    #[test]
    fn gaps_between_intervals_yield_nothing() {
        let runs = coverage_runs(vec![(0, 0, 10), (0, 20, 30)].into_iter());
        assert_eq!(runs, vec![(0, 0, 10, 1.0), (0, 20, 30, 1.0)]);
    }
}

pub use bbiread::{BBIFileInfo, BBIHeader};
pub use bbiwrite::BBIWriteOptions;
pub use bigbedread::BigBedRead;
pub use bigbedwrite::BigBedWrite;
pub use bigwigread::BigWigRead;
pub use bigwigwrite::BigWigWrite;
