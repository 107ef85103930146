/*!
Bigtrack provides an API for reading and writing bigWig and bigBed files,
and for reading IGV TDF files.

The file format specification for bigWig and bigBed files is defined in
this paper: <https://doi.org/10.1093/bioinformatics/btq351>

## Reading

The entrypoints to reading bigWigs and bigBeds are [`BigWigRead::open`]
and [`BigBedRead::open`], respectively (or the `open_with` variants to
pick a file access strategy and prefetch level). Once constructed, the
chromosome list is available through `chroms`, and the main data through
`query`, which returns an `Iterator` of [`WigSection`]s or [`BedEntry`]s
consistent with the requested region. Pre-aggregated data is available
through `summarize` and `zoom_records`.

Readers are duplicated with `duplicate` to obtain independent cursors,
one per thread. TDF files are opened with [`tdf::TdfFile::open`].

## Writing

A [`BigWigWrite`] or [`BigBedWrite`] is created with `create_file` (or
`with_options` for compression, byte order and zoom tuning), then `write`
consumes a sorted slice of sections or entries together with a map of
chromosome sizes. The input is traversed twice: once to validate and
summarize, once to emit data; the zoom pyramid is appended in a post-pass.
*/

mod bbi;
mod error;
pub mod tdf;
pub mod utils;

pub use bbi::*;
pub use error::{Result, TrackError};
pub use utils::output::OrderedDataOutput;
pub use utils::rom::{Compression, RomAccess, RomBuffer, RomFile};
