use std::collections::HashMap;
use std::path::Path;

use byteordered::Endianness;

use bigtrack::{
    BBIWriteOptions, BigSummary, BigWigRead, BigWigWrite, Compression, RomAccess, TrackError,
    WigSection, PREFETCH_LEVEL_DETAILED, PREFETCH_LEVEL_OFF,
};

fn chrom_map(entries: &[(&str, u32)]) -> HashMap<String, u32> {
    entries.iter().map(|(n, l)| (n.to_string(), *l)).collect()
}

fn write_file(
    path: &Path,
    sections: &[WigSection],
    sizes: &HashMap<String, u32>,
    compression: Compression,
    byte_order: Endianness,
) {
    let options = BBIWriteOptions {
        compression,
        byte_order,
        ..Default::default()
    };
    BigWigWrite::with_options(path.to_path_buf(), options)
        .write(sections, sizes)
        .unwrap();
}

fn fixed(chrom: &str, start: u32, step: u32, span: u32, values: Vec<f32>) -> WigSection {
    WigSection::FixedStep {
        chrom: chrom.to_string(),
        start,
        step,
        span,
        values,
    }
}

#[test]
fn fixed_step_query_with_overlaps() {
    let tempfile = tempfile::NamedTempFile::new().unwrap();
    let sections = vec![fixed("chr1", 100, 10, 5, vec![1.0, 2.0, 3.0, 4.0])];
    let sizes = chrom_map(&[("chr1", 10000)]);
    write_file(tempfile.path(), &sections, &sizes, Compression::Snappy, Endianness::native());

    let mut read = BigWigRead::open(tempfile.path()).unwrap();
    assert_eq!(read.info().header.version, 5);

    let result: Vec<WigSection> = read
        .query("chr1", 105, 125, true)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        result,
        vec![fixed("chr1", 100, 10, 5, vec![1.0, 2.0, 3.0])]
    );
}

#[test]
fn fixed_step_query_with_containment() {
    let tempfile = tempfile::NamedTempFile::new().unwrap();
    let sections = vec![fixed("chr1", 100, 10, 5, vec![1.0, 2.0, 3.0, 4.0])];
    let sizes = chrom_map(&[("chr1", 10000)]);
    write_file(tempfile.path(), &sections, &sizes, Compression::Snappy, Endianness::native());

    let mut read = BigWigRead::open(tempfile.path()).unwrap();
    let result: Vec<WigSection> = read
        .query("chr1", 105, 125, false)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(result, vec![fixed("chr1", 110, 10, 5, vec![2.0])]);
}

#[test]
fn all_encodings_round_trip() {
    let tempfile = tempfile::NamedTempFile::new().unwrap();
    let sections = vec![
        WigSection::BedGraph {
            chrom: "chr1".to_string(),
            starts: vec![0, 20, 55],
            ends: vec![10, 30, 70],
            values: vec![0.5, -1.5, 3.25],
        },
        WigSection::VariableStep {
            chrom: "chr1".to_string(),
            span: 5,
            positions: vec![100, 110, 200],
            values: vec![1.0, 2.0, 3.0],
        },
        fixed("chr1", 300, 10, 10, vec![9.0, 8.0, 7.0]),
        fixed("chr2", 0, 1, 1, vec![4.0, 5.0]),
    ];
    let sizes = chrom_map(&[("chr1", 100000), ("chr2", 50000)]);
    write_file(tempfile.path(), &sections, &sizes, Compression::Deflate, Endianness::native());

    let mut read = BigWigRead::open(tempfile.path()).unwrap();
    let chroms = read.chroms().to_vec();
    assert_eq!(chroms.len(), 2);

    let mut result: Vec<WigSection> = read
        .query("chr1", 0, 100000, true)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let chr2: Vec<WigSection> = read
        .query("chr2", 0, 50000, true)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    result.extend(chr2);
    assert_eq!(result, sections);

    assert_eq!(read.record_count().unwrap(), 3 + 3 + 3 + 2);
}

#[test]
fn byte_order_invariance() {
    let sections = vec![
        WigSection::BedGraph {
            chrom: "chr1".to_string(),
            starts: vec![5, 50],
            ends: vec![25, 80],
            values: vec![1.25, -0.75],
        },
        fixed("chr1", 100, 10, 5, vec![1.0, 2.0, 3.0]),
    ];
    let sizes = chrom_map(&[("chr1", 1000)]);

    let big = tempfile::NamedTempFile::new().unwrap();
    let little = tempfile::NamedTempFile::new().unwrap();
    write_file(big.path(), &sections, &sizes, Compression::Deflate, Endianness::Big);
    write_file(little.path(), &sections, &sizes, Compression::Deflate, Endianness::Little);

    let mut read_big = BigWigRead::open(big.path()).unwrap();
    let mut read_little = BigWigRead::open(little.path()).unwrap();
    assert_eq!(read_big.info().header.endianness, Endianness::Big);
    assert_eq!(read_little.info().header.endianness, Endianness::Little);

    let from_big: Vec<WigSection> = read_big
        .query("chr1", 0, 1000, true)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let from_little: Vec<WigSection> = read_little
        .query("chr1", 0, 1000, true)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(from_big, from_little);
    assert_eq!(from_big, sections);
}

#[test]
fn access_strategies_yield_identical_results() {
    let tempfile = tempfile::NamedTempFile::new().unwrap();
    let sections: Vec<WigSection> = (0..20)
        .map(|i| fixed("chr1", i * 100, 10, 10, vec![i as f32; 8]))
        .collect();
    let sizes = chrom_map(&[("chr1", 10000)]);
    write_file(tempfile.path(), &sections, &sizes, Compression::Deflate, Endianness::native());

    let strategies = [
        (RomAccess::Synchronized, PREFETCH_LEVEL_OFF),
        (RomAccess::PerCursor, PREFETCH_LEVEL_OFF),
        (RomAccess::ThreadSafe, PREFETCH_LEVEL_DETAILED),
        (RomAccess::MemoryMap, PREFETCH_LEVEL_DETAILED),
    ];
    let mut all: Vec<Vec<WigSection>> = Vec::new();
    for (access, prefetch) in strategies {
        let mut read = BigWigRead::open_with(tempfile.path(), access, prefetch).unwrap();
        all.push(
            read.query("chr1", 250, 1750, true)
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap(),
        );
    }
    assert!(!all[0].is_empty());
    for other in &all[1..] {
        assert_eq!(&all[0], other);
    }
}

#[test]
fn duplicated_readers_are_independent() {
    let tempfile = tempfile::NamedTempFile::new().unwrap();
    let sections = vec![fixed("chr1", 0, 10, 10, vec![1.0; 50])];
    let sizes = chrom_map(&[("chr1", 1000)]);
    write_file(tempfile.path(), &sections, &sizes, Compression::Deflate, Endianness::native());

    let read = BigWigRead::open(tempfile.path()).unwrap();
    let mut dup = read.duplicate().unwrap();
    let result: Vec<WigSection> = dup
        .query("chr1", 0, 1000, true)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].len(), 50);
}

#[test]
fn summarize_constant_signal() {
    let tempfile = tempfile::NamedTempFile::new().unwrap();
    let sections = vec![fixed("chr1", 0, 1, 1, vec![2.0; 1000])];
    let sizes = chrom_map(&[("chr1", 1000)]);
    write_file(tempfile.path(), &sections, &sizes, Compression::Deflate, Endianness::native());

    let mut read = BigWigRead::open(tempfile.path()).unwrap();
    let bins = read.summarize("chr1", 0, 1000, 4).unwrap();
    assert_eq!(bins.len(), 4);
    for bin in &bins {
        assert_eq!(bin.count, 250);
        assert!((bin.sum - 500.0).abs() < 1e-3, "sum was {}", bin.sum);
        assert_eq!(bin.min, 2.0);
        assert_eq!(bin.max, 2.0);
    }

    // Refining the bins preserves the totals.
    for num_bins in [1, 2, 8] {
        let bins = read.summarize("chr1", 0, 1000, num_bins).unwrap();
        let count: u64 = bins.iter().map(|b| b.count).sum();
        let sum: f64 = bins.iter().map(|b| b.sum).sum();
        assert_eq!(count, 1000);
        assert!((sum - 2000.0).abs() < 1e-3);
    }

    let total = read.total_summary().unwrap();
    assert_eq!(total.count, 1000);
    assert!((total.sum - 2000.0).abs() < 1e-9);
    assert_eq!(total.min, 2.0);
    assert_eq!(total.max, 2.0);
    assert!((total.mean() - 2.0).abs() < 1e-12);
}

#[test]
fn zoom_levels_cover_large_input() {
    let tempfile = tempfile::NamedTempFile::new().unwrap();
    let sections: Vec<WigSection> = (0..50)
        .map(|i| fixed("chr1", i * 1000, 10, 10, vec![1.0; 100]))
        .collect();
    let sizes = chrom_map(&[("chr1", 1_000_000)]);
    write_file(tempfile.path(), &sections, &sizes, Compression::Deflate, Endianness::native());

    let mut read = BigWigRead::open(tempfile.path()).unwrap();
    let reductions: Vec<u32> = read.info().zoom_levels.iter().map(|z| z.reduction).collect();
    assert!(!reductions.is_empty());
    assert!(reductions.windows(2).all(|w| w[0] < w[1]));

    let records = read
        .zoom_records("chr1", 0, 50_000, reductions[0])
        .unwrap();
    assert!(!records.is_empty());
    let covered: u64 = records.iter().map(|r| r.summary.count).sum();
    assert_eq!(covered, 50 * 100 * 10);
}

#[test]
fn values_fill_per_base() {
    let tempfile = tempfile::NamedTempFile::new().unwrap();
    let sections = vec![fixed("chr1", 100, 10, 5, vec![1.0, 2.0])];
    let sizes = chrom_map(&[("chr1", 1000)]);
    write_file(tempfile.path(), &sections, &sizes, Compression::Deflate, Endianness::native());

    let mut read = BigWigRead::open(tempfile.path()).unwrap();
    let values = read.values("chr1", 100, 120).unwrap();
    assert_eq!(values.len(), 20);
    assert_eq!(&values[0..5], &[1.0; 5]);
    assert!(values[5..10].iter().all(|v| v.is_nan()));
    assert_eq!(&values[10..15], &[2.0; 5]);
    assert!(values[15..20].iter().all(|v| v.is_nan()));
}

#[test]
fn overlap_queries_are_complete() {
    // A deterministic, irregular layout; every record overlapping each
    // query must come back.
    let mut sections = Vec::new();
    let mut pos = 0u32;
    let mut state = 12345u64;
    let mut next = |modulus: u32| {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((state >> 33) as u32) % modulus
    };
    for _ in 0..30 {
        let count = 1 + next(20);
        let mut starts = Vec::new();
        let mut ends = Vec::new();
        let mut values = Vec::new();
        for _ in 0..count {
            pos += 1 + next(50);
            let len = 1 + next(40);
            starts.push(pos);
            ends.push(pos + len);
            values.push(next(1000) as f32 / 10.0);
            pos += len;
        }
        sections.push(WigSection::BedGraph {
            chrom: "chr1".to_string(),
            starts,
            ends,
            values,
        });
    }
    let all: Vec<(u32, u32, f32)> = sections.iter().flat_map(|s| s.iter()).collect();

    let tempfile = tempfile::NamedTempFile::new().unwrap();
    let sizes = chrom_map(&[("chr1", pos + 1000)]);
    write_file(tempfile.path(), &sections, &sizes, Compression::Deflate, Endianness::native());
    let mut read = BigWigRead::open(tempfile.path()).unwrap();

    for _ in 0..50 {
        let qstart = next(pos);
        let qend = qstart + 1 + next(2000);
        let got: Vec<(u32, u32, f32)> = read
            .query("chr1", qstart, qend, true)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
            .iter()
            .flat_map(|s| s.iter())
            .collect();
        let expected: Vec<(u32, u32, f32)> = all
            .iter()
            .copied()
            .filter(|(s, e, _)| *s < qend && *e > qstart)
            .collect();
        assert_eq!(got, expected, "query [{}, {})", qstart, qend);

        let contained: Vec<(u32, u32, f32)> = read
            .query("chr1", qstart, qend, false)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
            .iter()
            .flat_map(|s| s.iter())
            .collect();
        let expected_contained: Vec<(u32, u32, f32)> = all
            .iter()
            .copied()
            .filter(|(s, e, _)| *s >= qstart && *e <= qend)
            .collect();
        assert_eq!(contained, expected_contained);
    }
}

#[test]
fn unknown_chromosomes_and_unsorted_input_error() {
    let tempfile = tempfile::NamedTempFile::new().unwrap();
    let sections = vec![fixed("chr1", 0, 10, 10, vec![1.0])];
    let sizes = chrom_map(&[("chr1", 1000)]);
    write_file(tempfile.path(), &sections, &sizes, Compression::Deflate, Endianness::native());

    let mut read = BigWigRead::open(tempfile.path()).unwrap();
    let err = read.query("chrUn", 0, 100, true).unwrap_err();
    assert!(matches!(err, TrackError::NoSuchElement(name) if name == "chrUn"));

    let unsorted = vec![
        fixed("chr1", 100, 10, 10, vec![1.0, 2.0]),
        fixed("chr1", 105, 10, 10, vec![3.0]),
    ];
    let out = tempfile::NamedTempFile::new().unwrap();
    let err = BigWigWrite::create_file(out.path().to_path_buf())
        .write(&unsorted, &sizes)
        .unwrap_err();
    assert!(matches!(err, TrackError::SortOrder(_)));
}

#[test]
fn uncompressed_files_read_back() {
    let tempfile = tempfile::NamedTempFile::new().unwrap();
    let sections = vec![fixed("chr1", 0, 10, 10, vec![1.0, 2.0, 3.0])];
    let sizes = chrom_map(&[("chr1", 1000)]);
    write_file(tempfile.path(), &sections, &sizes, Compression::None, Endianness::native());

    let mut read = BigWigRead::open(tempfile.path()).unwrap();
    assert_eq!(read.info().header.version, 4);
    let result: Vec<WigSection> = read
        .query("chr1", 0, 1000, true)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(result, sections);
}

#[test]
fn empty_files_read_back_the_identity_summary() {
    let tempfile = tempfile::NamedTempFile::new().unwrap();
    let sizes = chrom_map(&[("chr1", 1000)]);
    write_file(tempfile.path(), &[], &sizes, Compression::Deflate, Endianness::native());

    let read = BigWigRead::open(tempfile.path()).unwrap();
    assert!(read.chroms().is_empty());
    assert_eq!(read.record_count().unwrap(), 0);

    let total = read.total_summary().unwrap();
    assert_eq!(total, BigSummary::default());
    assert_eq!(total.min, f64::INFINITY);
    assert_eq!(total.max, f64::NEG_INFINITY);
}

#[test]
fn not_a_bigwig_is_a_bad_signature() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    use std::io::Write;
    tmp.write_all(&[0u8; 128]).unwrap();
    tmp.flush().unwrap();
    let err = BigWigRead::open(tmp.path()).unwrap_err();
    assert!(matches!(err, TrackError::BadSignature));
}
