use std::collections::HashMap;
use std::path::Path;

use bigtrack::{
    BBIWriteOptions, BedEntry, BigBedRead, BigBedWrite, BigWigRead, Compression, TrackError,
};

fn entry(chrom: &str, start: u32, end: u32, rest: &str) -> BedEntry {
    BedEntry {
        chrom: chrom.to_string(),
        start,
        end,
        rest: rest.to_string(),
    }
}

fn chrom_map(entries: &[(&str, u32)]) -> HashMap<String, u32> {
    entries.iter().map(|(n, l)| (n.to_string(), *l)).collect()
}

fn write_file(path: &Path, entries: &[BedEntry], sizes: &HashMap<String, u32>) {
    BigBedWrite::create_file(path.to_path_buf())
        .write(entries, sizes)
        .unwrap();
}

#[test]
fn entries_round_trip_with_rest_fields() {
    let tempfile = tempfile::NamedTempFile::new().unwrap();
    let entries = vec![
        entry("chr1", 10, 100, "name1\t960\t+"),
        entry("chr1", 50, 200, "name2\t0\t-"),
        entry("chr1", 300, 310, ""),
        entry("chr2", 0, 5, "name4\t500\t+"),
    ];
    let sizes = chrom_map(&[("chr1", 100000), ("chr2", 100)]);
    write_file(tempfile.path(), &entries, &sizes);

    let mut read = BigBedRead::open(tempfile.path()).unwrap();
    assert_eq!(read.info().header.field_count, 6);
    assert_eq!(read.info().header.defined_field_count, 3);
    assert_eq!(read.record_count().unwrap(), 4);

    let mut result: Vec<BedEntry> = read
        .query("chr1", 0, 100000, true)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    result.extend(
        read.query("chr2", 0, 100, true)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap(),
    );
    assert_eq!(result, entries);
}

#[test]
fn containment_discipline() {
    let tempfile = tempfile::NamedTempFile::new().unwrap();
    let entries = vec![
        entry("chr1", 10, 100, "a"),
        entry("chr1", 40, 60, "b"),
        entry("chr1", 90, 200, "c"),
    ];
    let sizes = chrom_map(&[("chr1", 1000)]);
    write_file(tempfile.path(), &entries, &sizes);

    let mut read = BigBedRead::open(tempfile.path()).unwrap();

    let overlapping: Vec<String> = read
        .query("chr1", 50, 95, true)
        .unwrap()
        .map(|e| e.unwrap().rest)
        .collect();
    assert_eq!(overlapping, vec!["a", "b", "c"]);

    let contained: Vec<String> = read
        .query("chr1", 30, 95, false)
        .unwrap()
        .map(|e| e.unwrap().rest)
        .collect();
    assert_eq!(contained, vec!["b"]);
}

#[test]
fn blocks_split_by_chromosome_and_slot() {
    let tempfile = tempfile::NamedTempFile::new().unwrap();
    let mut entries = Vec::new();
    for i in 0..300u32 {
        entries.push(entry("chr1", i * 10, i * 10 + 8, &format!("feature{}", i)));
    }
    for i in 0..10u32 {
        entries.push(entry("chr2", i * 5, i * 5 + 4, ""));
    }
    let sizes = chrom_map(&[("chr1", 10000), ("chr2", 1000)]);

    let options = BBIWriteOptions {
        items_per_slot: 64,
        compression: Compression::Deflate,
        ..Default::default()
    };
    BigBedWrite::with_options(tempfile.path().to_path_buf(), options)
        .write(&entries, &sizes)
        .unwrap();

    let mut read = BigBedRead::open(tempfile.path()).unwrap();
    let chr1: Vec<BedEntry> = read
        .query("chr1", 0, 10000, true)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(chr1.len(), 300);
    let chr2: Vec<BedEntry> = read
        .query("chr2", 0, 1000, true)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(chr2.len(), 10);

    // A narrow query touches only the entries around it.
    let narrow: Vec<BedEntry> = read
        .query("chr1", 1500, 1520, true)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(narrow, vec![entry("chr1", 1500, 1508, "feature150"), entry("chr1", 1510, 1518, "feature151")]);
}

#[test]
fn coverage_summaries() {
    let tempfile = tempfile::NamedTempFile::new().unwrap();
    // Two entries overlapping over [40, 60): depth 2 there.
    let entries = vec![entry("chr1", 0, 60, ""), entry("chr1", 40, 100, "")];
    let sizes = chrom_map(&[("chr1", 100)]);
    write_file(tempfile.path(), &entries, &sizes);

    let mut read = BigBedRead::open(tempfile.path()).unwrap();
    let bins = read.summarize("chr1", 0, 100, 1).unwrap();
    assert_eq!(bins.len(), 1);
    assert_eq!(bins[0].count, 100);
    assert!((bins[0].sum - 120.0).abs() < 1e-6);
    assert_eq!(bins[0].min, 1.0);
    assert_eq!(bins[0].max, 2.0);

    let total = read.total_summary().unwrap();
    assert_eq!(total.count, 100);
    assert!((total.sum - 120.0).abs() < 1e-9);
    assert_eq!(total.min, 1.0);
    assert_eq!(total.max, 2.0);
}

#[test]
fn a_bigbed_is_not_a_bigwig() {
    let tempfile = tempfile::NamedTempFile::new().unwrap();
    let entries = vec![entry("chr1", 0, 10, "")];
    let sizes = chrom_map(&[("chr1", 100)]);
    write_file(tempfile.path(), &entries, &sizes);

    assert!(matches!(
        BigWigRead::open(tempfile.path()),
        Err(TrackError::BadSignature)
    ));
    assert!(BigBedRead::open(tempfile.path()).is_ok());
}

#[test]
fn unsorted_entries_are_rejected() {
    let tempfile = tempfile::NamedTempFile::new().unwrap();
    let entries = vec![entry("chr1", 50, 60, ""), entry("chr1", 10, 20, "")];
    let sizes = chrom_map(&[("chr1", 100)]);
    let err = BigBedWrite::create_file(tempfile.path().to_path_buf())
        .write(&entries, &sizes)
        .unwrap_err();
    assert!(matches!(err, TrackError::SortOrder(_)));
}
