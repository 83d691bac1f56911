mod common;

use anyhow::Result;
use common::{record, stream, write_source};
use ironsplit::{FramingError, PartitionRange, RecordScanner, SplitPolicy, count_records, plan_partitions};
use std::io::Cursor;

fn lens_of(ranges: &[PartitionRange], all: &[usize]) -> Vec<Vec<usize>> {
    let mut at = 0usize;
    ranges
        .iter()
        .map(|r| {
            let n = r.records as usize;
            let group = all[at..at + n].to_vec();
            at += n;
            group
        })
        .collect()
}

#[test]
fn groups_records_until_target_is_reached() -> Result<()> {
    let lens = [100, 250, 300];
    let ranges = plan_partitions(Cursor::new(stream(&lens)), SplitPolicy::Bytes(300))?;

    assert_eq!(
        ranges,
        vec![
            PartitionRange { index: 0, offset: 0, len: 350, records: 2 },
            PartitionRange { index: 1, offset: 350, len: 300, records: 1 },
        ]
    );
    assert_eq!(lens_of(&ranges, &lens), vec![vec![100, 250], vec![300]]);
    Ok(())
}

#[test]
fn partitions_reassemble_the_stream_exactly() -> Result<()> {
    let lens: Vec<usize> = (0..200).map(|i| 5 + (i * 37) % 400).collect();
    let data = stream(&lens);
    let ranges = plan_partitions(Cursor::new(data.clone()), SplitPolicy::Bytes(1_000))?;

    let mut rebuilt = Vec::new();
    let mut expected_offset = 0u64;
    for (i, r) in ranges.iter().enumerate() {
        assert_eq!(r.index, i);
        assert_eq!(r.offset, expected_offset, "ranges are contiguous");
        rebuilt.extend_from_slice(&data[r.offset as usize..r.end() as usize]);
        expected_offset = r.end();
    }
    assert_eq!(rebuilt, data);
    assert_eq!(ranges.iter().map(|r| r.records).sum::<u64>(), 200);
    Ok(())
}

#[test]
fn boundaries_fall_on_record_starts() -> Result<()> {
    let lens: Vec<usize> = (0..50).map(|i| 20 + (i * 13) % 90).collect();
    let mut starts = vec![0u64];
    for len in &lens {
        starts.push(starts.last().copied().unwrap_or(0) + *len as u64);
    }
    let ranges = plan_partitions(Cursor::new(stream(&lens)), SplitPolicy::Bytes(256))?;
    for r in &ranges {
        assert!(starts.contains(&r.offset), "range starts mid-record: {r:?}");
        assert!(starts.contains(&r.end()), "range ends mid-record: {r:?}");
    }
    Ok(())
}

#[test]
fn only_the_closing_record_pushes_a_partition_past_target() -> Result<()> {
    let lens: Vec<usize> = (0..80).map(|i| 10 + (i * 29) % 150).collect();
    let size = 400u64;
    let ranges = plan_partitions(Cursor::new(stream(&lens)), SplitPolicy::Bytes(size))?;
    let groups = lens_of(&ranges, &lens);
    for (r, group) in ranges.iter().zip(&groups) {
        let without_last: usize = group[..group.len() - 1].iter().sum();
        assert!((without_last as u64) < size, "partition {} kept growing after reaching target", r.index);
    }
    for r in &ranges[..ranges.len() - 1] {
        assert!(r.len >= size);
    }
    Ok(())
}

#[test]
fn oversized_record_forms_its_own_partition() -> Result<()> {
    let ranges = plan_partitions(Cursor::new(stream(&[900, 40, 40])), SplitPolicy::Bytes(100))?;
    assert_eq!(ranges.len(), 2);
    assert_eq!((ranges[0].len, ranges[0].records), (900, 1));
    assert_eq!((ranges[1].len, ranges[1].records), (80, 2));
    Ok(())
}

#[test]
fn record_policy_counts_records() -> Result<()> {
    let ranges = plan_partitions(Cursor::new(stream(&[10; 7])), SplitPolicy::Records(3))?;
    let counts: Vec<u64> = ranges.iter().map(|r| r.records).collect();
    assert_eq!(counts, vec![3, 3, 1]);
    Ok(())
}

#[test]
fn empty_stream_has_no_partitions() -> Result<()> {
    let ranges = plan_partitions(Cursor::new(Vec::new()), SplitPolicy::Bytes(300))?;
    assert!(ranges.is_empty());
    Ok(())
}

#[test]
fn truncated_prefix_is_fatal() {
    let mut data = stream(&[20, 20]);
    data.extend_from_slice(b"003");
    let err = plan_partitions(Cursor::new(data), SplitPolicy::Bytes(1_000)).unwrap_err();
    assert!(matches!(err, FramingError::TruncatedPrefix { offset: 40, read: 3 }), "{err}");
}

#[test]
fn overrunning_record_is_fatal() {
    let mut data = stream(&[20]);
    data.extend_from_slice(&record(50, b'z')[..30]);
    let err = plan_partitions(Cursor::new(data), SplitPolicy::Bytes(1_000)).unwrap_err();
    assert!(
        matches!(err, FramingError::Overrun { offset: 20, declared: 50, remaining: 30 }),
        "{err}"
    );
}

#[test]
fn malformed_prefixes_are_fatal() {
    let err = plan_partitions(Cursor::new(b"12x45abcdefgh".to_vec()), SplitPolicy::Bytes(10)).unwrap_err();
    assert!(matches!(err, FramingError::InvalidPrefix { offset: 0, .. }), "{err}");

    let err = plan_partitions(Cursor::new(b"00003abc".to_vec()), SplitPolicy::Bytes(10)).unwrap_err();
    assert!(matches!(err, FramingError::ShortRecord { offset: 0, declared: 3 }), "{err}");
}

#[test]
fn space_padded_prefix_is_accepted() -> Result<()> {
    let mut data = b"   10".to_vec();
    data.extend_from_slice(b"hello");
    let spans: Vec<_> = RecordScanner::new(Cursor::new(data))?.collect::<Result<_, _>>()?;
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].len, 10);
    Ok(())
}

#[test]
fn scanner_stops_after_an_error() -> Result<()> {
    let mut scanner = RecordScanner::new(Cursor::new(b"0001".to_vec()))?;
    assert!(matches!(scanner.next(), Some(Err(FramingError::TruncatedPrefix { .. }))));
    assert!(scanner.next().is_none());
    Ok(())
}

#[test]
fn count_records_reports_totals() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_source(dir.path(), "in.mrc", &[100, 250, 300])?;
    let stats = count_records(&path)?;
    assert_eq!(stats.records, 3);
    assert_eq!(stats.bytes, 650);
    Ok(())
}

#[test]
fn count_records_surfaces_framing_errors() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("bad.mrc");
    std::fs::write(&path, b"00100short")?;
    let err = count_records(&path).unwrap_err();
    assert!(err.downcast_ref::<FramingError>().is_some(), "{err:#}");
    Ok(())
}
