mod common;

use anyhow::Result;
use common::{list_dir, stream, write_source};
use ironsplit::{FramingError, Manifest, SourceIdentity, SplitPolicy, StageLayout, StageStatus, run_split, split_to_directory};
use std::fs;

fn layout(root: &std::path::Path) -> StageLayout {
    StageLayout::new(root, "split", "out")
}

#[test]
fn split_writes_partitions_and_manifest() -> Result<()> {
    let src_dir = tempfile::tempdir()?;
    let work = tempfile::tempdir()?;
    let source = write_source(src_dir.path(), "in.mrc", &[100, 250, 300])?;
    let id = SourceIdentity::resolve(&source, SplitPolicy::Bytes(300))?;
    let layout = layout(work.path());

    let outcome = run_split(&layout, &id)?;
    assert_eq!(outcome.status, StageStatus::Completed);
    assert_eq!(outcome.manifest.len(), 2);
    assert_eq!(outcome.manifest.source_len, 650);

    let data = stream(&[100, 250, 300]);
    let p0 = fs::read(layout.partition_path(&outcome.manifest.partitions[0].name))?;
    let p1 = fs::read(layout.partition_path(&outcome.manifest.partitions[1].name))?;
    assert_eq!(p0, &data[..350]);
    assert_eq!(p1, &data[350..]);

    let loaded = Manifest::load(layout.manifest_path(&id))?;
    assert_eq!(loaded, outcome.manifest);
    let names: Vec<&str> = loaded.names().collect();
    assert_eq!(names, vec![layout.partition_name(&id, 0), layout.partition_name(&id, 1)]);
    Ok(())
}

#[test]
fn rerun_reuses_manifest_without_rewriting_partitions() -> Result<()> {
    let src_dir = tempfile::tempdir()?;
    let work = tempfile::tempdir()?;
    let source = write_source(src_dir.path(), "in.mrc", &[40; 10])?;
    let id = SourceIdentity::resolve(&source, SplitPolicy::Bytes(100))?;
    let layout = layout(work.path());

    let first = run_split(&layout, &id)?;
    let marker = layout.partition_path(&first.manifest.partitions[0].name);
    fs::write(&marker, b"untouched by rerun")?;

    let second = run_split(&layout, &id)?;
    assert_eq!(second.status, StageStatus::Skipped);
    assert_eq!(second.manifest, first.manifest);
    assert_eq!(fs::read(&marker)?, b"untouched by rerun");
    Ok(())
}

#[test]
fn different_sizes_do_not_collide() -> Result<()> {
    let src_dir = tempfile::tempdir()?;
    let work = tempfile::tempdir()?;
    let source = write_source(src_dir.path(), "in.mrc", &[40; 10])?;
    let layout = layout(work.path());

    let small = run_split(&layout, &SourceIdentity::resolve(&source, SplitPolicy::Bytes(100))?)?;
    let large = run_split(&layout, &SourceIdentity::resolve(&source, SplitPolicy::Bytes(200))?)?;
    assert_eq!(large.status, StageStatus::Completed);
    assert!(small.manifest.names().all(|n| !large.manifest.names().any(|m| m == n)));
    Ok(())
}

#[test]
fn framing_error_publishes_nothing() -> Result<()> {
    let src_dir = tempfile::tempdir()?;
    let work = tempfile::tempdir()?;
    let source = src_dir.path().join("bad.mrc");
    let mut data = stream(&[50, 50]);
    data.extend_from_slice(b"00");
    fs::write(&source, data)?;

    let id = SourceIdentity::resolve(&source, SplitPolicy::Bytes(50))?;
    let err = run_split(&layout(work.path()), &id).unwrap_err();
    assert!(
        matches!(err.downcast_ref::<FramingError>(), Some(FramingError::TruncatedPrefix { .. })),
        "{err:#}"
    );
    assert!(list_dir(work.path())?.is_empty());
    Ok(())
}

#[test]
fn empty_source_yields_empty_manifest() -> Result<()> {
    let src_dir = tempfile::tempdir()?;
    let work = tempfile::tempdir()?;
    let source = write_source(src_dir.path(), "empty.mrc", &[])?;
    let id = SourceIdentity::resolve(&source, SplitPolicy::Bytes(300))?;
    let layout = layout(work.path());

    let outcome = run_split(&layout, &id)?;
    assert!(outcome.manifest.is_empty());
    assert!(layout.manifest_path(&id).exists());
    Ok(())
}

#[test]
fn split_to_directory_numbers_files() -> Result<()> {
    let src_dir = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let source = write_source(src_dir.path(), "in.mrc", &[10; 5])?;

    let written = split_to_directory(&source, out.path(), "split-", SplitPolicy::Records(2))?;
    assert_eq!(written.len(), 3);
    assert_eq!(
        list_dir(out.path())?,
        vec!["split-00000000", "split-00000001", "split-00000002"]
    );
    assert_eq!(fs::read(&written[2])?, stream(&[10; 5])[40..].to_vec());
    Ok(())
}

#[test]
fn split_to_directory_requires_directory() -> Result<()> {
    let src_dir = tempfile::tempdir()?;
    let source = write_source(src_dir.path(), "in.mrc", &[10])?;
    assert!(split_to_directory(&source, src_dir.path().join("missing"), "x-", SplitPolicy::Records(1)).is_err());
    Ok(())
}
