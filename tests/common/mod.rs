#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// One record of total length `len` (prefix included), body filled with `fill`.
pub fn record(len: usize, fill: u8) -> Vec<u8> {
    assert!(len >= 5, "records hold at least their prefix");
    let mut out = format!("{len:05}").into_bytes();
    out.resize(len, fill);
    out
}

/// A stream of records with the given total lengths and distinct fill bytes.
pub fn stream(lens: &[usize]) -> Vec<u8> {
    lens.iter()
        .enumerate()
        .flat_map(|(i, &len)| record(len, b'a' + (i % 26) as u8))
        .collect()
}

pub fn write_source(dir: &Path, name: &str, lens: &[usize]) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, stream(lens))?;
    Ok(path)
}

/// Sorted file names directly under `dir`.
pub fn list_dir(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<_, _>>()?;
    names.sort();
    Ok(names)
}
