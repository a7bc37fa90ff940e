use std::fs;
use std::path::Path;

use miette::{IntoDiagnostic, Result};
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ro_grf::container::{Container, ContainerOptions, OpenMode, SaveMode};
use ro_grf::types::HEADER_SIZE;
use ro_grf::GrfVersion;
use tracing::{info, instrument};
use tracing_test::traced_test;

fn noise(rng: &mut StdRng, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rng.fill(&mut data[..]);
    data
}

/// A saved container of `count` incompressible entries
#[instrument(skip(path))]
fn populated(path: &Path, count: usize, version: GrfVersion) -> Result<Vec<(String, Vec<u8>)>> {
    let mut rng = StdRng::seed_from_u64(count as u64);
    let files: Vec<(String, Vec<u8>)> = (0..count)
        .map(|i| (format!("data\\texture\\{i:03}.bmp"), noise(&mut rng, 1500 + i * 7)))
        .collect();

    let options = ContainerOptions::builder().version(version).build();
    let mut container = Container::open_with(path, OpenMode::New, options)?;
    for (name, data) in &files {
        container.add_buffer(name, data.clone())?;
    }
    container.save(None, SaveMode::Full)?;
    Ok(files)
}

fn assert_contents(container: &Container, files: &[(String, Vec<u8>)]) -> Result<()> {
    for (name, data) in files {
        assert_eq!(&container.read(name)?, data, "{name}");
    }
    Ok(())
}

#[traced_test]
#[test]
fn saving_twice_is_byte_identical() -> Result<()> {
    let directory = tempfile::tempdir().into_diagnostic()?;
    let path = directory.path().join("data.grf");
    populated(&path, 40, GrfVersion::V0X200)?;
    let first = fs::read(&path).into_diagnostic()?;

    for mode in [SaveMode::Full, SaveMode::QuickMerge, SaveMode::QuickMerge] {
        let mut container = Container::open(&path)?;
        container.save(None, mode)?;
        let second = fs::read(&path).into_diagnostic()?;

        assert_eq!(first.len(), second.len(), "{mode:?}");
        assert!(first == second, "a {mode:?} save without edits changed the file");
    }
    Ok(())
}

#[traced_test]
#[test]
fn alignment_holds_for_every_entry() -> Result<()> {
    let directory = tempfile::tempdir().into_diagnostic()?;
    let path = directory.path().join("data.grf");
    populated(&path, 20, GrfVersion::V0X300)?;

    let container = Container::open(&path)?;
    for entry in container.entries() {
        assert_eq!(entry.aligned_size() % 8, 0);
        assert!(entry.aligned_size() >= entry.compressed_size());
    }
    Ok(())
}

#[traced_test]
#[test]
fn version_conversions_keep_content() -> Result<()> {
    let directory = tempfile::tempdir().into_diagnostic()?;
    let path = directory.path().join("data.grf");
    let files = populated(&path, 10, GrfVersion::V0X200)?;

    for version in [GrfVersion::V0X103, GrfVersion::V0X300, GrfVersion::V0X200] {
        let mut container = Container::open(&path)?;
        container.set_version(version)?;
        container.save(None, SaveMode::QuickMerge)?;

        let container = Container::open(&path)?;
        info!(%version, "converted");
        assert_eq!(container.header().version, version);
        assert_contents(&container, &files)?;
    }
    Ok(())
}

#[traced_test]
#[test]
fn quick_merge_appends_in_place() -> Result<()> {
    let directory = tempfile::tempdir().into_diagnostic()?;
    let path = directory.path().join("data.grf");
    let mut files = populated(&path, 40, GrfVersion::V0X200)?;

    let before = Container::open(&path)?;
    let offsets: Vec<(String, u64)> = before.entries().map(|e| (e.name().to_owned(), e.offset())).collect();
    let old_table_offset = before.header().file_table_offset;
    let old_len = fs::metadata(&path).into_diagnostic()?.len();
    drop(before);

    let mut container = Container::open(&path)?;
    let mut rng = StdRng::seed_from_u64(99);
    for i in 0..5 {
        let name = format!("data\\new\\{i}.txt");
        let data = noise(&mut rng, 300);
        container.add_buffer(&name, data.clone())?;
        files.push((name, data));
    }
    container.save(None, SaveMode::QuickMerge)?;

    let container = Container::open(&path)?;
    assert_eq!(container.len(), 45);
    assert_contents(&container, &files)?;

    // stored entries did not move, additions went behind the previous table
    for (name, offset) in offsets {
        assert_eq!(container.entry(&name)?.offset(), offset);
    }
    for i in 0..5 {
        assert!(container.entry(&format!("data\\new\\{i}.txt"))?.offset() > old_table_offset);
    }
    assert!(fs::metadata(&path).into_diagnostic()?.len() > old_len);
    Ok(())
}

#[traced_test]
#[test]
fn quick_merge_leaves_referenced_bytes_alone() -> Result<()> {
    let directory = tempfile::tempdir().into_diagnostic()?;
    let path = directory.path().join("data.grf");
    let mut files = populated(&path, 40, GrfVersion::V0X200)?;
    let original = fs::read(&path).into_diagnostic()?;

    let before = Container::open(&path)?;
    let mut ranges: Vec<(usize, usize)> = before
        .entries()
        .map(|e| {
            let start = (HEADER_SIZE + e.offset()) as usize;
            (start, start + e.aligned_size() as usize)
        })
        .collect();
    ranges.push((before.header().table_position() as usize, original.len()));
    drop(before);

    // a same-size replacement and a removal, both candidates for the freed slots
    let mut container = Container::open(&path)?;
    let mut rng = StdRng::seed_from_u64(7);
    let replacement = noise(&mut rng, files[3].1.len());
    container.add_buffer(&files[3].0, replacement.clone())?;
    files[3].1 = replacement;
    container.remove(&files[7].0)?;
    files.remove(7);
    container.save(None, SaveMode::QuickMerge)?;

    let merged = fs::read(&path).into_diagnostic()?;
    for (start, end) in ranges {
        assert!(merged[start..end] == original[start..end], "bytes {start}..{end} were overwritten");
    }

    let container = Container::open(&path)?;
    assert_eq!(container.len(), 39);
    assert_contents(&container, &files)?;
    assert!(HEADER_SIZE + container.entry(&files[3].0)?.offset() >= original.len() as u64);
    Ok(())
}

#[traced_test]
#[test]
fn small_containers_fall_back_to_a_rewrite() -> Result<()> {
    let directory = tempfile::tempdir().into_diagnostic()?;
    let path = directory.path().join("data.grf");
    let mut files = populated(&path, 5, GrfVersion::V0X200)?;

    let mut container = Container::open(&path)?;
    container.remove(&files[0].0)?;
    files.remove(0);
    container.add_buffer("data\\added.txt", b"appended".to_vec())?;
    files.push(("data\\added.txt".into(), b"appended".to_vec()));
    container.save(None, SaveMode::QuickMerge)?;

    let container = Container::open(&path)?;
    assert_eq!(container.len(), 5);
    assert_contents(&container, &files)?;

    // a rewrite leaves no gap behind
    let aligned: u64 = container.entries().map(|e| u64::from(e.aligned_size())).sum();
    assert_eq!(container.header().table_position(), HEADER_SIZE + aligned);
    Ok(())
}

#[traced_test]
#[test]
fn renames_survive_saves() -> Result<()> {
    let directory = tempfile::tempdir().into_diagnostic()?;
    let path = directory.path().join("data.grf");
    let files = populated(&path, 3, GrfVersion::V0X200)?;

    let mut container = Container::open(&path)?;
    container.rename(&files[1].0, "data/renamed.bmp")?;
    container.save(None, SaveMode::Full)?;

    let container = Container::open(&path)?;
    assert!(!container.contains(&files[1].0));
    assert_eq!(container.read("data\\renamed.bmp")?, files[1].1);
    Ok(())
}
