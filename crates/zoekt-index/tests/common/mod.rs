#![allow(dead_code)]

use std::path::{Path, PathBuf};
pub use tempfile;

use anyhow::Result;
use zoekt_index::shard::{shard_name, INDEX_FORMAT_VERSION};
use zoekt_index::{Document, IndexBuilder, IndexData, Repository, ShardWriter, WriteOptions};

/// Create a temporary directory for shards.
pub fn new_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("create tempdir")
}

/// Repository with a single `main` branch.
pub fn repo(id: u32, name: &str) -> Repository {
    Repository::new(id, name).with_branches(&[("main", "v1")])
}

/// Build a single repository shard from `(name, content)` pairs.
pub fn builder(id: u32, name: &str, files: &[(&str, &str)]) -> Result<IndexBuilder> {
    let mut b = IndexBuilder::new(Some(repo(id, name)))?;
    for (n, c) in files {
        b.add(Document::new(*n, c.as_bytes()).with_branches(&["main"]))?;
    }
    Ok(b)
}

/// Write a single repository shard into `dir` and return its path.
pub fn write_shard(dir: &Path, id: u32, name: &str, files: &[(&str, &str)]) -> Result<PathBuf> {
    let b = builder(id, name, files)?;
    let path = shard_name(dir, name, INDEX_FORMAT_VERSION, 0);
    ShardWriter::new(&path, WriteOptions::default()).write(&b)?;
    Ok(path)
}

/// Build, write and reopen in one step.
pub fn open_shard(dir: &Path, id: u32, name: &str, files: &[(&str, &str)]) -> Result<IndexData> {
    let path = write_shard(dir, id, name, files)?;
    Ok(IndexData::open(path)?)
}

/// File names of a result, sorted.
pub fn names(files: &[zoekt_index::FileMatch]) -> Vec<String> {
    let mut v: Vec<String> = files.iter().map(|f| f.file_name.clone()).collect();
    v.sort();
    v
}
