mod common;

use anyhow::Result;
use common::{names, new_dir, write_shard};
use zoekt_index::shard::merge::{explode_to_dir, merge_to_dir};
use zoekt_index::shard::tombstone::{set_tombstone, unset_tombstone};
use zoekt_index::shard::{meta_path, INDEX_FORMAT_VERSION, NEXT_INDEX_FORMAT_VERSION};
use zoekt_index::{Cancellation, IndexData, ListOptions, SearchOptions, ShardedSearcher, WriteOptions, Q};

#[test]
fn merge_then_explode_round_trips_repositories() -> Result<()> {
    let dir = new_dir();
    let a = write_shard(dir.path(), 1, "repo-a", &[("a.txt", "alpha content\n")])?;
    let b = write_shard(
        dir.path(),
        2,
        "repo-b",
        &[("b1.txt", "beta content\n"), ("b2.txt", "gamma content\n")],
    )?;
    let (da, db) = (IndexData::open(&a)?, IndexData::open(&b)?);

    let merged_dir = new_dir();
    let merged = merge_to_dir(&[&da, &db], merged_dir.path(), &WriteOptions::default())?;
    assert!(merged.file_name().unwrap().to_string_lossy().starts_with("compound-"));
    let m = IndexData::open(&merged)?;
    assert_eq!(m.metadata().index_format_version, NEXT_INDEX_FORMAT_VERSION);
    assert_eq!(m.repositories().len(), 2);
    assert_eq!(m.num_docs(), 3);

    let res = m.search(&Q::content("content"), &SearchOptions::default(), &Cancellation::new())?;
    assert_eq!(names(&res.files), vec!["a.txt", "b1.txt", "b2.txt"]);
    let owners: Vec<u32> = {
        let mut v: Vec<u32> = res.files.iter().map(|f| f.repository_id).collect();
        v.sort();
        v
    };
    assert_eq!(owners, vec![1, 2, 2]);

    let out = new_dir();
    let mut parts = explode_to_dir(&m, out.path(), &WriteOptions::default())?;
    parts.sort();
    assert_eq!(parts.len(), 2);
    let pa = IndexData::open(&parts[0])?;
    let pb = IndexData::open(&parts[1])?;
    assert_eq!(pa.metadata().index_format_version, INDEX_FORMAT_VERSION);
    assert_eq!(pa.repositories()[0].name, "repo-a");
    assert_eq!(pa.num_docs(), 1);
    assert_eq!(pb.repositories()[0].name, "repo-b");
    assert_eq!(pb.num_docs(), 2);
    assert_eq!(pb.content(0)?, b"beta content\n");
    Ok(())
}

#[test]
fn tombstoned_repository_disappears_from_search_and_list() -> Result<()> {
    let dir = new_dir();
    let a = write_shard(dir.path(), 1, "repo-a", &[("a.txt", "shared needle\n")])?;
    let b = write_shard(dir.path(), 2, "repo-b", &[("b.txt", "shared needle\n")])?;
    let merged_dir = new_dir();
    let merged = merge_to_dir(
        &[&IndexData::open(&a)?, &IndexData::open(&b)?],
        merged_dir.path(),
        &WriteOptions::default(),
    )?;
    let opts = WriteOptions::default();

    assert!(set_tombstone(&merged, 2, &opts)?);
    let first = std::fs::read(meta_path(&merged))?;
    assert!(set_tombstone(&merged, 2, &opts)?);
    assert_eq!(std::fs::read(meta_path(&merged))?, first);

    let s = ShardedSearcher::open_dir(merged_dir.path())?;
    let res = s.search(&Q::content("needle"), &SearchOptions::default(), &Cancellation::new())?;
    assert_eq!(names(&res.files), vec!["a.txt"]);
    let list = s.list(&Q::Const(true), &ListOptions::default())?;
    assert_eq!(list.repos.len(), 1);
    assert_eq!(list.repos[0].repository.name, "repo-a");

    // merging again drops the deleted repository for good
    let m = IndexData::open(&merged)?;
    let compacted = zoekt_index::shard::merge::merge(&[&m])?;
    assert_eq!(compacted.repositories().len(), 1);
    assert_eq!(compacted.num_files(), 1);

    assert!(unset_tombstone(&merged, 2, &opts)?);
    s.load(&merged)?;
    let res = s.search(&Q::content("needle"), &SearchOptions::default(), &Cancellation::new())?;
    assert_eq!(names(&res.files), vec!["a.txt", "b.txt"]);
    Ok(())
}

#[test]
fn fully_tombstoned_shard_is_skipped() -> Result<()> {
    let dir = new_dir();
    let a = write_shard(dir.path(), 1, "repo-a", &[("a.txt", "needle\n")])?;
    assert!(set_tombstone(&a, 1, &WriteOptions::default())?);

    let d = IndexData::open(&a)?;
    let res = d.search(&Q::content("needle"), &SearchOptions::default(), &Cancellation::new())?;
    assert!(res.files.is_empty());
    assert_eq!(res.stats.shards_skipped, 1);
    assert!(d.list(&Q::Const(true), &ListOptions::default())?.repos.is_empty());
    Ok(())
}

#[test]
fn list_filters_by_query() -> Result<()> {
    let dir = new_dir();
    let a = write_shard(dir.path(), 1, "repo-a", &[("a.txt", "only in a\n")])?;
    let b = write_shard(dir.path(), 2, "repo-b", &[("b.txt", "only in b\n")])?;
    let merged_dir = new_dir();
    let merged = merge_to_dir(
        &[&IndexData::open(&a)?, &IndexData::open(&b)?],
        merged_dir.path(),
        &WriteOptions::default(),
    )?;
    let m = IndexData::open(&merged)?;

    let list = m.list(&Q::content("in b"), &ListOptions::default())?;
    assert_eq!(list.repos.len(), 1);
    assert_eq!(list.repos[0].repository.id, 2);
    assert_eq!(list.stats.documents, 1);

    let minimal = m.list(&Q::Const(true), &ListOptions { minimal: true })?;
    assert_eq!(minimal.repos.len(), 2);
    assert!(minimal.repos.iter().all(|r| r.repository.branches.is_empty()));
    Ok(())
}
