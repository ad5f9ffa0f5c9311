// Copyright 2025 HyperZoekt Project
// Derived from sourcegraph/zoekt (https://github.com/sourcegraph/zoekt)
// Copyright 2016 Google Inc. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Soft deletion of repositories inside a shard. Only the `.meta` sidecar
//! is rewritten; content sections stay untouched until the next merge.

use std::path::Path;

use tracing::info;

use super::writer::write_atomic;
use super::{meta_path, read_metadata_path};
use crate::config::WriteOptions;
use crate::error::Result;

fn set(shard: &Path, repo_id: u32, tombstone: bool, opts: &WriteOptions) -> Result<bool> {
    let (mut repos, _) = read_metadata_path(shard)?;
    let Some(repo) = repos.iter_mut().find(|r| r.id == repo_id) else {
        return Ok(false);
    };
    if repo.tombstone == tombstone {
        return Ok(true);
    }
    repo.tombstone = tombstone;
    let name = repo.name.clone();

    let meta = meta_path(shard);
    write_atomic(&meta, *opts, |w| {
        serde_json::to_writer(&mut *w, &repos)?;
        Ok(())
    })?;
    info!(shard = %shard.display(), repo = %name, repo_id, tombstone, "updated tombstone");
    Ok(true)
}

/// Mark repository `repo_id` of `shard` as deleted. Returns whether the
/// shard holds that repository. Repeated calls leave the sidecar unchanged.
pub fn set_tombstone(shard: impl AsRef<Path>, repo_id: u32, opts: &WriteOptions) -> Result<bool> {
    set(shard.as_ref(), repo_id, true, opts)
}

/// Undo `set_tombstone`.
pub fn unset_tombstone(shard: impl AsRef<Path>, repo_id: u32, opts: &WriteOptions) -> Result<bool> {
    set(shard.as_ref(), repo_id, false, opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::builder::IndexBuilder;
    use crate::shard::{read_metadata_path, IndexData};
    use crate::types::Repository;

    fn compound_shard(dir: &Path) -> std::path::PathBuf {
        let mut b = IndexBuilder::empty();
        for (id, name) in [(1, "a"), (2, "b")] {
            b.set_repository(&Repository::new(id, name)).unwrap();
            b.add_file("f.txt", format!("in {name}\n").as_bytes()).unwrap();
        }
        let path = dir.join("compound_v17.00000.zoekt");
        b.write_to_path(&path, &WriteOptions::default()).unwrap();
        path
    }

    #[test]
    fn tombstone_is_idempotent_and_reversible() {
        let dir = tempfile::tempdir().unwrap();
        let shard = compound_shard(dir.path());
        let opts = WriteOptions::default();

        assert!(set_tombstone(&shard, 2, &opts).unwrap());
        let once = std::fs::read(meta_path(&shard)).unwrap();
        assert!(set_tombstone(&shard, 2, &opts).unwrap());
        assert_eq!(std::fs::read(meta_path(&shard)).unwrap(), once);

        let (repos, _) = read_metadata_path(&shard).unwrap();
        assert!(!repos[0].tombstone);
        assert!(repos[1].tombstone);
        assert!(IndexData::open(&shard).unwrap().repositories()[1].tombstone);

        assert!(unset_tombstone(&shard, 2, &opts).unwrap());
        let (repos, _) = read_metadata_path(&shard).unwrap();
        assert!(repos.iter().all(|r| !r.tombstone));
    }

    #[test]
    fn unknown_repository_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let shard = compound_shard(dir.path());
        assert!(!set_tombstone(&shard, 99, &WriteOptions::default()).unwrap());
        assert!(!meta_path(&shard).exists());
    }
}
