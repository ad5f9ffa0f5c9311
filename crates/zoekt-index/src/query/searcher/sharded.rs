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

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::{apply_display_limits, sort_files, Cancellation};
use crate::error::Result;
use crate::query::ast::Q;
use crate::shard::{IndexData, SHARD_SUFFIX};
use crate::types::{FlushReason, ListOptions, RepoList, SearchOptions, SearchResult};

/// A set of loaded shards keyed by path. Searches take a snapshot of the
/// set, so shards can be replaced or dropped while searches run; a dropped
/// shard stays mapped until the last search holding it finishes.
#[derive(Default)]
pub struct ShardedSearcher {
    shards: RwLock<BTreeMap<PathBuf, Arc<IndexData>>>,
}

impl ShardedSearcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.zoekt` file directly inside `dir`.
    pub fn open_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.to_string_lossy().ends_with(SHARD_SUFFIX))
            .collect();
        paths.sort();

        let s = Self::new();
        for p in &paths {
            s.load(p)?;
        }
        info!(dir = %dir.display(), shards = paths.len(), "loaded shards");
        Ok(s)
    }

    /// Open `path` and add it, replacing a previously loaded version.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = IndexData::open(path)?;
        self.replace(path, data);
        Ok(())
    }

    pub fn replace(&self, path: impl Into<PathBuf>, data: IndexData) {
        let path = path.into();
        debug!(shard = %path.display(), docs = data.num_docs(), "replacing shard");
        self.shards.write().insert(path, Arc::new(data));
    }

    /// Remove a shard; returns whether it was loaded.
    pub fn drop_shard(&self, path: impl AsRef<Path>) -> bool {
        self.shards.write().remove(path.as_ref()).is_some()
    }

    pub fn len(&self) -> usize {
        self.shards.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.read().is_empty()
    }

    /// Shards by descending best repository priority, then path.
    fn snapshot(&self) -> Vec<(PathBuf, Arc<IndexData>)> {
        let mut v: Vec<(PathBuf, Arc<IndexData>)> =
            self.shards.read().iter().map(|(p, d)| (p.clone(), Arc::clone(d))).collect();
        let priority = |d: &IndexData| {
            d.repositories()
                .iter()
                .map(|r| r.priority())
                .fold(f64::MIN, f64::max)
        };
        v.sort_by(|a, b| priority(&b.1).total_cmp(&priority(&a.1)).then_with(|| a.0.cmp(&b.0)));
        v
    }

    pub fn search(&self, q: &Q, opts: &SearchOptions, cancel: &Cancellation) -> Result<SearchResult> {
        let start = Instant::now();
        let shards = self.snapshot();
        let mut agg = SearchResult::default();

        for (i, (_, shard)) in shards.iter().enumerate() {
            if cancel.is_cancelled() {
                agg.stats.flush_reason = FlushReason::Timeout;
                agg.stats.shards_skipped += shards.len() - i;
                break;
            }
            if opts.total_max_match_count > 0 && agg.stats.match_count >= opts.total_max_match_count {
                agg.stats.flush_reason = FlushReason::MaxSize;
                agg.stats.shards_skipped += shards.len() - i;
                break;
            }
            let res = shard.search(q, opts, cancel)?;
            agg.stats.add(&res.stats);
            agg.files.extend(res.files);
            agg.repo_urls.extend(res.repo_urls);
            agg.line_fragments.extend(res.line_fragments);
        }

        sort_files(&mut agg.files);
        apply_display_limits(&mut agg.files, opts);
        agg.stats.file_count = agg.files.len();
        agg.stats.duration = start.elapsed();
        debug!(
            shards = shards.len(),
            files = agg.stats.file_count,
            matches = agg.stats.match_count,
            "sharded search"
        );
        Ok(agg)
    }

    pub fn list(&self, q: &Q, opts: &ListOptions) -> Result<RepoList> {
        let mut agg = RepoList::default();
        for (_, shard) in self.snapshot() {
            let l = shard.list(q, opts)?;
            agg.stats.add(&l.stats);
            agg.repos.extend(l.repos);
        }
        agg.repos.sort_by(|a, b| a.repository.name.cmp(&b.repository.name));
        Ok(agg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriteOptions;
    use crate::index::builder::IndexBuilder;
    use crate::shard::ShardWriter;
    use crate::types::Repository;

    fn write_shard(dir: &Path, name: &str, id: u32, files: &[(&str, &str)]) -> PathBuf {
        let mut b = IndexBuilder::new(Some(Repository::new(id, name))).unwrap();
        for (n, c) in files {
            b.add_file(n, c.as_bytes()).unwrap();
        }
        let path = dir.join(format!("{name}_v16.00000.zoekt"));
        ShardWriter::new(&path, WriteOptions::with_mode(0o644)).write(&b).unwrap();
        path
    }

    #[test]
    fn searches_all_shards_and_caps_total() {
        let dir = tempfile::tempdir().unwrap();
        write_shard(dir.path(), "a", 1, &[("x.txt", "needle here\n")]);
        let b = write_shard(dir.path(), "b", 2, &[("y.txt", "another needle\n")]);

        let s = ShardedSearcher::open_dir(dir.path()).unwrap();
        assert_eq!(s.len(), 2);
        let res = s
            .search(&Q::content("needle"), &SearchOptions::default(), &Cancellation::new())
            .unwrap();
        assert_eq!(res.files.len(), 2);

        let capped = SearchOptions {
            total_max_match_count: 1,
            ..Default::default()
        };
        let res = s.search(&Q::content("needle"), &capped, &Cancellation::new()).unwrap();
        assert_eq!(res.files.len(), 1);
        assert_eq!(res.stats.flush_reason, FlushReason::MaxSize);

        assert!(s.drop_shard(&b));
        let res = s
            .search(&Q::content("needle"), &SearchOptions::default(), &Cancellation::new())
            .unwrap();
        assert_eq!(res.files.len(), 1);
        assert_eq!(s.list(&Q::Const(true), &ListOptions::default()).unwrap().repos.len(), 1);
    }

    #[test]
    fn cancelled_search_reports_skipped_shards() {
        let dir = tempfile::tempdir().unwrap();
        write_shard(dir.path(), "a", 1, &[("x.txt", "needle\n")]);
        let s = ShardedSearcher::open_dir(dir.path()).unwrap();
        let cancel = Cancellation::new();
        cancel.cancel();
        let res = s.search(&Q::content("needle"), &SearchOptions::default(), &cancel).unwrap();
        assert!(res.files.is_empty());
        assert_eq!(res.stats.shards_skipped, 1);
        assert_eq!(res.stats.flush_reason, FlushReason::Timeout);
    }
}
