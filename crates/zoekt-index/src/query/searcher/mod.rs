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

//! Search over one loaded shard (`IndexData::search`, `IndexData::list`)
//! and over a directory of shards (`ShardedSearcher`).

mod compile;
mod content;
mod hits;
mod matchtree;
mod score;
mod sharded;

pub use score::{score_symbol_kind, sort_files, SymbolKind};
pub use sharded::ShardedSearcher;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use self::content::{fill_chunk_matches, fill_matches, gather_matches, ContentProvider};
use self::hits::EXHAUSTED;
use self::matchtree::{Cost, MatchState, MatchTree, Node};
use crate::error::Result;
use crate::query::ast::{expand_file_content, simplify, Q};
use crate::shard::IndexData;
use crate::types::{
    FileMatch, FlushReason, ListOptions, RepoList, RepoListEntry, Repository, SearchOptions, SearchResult, Stats,
};

/// Cooperative cancellation, polled at every document boundary. Clones share
/// the flag.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Cancellation {
            flag: Arc::default(),
            deadline: Some(deadline),
        }
    }

    /// Deadline from `max_wall_time`, starting now.
    pub fn from_options(opts: &SearchOptions) -> Self {
        match opts.max_wall_time {
            Some(d) => Self::with_deadline(Instant::now() + d),
            None => Self::new(),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Names and version of the branches selected by `mask`.
fn branches_of(repo: &Repository, mask: u64) -> (Vec<String>, String) {
    let names = repo
        .branches
        .iter()
        .enumerate()
        .filter(|(i, _)| *i < 64 && mask & (1 << i) != 0)
        .map(|(_, b)| b.name.clone())
        .collect();
    let version = repo
        .branches
        .get(mask.trailing_zeros() as usize)
        .map(|b| b.version.clone())
        .unwrap_or_default();
    (names, version)
}

/// Truncate the sorted result to the display limits of `opts`.
pub(crate) fn apply_display_limits(files: &mut Vec<FileMatch>, opts: &SearchOptions) {
    if opts.max_doc_display_count > 0 {
        files.truncate(opts.max_doc_display_count);
    }
    if opts.max_match_display_count == 0 {
        return;
    }
    let mut left = opts.max_match_display_count;
    files.retain_mut(|f| {
        if left == 0 {
            return false;
        }
        f.line_matches.retain_mut(|lm| {
            if left == 0 {
                return false;
            }
            lm.line_fragments.truncate(left.max(1));
            left = left.saturating_sub(lm.line_fragments.len().max(1));
            true
        });
        f.chunk_matches.retain_mut(|cm| {
            if left == 0 {
                return false;
            }
            cm.ranges.truncate(left.max(1));
            left = left.saturating_sub(cm.ranges.len().max(1));
            true
        });
        true
    });
}

impl IndexData {
    /// `Some(v)` when a repository predicate has the same value for every
    /// live repository of this shard.
    fn decide_repos(&self, q: &Q) -> Option<bool> {
        let live: Vec<&Repository> = self.repositories().iter().filter(|r| !r.tombstone).collect();
        let mut only_false = false;
        let n = match q {
            Q::Repo(p) => {
                let re = regex::Regex::new(p).ok()?;
                live.iter().filter(|r| re.is_match(&r.name)).count()
            }
            Q::RepoSet(names) => live.iter().filter(|r| names.contains(&r.name)).count(),
            Q::RepoIds(ids) => live.iter().filter(|r| ids.contains(&r.id)).count(),
            Q::RawConfig(flags) => live.iter().filter(|r| r.raw_config_flags().contains(*flags)).count(),
            Q::BranchesRepos(list) => {
                // repository membership alone does not select documents
                only_false = true;
                live.iter()
                    .filter(|r| list.iter().any(|br| br.repos.contains(&r.id)))
                    .count()
            }
            _ => return None,
        };
        if n == 0 {
            Some(false)
        } else if n == live.len() && !only_false {
            Some(true)
        } else {
            None
        }
    }

    /// Rewrite `q` for this shard: repository predicates are decided where
    /// possible and constants folded.
    pub fn simplify(&self, q: Q) -> Q {
        simplify(q.map(&|q| match self.decide_repos(&q) {
            Some(v) => Q::Const(v),
            None => q,
        }))
    }

    pub fn search(&self, q: &Q, opts: &SearchOptions, cancel: &Cancellation) -> Result<SearchResult> {
        let start = Instant::now();
        let mut res = SearchResult::default();
        res.stats.shard_files_considered = 1;

        if self.repositories().iter().all(|r| r.tombstone) {
            res.stats.shards_skipped += 1;
            return Ok(res);
        }
        let q = self.simplify(q.clone().map(&expand_file_content));
        if q == Q::Const(false) {
            res.stats.shards_skipped_filter += 1;
            return Ok(res);
        }
        if opts.estimate_doc_count {
            res.stats.file_count = self.num_docs() as usize;
            return Ok(res);
        }

        let tree = compile::build(self, &q)?;
        let Some(mut mt) = tree.prune() else {
            res.stats.shards_skipped_filter += 1;
            res.stats.match_tree_construction = start.elapsed();
            debug!(shard = self.file_name_path(), query = %q, "match tree pruned away");
            return Ok(res);
        };
        let mut next_id = 0;
        let known_len = mt.number(&mut next_id);
        res.stats.match_tree_construction = start.elapsed();
        res.stats.shards_scanned += 1;

        let search_start = Instant::now();
        let num_docs = self.num_docs();
        let mut cp = ContentProvider::new(self);
        let mut repo_match_count: HashMap<usize, usize> = HashMap::new();
        let mut repos_with_matches: HashSet<usize> = HashSet::new();

        let bm25_avg = opts.use_bm25_scoring.then(|| score::average_doc_length(self));
        let mut df: HashMap<Vec<u8>, usize> = HashMap::new();
        let mut bm25_pending = Vec::new();

        let mut last_doc: Option<u32> = None;
        'docs: loop {
            let mut doc = mt.next_doc();
            if let Some(l) = last_doc {
                if doc != EXHAUSTED && doc <= l {
                    doc = l + 1;
                }
            }
            if doc == EXHAUSTED || doc >= num_docs {
                break;
            }
            last_doc = Some(doc);

            if cancel.is_cancelled() {
                res.stats.flush_reason = FlushReason::Timeout;
                res.stats.files_skipped += (num_docs - doc) as usize;
                break;
            }

            let repo_idx = self.repo_index(doc);
            let repo = self.repository(doc);
            if repo.tombstone {
                continue;
            }
            if !repo.file_tombstones.is_empty() {
                let name = String::from_utf8_lossy(self.file_name(doc)?);
                if repo.file_tombstones.contains(name.as_ref()) {
                    continue;
                }
            }
            if opts.shard_repo_max_match_count > 0
                && repo_match_count.get(&repo_idx).copied().unwrap_or(0) >= opts.shard_repo_max_match_count
            {
                res.stats.files_skipped += 1;
                continue;
            }

            res.stats.files_considered += 1;
            mt.prepare(doc);
            cp.set_document(doc);
            let mut known = vec![None; known_len];
            for cost in Cost::ALL {
                match mt.eval(&mut cp, cost, &mut known)? {
                    MatchState::RequiresHigherCost if cost == Cost::MAX => {
                        panic!(
                            "did not decide. repo {}, doc {doc}, known {known:?}",
                            repo.name
                        );
                    }
                    MatchState::NoMatch => continue 'docs,
                    // higher costs may still find better ranked matches
                    _ => {}
                }
            }

            let mut atoms = 0;
            let mut branch_mask = 0u64;
            mt.visit_matches(&known, 1.0, &mut |leaf, _| {
                atoms += 1;
                if let Node::Branch(b) = &leaf.node {
                    branch_mask |= b.found_mask;
                }
            });
            if branch_mask == 0 {
                branch_mask = self.branch_mask(doc);
            }
            let (branches, version) = branches_of(repo, branch_mask);

            let language = self.language(doc);
            let mut fm = FileMatch {
                file_name: String::from_utf8_lossy(self.file_name(doc)?).into_owned(),
                repository: repo.name.clone(),
                repository_id: repo.id,
                repository_priority: repo.priority(),
                sub_repository_name: self.sub_repo_name(doc).to_string(),
                sub_repository_path: self.sub_repo_path(doc).to_string(),
                version,
                language: language.to_string(),
                branches,
                checksum: self.checksum(doc)?.to_vec(),
                ..Default::default()
            };
            if opts.whole {
                fm.content = Some(cp.data(false)?.to_vec());
            }

            let ms = gather_matches(&mt, &known, !opts.chunk_matches);
            let tf = match bm25_avg {
                Some(_) => Some(score::term_frequencies(&mut cp, &ms, &mut df)?),
                None => None,
            };
            if opts.chunk_matches {
                fm.chunk_matches =
                    fill_chunk_matches(&mut cp, &ms, opts.num_context_lines, language, opts.debug_score)?;
            } else {
                fm.line_matches = fill_matches(&mut cp, &ms, opts.num_context_lines, language, opts.debug_score)?;
            }

            match (tf, bm25_avg) {
                (Some(tf), Some(avg)) => {
                    bm25_pending.push((res.files.len(), tf, score::bm25_length_ratio(self, doc, avg)));
                }
                _ => score::score_file(&mut fm, self, doc, atoms, opts),
            }
            fm.line_matches.sort_by(|a, b| b.score.total_cmp(&a.score));
            fm.chunk_matches.sort_by(|a, b| b.score.total_cmp(&a.score));

            let mc = fm.match_count();
            res.stats.match_count += mc;
            *repo_match_count.entry(repo_idx).or_default() += mc.max(1);
            repos_with_matches.insert(repo_idx);
            res.files.push(fm);

            if opts.shard_max_match_count > 0 && res.stats.match_count >= opts.shard_max_match_count {
                res.stats.flush_reason = FlushReason::MaxSize;
                res.stats.files_skipped += (num_docs - doc - 1) as usize;
                break;
            }
        }

        for (i, tf, ratio) in bm25_pending {
            score::score_bm25(&mut res.files[i], &tf, &df, ratio, num_docs as usize, opts.debug_score);
        }

        let mut ngram_lookups = 0;
        let mut ngram_matches = 0;
        mt.walk(&mut |t: &MatchTree<'_>| {
            if let Node::Substr(s) | Node::SymbolSubstr(s) = &t.node {
                ngram_lookups += s.ngram_lookups();
                ngram_matches += s.ngram_matches();
            }
        });
        res.stats.add(&Stats {
            ngram_lookups,
            ngram_matches,
            ..cp.stats
        });

        for idx in repos_with_matches {
            let r = &self.repositories()[idx];
            res.repo_urls.insert(r.name.clone(), r.file_url_template.clone());
            res.line_fragments.insert(r.name.clone(), r.line_fragment_template.clone());
        }

        sort_files(&mut res.files);
        apply_display_limits(&mut res.files, opts);
        res.stats.file_count = res.files.len();
        res.stats.match_tree_search = search_start.elapsed();
        res.stats.duration = start.elapsed();
        debug!(
            shard = self.file_name_path(),
            files_considered = res.stats.files_considered,
            files = res.stats.file_count,
            matches = res.stats.match_count,
            "searched shard"
        );
        Ok(res)
    }

    /// Repositories of this shard with at least one document matching `q`.
    pub fn list(&self, q: &Q, opts: &ListOptions) -> Result<RepoList> {
        let repos = self.repositories();
        let include: Vec<bool> = match self.simplify(q.clone()) {
            Q::Const(v) => vec![v; repos.len()],
            q => {
                let per_repo = SearchOptions {
                    shard_repo_max_match_count: 1,
                    ..Default::default()
                };
                let sr = self.search(&q, &per_repo, &Cancellation::new())?;
                let found: HashSet<u32> = sr.files.iter().map(|f| f.repository_id).collect();
                repos.iter().map(|r| found.contains(&r.id)).collect()
            }
        };

        let mut list = RepoList::default();
        for (i, repo) in repos.iter().enumerate() {
            if repo.tombstone || !include[i] {
                continue;
            }
            let stats = self.repo_stats().get(i).copied().unwrap_or_default();
            list.stats.add(&stats);
            let repository = if opts.minimal {
                Repository::new(repo.id, repo.name.clone())
            } else {
                repo.clone()
            };
            list.repos.push(RepoListEntry {
                repository,
                index_metadata: self.metadata().clone(),
                stats,
            });
        }
        Ok(list)
    }
}
