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

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Half-open byte (or rune) range inside a document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DocumentSection {
    pub start: u32,
    pub end: u32,
}

/// Symbol information attached to a symbol section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct Symbol {
    pub sym: String,
    pub kind: String,
    pub parent: String,
    pub parent_kind: String,
}

/// A document as handed to the builder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Document {
    pub name: String,
    pub content: Vec<u8>,
    pub branches: Vec<String>,
    #[serde(default)]
    pub sub_repository_path: String,
    #[serde(default)]
    pub language: String,
    /// Symbol definitions as byte ranges, sorted and non-overlapping.
    #[serde(default)]
    pub symbols: Vec<DocumentSection>,
    /// Parallel to `symbols`.
    #[serde(default)]
    pub symbols_meta: Vec<Option<Symbol>>,
    /// Set when the content was not indexed (too large, binary, ...).
    #[serde(default)]
    pub skip_reason: Option<String>,
    /// Rank signals; the first entry is a log2 count capped at 32.
    #[serde(default)]
    pub ranks: Vec<f64>,
}

impl Document {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Document {
            name: name.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_branches(mut self, branches: &[&str]) -> Self {
        self.branches = branches.iter().map(|b| b.to_string()).collect();
        self
    }

    pub fn with_language(mut self, lang: impl Into<String>) -> Self {
        self.language = lang.into();
        self
    }

    pub fn with_symbol(mut self, sec: DocumentSection, sym: Option<Symbol>) -> Self {
        self.symbols.push(sec);
        self.symbols_meta.push(sym);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct RepositoryBranch {
    pub name: String,
    pub version: String,
}

/// Packed raw-config booleans. Each property has a positive and a negative
/// bit so a query can ask for either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RawConfig(pub u8);

impl RawConfig {
    pub const PUBLIC: RawConfig = RawConfig(1);
    pub const PRIVATE: RawConfig = RawConfig(2);
    pub const FORK: RawConfig = RawConfig(4);
    pub const NO_FORK: RawConfig = RawConfig(8);
    pub const ARCHIVED: RawConfig = RawConfig(16);
    pub const NO_ARCHIVED: RawConfig = RawConfig(32);

    pub fn contains(self, other: RawConfig) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for RawConfig {
    type Output = RawConfig;
    fn bitor(self, rhs: RawConfig) -> RawConfig {
        RawConfig(self.0 | rhs.0)
    }
}

/// Repository metadata stored per shard (and in the `.meta` sidecar).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Repository {
    pub id: u32,
    pub name: String,
    pub url: String,
    pub source: String,
    pub branches: Vec<RepositoryBranch>,
    pub sub_repo_map: BTreeMap<String, Repository>,
    pub commit_url_template: String,
    pub file_url_template: String,
    pub line_fragment_template: String,
    pub raw_config: BTreeMap<String, String>,
    pub rank: u16,
    pub index_options: String,
    pub has_symbols: bool,
    pub tombstone: bool,
    /// Unix seconds.
    pub latest_commit_date: i64,
    /// File names excluded from search without reindexing.
    pub file_tombstones: BTreeSet<String>,
}

impl Repository {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Repository {
            id,
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_branches(mut self, branches: &[(&str, &str)]) -> Self {
        self.branches = branches
            .iter()
            .map(|(n, v)| RepositoryBranch {
                name: n.to_string(),
                version: v.to_string(),
            })
            .collect();
        self
    }

    /// Priority from raw config; drives merge order and the derived rank.
    pub fn priority(&self) -> f64 {
        self.raw_config
            .get("priority")
            .and_then(|p| p.parse::<f64>().ok())
            .unwrap_or(0.0)
    }

    pub fn raw_config_flags(&self) -> RawConfig {
        let flag = |key: &str, yes: RawConfig, no: RawConfig| {
            match self.raw_config.get(key).map(String::as_str) {
                Some("1") | Some("true") => yes,
                _ => no,
            }
        };
        flag("public", RawConfig::PUBLIC, RawConfig::PRIVATE)
            | flag("fork", RawConfig::FORK, RawConfig::NO_FORK)
            | flag("archived", RawConfig::ARCHIVED, RawConfig::NO_ARCHIVED)
    }

    /// Rank derived from priority, squashed into u16 range.
    pub fn rank_from_priority(&self) -> u16 {
        let p = self.priority();
        if p <= 0.0 {
            return 0;
        }
        ((p / (5000.0 + p)) * u16::MAX as f64) as u16
    }

    pub fn branch_names(&self) -> impl Iterator<Item = &str> {
        self.branches.iter().map(|b| b.name.as_str())
    }
}

/// Index-wide metadata, stored as JSON in the `metaData` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct IndexMetadata {
    pub index_format_version: u32,
    pub index_feature_version: u32,
    pub index_min_reader_version: u32,
    /// Unix seconds.
    pub index_time: i64,
    pub plain_ascii: bool,
    pub language_map: BTreeMap<String, u16>,
    pub zoekt_version: String,
    pub id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RepoStats {
    pub repos: usize,
    pub shards: usize,
    pub documents: usize,
    pub index_bytes: i64,
    pub content_bytes: i64,
    pub new_lines_count: u64,
    pub default_branch_new_lines_count: u64,
    pub other_branches_new_lines_count: u64,
}

impl RepoStats {
    pub fn add(&mut self, o: &RepoStats) {
        self.repos += o.repos;
        self.shards += o.shards;
        self.documents += o.documents;
        self.index_bytes += o.index_bytes;
        self.content_bytes += o.content_bytes;
        self.new_lines_count += o.new_lines_count;
        self.default_branch_new_lines_count += o.default_branch_new_lines_count;
        self.other_branches_new_lines_count += o.other_branches_new_lines_count;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepoListEntry {
    pub repository: Repository,
    pub index_metadata: IndexMetadata,
    pub stats: RepoStats,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RepoList {
    pub repos: Vec<RepoListEntry>,
    pub stats: RepoStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListOptions {
    /// Only return repository ids and names.
    pub minimal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineFragmentMatch {
    /// Offset within the line, in bytes.
    pub line_offset: u32,
    /// Offset within the file, in bytes.
    pub offset: u32,
    pub match_length: u32,
    pub symbol_info: Option<Symbol>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LineMatch {
    pub line: Vec<u8>,
    pub line_start: u32,
    pub line_end: u32,
    /// 1-based.
    pub line_number: u32,
    pub before: Vec<u8>,
    pub after: Vec<u8>,
    pub file_name: bool,
    pub score: f64,
    pub debug_score: String,
    pub line_fragments: Vec<LineFragmentMatch>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Location {
    pub byte_offset: u32,
    /// 1-based.
    pub line_number: u32,
    /// 1-based, in runes.
    pub column: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Range {
    pub start: Location,
    pub end: Location,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChunkMatch {
    /// Full lines covered by the chunk, context included.
    pub content: Vec<u8>,
    pub content_start: Location,
    pub file_name: bool,
    pub ranges: Vec<Range>,
    pub symbol_info: Vec<Option<Symbol>>,
    pub score: f64,
    pub debug_score: String,
    pub best_line_match: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FileMatch {
    pub file_name: String,
    pub repository: String,
    pub repository_id: u32,
    pub repository_priority: f64,
    pub sub_repository_name: String,
    pub sub_repository_path: String,
    pub version: String,
    pub language: String,
    pub branches: Vec<String>,
    pub line_matches: Vec<LineMatch>,
    pub chunk_matches: Vec<ChunkMatch>,
    /// Only set with `SearchOptions::whole`.
    pub content: Option<Vec<u8>>,
    pub checksum: Vec<u8>,
    pub score: f64,
    pub debug: String,
}

impl FileMatch {
    pub(crate) fn add_score(&mut self, what: &str, computed: f64, raw: Option<f64>, debug: bool) {
        if computed != 0.0 && debug {
            match raw {
                Some(r) => self.debug.push_str(&format!("{what}:{computed:.2}({r:.2}), ")),
                None => self.debug.push_str(&format!("{what}:{computed:.2}, ")),
            }
        }
        self.score += computed;
    }

    pub fn match_count(&self) -> usize {
        if self.chunk_matches.is_empty() {
            self.line_matches.iter().map(|l| l.line_fragments.len()).sum()
        } else {
            self.chunk_matches.iter().map(|c| c.ranges.len()).sum()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum FlushReason {
    #[default]
    None,
    Timeout,
    FinalFlush,
    MaxSize,
}

/// Counters describing the work a search did.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Stats {
    pub content_bytes_loaded: i64,
    pub index_bytes_loaded: i64,
    pub crashes: usize,
    pub duration: Duration,
    pub file_count: usize,
    pub shard_files_considered: usize,
    pub files_considered: usize,
    pub files_loaded: usize,
    pub files_skipped: usize,
    pub shards_scanned: usize,
    pub shards_skipped: usize,
    pub shards_skipped_filter: usize,
    pub match_count: usize,
    pub ngram_matches: usize,
    pub ngram_lookups: usize,
    pub regexps_considered: usize,
    pub match_tree_construction: Duration,
    pub match_tree_search: Duration,
    pub flush_reason: FlushReason,
}

impl Stats {
    pub fn add(&mut self, o: &Stats) {
        self.content_bytes_loaded += o.content_bytes_loaded;
        self.index_bytes_loaded += o.index_bytes_loaded;
        self.crashes += o.crashes;
        self.duration += o.duration;
        self.file_count += o.file_count;
        self.shard_files_considered += o.shard_files_considered;
        self.files_considered += o.files_considered;
        self.files_loaded += o.files_loaded;
        self.files_skipped += o.files_skipped;
        self.shards_scanned += o.shards_scanned;
        self.shards_skipped += o.shards_skipped;
        self.shards_skipped_filter += o.shards_skipped_filter;
        self.match_count += o.match_count;
        self.ngram_matches += o.ngram_matches;
        self.ngram_lookups += o.ngram_lookups;
        self.regexps_considered += o.regexps_considered;
        self.match_tree_construction += o.match_tree_construction;
        self.match_tree_search += o.match_tree_search;
        if o.flush_reason != FlushReason::None {
            self.flush_reason = o.flush_reason;
        }
    }

    pub fn zero(&self) -> bool {
        *self == Stats::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SearchResult {
    pub files: Vec<FileMatch>,
    pub stats: Stats,
    /// Repository name to file URL template.
    pub repo_urls: BTreeMap<String, String>,
    /// Repository name to line fragment template.
    pub line_fragments: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchOptions {
    /// Only count candidate documents, do not search.
    pub estimate_doc_count: bool,
    /// Return the full content of matching files.
    pub whole: bool,
    /// Stop a shard after this many matches (0 = unlimited).
    pub shard_max_match_count: usize,
    /// Stop the whole search after this many matches (0 = unlimited).
    pub total_max_match_count: usize,
    /// Per repository cap within a shard (0 = unlimited).
    pub shard_repo_max_match_count: usize,
    /// Budget for callers that derive a cancellation deadline from it.
    pub max_wall_time: Option<Duration>,
    /// Truncate the sorted file list (0 = unlimited).
    pub max_doc_display_count: usize,
    /// Truncate matches per result set after sorting (0 = unlimited).
    pub max_match_display_count: usize,
    pub num_context_lines: usize,
    pub chunk_matches: bool,
    pub use_document_ranks: bool,
    pub document_ranks_weight: f64,
    pub use_bm25_scoring: bool,
    pub debug_score: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            estimate_doc_count: false,
            whole: false,
            shard_max_match_count: 0,
            total_max_match_count: 0,
            shard_repo_max_match_count: 0,
            max_wall_time: None,
            max_doc_display_count: 0,
            max_match_display_count: 0,
            num_context_lines: 0,
            chunk_matches: false,
            use_document_ranks: false,
            document_ranks_weight: 0.0,
            use_bm25_scoring: false,
            debug_score: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_config_flags() {
        let mut r = Repository::new(1, "r");
        r.raw_config.insert("public".into(), "1".into());
        r.raw_config.insert("fork".into(), "0".into());
        let f = r.raw_config_flags();
        assert!(f.contains(RawConfig::PUBLIC));
        assert!(f.contains(RawConfig::NO_FORK));
        assert!(f.contains(RawConfig::NO_ARCHIVED));
        assert!(!f.contains(RawConfig::PRIVATE));
    }

    #[test]
    fn rank_from_priority_is_monotonic() {
        let mut lo = Repository::new(1, "a");
        lo.raw_config.insert("priority".into(), "10".into());
        let mut hi = Repository::new(2, "b");
        hi.raw_config.insert("priority".into(), "1000".into());
        assert!(lo.rank_from_priority() < hi.rank_from_priority());
        assert_eq!(Repository::new(3, "c").rank_from_priority(), 0);
    }

    #[test]
    fn repository_json_tolerates_missing_fields() {
        let r: Repository = serde_json::from_str(r#"{"id": 7, "name": "x"}"#).unwrap();
        assert_eq!(r.id, 7);
        assert!(!r.tombstone);
    }
}
