//! Trigram code search engine in the style of Zoekt: an on-disk shard
//! format with B+-tree indexed ngram postings, a cost-staged match tree
//! evaluator, ranked line and chunk results, and shard merge, explode and
//! tombstone operations.

pub mod config;
pub mod error;
pub mod index;
pub mod query;
pub mod regex_analyze;
pub mod shard;
pub mod trigram;
pub mod types;

pub use crate::config::{EngineConfig, WriteOptions};
pub use crate::error::{Result, ZoektError};
pub use crate::index::{DirectoryIndexer, IndexBuilder};
pub use crate::query::{Cancellation, ShardedSearcher, Q};
pub use crate::shard::{read_metadata_path, IndexData, ShardReader, ShardWriter};
pub use crate::types::{
    Document, DocumentSection, FileMatch, LineMatch, ListOptions, RepoList, Repository, SearchOptions, SearchResult,
    Symbol,
};
