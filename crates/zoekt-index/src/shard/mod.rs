//! Shard module: the on-disk format (`section`, `toc`, `btree`), the writer
//! and reader, and shard lifecycle operations (`merge`, `tombstone`).
//!
//! Reading produces an immutable `IndexData` that searches borrow from; the
//! search logic itself lives in `query::searcher`.

/// Single repository shards; repository metadata is a JSON object.
pub const INDEX_FORMAT_VERSION: u32 = 16;
/// Compound shards; repository metadata is a JSON array.
pub const NEXT_INDEX_FORMAT_VERSION: u32 = 17;
/// Feature level of this reader.
pub const FEATURE_VERSION: u32 = 12;
/// Oldest reader feature level able to read what this writer produces.
pub const WRITE_MIN_FEATURE_VERSION: u32 = 10;

/// Suffix of the repository metadata sidecar next to a shard.
pub const META_SUFFIX: &str = ".meta";
pub const SHARD_SUFFIX: &str = ".zoekt";

pub(crate) mod utils;
pub(crate) mod writer_utils;

pub mod btree;
mod file;
pub mod section;
pub mod toc;

pub use file::IndexFile;

mod writer;
pub use writer::ShardWriter;

mod reader;
pub use reader::{read_metadata, read_metadata_path, ShardReader};

pub(crate) mod index_data;
pub use index_data::IndexData;

pub mod merge;
pub mod tombstone;

use std::path::{Path, PathBuf};

/// `<prefix>_v<version>.<n>.zoekt`, with path separators in the prefix
/// escaped so any repository name yields a flat file name.
pub fn shard_name(dir: &Path, prefix: &str, version: u32, n: usize) -> PathBuf {
    let escaped: String = prefix
        .chars()
        .map(|c| match c {
            '/' => "%2F".to_string(),
            '%' => "%25".to_string(),
            c => c.to_string(),
        })
        .collect();
    dir.join(format!("{escaped}_v{version}.{n:05}{SHARD_SUFFIX}"))
}

/// Path of the `.meta` sidecar for `shard`.
pub fn meta_path(shard: &Path) -> PathBuf {
    let mut s = shard.as_os_str().to_owned();
    s.push(META_SUFFIX);
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_names_escape_slashes() {
        let p = shard_name(Path::new("/idx"), "github.com/a/b", 16, 0);
        assert_eq!(p, Path::new("/idx/github.com%2Fa%2Fb_v16.00000.zoekt"));
        assert_eq!(meta_path(&p), Path::new("/idx/github.com%2Fa%2Fb_v16.00000.zoekt.meta"));
    }
}
