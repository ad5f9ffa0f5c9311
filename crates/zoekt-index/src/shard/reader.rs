use std::fs;
use std::path::{Path, PathBuf};

use super::file::IndexFile;
use super::index_data::IndexData;
use super::toc::{Toc, TAG_META_DATA, TAG_REPO_META_DATA};
use super::{meta_path, FEATURE_VERSION, INDEX_FORMAT_VERSION, NEXT_INDEX_FORMAT_VERSION};
use crate::error::{Result, ZoektError};
use crate::types::{IndexMetadata, Repository};

/// An opened shard whose TOC and metadata have been validated but whose
/// ngram index is not built yet. `read_metadata_path` stops here; searching
/// needs `load`.
pub struct ShardReader {
    pub(crate) file: IndexFile,
    pub(crate) toc: Toc,
    pub(crate) metadata: IndexMetadata,
    pub(crate) repos: Vec<Repository>,
    meta_path: Option<PathBuf>,
}

impl ShardReader {
    /// Open a shard on disk, applying its `.meta` sidecar when present.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = IndexFile::open(path)?;
        Self::new(file, Some(meta_path(path)))
    }

    /// Read a shard held in memory. No sidecar is consulted.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        Self::new(IndexFile::from_bytes(name, bytes), None)
    }

    fn new(file: IndexFile, meta_path: Option<PathBuf>) -> Result<Self> {
        let toc = Toc::read(&file)?;
        for tag in [TAG_META_DATA, TAG_REPO_META_DATA] {
            if !toc.has(tag) {
                return Err(ZoektError::format(file.name(), format!("missing required section {tag}")));
            }
        }
        let metadata: IndexMetadata = serde_json::from_slice(file.section(toc.simple(TAG_META_DATA))?)
            .map_err(|e| ZoektError::format(file.name(), format!("metaData: {e}")))?;
        check_version(file.name(), &metadata)?;

        let raw = file.section(toc.simple(TAG_REPO_META_DATA))?;
        let mut repos = if metadata.index_format_version == INDEX_FORMAT_VERSION {
            let r: Repository = serde_json::from_slice(raw)
                .map_err(|e| ZoektError::format(file.name(), format!("repoMetaData: {e}")))?;
            vec![r]
        } else {
            serde_json::from_slice::<Vec<Repository>>(raw)
                .map_err(|e| ZoektError::format(file.name(), format!("repoMetaData: {e}")))?
        };

        if let Some(mp) = meta_path.as_deref() {
            if let Some(over) = read_sidecar(mp)? {
                if over.len() != repos.len() {
                    return Err(ZoektError::format(
                        file.name(),
                        format!(
                            "{} has {} repositories, shard has {}",
                            mp.display(),
                            over.len(),
                            repos.len()
                        ),
                    ));
                }
                tracing::debug!(meta = %mp.display(), "applied repository metadata sidecar");
                repos = over;
            }
        }

        Ok(ShardReader {
            file,
            toc,
            metadata,
            repos,
            meta_path,
        })
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn repositories(&self) -> &[Repository] {
        &self.repos
    }

    pub fn meta_path(&self) -> Option<&Path> {
        self.meta_path.as_deref()
    }

    /// Build the searchable view: ngram B+-trees, offset tables and
    /// per-repository statistics.
    pub fn load(self) -> Result<IndexData> {
        IndexData::from_reader(self)
    }
}

fn check_version(file: &str, m: &IndexMetadata) -> Result<()> {
    let format_ok = m.index_format_version == INDEX_FORMAT_VERSION
        || m.index_format_version == NEXT_INDEX_FORMAT_VERSION;
    if !format_ok || m.index_min_reader_version > FEATURE_VERSION {
        return Err(ZoektError::VersionMismatch {
            file: file.to_string(),
            format_version: m.index_format_version,
            min_reader_version: m.index_min_reader_version,
            feature_version: FEATURE_VERSION,
        });
    }
    Ok(())
}

/// Repository records from a `.meta` sidecar: a JSON array, or a single
/// object for single repository shards.
fn read_sidecar(path: &Path) -> Result<Option<Vec<Repository>>> {
    let raw = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let v: serde_json::Value = serde_json::from_slice(&raw)
        .map_err(|e| ZoektError::format(path.display().to_string(), e.to_string()))?;
    let repos = if v.is_array() {
        serde_json::from_value(v)?
    } else {
        vec![serde_json::from_value(v)?]
    };
    Ok(Some(repos))
}

/// Repository records and index metadata of an open shard file.
pub fn read_metadata(file: IndexFile) -> Result<(Vec<Repository>, IndexMetadata)> {
    let r = ShardReader::new(file, None)?;
    Ok((r.repos, r.metadata))
}

/// Like `read_metadata`, but for a path, with the `.meta` sidecar applied.
pub fn read_metadata_path(path: impl AsRef<Path>) -> Result<(Vec<Repository>, IndexMetadata)> {
    let r = ShardReader::open(path)?;
    Ok((r.repos, r.metadata))
}
