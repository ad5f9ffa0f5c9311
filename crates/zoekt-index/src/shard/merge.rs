//! Merging single repository shards into one compound shard, and exploding
//! a compound shard back into one shard per repository. Both replay the
//! stored documents through a fresh `IndexBuilder`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::{shard_name, IndexData, INDEX_FORMAT_VERSION, NEXT_INDEX_FORMAT_VERSION};
use crate::config::WriteOptions;
use crate::error::{Result, ZoektError};
use crate::index::builder::{IndexBuilder, NOT_INDEXED_MARKER, SKIPPED_LANGUAGE};
use crate::types::{Document, Repository};

/// Reconstruct document `doc` of `d` as it was added.
fn stored_document(d: &IndexData, doc: u32) -> Result<Document> {
    let content = d.content(doc)?;
    let language = d.language(doc);
    let mut out = Document {
        name: String::from_utf8_lossy(d.file_name(doc)?).into_owned(),
        branches: d.branch_names(doc),
        sub_repository_path: d.sub_repo_path(doc).to_string(),
        language: language.to_string(),
        ranks: d.ranks(doc).to_vec(),
        ..Default::default()
    };

    if language == SKIPPED_LANGUAGE {
        if let Some(reason) = content.strip_prefix(NOT_INDEXED_MARKER.as_bytes()) {
            out.skip_reason = Some(String::from_utf8_lossy(reason).into_owned());
            out.language.clear();
            return Ok(out);
        }
    }

    out.content = content.to_vec();
    out.symbols = d.doc_sections(doc)?;
    out.symbols_meta = (0..out.symbols.len())
        .map(|i| d.symbol(doc, i))
        .collect::<Result<_>>()?;
    Ok(out)
}

/// Walk the documents of `d`, calling `repo_changed` whenever the owning
/// repository changes. Repository indexes must be non-decreasing.
fn replay<F, G>(d: &IndexData, mut repo_changed: F, mut add: G) -> Result<()>
where
    F: FnMut(&Repository) -> Result<()>,
    G: FnMut(Document) -> Result<()>,
{
    let mut last: Option<usize> = None;
    for doc in 0..d.num_docs() {
        let r = d.repo_index(doc);
        if last.is_some_and(|l| r < l) {
            return Err(ZoektError::format(
                d.file_name_path(),
                format!("non-contiguous repo ids for document {doc}: old={}, current={r}", last.unwrap_or(0)),
            ));
        }
        let repo = &d.repositories()[r];
        if last != Some(r) {
            last = Some(r);
            if repo.tombstone {
                warn!(shard = d.file_name_path(), repo = %repo.name, "skipping tombstoned repository");
            } else {
                repo_changed(repo)?;
            }
        }
        if repo.tombstone {
            continue;
        }
        add(stored_document(d, doc)?)?;
    }
    Ok(())
}

/// One compound builder holding every live repository of `shards`, highest
/// priority first.
pub fn merge(shards: &[&IndexData]) -> Result<IndexBuilder> {
    let mut ordered: Vec<&IndexData> = shards.to_vec();
    let priority = |d: &IndexData| d.repositories().first().map_or(0.0, Repository::priority);
    ordered.sort_by(|a, b| priority(b).total_cmp(&priority(a)));

    let mut ib = IndexBuilder::empty().compound();
    for d in ordered {
        // the builder is shared by both callbacks
        let ib = std::cell::RefCell::new(&mut ib);
        replay(
            d,
            |repo| ib.borrow_mut().set_repository(repo),
            |doc| ib.borrow_mut().add(doc),
        )?;
    }
    Ok(ib)
}

pub fn merge_to_bytes(shards: &[&IndexData]) -> Result<Vec<u8>> {
    merge(shards)?.to_bytes()
}

/// Name of a compound shard: a hash over its repository names.
fn compound_prefix(b: &IndexBuilder) -> String {
    let mut h = Sha256::new();
    for r in b.repositories() {
        h.update(r.name.as_bytes());
        h.update([0]);
    }
    let digest: String = h.finalize()[..10].iter().map(|b| format!("{b:02x}")).collect();
    format!("compound-{digest}")
}

/// Merge `shards` and write the result into `dir`. Returns the new path.
pub fn merge_to_dir(shards: &[&IndexData], dir: impl AsRef<Path>, opts: &WriteOptions) -> Result<PathBuf> {
    let b = merge(shards)?;
    let path = shard_name(dir.as_ref(), &compound_prefix(&b), NEXT_INDEX_FORMAT_VERSION, 0);
    b.write_to_path(&path, opts)?;
    info!(
        path = %path.display(),
        inputs = shards.len(),
        repos = b.repositories().len(),
        docs = b.num_files(),
        "merged shards"
    );
    Ok(path)
}

/// One single repository builder per live repository of `d`, in document
/// order.
pub fn explode(d: &IndexData) -> Result<Vec<IndexBuilder>> {
    let out = std::cell::RefCell::new(Vec::<IndexBuilder>::new());
    replay(
        d,
        |repo| {
            out.borrow_mut().push(IndexBuilder::new(Some(repo.clone()))?);
            Ok(())
        },
        |doc| match out.borrow_mut().last_mut() {
            Some(b) => b.add(doc),
            None => Err(ZoektError::build("document before its repository")),
        },
    )?;
    Ok(out.into_inner())
}

/// Exploded shards keyed by repository name.
pub fn explode_to_bytes(d: &IndexData) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut out = BTreeMap::new();
    for b in explode(d)? {
        let name = b.repositories().first().map(|r| r.name.clone()).unwrap_or_default();
        out.insert(name, b.to_bytes()?);
    }
    Ok(out)
}

/// Explode `d` into `dir`, one `<repo>_v16.00000.zoekt` per repository.
pub fn explode_to_dir(d: &IndexData, dir: impl AsRef<Path>, opts: &WriteOptions) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for b in explode(d)? {
        let name = b.repositories().first().map(|r| r.name.clone()).unwrap_or_default();
        let path = shard_name(dir.as_ref(), &name, INDEX_FORMAT_VERSION, 0);
        b.write_to_path(&path, opts)?;
        paths.push(path);
    }
    info!(shard = d.file_name_path(), outputs = paths.len(), "exploded shard");
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentSection, Symbol};

    fn single(id: u32, name: &str, docs: Vec<Document>) -> IndexData {
        let repo = Repository::new(id, name).with_branches(&[("main", "abc")]);
        let mut b = IndexBuilder::new(Some(repo)).unwrap();
        for d in docs {
            b.add(d.with_branches(&["main"])).unwrap();
        }
        IndexData::from_bytes(name, b.to_bytes().unwrap()).unwrap()
    }

    #[test]
    fn merged_shard_keeps_documents_and_symbols() {
        let sym = Symbol {
            sym: "main".into(),
            kind: "function".into(),
            ..Default::default()
        };
        let a = single(
            1,
            "a",
            vec![Document::new("a.go", "func main() {}\n")
                .with_symbol(DocumentSection { start: 5, end: 9 }, Some(sym.clone()))],
        );
        let b = single(2, "b", vec![Document::new("b1", "one\n"), Document::new("b2", "two\n")]);

        let m = IndexData::from_bytes("m", merge_to_bytes(&[&a, &b]).unwrap()).unwrap();
        assert_eq!(m.metadata().index_format_version, NEXT_INDEX_FORMAT_VERSION);
        assert_eq!(m.repositories().len(), 2);
        assert_eq!(m.num_docs(), 3);
        let doc = (0..3).find(|&d| m.file_name(d).unwrap() == b"a.go").unwrap();
        assert_eq!(m.doc_sections(doc).unwrap(), vec![DocumentSection { start: 5, end: 9 }]);
        assert_eq!(m.symbol(doc, 0).unwrap(), Some(sym));
        assert_eq!(m.branch_names(doc), vec!["main".to_string()]);
    }

    #[test]
    fn explode_inverts_merge() {
        let a = single(1, "a", vec![Document::new("x", "alpha\n")]);
        let b = single(2, "b", vec![Document::new("y", "beta\n"), Document::new("z", "gamma\n")]);
        let m = IndexData::from_bytes("m", merge_to_bytes(&[&a, &b]).unwrap()).unwrap();

        let parts = explode_to_bytes(&m).unwrap();
        assert_eq!(parts.len(), 2);
        let pa = IndexData::from_bytes("a", parts["a"].clone()).unwrap();
        let pb = IndexData::from_bytes("b", parts["b"].clone()).unwrap();
        assert_eq!(pa.metadata().index_format_version, INDEX_FORMAT_VERSION);
        assert_eq!(pa.num_docs(), 1);
        assert_eq!(pb.num_docs(), 2);
        assert_eq!(pb.content(1).unwrap(), b"gamma\n");
    }

    #[test]
    fn skipped_documents_survive_merge() {
        let mut doc = Document::new("big.bin", "ignored");
        doc.skip_reason = Some("too large".into());
        let a = single(1, "a", vec![doc]);
        let m = IndexData::from_bytes("m", merge_to_bytes(&[&a]).unwrap()).unwrap();
        assert_eq!(m.content(0).unwrap(), b"NOT-INDEXED: too large");
        assert_eq!(m.language(0), SKIPPED_LANGUAGE);
    }

    #[test]
    fn tombstoned_repositories_are_dropped() {
        let a = single(1, "a", vec![Document::new("x", "alpha\n")]);
        let mut repo = Repository::new(2, "b");
        repo.tombstone = true;
        let mut bb = IndexBuilder::new(Some(repo)).unwrap();
        bb.add_file("y", b"beta\n").unwrap();
        let b = IndexData::from_bytes("b", bb.to_bytes().unwrap()).unwrap();

        let m = IndexData::from_bytes("m", merge_to_bytes(&[&a, &b]).unwrap()).unwrap();
        assert_eq!(m.repositories().len(), 1);
        assert_eq!(m.num_docs(), 1);
    }
}
