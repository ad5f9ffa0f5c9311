use sha2::{Digest, Sha256};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use super::section::{CompoundSection, SectionWriter, SimpleSection};
use super::toc::*;
use super::utils::marshal_doc_sections;
use super::writer_utils::{newline_indices, to_sized_deltas, write_var_u32};
use super::{FEATURE_VERSION, INDEX_FORMAT_VERSION, WRITE_MIN_FEATURE_VERSION};
use crate::config::WriteOptions;
use crate::error::{Result, ZoektError};
use crate::index::builder::IndexBuilder;
use crate::index::postings::PostingsBuilder;
use crate::types::IndexMetadata;

struct Writer<W: Write> {
    w: SectionWriter<W>,
    toc: TocWriter,
}

impl<W: Write> Writer<W> {
    fn simple(&mut self, tag: &str, data: &[u8]) -> Result<()> {
        let start = SimpleSection::start(&self.w);
        self.w.write(data)?;
        self.toc.add(tag, TocSection::Simple(start.finish(&self.w)));
        Ok(())
    }

    fn items<'a, I>(&mut self, tag: &str, items: I) -> Result<CompoundSection>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut b = CompoundSection::start(&self.w);
        for item in items {
            b.add_item(&mut self.w, item)?;
        }
        let sec = b.finish(&mut self.w)?;
        self.toc.add(tag, TocSection::Compound(sec));
        Ok(sec)
    }

    fn lazy_items<'a, I>(&mut self, tag: &str, items: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut b = CompoundSection::start(&self.w);
        for item in items {
            b.add_item(&mut self.w, item)?;
        }
        let sec = b.finish(&mut self.w)?;
        self.toc.add(tag, TocSection::LazyCompound(sec));
        Ok(())
    }

    /// ngram table, postings and the two offset tables of one corpus.
    fn postings(&mut self, pb: &PostingsBuilder, tags: [&str; 4]) -> Result<()> {
        let [ngram_tag, postings_tag, rune_offsets_tag, end_runes_tag] = tags;
        let keys = pb.sorted_ngrams();
        let mut ngram_text = Vec::with_capacity(keys.len() * 8);
        for k in &keys {
            ngram_text.extend_from_slice(&k.to_be_bytes());
        }
        self.simple(ngram_tag, &ngram_text)?;
        self.items(
            postings_tag,
            keys.iter().map(|k| pb.postings[k].data.as_slice()),
        )?;
        self.simple(rune_offsets_tag, &to_sized_deltas(&pb.rune_offsets))?;
        self.simple(end_runes_tag, &to_sized_deltas(&pb.end_runes))
    }
}

impl IndexBuilder {
    /// Serialize the shard into `w`, returning the writer once the TOC and
    /// its trailing pointer are written.
    pub fn write<W: Write>(&self, w: W) -> Result<W> {
        let start = Instant::now();
        let mut out = Writer {
            w: SectionWriter::new(w),
            toc: TocWriter::default(),
        };

        out.items(TAG_FILE_CONTENTS, self.contents.iter().map(Vec::as_slice))?;
        out.items(TAG_FILE_NAMES, self.names.iter().map(Vec::as_slice))?;
        let sections: Vec<Vec<u8>> = self.doc_sections.iter().map(|s| marshal_doc_sections(s)).collect();
        out.items(TAG_FILE_SECTIONS, sections.iter().map(Vec::as_slice))?;
        let newlines: Vec<Vec<u8>> = self
            .contents
            .iter()
            .map(|c| to_sized_deltas(&newline_indices(c)))
            .collect();
        out.items(TAG_NEWLINES, newlines.iter().map(Vec::as_slice))?;

        out.postings(
            &self.content_postings,
            [TAG_NGRAM_TEXT, TAG_POSTINGS, TAG_RUNE_OFFSETS, TAG_FILE_END_RUNES],
        )?;
        out.postings(
            &self.name_postings,
            [TAG_NAME_NGRAM_TEXT, TAG_NAME_POSTINGS, TAG_NAME_RUNE_OFFSETS, TAG_NAME_END_RUNES],
        )?;

        let version = self.effective_format_version();
        let meta = IndexMetadata {
            index_format_version: version,
            index_feature_version: FEATURE_VERSION,
            index_min_reader_version: WRITE_MIN_FEATURE_VERSION,
            index_time: if self.index_time != 0 { self.index_time } else { now_unix() },
            plain_ascii: self.content_postings.is_plain_ascii && self.name_postings.is_plain_ascii,
            language_map: self.language_map.clone(),
            zoekt_version: env!("CARGO_PKG_VERSION").to_string(),
            id: if self.id.is_empty() { self.content_id() } else { self.id.clone() },
        };
        out.simple(TAG_META_DATA, &serde_json::to_vec(&meta)?)?;
        let repo_meta = if version == INDEX_FORMAT_VERSION {
            let repo = self
                .repo_list
                .first()
                .ok_or_else(|| ZoektError::build("shard has no repository"))?;
            serde_json::to_vec(repo)?
        } else {
            serde_json::to_vec(&self.repo_list)?
        };
        out.simple(TAG_REPO_META_DATA, &repo_meta)?;

        let masks: Vec<u8> = self.branch_masks.iter().flat_map(|m| m.to_be_bytes()).collect();
        out.simple(TAG_BRANCH_MASKS, &masks)?;
        let sub_repos: Vec<u8> = self.sub_repos.iter().flat_map(|s| s.to_be_bytes()).collect();
        out.simple(TAG_SUB_REPOS, &sub_repos)?;
        let checksums: Vec<u8> = self.checksums.iter().flatten().copied().collect();
        out.simple(TAG_CONTENT_CHECKSUMS, &checksums)?;
        let languages: Vec<u8> = self.languages.iter().flat_map(|l| l.to_be_bytes()).collect();
        out.simple(TAG_LANGUAGES, &languages)?;
        out.simple(TAG_RUNE_DOC_SECTIONS, &marshal_doc_sections(&self.rune_doc_sections))?;
        let repos: Vec<u8> = self.repos.iter().flat_map(|r| r.to_be_bytes()).collect();
        out.simple(TAG_REPOS, &repos)?;
        out.simple(TAG_FILE_END_SYMBOL, &to_sized_deltas(&self.file_end_symbol))?;

        out.lazy_items(TAG_SYMBOL_MAP, self.symbol_strings.iter().map(String::as_bytes))?;
        let mut sym_meta = Vec::with_capacity(self.symbols.len() * 16);
        for s in &self.symbols {
            for v in [s.sym, s.kind, s.parent, s.parent_kind] {
                sym_meta.extend_from_slice(&v.to_be_bytes());
            }
        }
        out.simple(TAG_SYMBOL_META_DATA, &sym_meta)?;

        let mut ranks = Vec::new();
        for r in &self.ranks {
            write_var_u32(&mut ranks, r.len() as u32)?;
            for v in r {
                ranks.extend_from_slice(&v.to_bits().to_be_bytes());
            }
        }
        out.simple(TAG_RANKS, &ranks)?;

        out.toc.write(&mut out.w)?;
        out.w.flush()?;
        tracing::debug!(
            docs = self.num_files(),
            bytes = out.w.off(),
            version,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "serialized shard"
        );
        Ok(out.w.into_inner())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.write(Vec::new())
    }

    /// Atomically write the shard to `path`.
    pub fn write_to_path(&self, path: impl AsRef<Path>, opts: &WriteOptions) -> Result<()> {
        ShardWriter::new(path, *opts).write(self)
    }

    /// Stable identifier derived from the shard's documents.
    fn content_id(&self) -> String {
        let mut h = Sha256::new();
        for (name, sum) in self.names.iter().zip(&self.checksums) {
            h.update(name);
            h.update(sum);
        }
        for r in &self.repo_list {
            h.update(r.name.as_bytes());
        }
        h.finalize()[..8].iter().map(|b| format!("{b:02x}")).collect()
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Writes a builder to its final path through a temp file in the same
/// directory, so readers never observe a partial shard.
pub struct ShardWriter {
    path: PathBuf,
    opts: WriteOptions,
}

impl ShardWriter {
    pub fn new(path: impl AsRef<Path>, opts: WriteOptions) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            opts,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, b: &IndexBuilder) -> Result<()> {
        write_atomic(&self.path, self.opts, |w| {
            b.write(w)?;
            Ok(())
        })?;
        tracing::info!(path = %self.path.display(), docs = b.num_files(), repos = b.repositories().len(), "wrote shard");
        Ok(())
    }
}

/// Create `path` via temp file and rename, applying `opts.file_mode`.
pub(crate) fn write_atomic<F>(path: &Path, opts: WriteOptions, fill: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&mut fs::File>) -> Result<()>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".zoekt-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    {
        let mut bw = BufWriter::new(tmp.as_file_mut());
        fill(&mut bw)?;
        bw.flush()?;
    }
    tmp.as_file().sync_all()?;
    set_mode(tmp.path(), opts.file_mode)?;
    tmp.persist(path).map_err(|e| ZoektError::Io(e.error))?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::file::IndexFile;
    use crate::types::Repository;

    #[test]
    fn writes_every_section_and_toc() {
        let mut b = IndexBuilder::new(Some(Repository::new(1, "r"))).unwrap();
        b.add_file("a.txt", b"hello world\n").unwrap();
        let bytes = b.to_bytes().unwrap();
        let f = IndexFile::from_bytes("mem", bytes);
        let toc = Toc::read(&f).unwrap();
        for tag in [TAG_META_DATA, TAG_REPO_META_DATA, TAG_FILE_CONTENTS, TAG_POSTINGS, TAG_SYMBOL_MAP, TAG_RANKS] {
            assert!(toc.has(tag), "missing {tag}");
        }
        assert_eq!(toc.compound(TAG_FILE_CONTENTS).item_count(), 1);
        let meta: IndexMetadata = serde_json::from_slice(f.section(toc.simple(TAG_META_DATA)).unwrap()).unwrap();
        assert_eq!(meta.index_format_version, INDEX_FORMAT_VERSION);
        assert!(meta.plain_ascii);
        assert!(!meta.id.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn shard_writer_applies_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.zoekt");
        let mut b = IndexBuilder::new(Some(Repository::new(1, "r"))).unwrap();
        b.add_file("a", b"abc").unwrap();
        ShardWriter::new(&path, WriteOptions::with_mode(0o600)).write(&b).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
