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

//! `IndexData`: the immutable, searchable view of one shard.

use std::collections::HashMap;
use std::path::Path;

use super::btree::{BtreeIndex, BtreeOpts};
use super::file::IndexFile;
use super::reader::ShardReader;
use super::section::{CompoundIndex, LazyCompound, SimpleSection};
use super::toc::*;
use super::utils::{from_sized_deltas, read_u32_be, read_u64_be, read_uvarint, unmarshal_doc_sections};
use crate::error::{Result, ZoektError};
use crate::index::builder::SymbolRecord;
use crate::index::postings::RUNE_OFFSET_FREQUENCY;
use crate::trigram::{decode_rune, Ngram};
use crate::types::{DocumentSection, IndexMetadata, RawConfig, RepoStats, Repository, Symbol};

const CHECKSUM_SIZE: u32 = 32;

/// Which of the two indexed corpora an offset refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Corpus {
    Content,
    Name,
}

struct CorpusData {
    items: CompoundIndex,
    ngrams: BtreeIndex,
    /// Byte offset (corpus relative) of every `RUNE_OFFSET_FREQUENCY`th rune.
    rune_offsets: Vec<u32>,
    /// Cumulative rune count at the end of each document.
    end_runes: Vec<u32>,
}

pub struct IndexData {
    pub(crate) file: IndexFile,
    metadata: IndexMetadata,
    repo_metadata: Vec<Repository>,
    repo_stats: Vec<RepoStats>,
    raw_configs: Vec<RawConfig>,
    branch_ids: Vec<HashMap<String, u64>>,
    sub_repo_paths: Vec<Vec<String>>,

    content: CorpusData,
    name: CorpusData,
    file_sections: CompoundIndex,
    newlines: CompoundIndex,

    branch_masks: Vec<u64>,
    sub_repos: Vec<u32>,
    checksums: SimpleSection,
    languages: Vec<u16>,
    language_names: HashMap<u16, String>,
    repos: Vec<u16>,

    rune_doc_sections: Vec<DocumentSection>,
    file_end_symbol: Vec<u32>,
    symbol_map: LazyCompound,
    symbol_meta: SimpleSection,
    ranks: Vec<Vec<f64>>,
}

impl IndexData {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        ShardReader::open(path)?.load()
    }

    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        ShardReader::from_bytes(name, bytes)?.load()
    }

    pub(crate) fn from_reader(r: ShardReader) -> Result<Self> {
        let ShardReader {
            file,
            toc,
            metadata,
            repos: repo_metadata,
            ..
        } = r;
        let name = file.name().to_string();
        let bad = |msg: String| ZoektError::format(name.clone(), msg);

        let content = load_corpus(
            &file,
            &toc,
            [TAG_FILE_CONTENTS, TAG_NGRAM_TEXT, TAG_POSTINGS, TAG_RUNE_OFFSETS, TAG_FILE_END_RUNES],
        )?;
        let name_corpus = load_corpus(
            &file,
            &toc,
            [TAG_FILE_NAMES, TAG_NAME_NGRAM_TEXT, TAG_NAME_POSTINGS, TAG_NAME_RUNE_OFFSETS, TAG_NAME_END_RUNES],
        )?;
        let n = content.items.len();
        let file_sections = CompoundIndex::load(&file, &toc.compound(TAG_FILE_SECTIONS))?;
        let newlines = CompoundIndex::load(&file, &toc.compound(TAG_NEWLINES))?;

        for (what, count) in [
            ("fileNames", name_corpus.items.len()),
            ("fileSections", file_sections.len()),
            ("newlines", newlines.len()),
            ("fileEndRunes", content.end_runes.len()),
            ("nameEndRunes", name_corpus.end_runes.len()),
        ] {
            if count != n {
                return Err(bad(format!("{what} has {count} entries, want {n} documents")));
            }
        }

        let branch_masks = optional_u64s(&file, toc.simple(TAG_BRANCH_MASKS), n, "branchMasks")?;
        let sub_repos = optional_u32s(&file, toc.simple(TAG_SUB_REPOS), n, "subRepos")?;
        let checksums = toc.simple(TAG_CONTENT_CHECKSUMS);
        if checksums.sz != 0 && checksums.sz != CHECKSUM_SIZE * n as u32 {
            return Err(bad(format!("contentChecksums has {} bytes for {n} documents", checksums.sz)));
        }
        let languages = optional_u16s(&file, toc.simple(TAG_LANGUAGES), n, "languages")?;
        let repos = optional_u16s(&file, toc.simple(TAG_REPOS), n, "repos")?;

        let rune_doc_sections = if toc.has(TAG_RUNE_DOC_SECTIONS) {
            unmarshal_doc_sections(file.section(toc.simple(TAG_RUNE_DOC_SECTIONS))?)
                .ok_or_else(|| bad("corrupt runeDocSections".into()))?
        } else {
            Vec::new()
        };
        let mut file_end_symbol = if toc.has(TAG_FILE_END_SYMBOL) {
            from_sized_deltas(file.section(toc.simple(TAG_FILE_END_SYMBOL))?)
                .ok_or_else(|| bad("corrupt fileEndSymbol".into()))?
        } else {
            Vec::new()
        };
        if file_end_symbol.is_empty() {
            file_end_symbol = vec![0; n + 1];
        }
        if file_end_symbol.len() != n + 1
            || file_end_symbol.last().copied() != Some(rune_doc_sections.len() as u32)
            || file_end_symbol.windows(2).any(|w| w[0] > w[1])
        {
            return Err(bad("fileEndSymbol does not match runeDocSections".into()));
        }
        let symbol_meta = toc.simple(TAG_SYMBOL_META_DATA);
        if symbol_meta.sz != 0 && symbol_meta.sz as usize != rune_doc_sections.len() * 16 {
            return Err(bad(format!(
                "symbolMetaData has {} bytes for {} symbols",
                symbol_meta.sz,
                rune_doc_sections.len()
            )));
        }
        let symbol_map = LazyCompound::new(toc.compound(TAG_SYMBOL_MAP));
        let ranks = decode_ranks(&file, toc.simple(TAG_RANKS), n)?;

        if repo_metadata.is_empty() {
            return Err(bad("shard has no repositories".into()));
        }
        let language_names = metadata
            .language_map
            .iter()
            .map(|(k, v)| (*v, k.clone()))
            .collect();
        let raw_configs = repo_metadata.iter().map(Repository::raw_config_flags).collect();
        let branch_ids = repo_metadata
            .iter()
            .map(|r| {
                r.branches
                    .iter()
                    .enumerate()
                    .map(|(i, b)| (b.name.clone(), 1u64 << i))
                    .collect()
            })
            .collect();
        let sub_repo_paths = repo_metadata
            .iter()
            .map(|r| {
                let mut paths = vec![String::new()];
                paths.extend(r.sub_repo_map.keys().cloned());
                paths
            })
            .collect();

        let mut d = IndexData {
            file,
            metadata,
            repo_metadata,
            repo_stats: Vec::new(),
            raw_configs,
            branch_ids,
            sub_repo_paths,
            content,
            name: name_corpus,
            file_sections,
            newlines,
            branch_masks,
            sub_repos,
            checksums,
            languages,
            language_names,
            repos,
            rune_doc_sections,
            file_end_symbol,
            symbol_map,
            symbol_meta,
            ranks,
        };
        d.repo_stats = d.calculate_stats()?;
        tracing::debug!(
            file = d.file.name(),
            docs = n,
            repos = d.repo_metadata.len(),
            ngrams = d.content.ngrams.len(),
            "loaded shard"
        );
        Ok(d)
    }

    /// Per repository statistics in one pass over the document to repository
    /// mapping, which must be contiguous.
    fn calculate_stats(&self) -> Result<Vec<RepoStats>> {
        let mut stats = vec![
            RepoStats {
                repos: 1,
                shards: 1,
                ..Default::default()
            };
            self.repo_metadata.len()
        ];
        let mut seen = vec![false; self.repo_metadata.len()];
        let mut last: Option<usize> = None;
        for doc in 0..self.num_docs() {
            let r = self.repos[doc as usize] as usize;
            if r >= self.repo_metadata.len() {
                return Err(ZoektError::format(
                    self.file.name(),
                    format!("document {doc} references repository {r} of {}", self.repo_metadata.len()),
                ));
            }
            if last != Some(r) {
                if seen[r] {
                    return Err(ZoektError::format(
                        self.file.name(),
                        format!("documents of repository {r} are not contiguous (document {doc})"),
                    ));
                }
                seen[r] = true;
                last = Some(r);
            }
            let s = &mut stats[r];
            s.documents += 1;
            s.content_bytes += self.content.items.range(doc as usize).map_or(0, |(_, sz)| sz as i64)
                + self.name.items.range(doc as usize).map_or(0, |(_, sz)| sz as i64);
            let nl = self.newline_count(doc)?;
            s.new_lines_count += nl;
            let mask = self.branch_masks[doc as usize];
            if mask & 1 != 0 {
                s.default_branch_new_lines_count += nl;
            }
            s.other_branches_new_lines_count += nl * (mask & !1).count_ones() as u64;
        }
        let total_content: i64 = stats.iter().map(|s| s.content_bytes).sum::<i64>().max(1);
        let mem = self.memory_use() as i64;
        for s in &mut stats {
            s.index_bytes = mem * s.content_bytes / total_content;
        }
        Ok(stats)
    }

    pub fn num_docs(&self) -> u32 {
        self.content.items.len() as u32
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn repositories(&self) -> &[Repository] {
        &self.repo_metadata
    }

    pub fn repo_stats(&self) -> &[RepoStats] {
        &self.repo_stats
    }

    pub fn file_name_path(&self) -> &str {
        self.file.name()
    }

    pub fn plain_ascii(&self) -> bool {
        self.metadata.plain_ascii
    }

    /// Approximate heap plus mapped bytes held by this shard.
    pub fn memory_use(&self) -> usize {
        let corpus = |c: &CorpusData| {
            c.items.offsets.len() * 4 + c.ngrams.size_bytes() + (c.rune_offsets.len() + c.end_runes.len()) * 4
        };
        corpus(&self.content)
            + corpus(&self.name)
            + (self.file_sections.offsets.len() + self.newlines.offsets.len()) * 4
            + self.branch_masks.len() * 8
            + self.sub_repos.len() * 4
            + (self.languages.len() + self.repos.len()) * 2
            + self.rune_doc_sections.len() * 8
            + self.file_end_symbol.len() * 4
            + self.ranks.iter().map(|r| r.len() * 8 + 24).sum::<usize>()
            + self.file.len() as usize
    }

    fn corpus(&self, c: Corpus) -> &CorpusData {
        match c {
            Corpus::Content => &self.content,
            Corpus::Name => &self.name,
        }
    }

    pub fn content(&self, doc: u32) -> Result<&[u8]> {
        self.content.items.item(&self.file, doc as usize)
    }

    pub fn file_name(&self, doc: u32) -> Result<&[u8]> {
        self.name.items.item(&self.file, doc as usize)
    }

    pub(crate) fn corpus_item(&self, c: Corpus, doc: u32) -> Result<&[u8]> {
        self.corpus(c).items.item(&self.file, doc as usize)
    }

    /// Byte offsets of every newline in the document.
    pub fn newlines(&self, doc: u32) -> Result<Vec<u32>> {
        let raw = self.newlines.item(&self.file, doc as usize)?;
        from_sized_deltas(raw).ok_or_else(|| ZoektError::format(self.file.name(), format!("corrupt newlines for document {doc}")))
    }

    fn newline_count(&self, doc: u32) -> Result<u64> {
        let raw = self.newlines.item(&self.file, doc as usize)?;
        let mut off = 0;
        read_uvarint(raw, &mut off).ok_or_else(|| ZoektError::format(self.file.name(), format!("corrupt newlines for document {doc}")))
    }

    /// Symbol sections of the document, in bytes.
    pub fn doc_sections(&self, doc: u32) -> Result<Vec<DocumentSection>> {
        let raw = self.file_sections.item(&self.file, doc as usize)?;
        unmarshal_doc_sections(raw)
            .ok_or_else(|| ZoektError::format(self.file.name(), format!("corrupt sections for document {doc}")))
    }

    /// Symbol sections of the document, in absolute runes.
    pub(crate) fn rune_doc_sections(&self, doc: u32) -> &[DocumentSection] {
        let (s, e) = (
            self.file_end_symbol[doc as usize] as usize,
            self.file_end_symbol[doc as usize + 1] as usize,
        );
        &self.rune_doc_sections[s..e]
    }

    fn symbol_string(&self, id: u32) -> Result<Option<String>> {
        if id == SymbolRecord::ABSENT {
            return Ok(None);
        }
        let raw = self.symbol_map.item(&self.file, id as usize)?;
        Ok(Some(String::from_utf8_lossy(raw).into_owned()))
    }

    /// Metadata of the `i`th symbol section of `doc`, if it was indexed with
    /// any.
    pub fn symbol(&self, doc: u32, i: usize) -> Result<Option<Symbol>> {
        if self.symbol_meta.sz == 0 {
            return Ok(None);
        }
        let global = self.file_end_symbol[doc as usize] as usize + i;
        if global >= self.file_end_symbol[doc as usize + 1] as usize {
            return Ok(None);
        }
        let raw = self.file.read(self.symbol_meta.off + (global * 16) as u32, 16)?;
        let field = |k: usize| read_u32_be(raw, k * 4).unwrap_or(SymbolRecord::ABSENT);
        let Some(sym) = self.symbol_string(field(0))? else {
            return Ok(None);
        };
        Ok(Some(Symbol {
            sym,
            kind: self.symbol_string(field(1))?.unwrap_or_default(),
            parent: self.symbol_string(field(2))?.unwrap_or_default(),
            parent_kind: self.symbol_string(field(3))?.unwrap_or_default(),
        }))
    }

    pub fn checksum(&self, doc: u32) -> Result<&[u8]> {
        if self.checksums.sz == 0 {
            return Ok(&[]);
        }
        self.file.read(self.checksums.off + doc * CHECKSUM_SIZE, CHECKSUM_SIZE)
    }

    pub fn language(&self, doc: u32) -> &str {
        let code = self.languages.get(doc as usize).copied().unwrap_or(0);
        self.language_names.get(&code).map(String::as_str).unwrap_or("")
    }

    pub(crate) fn language_code(&self, doc: u32) -> u16 {
        self.languages.get(doc as usize).copied().unwrap_or(0)
    }

    pub(crate) fn language_code_of(&self, name: &str) -> Option<u16> {
        self.metadata.language_map.get(name).copied()
    }

    pub fn ranks(&self, doc: u32) -> &[f64] {
        self.ranks.get(doc as usize).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn repo_index(&self, doc: u32) -> usize {
        self.repos[doc as usize] as usize
    }

    pub fn repository(&self, doc: u32) -> &Repository {
        &self.repo_metadata[self.repo_index(doc)]
    }

    pub(crate) fn raw_config(&self, repo_idx: usize) -> RawConfig {
        self.raw_configs[repo_idx]
    }

    pub fn branch_mask(&self, doc: u32) -> u64 {
        self.branch_masks[doc as usize]
    }

    /// Mask bit of `branch` in the document's repository, if declared.
    pub(crate) fn branch_bit(&self, repo_idx: usize, branch: &str) -> Option<u64> {
        self.branch_ids[repo_idx].get(branch).copied()
    }

    /// Branch name to mask bit, for the `repo_idx`th repository.
    pub(crate) fn branch_ids(&self, repo_idx: usize) -> &HashMap<String, u64> {
        &self.branch_ids[repo_idx]
    }

    pub fn branch_names(&self, doc: u32) -> Vec<String> {
        let mask = self.branch_mask(doc);
        self.repository(doc)
            .branches
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, b)| b.name.clone())
            .collect()
    }

    pub fn sub_repo_path(&self, doc: u32) -> &str {
        let idx = self.sub_repos.get(doc as usize).copied().unwrap_or(0) as usize;
        self.sub_repo_paths[self.repo_index(doc)]
            .get(idx)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Name of the sub-repository the document belongs to, if any.
    pub fn sub_repo_name(&self, doc: u32) -> &str {
        let path = self.sub_repo_path(doc);
        if path.is_empty() {
            return "";
        }
        self.repository(doc)
            .sub_repo_map
            .get(path)
            .map(|r| r.name.as_str())
            .unwrap_or("")
    }

    /// First absolute rune of `doc` in the given corpus.
    pub(crate) fn doc_rune_start(&self, c: Corpus, doc: u32) -> u32 {
        if doc == 0 {
            0
        } else {
            self.corpus(c).end_runes[doc as usize - 1]
        }
    }

    pub(crate) fn doc_rune_end(&self, c: Corpus, doc: u32) -> u32 {
        self.corpus(c).end_runes[doc as usize]
    }

    pub(crate) fn end_runes(&self, c: Corpus) -> &[u32] {
        &self.corpus(c).end_runes
    }

    /// Translate sorted absolute rune offsets inside `doc` into byte offsets
    /// relative to the document start. Jumps via the sampled offset table and
    /// decodes at most `RUNE_OFFSET_FREQUENCY` runes per jump.
    pub(crate) fn runes_to_doc_bytes(&self, c: Corpus, doc: u32, runes: &[u32]) -> Result<Vec<u32>> {
        let start_rune = self.doc_rune_start(c, doc);
        if self.metadata.plain_ascii {
            return Ok(runes.iter().map(|r| r - start_rune).collect());
        }
        let corpus = self.corpus(c);
        let data = corpus.items.item(&self.file, doc as usize)?;
        let base = corpus.items.offsets.first().copied().unwrap_or(0);
        let start_byte = corpus.items.offsets[doc as usize] - base;

        let mut out = Vec::with_capacity(runes.len());
        let (mut cur_rune, mut cur_byte) = (start_rune, 0usize);
        for &r in runes {
            let sample = (r / RUNE_OFFSET_FREQUENCY) as usize;
            let sample_rune = sample as u32 * RUNE_OFFSET_FREQUENCY;
            if sample_rune > cur_rune {
                if let Some(&b) = corpus.rune_offsets.get(sample) {
                    cur_rune = sample_rune;
                    cur_byte = (b - start_byte) as usize;
                }
            }
            while cur_rune < r {
                if cur_byte >= data.len() {
                    return Err(ZoektError::format(
                        self.file.name(),
                        format!("rune {r} past end of document {doc}"),
                    ));
                }
                cur_byte += decode_rune(&data[cur_byte..]).1;
                cur_rune += 1;
            }
            out.push(cur_byte as u32);
        }
        Ok(out)
    }

    /// Raw posting list of `ng`, or `None` when the ngram is absent.
    pub(crate) fn ngram_postings(&self, c: Corpus, ng: Ngram) -> Result<Option<&[u8]>> {
        let corpus = self.corpus(c);
        match corpus.ngrams.get(&self.file, ng)? {
            Some(r) => Ok(Some(corpus.ngrams.postings(&self.file, r)?)),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for IndexData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexData")
            .field("file", &self.file)
            .field("docs", &self.num_docs())
            .field("repos", &self.repo_metadata.len())
            .finish()
    }
}

fn load_corpus(file: &IndexFile, toc: &Toc, tags: [&str; 5]) -> Result<CorpusData> {
    let [items_tag, ngram_tag, postings_tag, rune_offsets_tag, end_runes_tag] = tags;
    let items = CompoundIndex::load(file, &toc.compound(items_tag))?;
    let ngrams = BtreeIndex::load(
        file,
        toc.simple(ngram_tag),
        toc.compound(postings_tag),
        BtreeOpts::default(),
    )?;
    let deltas = |tag: &str| -> Result<Vec<u32>> {
        if !toc.has(tag) {
            return Ok(Vec::new());
        }
        from_sized_deltas(file.section(toc.simple(tag))?)
            .ok_or_else(|| ZoektError::format(file.name(), format!("corrupt {tag}")))
    };
    Ok(CorpusData {
        items,
        ngrams,
        rune_offsets: deltas(rune_offsets_tag)?,
        end_runes: deltas(end_runes_tag)?,
    })
}

fn fixed_width<'a>(file: &'a IndexFile, s: SimpleSection, width: usize, n: usize, what: &str) -> Result<&'a [u8]> {
    let raw = file.section(s)?;
    if raw.len() != width * n {
        return Err(ZoektError::format(
            file.name(),
            format!("{what} has {} bytes, want {} for {n} documents", raw.len(), width * n),
        ));
    }
    Ok(raw)
}

/// Absent sections decode as all zeros.
fn optional_u16s(file: &IndexFile, s: SimpleSection, n: usize, what: &str) -> Result<Vec<u16>> {
    if s.sz == 0 {
        return Ok(vec![0; n]);
    }
    Ok(fixed_width(file, s, 2, n, what)?
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}

fn optional_u32s(file: &IndexFile, s: SimpleSection, n: usize, what: &str) -> Result<Vec<u32>> {
    if s.sz == 0 {
        return Ok(vec![0; n]);
    }
    Ok(fixed_width(file, s, 4, n, what)?
        .chunks_exact(4)
        .filter_map(|c| read_u32_be(c, 0))
        .collect())
}

fn optional_u64s(file: &IndexFile, s: SimpleSection, n: usize, what: &str) -> Result<Vec<u64>> {
    if s.sz == 0 {
        return Ok(vec![0; n]);
    }
    Ok(fixed_width(file, s, 8, n, what)?
        .chunks_exact(8)
        .filter_map(|c| read_u64_be(c, 0))
        .collect())
}

fn decode_ranks(file: &IndexFile, s: SimpleSection, n: usize) -> Result<Vec<Vec<f64>>> {
    if s.sz == 0 {
        return Ok(vec![Vec::new(); n]);
    }
    let raw = file.section(s)?;
    let bad = || ZoektError::format(file.name(), "corrupt ranks");
    let mut at = 0;
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let cnt = read_uvarint(raw, &mut at).ok_or_else(bad)? as usize;
        let mut r = Vec::with_capacity(cnt.min(64));
        for _ in 0..cnt {
            r.push(f64::from_bits(read_u64_be(raw, at).ok_or_else(bad)?));
            at += 8;
        }
        out.push(r);
    }
    if at != raw.len() {
        return Err(bad());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::builder::IndexBuilder;
    use crate::types::Document;

    fn repo() -> Repository {
        Repository::new(1, "repo").with_branches(&[("main", "v1"), ("dev", "v2")])
    }

    #[test]
    fn rune_to_byte_translation() {
        let mut b = IndexBuilder::new(Some(repo())).unwrap();
        b.add_file("a", "x".repeat(150).as_bytes()).unwrap();
        let text = format!("{}abc", "é".repeat(120));
        b.add_file("b", text.as_bytes()).unwrap();
        let d = IndexData::from_bytes("mem", b.to_bytes().unwrap()).unwrap();
        assert!(!d.plain_ascii());
        let start = d.doc_rune_start(Corpus::Content, 1);
        assert_eq!(start, 150);
        let got = d
            .runes_to_doc_bytes(Corpus::Content, 1, &[start, start + 1, start + 60, start + 120, start + 123])
            .unwrap();
        assert_eq!(got, vec![0, 2, 120, 240, 243]);
    }

    #[test]
    fn symbol_metadata_roundtrip() {
        let mut b = IndexBuilder::new(Some(repo())).unwrap();
        let sym = Symbol {
            sym: "main".into(),
            kind: "function".into(),
            ..Default::default()
        };
        b.add(
            Document::new("m.go", "func main() {}")
                .with_symbol(DocumentSection { start: 5, end: 9 }, Some(sym.clone()))
                .with_branches(&["dev"]),
        )
        .unwrap();
        b.add(Document::new("n.go", "package n").with_symbol(DocumentSection { start: 0, end: 7 }, None))
            .unwrap();
        let d = IndexData::from_bytes("mem", b.to_bytes().unwrap()).unwrap();
        assert_eq!(d.symbol(0, 0).unwrap(), Some(sym));
        assert_eq!(d.symbol(1, 0).unwrap(), None);
        assert_eq!(d.doc_sections(0).unwrap(), vec![DocumentSection { start: 5, end: 9 }]);
        assert_eq!(d.rune_doc_sections(1), &[DocumentSection { start: 14, end: 21 }]);
        assert_eq!(d.branch_names(0), vec!["dev".to_string()]);
        assert_eq!(d.branch_bit(0, "dev"), Some(2));
    }

    #[test]
    fn stats_split_newlines_by_branch() {
        let mut b = IndexBuilder::new(Some(repo())).unwrap();
        b.add(Document::new("a", "1\n2\n").with_branches(&["main", "dev"])).unwrap();
        b.add(Document::new("b", "1\n").with_branches(&["dev"])).unwrap();
        let d = IndexData::from_bytes("mem", b.to_bytes().unwrap()).unwrap();
        let s = d.repo_stats()[0];
        assert_eq!(s.documents, 2);
        assert_eq!(s.new_lines_count, 3);
        assert_eq!(s.default_branch_new_lines_count, 2);
        assert_eq!(s.other_branches_new_lines_count, 3);
        assert_eq!(s.content_bytes, 4 + 2 + 1 + 1);
    }

    #[test]
    fn noncontiguous_repos_fail_to_load() {
        let mut b = IndexBuilder::empty();
        b.set_repository(&Repository::new(1, "a")).unwrap();
        b.add_file("x", b"1").unwrap();
        b.set_repository(&Repository::new(2, "b")).unwrap();
        b.add_file("y", b"2").unwrap();
        b.repos = vec![0, 1];
        assert!(IndexData::from_bytes("ok", b.to_bytes().unwrap()).is_ok());
        b.add_file("z", b"3").unwrap();
        b.repos = vec![0, 1, 0];
        let err = IndexData::from_bytes("bad", b.to_bytes().unwrap()).unwrap_err();
        assert!(err.to_string().contains("not contiguous"), "{err}");
    }

    #[test]
    fn missing_branch_masks_load_as_empty() {
        let mut b = IndexBuilder::new(Some(repo())).unwrap();
        b.add(Document::new("a", "alpha\n").with_branches(&["main"])).unwrap();
        b.add(Document::new("b", "beta\n").with_branches(&["dev"])).unwrap();
        let mut bytes = b.to_bytes().unwrap();
        // rename the tag so the reader no longer recognises the section
        let tag = TAG_BRANCH_MASKS.as_bytes();
        let at = bytes.windows(tag.len()).position(|w| w == tag).unwrap();
        bytes[at + tag.len() - 1] = b'Z';

        let d = IndexData::from_bytes("no-masks", bytes).unwrap();
        assert_eq!(d.num_docs(), 2);
        assert_eq!(d.branch_mask(0), 0);
        assert_eq!(d.branch_mask(1), 0);
        assert!(d.branch_names(1).is_empty());
    }
}
