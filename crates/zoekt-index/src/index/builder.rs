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

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

use super::postings::{sections_on_rune_boundaries, PostingsBuilder};
use crate::error::{Result, ZoektError};
use crate::shard::{INDEX_FORMAT_VERSION, NEXT_INDEX_FORMAT_VERSION};
use crate::types::{Document, DocumentSection, Repository, Symbol};

pub const MAX_BRANCHES: usize = 64;
pub const NOT_INDEXED_MARKER: &str = "NOT-INDEXED: ";
pub const SKIPPED_LANGUAGE: &str = "skipped";
const TEMPLATE_FIELDS: &[&str] = &[".Version", ".Path", ".LineNumber", ".URL", ".Commit"];

/// Interned symbol metadata; indexes point into `symbol_strings`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SymbolRecord {
    pub sym: u32,
    pub kind: u32,
    pub parent: u32,
    pub parent_kind: u32,
}

impl SymbolRecord {
    pub const ABSENT: u32 = u32::MAX;
}

/// Accumulates documents for one shard. Nothing touches disk until the
/// shard writer serializes the builder; a failed `add` leaves the builder
/// unchanged.
pub struct IndexBuilder {
    pub(crate) index_format_version: u32,

    pub(crate) content_postings: PostingsBuilder,
    pub(crate) name_postings: PostingsBuilder,

    pub(crate) contents: Vec<Vec<u8>>,
    pub(crate) names: Vec<Vec<u8>>,
    /// Symbol sections per document, in bytes.
    pub(crate) doc_sections: Vec<Vec<DocumentSection>>,
    /// All symbol sections, in absolute runes.
    pub(crate) rune_doc_sections: Vec<DocumentSection>,
    /// `file_end_symbol[d]..file_end_symbol[d+1]` are document d's symbols.
    pub(crate) file_end_symbol: Vec<u32>,
    pub(crate) symbols: Vec<SymbolRecord>,
    pub(crate) symbol_strings: Vec<String>,
    symbol_ids: HashMap<String, u32>,

    pub(crate) checksums: Vec<[u8; 32]>,
    pub(crate) branch_masks: Vec<u64>,
    pub(crate) sub_repos: Vec<u32>,
    pub(crate) repos: Vec<u16>,
    pub(crate) languages: Vec<u16>,
    pub(crate) language_map: BTreeMap<String, u16>,
    pub(crate) ranks: Vec<Vec<f64>>,

    pub(crate) repo_list: Vec<Repository>,
    sub_repo_indices: Vec<HashMap<String, u32>>,

    pub(crate) index_time: i64,
    pub(crate) id: String,
}

impl IndexBuilder {
    /// Builder for a single repository shard.
    pub fn new(repo: Option<Repository>) -> Result<Self> {
        let mut b = Self::empty();
        b.set_repository(&repo.unwrap_or_default())?;
        Ok(b)
    }

    /// Builder without any repository; documents can only be added after
    /// `set_repository`.
    pub fn empty() -> Self {
        IndexBuilder {
            index_format_version: INDEX_FORMAT_VERSION,
            content_postings: PostingsBuilder::new(),
            name_postings: PostingsBuilder::new(),
            contents: Vec::new(),
            names: Vec::new(),
            doc_sections: Vec::new(),
            rune_doc_sections: Vec::new(),
            file_end_symbol: vec![0],
            symbols: Vec::new(),
            symbol_strings: Vec::new(),
            symbol_ids: HashMap::new(),
            checksums: Vec::new(),
            branch_masks: Vec::new(),
            sub_repos: Vec::new(),
            repos: Vec::new(),
            languages: Vec::new(),
            language_map: BTreeMap::new(),
            ranks: Vec::new(),
            repo_list: Vec::new(),
            sub_repo_indices: Vec::new(),
            index_time: 0,
            id: String::new(),
        }
    }

    /// Write in the compound (multi repository) layout even with one repo.
    pub fn compound(mut self) -> Self {
        self.index_format_version = NEXT_INDEX_FORMAT_VERSION;
        self
    }

    pub fn with_index_time(mut self, unix_secs: i64) -> Self {
        self.index_time = unix_secs;
        self
    }

    /// Start a new repository; subsequent `add` calls belong to it.
    pub fn set_repository(&mut self, repo: &Repository) -> Result<()> {
        for (what, tmpl) in [
            ("commit url", &repo.commit_url_template),
            ("file url", &repo.file_url_template),
            ("line fragment", &repo.line_fragment_template),
        ] {
            validate_template(tmpl).map_err(|e| {
                ZoektError::build(format!("repository {}: invalid {what} template {tmpl:?}: {e}", repo.name))
            })?;
        }
        if repo.branches.len() > MAX_BRANCHES {
            return Err(ZoektError::build(format!(
                "repository {}: too many branches ({} > {MAX_BRANCHES})",
                repo.name,
                repo.branches.len()
            )));
        }
        if self.repo_list.len() > u16::MAX as usize {
            return Err(ZoektError::build(format!(
                "too many repositories in shard: max is {}",
                u16::MAX as usize + 1
            )));
        }
        let mut repo = repo.clone();
        if repo.rank == 0 {
            repo.rank = repo.rank_from_priority();
        }
        let mut paths: Vec<&String> = repo.sub_repo_map.keys().collect();
        paths.sort();
        let mut idx: HashMap<String, u32> = HashMap::new();
        idx.insert(String::new(), 0);
        for p in paths {
            let n = idx.len() as u32;
            idx.entry(p.clone()).or_insert(n);
        }
        self.sub_repo_indices.push(idx);
        self.repo_list.push(repo);
        if self.repo_list.len() > 1 {
            self.index_format_version = NEXT_INDEX_FORMAT_VERSION;
        }
        Ok(())
    }

    pub fn add_file(&mut self, name: &str, content: &[u8]) -> Result<()> {
        let branches = self
            .repo_list
            .last()
            .map(|r| r.branch_names().map(str::to_string).collect())
            .unwrap_or_default();
        self.add(Document {
            name: name.to_string(),
            content: content.to_vec(),
            branches,
            ..Default::default()
        })
    }

    pub fn add(&mut self, mut doc: Document) -> Result<()> {
        let repo_idx = self
            .repo_list
            .len()
            .checked_sub(1)
            .ok_or_else(|| ZoektError::build("add before set_repository"))?;

        if let Some(reason) = doc.skip_reason.take() {
            doc.content = format!("{NOT_INDEXED_MARKER}{reason}").into_bytes();
            doc.symbols.clear();
            doc.symbols_meta.clear();
            if doc.language.is_empty() {
                doc.language = SKIPPED_LANGUAGE.to_string();
            }
        }
        if !doc.symbols_meta.is_empty() && doc.symbols_meta.len() != doc.symbols.len() {
            return Err(ZoektError::build(format!(
                "{}: {} symbol sections but {} symbol records",
                doc.name,
                doc.symbols.len(),
                doc.symbols_meta.len()
            )));
        }
        let mut metas = std::mem::take(&mut doc.symbols_meta);
        metas.resize(doc.symbols.len(), None);
        let mut paired: Vec<(DocumentSection, Option<Symbol>)> =
            doc.symbols.drain(..).zip(metas).collect();
        paired.sort_by_key(|(s, _)| (s.start, s.end));
        let (secs, metas): (Vec<DocumentSection>, Vec<Option<Symbol>>) = paired.into_iter().unzip();

        let mut last_end = 0u32;
        for (i, s) in secs.iter().enumerate() {
            if s.start > s.end {
                return Err(ZoektError::build(format!("{}: inverted symbol section {s:?}", doc.name)));
            }
            if i > 0 && last_end > s.start {
                return Err(ZoektError::build(format!("{}: symbol sections overlap at byte {}", doc.name, s.start)));
            }
            last_end = s.end;
        }
        if last_end as usize > doc.content.len() {
            return Err(ZoektError::build(format!(
                "{}: symbol section ends at {last_end}, past end of content ({})",
                doc.name,
                doc.content.len()
            )));
        }
        if !sections_on_rune_boundaries(&doc.content, &secs) {
            return Err(ZoektError::build(format!("{}: symbol section not on a rune boundary", doc.name)));
        }

        if !doc.sub_repository_path.is_empty() {
            let prefix = format!("{}/", doc.sub_repository_path.trim_end_matches('/'));
            if !doc.name.starts_with(&prefix) {
                return Err(ZoektError::build(format!(
                    "path {:?} must start with subrepo path {:?}",
                    doc.name, doc.sub_repository_path
                )));
            }
        }
        let sub_repo_idx = *self.sub_repo_indices[repo_idx]
            .get(&doc.sub_repository_path)
            .ok_or_else(|| ZoektError::build(format!("unknown subrepo path {:?}", doc.sub_repository_path)))?;

        let repo = &self.repo_list[repo_idx];
        let mut mask = 0u64;
        for br in &doc.branches {
            let bit = repo
                .branches
                .iter()
                .position(|b| &b.name == br)
                .ok_or_else(|| ZoektError::build(format!("{}: no branch found for {br}", doc.name)))?;
            mask |= 1 << bit;
        }

        let lang_code = match self.language_map.get(&doc.language) {
            Some(c) => *c,
            None => {
                if self.language_map.len() > u16::MAX as usize {
                    return Err(ZoektError::build("too many languages"));
                }
                self.language_map.len() as u16
            }
        };

        self.content_postings.check_fits(doc.content.len())?;
        self.name_postings.check_fits(doc.name.len())?;

        // Only infallible work from here on.
        let rune_secs = self.content_postings.add(&doc.content, &secs)?;
        self.name_postings.add(doc.name.as_bytes(), &[])?;
        self.language_map.entry(doc.language.clone()).or_insert(lang_code);

        for m in &metas {
            let rec = match m {
                Some(sym) => SymbolRecord {
                    sym: self.intern(&sym.sym),
                    kind: self.intern(&sym.kind),
                    parent: self.intern(&sym.parent),
                    parent_kind: self.intern(&sym.parent_kind),
                },
                None => SymbolRecord {
                    sym: SymbolRecord::ABSENT,
                    kind: SymbolRecord::ABSENT,
                    parent: SymbolRecord::ABSENT,
                    parent_kind: SymbolRecord::ABSENT,
                },
            };
            self.symbols.push(rec);
        }
        if !secs.is_empty() {
            self.repo_list[repo_idx].has_symbols = true;
        }

        self.checksums.push(Sha256::digest(&doc.content).into());
        self.rune_doc_sections.extend(rune_secs);
        self.file_end_symbol.push(self.rune_doc_sections.len() as u32);
        self.doc_sections.push(secs);
        self.names.push(doc.name.into_bytes());
        self.contents.push(doc.content);
        self.branch_masks.push(mask);
        self.sub_repos.push(sub_repo_idx);
        self.repos.push(repo_idx as u16);
        self.languages.push(lang_code);
        self.ranks.push(doc.ranks);
        Ok(())
    }

    fn intern(&mut self, s: &str) -> u32 {
        if let Some(id) = self.symbol_ids.get(s) {
            return *id;
        }
        let id = self.symbol_strings.len() as u32;
        self.symbol_strings.push(s.to_string());
        self.symbol_ids.insert(s.to_string(), id);
        id
    }

    pub fn num_files(&self) -> usize {
        self.contents.len()
    }

    pub fn content_size(&self) -> u64 {
        self.content_postings.end_byte as u64 + self.name_postings.end_byte as u64
    }

    pub fn repositories(&self) -> &[Repository] {
        &self.repo_list
    }

    pub(crate) fn effective_format_version(&self) -> u32 {
        if self.repo_list.len() > 1 {
            NEXT_INDEX_FORMAT_VERSION
        } else {
            self.index_format_version
        }
    }
}

/// Accepts `{{ .Field }}` / `{{.Field}}` placeholders over the known fields.
fn validate_template(tmpl: &str) -> std::result::Result<(), String> {
    let mut rest = tmpl;
    while let Some(open) = rest.find("{{") {
        let after = &rest[open + 2..];
        let close = after.find("}}").ok_or_else(|| "unclosed action".to_string())?;
        let action = after[..close].trim();
        let field = action.split_whitespace().next().unwrap_or("");
        if !TEMPLATE_FIELDS.contains(&field) {
            return Err(format!("unknown field {action:?}"));
        }
        rest = &after[close + 2..];
    }
    if rest.contains("}}") {
        return Err("unbalanced }}".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> Repository {
        Repository::new(1, "repo").with_branches(&[("main", "v1"), ("dev", "v2")])
    }

    #[test]
    fn add_rejects_overlapping_sections() {
        let mut b = IndexBuilder::new(Some(repo())).unwrap();
        let doc = Document::new("a.go", "func main() {}")
            .with_symbol(DocumentSection { start: 0, end: 6 }, None)
            .with_symbol(DocumentSection { start: 5, end: 9 }, None);
        let err = b.add(doc).unwrap_err();
        assert!(err.to_string().contains("overlap"), "{err}");
        assert_eq!(b.num_files(), 0);
    }

    #[test]
    fn failed_add_leaves_builder_unchanged() {
        let mut b = IndexBuilder::new(Some(repo())).unwrap();
        b.add_file("a", b"alpha").unwrap();
        let content_end = b.content_postings.end_byte;
        let ngrams = b.content_postings.postings.len();
        b.name_postings.end_byte = u32::MAX - 1;

        assert!(b.add_file("long-name", b"beta gamma").is_err());
        assert_eq!(b.num_files(), 1);
        assert_eq!(b.content_postings.end_byte, content_end);
        assert_eq!(b.content_postings.end_runes.len(), 1);
        assert_eq!(b.content_postings.postings.len(), ngrams);
    }

    #[test]
    fn add_rejects_section_past_end() {
        let mut b = IndexBuilder::new(Some(repo())).unwrap();
        let doc = Document::new("a.go", "abc").with_symbol(DocumentSection { start: 1, end: 4 }, None);
        assert!(b.add(doc).is_err());
    }

    #[test]
    fn add_rejects_unknown_branch() {
        let mut b = IndexBuilder::new(Some(repo())).unwrap();
        let doc = Document::new("a", "abc").with_branches(&["release"]);
        assert!(b.add(doc).is_err());
        let ok = Document::new("a", "abc").with_branches(&["main", "dev"]);
        b.add(ok).unwrap();
        assert_eq!(b.branch_masks, vec![0b11]);
    }

    #[test]
    fn templates_are_validated() {
        let mut r = repo();
        r.file_url_template = "{{.URL}}/blob/{{.Version}}/{{.Path}}".into();
        assert!(IndexBuilder::new(Some(r.clone())).is_ok());
        r.commit_url_template = "{{.Nope}}".into();
        assert!(IndexBuilder::new(Some(r.clone())).is_err());
        r.commit_url_template = "{{.URL".into();
        assert!(IndexBuilder::new(Some(r)).is_err());
    }

    #[test]
    fn too_many_branches() {
        let mut r = Repository::new(1, "r");
        for i in 0..65 {
            r.branches.push(crate::types::RepositoryBranch {
                name: format!("b{i}"),
                version: "v".into(),
            });
        }
        assert!(IndexBuilder::new(Some(r)).is_err());
    }

    #[test]
    fn skipped_documents_keep_a_marker() {
        let mut b = IndexBuilder::new(Some(repo())).unwrap();
        let mut doc = Document::new("big.bin", vec![0u8; 10]);
        doc.skip_reason = Some("binary".into());
        b.add(doc).unwrap();
        assert_eq!(b.contents[0], b"NOT-INDEXED: binary");
        assert_eq!(b.language_map.get(SKIPPED_LANGUAGE), Some(&0));
    }

    #[test]
    fn symbols_are_sorted_with_their_metadata() {
        let mut b = IndexBuilder::new(Some(repo())).unwrap();
        let sym = |n: &str| Symbol {
            sym: n.into(),
            kind: "function".into(),
            ..Default::default()
        };
        let doc = Document::new("a.go", "func b() {}\nfunc a() {}")
            .with_symbol(DocumentSection { start: 17, end: 18 }, Some(sym("a")))
            .with_symbol(DocumentSection { start: 5, end: 6 }, Some(sym("b")));
        b.add(doc).unwrap();
        assert_eq!(b.doc_sections[0][0].start, 5);
        assert_eq!(b.symbol_strings[b.symbols[0].sym as usize], "b");
        assert!(b.repo_list[0].has_symbols);
    }

    #[test]
    fn subrepo_paths_must_prefix_names() {
        let mut r = repo();
        r.sub_repo_map.insert("vendor/lib".into(), Repository::new(0, "lib"));
        let mut b = IndexBuilder::new(Some(r)).unwrap();
        let mut doc = Document::new("other/x.go", "abc");
        doc.sub_repository_path = "vendor/lib".into();
        assert!(b.add(doc.clone()).is_err());
        doc.name = "vendor/lib/x.go".into();
        b.add(doc).unwrap();
        assert_eq!(b.sub_repos, vec![1]);
    }
}
