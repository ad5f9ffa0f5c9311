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

use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use super::builder::IndexBuilder;
use crate::error::Result;
use crate::types::{Document, Repository};

static TEST_RE: Lazy<Regex> = Lazy::new(|| Regex::new("[Tt]est").expect("static regex"));

/// Walks a directory tree into documents of one repository, in ranked
/// order, ready for an `IndexBuilder`.
pub struct DirectoryIndexer {
    root: PathBuf,
    repo: Repository,
    include: Option<Regex>,
    exclude: Option<Regex>,
    max_file_size: usize,
    include_hidden: bool,
}

impl DirectoryIndexer {
    pub fn new(root: PathBuf, repo: Repository) -> Self {
        Self {
            root,
            repo,
            include: None,
            exclude: None,
            max_file_size: 2 << 20,
            include_hidden: false,
        }
    }

    pub fn max_file_size(mut self, sz: usize) -> Self {
        self.max_file_size = sz;
        self
    }

    pub fn include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    pub fn include_regex(mut self, re: Regex) -> Self {
        self.include = Some(re);
        self
    }

    pub fn exclude_regex(mut self, re: Regex) -> Self {
        self.exclude = Some(re);
        self
    }

    /// Read every matching file. Oversized and binary files become skipped
    /// documents so their names stay searchable.
    pub fn documents(&self) -> Result<Vec<Document>> {
        let branches: Vec<String> = self.repo.branch_names().map(str::to_string).collect();
        let mut walk = ignore::WalkBuilder::new(&self.root);
        walk.hidden(!self.include_hidden);
        walk.git_ignore(true);
        let mut docs = Vec::new();
        for entry in walk.build().filter_map(|e| e.ok()) {
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            if self.include.as_ref().is_some_and(|inc| !inc.is_match(&rel)) {
                continue;
            }
            if self.exclude.as_ref().is_some_and(|exc| exc.is_match(&rel)) {
                continue;
            }
            let mut doc = Document {
                name: rel.clone(),
                branches: branches.clone(),
                language: detect_lang_from_ext(Path::new(&rel)).unwrap_or_default(),
                ..Default::default()
            };
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0) as usize;
            if size > self.max_file_size {
                doc.skip_reason = Some(format!("file size {size} exceeds maximum {}", self.max_file_size));
            } else {
                let content = std::fs::read(entry.path())?;
                if is_text(&content) {
                    doc.content = content;
                } else {
                    doc.skip_reason = Some("binary".to_string());
                }
            }
            docs.push(doc);
        }
        sort_documents(&mut docs);
        tracing::debug!(root = %self.root.display(), files = docs.len(), "walked repository");
        Ok(docs)
    }

    pub fn build(&self) -> Result<IndexBuilder> {
        let mut b = IndexBuilder::new(Some(self.repo.clone()))?;
        for doc in self.documents()? {
            b.add(doc)?;
        }
        Ok(b)
    }
}

fn squash_range(j: usize) -> f64 {
    let x = j as f64;
    x / (1.0 + x)
}

fn is_generated(name: &str) -> bool {
    name.ends_with("min.js") || name.ends_with("js.map") || name.ends_with(".pb.go")
}

fn is_vendored(name: &str) -> bool {
    name.starts_with("vendor/")
        || name.contains("/vendor/")
        || name.starts_with("node_modules/")
        || name.contains("/node_modules/")
}

/// Smaller sorts earlier.
fn rank(d: &Document, orig_idx: usize) -> [f64; 9] {
    let b = |v: bool| if v { 1.0 } else { 0.0 };
    [
        b(d.skip_reason.is_some()),
        b(is_generated(&d.name)),
        b(is_vendored(&d.name)),
        b(TEST_RE.is_match(&d.name)),
        squash_range(d.name.len()),
        1.0 - squash_range(d.symbols.len()),
        squash_range(d.content.len()),
        1.0 - squash_range(d.branches.len()),
        squash_range(orig_idx),
    ]
}

/// Order documents so likely-relevant files get low document ids, which
/// the doc-order score component rewards.
pub fn sort_documents(docs: &mut Vec<Document>) {
    let mut ranked: Vec<([f64; 9], Document)> = std::mem::take(docs)
        .into_iter()
        .enumerate()
        .map(|(i, d)| (rank(&d, i), d))
        .collect();
    ranked.sort_by(|a, b| {
        a.0.iter()
            .zip(b.0.iter())
            .map(|(x, y)| x.partial_cmp(y).unwrap_or(Ordering::Equal))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
    docs.extend(ranked.into_iter().map(|(_, d)| d));
}

/// Heuristic: decide whether a byte buffer should be considered text.
pub(crate) fn is_text(buf: &[u8]) -> bool {
    if buf.contains(&0) {
        return false;
    }
    let sample = &buf[..buf.len().min(4096)];
    if sample.is_empty() {
        return true;
    }
    let non_print = sample
        .iter()
        .filter(|&&b| !(b >= 0x20 || b == b'\n' || b == b'\r' || b == b'\t'))
        .count();
    (non_print as f64 / sample.len() as f64) < 0.30
}

pub(crate) fn detect_lang_from_ext(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    let lang = match ext.as_str() {
        "rs" => "Rust",
        "go" => "Go",
        "ts" | "tsx" => "TypeScript",
        "js" | "jsx" => "JavaScript",
        "py" => "Python",
        "java" => "Java",
        "kt" | "kts" => "Kotlin",
        "scala" => "Scala",
        "cs" => "C#",
        "c" | "h" => "C",
        "cpp" | "cc" | "cxx" | "hpp" | "hxx" => "C++",
        "rb" => "Ruby",
        "php" => "PHP",
        "sh" | "bash" => "Shell",
        "md" => "Markdown",
        "graphql" | "gql" => "GraphQL",
        "yml" | "yaml" => "YAML",
        "toml" => "TOML",
        "json" => "JSON",
        _ => return None,
    };
    Some(lang.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranked_order_prefers_plain_sources() {
        let mut docs = vec![
            Document::new("vendor/x.go", "a"),
            Document::new("main_test.go", "a"),
            Document::new("main.go", "a"),
            Document {
                skip_reason: Some("binary".into()),
                ..Document::new("a.bin", "")
            },
        ];
        sort_documents(&mut docs);
        let names: Vec<&str> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["main.go", "main_test.go", "vendor/x.go", "a.bin"]);
    }

    #[test]
    fn walks_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "fn main() {}\n").unwrap();
        std::fs::write(dir.path().join("blob.bin"), [0u8, 1, 2]).unwrap();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(64)).unwrap();
        let idx = DirectoryIndexer::new(dir.path().to_path_buf(), Repository::new(1, "r")).max_file_size(32);
        let docs = idx.documents().unwrap();
        assert_eq!(docs.len(), 3);
        let lib = docs.iter().find(|d| d.name == "src/lib.rs").unwrap();
        assert_eq!(lib.language, "Rust");
        assert!(docs.iter().find(|d| d.name == "blob.bin").unwrap().skip_reason.is_some());
        assert!(docs.iter().find(|d| d.name == "big.txt").unwrap().skip_reason.is_some());
        assert_eq!(idx.build().unwrap().num_files(), 3);
    }
}
