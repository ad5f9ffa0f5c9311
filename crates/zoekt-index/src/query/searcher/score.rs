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

//! Ranking. Per-match signals (word boundaries, file name segments, symbol
//! boundaries and kinds) pick the best line or chunk; per-file signals
//! (atoms, ranks, ordering) make the file score. BM25 replaces all of them
//! when requested.

use std::collections::HashMap;

use super::content::{epsilon_equals_one, ContentProvider};
use super::matchtree::CandidateMatch;
use crate::error::Result;
use crate::shard::IndexData;
use crate::trigram::{decode_rune, to_lower};
use crate::types::{DocumentSection, FileMatch, SearchOptions, Symbol};

// Query dependent signals, together bounded at about 9000.
pub const SCORE_PARTIAL_WORD_MATCH: f64 = 50.0;
pub const SCORE_WORD_MATCH: f64 = 500.0;
pub const SCORE_BASE: f64 = 7000.0;
pub const SCORE_PARTIAL_BASE: f64 = 4000.0;
pub const SCORE_SYMBOL: f64 = 7000.0;
pub const SCORE_PARTIAL_SYMBOL: f64 = 4000.0;
pub const SCORE_KIND_MATCH: f64 = 100.0;
pub const SCORE_FACTOR_ATOM_MATCH: f64 = 400.0;

// File-only signals.
pub const SCORE_FILE_RANK_FACTOR: f64 = 9000.0;
pub const SCORE_FILE_ORDER_FACTOR: f64 = 10.0;
pub const SCORE_REPO_RANK_FACTOR: f64 = 20.0;

pub const SCORE_LINE_ORDER_FACTOR: f64 = 1.0;

/// Shifts the query score left of the tiebreakers.
pub const SCORE_OFFSET: f64 = 10_000_000.0;

fn byte_class(c: u8) -> u8 {
    if c.is_ascii_alphabetic() {
        2
    } else if c.is_ascii_digit() {
        1
    } else {
        0
    }
}

/// Symbol kinds as reported by ctags-style taggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Accessor,
    Chapter,
    Class,
    Constant,
    Define,
    Enum,
    EnumConstant,
    Field,
    Function,
    Interface,
    Library,
    Local,
    Method,
    MethodAlias,
    MethodSpec,
    Module,
    Namespace,
    Object,
    Package,
    Section,
    SingletonMethod,
    Struct,
    Subsection,
    Trait,
    Type,
    TypeAlias,
    Union,
    Variable,
    Other,
}

impl SymbolKind {
    pub fn parse(kind: &str) -> Self {
        match kind.to_ascii_lowercase().as_str() {
            "accessor" => SymbolKind::Accessor,
            "chapter" => SymbolKind::Chapter,
            "class" | "classes" => SymbolKind::Class,
            "constant" | "const" => SymbolKind::Constant,
            "define" => SymbolKind::Define,
            "enum" => SymbolKind::Enum,
            "enumerator" | "enumconstant" => SymbolKind::EnumConstant,
            "field" | "member" => SymbolKind::Field,
            "func" | "function" => SymbolKind::Function,
            "interface" => SymbolKind::Interface,
            "library" => SymbolKind::Library,
            "local" => SymbolKind::Local,
            "method" => SymbolKind::Method,
            "methodalias" | "alias" => SymbolKind::MethodAlias,
            "methodspec" => SymbolKind::MethodSpec,
            "module" => SymbolKind::Module,
            "namespace" => SymbolKind::Namespace,
            "object" => SymbolKind::Object,
            "package" => SymbolKind::Package,
            "section" => SymbolKind::Section,
            "singletonmethod" => SymbolKind::SingletonMethod,
            "struct" => SymbolKind::Struct,
            "subsection" => SymbolKind::Subsection,
            "trait" => SymbolKind::Trait,
            "type" => SymbolKind::Type,
            "typealias" | "talias" | "typdef" => SymbolKind::TypeAlias,
            "union" => SymbolKind::Union,
            "var" | "variable" => SymbolKind::Variable,
            _ => SymbolKind::Other,
        }
    }
}

/// Boost for a symbol match by language and kind. Language tables override
/// the generic ranking.
pub fn score_symbol_kind(language: &str, file_name: &[u8], sym: &[u8], kind: SymbolKind) -> f64 {
    use SymbolKind::*;

    let mut factor = match kind {
        Type => 8.0,
        Class => 10.0,
        Struct => 9.5,
        Enum => 9.0,
        Interface => 8.0,
        Function | Method => 7.0,
        Field => 5.5,
        Constant => 5.0,
        Variable => 4.0,
        _ => 1.0,
    };

    let specific = match language.to_ascii_lowercase().as_str() {
        "java" => match kind {
            Class => Some(10.0),
            Enum => Some(9.0),
            Interface => Some(8.0),
            Method => Some(7.0),
            Field => Some(6.0),
            EnumConstant => Some(5.0),
            _ => None,
        },
        "kotlin" => match kind {
            Class => Some(10.0),
            Interface => Some(9.0),
            Method => Some(8.0),
            TypeAlias => Some(7.0),
            Constant => Some(6.0),
            Variable => Some(5.0),
            _ => None,
        },
        "go" => {
            let base = match kind {
                Type => Some(9.0),
                Interface => Some(10.0),
                Struct | TypeAlias => Some(9.0),
                MethodSpec => Some(8.5),
                Method | Function => Some(8.0),
                Field => Some(7.0),
                Constant => Some(6.0),
                Variable => Some(5.0),
                _ => None,
            };
            let mut f = base.unwrap_or(factor);
            // exported
            if decode_rune(sym).0.is_uppercase() {
                f += 0.5;
            }
            if file_name.ends_with(b"_test.go") {
                f *= 0.8;
            }
            Some(f)
        }
        "c++" => match kind {
            Class => Some(10.0),
            Enum => Some(9.0),
            Function => Some(8.0),
            Struct => Some(7.0),
            Union => Some(6.0),
            TypeAlias => Some(5.0),
            Field => Some(4.0),
            Variable => Some(3.0),
            _ => None,
        },
        "scala" => match kind {
            Class => Some(10.0),
            Interface => Some(9.0),
            Object => Some(8.0),
            Function => Some(7.0),
            Type => Some(6.0),
            Variable => Some(5.0),
            Package => Some(4.0),
            _ => None,
        },
        "python" => match kind {
            Class => Some(10.0),
            Function | Method => Some(8.0),
            Field => Some(4.0),
            Variable => Some(3.0),
            Local => Some(2.0),
            _ => None,
        },
        "ruby" => match kind {
            Class => Some(10.0),
            Method => Some(9.0),
            MethodAlias => Some(8.0),
            Module => Some(7.0),
            SingletonMethod => Some(6.0),
            Constant => Some(5.0),
            Accessor => Some(4.0),
            Library => Some(3.0),
            _ => None,
        },
        "php" => match kind {
            Class => Some(10.0),
            Interface => Some(9.0),
            Function => Some(8.0),
            Trait => Some(7.0),
            Define => Some(6.0),
            Namespace => Some(5.0),
            MethodAlias => Some(4.0),
            Variable | Local => Some(3.0),
            _ => None,
        },
        "graphql" => match kind {
            Type => Some(10.0),
            _ => None,
        },
        // headings rank below code
        "markdown" => match kind {
            Chapter => Some(4.0),
            Section => Some(3.0),
            Subsection => Some(2.0),
            _ => None,
        },
        _ => None,
    };
    if let Some(f) = specific {
        factor = f;
    }
    factor * SCORE_KIND_MATCH
}

/// Index of the section overlapping `[off, off+sz)` the most relative to
/// its own size. Sections must be sorted and disjoint.
pub(crate) fn find_max_overlapping_section(secs: &[DocumentSection], off: u32, sz: u32) -> Option<u32> {
    let (start, end) = (off, off + sz);
    let j = secs.partition_point(|s| s.end <= start);
    if j == secs.len() || secs[j].start >= end {
        return None;
    }
    let rel_overlap = |j: usize| {
        let size = secs[j].end - secs[j].start;
        if size == 0 {
            return 0.0;
        }
        let overlap = secs[j].end.min(end) - secs[j].start.max(start);
        overlap as f64 / size as f64
    };
    let ol1 = rel_overlap(j);
    if epsilon_equals_one(ol1) || j == secs.len() - 1 || secs[j + 1].start >= end {
        return (ol1 > 0.0).then_some(j as u32);
    }
    let ol2 = rel_overlap(j + 1);
    if ol2 > ol1 {
        return Some(j as u32 + 1);
    }
    (ol1 > 0.0).then_some(j as u32)
}

fn find_symbol(cp: &mut ContentProvider<'_>, m: &CandidateMatch) -> Result<Option<(DocumentSection, Option<Symbol>)>> {
    if m.file_name {
        return Ok(None);
    }
    let secs = cp.sections()?;
    let idx = if m.symbol {
        Some(m.symbol_idx)
    } else {
        find_max_overlapping_section(secs, m.byte_offset, m.byte_match_sz)
    };
    let Some(sec) = idx.and_then(|i| secs.get(i as usize).copied()) else {
        return Ok(None);
    };
    let info = cp.id.symbol(cp.doc, idx.unwrap_or(0) as usize)?;
    Ok(Some((sec, info)))
}

/// Clip a section to the data it indexes.
fn section_slice(data: &[u8], sec: DocumentSection) -> &[u8] {
    let len = data.len() as u32;
    if sec.start >= len {
        return &[];
    }
    &data[sec.start as usize..sec.end.min(len) as usize]
}

/// Best score over the matches of one line or chunk, its debug
/// explanation, and the symbol of each match that came from a symbol
/// search.
pub(crate) fn candidate_match_score(
    cp: &mut ContentProvider<'_>,
    ms: &[CandidateMatch],
    language: &str,
    debug: bool,
) -> Result<(f64, String, Vec<Option<Symbol>>)> {
    let file_name = cp.data(true)?;
    let mut symbol_info: Vec<Option<Symbol>> = Vec::new();
    let (mut max_score, mut max_what) = (0.0f64, String::new());

    for (i, m) in ms.iter().enumerate() {
        let data = cp.data(m.file_name)?;
        let (mut score, mut what) = (0.0f64, String::new());
        let mut add = |name: &str, s: f64| {
            if s != 0.0 && debug {
                what.push_str(&format!("{name}:{s:.2}, "));
            }
            score += s;
        };

        let (start, end) = (m.byte_offset as usize, m.end() as usize);
        let start_boundary =
            start < data.len() && (start == 0 || byte_class(data[start - 1]) != byte_class(data[start]));
        let end_boundary = end > 0
            && end <= data.len()
            && (end == data.len() || byte_class(data[end - 1]) != byte_class(data[end]));
        if start_boundary && end_boundary {
            add("WordMatch", SCORE_WORD_MATCH);
        } else if start_boundary || end_boundary {
            add("PartialWordMatch", SCORE_PARTIAL_WORD_MATCH);
        }

        if m.file_name {
            let sep = data.iter().rposition(|&b| b == b'/');
            let base = sep.map_or(0, |p| p + 1);
            let start_match = start == base;
            let end_match = end == data.len();
            if start_match && end_match {
                add("Base", SCORE_BASE);
            } else if start_match || end_match {
                add("EdgeBase", (SCORE_BASE + SCORE_PARTIAL_BASE) / 2.0);
            } else if base <= start {
                add("InnerBase", SCORE_PARTIAL_BASE);
            }
        } else if let Some((sec, info)) = find_symbol(cp, m)? {
            let start_match = sec.start == m.byte_offset;
            let end_match = sec.end == m.end();
            if start_match && end_match {
                add("Symbol", SCORE_SYMBOL);
            } else if start_match || end_match {
                add("EdgeSymbol", (SCORE_SYMBOL + SCORE_PARTIAL_SYMBOL) / 2.0);
            } else {
                add("OverlapSymbol", SCORE_PARTIAL_SYMBOL);
            }

            if let Some(mut si) = info {
                let sym = section_slice(data, sec);
                let kind = SymbolKind::parse(&si.kind);
                add(
                    &format!("kind:{language}:{}", si.kind),
                    score_symbol_kind(language, file_name, sym, kind),
                );
                if m.symbol {
                    if symbol_info.is_empty() {
                        symbol_info = vec![None; ms.len()];
                    }
                    si.sym = String::from_utf8_lossy(sym).into_owned();
                    symbol_info[i] = Some(si);
                }
            }
        }

        if !epsilon_equals_one(m.score_weight) {
            score *= m.score_weight;
            if debug {
                what.push_str(&format!("boost:{:.2}, ", m.score_weight));
            }
        }

        if score > max_score {
            max_score = score;
            max_what = what;
        }
    }

    if debug {
        max_what = format!("score:{max_score:.2} <- {}", max_what.trim_end_matches(", "));
    }
    Ok((max_score, max_what, symbol_info))
}

/// Final file score from the already scored lines or chunks.
pub(crate) fn score_file(fm: &mut FileMatch, id: &IndexData, doc: u32, atom_match_count: usize, opts: &SearchOptions) {
    let debug = opts.debug_score;
    if atom_match_count > 0 {
        fm.add_score(
            "atom",
            (1.0 - 1.0 / atom_match_count as f64) * SCORE_FACTOR_ATOM_MATCH,
            Some(atom_match_count as f64),
            debug,
        );
    }

    let mut max_file_score = 0.0f64;
    let n = fm.line_matches.len();
    for (i, lm) in fm.line_matches.iter_mut().enumerate() {
        max_file_score = max_file_score.max(lm.score);
        lm.score += SCORE_LINE_ORDER_FACTOR * (1.0 - i as f64 / n as f64);
    }
    let n = fm.chunk_matches.len();
    for (i, cm) in fm.chunk_matches.iter_mut().enumerate() {
        max_file_score = max_file_score.max(cm.score);
        cm.score += SCORE_LINE_ORDER_FACTOR * (1.0 - i as f64 / n as f64);
    }
    fm.add_score("fragment", max_file_score, None, debug);

    fm.score = fm.score.trunc() * SCORE_OFFSET;

    let repo = id.repository(doc);
    fm.add_score(
        "repo-rank",
        SCORE_REPO_RANK_FACTOR * repo.rank as f64 / u16::MAX as f64,
        None,
        debug,
    );

    if opts.use_document_ranks {
        let weight = if opts.document_ranks_weight > 0.0 {
            opts.document_ranks_weight
        } else {
            SCORE_FILE_RANK_FACTOR
        };
        // log2 count, capped at 32
        if let Some(&rank) = id.ranks(doc).first() {
            fm.add_score("file-rank", weight * (rank / 32.0).min(1.0), None, debug);
        }
    }

    let num_docs = id.num_docs().max(1) as f64;
    fm.add_score(
        "doc-order",
        SCORE_FILE_ORDER_FACTOR * (1.0 - doc as f64 / num_docs),
        None,
        debug,
    );

    if debug {
        fm.debug = format!("score: {} <- {}", fm.score as i64, fm.debug.trim_end_matches(", "));
    }
}

/// Term frequencies of one file for BM25. File name and symbol matches
/// weigh more than plain content matches.
pub(crate) fn term_frequencies(
    cp: &mut ContentProvider<'_>,
    cands: &[CandidateMatch],
    df: &mut HashMap<Vec<u8>, usize>,
) -> Result<HashMap<Vec<u8>, usize>> {
    let mut tf: HashMap<Vec<u8>, usize> = HashMap::new();
    for c in cands {
        let data = cp.data(c.file_name)?;
        let term = to_lower(data.get(c.byte_offset as usize..c.end() as usize).unwrap_or(&[]));
        *tf.entry(term).or_default() += if c.file_name || c.symbol { 5 } else { 1 };
    }
    for term in tf.keys() {
        *df.entry(term.clone()).or_default() += 1;
    }
    Ok(tf)
}

/// BM25 parameters, Lucene defaults.
const BM25_K: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// Mean content length of the shard's documents, at least 1.
pub(crate) fn average_doc_length(id: &IndexData) -> f64 {
    let n = id.num_docs();
    let total: usize = (0..n).map(|d| id.content(d).map_or(0, <[u8]>::len)).sum();
    let avg = if n == 0 { 0.0 } else { total as f64 / n as f64 };
    if avg == 0.0 {
        1.0
    } else {
        avg
    }
}

/// Length of `doc` relative to the shard's average document length.
pub(crate) fn bm25_length_ratio(id: &IndexData, doc: u32, avg: f64) -> f64 {
    id.content(doc).map_or(0, <[u8]>::len) as f64 / avg
}

fn bm25_idf(df: usize, n: usize) -> f64 {
    let (df, n) = (df as f64, n as f64);
    (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
}

/// Replace the file score with BM25 over its term frequencies, once the
/// document frequencies of the whole shard are known.
pub(crate) fn score_bm25(
    fm: &mut FileMatch,
    tf: &HashMap<Vec<u8>, usize>,
    df: &HashMap<Vec<u8>, usize>,
    length_ratio: f64,
    num_docs: usize,
    debug: bool,
) {
    let mut score = 0.0;
    let mut sum_tf = 0;
    for (term, &f) in tf {
        sum_tf += f;
        let f = f as f64;
        let tf_score = ((BM25_K + 1.0) * f) / (BM25_K * (1.0 - BM25_B + BM25_B * length_ratio) + f);
        score += bm25_idf(df.get(term).copied().unwrap_or(1), num_docs) * tf_score;
    }
    fm.score = score;
    if debug {
        fm.debug = format!("bm25-score: {score:.2} <- sum-termFrequencies: {sum_tf}, length-ratio: {length_ratio:.2}");
    }
}

/// Extension as `path.Ext` reports it: from the last dot of the base name.
fn ext(name: &str) -> &str {
    let base = name.rsplit('/').next().unwrap_or(name);
    base.rfind('.').map_or("", |i| &base[i..])
}

/// Sort by descending score, then pull a file with an extension not seen in
/// the top results up to third place when it scores close enough.
pub fn sort_files(ms: &mut [FileMatch]) {
    ms.sort_by(|a, b| b.score.total_cmp(&a.score));
    boost_novel_extension(ms, 2, 0.9);
}

pub(crate) fn boost_novel_extension(ms: &mut [FileMatch], boost_offset: usize, min_score_ratio: f64) {
    if ms.len() <= boost_offset + 1 {
        return;
    }
    let top: Vec<String> = ms[..boost_offset].iter().map(|m| ext(&m.file_name).to_string()).collect();
    let candidates = &mut ms[boost_offset..];
    let min_score = candidates[0].score * min_score_ratio;
    let found = candidates
        .iter()
        .position(|c| c.score >= min_score && !top.iter().any(|e| e == ext(&c.file_name)));
    if let Some(i) = found {
        candidates[..=i].rotate_right(1);
    }
}
