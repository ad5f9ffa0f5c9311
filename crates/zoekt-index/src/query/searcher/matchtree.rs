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

//! The match tree: a compiled query evaluated document by document.
//!
//! Evaluation is staged by cost. A document is first evaluated with only
//! the information that is free (ngram candidates, per-document metadata),
//! then with file names, then with content, and finally with regexes. Each
//! node answers `Found`, `NoMatch`, or `RequiresHigherCost`; decided answers
//! are memoized in the per-document `known` table, indexed by node id.

use regex::bytes::Regex;

use super::content::ContentProvider;
use super::hits::{NgramDocIter, EXHAUSTED};
use crate::error::Result;
use crate::query::ast::Substring;
use crate::shard::index_data::Corpus;
use crate::shard::IndexData;
use crate::trigram::{case_folding_equals, rune_count, to_lower};
use crate::types::RawConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Cost {
    Const,
    Memory,
    Content,
    Regexp,
}

impl Cost {
    pub const ALL: [Cost; 4] = [Cost::Const, Cost::Memory, Cost::Content, Cost::Regexp];
    pub const MAX: Cost = Cost::Regexp;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MatchState {
    RequiresHigherCost,
    Found,
    NoMatch,
}

impl MatchState {
    fn of(found: bool) -> Self {
        if found {
            MatchState::Found
        } else {
            MatchState::NoMatch
        }
    }
}

/// A verified match of one leaf, in bytes relative to the document (or
/// file name) start.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct CandidateMatch {
    pub case_sensitive: bool,
    pub file_name: bool,
    pub symbol: bool,
    pub symbol_idx: u32,
    pub byte_offset: u32,
    pub byte_match_sz: u32,
    pub score_weight: f64,
}

impl CandidateMatch {
    fn new(file_name: bool, byte_offset: u32, byte_match_sz: u32) -> Self {
        CandidateMatch {
            case_sensitive: false,
            file_name,
            symbol: false,
            symbol_idx: 0,
            byte_offset,
            byte_match_sz,
            score_weight: 1.0,
        }
    }

    pub fn end(&self) -> u32 {
        self.byte_offset + self.byte_match_sz
    }
}

pub(crate) struct SubstrNode<'a> {
    pub query: Substring,
    id: &'a IndexData,
    lowered: Vec<u8>,
    pattern_runes: u32,
    iter: NgramDocIter<'a>,
    /// Candidate starts (absolute runes) in the prepared document, with the
    /// index of the enclosing symbol section when restricted to symbols.
    pending: Vec<(u32, Option<u32>)>,
    pub current: Vec<CandidateMatch>,
    evaluated: bool,
}

impl<'a> SubstrNode<'a> {
    pub fn new(id: &'a IndexData, query: Substring, iter: NgramDocIter<'a>) -> Self {
        SubstrNode {
            lowered: to_lower(query.pattern.as_bytes()),
            pattern_runes: rune_count(query.pattern.as_bytes()) as u32,
            query,
            id,
            iter,
            pending: Vec::new(),
            current: Vec::new(),
            evaluated: false,
        }
    }

    pub fn ngram_lookups(&self) -> usize {
        self.iter.ngram_lookups
    }

    pub fn ngram_matches(&self) -> usize {
        self.iter.ngram_matches
    }

    fn corpus(&self) -> Corpus {
        if self.query.file_name {
            Corpus::Name
        } else {
            Corpus::Content
        }
    }

    fn prepare(&mut self, doc: u32) {
        self.pending = self.iter.candidates(doc).into_iter().map(|r| (r, None)).collect();
        self.current.clear();
        self.evaluated = false;
    }

    /// Keep only candidates lying entirely inside one symbol section.
    fn restrict_to_symbols(&mut self, doc: u32) {
        let secs = self.id.rune_doc_sections(doc);
        let n = self.pattern_runes;
        self.pending.retain_mut(|(r, sym)| {
            let i = secs.partition_point(|s| s.end <= *r);
            match secs.get(i) {
                Some(s) if s.start <= *r && *r + n <= s.end => {
                    *sym = Some(i as u32);
                    true
                }
                _ => false,
            }
        });
    }

    fn eval(&mut self, cp: &mut ContentProvider<'a>, cost: Cost) -> Result<MatchState> {
        if self.evaluated {
            return Ok(MatchState::of(!self.current.is_empty()));
        }
        if self.pending.is_empty() {
            self.evaluated = true;
            return Ok(MatchState::NoMatch);
        }
        let need = if self.query.file_name { Cost::Memory } else { Cost::Content };
        if cost < need {
            return Ok(MatchState::RequiresHigherCost);
        }

        let data = cp.data(self.query.file_name)?;
        let runes: Vec<u32> = self.pending.iter().map(|p| p.0).collect();
        let offsets = self.id.runes_to_doc_bytes(self.corpus(), cp.doc, &runes)?;
        let pattern = self.query.pattern.as_bytes();
        for ((_, sym), off) in self.pending.iter().zip(offsets) {
            let Some(rest) = data.get(off as usize..) else {
                continue;
            };
            let sz = if self.query.case_sensitive {
                rest.starts_with(pattern).then_some(pattern.len())
            } else {
                case_folding_equals(&self.lowered, rest)
            };
            if let Some(sz) = sz {
                self.current.push(CandidateMatch {
                    case_sensitive: self.query.case_sensitive,
                    symbol: sym.is_some(),
                    symbol_idx: sym.unwrap_or(0),
                    ..CandidateMatch::new(self.query.file_name, off, sz as u32)
                });
            }
        }
        self.evaluated = true;
        Ok(MatchState::of(!self.current.is_empty()))
    }
}

pub(crate) struct RegexpNode {
    pub regex: Regex,
    pub file_name: bool,
    pub found: Vec<CandidateMatch>,
    evaluated: bool,
}

impl RegexpNode {
    pub fn new(regex: Regex, file_name: bool) -> Self {
        RegexpNode {
            regex,
            file_name,
            found: Vec::new(),
            evaluated: false,
        }
    }
}

/// `\bword\b` without a regex engine.
pub(crate) struct WordNode {
    pub word: Vec<u8>,
    pub file_name: bool,
    pub found: Vec<CandidateMatch>,
    evaluated: bool,
}

impl WordNode {
    pub fn new(word: Vec<u8>, file_name: bool) -> Self {
        WordNode {
            word,
            file_name,
            found: Vec::new(),
            evaluated: false,
        }
    }
}

pub(crate) fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// Byte offsets of `word` in `data` delimited by non-word bytes.
pub(crate) fn find_words(data: &[u8], word: &[u8]) -> Vec<u32> {
    let mut out = Vec::new();
    if word.is_empty() || word.len() > data.len() {
        return out;
    }
    let mut i = 0;
    while i + word.len() <= data.len() {
        let Some(p) = data[i..].windows(word.len()).position(|w| w == word) else {
            break;
        };
        let start = i + p;
        let end = start + word.len();
        let left_ok = start == 0 || !is_word_byte(data[start - 1]);
        let right_ok = end == data.len() || !is_word_byte(data[end]);
        if left_ok && right_ok {
            out.push(start as u32);
            i = end;
        } else {
            i = start + 1;
        }
    }
    out
}

pub(crate) struct SymbolRegexpNode<'a> {
    pub inner: Box<MatchTree<'a>>,
    pub regex: Regex,
    /// The regex matches everywhere; every section is a match.
    pub all: bool,
    pub found: Vec<CandidateMatch>,
    evaluated: bool,
}

impl<'a> SymbolRegexpNode<'a> {
    pub fn new(inner: MatchTree<'a>, regex: Regex, all: bool) -> Self {
        SymbolRegexpNode {
            inner: Box::new(inner),
            regex,
            all,
            found: Vec::new(),
            evaluated: false,
        }
    }
}

/// Predicate on per-document metadata, decided at memory cost.
#[derive(Debug)]
pub(crate) enum DocPredicate {
    Language(u16),
    /// Indexed by repository index within the shard.
    Repos(Vec<bool>),
    /// Indexed by document; precomputed, e.g. for file name sets.
    Docs(Vec<bool>),
    RawConfig(RawConfig),
    /// Per repository branch masks; the document must be on one of them.
    BranchMasks(Vec<u64>),
}

impl DocPredicate {
    fn matches(&self, d: &IndexData, doc: u32) -> bool {
        match self {
            DocPredicate::Language(code) => d.language_code(doc) == *code,
            DocPredicate::Repos(set) => set.get(d.repo_index(doc)).copied().unwrap_or(false),
            DocPredicate::Docs(set) => set.get(doc as usize).copied().unwrap_or(false),
            DocPredicate::RawConfig(flags) => d.raw_config(d.repo_index(doc)).contains(*flags),
            DocPredicate::BranchMasks(masks) => masks
                .get(d.repo_index(doc))
                .is_some_and(|m| m & d.branch_mask(doc) != 0),
        }
    }
}

pub(crate) struct DocMatchNode<'a> {
    id: &'a IndexData,
    pub reason: &'static str,
    pred: DocPredicate,
    cursor: u32,
}

impl<'a> DocMatchNode<'a> {
    pub fn new(id: &'a IndexData, reason: &'static str, pred: DocPredicate) -> Self {
        DocMatchNode { id, reason, pred, cursor: 0 }
    }
}

pub(crate) struct BranchNode<'a> {
    id: &'a IndexData,
    pub pattern: String,
    /// Branch bits selected in each repository of the shard.
    masks: Vec<u64>,
    cursor: u32,
    /// Bits of the current document's mask that the branch query selected.
    pub found_mask: u64,
}

impl<'a> BranchNode<'a> {
    pub fn new(id: &'a IndexData, pattern: String, masks: Vec<u64>) -> Self {
        BranchNode {
            id,
            pattern,
            masks,
            cursor: 0,
            found_mask: 0,
        }
    }

    fn mask(&self, doc: u32) -> u64 {
        self.masks.get(self.id.repo_index(doc)).copied().unwrap_or(0) & self.id.branch_mask(doc)
    }
}

pub(crate) enum Node<'a> {
    And(Vec<MatchTree<'a>>),
    /// Like `And`, but every child must match on one common line.
    AndLine(Vec<MatchTree<'a>>),
    Or(Vec<MatchTree<'a>>),
    Not(Box<MatchTree<'a>>),
    Boost(Box<MatchTree<'a>>, f64),
    /// Filters documents, but contributes no matches.
    NoVisit(Box<MatchTree<'a>>),
    /// Selects documents by file name only.
    FileName(Box<MatchTree<'a>>),
    Substr(SubstrNode<'a>),
    SymbolSubstr(SubstrNode<'a>),
    Regexp(RegexpNode),
    Word(WordNode),
    SymbolRegexp(SymbolRegexpNode<'a>),
    Branch(BranchNode<'a>),
    DocMatch(DocMatchNode<'a>),
    BruteForce,
    NoMatch(&'static str),
}

pub(crate) struct MatchTree<'a> {
    pub id: usize,
    pub node: Node<'a>,
}

impl<'a> From<Node<'a>> for MatchTree<'a> {
    fn from(node: Node<'a>) -> Self {
        MatchTree { id: 0, node }
    }
}

fn scan(cursor: &mut u32, n: u32, mut f: impl FnMut(u32) -> bool) -> u32 {
    while *cursor < n {
        if f(*cursor) {
            return *cursor;
        }
        *cursor += 1;
    }
    EXHAUSTED
}

fn is_known(known: &[Option<bool>], t: &MatchTree<'_>) -> bool {
    known.get(t.id).copied().flatten() == Some(true)
}

impl<'a> MatchTree<'a> {
    pub fn children(&self) -> &[MatchTree<'a>] {
        match &self.node {
            Node::And(c) | Node::AndLine(c) | Node::Or(c) => c,
            Node::Not(c) | Node::Boost(c, _) | Node::NoVisit(c) | Node::FileName(c) => std::slice::from_ref(c.as_ref()),
            Node::SymbolRegexp(s) => std::slice::from_ref(s.inner.as_ref()),
            _ => &[],
        }
    }

    fn children_mut(&mut self) -> &mut [MatchTree<'a>] {
        match &mut self.node {
            Node::And(c) | Node::AndLine(c) | Node::Or(c) => c,
            Node::Not(c) | Node::Boost(c, _) | Node::NoVisit(c) | Node::FileName(c) => std::slice::from_mut(c.as_mut()),
            Node::SymbolRegexp(s) => std::slice::from_mut(s.inner.as_mut()),
            _ => &mut [],
        }
    }

    /// Pre-order walk over every node.
    pub fn walk<F: FnMut(&MatchTree<'a>)>(&self, f: &mut F) {
        f(self);
        for c in self.children() {
            c.walk(f);
        }
    }

    /// Assign node ids in pre-order starting at `*next`. Returns the size
    /// of the `known` table the tree needs.
    pub fn number(&mut self, next: &mut usize) -> usize {
        self.id = *next;
        *next += 1;
        for c in self.children_mut() {
            c.number(next);
        }
        *next
    }

    /// Drop subtrees that cannot match. `None` means the whole tree cannot
    /// match any document of the shard.
    pub fn prune(self) -> Option<MatchTree<'a>> {
        let node = match self.node {
            Node::NoMatch(_) => return None,
            Node::And(children) => {
                let mut out = Vec::with_capacity(children.len());
                for c in children {
                    out.push(c.prune()?);
                }
                Node::And(out)
            }
            Node::AndLine(children) => {
                let mut out = Vec::with_capacity(children.len());
                for c in children {
                    out.push(c.prune()?);
                }
                if out.len() == 1 {
                    return out.pop();
                }
                Node::AndLine(out)
            }
            Node::Or(children) => {
                let mut out: Vec<MatchTree<'a>> = children.into_iter().filter_map(MatchTree::prune).collect();
                match out.len() {
                    0 => return None,
                    1 => return out.pop(),
                    _ => Node::Or(out),
                }
            }
            Node::Not(c) => match c.prune() {
                None => Node::BruteForce,
                Some(c) => Node::Not(Box::new(c)),
            },
            Node::Boost(c, w) => Node::Boost(Box::new(c.prune()?), w),
            Node::NoVisit(c) => Node::NoVisit(Box::new(c.prune()?)),
            Node::FileName(c) => Node::FileName(Box::new(c.prune()?)),
            Node::SymbolRegexp(mut s) => {
                let inner = std::mem::replace(&mut *s.inner, Node::BruteForce.into());
                *s.inner = inner.prune()?;
                Node::SymbolRegexp(s)
            }
            other => other,
        };
        Some(node.into())
    }

    /// Smallest document that may match; `EXHAUSTED` when none remains.
    pub fn next_doc(&mut self) -> u32 {
        match &mut self.node {
            Node::And(c) | Node::AndLine(c) => c.iter_mut().map(MatchTree::next_doc).max().unwrap_or(0),
            Node::Or(c) => c.iter_mut().map(MatchTree::next_doc).min().unwrap_or(EXHAUSTED),
            Node::Boost(c, _) | Node::NoVisit(c) | Node::FileName(c) => c.next_doc(),
            Node::SymbolRegexp(s) => s.inner.next_doc(),
            Node::Substr(s) | Node::SymbolSubstr(s) => s.iter.next_doc(),
            Node::DocMatch(m) => {
                let (id, pred) = (m.id, &m.pred);
                scan(&mut m.cursor, id.num_docs(), |doc| pred.matches(id, doc))
            }
            Node::Branch(b) => {
                let id = b.id;
                let masks = &b.masks;
                scan(&mut b.cursor, id.num_docs(), |doc| {
                    masks.get(id.repo_index(doc)).copied().unwrap_or(0) & id.branch_mask(doc) != 0
                })
            }
            Node::NoMatch(_) => EXHAUSTED,
            Node::Not(_) | Node::Regexp(_) | Node::Word(_) | Node::BruteForce => 0,
        }
    }

    /// Reset per-document state for `doc`.
    pub fn prepare(&mut self, doc: u32) {
        match &mut self.node {
            Node::Substr(s) => s.prepare(doc),
            Node::SymbolSubstr(s) => {
                s.prepare(doc);
                s.restrict_to_symbols(doc);
            }
            Node::Regexp(r) => {
                r.found.clear();
                r.evaluated = false;
            }
            Node::Word(w) => {
                w.found.clear();
                w.evaluated = false;
            }
            Node::SymbolRegexp(s) => {
                s.found.clear();
                s.evaluated = false;
                s.inner.prepare(doc);
            }
            Node::DocMatch(m) => m.cursor = m.cursor.max(doc + 1),
            Node::Branch(b) => {
                b.cursor = b.cursor.max(doc + 1);
                b.found_mask = 0;
            }
            _ => {
                for c in self.children_mut() {
                    c.prepare(doc);
                }
            }
        }
    }

    pub fn eval(&mut self, cp: &mut ContentProvider<'a>, cost: Cost, known: &mut [Option<bool>]) -> Result<MatchState> {
        if let Some(v) = known.get(self.id).copied().flatten() {
            return Ok(MatchState::of(v));
        }
        let st = match &mut self.node {
            Node::And(c) => eval_and(c, cp, cost, known)?,
            Node::AndLine(c) => match eval_and(c, cp, cost, known)? {
                MatchState::Found => same_line(c, cp)?,
                st => st,
            },
            Node::Or(c) => {
                let (mut found, mut sure) = (false, true);
                for ch in c.iter_mut() {
                    match ch.eval(cp, cost, known)? {
                        MatchState::RequiresHigherCost => sure = false,
                        MatchState::Found => found = true,
                        MatchState::NoMatch => {}
                    }
                }
                if sure {
                    MatchState::of(found)
                } else {
                    MatchState::RequiresHigherCost
                }
            }
            Node::Not(c) => match c.eval(cp, cost, known)? {
                MatchState::Found => MatchState::NoMatch,
                MatchState::NoMatch => MatchState::Found,
                st => st,
            },
            Node::Boost(c, _) | Node::NoVisit(c) | Node::FileName(c) => c.eval(cp, cost, known)?,
            Node::Substr(s) | Node::SymbolSubstr(s) => s.eval(cp, cost)?,
            Node::Regexp(r) => {
                if r.evaluated {
                    MatchState::of(!r.found.is_empty())
                } else if cost < Cost::Regexp {
                    MatchState::RequiresHigherCost
                } else {
                    cp.stats.regexps_considered += 1;
                    let data = cp.data(r.file_name)?;
                    r.found = r
                        .regex
                        .find_iter(data)
                        .map(|m| CandidateMatch::new(r.file_name, m.start() as u32, m.len() as u32))
                        .collect();
                    r.evaluated = true;
                    MatchState::of(!r.found.is_empty())
                }
            }
            Node::Word(w) => {
                if w.evaluated {
                    MatchState::of(!w.found.is_empty())
                } else if cost < Cost::Content {
                    MatchState::RequiresHigherCost
                } else {
                    let data = cp.data(w.file_name)?;
                    let sz = w.word.len() as u32;
                    w.found = find_words(data, &w.word)
                        .into_iter()
                        .map(|off| CandidateMatch {
                            case_sensitive: true,
                            ..CandidateMatch::new(w.file_name, off, sz)
                        })
                        .collect();
                    w.evaluated = true;
                    MatchState::of(!w.found.is_empty())
                }
            }
            Node::SymbolRegexp(s) => eval_symbol_regexp(s, cp, cost)?,
            Node::DocMatch(_) | Node::Branch(_) if cost < Cost::Memory => MatchState::RequiresHigherCost,
            Node::DocMatch(m) => MatchState::of(m.pred.matches(m.id, cp.doc)),
            Node::Branch(b) => {
                b.found_mask = b.mask(cp.doc);
                MatchState::of(b.found_mask != 0)
            }
            Node::BruteForce => MatchState::Found,
            Node::NoMatch(_) => MatchState::NoMatch,
        };
        if st != MatchState::RequiresHigherCost {
            if let Some(slot) = known.get_mut(self.id) {
                *slot = Some(st == MatchState::Found);
            }
        }
        Ok(st)
    }

    /// Call `f` on every leaf that contributed to the match, with the
    /// accumulated boost weight. Negated and filter-only subtrees are not
    /// visited.
    pub fn visit_matches<F: FnMut(&MatchTree<'a>, f64)>(&self, known: &[Option<bool>], weight: f64, f: &mut F) {
        match &self.node {
            Node::And(c) | Node::AndLine(c) | Node::Or(c) => {
                for ch in c.iter().filter(|ch| is_known(known, ch)) {
                    ch.visit_matches(known, weight, f);
                }
            }
            Node::Boost(c, w) => c.visit_matches(known, weight * *w, f),
            Node::Not(_) | Node::NoVisit(_) | Node::FileName(_) => {}
            _ => f(self, weight),
        }
    }

    /// Verified matches of a leaf in the current document.
    pub fn leaf_candidates(&self) -> &[CandidateMatch] {
        match &self.node {
            Node::Substr(s) | Node::SymbolSubstr(s) => &s.current,
            Node::Regexp(r) => &r.found,
            Node::Word(w) => &w.found,
            Node::SymbolRegexp(s) => &s.found,
            _ => &[],
        }
    }

    /// Number of leaves, for atom scoring.
    pub fn atom_count(&self) -> usize {
        let mut n = 0;
        self.walk(&mut |t| {
            if t.children().is_empty() {
                n += 1;
            }
        });
        n
    }
}

fn eval_and<'a>(
    children: &mut [MatchTree<'a>],
    cp: &mut ContentProvider<'a>,
    cost: Cost,
    known: &mut [Option<bool>],
) -> Result<MatchState> {
    let mut sure = true;
    for ch in children.iter_mut() {
        match ch.eval(cp, cost, known)? {
            MatchState::NoMatch => return Ok(MatchState::NoMatch),
            MatchState::RequiresHigherCost => sure = false,
            MatchState::Found => {}
        }
    }
    Ok(if sure {
        MatchState::Found
    } else {
        MatchState::RequiresHigherCost
    })
}

/// Check that the content substrings of an `AndLine` share a line. Starts
/// from the child with the fewest candidates.
fn same_line(children: &[MatchTree<'_>], cp: &mut ContentProvider<'_>) -> Result<MatchState> {
    let mut cands: Vec<&[CandidateMatch]> = Vec::with_capacity(children.len());
    for c in children {
        match &c.node {
            Node::Substr(s) if !s.query.file_name => cands.push(&s.current),
            _ => return Ok(MatchState::Found),
        }
    }
    let Some(fewest) = (0..cands.len()).min_by_key(|&i| cands[i].len()) else {
        return Ok(MatchState::Found);
    };
    let nl = &cp.newlines()?.locs;
    for m in cands[fewest] {
        let i = nl.partition_point(|&n| n < m.byte_offset);
        let line_start = if i == 0 { 0 } else { nl[i - 1] + 1 };
        // a candidate belongs to the line it starts on
        let next_line_start = nl.get(i).map_or(u32::MAX, |n| n + 1);
        let on_line = |cs: &[CandidateMatch]| {
            let k = cs.partition_point(|c| c.byte_offset < line_start);
            cs.get(k).is_some_and(|c| c.byte_offset < next_line_start)
        };
        if cands.iter().enumerate().all(|(j, cs)| j == fewest || on_line(cs)) {
            return Ok(MatchState::Found);
        }
    }
    Ok(MatchState::NoMatch)
}

/// Run the symbol regex over each symbol section of the document. The
/// inner tree only drives `next_doc`.
fn eval_symbol_regexp(s: &mut SymbolRegexpNode<'_>, cp: &mut ContentProvider<'_>, cost: Cost) -> Result<MatchState> {
    if s.evaluated {
        return Ok(MatchState::of(!s.found.is_empty()));
    }
    if cost < Cost::Regexp {
        return Ok(MatchState::RequiresHigherCost);
    }
    cp.stats.regexps_considered += 1;
    let data = cp.data(false)?;
    let secs = cp.sections()?;
    let mut found = Vec::new();
    for (i, sec) in secs.iter().enumerate() {
        let Some(sym) = data.get(sec.start as usize..sec.end as usize) else {
            continue;
        };
        let (start, len) = if s.all {
            (0, sym.len())
        } else {
            match s.regex.find(sym) {
                Some(m) => (m.start(), m.len()),
                None => continue,
            }
        };
        found.push(CandidateMatch {
            symbol: true,
            symbol_idx: i as u32,
            ..CandidateMatch::new(false, sec.start + start as u32, len as u32)
        });
    }
    s.found = found;
    s.evaluated = true;
    Ok(MatchState::of(!s.found.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::builder::IndexBuilder;
    use crate::types::Repository;

    fn shard(files: &[(&str, &str)]) -> IndexData {
        let mut b = IndexBuilder::new(Some(Repository::new(1, "repo"))).unwrap();
        for (name, content) in files {
            b.add_file(name, content.as_bytes()).unwrap();
        }
        IndexData::from_bytes("test", b.to_bytes().unwrap()).unwrap()
    }

    fn docs<'a>(id: &'a IndexData, set: &[bool]) -> MatchTree<'a> {
        Node::DocMatch(DocMatchNode::new(id, "docs", DocPredicate::Docs(set.to_vec()))).into()
    }

    fn eval_doc<'a>(t: &mut MatchTree<'a>, id: &'a IndexData, doc: u32, cost: Cost) -> MatchState {
        let mut next = 0;
        let n = t.number(&mut next);
        let mut known = vec![None; n];
        let mut cp = ContentProvider::new(id);
        cp.set_document(doc);
        t.prepare(doc);
        t.eval(&mut cp, cost, &mut known).unwrap()
    }

    #[test]
    fn and_or_laws() {
        let id = shard(&[("a", "x"), ("b", "y")]);
        let mut and: MatchTree = Node::And(vec![docs(&id, &[true, true]), docs(&id, &[false, true])]).into();
        assert_eq!(eval_doc(&mut and, &id, 0, Cost::Memory), MatchState::NoMatch);

        let mut or: MatchTree = Node::Or(vec![docs(&id, &[false, false]), docs(&id, &[true, false])]).into();
        assert_eq!(eval_doc(&mut or, &id, 0, Cost::Const), MatchState::RequiresHigherCost);
        assert_eq!(eval_doc(&mut or, &id, 0, Cost::Memory), MatchState::Found);

        let mut not: MatchTree = Node::Not(Box::new(docs(&id, &[true, false]))).into();
        assert_eq!(eval_doc(&mut not, &id, 0, Cost::Memory), MatchState::NoMatch);
        assert_eq!(eval_doc(&mut not, &id, 1, Cost::Memory), MatchState::Found);
    }

    #[test]
    fn or_waits_for_undecided_children() {
        let id = shard(&[("a", "hello")]);
        let re = Regex::new("hel+o").unwrap();
        let mut or: MatchTree = Node::Or(vec![
            docs(&id, &[true]),
            Node::Regexp(RegexpNode::new(re, false)).into(),
        ])
        .into();
        assert_eq!(eval_doc(&mut or, &id, 0, Cost::Content), MatchState::RequiresHigherCost);
        assert_eq!(eval_doc(&mut or, &id, 0, Cost::Regexp), MatchState::Found);
    }

    #[test]
    fn next_doc_combines_children() {
        let id = shard(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let mut and: MatchTree = Node::And(vec![docs(&id, &[false, true, true]), docs(&id, &[false, false, true])]).into();
        assert_eq!(and.next_doc(), 2);
        let mut or: MatchTree = Node::Or(vec![docs(&id, &[false, true, true]), docs(&id, &[false, false, true])]).into();
        assert_eq!(or.next_doc(), 1);
        or.prepare(1);
        assert_eq!(or.next_doc(), 2);
        or.prepare(2);
        assert_eq!(or.next_doc(), EXHAUSTED);
    }

    #[test]
    fn prune_removes_impossible_branches() {
        let id = shard(&[("a", "x")]);
        let none = || MatchTree::from(Node::NoMatch("test"));
        let and: MatchTree = Node::And(vec![docs(&id, &[true]), none()]).into();
        assert!(and.prune().is_none());

        let or: MatchTree = Node::Or(vec![docs(&id, &[true]), none()]).into();
        let pruned = or.prune().unwrap();
        assert!(matches!(pruned.node, Node::DocMatch(_)));

        let not: MatchTree = Node::Not(Box::new(none())).into();
        assert!(matches!(not.prune().unwrap().node, Node::BruteForce));

        let boost: MatchTree = Node::Boost(Box::new(none()), 2.0).into();
        assert!(boost.prune().is_none());
    }

    #[test]
    fn words_need_boundaries() {
        assert_eq!(find_words(b"foo foobar (foo)", b"foo"), vec![0, 12]);
        assert_eq!(find_words(b"_foo", b"foo"), Vec::<u32>::new());
        assert!(find_words(b"fo", b"foo").is_empty());
    }

    #[test]
    fn visit_skips_negations_and_applies_boost() {
        let id = shard(&[("a", "x")]);
        let mut t: MatchTree = Node::And(vec![
            Node::Boost(Box::new(docs(&id, &[true])), 3.0).into(),
            Node::Not(Box::new(docs(&id, &[false]))).into(),
        ])
        .into();
        assert_eq!(eval_doc(&mut t, &id, 0, Cost::Memory), MatchState::Found);
        let mut n = 0;
        let mut next = 0;
        let size = t.number(&mut next);
        let mut known = vec![None; size];
        let mut cp = ContentProvider::new(&id);
        cp.set_document(0);
        t.prepare(0);
        t.eval(&mut cp, Cost::Memory, &mut known).unwrap();
        t.visit_matches(&known, 1.0, &mut |_, w| {
            n += 1;
            assert_eq!(w, 3.0);
        });
        assert_eq!(n, 1);
        assert_eq!(t.atom_count(), 2);
    }

    #[test]
    fn same_line_compares_candidate_starts() {
        let id = shard(&[("a", "a b\nc d\n")]);
        let substr = |at: &[(u32, u32)]| {
            let mut t = super::super::compile::build(&id, &crate::query::Q::content("a b")).unwrap();
            let Node::Substr(s) = &mut t.node else {
                panic!("expected a substring node");
            };
            s.current = at.iter().map(|&(off, sz)| CandidateMatch::new(false, off, sz)).collect();
            t
        };
        let mut cp = ContentProvider::new(&id);
        cp.set_document(0);

        // "b\nc" starts on the first line and runs into the second
        let spanning = [substr(&[(0, 1)]), substr(&[(2, 3)])];
        assert_eq!(same_line(&spanning, &mut cp).unwrap(), MatchState::Found);

        let at_newline = [substr(&[(0, 1)]), substr(&[(3, 1)])];
        assert_eq!(same_line(&at_newline, &mut cp).unwrap(), MatchState::Found);

        let next_line = [substr(&[(0, 1)]), substr(&[(4, 1)])];
        assert_eq!(same_line(&next_line, &mut cp).unwrap(), MatchState::NoMatch);
    }
}
