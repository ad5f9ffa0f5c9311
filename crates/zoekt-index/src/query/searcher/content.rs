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

//! Per-document content access and the assembly of candidate matches into
//! line and chunk results.

use super::matchtree::{CandidateMatch, MatchTree};
use super::score::candidate_match_score;
use crate::error::Result;
use crate::shard::IndexData;
use crate::trigram::rune_count;
use crate::types::{ChunkMatch, DocumentSection, LineFragmentMatch, LineMatch, Location, Range, Stats};

/// Newline positions of one document. Line numbers are 1-based.
#[derive(Debug, Clone, Default)]
pub(crate) struct Newlines {
    pub locs: Vec<u32>,
    pub file_size: u32,
}

impl Newlines {
    pub fn new(locs: Vec<u32>, file_size: u32) -> Self {
        Newlines { locs, file_size }
    }

    /// Line containing `off`. An offset on a newline belongs to the line
    /// that newline ends.
    pub fn at_offset(&self, off: u32) -> usize {
        self.locs.partition_point(|&l| l < off) + 1
    }

    /// Byte offset where `line` begins, clamped to `[0, file_size]`.
    pub fn line_start(&self, line: usize) -> u32 {
        match line.checked_sub(2) {
            None => 0,
            Some(i) if i >= self.locs.len() => self.file_size,
            Some(i) => self.locs[i] + 1,
        }
    }

    /// Lines spanned by the byte range `[start, end)`.
    pub fn offset_range_to_line_range(&self, start: u32, end: u32) -> (usize, usize) {
        let first = self.at_offset(start);
        let last = self.at_offset(start.max(end.max(1) - 1));
        (first, last)
    }

    /// Lines `[low, high)`, newlines included.
    pub fn get_lines<'d>(&self, data: &'d [u8], low: usize, high: usize) -> &'d [u8] {
        if low >= high {
            return &[];
        }
        let (s, e) = (self.line_start(low) as usize, self.line_start(high) as usize);
        data.get(s..e).unwrap_or(&[])
    }

    pub fn line_count(&self) -> usize {
        self.locs.len() + 1
    }
}

/// Lazily loaded view of the document being evaluated. Content loads are
/// counted in `stats`.
pub(crate) struct ContentProvider<'a> {
    pub id: &'a IndexData,
    pub doc: u32,
    data: Option<&'a [u8]>,
    newlines: Option<Newlines>,
    sections: Option<Vec<DocumentSection>>,
    pub stats: Stats,
}

impl<'a> ContentProvider<'a> {
    pub fn new(id: &'a IndexData) -> Self {
        ContentProvider {
            id,
            doc: 0,
            data: None,
            newlines: None,
            sections: None,
            stats: Stats::default(),
        }
    }

    pub fn set_document(&mut self, doc: u32) {
        self.doc = doc;
        self.data = None;
        self.newlines = None;
        self.sections = None;
    }

    pub fn data(&mut self, file_name: bool) -> Result<&'a [u8]> {
        if file_name {
            return self.id.file_name(self.doc);
        }
        if let Some(d) = self.data {
            return Ok(d);
        }
        let d = self.id.content(self.doc)?;
        self.stats.files_loaded += 1;
        self.stats.content_bytes_loaded += d.len() as i64;
        self.data = Some(d);
        Ok(d)
    }

    pub fn newlines(&mut self) -> Result<&Newlines> {
        let nl = match self.newlines.take() {
            Some(nl) => nl,
            None => Newlines::new(self.id.newlines(self.doc)?, self.id.content(self.doc)?.len() as u32),
        };
        Ok(self.newlines.insert(nl))
    }

    /// Symbol sections of the document, in bytes.
    pub fn sections(&mut self) -> Result<&[DocumentSection]> {
        let secs = match self.sections.take() {
            Some(s) => s,
            None => self.id.doc_sections(self.doc)?,
        };
        Ok(self.sections.insert(secs))
    }
}

pub(crate) fn epsilon_equals_one(f: f64) -> bool {
    (f - 1.0).abs() < 1e-9
}

/// Collect the matches of every visited leaf. Content matches win over file
/// name matches. With `merge`, overlapping matches are coalesced (line
/// output); otherwise later overlapping matches are dropped (chunk output).
pub(crate) fn gather_matches(mt: &MatchTree<'_>, known: &[Option<bool>], merge: bool) -> Vec<CandidateMatch> {
    let mut cands: Vec<CandidateMatch> = Vec::new();
    mt.visit_matches(known, 1.0, &mut |leaf, weight| {
        cands.extend(leaf.leaf_candidates().iter().map(|c| CandidateMatch {
            score_weight: weight,
            ..c.clone()
        }));
    });

    if cands.iter().any(|c| !c.file_name) {
        cands.retain(|c| !c.file_name);
    }
    cands.sort_by(|a, b| {
        b.file_name
            .cmp(&a.file_name)
            .then(a.byte_offset.cmp(&b.byte_offset))
            .then(b.byte_match_sz.cmp(&a.byte_match_sz))
    });

    let mut res: Vec<CandidateMatch> = Vec::with_capacity(cands.len());
    let mut merge_run = 1usize;
    for c in cands {
        let Some(last) = res.last_mut() else {
            res.push(c);
            continue;
        };
        if last.file_name != c.file_name {
            merge_run = 1;
            res.push(c);
            continue;
        }
        let last_end = last.end();
        if merge {
            if last_end >= c.byte_offset {
                merge_run += 1;
                if !(epsilon_equals_one(last.score_weight) && epsilon_equals_one(c.score_weight)) {
                    last.score_weight =
                        (last.score_weight * (merge_run - 1) as f64 + c.score_weight) / merge_run as f64;
                }
                if c.end() > last_end {
                    last.byte_match_sz = c.end() - last.byte_offset;
                }
                continue;
            }
            merge_run = 1;
        } else if last_end > c.byte_offset {
            continue;
        }
        res.push(c);
    }
    res
}

/// Split matches that cross newlines into one match per line.
pub(crate) fn break_on_newlines(ms: &[CandidateMatch], text: &[u8]) -> Vec<CandidateMatch> {
    let mut out = Vec::with_capacity(ms.len());
    for m in ms {
        let mut start = m.byte_offset;
        for i in m.byte_offset..m.end() {
            if text.get(i as usize) == Some(&b'\n') {
                if i > start {
                    out.push(CandidateMatch {
                        byte_offset: start,
                        byte_match_sz: i - start,
                        ..m.clone()
                    });
                }
                start = i + 1;
            }
        }
        if m.end() > start {
            out.push(CandidateMatch {
                byte_offset: start,
                byte_match_sz: m.end() - start,
                ..m.clone()
            });
        }
    }
    out
}

fn strip_newline(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

/// Line results for the matches of one document, which must come from
/// `gather_matches` in merge mode.
pub(crate) fn fill_matches(
    cp: &mut ContentProvider<'_>,
    ms: &[CandidateMatch],
    num_context_lines: usize,
    language: &str,
    debug: bool,
) -> Result<Vec<LineMatch>> {
    let Some(first) = ms.first() else {
        return Ok(Vec::new());
    };
    if first.file_name {
        let (score, debug_score, _) = candidate_match_score(cp, ms, language, debug)?;
        let name = cp.data(true)?;
        return Ok(vec![LineMatch {
            line: name.to_vec(),
            line_start: 0,
            line_end: name.len() as u32,
            line_number: 0,
            file_name: true,
            score,
            debug_score,
            line_fragments: ms
                .iter()
                .map(|m| LineFragmentMatch {
                    line_offset: m.byte_offset,
                    offset: m.byte_offset,
                    match_length: m.byte_match_sz,
                    symbol_info: None,
                })
                .collect(),
            ..Default::default()
        }]);
    }
    let data = cp.data(false)?;
    let ms = break_on_newlines(ms, data);
    fill_content_matches(cp, &ms, num_context_lines, language, debug)
}

fn fill_content_matches(
    cp: &mut ContentProvider<'_>,
    ms: &[CandidateMatch],
    num_context_lines: usize,
    language: &str,
    debug: bool,
) -> Result<Vec<LineMatch>> {
    let data = cp.data(false)?;
    let nl = cp.newlines()?.clone();
    let mut result = Vec::new();
    let mut rest = ms;
    while let Some(m) = rest.first() {
        let num = nl.at_offset(m.byte_offset);
        let line_start = nl.line_start(num);
        let mut next_line_start = nl.line_start(num + 1) as usize;

        let n = rest.iter().take_while(|c| (c.byte_offset as usize) < next_line_start).count().max(1);
        let (line_cands, tail) = rest.split_at(n);
        rest = tail;
        let end_match = line_cands.iter().map(CandidateMatch::end).max().unwrap_or(m.end()) as usize;

        // merged matches may run past the line; take lines until they end
        while next_line_start < data.len() && end_match > next_line_start {
            next_line_start = match data[next_line_start..].iter().position(|&b| b == b'\n') {
                Some(p) => next_line_start + p + 1,
                None => data.len(),
            };
        }

        let line = strip_newline(&data[line_start as usize..next_line_start]);
        let (score, debug_score, symbols) = candidate_match_score(cp, line_cands, language, debug)?;
        let mut lm = LineMatch {
            line: line.to_vec(),
            line_start,
            line_end: line_start + line.len() as u32,
            line_number: num as u32,
            score,
            debug_score,
            ..Default::default()
        };
        if num_context_lines > 0 {
            lm.before = nl.get_lines(data, num.saturating_sub(num_context_lines).max(1), num).to_vec();
            lm.after = nl.get_lines(data, num + 1, num + 1 + num_context_lines).to_vec();
        }
        lm.line_fragments = line_cands
            .iter()
            .enumerate()
            .map(|(i, c)| LineFragmentMatch {
                line_offset: c.byte_offset - line_start,
                offset: c.byte_offset,
                match_length: c.byte_match_sz,
                symbol_info: symbols.get(i).cloned().flatten(),
            })
            .collect();
        result.push(lm);
    }
    Ok(result)
}

#[derive(Debug)]
struct CandidateChunk<'m> {
    first_line: usize,
    last_line: usize,
    candidates: Vec<&'m CandidateMatch>,
}

/// Group matches whose context windows would touch.
fn chunk_candidates<'m>(ms: &'m [CandidateMatch], nl: &Newlines, n: usize) -> Vec<CandidateChunk<'m>> {
    let mut chunks: Vec<CandidateChunk<'m>> = Vec::new();
    for m in ms {
        let (first, last) = nl.offset_range_to_line_range(m.byte_offset, m.end());
        match chunks.last_mut() {
            Some(c) if c.last_line + n >= first.saturating_sub(n) => {
                c.candidates.push(m);
                c.last_line = c.last_line.max(last);
            }
            _ => chunks.push(CandidateChunk {
                first_line: first,
                last_line: last,
                candidates: vec![m],
            }),
        }
    }
    chunks
}

/// Column numbers (1-based, in runes). Remembers the last position so
/// that walking forward through a line stays linear.
struct ColumnHelper<'d> {
    data: &'d [u8],
    last_line: u32,
    last_off: u32,
    last_col: u32,
}

impl<'d> ColumnHelper<'d> {
    fn new(data: &'d [u8]) -> Self {
        ColumnHelper {
            data,
            last_line: 0,
            last_off: 0,
            last_col: 1,
        }
    }

    fn get(&mut self, line_start: u32, off: u32) -> u32 {
        let (from, base) = if line_start == self.last_line && off >= self.last_off {
            (self.last_off, self.last_col)
        } else {
            (line_start, 1)
        };
        let seg = self.data.get(from as usize..off as usize).unwrap_or(&[]);
        let col = base + rune_count(seg) as u32;
        self.last_line = line_start;
        self.last_off = off;
        self.last_col = col;
        col
    }
}

/// Chunk results for the matches of one document, which must come from
/// `gather_matches` in non-merge mode.
pub(crate) fn fill_chunk_matches(
    cp: &mut ContentProvider<'_>,
    ms: &[CandidateMatch],
    num_context_lines: usize,
    language: &str,
    debug: bool,
) -> Result<Vec<ChunkMatch>> {
    let Some(first) = ms.first() else {
        return Ok(Vec::new());
    };
    if first.file_name {
        let (score, debug_score, _) = candidate_match_score(cp, ms, language, debug)?;
        let name = cp.data(true)?;
        let loc = |off: u32| Location {
            byte_offset: off,
            line_number: 1,
            column: rune_count(name.get(..off as usize).unwrap_or(name)) as u32 + 1,
        };
        return Ok(vec![ChunkMatch {
            content: name.to_vec(),
            content_start: Location {
                byte_offset: 0,
                line_number: 1,
                column: 1,
            },
            file_name: true,
            ranges: ms
                .iter()
                .map(|m| Range {
                    start: loc(m.byte_offset),
                    end: loc(m.end()),
                })
                .collect(),
            score,
            debug_score,
            ..Default::default()
        }]);
    }

    let data = cp.data(false)?;
    let nl = cp.newlines()?.clone();
    let mut columns = ColumnHelper::new(data);
    let mut out = Vec::new();
    for chunk in chunk_candidates(ms, &nl, num_context_lines) {
        let first_line = chunk.first_line.saturating_sub(num_context_lines).max(1);
        let last_line = (chunk.last_line + num_context_lines).min(nl.line_count());
        let mut ranges = Vec::with_capacity(chunk.candidates.len());
        for m in &chunk.candidates {
            let (sl, el) = nl.offset_range_to_line_range(m.byte_offset, m.end());
            let start_col = columns.get(nl.line_start(sl), m.byte_offset);
            let end_col = columns.get(nl.line_start(el), m.end());
            ranges.push(Range {
                start: Location {
                    byte_offset: m.byte_offset,
                    line_number: sl as u32,
                    column: start_col,
                },
                end: Location {
                    byte_offset: m.end(),
                    line_number: el as u32,
                    column: end_col,
                },
            });
        }
        let owned: Vec<CandidateMatch> = chunk.candidates.iter().map(|c| (*c).clone()).collect();
        let (score, debug_score, symbol_info) = candidate_match_score(cp, &owned, language, debug)?;
        let best_line_match = chunk
            .candidates
            .first()
            .map(|c| nl.at_offset(c.byte_offset) as u32)
            .unwrap_or(first_line as u32);
        out.push(ChunkMatch {
            content: nl.get_lines(data, first_line, last_line + 1).to_vec(),
            content_start: Location {
                byte_offset: nl.line_start(first_line),
                line_number: first_line as u32,
                column: 1,
            },
            file_name: false,
            ranges,
            symbol_info,
            score,
            debug_score,
            best_line_match,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cm(off: u32, sz: u32) -> CandidateMatch {
        CandidateMatch {
            case_sensitive: false,
            file_name: false,
            symbol: false,
            symbol_idx: 0,
            byte_offset: off,
            byte_match_sz: sz,
            score_weight: 1.0,
        }
    }

    #[test]
    fn newline_arithmetic() {
        // "ab\ncd\n\nef"
        let nl = Newlines::new(vec![2, 5, 6], 9);
        assert_eq!(nl.at_offset(0), 1);
        assert_eq!(nl.at_offset(2), 1);
        assert_eq!(nl.at_offset(3), 2);
        assert_eq!(nl.at_offset(8), 4);
        assert_eq!(nl.line_start(1), 0);
        assert_eq!(nl.line_start(2), 3);
        assert_eq!(nl.line_start(4), 7);
        assert_eq!(nl.line_start(5), 9);
        assert_eq!(nl.offset_range_to_line_range(1, 4), (1, 2));
        assert_eq!(nl.offset_range_to_line_range(0, 0), (1, 1));
        assert_eq!(nl.get_lines(b"ab\ncd\n\nef", 2, 4), b"cd\n\n");
        assert!(nl.get_lines(b"ab\ncd\n\nef", 3, 3).is_empty());
    }

    #[test]
    fn break_splits_at_newlines() {
        let out = break_on_newlines(&[cm(1, 5)], b"ab\ncd\nef");
        let spans: Vec<(u32, u32)> = out.iter().map(|c| (c.byte_offset, c.byte_match_sz)).collect();
        assert_eq!(spans, vec![(1, 1), (3, 2)]);
    }

    #[test]
    fn chunks_merge_when_context_touches() {
        // lines: 1..=6, one char each
        let nl = Newlines::new(vec![1, 3, 5, 7, 9], 11);
        let ms = [cm(0, 1), cm(4, 1), cm(10, 1)];
        let chunks = chunk_candidates(&ms, &nl, 1);
        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[0].first_line, chunks[0].last_line), (1, 3));
        assert_eq!(chunks[1].first_line, 6);

        let chunks = chunk_candidates(&ms, &nl, 0);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn columns_count_runes() {
        let data = "héllo wörld".as_bytes();
        let mut h = ColumnHelper::new(data);
        assert_eq!(h.get(0, 0), 1);
        assert_eq!(h.get(0, 3), 3);
        let w = data.iter().position(|&b| b == b'w').unwrap() as u32;
        assert_eq!(h.get(0, w), 7);
    }
}
