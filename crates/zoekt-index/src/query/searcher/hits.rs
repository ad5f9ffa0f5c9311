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

use crate::error::{Result, ZoektError};
use crate::query::ast::Substring;
use crate::shard::index_data::Corpus;
use crate::shard::utils::read_uvarint;
use crate::shard::IndexData;
use crate::trigram::{case_variants, rune_count, split_ngrams, Ngram};

pub(crate) const EXHAUSTED: u32 = u32::MAX;

/// Lazily decodes one delta-encoded posting list.
#[derive(Debug)]
pub(crate) struct PostingIter<'a> {
    data: &'a [u8],
    off: usize,
    cur: u32,
}

impl<'a> PostingIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let mut it = PostingIter { data, off: 0, cur: 0 };
        it.cur = it.decode_next(0);
        it
    }

    fn decode_next(&mut self, base: u32) -> u32 {
        if self.off >= self.data.len() {
            return EXHAUSTED;
        }
        match read_uvarint(self.data, &mut self.off) {
            Some(d) => base.saturating_add(d as u32),
            None => EXHAUSTED,
        }
    }

    fn first(&self) -> u32 {
        self.cur
    }

    fn skip_to(&mut self, min: u32) {
        while self.cur != EXHAUSTED && self.cur < min {
            self.cur = self.decode_next(self.cur);
        }
    }
}

/// Stream of absolute rune offsets where an ngram (or a pair of ngrams at a
/// fixed distance) occurs.
#[derive(Debug)]
pub(crate) enum HitIter<'a> {
    Postings(PostingIter<'a>),
    /// Union over the case variants of one ngram.
    Merged(Vec<PostingIter<'a>>),
    /// Positions of the first iterator whose partner occurs `distance`
    /// runes later.
    Distance {
        first: Box<HitIter<'a>>,
        second: Box<HitIter<'a>>,
        distance: u32,
    },
}

impl<'a> HitIter<'a> {
    pub fn first(&mut self) -> u32 {
        match self {
            HitIter::Postings(p) => p.first(),
            HitIter::Merged(ps) => ps.iter().map(PostingIter::first).min().unwrap_or(EXHAUSTED),
            HitIter::Distance { first, second, distance } => loop {
                let p1 = first.first();
                let p2 = second.first();
                if p1 == EXHAUSTED || p2 == EXHAUSTED {
                    return EXHAUSTED;
                }
                let want = p1.saturating_add(*distance);
                if want < p2 {
                    first.skip_to(p2 - *distance);
                } else if want > p2 {
                    second.skip_to(want);
                } else {
                    return p1;
                }
            },
        }
    }

    /// Advance until `first() >= min`.
    pub fn skip_to(&mut self, min: u32) {
        match self {
            HitIter::Postings(p) => p.skip_to(min),
            HitIter::Merged(ps) => ps.iter_mut().for_each(|p| p.skip_to(min)),
            HitIter::Distance { first, second, distance } => {
                first.skip_to(min);
                second.skip_to(min.saturating_add(*distance));
            }
        }
    }
}

/// Turns ngram hits into documents and candidate start offsets. The
/// iterated ngram sits `left_pad` runes into the pattern, and the pattern
/// extends `right_pad` runes from there, so hits too close to a document
/// edge are dropped.
#[derive(Debug)]
pub(crate) struct NgramDocIter<'a> {
    iter: HitIter<'a>,
    left_pad: u32,
    right_pad: u32,
    ends: &'a [u32],
    pub ngram_lookups: usize,
    pub ngram_matches: usize,
}

impl<'a> NgramDocIter<'a> {
    fn doc_start(&self, doc: usize) -> u32 {
        if doc == 0 {
            0
        } else {
            self.ends[doc - 1]
        }
    }

    pub fn next_doc(&mut self) -> u32 {
        loop {
            let c = self.iter.first();
            if c == EXHAUSTED {
                return EXHAUSTED;
            }
            let doc = self.ends.partition_point(|&e| e <= c);
            if doc >= self.ends.len() {
                return EXHAUSTED;
            }
            let start = self.doc_start(doc);
            if c < start + self.left_pad {
                self.iter.skip_to(start + self.left_pad);
                continue;
            }
            if c.saturating_add(self.right_pad) > self.ends[doc] {
                self.iter.skip_to(c + 1);
                continue;
            }
            return doc as u32;
        }
    }

    /// Absolute rune offsets of every candidate match start inside `doc`.
    pub fn candidates(&mut self, doc: u32) -> Vec<u32> {
        let d = doc as usize;
        if d >= self.ends.len() {
            return Vec::new();
        }
        let (start, end) = (self.doc_start(d), self.ends[d]);
        self.iter.skip_to(start + self.left_pad);
        let mut out = Vec::new();
        loop {
            let c = self.iter.first();
            if c == EXHAUSTED || c >= end {
                break;
            }
            self.iter.skip_to(c + 1);
            if c.saturating_add(self.right_pad) <= end {
                out.push(c - self.left_pad);
            }
        }
        self.ngram_matches += out.len();
        out
    }
}

/// Postings of `ng`, or of each of its case variants. `None` when no
/// variant occurs in the corpus.
fn ngram_hits<'a>(
    d: &'a IndexData,
    corpus: Corpus,
    ng: Ngram,
    case_sensitive: bool,
    lookups: &mut usize,
) -> Result<Option<(HitIter<'a>, usize)>> {
    let variants = if case_sensitive { vec![ng] } else { case_variants(ng) };
    let mut lists = Vec::with_capacity(variants.len());
    let mut freq = 0;
    for v in variants {
        *lookups += 1;
        if let Some(p) = d.ngram_postings(corpus, v)? {
            freq += p.len();
            lists.push(PostingIter::new(p));
        }
    }
    Ok(match lists.len() {
        0 => None,
        1 => lists.pop().map(|p| (HitIter::Postings(p), freq)),
        _ => Some((HitIter::Merged(lists), freq)),
    })
}

/// Build the document iterator for a substring of at least three runes,
/// driven by its two rarest ngrams. `None` when some ngram of the pattern
/// does not occur at all.
pub(crate) fn iterate_ngrams<'a>(d: &'a IndexData, s: &Substring) -> Result<Option<NgramDocIter<'a>>> {
    let offs = split_ngrams(s.pattern.as_bytes());
    if offs.is_empty() {
        return Err(ZoektError::InvalidQuery(format!("pattern {:?} is shorter than an ngram", s.pattern)));
    }
    let corpus = if s.file_name { Corpus::Name } else { Corpus::Content };

    let mut lookups = 0;
    let mut hits = Vec::with_capacity(offs.len());
    for o in &offs {
        match ngram_hits(d, corpus, o.ngram, s.case_sensitive, &mut lookups)? {
            Some(h) => hits.push(Some(h)),
            None => return Ok(None),
        }
    }

    let rarest = |hits: &[Option<(HitIter<'a>, usize)>], skip: Option<usize>| {
        hits.iter()
            .enumerate()
            .filter(|(i, h)| Some(*i) != skip && h.is_some())
            .min_by_key(|(_, h)| h.as_ref().map(|h| h.1).unwrap_or(usize::MAX))
            .map(|(i, _)| i)
    };
    let Some(mut first_i) = rarest(&hits, None) else {
        return Ok(None);
    };
    let mut last_i = rarest(&hits, Some(first_i)).unwrap_or(first_i);
    if offs[first_i].index > offs[last_i].index {
        std::mem::swap(&mut first_i, &mut last_i);
    }

    let pattern_runes = rune_count(s.pattern.as_bytes()) as u32;
    let left_pad = offs[first_i].index;
    let iter = if first_i == last_i {
        hits[first_i].take().map(|h| h.0)
    } else {
        let distance = offs[last_i].index - offs[first_i].index;
        let a = hits[first_i].take().map(|h| h.0);
        let b = hits[last_i].take().map(|h| h.0);
        match (a, b) {
            (Some(a), Some(b)) => Some(HitIter::Distance {
                first: Box::new(a),
                second: Box::new(b),
                distance,
            }),
            _ => None,
        }
    };
    let Some(iter) = iter else {
        return Ok(None);
    };
    Ok(Some(NgramDocIter {
        iter,
        left_pad,
        right_pad: pattern_runes - left_pad,
        ends: d.end_runes(corpus),
        ngram_lookups: lookups,
        ngram_matches: 0,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::writer_utils::put_uvarint;

    fn encode(offs: &[u32]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut last = 0;
        for &o in offs {
            put_uvarint(&mut out, (o - last) as u64);
            last = o;
        }
        out
    }

    #[test]
    fn posting_iter_skips() {
        let data = encode(&[3, 10, 11, 40]);
        let mut it = HitIter::Postings(PostingIter::new(&data));
        assert_eq!(it.first(), 3);
        it.skip_to(11);
        assert_eq!(it.first(), 11);
        it.skip_to(12);
        assert_eq!(it.first(), 40);
        it.skip_to(41);
        assert_eq!(it.first(), EXHAUSTED);
    }

    #[test]
    fn merged_takes_minimum() {
        let a = encode(&[5, 20]);
        let b = encode(&[7, 9]);
        let mut it = HitIter::Merged(vec![PostingIter::new(&a), PostingIter::new(&b)]);
        let mut got = Vec::new();
        loop {
            let c = it.first();
            if c == EXHAUSTED {
                break;
            }
            got.push(c);
            it.skip_to(c + 1);
        }
        assert_eq!(got, vec![5, 7, 9, 20]);
    }

    #[test]
    fn distance_requires_partner() {
        let a = encode(&[0, 10, 30]);
        let b = encode(&[4, 33, 50]);
        let mut it = HitIter::Distance {
            first: Box::new(HitIter::Postings(PostingIter::new(&a))),
            second: Box::new(HitIter::Postings(PostingIter::new(&b))),
            distance: 3,
        };
        assert_eq!(it.first(), 30);
        it.skip_to(31);
        assert_eq!(it.first(), EXHAUSTED);
    }

    #[test]
    fn doc_iter_respects_document_edges() {
        // documents end at rune 10 and 20; pattern of 5 runes, ngram at 1
        let hits = encode(&[0, 7, 12, 18]);
        let ends = [10, 20];
        let mut it = NgramDocIter {
            iter: HitIter::Postings(PostingIter::new(&hits)),
            left_pad: 1,
            right_pad: 4,
            ends: &ends,
            ngram_lookups: 0,
            ngram_matches: 0,
        };
        // 0: too close to the start; 7: crosses the end of doc 0
        assert_eq!(it.next_doc(), 1);
        assert_eq!(it.candidates(1), vec![11]);
        assert_eq!(it.next_doc(), EXHAUSTED);
    }
}
