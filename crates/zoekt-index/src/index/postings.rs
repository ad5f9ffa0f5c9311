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

use std::collections::HashMap;

use crate::error::{Result, ZoektError};
use crate::shard::writer_utils::put_uvarint;
use crate::trigram::{decode_rune, Ngram, NGRAM_SIZE};
use crate::types::DocumentSection;

/// A byte offset is sampled every this many runes.
pub const RUNE_OFFSET_FREQUENCY: u32 = 100;

#[derive(Debug, Default, Clone)]
pub(crate) struct PostingList {
    pub data: Vec<u8>,
    last_off: u32,
}

/// Accumulates ngram postings for one corpus (contents or file names).
/// Offsets are rune offsets into the concatenation of all added strings.
#[derive(Debug, Default)]
pub(crate) struct PostingsBuilder {
    pub postings: HashMap<Ngram, PostingList>,
    /// Byte offset of rune `i * RUNE_OFFSET_FREQUENCY`.
    pub rune_offsets: Vec<u32>,
    pub rune_count: u32,
    /// Cumulative rune count at the end of each string.
    pub end_runes: Vec<u32>,
    pub end_byte: u32,
    pub is_plain_ascii: bool,
}

impl PostingsBuilder {
    pub fn new() -> Self {
        PostingsBuilder {
            is_plain_ascii: true,
            ..Default::default()
        }
    }

    /// Fails when adding `len` more bytes would overflow the `u32` offsets.
    pub fn check_fits(&self, len: usize) -> Result<u32> {
        u32::try_from(len)
            .ok()
            .filter(|n| self.end_byte.checked_add(*n).is_some())
            .ok_or_else(|| ZoektError::build("corpus exceeds 4GiB"))
    }

    /// Index `data`, translating `byte_sections` into absolute rune
    /// sections. Nothing is recorded when it fails.
    pub fn add(&mut self, data: &[u8], byte_sections: &[DocumentSection]) -> Result<Vec<DocumentSection>> {
        let data_sz = self.check_fits(data.len())?;
        if !sections_on_rune_boundaries(data, byte_sections) {
            return Err(ZoektError::build("section boundary is not on a rune boundary"));
        }

        let mut boundaries: Vec<u32> = byte_sections.iter().flat_map(|s| [s.start, s.end]).collect();
        boundaries.reverse();
        let mut rune_boundaries = Vec::with_capacity(boundaries.len());

        let start_rune = self.rune_count;
        let mut window = ['\0'; NGRAM_SIZE];
        let mut rune_index: u32 = 0;
        let mut byte_count: u32 = 0;
        let mut rest = data;
        while !rest.is_empty() {
            let (c, sz) = decode_rune(rest);
            if sz > 1 || c as u32 >= 0x80 {
                self.is_plain_ascii = false;
            }
            rest = &rest[sz..];
            window = [window[1], window[2], c];

            if (start_rune + rune_index) % RUNE_OFFSET_FREQUENCY == 0 {
                self.rune_offsets.push(self.end_byte + byte_count);
            }
            while boundaries.last() == Some(&byte_count) {
                boundaries.pop();
                rune_boundaries.push(start_rune + rune_index);
            }
            byte_count += sz as u32;

            if rune_index as usize >= NGRAM_SIZE - 1 {
                let ng = Ngram::from_runes(window);
                let new_off = start_rune + rune_index - (NGRAM_SIZE as u32 - 1);
                let pl = self.postings.entry(ng).or_default();
                put_uvarint(&mut pl.data, (new_off - pl.last_off) as u64);
                pl.last_off = new_off;
            }
            rune_index += 1;
        }
        // symbols may end exactly at the end of the content
        while boundaries.last() == Some(&byte_count) {
            boundaries.pop();
            rune_boundaries.push(start_rune + rune_index);
        }
        if let Some(b) = boundaries.last() {
            return Err(ZoektError::build(format!("no rune for section boundary at byte {b}")));
        }

        self.rune_count = start_rune
            .checked_add(rune_index)
            .ok_or_else(|| ZoektError::build("rune count overflow"))?;
        self.end_runes.push(self.rune_count);
        self.end_byte += data_sz;

        Ok(rune_boundaries
            .chunks_exact(2)
            .map(|c| DocumentSection { start: c[0], end: c[1] })
            .collect())
    }

    /// Ngrams in increasing order.
    pub fn sorted_ngrams(&self) -> Vec<Ngram> {
        let mut keys: Vec<Ngram> = self.postings.keys().copied().collect();
        keys.sort_unstable();
        keys
    }
}

/// True when every section boundary is a rune start (or the end of data).
pub(crate) fn sections_on_rune_boundaries(data: &[u8], secs: &[DocumentSection]) -> bool {
    let mut starts = std::collections::HashSet::new();
    let mut off = 0usize;
    while off < data.len() {
        starts.insert(off as u32);
        let (_, sz) = decode_rune(&data[off..]);
        off += sz;
    }
    starts.insert(data.len() as u32);
    secs.iter().all(|s| starts.contains(&s.start) && starts.contains(&s.end))
}
