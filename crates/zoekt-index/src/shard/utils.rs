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

use crate::types::DocumentSection;

/// Read an unsigned LEB128 varint from `buf` at `*off`, advancing it.
/// Returns `None` on truncation or overlong encodings.
pub(crate) fn read_uvarint(buf: &[u8], off: &mut usize) -> Option<u64> {
    let mut shift = 0u32;
    let mut out: u64 = 0;
    loop {
        let b = *buf.get(*off)?;
        *off += 1;
        out |= ((b & 0x7F) as u64) << shift;
        if (b & 0x80) == 0 {
            return Some(out);
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
}

/// Inverse of `writer_utils::to_sized_deltas`.
pub(crate) fn from_sized_deltas(buf: &[u8]) -> Option<Vec<u32>> {
    let mut off = 0;
    let n = read_uvarint(buf, &mut off)? as usize;
    // every delta takes at least one byte
    if n > buf.len() {
        return None;
    }
    let mut out = Vec::with_capacity(n);
    let mut last = 0u32;
    for _ in 0..n {
        let d = read_uvarint(buf, &mut off)?;
        last = last.wrapping_add(d as u32);
        out.push(last);
    }
    Some(out)
}

/// Decode a posting list: delta varints whose running sum gives absolute
/// rune offsets.
pub(crate) fn decode_postings(buf: &[u8]) -> Option<Vec<u32>> {
    let mut off = 0;
    let mut out = Vec::new();
    let mut last = 0u32;
    while off < buf.len() {
        let d = read_uvarint(buf, &mut off)?;
        last = last.checked_add(u32::try_from(d).ok()?)?;
        out.push(last);
    }
    Some(out)
}

/// Sections are stored as pairs of (start, end) deltas.
pub(crate) fn marshal_doc_sections(secs: &[DocumentSection]) -> Vec<u8> {
    let mut flat = Vec::with_capacity(secs.len() * 2);
    for s in secs {
        flat.push(s.start);
        flat.push(s.end);
    }
    super::writer_utils::to_sized_deltas(&flat)
}

pub(crate) fn unmarshal_doc_sections(buf: &[u8]) -> Option<Vec<DocumentSection>> {
    let flat = from_sized_deltas(buf)?;
    if flat.len() % 2 != 0 {
        return None;
    }
    Some(
        flat.chunks_exact(2)
            .map(|c| DocumentSection {
                start: c[0],
                end: c[1],
            })
            .collect(),
    )
}

pub(crate) fn read_u32_be(buf: &[u8], at: usize) -> Option<u32> {
    let b = buf.get(at..at + 4)?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

pub(crate) fn read_u64_be(buf: &[u8], at: usize) -> Option<u64> {
    let b = buf.get(at..at + 8)?;
    let mut a = [0u8; 8];
    a.copy_from_slice(b);
    Some(u64::from_be_bytes(a))
}
