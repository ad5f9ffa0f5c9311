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

//! Sections: named byte ranges of a shard file.
//!
//! Writing is two-phase: a `CompoundSectionBuilder` accumulates items and only
//! emits its offset index in `finish`, producing the immutable
//! `CompoundSection` descriptor the TOC records. Readers turn descriptors into
//! `CompoundIndex` (eager) or `LazyCompound` (index decoded on first use).

use once_cell::sync::OnceCell;
use std::io::{self, Write};

use super::file::IndexFile;
use super::utils::read_u32_be;
use crate::error::{Result, ZoektError};

/// Counting writer. Every section offset is taken from `off`.
pub(crate) struct SectionWriter<W: Write> {
    w: W,
    off: u32,
}

impl<W: Write> SectionWriter<W> {
    pub fn new(w: W) -> Self {
        SectionWriter { w, off: 0 }
    }

    pub fn off(&self) -> u32 {
        self.off
    }

    pub fn write(&mut self, b: &[u8]) -> io::Result<()> {
        let n = u32::try_from(b.len())
            .ok()
            .and_then(|n| self.off.checked_add(n))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "shard exceeds 4GiB"))?;
        self.w.write_all(b)?;
        self.off = n;
        Ok(())
    }

    pub fn u32(&mut self, v: u32) -> io::Result<()> {
        self.write(&v.to_be_bytes())
    }

    pub fn u64(&mut self, v: u64) -> io::Result<()> {
        self.write(&v.to_be_bytes())
    }

    pub fn into_inner(self) -> W {
        self.w
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.w.flush()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimpleSection {
    pub off: u32,
    pub sz: u32,
}

impl SimpleSection {
    pub(crate) fn start<W: Write>(w: &SectionWriter<W>) -> SimpleSectionBuilder {
        SimpleSectionBuilder { off: w.off() }
    }

    pub(crate) fn write_descriptor<W: Write>(&self, w: &mut SectionWriter<W>) -> io::Result<()> {
        w.u32(self.off)?;
        w.u32(self.sz)
    }

    pub(crate) fn read_descriptor(buf: &[u8], at: &mut usize) -> Option<Self> {
        let off = read_u32_be(buf, *at)?;
        let sz = read_u32_be(buf, *at + 4)?;
        *at += 8;
        Some(SimpleSection { off, sz })
    }

    pub fn end(&self) -> u64 {
        self.off as u64 + self.sz as u64
    }
}

pub(crate) struct SimpleSectionBuilder {
    off: u32,
}

impl SimpleSectionBuilder {
    pub fn finish<W: Write>(self, w: &SectionWriter<W>) -> SimpleSection {
        SimpleSection {
            off: self.off,
            sz: w.off() - self.off,
        }
    }
}

/// Descriptor for a blob of variable sized items plus an index of `n + 1`
/// big-endian u32 absolute offsets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompoundSection {
    pub data: SimpleSection,
    pub index: SimpleSection,
}

impl CompoundSection {
    pub(crate) fn start<W: Write>(w: &SectionWriter<W>) -> CompoundSectionBuilder {
        CompoundSectionBuilder {
            data_off: w.off(),
            offsets: Vec::new(),
        }
    }

    pub(crate) fn write_descriptor<W: Write>(&self, w: &mut SectionWriter<W>) -> io::Result<()> {
        self.data.write_descriptor(w)?;
        self.index.write_descriptor(w)
    }

    pub(crate) fn read_descriptor(buf: &[u8], at: &mut usize) -> Option<Self> {
        let data = SimpleSection::read_descriptor(buf, at)?;
        let index = SimpleSection::read_descriptor(buf, at)?;
        Some(CompoundSection { data, index })
    }

    pub fn item_count(&self) -> usize {
        (self.index.sz as usize / 4).saturating_sub(1)
    }
}

pub(crate) struct CompoundSectionBuilder {
    data_off: u32,
    offsets: Vec<u32>,
}

impl CompoundSectionBuilder {
    pub fn add_item<W: Write>(&mut self, w: &mut SectionWriter<W>, item: &[u8]) -> io::Result<()> {
        self.offsets.push(w.off());
        w.write(item)
    }

    pub fn finish<W: Write>(mut self, w: &mut SectionWriter<W>) -> io::Result<CompoundSection> {
        let data = SimpleSection {
            off: self.data_off,
            sz: w.off() - self.data_off,
        };
        self.offsets.push(w.off());
        let index_start = SimpleSection::start(w);
        for o in &self.offsets {
            w.u32(*o)?;
        }
        let index = index_start.finish(w);
        Ok(CompoundSection { data, index })
    }
}

/// Eagerly decoded compound section.
#[derive(Debug, Default)]
pub(crate) struct CompoundIndex {
    pub offsets: Vec<u32>,
}

impl CompoundIndex {
    pub fn load(file: &IndexFile, sec: &CompoundSection) -> Result<Self> {
        Ok(CompoundIndex {
            offsets: decode_offsets(file, sec)?,
        })
    }

    pub fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn range(&self, i: usize) -> Option<(u32, u32)> {
        let start = *self.offsets.get(i)?;
        let end = *self.offsets.get(i + 1)?;
        Some((start, end - start))
    }

    pub fn item<'a>(&self, file: &'a IndexFile, i: usize) -> Result<&'a [u8]> {
        let (off, sz) = self
            .range(i)
            .ok_or_else(|| ZoektError::format(file.name(), format!("compound item {i} out of range")))?;
        file.read(off, sz)
    }
}

/// Compound section whose index is only decoded on first dereference.
#[derive(Debug, Default)]
pub(crate) struct LazyCompound {
    sec: CompoundSection,
    offsets: OnceCell<Vec<u32>>,
}

impl LazyCompound {
    pub fn new(sec: CompoundSection) -> Self {
        LazyCompound {
            sec,
            offsets: OnceCell::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sec.item_count()
    }

    pub fn is_loaded(&self) -> bool {
        self.offsets.get().is_some()
    }

    pub fn item<'a>(&self, file: &'a IndexFile, i: usize) -> Result<&'a [u8]> {
        let offsets = self.offsets.get_or_try_init(|| decode_offsets(file, &self.sec))?;
        match (offsets.get(i), offsets.get(i + 1)) {
            (Some(&s), Some(&e)) => file.read(s, e - s),
            _ => Err(ZoektError::format(
                file.name(),
                format!("lazy compound item {i} out of range"),
            )),
        }
    }
}

fn decode_offsets(file: &IndexFile, sec: &CompoundSection) -> Result<Vec<u32>> {
    if sec.index.sz == 0 {
        return Ok(Vec::new());
    }
    let raw = file.section(sec.index)?;
    if raw.len() % 4 != 0 {
        return Err(ZoektError::format(file.name(), "compound index size not a multiple of 4"));
    }
    let offsets: Vec<u32> = raw
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let (lo, hi) = (sec.data.off, sec.data.off + sec.data.sz);
    let mut last = lo;
    for &o in &offsets {
        if o < last || o > hi {
            return Err(ZoektError::format(
                file.name(),
                format!("compound offset {o} outside [{lo}, {hi}] or not monotonic"),
            ));
        }
        last = o;
    }
    Ok(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build() -> (Vec<u8>, CompoundSection, SimpleSection) {
        let mut w = SectionWriter::new(Vec::new());
        let s = SimpleSection::start(&w);
        w.write(b"hello").unwrap();
        let simple = s.finish(&w);
        let mut c = CompoundSection::start(&w);
        for item in [&b"a"[..], b"", b"xyz"] {
            c.add_item(&mut w, item).unwrap();
        }
        let compound = c.finish(&mut w).unwrap();
        (w.into_inner(), compound, simple)
    }

    #[test]
    fn compound_items_are_addressable() {
        let (bytes, compound, simple) = build();
        let file = IndexFile::from_bytes("t", bytes);
        assert_eq!(file.section(simple).unwrap(), b"hello");
        let idx = CompoundIndex::load(&file, &compound).unwrap();
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.item(&file, 0).unwrap(), b"a");
        assert_eq!(idx.item(&file, 1).unwrap(), b"");
        assert_eq!(idx.item(&file, 2).unwrap(), b"xyz");
        assert!(idx.item(&file, 3).is_err());
    }

    #[test]
    fn lazy_compound_loads_on_first_item() {
        let (bytes, compound, _) = build();
        let file = IndexFile::from_bytes("t", bytes);
        let lazy = LazyCompound::new(compound);
        assert_eq!(lazy.len(), 3);
        assert!(!lazy.is_loaded());
        assert_eq!(lazy.item(&file, 2).unwrap(), b"xyz");
        assert!(lazy.is_loaded());
    }
}
