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

//! Table of contents.
//!
//! Layout: `u32 0` (tagged marker), then per section
//! `uvarint(len(tag)) tag uvarint(kind) descriptor`. The file ends with an
//! 8-byte simple section descriptor pointing at the TOC body.

use std::collections::HashMap;
use std::io::Write;

use super::file::IndexFile;
use super::section::{CompoundSection, SectionWriter, SimpleSection};
use super::utils::{read_u32_be, read_uvarint};
use super::writer_utils::put_uvarint;
use crate::error::{Result, ZoektError};

pub const TAG_META_DATA: &str = "metaData";
pub const TAG_REPO_META_DATA: &str = "repoMetaData";
pub const TAG_FILE_CONTENTS: &str = "fileContents";
pub const TAG_FILE_NAMES: &str = "fileNames";
pub const TAG_FILE_SECTIONS: &str = "fileSections";
pub const TAG_NEWLINES: &str = "newlines";
pub const TAG_NGRAM_TEXT: &str = "ngramText";
pub const TAG_POSTINGS: &str = "postings";
pub const TAG_RUNE_OFFSETS: &str = "runeOffsets";
pub const TAG_FILE_END_RUNES: &str = "fileEndRunes";
pub const TAG_NAME_NGRAM_TEXT: &str = "nameNgramText";
pub const TAG_NAME_POSTINGS: &str = "namePostings";
pub const TAG_NAME_RUNE_OFFSETS: &str = "nameRuneOffsets";
pub const TAG_NAME_END_RUNES: &str = "nameEndRunes";
pub const TAG_BRANCH_MASKS: &str = "branchMasks";
pub const TAG_SUB_REPOS: &str = "subRepos";
pub const TAG_CONTENT_CHECKSUMS: &str = "contentChecksums";
pub const TAG_LANGUAGES: &str = "languages";
pub const TAG_REPOS: &str = "repos";
pub const TAG_RUNE_DOC_SECTIONS: &str = "runeDocSections";
pub const TAG_FILE_END_SYMBOL: &str = "fileEndSymbol";
pub const TAG_SYMBOL_MAP: &str = "symbolMap";
pub const TAG_SYMBOL_META_DATA: &str = "symbolMetaData";
pub const TAG_RANKS: &str = "ranks";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionKind {
    Simple = 0,
    Compound = 1,
    LazyCompound = 2,
}

impl SectionKind {
    fn from_u64(v: u64) -> Option<Self> {
        match v {
            0 => Some(SectionKind::Simple),
            1 => Some(SectionKind::Compound),
            2 => Some(SectionKind::LazyCompound),
            _ => None,
        }
    }
}

const KNOWN_SECTIONS: &[(&str, SectionKind)] = &[
    (TAG_META_DATA, SectionKind::Simple),
    (TAG_REPO_META_DATA, SectionKind::Simple),
    (TAG_FILE_CONTENTS, SectionKind::Compound),
    (TAG_FILE_NAMES, SectionKind::Compound),
    (TAG_FILE_SECTIONS, SectionKind::Compound),
    (TAG_NEWLINES, SectionKind::Compound),
    (TAG_NGRAM_TEXT, SectionKind::Simple),
    (TAG_POSTINGS, SectionKind::Compound),
    (TAG_RUNE_OFFSETS, SectionKind::Simple),
    (TAG_FILE_END_RUNES, SectionKind::Simple),
    (TAG_NAME_NGRAM_TEXT, SectionKind::Simple),
    (TAG_NAME_POSTINGS, SectionKind::Compound),
    (TAG_NAME_RUNE_OFFSETS, SectionKind::Simple),
    (TAG_NAME_END_RUNES, SectionKind::Simple),
    (TAG_BRANCH_MASKS, SectionKind::Simple),
    (TAG_SUB_REPOS, SectionKind::Simple),
    (TAG_CONTENT_CHECKSUMS, SectionKind::Simple),
    (TAG_LANGUAGES, SectionKind::Simple),
    (TAG_REPOS, SectionKind::Simple),
    (TAG_RUNE_DOC_SECTIONS, SectionKind::Simple),
    (TAG_FILE_END_SYMBOL, SectionKind::Simple),
    (TAG_SYMBOL_MAP, SectionKind::LazyCompound),
    (TAG_SYMBOL_META_DATA, SectionKind::Simple),
    (TAG_RANKS, SectionKind::Simple),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TocSection {
    Simple(SimpleSection),
    Compound(CompoundSection),
    LazyCompound(CompoundSection),
}

impl TocSection {
    pub fn kind(&self) -> SectionKind {
        match self {
            TocSection::Simple(_) => SectionKind::Simple,
            TocSection::Compound(_) => SectionKind::Compound,
            TocSection::LazyCompound(_) => SectionKind::LazyCompound,
        }
    }

    fn ranges(&self) -> Vec<SimpleSection> {
        match self {
            TocSection::Simple(s) => vec![*s],
            TocSection::Compound(c) | TocSection::LazyCompound(c) => vec![c.data, c.index],
        }
    }
}

/// Ordered list of tagged sections, as written.
#[derive(Default)]
pub(crate) struct TocWriter {
    entries: Vec<(String, TocSection)>,
}

impl TocWriter {
    pub fn add(&mut self, tag: &str, sec: TocSection) {
        self.entries.push((tag.to_string(), sec));
    }

    /// Write the TOC body followed by the trailing pointer section.
    pub fn write<W: Write>(&self, w: &mut SectionWriter<W>) -> std::io::Result<()> {
        let start = SimpleSection::start(w);
        w.u32(0)?;
        for (tag, sec) in &self.entries {
            let mut head = Vec::with_capacity(tag.len() + 4);
            put_uvarint(&mut head, tag.len() as u64);
            head.extend_from_slice(tag.as_bytes());
            put_uvarint(&mut head, sec.kind() as u64);
            w.write(&head)?;
            match sec {
                TocSection::Simple(s) => s.write_descriptor(w)?,
                TocSection::Compound(c) | TocSection::LazyCompound(c) => c.write_descriptor(w)?,
            }
        }
        let body = start.finish(w);
        body.write_descriptor(w)
    }
}

/// Offset of the trailing TOC pointer. Section offsets are `u32`, so larger files are unreadable.
fn tail_offset(file_name: &str, len: u64) -> Result<u32> {
    if len < 8 {
        return Err(ZoektError::format(file_name, "file too small for TOC"));
    }
    u32::try_from(len - 8).map_err(|_| ZoektError::format(file_name, format!("file of {len} bytes exceeds 4 GiB")))
}

/// Parsed TOC restricted to the sections this reader understands.
#[derive(Debug, Default)]
pub struct Toc {
    sections: HashMap<&'static str, TocSection>,
}

impl Toc {
    pub fn read(file: &IndexFile) -> Result<Self> {
        let tail_off = tail_offset(file.name(), file.len())?;
        let tail = file.read(tail_off, 8)?;
        let mut at = 0;
        let body = SimpleSection::read_descriptor(tail, &mut at)
            .ok_or_else(|| ZoektError::format(file.name(), "unreadable TOC pointer"))?;
        if body.end() > tail_off as u64 {
            return Err(ZoektError::format(file.name(), "TOC pointer past end of file"));
        }
        let buf = file.section(body)?;
        let toc = Self::parse(file.name(), buf)?;
        for sec in toc.sections.values() {
            for r in sec.ranges() {
                file.check(r)?;
            }
        }
        Ok(toc)
    }

    pub(crate) fn parse(file_name: &str, buf: &[u8]) -> Result<Self> {
        let bad = |msg: &str| ZoektError::format(file_name, format!("malformed TOC: {msg}"));
        let marker = read_u32_be(buf, 0).ok_or_else(|| bad("missing marker"))?;
        if marker != 0 {
            return Err(bad("untagged TOC layouts are not supported"));
        }
        let mut at = 4;
        let mut sections = HashMap::new();
        while at < buf.len() {
            let tag_len = read_uvarint(buf, &mut at).ok_or_else(|| bad("tag length"))? as usize;
            let end = at.checked_add(tag_len).ok_or_else(|| bad("tag"))?;
            let tag_bytes = buf.get(at..end).ok_or_else(|| bad("tag"))?;
            at = end;
            let tag = String::from_utf8_lossy(tag_bytes).into_owned();
            let kind_raw = read_uvarint(buf, &mut at).ok_or_else(|| bad("kind"))?;
            let kind = SectionKind::from_u64(kind_raw)
                .ok_or_else(|| bad(&format!("unknown section kind {kind_raw} for {tag}")))?;
            let sec = match kind {
                SectionKind::Simple => {
                    TocSection::Simple(SimpleSection::read_descriptor(buf, &mut at).ok_or_else(|| bad(&tag))?)
                }
                SectionKind::Compound => {
                    TocSection::Compound(CompoundSection::read_descriptor(buf, &mut at).ok_or_else(|| bad(&tag))?)
                }
                SectionKind::LazyCompound => TocSection::LazyCompound(
                    CompoundSection::read_descriptor(buf, &mut at).ok_or_else(|| bad(&tag))?,
                ),
            };
            match KNOWN_SECTIONS.iter().find(|(t, _)| *t == tag) {
                Some((known, want)) => {
                    if *want != kind {
                        return Err(ZoektError::format(
                            file_name,
                            format!("section {tag}: kind {kind:?} does not match expected {want:?}"),
                        ));
                    }
                    sections.insert(*known, sec);
                }
                None => {
                    tracing::warn!(file = file_name, tag = %tag, "skipping unknown index section");
                }
            }
        }
        Ok(Toc { sections })
    }

    pub fn simple(&self, tag: &str) -> SimpleSection {
        match self.sections.get(tag) {
            Some(TocSection::Simple(s)) => *s,
            _ => SimpleSection::default(),
        }
    }

    pub fn compound(&self, tag: &str) -> CompoundSection {
        match self.sections.get(tag) {
            Some(TocSection::Compound(c)) | Some(TocSection::LazyCompound(c)) => *c,
            _ => CompoundSection::default(),
        }
    }

    pub fn has(&self, tag: &str) -> bool {
        self.sections.contains_key(tag)
    }
}
