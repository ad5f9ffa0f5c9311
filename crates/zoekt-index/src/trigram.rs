//! Trigram (ngram) packing and rune helpers.
//! An ngram is three Unicode code points packed into a u64, 21 bits each, so
//! integer order is the order the B+-tree and the sorted ngram tables rely on.

use std::fmt;

pub const NGRAM_SIZE: usize = 3;
const RUNE_BITS: u32 = 21;
const RUNE_MASK: u64 = (1 << RUNE_BITS) - 1;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ngram(pub u64);

impl Ngram {
    pub fn from_runes(r: [char; 3]) -> Self {
        Ngram((r[0] as u64) << (2 * RUNE_BITS) | (r[1] as u64) << RUNE_BITS | r[2] as u64)
    }

    pub fn runes(self) -> [char; 3] {
        let unpack = |v: u64| char::from_u32((v & RUNE_MASK) as u32).unwrap_or('\u{FFFD}');
        [
            unpack(self.0 >> (2 * RUNE_BITS)),
            unpack(self.0 >> RUNE_BITS),
            unpack(self.0),
        ]
    }

    pub fn from_str_prefix(s: &str) -> Option<Self> {
        let mut it = s.chars();
        Some(Ngram::from_runes([it.next()?, it.next()?, it.next()?]))
    }

    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(b: [u8; 8]) -> Self {
        Ngram(u64::from_be_bytes(b))
    }
}

impl fmt::Display for Ngram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.runes();
        write!(f, "{}{}{}", r[0], r[1], r[2])
    }
}

impl fmt::Debug for Ngram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ngram({:?})", self.to_string())
    }
}

/// Decode one rune from the front of `b`. Invalid UTF-8 decodes as U+FFFD of
/// width 1; empty input returns width 0.
pub fn decode_rune(b: &[u8]) -> (char, usize) {
    let Some(&first) = b.first() else {
        return ('\u{FFFD}', 0);
    };
    if first < 0x80 {
        return (first as char, 1);
    }
    let width = match first {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return ('\u{FFFD}', 1),
    };
    if b.len() < width {
        return ('\u{FFFD}', 1);
    }
    match std::str::from_utf8(&b[..width]) {
        Ok(s) => match s.chars().next() {
            Some(c) => (c, width),
            None => ('\u{FFFD}', 1),
        },
        Err(_) => ('\u{FFFD}', 1),
    }
}

/// Number of runes in `b` under `decode_rune` semantics.
pub fn rune_count(mut b: &[u8]) -> usize {
    let mut n = 0;
    while !b.is_empty() {
        let (_, sz) = decode_rune(b);
        b = &b[sz..];
        n += 1;
    }
    n
}

/// Iterate the ngrams of `data` together with the rune index of each ngram's
/// first rune.
pub fn trigrams(data: &[u8]) -> impl Iterator<Item = (Ngram, u32)> + '_ {
    RuneTrigrams {
        data,
        window: ['\0'; 3],
        seen: 0,
    }
}

struct RuneTrigrams<'a> {
    data: &'a [u8],
    window: [char; 3],
    seen: u32,
}

impl Iterator for RuneTrigrams<'_> {
    type Item = (Ngram, u32);

    fn next(&mut self) -> Option<Self::Item> {
        while !self.data.is_empty() {
            let (c, sz) = decode_rune(self.data);
            self.data = &self.data[sz..];
            self.window = [self.window[1], self.window[2], c];
            self.seen += 1;
            if self.seen as usize >= NGRAM_SIZE {
                return Some((Ngram::from_runes(self.window), self.seen - NGRAM_SIZE as u32));
            }
        }
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NgramOffset {
    pub ngram: Ngram,
    /// Rune index of the ngram within the pattern.
    pub index: u32,
}

/// Split a pattern into its ngrams, deduplicated and sorted by ngram value.
pub fn split_ngrams(pattern: &[u8]) -> Vec<NgramOffset> {
    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<NgramOffset> = trigrams(pattern)
        .filter(|(ng, _)| seen.insert(*ng))
        .map(|(ngram, index)| NgramOffset { ngram, index })
        .collect();
    out.sort_by_key(|o| o.ngram);
    out
}

fn simple_lower(c: char) -> char {
    let mut it = c.to_lowercase();
    match (it.next(), it.next()) {
        (Some(l), None) => l,
        _ => c,
    }
}

fn simple_upper(c: char) -> char {
    let mut it = c.to_uppercase();
    match (it.next(), it.next()) {
        (Some(u), None) => u,
        _ => c,
    }
}

/// All upper/lower case spellings of an ngram, original included.
pub fn case_variants(ng: Ngram) -> Vec<Ngram> {
    let runes = ng.runes();
    let mut variants: Vec<[char; 3]> = vec![runes];
    for i in 0..3 {
        let alts = [simple_lower(runes[i]), simple_upper(runes[i])];
        let mut extra = Vec::new();
        for v in &variants {
            for a in alts {
                if a != v[i] {
                    let mut nv = *v;
                    nv[i] = a;
                    extra.push(nv);
                }
            }
        }
        variants.extend(extra);
    }
    let mut out: Vec<Ngram> = variants.into_iter().map(Ngram::from_runes).collect();
    out.sort();
    out.dedup();
    out
}

/// Lowercase every rune of `b` (single-rune mappings only, so rune counts
/// are preserved).
pub fn to_lower(b: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(b.len());
    let mut rest = b;
    while !rest.is_empty() {
        let (c, sz) = decode_rune(rest);
        if c == '\u{FFFD}' && sz == 1 {
            out.push(rest[0]);
        } else {
            let l = simple_lower(c);
            let mut buf = [0u8; 4];
            out.extend_from_slice(l.encode_utf8(&mut buf).as_bytes());
        }
        rest = &rest[sz..];
    }
    out
}

/// Compare the lowercased pattern `lower` against the front of `mixed`,
/// folding case rune by rune. Returns the byte length consumed in `mixed`.
pub fn case_folding_equals(lower: &[u8], mixed: &[u8]) -> Option<usize> {
    let mut l = lower;
    let mut m = mixed;
    let mut consumed = 0;
    while !l.is_empty() {
        if m.is_empty() {
            return None;
        }
        let (lc, lsz) = decode_rune(l);
        let (mc, msz) = decode_rune(m);
        if lc != simple_lower(mc) {
            return None;
        }
        l = &l[lsz..];
        m = &m[msz..];
        consumed += msz;
    }
    Some(consumed)
}
