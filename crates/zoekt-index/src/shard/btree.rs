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

//! B+-tree over the sorted ngram table.
//!
//! Ngrams arrive sorted, so a leaf never stores its keys: it only counts
//! them and remembers the key that becomes the separator when it splits.
//! After the last insert `freeze` assigns each leaf its bucket number and the
//! index of its first ngram in the ngram/postings tables. A lookup then needs
//! one read for the bucket and one for the posting offsets.

use std::fmt;

use super::file::IndexFile;
use super::section::{CompoundSection, SimpleSection};
use super::utils::read_u32_be;
use crate::error::{Result, ZoektError};
use crate::trigram::Ngram;

pub const NGRAM_ENCODING: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BtreeOpts {
    /// Max ngrams per leaf bucket.
    pub bucket_size: usize,
    /// Inner nodes hold between `v` and `2v` children.
    pub v: usize,
}

impl Default for BtreeOpts {
    fn default() -> Self {
        BtreeOpts {
            bucket_size: 4096 / NGRAM_ENCODING,
            v: 100,
        }
    }
}

/// Where `find` landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BucketRef {
    pub bucket_index: usize,
    /// Index of the bucket's first ngram in the ngram and postings tables.
    pub posting_index_offset: usize,
    pub bucket_size: usize,
}

#[derive(Debug)]
struct Leaf {
    bucket_index: usize,
    posting_index_offset: usize,
    bucket_size: usize,
    split_key: Ngram,
}

#[derive(Debug)]
struct InnerNode {
    keys: Vec<Ngram>,
    children: Vec<Node>,
}

#[derive(Debug)]
enum Node {
    Inner(InnerNode),
    Leaf(Leaf),
}

impl Node {
    fn empty_leaf(bucket_size: usize) -> Node {
        Node::Leaf(Leaf {
            bucket_index: 0,
            posting_index_offset: 0,
            bucket_size,
            split_key: Ngram::default(),
        })
    }

    fn insert(&mut self, ng: Ngram, opts: &BtreeOpts) {
        match self {
            Node::Leaf(l) => {
                l.bucket_size += 1;
                if l.bucket_size == opts.bucket_size / 2 + 1 {
                    l.split_key = ng;
                }
            }
            Node::Inner(n) => {
                let mut i = n.keys.partition_point(|k| *k <= ng);
                if let Some((left, right, key)) = n.children[i].maybe_split(opts) {
                    n.children[i] = left;
                    n.children.insert(i + 1, right);
                    n.keys.insert(i, key);
                    if ng >= key {
                        i += 1;
                    }
                }
                n.children[i].insert(ng, opts);
            }
        }
    }

    fn maybe_split(&mut self, opts: &BtreeOpts) -> Option<(Node, Node, Ngram)> {
        match self {
            Node::Leaf(l) => {
                if l.bucket_size < opts.bucket_size {
                    return None;
                }
                let half = opts.bucket_size / 2;
                Some((
                    Node::empty_leaf(half),
                    Node::empty_leaf(l.bucket_size - half),
                    l.split_key,
                ))
            }
            Node::Inner(n) => {
                if n.children.len() < 2 * opts.v {
                    return None;
                }
                let v = opts.v;
                let right_children = n.children.split_off(v);
                let right_keys = n.keys.split_off(v);
                let promoted = n.keys[v - 1];
                n.keys.truncate(v - 1);
                let left_children = std::mem::take(&mut n.children);
                let left_keys = std::mem::take(&mut n.keys);
                Some((
                    Node::Inner(InnerNode {
                        keys: left_keys,
                        children: left_children,
                    }),
                    Node::Inner(InnerNode {
                        keys: right_keys,
                        children: right_children,
                    }),
                    promoted,
                ))
            }
        }
    }

    fn freeze(&mut self, offset: &mut usize, bucket_index: &mut usize) {
        match self {
            Node::Leaf(l) => {
                l.bucket_index = *bucket_index;
                *bucket_index += 1;
                l.posting_index_offset = *offset;
                *offset += l.bucket_size;
            }
            Node::Inner(n) => {
                for c in &mut n.children {
                    c.freeze(offset, bucket_index);
                }
            }
        }
    }

    fn find(&self, ng: Ngram) -> BucketRef {
        match self {
            Node::Leaf(l) => BucketRef {
                bucket_index: l.bucket_index,
                posting_index_offset: l.posting_index_offset,
                bucket_size: l.bucket_size,
            },
            Node::Inner(n) => {
                let i = n.keys.partition_point(|k| *k <= ng);
                n.children[i].find(ng)
            }
        }
    }

    fn visit(&self, depth: usize, f: &mut dyn FnMut(&Node, usize)) {
        f(self, depth);
        if let Node::Inner(n) = self {
            for c in &n.children {
                c.visit(depth + 1, f);
            }
        }
    }
}

/// In-memory B+-tree skeleton. Separator key `k_i` satisfies
/// `keys(child_i) < k_i <= keys(child_{i+1})`.
pub struct Btree {
    root: Node,
    opts: BtreeOpts,
    last: Option<Ngram>,
    frozen: bool,
}

impl Btree {
    pub fn new(opts: BtreeOpts) -> Self {
        assert!(
            opts.bucket_size >= 2 && opts.bucket_size % 2 == 0 && opts.v >= 2,
            "bucket size must be even and >= 2, v >= 2: {opts:?}"
        );
        Btree {
            root: Node::empty_leaf(0),
            opts,
            last: None,
            frozen: false,
        }
    }

    /// Insert the next ngram. Keys must arrive strictly increasing and
    /// before `freeze`.
    pub fn insert(&mut self, ng: Ngram) -> Result<()> {
        if self.frozen {
            return Err(ZoektError::build("btree insert after freeze"));
        }
        if self.last.is_some_and(|l| l >= ng) {
            return Err(ZoektError::build(format!(
                "btree insert out of order: {ng:?} after {:?}",
                self.last
            )));
        }
        self.last = Some(ng);
        if let Some((left, right, key)) = self.root.maybe_split(&self.opts) {
            self.root = Node::Inner(InnerNode {
                keys: vec![key],
                children: vec![left, right],
            });
        }
        self.root.insert(ng, &self.opts);
        Ok(())
    }

    pub fn freeze(&mut self) {
        assert!(!self.frozen, "btree frozen twice");
        let (mut offset, mut bucket_index) = (0, 0);
        self.root.freeze(&mut offset, &mut bucket_index);
        self.frozen = true;
    }

    pub fn find(&self, ng: Ngram) -> BucketRef {
        debug_assert!(self.frozen, "btree find before freeze");
        self.root.find(ng)
    }

    pub fn opts(&self) -> BtreeOpts {
        self.opts
    }

    /// (inner nodes, leaves, depth)
    pub fn shape(&self) -> (usize, usize, usize) {
        let (mut inner, mut leaves, mut depth) = (0, 0, 0);
        self.root.visit(1, &mut |n, d| {
            depth = depth.max(d);
            match n {
                Node::Inner(_) => inner += 1,
                Node::Leaf(_) => leaves += 1,
            }
        });
        (inner, leaves, depth)
    }

    pub fn size_bytes(&self) -> usize {
        let mut sz = 0;
        self.root.visit(1, &mut |n, _| {
            sz += match n {
                Node::Inner(i) => {
                    std::mem::size_of::<InnerNode>()
                        + i.keys.capacity() * std::mem::size_of::<Ngram>()
                        + i.children.capacity() * std::mem::size_of::<Node>()
                }
                Node::Leaf(_) => std::mem::size_of::<Leaf>(),
            }
        });
        sz
    }
}

impl fmt::Display for Btree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (inner, leaves, depth) = self.shape();
        write!(
            f,
            "{{bucketSize: {}, v: {}, inner: {inner}, leaves: {leaves}, depth: {depth}}}",
            self.opts.bucket_size, self.opts.v
        )
    }
}

/// Byte range of one posting list inside the postings section.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PostingRange {
    pub off: u32,
    pub sz: u32,
}

/// B+-tree over an on-disk ngram table plus its postings.
pub struct BtreeIndex {
    bt: Btree,
    ngram_sec: SimpleSection,
    postings: CompoundSection,
    num_ngrams: usize,
}

impl BtreeIndex {
    pub fn load(
        file: &IndexFile,
        ngram_sec: SimpleSection,
        postings: CompoundSection,
        opts: BtreeOpts,
    ) -> Result<Self> {
        let raw = file.section(ngram_sec)?;
        if raw.len() % NGRAM_ENCODING != 0 {
            return Err(ZoektError::format(file.name(), "ngram table not a multiple of 8 bytes"));
        }
        let num_ngrams = raw.len() / NGRAM_ENCODING;
        if num_ngrams != postings.item_count() {
            return Err(ZoektError::format(
                file.name(),
                format!(
                    "ngram table has {num_ngrams} entries but postings index has {}",
                    postings.item_count()
                ),
            ));
        }
        let mut bt = Btree::new(opts);
        for chunk in raw.chunks_exact(NGRAM_ENCODING) {
            let mut b = [0u8; 8];
            b.copy_from_slice(chunk);
            bt.insert(Ngram::from_be_bytes(b))
                .map_err(|e| ZoektError::format(file.name(), e.to_string()))?;
        }
        bt.freeze();
        tracing::trace!(file = file.name(), ngrams = num_ngrams, tree = %bt, "loaded ngram btree");
        Ok(BtreeIndex {
            bt,
            ngram_sec,
            postings,
            num_ngrams,
        })
    }

    pub fn len(&self) -> usize {
        self.num_ngrams
    }

    pub fn is_empty(&self) -> bool {
        self.num_ngrams == 0
    }

    /// Posting list location of `ng`, or `None` when the ngram does not
    /// occur.
    pub fn get(&self, file: &IndexFile, ng: Ngram) -> Result<Option<PostingRange>> {
        let b = self.bt.find(ng);
        if b.bucket_size == 0 {
            return Ok(None);
        }
        let bucket = file.read(
            self.ngram_sec.off + (b.posting_index_offset * NGRAM_ENCODING) as u32,
            (b.bucket_size * NGRAM_ENCODING) as u32,
        )?;
        let want = ng.to_be_bytes();
        let n = b.bucket_size;
        let j = {
            let (mut lo, mut hi) = (0usize, n);
            while lo < hi {
                let mid = (lo + hi) / 2;
                if bucket[mid * NGRAM_ENCODING..(mid + 1) * NGRAM_ENCODING] < want[..] {
                    lo = mid + 1;
                } else {
                    hi = mid;
                }
            }
            lo
        };
        if j >= n || bucket[j * NGRAM_ENCODING..(j + 1) * NGRAM_ENCODING] != want[..] {
            return Ok(None);
        }
        let idx = (b.posting_index_offset + j) as u32;
        let offs = file.read(self.postings.index.off + idx * 4, 8)?;
        let (start, end) = match (read_u32_be(offs, 0), read_u32_be(offs, 4)) {
            (Some(s), Some(e)) if s <= e => (s, e),
            _ => return Err(ZoektError::format(file.name(), "corrupt postings index")),
        };
        Ok(Some(PostingRange {
            off: start,
            sz: end - start,
        }))
    }

    pub fn postings<'a>(&self, file: &'a IndexFile, r: PostingRange) -> Result<&'a [u8]> {
        file.read(r.off, r.sz)
    }

    pub fn size_bytes(&self) -> usize {
        self.bt.size_bytes()
    }

    pub fn btree(&self) -> &Btree {
        &self.bt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ng(i: u64) -> Ngram {
        Ngram(i)
    }

    fn build(keys: &[u64], opts: BtreeOpts) -> Btree {
        let mut bt = Btree::new(opts);
        for k in keys {
            bt.insert(ng(*k)).unwrap();
        }
        bt.freeze();
        bt
    }

    #[test]
    fn leaf_split_uses_middle_key() {
        let opts = BtreeOpts { bucket_size: 4, v: 2 };
        let bt = build(&[10, 20, 30, 40, 50], opts);
        // first leaf holds 10,20; second 30,40,50
        assert_eq!(bt.find(ng(10)).posting_index_offset, 0);
        assert_eq!(bt.find(ng(20)).bucket_size, 2);
        let b = bt.find(ng(30));
        assert_eq!((b.bucket_index, b.posting_index_offset, b.bucket_size), (1, 2, 3));
        assert_eq!(bt.find(ng(45)), bt.find(ng(50)));
    }

    #[test]
    fn inner_nodes_split() {
        let opts = BtreeOpts { bucket_size: 2, v: 2 };
        let keys: Vec<u64> = (0..64).collect();
        let bt = build(&keys, opts);
        let (inner, leaves, depth) = bt.shape();
        assert!(inner > 1);
        assert!(depth > 2);
        // sorted inserts leave every split-off left leaf half full
        assert_eq!(leaves, 63);
    }

    #[test]
    fn rejects_unsorted_insert() {
        let mut bt = Btree::new(BtreeOpts::default());
        bt.insert(ng(5)).unwrap();
        assert!(bt.insert(ng(5)).is_err());
        assert!(bt.insert(ng(1)).is_err());
    }

    #[test]
    fn empty_tree_finds_empty_bucket() {
        let bt = build(&[], BtreeOpts::default());
        assert_eq!(bt.find(ng(7)).bucket_size, 0);
    }

    proptest! {
        #[test]
        fn find_lands_in_bucket_containing_key(
            mut keys in proptest::collection::vec(0u64..1_000_000, 1..600),
            bucket_size in (1usize..8).prop_map(|h| h * 2),
            v in 2usize..5,
        ) {
            keys.sort();
            keys.dedup();
            let bt = build(&keys, BtreeOpts { bucket_size, v });
            for (pos, k) in keys.iter().enumerate() {
                let b = bt.find(ng(*k));
                let bucket = &keys[b.posting_index_offset..b.posting_index_offset + b.bucket_size];
                prop_assert_eq!(bucket.iter().filter(|x| *x == k).count(), 1);
                prop_assert!(pos >= b.posting_index_offset);
            }
        }
    }
}
