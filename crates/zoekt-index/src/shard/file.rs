use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

use super::section::SimpleSection;
use crate::error::{Result, ZoektError};

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

/// The single owned byte arena of an open shard. Every read goes through a
/// bounds check against the arena length; sections never hand out raw
/// pointers.
pub struct IndexFile {
    name: String,
    data: Backing,
}

impl IndexFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let name = path.display().to_string();
        if len == 0 {
            return Ok(IndexFile {
                name,
                data: Backing::Owned(Vec::new()),
            });
        }
        // SAFETY: shards are replaced by rename, never rewritten in place.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(IndexFile {
            name,
            data: Backing::Mapped(mmap),
        })
    }

    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        IndexFile {
            name: name.into(),
            data: Backing::Owned(bytes),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn bytes(&self) -> &[u8] {
        match &self.data {
            Backing::Mapped(m) => m,
            Backing::Owned(v) => v,
        }
    }

    pub fn len(&self) -> u64 {
        self.bytes().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read(&self, off: u32, sz: u32) -> Result<&[u8]> {
        let b = self.bytes();
        let end = off as u64 + sz as u64;
        if end > b.len() as u64 {
            return Err(ZoektError::OutOfBounds {
                file: self.name.clone(),
                off: off as u64,
                sz: sz as u64,
                len: b.len() as u64,
            });
        }
        Ok(&b[off as usize..end as usize])
    }

    pub fn section(&self, s: SimpleSection) -> Result<&[u8]> {
        self.read(s.off, s.sz)
    }

    pub fn check(&self, s: SimpleSection) -> Result<()> {
        self.section(s).map(|_| ())
    }
}

impl std::fmt::Debug for IndexFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexFile")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}
