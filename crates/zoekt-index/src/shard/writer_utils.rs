use std::io::{self, Write};

// Varint helpers: unsigned LEB128, the same layout the readers in `utils`
// decode. Posting lists, TOC entries and offset tables all go through these.
pub(crate) fn put_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8 & 0x7F) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

pub(crate) fn write_var_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    let mut buf = Vec::with_capacity(5);
    put_uvarint(&mut buf, v as u64);
    w.write_all(&buf)
}

/// Encode a non-decreasing list as `uvarint(len)` followed by the deltas
/// between consecutive values (the first delta is taken against zero).
pub(crate) fn to_sized_deltas(values: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() + 5);
    put_uvarint(&mut out, values.len() as u64);
    let mut last = 0u32;
    for &v in values {
        put_uvarint(&mut out, v.wrapping_sub(last) as u64);
        last = v;
    }
    out
}

/// Byte offsets of every `\n` in `data`.
pub(crate) fn newline_indices(data: &[u8]) -> Vec<u32> {
    data.iter()
        .enumerate()
        .filter(|(_, b)| **b == b'\n')
        .map(|(i, _)| i as u32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::utils::{from_sized_deltas, read_uvarint};

    #[test]
    fn test_write_var_u32_roundtrip() {
        let mut buf = vec![];
        write_var_u32(&mut buf, 0).unwrap();
        write_var_u32(&mut buf, 1).unwrap();
        write_var_u32(&mut buf, 300).unwrap();
        write_var_u32(&mut buf, u32::MAX).unwrap();
        let mut off = 0;
        assert_eq!(read_uvarint(&buf, &mut off), Some(0));
        assert_eq!(read_uvarint(&buf, &mut off), Some(1));
        assert_eq!(read_uvarint(&buf, &mut off), Some(300));
        assert_eq!(read_uvarint(&buf, &mut off), Some(u32::MAX as u64));
        assert_eq!(off, buf.len());
    }

    #[test]
    fn sized_deltas_keep_values() {
        let v = vec![0, 3, 3, 100, 70_000];
        assert_eq!(from_sized_deltas(&to_sized_deltas(&v)), Some(v));
        assert_eq!(from_sized_deltas(&to_sized_deltas(&[])), Some(vec![]));
    }

    #[test]
    fn newlines() {
        assert_eq!(newline_indices(b"a\nbc\n\n"), vec![1, 4, 5]);
    }
}
