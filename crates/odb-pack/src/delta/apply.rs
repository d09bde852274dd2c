//! Apply a delta stream to a base, producing the target.

use crate::PackError;

use super::read_sizes;

/// Apply `delta` to `base`, returning the reconstructed target.
///
/// Validates the full contract: the base size prefix must match the
/// actual base, every copy must stay within the base, and the opcodes
/// must produce exactly the declared target size.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, PackError> {
    let sizes = read_sizes(delta)?;
    if sizes.base != base.len() as u64 {
        return Err(PackError::InvalidDelta(format!(
            "base size mismatch: delta expects {}, base is {}",
            sizes.base,
            base.len()
        )));
    }

    let target_size = usize::try_from(sizes.target)
        .map_err(|_| PackError::InvalidDelta("target size exceeds address space".into()))?;
    let mut output = Vec::with_capacity(target_size);
    let mut pos = sizes.header_len;

    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;

        if cmd & 0x80 != 0 {
            let (offset, size) = read_copy_operands(delta, &mut pos, cmd)?;

            let end = offset
                .checked_add(size)
                .filter(|&e| e <= base.len())
                .ok_or_else(|| {
                    PackError::InvalidDelta(format!(
                        "copy out of bounds: offset={offset}, size={size}, base_len={}",
                        base.len()
                    ))
                })?;
            if output.len() + size > target_size {
                return Err(PackError::InvalidDelta(
                    "copy overruns declared target size".into(),
                ));
            }
            output.extend_from_slice(&base[offset..end]);
        } else if cmd != 0 {
            let n = cmd as usize;
            if pos + n > delta.len() {
                return Err(PackError::InvalidDelta("truncated insert data".into()));
            }
            if output.len() + n > target_size {
                return Err(PackError::InvalidDelta(
                    "insert overruns declared target size".into(),
                ));
            }
            output.extend_from_slice(&delta[pos..pos + n]);
            pos += n;
        } else {
            return Err(PackError::InvalidDelta("reserved opcode 0".into()));
        }
    }

    if output.len() != target_size {
        return Err(PackError::InvalidDelta(format!(
            "target size mismatch: declared {target_size}, produced {}",
            output.len()
        )));
    }
    Ok(output)
}

/// Decode a copy opcode's operands: bits 0–3 gate offset bytes 0–3,
/// bits 4–6 gate size bytes 0–2, an all-zero size field means 0x10000.
fn read_copy_operands(
    delta: &[u8],
    pos: &mut usize,
    cmd: u8,
) -> Result<(usize, usize), PackError> {
    let mut next = |what: &str| -> Result<usize, PackError> {
        let byte = *delta
            .get(*pos)
            .ok_or_else(|| PackError::InvalidDelta(format!("truncated copy {what}")))?;
        *pos += 1;
        Ok(byte as usize)
    };

    let mut offset = 0usize;
    for (i, bit) in [0x01u8, 0x02, 0x04, 0x08].iter().enumerate() {
        if cmd & bit != 0 {
            offset |= next("offset")? << (8 * i);
        }
    }

    let mut size = 0usize;
    for (i, bit) in [0x10u8, 0x20, 0x40].iter().enumerate() {
        if cmd & bit != 0 {
            size |= next("size")? << (8 * i);
        }
    }
    if size == 0 {
        size = 0x10000;
    }

    Ok((offset, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{encode_copy, encode_insert};
    use crate::varint::write_leb128;

    fn build_delta(base_size: usize, target_size: usize, ops: &[u8]) -> Vec<u8> {
        let mut delta = write_leb128(base_size as u64);
        delta.extend(write_leb128(target_size as u64));
        delta.extend_from_slice(ops);
        delta
    }

    #[test]
    fn copy_only() {
        let base = b"Hello, World!";
        let mut ops = Vec::new();
        encode_copy(&mut ops, 0, 5); // "Hello"
        encode_copy(&mut ops, 7, 5); // "World"

        let delta = build_delta(base.len(), 10, &ops);
        assert_eq!(apply_delta(base, &delta).unwrap(), b"HelloWorld");
    }

    #[test]
    fn insert_only() {
        let base = b"unused base";
        let mut ops = Vec::new();
        encode_insert(&mut ops, b"NEW");

        let delta = build_delta(base.len(), 3, &ops);
        assert_eq!(apply_delta(base, &delta).unwrap(), b"NEW");
    }

    #[test]
    fn mixed_copy_and_insert() {
        let base = b"ABCDEFGHIJ";
        let mut ops = Vec::new();
        encode_copy(&mut ops, 0, 3); // "ABC"
        encode_insert(&mut ops, b"xyz");
        encode_copy(&mut ops, 7, 3); // "HIJ"

        let delta = build_delta(base.len(), 9, &ops);
        assert_eq!(apply_delta(base, &delta).unwrap(), b"ABCxyzHIJ");
    }

    #[test]
    fn zero_size_field_copies_64k() {
        let base = vec![0xabu8; 0x20000];
        let mut ops = Vec::new();
        // Copy with no size bytes: 0x10000 from offset 0.
        ops.push(0x80);
        let delta = build_delta(base.len(), 0x10000, &ops);
        let out = apply_delta(&base, &delta).unwrap();
        assert_eq!(out.len(), 0x10000);
        assert!(out.iter().all(|&b| b == 0xab));
    }

    #[test]
    fn empty_delta_produces_empty_target() {
        let base = b"anything";
        let delta = build_delta(base.len(), 0, &[]);
        assert!(apply_delta(base, &delta).unwrap().is_empty());
    }

    #[test]
    fn reserved_opcode_rejected() {
        let base = b"base";
        let delta = build_delta(base.len(), 4, &[0x00]);
        let err = apply_delta(base, &delta).unwrap_err();
        assert!(matches!(err, PackError::InvalidDelta(_)));
    }

    #[test]
    fn copy_out_of_bounds_rejected() {
        let base = b"short";
        let mut ops = Vec::new();
        encode_copy(&mut ops, 0, 100);
        let delta = build_delta(base.len(), 100, &ops);
        let err = apply_delta(base, &delta).unwrap_err();
        assert!(matches!(err, PackError::InvalidDelta(_)));
    }

    #[test]
    fn base_size_mismatch_rejected() {
        let base = b"Hello";
        let mut ops = Vec::new();
        encode_copy(&mut ops, 0, 5);
        let delta = build_delta(100, 5, &ops);
        let err = apply_delta(base, &delta).unwrap_err();
        assert!(matches!(err, PackError::InvalidDelta(_)));
    }

    #[test]
    fn declared_target_size_mismatch_rejected() {
        let base = b"Hello";
        let mut ops = Vec::new();
        encode_copy(&mut ops, 0, 5);
        let delta = build_delta(base.len(), 10, &ops);
        let err = apply_delta(base, &delta).unwrap_err();
        assert!(matches!(err, PackError::InvalidDelta(_)));
    }

    #[test]
    fn output_overrun_rejected_midstream() {
        let base = b"0123456789";
        let mut ops = Vec::new();
        encode_copy(&mut ops, 0, 10);
        encode_copy(&mut ops, 0, 10);
        // Declared target smaller than the two copies produce.
        let delta = build_delta(base.len(), 15, &ops);
        let err = apply_delta(base, &delta).unwrap_err();
        assert!(matches!(err, PackError::InvalidDelta(_)));
    }

    #[test]
    fn truncated_insert_rejected() {
        let base = b"base";
        let delta = build_delta(base.len(), 5, &[5, b'a', b'b']);
        let err = apply_delta(base, &delta).unwrap_err();
        assert!(matches!(err, PackError::InvalidDelta(_)));
    }
}
