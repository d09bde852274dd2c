//! Produce a delta stream transforming one byte sequence into another.
//!
//! The matcher indexes fixed-size blocks of the base, then walks the
//! target: block hits become copies (greedily extended), everything else
//! becomes inserts. Output is correct for any input pair; no claim of
//! minimality is made.

use std::collections::HashMap;

use crate::varint::write_leb128;

use super::{encode_copy, encode_insert, MAX_COPY_SIZE, MAX_INSERT_SIZE};

/// Block size for the base index.
const BLOCK_SIZE: usize = 16;

/// Compute a delta that transforms `base` into `target`.
///
/// The result can be fed to [`apply_delta`](super::apply_delta).
pub fn diff_delta(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut delta = write_leb128(base.len() as u64);
    delta.extend(write_leb128(target.len() as u64));

    if target.is_empty() {
        return delta;
    }

    let index = block_index(base);
    let mut pos = 0;
    let mut pending: Vec<u8> = Vec::new();

    while pos < target.len() {
        let remaining = target.len() - pos;

        if remaining >= BLOCK_SIZE {
            if let Some(&base_off) = index.get(&target[pos..pos + BLOCK_SIZE]) {
                let len = extend_match(base, base_off, target, pos);
                flush_inserts(&mut delta, &mut pending);
                emit_copies(&mut delta, base_off, len);
                pos += len;
                continue;
            }
        }

        pending.push(target[pos]);
        pos += 1;
        if pending.len() == MAX_INSERT_SIZE {
            flush_inserts(&mut delta, &mut pending);
        }
    }

    flush_inserts(&mut delta, &mut pending);
    delta
}

/// Index non-overlapping blocks of the base; first occurrence wins so
/// repeated content maps to the earliest (and thus widest-extendable)
/// position.
fn block_index(base: &[u8]) -> HashMap<&[u8], usize> {
    let mut index = HashMap::new();
    if base.len() < BLOCK_SIZE {
        return index;
    }
    for offset in (0..=base.len() - BLOCK_SIZE).step_by(BLOCK_SIZE) {
        index.entry(&base[offset..offset + BLOCK_SIZE]).or_insert(offset);
    }
    index
}

/// Extend a confirmed BLOCK_SIZE match as far as both sides agree.
fn extend_match(base: &[u8], base_off: usize, target: &[u8], target_off: usize) -> usize {
    let max_len = (base.len() - base_off).min(target.len() - target_off);
    let mut len = BLOCK_SIZE;
    while len < max_len && base[base_off + len] == target[target_off + len] {
        len += 1;
    }
    len
}

fn flush_inserts(delta: &mut Vec<u8>, pending: &mut Vec<u8>) {
    for chunk in pending.chunks(MAX_INSERT_SIZE) {
        encode_insert(delta, chunk);
    }
    pending.clear();
}

/// Emit one or more copy opcodes covering `size` bytes from `offset`.
fn emit_copies(delta: &mut Vec<u8>, mut offset: usize, mut size: usize) {
    while size > 0 {
        let chunk = size.min(MAX_COPY_SIZE);
        encode_copy(delta, offset as u64, chunk);
        offset += chunk;
        size -= chunk;
    }
}
