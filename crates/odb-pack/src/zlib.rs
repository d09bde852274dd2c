//! Pooled zlib inflation and deflation for pack entries.
//!
//! Every pack entry carries a zlib stream immediately after its header.
//! The inflater here is driven manually over `flate2::Decompress` so
//! that (a) exactly the entry's compressed bytes are consumed from the
//! source, leaving the next entry's header in place, and (b) inflater
//! state and scratch buffers are reused across entries instead of being
//! allocated per object.
//!
//! [`inflater`] hands out pooled instances behind a guard that returns
//! them on drop, on every exit path including unwinds.

use std::io::{BufRead, Write};
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, OnceLock};

use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};

use crate::PackError;

const SCRATCH_SIZE: usize = 32 * 1024;
const POOL_LIMIT: usize = 16;

/// A reusable zlib inflater with its own scratch buffer.
pub struct Inflater {
    raw: Decompress,
    scratch: Box<[u8]>,
}

impl Inflater {
    fn new() -> Self {
        Self {
            raw: Decompress::new(true),
            scratch: vec![0u8; SCRATCH_SIZE].into_boxed_slice(),
        }
    }

    /// Inflate one entry's payload from `src` into `dst`.
    ///
    /// Consumes exactly the zlib stream from `src` — trailing buffered
    /// bytes stay available to the caller. The inflated byte count must
    /// equal `expected` on both sides: a stream that ends short or keeps
    /// producing past the declared size is malformed.
    pub fn inflate_to_writer<R, W>(
        &mut self,
        src: &mut R,
        expected: u64,
        dst: &mut W,
    ) -> Result<u64, PackError>
    where
        R: BufRead + ?Sized,
        W: Write + ?Sized,
    {
        self.raw.reset(true);
        let mut written = 0u64;

        loop {
            let input = src.fill_buf()?;
            let at_eof = input.is_empty();

            let before_in = self.raw.total_in();
            let before_out = self.raw.total_out();
            let status = self
                .raw
                .decompress(input, &mut self.scratch, FlushDecompress::None)
                .map_err(|e| PackError::MalformedPack(format!("zlib inflate: {e}")))?;
            let consumed = (self.raw.total_in() - before_in) as usize;
            let produced = (self.raw.total_out() - before_out) as usize;

            src.consume(consumed);
            if produced > 0 {
                dst.write_all(&self.scratch[..produced])?;
                written += produced as u64;
                if written > expected {
                    return Err(PackError::MalformedPack(format!(
                        "inflated payload exceeds declared size {expected}"
                    )));
                }
            }

            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    if at_eof && consumed == 0 && produced == 0 {
                        return Err(PackError::MalformedPack(
                            "unexpected end of zlib stream".into(),
                        ));
                    }
                }
            }
        }

        if written != expected {
            return Err(PackError::MalformedPack(format!(
                "inflated payload is {written} bytes, expected {expected}"
            )));
        }
        Ok(written)
    }

    /// Inflate one entry's payload from a byte slice.
    ///
    /// Returns the inflated bytes and the number of compressed bytes the
    /// stream occupied (the random-access path needs the latter to know
    /// where the next entry starts).
    pub fn inflate_slice(
        &mut self,
        src: &[u8],
        expected: u64,
    ) -> Result<(Vec<u8>, usize), PackError> {
        let mut reader = src;
        // Capacity hint only; a hostile size field must not allocate blindly.
        let mut out = Vec::with_capacity(expected.min(SCRATCH_SIZE as u64 * 8) as usize);
        self.inflate_to_writer(&mut reader, expected, &mut out)?;
        let compressed_len = src.len() - reader.len();
        Ok((out, compressed_len))
    }
}

static POOL: OnceLock<Mutex<Vec<Inflater>>> = OnceLock::new();

fn pool() -> &'static Mutex<Vec<Inflater>> {
    POOL.get_or_init(|| Mutex::new(Vec::new()))
}

/// Borrow an inflater from the process-wide pool.
pub fn inflater() -> InflaterGuard {
    let recycled = pool().lock().expect("inflater pool poisoned").pop();
    InflaterGuard {
        inner: Some(recycled.unwrap_or_else(Inflater::new)),
    }
}

/// Pool guard; returns the inflater on drop.
pub struct InflaterGuard {
    inner: Option<Inflater>,
}

impl Deref for InflaterGuard {
    type Target = Inflater;
    fn deref(&self) -> &Inflater {
        self.inner.as_ref().expect("inflater taken")
    }
}

impl DerefMut for InflaterGuard {
    fn deref_mut(&mut self) -> &mut Inflater {
        self.inner.as_mut().expect("inflater taken")
    }
}

impl Drop for InflaterGuard {
    fn drop(&mut self) {
        if let Some(inflater) = self.inner.take() {
            let mut pool = pool().lock().expect("inflater pool poisoned");
            if pool.len() < POOL_LIMIT {
                pool.push(inflater);
            }
        }
    }
}

/// Deflate a payload for writing into a pack entry.
pub fn deflate(data: &[u8]) -> Result<Vec<u8>, PackError> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 16), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
