//! Packfile reading, writing, delta codec, and index support.
//!
//! This crate implements the pack container format: a sequence of
//! zlib-compressed objects, some stored whole and some as deltas against
//! earlier objects, framed by a 12-byte header and a trailing content
//! hash. The companion `.idx` format provides id → offset lookup.
//!
//! Reading comes in two shapes: [`scanner::Scanner`] makes a single
//! forward pass with bounded memory (driven by [`parser::Parser`] for
//! ingestion), while [`packfile::Packfile`] serves random access through
//! a memory-mapped pack and its index. [`encoder`] writes new packs,
//! optionally delta-compressing against a sliding window.

pub mod cache;
pub mod delta;
pub mod encoder;
pub mod entry;
pub mod index;
pub mod packfile;
pub mod parser;
pub mod resolver;
pub mod scanner;
pub mod varint;
pub mod zlib;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use odb_hash::ObjectId;
use odb_object::ObjectType;

/// Errors that can occur during pack operations.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("bad {what} signature")]
    BadSignature { what: &'static str },

    #[error("unsupported {what} version: {version}")]
    UnsupportedVersion { what: &'static str, version: u32 },

    #[error("empty pack")]
    EmptyPack,

    #[error("malformed pack: {0}")]
    MalformedPack(String),

    #[error("corrupt pack index: {0}")]
    CorruptIdx(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: ObjectId, actual: ObjectId },

    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("no object at pack offset {0}")]
    OffsetNotFound(u64),

    #[error("invalid object type for this operation: {0}")]
    InvalidType(ObjectType),

    #[error("invalid delta: {0}")]
    InvalidDelta(String),

    #[error("delta base {0} not found in pack or store")]
    ReferenceDeltaNotFound(ObjectId),

    #[error("seek on a non-seekable pack source")]
    SeekNotSupported,

    #[error("operation cancelled")]
    Cancelled,

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Hash(#[from] odb_hash::HashError),

    #[error(transparent)]
    Object(#[from] odb_object::ObjectError),

    #[error(transparent)]
    Store(#[from] odb_store::StoreError),
}

/// Pack format constants.
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
pub const PACK_VERSION: u32 = 2;
pub const PACK_HEADER_SIZE: usize = 12;

/// Pack index v2 constants.
pub const IDX_SIGNATURE: [u8; 4] = [0xff, 0x74, 0x4f, 0x63]; // "\377tOc"
pub const IDX_VERSION: u32 = 2;

/// Maximum delta chain depth accepted when decoding.
pub const MAX_DELTA_CHAIN_DEPTH: usize = 512;

/// A cooperative cancellation flag.
///
/// Long operations (parsing, verification) check the flag between
/// entries and return [`PackError::Cancelled`] promptly once it is set.
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> Result<(), PackError> {
        if self.is_cancelled() {
            Err(PackError::Cancelled)
        } else {
            Ok(())
        }
    }
}
