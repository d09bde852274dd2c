//! Object identity for the odb pack engine.
//!
//! A pack stores content under the digest of its framed bytes, so this
//! crate is the vocabulary everything else speaks: [`ObjectId`] (a
//! digest tagged with the algorithm that produced it), [`HashAlgorithm`]
//! (the per-repository choice of SHA-1 or SHA-256), the streaming
//! [`hasher::Hasher`], and the [`fanout::FanoutTable`] that pack
//! indexes use to narrow id searches.

mod algo;
pub mod fanout;
pub mod hasher;
mod oid;

pub use algo::HashAlgorithm;
pub use oid::ObjectId;

/// Errors produced by id and digest operations.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("invalid hex digit {found:?} at offset {at}")]
    InvalidHexDigit { at: usize, found: char },

    #[error("digest of {actual} bytes does not fit a {algo} id")]
    WrongDigestLength { algo: HashAlgorithm, actual: usize },

    #[error("no supported algorithm produces a {0}-character hex digest")]
    UnknownHexLength(usize),

    #[error("fan-out table needs 1024 bytes, got {0}")]
    TruncatedFanout(usize),

    #[error("fan-out table shrinks at bucket {0:#04x}")]
    ShrinkingFanout(usize),

    #[error("SHA-1 collision attack detected")]
    Sha1Collision,
}
