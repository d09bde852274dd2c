use std::fmt;
use std::str::FromStr;

use crate::{HashAlgorithm, HashError};

/// Widest digest any supported algorithm produces.
const MAX_DIGEST_LEN: usize = 32;

/// A content digest tagged with the algorithm that produced it.
///
/// The digest occupies the leading [`digest_len`](HashAlgorithm::digest_len)
/// bytes of a fixed buffer; the remainder is kept zeroed. That layout
/// makes ids `Copy`, lets equality and hashing derive, and — because
/// the padding compares equal — the derived ordering within one
/// algorithm is exactly raw digest order, which is the order pack
/// indexes sort by.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    algo: HashAlgorithm,
    raw: [u8; MAX_DIGEST_LEN],
}

impl ObjectId {
    /// The all-zeros id under `algo`.
    pub const fn null(algo: HashAlgorithm) -> Self {
        Self {
            algo,
            raw: [0u8; MAX_DIGEST_LEN],
        }
    }

    /// Wrap raw digest bytes; the length must match the algorithm.
    pub fn from_bytes(digest: &[u8], algo: HashAlgorithm) -> Result<Self, HashError> {
        if digest.len() != algo.digest_len() {
            return Err(HashError::WrongDigestLength {
                algo,
                actual: digest.len(),
            });
        }
        let mut id = Self::null(algo);
        id.raw[..digest.len()].copy_from_slice(digest);
        Ok(id)
    }

    /// Parse a hex digest, inferring the algorithm from its length
    /// (40 characters → SHA-1, 64 → SHA-256). Accepts either case.
    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        let algo = HashAlgorithm::from_hex_len(hex.len())
            .ok_or(HashError::UnknownHexLength(hex.len()))?;
        let mut id = Self::null(algo);
        for (i, pair) in hex.as_bytes().chunks_exact(2).enumerate() {
            let hi = nibble(pair[0], 2 * i)?;
            let lo = nibble(pair[1], 2 * i + 1)?;
            id.raw[i] = hi << 4 | lo;
        }
        Ok(id)
    }

    /// The digest bytes (20 or 32 of them, per the algorithm).
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw[..self.algo.digest_len()]
    }

    /// The algorithm this id was produced with.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algo
    }

    /// Whether every digest byte is zero.
    pub fn is_null(&self) -> bool {
        self.raw == [0u8; MAX_DIGEST_LEN]
    }

    /// Leading digest byte — the fan-out bucket in pack indexes.
    pub fn first_byte(&self) -> u8 {
        self.raw[0]
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

fn nibble(digit: u8, at: usize) -> Result<u8, HashError> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'a'..=b'f' => Ok(digit - b'a' + 10),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        other => Err(HashError::InvalidHexDigit {
            at,
            found: other as char,
        }),
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.as_bytes() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.raw;
        write!(f, "oid({:02x}{:02x}{:02x}{:02x})", b[0], b[1], b[2], b[3])
    }
}

impl FromStr for ObjectId {
    type Err = HashError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}
