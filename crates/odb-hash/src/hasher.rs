//! Streaming digest computation.
//!
//! Objects hash over a framed form — the type name, a space, the
//! decimal content length, a NUL, then the content — so the same bytes
//! stored as a blob and as a tag get different ids. [`Hasher`] streams
//! either framed or raw input and finalises into an [`ObjectId`];
//! SHA-1 runs with collision detection and refuses to produce an id
//! for an attack input.

use crate::{HashAlgorithm, HashError, ObjectId};

/// An in-progress digest.
pub struct Hasher {
    state: State,
}

enum State {
    Sha1(Box<sha1_checked::Sha1>),
    Sha256(sha2::Sha256),
}

impl Hasher {
    /// Start a raw digest (no framing).
    pub fn new(algo: HashAlgorithm) -> Self {
        use digest::Digest;
        Self {
            state: match algo {
                HashAlgorithm::Sha1 => State::Sha1(Box::new(sha1_checked::Sha1::new())),
                HashAlgorithm::Sha256 => State::Sha256(sha2::Sha256::new()),
            },
        }
    }

    /// Start an object digest with the framing already fed.
    ///
    /// Stream exactly `size` content bytes afterwards and the finalised
    /// digest is the object's id.
    pub fn for_object(algo: HashAlgorithm, kind: &str, size: u64) -> Self {
        let mut hasher = Self::new(algo);
        hasher.update(kind.as_bytes());
        hasher.update(format!(" {size}\0").as_bytes());
        hasher
    }

    /// Feed bytes.
    pub fn update(&mut self, data: &[u8]) {
        use digest::Digest;
        match &mut self.state {
            State::Sha1(sha) => sha.update(data),
            State::Sha256(sha) => sha.update(data),
        }
    }

    /// Consume the hasher and produce the id.
    pub fn finalize(self) -> Result<ObjectId, HashError> {
        use digest::Digest;
        match self.state {
            State::Sha1(sha) => {
                let outcome = sha.try_finalize();
                if outcome.has_collision() {
                    return Err(HashError::Sha1Collision);
                }
                ObjectId::from_bytes(outcome.hash().as_slice(), HashAlgorithm::Sha1)
            }
            State::Sha256(sha) => {
                ObjectId::from_bytes(sha.finalize().as_slice(), HashAlgorithm::Sha256)
            }
        }
    }

    /// One-shot raw digest of a byte slice.
    pub fn digest(algo: HashAlgorithm, data: &[u8]) -> Result<ObjectId, HashError> {
        let mut hasher = Self::new(algo);
        hasher.update(data);
        hasher.finalize()
    }

    /// One-shot framed object digest: `"{kind} {len}\0{content}"`.
    pub fn hash_object(
        algo: HashAlgorithm,
        kind: &str,
        content: &[u8],
    ) -> Result<ObjectId, HashError> {
        let mut hasher = Self::for_object(algo, kind, content.len() as u64);
        hasher.update(content);
        hasher.finalize()
    }
}

/// Writing into a hasher feeds it; useful with `io::copy` and the
/// tee-style writers in the pack code.
impl std::io::Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
