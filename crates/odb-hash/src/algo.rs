use crate::ObjectId;

/// The digest algorithm a repository's object ids are built on.
///
/// Chosen once per repository; packs, indexes, and stores built for one
/// algorithm never mix with another. Buffer sizes throughout the engine
/// come from [`digest_len`](HashAlgorithm::digest_len).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-1, the historical default.
    #[default]
    Sha1,
    /// SHA-256.
    Sha256,
}

impl HashAlgorithm {
    /// Digest width in bytes (20 or 32).
    pub const fn digest_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// Width of the hex form (40 or 64 characters).
    pub const fn hex_len(self) -> usize {
        2 * self.digest_len()
    }

    /// The all-zeros id under this algorithm.
    pub const fn null_oid(self) -> ObjectId {
        ObjectId::null(self)
    }

    /// Which algorithm, if any, produces digests of `len` bytes.
    pub fn from_digest_len(len: usize) -> Option<Self> {
        [Self::Sha1, Self::Sha256]
            .into_iter()
            .find(|algo| algo.digest_len() == len)
    }

    /// Which algorithm, if any, produces hex digests of `len` characters.
    pub fn from_hex_len(len: usize) -> Option<Self> {
        if len % 2 != 0 {
            return None;
        }
        Self::from_digest_len(len / 2)
    }

    /// The algorithm's configuration name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.name())
    }
}
