//! Encoded-object model for the odb pack engine.
//!
//! An *encoded object* is the unit the pack engine moves around: a typed,
//! sized, content-addressed byte payload. This crate provides the
//! [`ObjectType`] enum (including the two on-disk delta types), the
//! [`EncodedObject`] trait, and its in-memory and file-backed
//! implementations. Parsing commits and trees into structured values is a
//! higher-level concern and lives outside this workspace.

mod encoded;

pub use encoded::{EncodedObject, FileObject, MemoryObject, SharedObject};

use odb_hash::HashError;

/// Errors produced by encoded-object operations.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("invalid object type code: {0}")]
    InvalidTypeCode(u8),

    #[error("invalid object type name: {0}")]
    InvalidTypeName(String),

    #[error("delta type {0} has no canonical object form")]
    DeltaHasNoForm(ObjectType),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The type of a packed object.
///
/// The four concrete types are the semantic object kinds; the two delta
/// types are an on-disk artifact of pack compression and never survive
/// decoding. On-wire codes are 1–4 for the concrete types and 6/7 for
/// deltas (5 is reserved and 0 invalid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Commit,
    Tree,
    Blob,
    Tag,
    /// Delta whose base is referenced by a negative offset in the same pack.
    OfsDelta,
    /// Delta whose base is referenced by object id (possibly outside the pack).
    RefDelta,
}

impl ObjectType {
    /// The type code as stored in pack entry headers.
    pub const fn code(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
            Self::OfsDelta => 6,
            Self::RefDelta => 7,
        }
    }

    /// Parse a pack entry type code. Codes 0, 5, and >7 are invalid.
    pub fn from_code(code: u8) -> Result<Self, ObjectError> {
        match code {
            1 => Ok(Self::Commit),
            2 => Ok(Self::Tree),
            3 => Ok(Self::Blob),
            4 => Ok(Self::Tag),
            6 => Ok(Self::OfsDelta),
            7 => Ok(Self::RefDelta),
            other => Err(ObjectError::InvalidTypeCode(other)),
        }
    }

    /// Whether this is one of the two on-disk delta types.
    pub const fn is_delta(&self) -> bool {
        matches!(self, Self::OfsDelta | Self::RefDelta)
    }

    /// The canonical type name used in object framing.
    ///
    /// Only concrete types have one; delta types report an error.
    pub fn name(&self) -> Result<&'static str, ObjectError> {
        match self {
            Self::Commit => Ok("commit"),
            Self::Tree => Ok("tree"),
            Self::Blob => Ok("blob"),
            Self::Tag => Ok("tag"),
            Self::OfsDelta | Self::RefDelta => Err(ObjectError::DeltaHasNoForm(*self)),
        }
    }

    /// Parse a concrete type name ("blob", "tree", "commit", "tag").
    pub fn from_name(name: &str) -> Result<Self, ObjectError> {
        match name {
            "commit" => Ok(Self::Commit),
            "tree" => Ok(Self::Tree),
            "blob" => Ok(Self::Blob),
            "tag" => Ok(Self::Tag),
            other => Err(ObjectError::InvalidTypeName(other.to_string())),
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
            Self::OfsDelta => "ofs-delta",
            Self::RefDelta => "ref-delta",
        })
    }
}

impl std::str::FromStr for ObjectType {
    type Err = ObjectError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}
