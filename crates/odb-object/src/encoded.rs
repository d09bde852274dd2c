//! The `EncodedObject` trait and its memory/file implementations.

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use odb_hash::hasher::Hasher;
use odb_hash::{HashAlgorithm, ObjectId};

use crate::{ObjectError, ObjectType};

/// A typed, sized, content-addressed payload.
///
/// Implementations are immutable once constructed: the id, type, and size
/// are fixed at creation time, which is what makes sharing them across
/// threads and caches sound.
pub trait EncodedObject: Send + Sync + std::fmt::Debug {
    /// The object's content hash.
    fn id(&self) -> ObjectId;

    /// The concrete object type.
    fn object_type(&self) -> ObjectType;

    /// The content size in bytes.
    fn size(&self) -> u64;

    /// A reader over the content bytes.
    fn reader(&self) -> Result<Box<dyn Read + Send + '_>, ObjectError>;

    /// The full content as a byte vector.
    ///
    /// Default implementation drains [`reader`](EncodedObject::reader);
    /// in-memory implementations override this to avoid the copy loop.
    fn data(&self) -> Result<Vec<u8>, ObjectError> {
        let mut buf = Vec::with_capacity(self.size() as usize);
        self.reader()?.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// A shareable encoded object.
pub type SharedObject = Arc<dyn EncodedObject>;

/// An encoded object held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryObject {
    id: ObjectId,
    obj_type: ObjectType,
    data: Arc<[u8]>,
}

impl MemoryObject {
    /// Create from content, computing the id from the object framing.
    pub fn new(
        algo: HashAlgorithm,
        obj_type: ObjectType,
        data: Vec<u8>,
    ) -> Result<Self, ObjectError> {
        let id = Hasher::hash_object(algo, obj_type.name()?, &data)?;
        Ok(Self {
            id,
            obj_type,
            data: data.into(),
        })
    }

    /// Create from content with a pre-computed id.
    ///
    /// The caller is responsible for the id actually matching; pack
    /// decoding uses this to avoid re-hashing content it just hashed.
    pub fn with_id(id: ObjectId, obj_type: ObjectType, data: Arc<[u8]>) -> Self {
        Self { id, obj_type, data }
    }

    /// Borrow the content.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// The content as a shared slice, without copying.
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.data)
    }
}

impl EncodedObject for MemoryObject {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn object_type(&self) -> ObjectType {
        self.obj_type
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn reader(&self) -> Result<Box<dyn Read + Send + '_>, ObjectError> {
        Ok(Box::new(&self.data[..]))
    }

    fn data(&self) -> Result<Vec<u8>, ObjectError> {
        Ok(self.data.to_vec())
    }
}

/// An encoded object whose content lives in a file on disk.
///
/// Type, size, and id are fixed at construction; the file is opened lazily
/// by [`reader`](EncodedObject::reader), so a `FileObject` is cheap to hold
/// for content far larger than memory.
#[derive(Debug, Clone)]
pub struct FileObject {
    id: ObjectId,
    obj_type: ObjectType,
    size: u64,
    path: PathBuf,
}

impl FileObject {
    /// Describe an existing file as an encoded object.
    ///
    /// `id` must be the hash of the framed content; it is trusted, not
    /// recomputed.
    pub fn new(id: ObjectId, obj_type: ObjectType, size: u64, path: PathBuf) -> Self {
        Self {
            id,
            obj_type,
            size,
            path,
        }
    }

    /// Hash an existing file's content and describe it as an encoded object.
    pub fn from_path(
        algo: HashAlgorithm,
        obj_type: ObjectType,
        path: PathBuf,
    ) -> Result<Self, ObjectError> {
        let size = fs::metadata(&path)?.len();
        let mut hasher = Hasher::for_object(algo, obj_type.name()?, size);
        let mut file = fs::File::open(&path)?;
        std::io::copy(&mut file, &mut hasher)?;
        let id = hasher.finalize()?;
        Ok(Self {
            id,
            obj_type,
            size,
            path,
        })
    }

    /// The backing file path.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl EncodedObject for FileObject {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn object_type(&self) -> ObjectType {
        self.obj_type
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn reader(&self) -> Result<Box<dyn Read + Send + '_>, ObjectError> {
        let file = fs::File::open(&self.path)?;
        Ok(Box::new(file.take(self.size)))
    }
}
