//! Object-store collaborator interface.
//!
//! The pack engine does not own long-term object storage; it is handed a
//! store implementing [`ObjectStore`]. The parser writes decoded objects
//! into one, the encoder reads source objects out of one, and thin-pack
//! completion looks up missing delta bases in one. [`MemoryStore`] is the
//! reference implementation; persistent stores (loose files, previously
//! indexed packs) implement the same trait out of tree.

mod memory;

pub use memory::MemoryStore;

use odb_hash::ObjectId;
use odb_object::{ObjectError, ObjectType, SharedObject};

/// Errors produced by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Pluggable object storage.
///
/// `kind` arguments of `None` match any concrete object type; a `Some`
/// kind that does not match the stored object reports
/// [`StoreError::NotFound`] — a failed query, not corruption.
pub trait ObjectStore: Send + Sync {
    /// Fetch an object by id.
    fn encoded_object(
        &self,
        kind: Option<ObjectType>,
        id: &ObjectId,
    ) -> Result<SharedObject, StoreError>;

    /// Add an object, returning its id.
    fn set_encoded_object(&self, obj: SharedObject) -> Result<ObjectId, StoreError>;

    /// Whether an object with this id exists.
    fn contains(&self, id: &ObjectId) -> bool {
        self.encoded_object(None, id).is_ok()
    }

    /// Iterate over stored objects, optionally filtered by concrete type.
    ///
    /// The iterator observes a snapshot; objects added after the call may
    /// or may not appear.
    fn iter_encoded_objects(
        &self,
        kind: Option<ObjectType>,
    ) -> Result<Box<dyn Iterator<Item = SharedObject> + Send>, StoreError>;

    /// Begin a staged write transaction.
    ///
    /// Objects stored through the transaction become visible to other
    /// readers only at [`StoreTransaction::commit`]; dropping the
    /// transaction uncommitted discards them. Transactions read their own
    /// staged writes, which pack parsing relies on when resolving deltas
    /// against objects decoded moments earlier.
    fn transaction(&self) -> Box<dyn StoreTransaction + '_>;
}

/// A staged set of writes against an [`ObjectStore`].
pub trait StoreTransaction {
    /// Stage an object.
    fn store(&mut self, obj: SharedObject) -> Result<ObjectId, StoreError>;

    /// Fetch an object, consulting staged writes before the parent store.
    fn encoded_object(
        &self,
        kind: Option<ObjectType>,
        id: &ObjectId,
    ) -> Result<SharedObject, StoreError>;

    /// Publish all staged objects to the parent store.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
