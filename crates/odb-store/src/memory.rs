//! In-memory object store.

use std::collections::HashMap;
use std::sync::RwLock;

use odb_hash::ObjectId;
use odb_object::{ObjectType, SharedObject};

use crate::{ObjectStore, StoreError, StoreTransaction};

/// An object store holding everything in a hash map.
///
/// Thread-safe behind an `RwLock`; reads never block each other. Used as
/// the parser's storer in tests and as the base store for thin-pack
/// completion.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<ObjectId, SharedObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn kind_matches(kind: Option<ObjectType>, obj: &SharedObject) -> bool {
    match kind {
        None => true,
        Some(t) => obj.object_type() == t,
    }
}

impl ObjectStore for MemoryStore {
    fn encoded_object(
        &self,
        kind: Option<ObjectType>,
        id: &ObjectId,
    ) -> Result<SharedObject, StoreError> {
        let objects = self.objects.read().expect("store lock poisoned");
        match objects.get(id) {
            Some(obj) if kind_matches(kind, obj) => Ok(obj.clone()),
            _ => Err(StoreError::NotFound(*id)),
        }
    }

    fn set_encoded_object(&self, obj: SharedObject) -> Result<ObjectId, StoreError> {
        let id = obj.id();
        self.objects
            .write()
            .expect("store lock poisoned")
            .insert(id, obj);
        Ok(id)
    }

    fn contains(&self, id: &ObjectId) -> bool {
        self.objects
            .read()
            .expect("store lock poisoned")
            .contains_key(id)
    }

    fn iter_encoded_objects(
        &self,
        kind: Option<ObjectType>,
    ) -> Result<Box<dyn Iterator<Item = SharedObject> + Send>, StoreError> {
        let objects = self.objects.read().expect("store lock poisoned");
        let mut snapshot: Vec<SharedObject> = objects
            .values()
            .filter(|o| kind_matches(kind, o))
            .cloned()
            .collect();
        // Deterministic order for callers that compare runs.
        snapshot.sort_by_key(|o| o.id());
        Ok(Box::new(snapshot.into_iter()))
    }

    fn transaction(&self) -> Box<dyn StoreTransaction + '_> {
        Box::new(MemoryTransaction {
            parent: self,
            staged: HashMap::new(),
        })
    }
}

/// Staged writes against a [`MemoryStore`].
struct MemoryTransaction<'a> {
    parent: &'a MemoryStore,
    staged: HashMap<ObjectId, SharedObject>,
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn store(&mut self, obj: SharedObject) -> Result<ObjectId, StoreError> {
        let id = obj.id();
        self.staged.insert(id, obj);
        Ok(id)
    }

    fn encoded_object(
        &self,
        kind: Option<ObjectType>,
        id: &ObjectId,
    ) -> Result<SharedObject, StoreError> {
        if let Some(obj) = self.staged.get(id) {
            if kind_matches(kind, obj) {
                return Ok(obj.clone());
            }
            return Err(StoreError::NotFound(*id));
        }
        self.parent.encoded_object(kind, id)
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut objects = self.parent.objects.write().expect("store lock poisoned");
        for (id, obj) in self.staged {
            objects.insert(id, obj);
        }
        Ok(())
    }
}
