//! Pack ingestion: drive a scanner, resolve deltas, emit to a storer
//! and observers.
//!
//! Parsing is two-phase. The first pass scans every entry: concrete
//! objects are inflated, hashed, and delivered immediately; deltas are
//! recorded with their base reference and deferred. The second pass
//! resolves deferred deltas in dependency order — a single forward pass
//! cannot resolve backward-pointing ofs-deltas without either buffering
//! every prior object or re-reading bytes, so the parser picks its
//! strategy from the source: seekable sources re-read delta payloads on
//! demand, streaming sources retain them in memory.
//!
//! With a storer attached, decoded objects go through a
//! [`StoreTransaction`] committed only when the whole pack parses;
//! failures roll back by dropping the transaction. Without one, decoded
//! content is buffered in memory so later deltas can find their bases.

use std::collections::HashMap;
use std::sync::Arc;

use odb_hash::hasher::Hasher;
use odb_hash::{HashAlgorithm, ObjectId};
use odb_object::{MemoryObject, ObjectType};
use odb_store::{ObjectStore, StoreError, StoreTransaction};

use crate::delta::apply_delta;
use crate::scanner::{PackSource, Scanner};
use crate::{Cancel, PackError};

/// Receives parse events in pack order (deltas in dependency order).
///
/// All methods default to no-ops so implementations override only what
/// they need.
pub trait Observer {
    /// The pack header was read; `count` objects follow.
    fn on_header(&mut self, count: u32) -> Result<(), PackError> {
        let _ = count;
        Ok(())
    }

    /// An object's resolved type and size are known.
    fn on_inflated_object_header(
        &mut self,
        obj_type: ObjectType,
        size: u64,
        pos: u64,
    ) -> Result<(), PackError> {
        let _ = (obj_type, size, pos);
        Ok(())
    }

    /// An object's content was decoded. `crc32` covers the entry's
    /// on-disk bytes at `pos`.
    fn on_inflated_object_content(
        &mut self,
        id: &ObjectId,
        pos: u64,
        crc32: u32,
        content: &[u8],
    ) -> Result<(), PackError> {
        let _ = (id, pos, crc32, content);
        Ok(())
    }

    /// The trailer was reached and verified.
    fn on_footer(&mut self, checksum: ObjectId) -> Result<(), PackError> {
        let _ = checksum;
        Ok(())
    }
}

/// A deferred delta entry awaiting its base.
struct PendingDelta {
    offset: u64,
    base_id: Option<ObjectId>,
    base_offset: Option<u64>,
    crc32: u32,
    /// Payload bytes; `None` when the source is seekable and the
    /// payload will be re-read in phase two.
    payload: Option<Vec<u8>>,
}

/// Drives a [`Scanner`] and materialises every object in the pack.
pub struct Parser<'a, S: PackSource> {
    scanner: Scanner<S>,
    algo: HashAlgorithm,
    store: Option<&'a dyn ObjectStore>,
    observers: Vec<&'a mut dyn Observer>,
    cancel: Cancel,
}

impl<'a, S: PackSource> Parser<'a, S> {
    pub fn new(scanner: Scanner<S>, algo: HashAlgorithm) -> Self {
        Self {
            scanner,
            algo,
            store: None,
            observers: Vec::new(),
            cancel: Cancel::new(),
        }
    }

    /// Write decoded objects into `store` (transactionally).
    pub fn with_store(mut self, store: &'a dyn ObjectStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Check `cancel` between entries.
    pub fn with_cancel(mut self, cancel: Cancel) -> Self {
        self.cancel = cancel;
        self
    }

    /// Register an observer for parse events.
    pub fn add_observer(&mut self, observer: &'a mut dyn Observer) {
        self.observers.push(observer);
    }

    /// Parse the whole pack. Returns the pack checksum.
    pub fn parse(&mut self) -> Result<ObjectId, PackError> {
        let (_, count) = self.scanner.read_header()?;
        if count == 0 {
            return Err(PackError::EmptyPack);
        }
        for obs in &mut self.observers {
            obs.on_header(count)?;
        }

        let mut tx = self.store.map(|s| s.transaction());
        let mut by_offset: HashMap<u64, ObjectId> = HashMap::new();
        let mut buffered: HashMap<ObjectId, (ObjectType, Arc<[u8]>)> = HashMap::new();
        let mut pending: Vec<PendingDelta> = Vec::new();

        // Phase 1: scan every entry; deliver concrete objects, defer
        // deltas.
        let seekable = self.scanner.is_seekable();
        for _ in 0..count {
            self.cancel.check()?;
            let header = self.scanner.next_object_header()?;

            if header.is_delta() {
                let (payload, crc32) = if seekable {
                    let (_, crc) = self.scanner.stream_object(&mut std::io::sink())?;
                    (None, crc)
                } else {
                    let mut payload = Vec::with_capacity(header.size as usize);
                    let (_, crc) = self.scanner.stream_object(&mut payload)?;
                    (Some(payload), crc)
                };
                pending.push(PendingDelta {
                    offset: header.offset,
                    base_id: header.base_id,
                    base_offset: header.base_offset,
                    crc32,
                    payload,
                });
                continue;
            }

            let mut content = Vec::with_capacity(header.size as usize);
            let (_, crc32) = self.scanner.stream_object(&mut content)?;
            let content: Arc<[u8]> = content.into();
            let id = Hasher::hash_object(self.algo, header.disk_type.name()?, &content)?;

            for obs in &mut self.observers {
                obs.on_inflated_object_header(header.disk_type, header.size, header.offset)?;
                obs.on_inflated_object_content(&id, header.offset, crc32, &content)?;
            }
            by_offset.insert(header.offset, id);
            deliver(
                &mut tx,
                &mut buffered,
                id,
                header.disk_type,
                Arc::clone(&content),
            )?;
        }

        // The trailer is verified while the position is still
        // sequential; the footer event waits until deltas resolved.
        let pack_checksum = self.scanner.footer()?;

        // Phase 2: resolve deferred deltas, bases first. Passes repeat
        // while progress is made so in-pack forward references settle.
        let mut remaining = pending;
        while !remaining.is_empty() {
            self.cancel.check()?;
            let mut unresolved = Vec::new();
            let mut progress = false;

            for delta in remaining {
                self.cancel.check()?;
                let base = find_base(&delta, &by_offset, &buffered, tx.as_deref())?;
                let Some((base_type, base_content)) = base else {
                    unresolved.push(delta);
                    continue;
                };

                let payload = match delta.payload {
                    Some(payload) => payload,
                    None => self.reread_payload(delta.offset)?,
                };
                let target: Arc<[u8]> = apply_delta(&base_content, &payload)?.into();
                let id = Hasher::hash_object(self.algo, base_type.name()?, &target)?;

                for obs in &mut self.observers {
                    obs.on_inflated_object_header(base_type, target.len() as u64, delta.offset)?;
                    obs.on_inflated_object_content(&id, delta.offset, delta.crc32, &target)?;
                }
                by_offset.insert(delta.offset, id);
                deliver(&mut tx, &mut buffered, id, base_type, target)?;
                progress = true;
            }

            if !progress && !unresolved.is_empty() {
                let missing = unresolved
                    .iter()
                    .find_map(|d| d.base_id)
                    .ok_or_else(|| {
                        PackError::MalformedPack("unresolvable ofs-delta base".into())
                    })?;
                return Err(PackError::ReferenceDeltaNotFound(missing));
            }
            remaining = unresolved;
        }

        for obs in &mut self.observers {
            obs.on_footer(pack_checksum)?;
        }
        if let Some(tx) = tx {
            tx.commit()?;
        }
        Ok(pack_checksum)
    }

    /// Re-read a delta payload through the seekable source.
    fn reread_payload(&mut self, offset: u64) -> Result<Vec<u8>, PackError> {
        self.scanner.seek_to(offset)?;
        let header = self.scanner.next_object_header()?;
        let mut payload = Vec::with_capacity(header.size as usize);
        self.scanner.stream_object(&mut payload)?;
        Ok(payload)
    }
}

/// Hand a decoded object to the transaction or the in-memory buffer.
fn deliver(
    tx: &mut Option<Box<dyn StoreTransaction + '_>>,
    buffered: &mut HashMap<ObjectId, (ObjectType, Arc<[u8]>)>,
    id: ObjectId,
    obj_type: ObjectType,
    content: Arc<[u8]>,
) -> Result<(), PackError> {
    match tx {
        Some(tx) => {
            tx.store(Arc::new(MemoryObject::with_id(id, obj_type, content)))?;
        }
        None => {
            buffered.insert(id, (obj_type, content));
        }
    }
    Ok(())
}

/// Locate a delta's base content, if available yet.
///
/// The transaction reads its own staged writes and falls through to the
/// parent store, so one lookup covers in-pack bases and thin-pack
/// prerequisites alike.
fn find_base(
    delta: &PendingDelta,
    by_offset: &HashMap<u64, ObjectId>,
    buffered: &HashMap<ObjectId, (ObjectType, Arc<[u8]>)>,
    tx: Option<&(dyn StoreTransaction + '_)>,
) -> Result<Option<(ObjectType, Arc<[u8]>)>, PackError> {
    let base_id = match (delta.base_offset, delta.base_id) {
        // In-pack base located by offset; unresolved until the base
        // entry itself has been decoded.
        (Some(base_offset), _) => match by_offset.get(&base_offset) {
            Some(id) => *id,
            None => return Ok(None),
        },
        (None, Some(id)) => id,
        (None, None) => {
            return Err(PackError::MalformedPack(
                "delta entry without a base reference".into(),
            ))
        }
    };

    if let Some((obj_type, content)) = buffered.get(&base_id) {
        return Ok(Some((*obj_type, Arc::clone(content))));
    }
    if let Some(tx) = tx {
        match tx.encoded_object(None, &base_id) {
            Ok(obj) => {
                let content: Arc<[u8]> = obj.data()?.into();
                return Ok(Some((obj.object_type(), content)));
            }
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(None)
}
