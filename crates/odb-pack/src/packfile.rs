//! Random access to an indexed pack.
//!
//! A [`Packfile`] pairs the mapped pack bytes with their [`PackIndex`]
//! and serves objects by id or offset, walking delta chains through the
//! shared [`DeltaBaseCache`]. The mapping is read-only and all lookups
//! take `&self`, so a `Packfile` can be shared freely across threads.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use memmap2::Mmap;
use odb_hash::{HashAlgorithm, ObjectId};
use odb_object::{MemoryObject, ObjectType};
use odb_store::ObjectStore;

use crate::cache::{DeltaBaseCache, DEFAULT_CACHE_BYTES};
use crate::entry::ObjectHeader;
use crate::index::PackIndex;
use crate::resolver::Resolver;
use crate::scanner::{Scanner, StreamSource};
use crate::{Cancel, PackError, PACK_HEADER_SIZE, PACK_SIGNATURE, PACK_VERSION};

enum PackData {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl PackData {
    fn as_slice(&self) -> &[u8] {
        match self {
            Self::Mapped(m) => m,
            Self::Owned(v) => v,
        }
    }
}

impl std::fmt::Debug for Packfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packfile").finish_non_exhaustive()
    }
}

/// An indexed pack open for random access.
pub struct Packfile {
    data: PackData,
    index: PackIndex,
    cache: DeltaBaseCache,
    store: Option<Arc<dyn ObjectStore>>,
    algo: HashAlgorithm,
    id: OnceLock<ObjectId>,
}

impl Packfile {
    /// Open a `.pack` and its sibling `.idx` (SHA-1 repository).
    pub fn open(pack_path: impl AsRef<Path>) -> Result<Self, PackError> {
        Self::open_with(pack_path, HashAlgorithm::Sha1)
    }

    /// Open with an explicit id algorithm.
    pub fn open_with(
        pack_path: impl AsRef<Path>,
        algo: HashAlgorithm,
    ) -> Result<Self, PackError> {
        let pack_path = pack_path.as_ref();
        let idx_path = pack_path.with_extension("idx");
        let index = PackIndex::open(&idx_path, algo)?;

        let file = std::fs::File::open(pack_path)?;
        // SAFETY: the mapping is read-only and the pack is treated as
        // immutable for the life of this Packfile.
        let data = unsafe { Mmap::map(&file)? };
        Self::from_data(PackData::Mapped(data), index, algo)
    }

    /// Wrap in-memory pack bytes and a matching index.
    pub fn from_bytes(
        data: Vec<u8>,
        index: PackIndex,
        algo: HashAlgorithm,
    ) -> Result<Self, PackError> {
        Self::from_data(PackData::Owned(data), index, algo)
    }

    fn from_data(
        data: PackData,
        index: PackIndex,
        algo: HashAlgorithm,
    ) -> Result<Self, PackError> {
        let bytes = data.as_slice();
        let hash_len = algo.digest_len();
        if bytes.len() < PACK_HEADER_SIZE + hash_len {
            return Err(PackError::MalformedPack("pack file too small".into()));
        }
        if &bytes[0..4] != PACK_SIGNATURE {
            return Err(PackError::BadSignature { what: "pack" });
        }
        let version = u32::from_be_bytes(bytes[4..8].try_into().expect("4 bytes"));
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedVersion { what: "pack", version });
        }
        let count = u32::from_be_bytes(bytes[8..12].try_into().expect("4 bytes"));
        if count != index.count() {
            return Err(PackError::MalformedPack(format!(
                "pack holds {count} objects but index lists {}",
                index.count()
            )));
        }

        // The index must belong to this very pack.
        let trailer_start = bytes.len() - hash_len;
        let trailer = ObjectId::from_bytes(&bytes[trailer_start..], algo)?;
        if trailer != index.pack_checksum() {
            return Err(PackError::ChecksumMismatch {
                expected: index.pack_checksum(),
                actual: trailer,
            });
        }

        Ok(Self {
            data,
            index,
            cache: DeltaBaseCache::new(DEFAULT_CACHE_BYTES),
            store: None,
            algo,
            id: OnceLock::new(),
        })
    }

    /// Attach an external store for thin-pack base resolution.
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the delta-base cache budget.
    pub fn with_cache_bytes(mut self, max_bytes: u64) -> Self {
        self.cache = DeltaBaseCache::new(max_bytes);
        self
    }

    /// The pack's identity: its trailing checksum.
    pub fn id(&self) -> ObjectId {
        *self.id.get_or_init(|| {
            let bytes = self.data.as_slice();
            let start = bytes.len() - self.algo.digest_len();
            ObjectId::from_bytes(&bytes[start..], self.algo).expect("validated on open")
        })
    }

    /// Number of objects in the pack.
    pub fn count(&self) -> u32 {
        self.index.count()
    }

    /// The pack's index.
    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    /// Whether the pack holds this id.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.index.contains(id)
    }

    /// Fetch and decode an object by id.
    pub fn get(&self, id: &ObjectId) -> Result<MemoryObject, PackError> {
        let offset = self
            .index
            .find_offset(id)
            .ok_or(PackError::ObjectNotFound(*id))?;
        self.get_by_offset(offset)
    }

    /// Fetch and decode the object at a pack offset.
    pub fn get_by_offset(&self, offset: u64) -> Result<MemoryObject, PackError> {
        let resolved = self.resolver().object_at(offset)?;
        Ok(MemoryObject::with_id(
            resolved.id,
            resolved.obj_type,
            resolved.data,
        ))
    }

    /// Parse the entry header at `offset`, annotated with what the
    /// index knows: the entry's id and CRC-32, and whether a ref-delta
    /// base lies outside this pack (a thin-pack reference).
    pub fn header_at(&self, offset: u64) -> Result<ObjectHeader, PackError> {
        let mut header = crate::entry::parse_header_at(self.data.as_slice(), offset, self.algo)?;
        if let Some(id) = self.index.find_hash(offset) {
            header.id = Some(id);
            header.crc32 = self.index.find_crc32(&id).unwrap_or(0);
        }
        if let Some(base_id) = header.base_id {
            header.external_ref = !self.index.contains(&base_id);
        }
        Ok(header)
    }

    /// The resolved size of the object at `offset` (chain walk for
    /// deltas, header read otherwise).
    pub fn size_by_offset(&self, offset: u64) -> Result<u64, PackError> {
        self.resolver().size_at(offset)
    }

    /// The resolved concrete type of the object at `offset`.
    pub fn type_by_offset(&self, offset: u64) -> Result<ObjectType, PackError> {
        self.resolver().type_at(offset)
    }

    /// Iterate every object, decoded, in index (id) order.
    pub fn objects(&self) -> Objects<'_> {
        Objects {
            pack: self,
            pos: 0,
            filter: None,
        }
    }

    /// Iterate objects of one concrete type.
    ///
    /// Delta types are an on-disk artifact, not a semantic object type;
    /// asking for them is an error.
    pub fn objects_of_type(&self, obj_type: ObjectType) -> Result<Objects<'_>, PackError> {
        if obj_type.is_delta() {
            return Err(PackError::InvalidType(obj_type));
        }
        Ok(Objects {
            pack: self,
            pos: 0,
            filter: Some(obj_type),
        })
    }

    /// Re-scan the whole pack sequentially and verify it against the
    /// index: per-entry CRC-32s, the trailer hash, and the object count.
    pub fn verify(&self, cancel: &Cancel) -> Result<(), PackError> {
        let bytes = self.data.as_slice();
        let mut scanner = Scanner::new(StreamSource(bytes), self.algo);
        let (_, count) = scanner.read_header()?;
        if count != self.index.count() {
            return Err(PackError::MalformedPack(format!(
                "pack header lists {count} objects, index lists {}",
                self.index.count()
            )));
        }

        let expected: Vec<(u64, u32)> = self
            .index
            .entries_by_offset()
            .map(|e| (e.offset, e.crc32))
            .collect();

        for (offset, crc32) in expected {
            cancel.check()?;
            let header = scanner.next_object_header()?;
            if header.offset != offset {
                return Err(PackError::MalformedPack(format!(
                    "entry at offset {} where index expects {offset}",
                    header.offset
                )));
            }
            let (_, actual_crc) = scanner.stream_object(&mut std::io::sink())?;
            if actual_crc != crc32 {
                return Err(PackError::MalformedPack(format!(
                    "crc32 mismatch for entry at offset {offset}"
                )));
            }
        }

        let trailer = scanner.footer()?;
        if trailer != self.index.pack_checksum() {
            return Err(PackError::ChecksumMismatch {
                expected: self.index.pack_checksum(),
                actual: trailer,
            });
        }
        Ok(())
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver {
            data: self.data.as_slice(),
            index: &self.index,
            cache: &self.cache,
            store: self.store.as_deref(),
            algo: self.algo,
        }
    }
}

/// Iterator over decoded pack objects.
pub struct Objects<'a> {
    pack: &'a Packfile,
    pos: u32,
    filter: Option<ObjectType>,
}

impl Iterator for Objects<'_> {
    type Item = Result<MemoryObject, PackError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.pack.count() {
            let offset = self.pack.index.offset_at(self.pos);
            self.pos += 1;

            if let Some(wanted) = self.filter {
                // Type resolution is cheap (no inflation); skip early.
                match self.pack.type_by_offset(offset) {
                    Ok(t) if t != wanted => continue,
                    Ok(_) => {}
                    Err(e) => return Some(Err(e)),
                }
            }
            return Some(self.pack.get_by_offset(offset));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use odb_hash::hasher::Hasher;
    use odb_object::EncodedObject;

    use crate::delta::diff_delta;
    use crate::entry::encode_header;
    use crate::index::{IndexEntry, PackIndex};
    use crate::varint::write_ofs_offset;
    use crate::zlib;

    const ALGO: HashAlgorithm = HashAlgorithm::Sha1;

    struct PackBuilder {
        bytes: Vec<u8>,
        entries: Vec<IndexEntry>,
        offsets: Vec<u64>,
    }

    impl PackBuilder {
        fn new(count: u32) -> Self {
            let mut bytes = Vec::new();
            bytes.extend_from_slice(PACK_SIGNATURE);
            bytes.extend_from_slice(&PACK_VERSION.to_be_bytes());
            bytes.extend_from_slice(&count.to_be_bytes());
            Self {
                bytes,
                entries: Vec::new(),
                offsets: Vec::new(),
            }
        }

        fn add_whole(&mut self, obj_type: ObjectType, content: &[u8]) -> ObjectId {
            let offset = self.bytes.len() as u64;
            let mut entry = encode_header(obj_type, content.len() as u64);
            entry.extend(zlib::deflate(content).unwrap());
            let id = Hasher::hash_object(ALGO, obj_type.name().unwrap(), content).unwrap();
            self.push(offset, entry, Some(id));
            id
        }

        fn add_ofs_delta(&mut self, base_slot: usize, delta: &[u8], target_id: ObjectId) {
            let offset = self.bytes.len() as u64;
            let mut entry = encode_header(ObjectType::OfsDelta, delta.len() as u64);
            entry.extend(write_ofs_offset(offset - self.offsets[base_slot]));
            entry.extend(zlib::deflate(delta).unwrap());
            self.push(offset, entry, Some(target_id));
        }

        fn add_ref_delta(&mut self, base_id: ObjectId, delta: &[u8], target_id: ObjectId) {
            let offset = self.bytes.len() as u64;
            let mut entry = encode_header(ObjectType::RefDelta, delta.len() as u64);
            entry.extend_from_slice(base_id.as_bytes());
            entry.extend(zlib::deflate(delta).unwrap());
            self.push(offset, entry, Some(target_id));
        }

        fn push(&mut self, offset: u64, entry: Vec<u8>, id: Option<ObjectId>) {
            let crc32 = crc32fast::hash(&entry);
            if let Some(id) = id {
                self.entries.push(IndexEntry { id, offset, crc32 });
            }
            self.offsets.push(offset);
            self.bytes.extend(entry);
        }

        fn finish(mut self) -> Packfile {
            let checksum = Hasher::digest(ALGO, &self.bytes).unwrap();
            self.bytes.extend_from_slice(checksum.as_bytes());
            let index = PackIndex::from_entries(ALGO, self.entries, checksum).unwrap();
            Packfile::from_bytes(self.bytes, index, ALGO).unwrap()
        }
    }

    fn sample_pack() -> (Packfile, Vec<(ObjectId, Vec<u8>)>) {
        let base = b"packfile base object 0123456789abcdef0123456789abcdef".to_vec();
        let edited = {
            let mut v = base.clone();
            v.extend_from_slice(b" edited");
            v
        };
        let commit = b"commit payload bytes".to_vec();

        let base_id = Hasher::hash_object(ALGO, "blob", &base).unwrap();
        let edited_id = Hasher::hash_object(ALGO, "blob", &edited).unwrap();
        let commit_id = Hasher::hash_object(ALGO, "commit", &commit).unwrap();

        let mut b = PackBuilder::new(3);
        b.add_whole(ObjectType::Blob, &base);
        b.add_whole(ObjectType::Commit, &commit);
        b.add_ofs_delta(0, &diff_delta(&base, &edited), edited_id);

        let pack = b.finish();
        (
            pack,
            vec![
                (base_id, base),
                (commit_id, commit),
                (edited_id, edited),
            ],
        )
    }

    #[test]
    fn get_by_id() {
        let (pack, objects) = sample_pack();
        assert_eq!(pack.count(), 3);
        for (id, content) in &objects {
            let obj = pack.get(id).unwrap();
            assert_eq!(obj.id(), *id);
            assert_eq!(obj.bytes(), &content[..]);
        }
    }

    #[test]
    fn get_missing_reports_not_found() {
        let (pack, _) = sample_pack();
        let ghost = ObjectId::from_hex("00000000000000000000000000000000000000aa").unwrap();
        let err = pack.get(&ghost).unwrap_err();
        assert!(matches!(err, PackError::ObjectNotFound(id) if id == ghost));
        assert!(!pack.contains(&ghost));
    }

    #[test]
    fn get_by_offset_resolves_deltas() {
        let (pack, objects) = sample_pack();
        let (edited_id, edited) = &objects[2];
        let offset = pack.index().find_offset(edited_id).unwrap();
        let obj = pack.get_by_offset(offset).unwrap();
        assert_eq!(obj.id(), *edited_id);
        assert_eq!(obj.bytes(), &edited[..]);
    }

    #[test]
    fn size_and_type_by_offset() {
        let (pack, objects) = sample_pack();
        for (id, content) in &objects {
            let offset = pack.index().find_offset(id).unwrap();
            assert_eq!(pack.size_by_offset(offset).unwrap(), content.len() as u64);
        }
        let (commit_id, _) = &objects[1];
        let offset = pack.index().find_offset(commit_id).unwrap();
        assert_eq!(pack.type_by_offset(offset).unwrap(), ObjectType::Commit);
    }

    #[test]
    fn iterate_all_objects() {
        let (pack, objects) = sample_pack();
        let decoded: Vec<MemoryObject> = pack.objects().collect::<Result<_, _>>().unwrap();
        assert_eq!(decoded.len(), 3);
        for (id, _) in &objects {
            assert!(decoded.iter().any(|o| o.id() == *id));
        }
    }

    #[test]
    fn iterate_by_type_filters() {
        let (pack, objects) = sample_pack();
        let blobs: Vec<MemoryObject> = pack
            .objects_of_type(ObjectType::Blob)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(blobs.len(), 2);

        let commits: Vec<MemoryObject> = pack
            .objects_of_type(ObjectType::Commit)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].id(), objects[1].0);
    }

    #[test]
    fn querying_delta_types_is_invalid() {
        let (pack, _) = sample_pack();
        for t in [ObjectType::OfsDelta, ObjectType::RefDelta] {
            let err = pack.objects_of_type(t).err().unwrap();
            assert!(matches!(err, PackError::InvalidType(got) if got == t));
        }
    }

    #[test]
    fn pack_id_is_trailer() {
        let (pack, _) = sample_pack();
        assert_eq!(pack.id(), pack.index().pack_checksum());
        // Cached on first call.
        assert_eq!(pack.id(), pack.id());
    }

    #[test]
    fn repeated_get_is_byte_identical() {
        let (pack, objects) = sample_pack();
        let (id, _) = &objects[2];
        let a = pack.get(id).unwrap();
        let b = pack.get(id).unwrap();
        assert_eq!(a.bytes(), b.bytes());
    }

    #[test]
    fn verify_clean_pack() {
        let (pack, _) = sample_pack();
        pack.verify(&Cancel::new()).unwrap();
    }

    #[test]
    fn verify_cancelled() {
        let (pack, _) = sample_pack();
        let cancel = Cancel::new();
        cancel.cancel();
        let err = pack.verify(&cancel).unwrap_err();
        assert!(matches!(err, PackError::Cancelled));
    }

    #[test]
    fn mismatched_index_rejected_on_open() {
        let (pack, _) = sample_pack();
        // Build a different pack and steal its index.
        let mut other = PackBuilder::new(1);
        other.add_whole(ObjectType::Blob, b"unrelated");
        let other = other.finish();

        let err = Packfile::from_bytes(
            pack.data.as_slice().to_vec(),
            PackIndex::from_entries(
                ALGO,
                other.index().entries().collect(),
                other.index().pack_checksum(),
            )
            .unwrap(),
            ALGO,
        )
        .unwrap_err();
        // Count or checksum disagreement, depending on shape.
        assert!(matches!(
            err,
            PackError::MalformedPack(_) | PackError::ChecksumMismatch { .. }
        ));
    }

    #[test]
    fn header_at_annotates_from_index() {
        let (pack, objects) = sample_pack();
        let (edited_id, _) = &objects[2];
        let offset = pack.index().find_offset(edited_id).unwrap();

        let header = pack.header_at(offset).unwrap();
        assert_eq!(header.disk_type, ObjectType::OfsDelta);
        assert_eq!(header.id, Some(*edited_id));
        assert_eq!(header.crc32, pack.index().find_crc32(edited_id).unwrap());
        // Ofs-delta bases are in-pack by construction.
        assert!(!header.external_ref);
    }

    #[test]
    fn header_at_flags_thin_references() {
        let base = b"a base that is not part of this pack at all".to_vec();
        let target = {
            let mut v = base.clone();
            v.push(b'!');
            v
        };
        let base_id = Hasher::hash_object(ALGO, "blob", &base).unwrap();
        let target_id = Hasher::hash_object(ALGO, "blob", &target).unwrap();

        let mut b = PackBuilder::new(1);
        b.add_ref_delta(base_id, &diff_delta(&base, &target), target_id);
        let pack = b.finish();

        let offset = pack.index().find_offset(&target_id).unwrap();
        let header = pack.header_at(offset).unwrap();
        assert_eq!(header.disk_type, ObjectType::RefDelta);
        assert_eq!(header.base_id, Some(base_id));
        assert!(header.external_ref);
    }

    #[test]
    fn thin_base_resolved_through_attached_store() {
        use odb_store::{MemoryStore, ObjectStore};

        let base = b"store-side base content 0123456789abcdef".to_vec();
        let target = {
            let mut v = base.clone();
            v.extend_from_slice(b" + thin tail");
            v
        };
        let base_id = Hasher::hash_object(ALGO, "blob", &base).unwrap();
        let target_id = Hasher::hash_object(ALGO, "blob", &target).unwrap();

        let store = Arc::new(MemoryStore::new());
        store
            .set_encoded_object(Arc::new(
                MemoryObject::new(ALGO, ObjectType::Blob, base.clone()).unwrap(),
            ))
            .unwrap();

        let mut b = PackBuilder::new(1);
        b.add_ref_delta(base_id, &diff_delta(&base, &target), target_id);
        let pack = b.finish().with_store(store);

        let obj = pack.get(&target_id).unwrap();
        assert_eq!(obj.bytes(), &target[..]);
    }
}
