//! Pack generation: write a new pack from a list of object ids.
//!
//! Objects come out of the supplied store and are emitted in the
//! caller's order. With a non-zero delta window each object may be
//! stored as a delta against one of the previously emitted objects;
//! because candidates are only ever behind the current object, every
//! base is already in the pack and ofs-deltas always point backward.

use std::collections::VecDeque;
use std::io::Write;

use odb_hash::hasher::Hasher;
use odb_hash::{HashAlgorithm, ObjectId};
use odb_object::ObjectType;
use odb_store::{ObjectStore, StoreError};

use crate::delta::diff_delta;
use crate::entry::encode_header;
use crate::index::IndexEntry;
use crate::varint::write_ofs_offset;
use crate::{zlib, PackError, PACK_SIGNATURE, PACK_VERSION};

/// Delta-compression parameters.
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// How many previously emitted objects are delta-base candidates.
    /// Zero disables delta compression entirely.
    pub window: usize,
    /// Maximum delta chain depth the encoder will build.
    pub max_depth: u32,
    /// Emit ofs-deltas (negative offset) rather than ref-deltas
    /// (base id) for in-pack bases.
    pub ofs_deltas: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            window: 10,
            max_depth: 50,
            ofs_deltas: true,
        }
    }
}

/// The outcome of an encode: the pack's trailing checksum and one
/// entry per object, ready for `PackIndex::from_entries`.
#[derive(Debug)]
pub struct EncodeResult {
    pub checksum: ObjectId,
    pub entries: Vec<IndexEntry>,
}

/// Writes packs out of an object store.
pub struct Encoder<'a> {
    store: &'a dyn ObjectStore,
    algo: HashAlgorithm,
    options: EncodeOptions,
}

/// Counting, hashing pack writer.
struct PackOut<'w, W: Write> {
    out: &'w mut W,
    hasher: Hasher,
    offset: u64,
}

impl<W: Write> PackOut<'_, W> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), PackError> {
        self.out.write_all(bytes)?;
        self.hasher.update(bytes);
        self.offset += bytes.len() as u64;
        Ok(())
    }
}

/// A recently emitted object, candidate base for the next ones.
struct WindowEntry {
    id: ObjectId,
    obj_type: ObjectType,
    data: std::sync::Arc<[u8]>,
    offset: u64,
    depth: u32,
}

impl<'a> Encoder<'a> {
    pub fn new(store: &'a dyn ObjectStore, algo: HashAlgorithm) -> Self {
        Self {
            store,
            algo,
            options: EncodeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EncodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Write a pack containing `ids`, in that order, to `out`.
    pub fn encode<W: Write>(
        &self,
        ids: &[ObjectId],
        out: &mut W,
    ) -> Result<EncodeResult, PackError> {
        let mut sink = PackOut {
            out,
            hasher: Hasher::new(self.algo),
            offset: 0,
        };

        let mut header = Vec::with_capacity(12);
        header.extend_from_slice(PACK_SIGNATURE);
        header.extend_from_slice(&PACK_VERSION.to_be_bytes());
        header.extend_from_slice(&(ids.len() as u32).to_be_bytes());
        sink.write(&header)?;

        let mut entries = Vec::with_capacity(ids.len());
        let mut window: VecDeque<WindowEntry> = VecDeque::new();

        for id in ids {
            let obj = match self.store.encoded_object(None, id) {
                Ok(obj) => obj,
                Err(StoreError::NotFound(id)) => return Err(PackError::ObjectNotFound(id)),
                Err(e) => return Err(e.into()),
            };
            let obj_type = obj.object_type();
            let data: std::sync::Arc<[u8]> = obj.data()?.into();

            let entry_offset = sink.offset;
            let chosen = self.pick_base(&window, obj_type, &data);

            let mut entry_bytes;
            let depth = match chosen {
                Some((base_index, delta)) => {
                    let base = &window[base_index];
                    entry_bytes = if self.options.ofs_deltas {
                        let mut bytes =
                            encode_header(ObjectType::OfsDelta, delta.len() as u64);
                        bytes.extend(write_ofs_offset(entry_offset - base.offset));
                        bytes
                    } else {
                        let mut bytes =
                            encode_header(ObjectType::RefDelta, delta.len() as u64);
                        bytes.extend_from_slice(base.id.as_bytes());
                        bytes
                    };
                    entry_bytes.extend(zlib::deflate(&delta)?);
                    base.depth + 1
                }
                None => {
                    entry_bytes = encode_header(obj_type, data.len() as u64);
                    entry_bytes.extend(zlib::deflate(&data)?);
                    0
                }
            };

            let crc32 = crc32fast::hash(&entry_bytes);
            sink.write(&entry_bytes)?;
            entries.push(IndexEntry {
                id: *id,
                offset: entry_offset,
                crc32,
            });

            window.push_back(WindowEntry {
                id: *id,
                obj_type,
                data,
                offset: entry_offset,
                depth,
            });
            if self.options.window > 0 && window.len() > self.options.window {
                window.pop_front();
            } else if self.options.window == 0 {
                window.clear();
            }
        }

        let checksum = sink.hasher.finalize()?;
        sink.out.write_all(checksum.as_bytes())?;
        Ok(EncodeResult { checksum, entries })
    }

    /// Choose a delta base from the window, or none.
    ///
    /// Candidates of the same type are considered in descending size,
    /// ties broken by ascending id; the smallest delta wins. A delta
    /// must come in under 75% of the stored-whole size to be worth the
    /// decode cost.
    fn pick_base(
        &self,
        window: &VecDeque<WindowEntry>,
        obj_type: ObjectType,
        data: &[u8],
    ) -> Option<(usize, Vec<u8>)> {
        if self.options.window == 0 || data.is_empty() {
            return None;
        }

        let mut candidates: Vec<usize> = (0..window.len())
            .filter(|&i| window[i].obj_type == obj_type)
            .collect();
        candidates.sort_by(|&a, &b| {
            let (wa, wb) = (&window[a], &window[b]);
            wb.data
                .len()
                .cmp(&wa.data.len())
                .then_with(|| wa.id.cmp(&wb.id))
        });

        let mut best: Option<(usize, Vec<u8>)> = None;
        for i in candidates {
            if window[i].depth + 1 > self.options.max_depth {
                continue;
            }
            let delta = diff_delta(&window[i].data, data);
            let better = match &best {
                Some((_, current)) => delta.len() < current.len(),
                None => true,
            };
            if better {
                best = Some((i, delta));
            }
        }

        let (index, delta) = best?;
        if (delta.len() as u64) * 4 < (data.len() as u64) * 3 {
            Some((index, delta))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use odb_object::MemoryObject;
    use odb_store::MemoryStore;

    use crate::index::PackIndex;
    use crate::packfile::Packfile;
    use crate::parser::Parser;
    use crate::scanner::Scanner;

    const ALGO: HashAlgorithm = HashAlgorithm::Sha1;

    fn store_with(objects: &[(ObjectType, Vec<u8>)]) -> (MemoryStore, Vec<ObjectId>) {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for (t, content) in objects {
            let obj = MemoryObject::new(ALGO, *t, content.clone()).unwrap();
            ids.push(store.set_encoded_object(Arc::new(obj)).unwrap());
        }
        (store, ids)
    }

    fn versions(n: usize) -> Vec<(ObjectType, Vec<u8>)> {
        // A family of similar blobs so delta selection has real wins.
        (0..n)
            .map(|i| {
                let mut content = b"shared prefix 0123456789abcdef 0123456789abcdef ".to_vec();
                content.extend_from_slice(format!("revision {i}\n").as_bytes());
                content.extend(vec![b'.'; 200 + i]);
                (ObjectType::Blob, content)
            })
            .collect()
    }

    #[test]
    fn window_zero_writes_no_deltas() {
        let objects = versions(5);
        let (store, ids) = store_with(&objects);
        let encoder = Encoder::new(&store, ALGO).with_options(EncodeOptions {
            window: 0,
            ..EncodeOptions::default()
        });

        let mut pack = Vec::new();
        let result = encoder.encode(&ids, &mut pack).unwrap();
        assert_eq!(result.entries.len(), 5);

        // Scan the pack: every entry must be a concrete type.
        let mut scanner = Scanner::from_reader(&pack[..]);
        scanner.read_header().unwrap();
        for _ in 0..5 {
            let header = scanner.next_object_header().unwrap();
            assert!(!header.is_delta());
        }
        let footer = scanner.footer().unwrap();
        assert_eq!(footer, result.checksum);
    }

    #[test]
    fn windowed_encode_produces_deltas() {
        let objects = versions(6);
        let (store, ids) = store_with(&objects);
        let encoder = Encoder::new(&store, ALGO);

        let mut pack = Vec::new();
        encoder.encode(&ids, &mut pack).unwrap();

        let mut scanner = Scanner::from_reader(&pack[..]);
        scanner.read_header().unwrap();
        let mut delta_entries = 0;
        for _ in 0..6 {
            if scanner.next_object_header().unwrap().is_delta() {
                delta_entries += 1;
            }
        }
        assert!(delta_entries > 0, "similar objects should deltify");
    }

    #[test]
    fn encoded_pack_parses_back_to_the_same_objects() {
        let objects = versions(6);
        let (store, ids) = store_with(&objects);

        for window in [0usize, 10] {
            let encoder = Encoder::new(&store, ALGO).with_options(EncodeOptions {
                window,
                ..EncodeOptions::default()
            });
            let mut pack = Vec::new();
            encoder.encode(&ids, &mut pack).unwrap();

            let sink = MemoryStore::new();
            let scanner = Scanner::from_reader(&pack[..]);
            let mut parser = Parser::new(scanner, ALGO).with_store(&sink);
            parser.parse().unwrap();

            assert_eq!(sink.len(), ids.len(), "window {window}");
            for (id, (_, content)) in ids.iter().zip(&objects) {
                let obj = sink.encoded_object(None, id).unwrap();
                assert_eq!(obj.data().unwrap(), *content, "window {window}");
            }
        }
    }

    #[test]
    fn encoded_pack_is_randomly_accessible() {
        let objects = versions(4);
        let (store, ids) = store_with(&objects);
        let encoder = Encoder::new(&store, ALGO);

        let mut pack = Vec::new();
        let result = encoder.encode(&ids, &mut pack).unwrap();
        let index = PackIndex::from_entries(ALGO, result.entries, result.checksum).unwrap();
        let packfile = Packfile::from_bytes(pack, index, ALGO).unwrap();

        for (id, (_, content)) in ids.iter().zip(&objects) {
            let obj = packfile.get(id).unwrap();
            assert_eq!(obj.bytes(), &content[..]);
        }
    }

    #[test]
    fn ref_delta_option_emits_base_ids() {
        let objects = versions(3);
        let (store, ids) = store_with(&objects);
        let encoder = Encoder::new(&store, ALGO).with_options(EncodeOptions {
            ofs_deltas: false,
            ..EncodeOptions::default()
        });

        let mut pack = Vec::new();
        encoder.encode(&ids, &mut pack).unwrap();

        let mut scanner = Scanner::from_reader(&pack[..]);
        scanner.read_header().unwrap();
        let mut saw_ref_delta = false;
        for _ in 0..3 {
            let header = scanner.next_object_header().unwrap();
            assert_ne!(header.disk_type, ObjectType::OfsDelta);
            if header.disk_type == ObjectType::RefDelta {
                saw_ref_delta = true;
                assert!(header.base_id.is_some());
            }
        }
        assert!(saw_ref_delta);
    }

    #[test]
    fn encoding_is_deterministic() {
        let objects = versions(6);
        let (store, ids) = store_with(&objects);
        let encoder = Encoder::new(&store, ALGO);

        let mut a = Vec::new();
        let mut b = Vec::new();
        encoder.encode(&ids, &mut a).unwrap();
        encoder.encode(&ids, &mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_object_fails_encode() {
        let (store, _) = store_with(&versions(1));
        let ghost = ObjectId::from_hex("000000000000000000000000000000000000beef").unwrap();
        let encoder = Encoder::new(&store, ALGO);
        let err = encoder.encode(&[ghost], &mut Vec::new()).unwrap_err();
        assert!(matches!(err, PackError::ObjectNotFound(id) if id == ghost));
    }

    #[test]
    fn empty_id_list_writes_wellformed_empty_pack() {
        let (store, _) = store_with(&[]);
        let encoder = Encoder::new(&store, ALGO);
        let mut pack = Vec::new();
        let result = encoder.encode(&[], &mut pack).unwrap();
        assert!(result.entries.is_empty());

        let mut scanner = Scanner::from_reader(&pack[..]);
        let (version, count) = scanner.read_header().unwrap();
        assert_eq!(version, 2);
        assert_eq!(count, 0);
        assert_eq!(scanner.footer().unwrap(), result.checksum);
    }

    #[test]
    fn dissimilar_objects_stay_whole() {
        // Objects with nothing in common must not be force-deltified.
        let objects: Vec<(ObjectType, Vec<u8>)> = (0..4u32)
            .map(|i| {
                // Distinct LCG streams share no 16-byte block.
                let mut state = 0x9e37_79b9u32.wrapping_add(i.wrapping_mul(0x85eb_ca6b));
                let content: Vec<u8> = (0..600)
                    .map(|_| {
                        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                        (state >> 24) as u8
                    })
                    .collect();
                (ObjectType::Blob, content)
            })
            .collect();
        let (store, ids) = store_with(&objects);
        let encoder = Encoder::new(&store, ALGO);

        let mut pack = Vec::new();
        encoder.encode(&ids, &mut pack).unwrap();

        let mut scanner = Scanner::from_reader(&pack[..]);
        scanner.read_header().unwrap();
        for _ in 0..4 {
            assert!(!scanner.next_object_header().unwrap().is_delta());
        }
    }
}
