//! Pack index (v2): id → offset lookup, reading and writing.
//!
//! Layout:
//!
//! ```text
//! Header:  \xff t O c | version (4 bytes, = 2)
//! Fanout:  256 × 4-byte big-endian cumulative counts
//! Ids:     N × digest-size, sorted ascending
//! CRC32:   N × 4 bytes
//! Offsets: N × 4 bytes (MSB set ⇒ low 31 bits index the 64-bit table)
//! 64-bit:  K × 8 bytes (offsets ≥ 2³¹)
//! Trailer: pack checksum | index self-checksum (digest-size each)
//! ```
//!
//! The index is held fully in memory: packs small enough to need this
//! crate's random-access path have indexes in the tens of megabytes at
//! worst, and an in-memory form keeps the writer symmetric with the
//! reader.

use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;

use odb_hash::fanout::FanoutTable;
use odb_hash::hasher::Hasher;
use odb_hash::{HashAlgorithm, ObjectId};

use crate::{PackError, IDX_SIGNATURE, IDX_VERSION};

const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;

/// One index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: ObjectId,
    pub offset: u64,
    pub crc32: u32,
}

/// An in-memory pack index.
#[derive(Debug)]
pub struct PackIndex {
    algo: HashAlgorithm,
    fanout: FanoutTable,
    oids: Vec<ObjectId>,
    crcs: Vec<u32>,
    offsets: Vec<u64>,
    pack_checksum: ObjectId,
    idx_checksum: ObjectId,
    /// Entry positions sorted by pack offset; built on first reverse
    /// lookup.
    by_offset: OnceLock<Vec<u32>>,
}

impl PackIndex {
    /// Parse an index from its file bytes.
    pub fn parse(data: &[u8], algo: HashAlgorithm) -> Result<Self, PackError> {
        let hash_len = algo.digest_len();
        let min_len = 8 + 1024 + 2 * hash_len;
        if data.len() < min_len {
            return Err(PackError::CorruptIdx("truncated index file".into()));
        }

        if data[0..4] != IDX_SIGNATURE {
            return Err(PackError::BadSignature { what: "pack index" });
        }
        let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if version != IDX_VERSION {
            return Err(PackError::UnsupportedVersion {
                what: "pack index",
                version,
            });
        }

        let fanout = FanoutTable::from_bytes(&data[8..8 + 1024])
            .map_err(|e| PackError::CorruptIdx(e.to_string()))?;
        let count = fanout.total() as usize;

        let oid_start = 8 + 1024;
        let crc_start = oid_start + count * hash_len;
        let off_start = crc_start + count * 4;
        let off64_start = off_start + count * 4;
        if data.len() < off64_start + 2 * hash_len {
            return Err(PackError::CorruptIdx("truncated index file".into()));
        }
        let off64_len = data.len() - 2 * hash_len - off64_start;

        let mut oids = Vec::with_capacity(count);
        for i in 0..count {
            let start = oid_start + i * hash_len;
            let oid = ObjectId::from_bytes(&data[start..start + hash_len], algo)?;
            if let Some(prev) = oids.last() {
                if *prev >= oid {
                    return Err(PackError::CorruptIdx(format!(
                        "ids not strictly ascending at entry {i}"
                    )));
                }
            }
            if !fanout.range(oid.first_byte()).contains(&i) {
                return Err(PackError::CorruptIdx(format!(
                    "fan-out table disagrees with id at entry {i}"
                )));
            }
            oids.push(oid);
        }

        let mut crcs = Vec::with_capacity(count);
        for i in 0..count {
            let start = crc_start + i * 4;
            crcs.push(u32::from_be_bytes([
                data[start],
                data[start + 1],
                data[start + 2],
                data[start + 3],
            ]));
        }

        let mut offsets = Vec::with_capacity(count);
        for i in 0..count {
            let start = off_start + i * 4;
            let slot = u32::from_be_bytes([
                data[start],
                data[start + 1],
                data[start + 2],
                data[start + 3],
            ]);
            if slot & LARGE_OFFSET_FLAG != 0 {
                let pos = (slot & !LARGE_OFFSET_FLAG) as usize * 8;
                if pos + 8 > off64_len {
                    return Err(PackError::CorruptIdx(format!(
                        "64-bit offset table index out of range at entry {i}"
                    )));
                }
                let start64 = off64_start + pos;
                offsets.push(u64::from_be_bytes(
                    data[start64..start64 + 8].try_into().expect("8 bytes"),
                ));
            } else {
                offsets.push(slot as u64);
            }
        }

        let trailer = data.len() - 2 * hash_len;
        let pack_checksum = ObjectId::from_bytes(&data[trailer..trailer + hash_len], algo)?;
        let idx_checksum = ObjectId::from_bytes(&data[trailer + hash_len..], algo)?;

        let mut hasher = Hasher::new(algo);
        hasher.update(&data[..trailer + hash_len]);
        let actual = hasher.finalize()?;
        if actual != idx_checksum {
            return Err(PackError::ChecksumMismatch {
                expected: idx_checksum,
                actual,
            });
        }

        Ok(Self {
            algo,
            fanout,
            oids,
            crcs,
            offsets,
            pack_checksum,
            idx_checksum,
            by_offset: OnceLock::new(),
        })
    }

    /// Open and parse an index file.
    pub fn open(path: impl AsRef<Path>, algo: HashAlgorithm) -> Result<Self, PackError> {
        let data = std::fs::read(path)?;
        Self::parse(&data, algo)
    }

    /// Build an index from raw entries and the pack's checksum.
    ///
    /// Sorts by id and computes the fan-out table and self-checksum.
    pub fn from_entries(
        algo: HashAlgorithm,
        mut entries: Vec<IndexEntry>,
        pack_checksum: ObjectId,
    ) -> Result<Self, PackError> {
        entries.sort_by_key(|e| e.id);
        for pair in entries.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(PackError::CorruptIdx(format!(
                    "duplicate id {} in index entries",
                    pair[0].id
                )));
            }
        }

        let oids: Vec<ObjectId> = entries.iter().map(|e| e.id).collect();
        let crcs: Vec<u32> = entries.iter().map(|e| e.crc32).collect();
        let offsets: Vec<u64> = entries.iter().map(|e| e.offset).collect();
        let fanout = FanoutTable::build(&oids);

        let mut index = Self {
            algo,
            fanout,
            oids,
            crcs,
            offsets,
            pack_checksum,
            idx_checksum: algo.null_oid(),
            by_offset: OnceLock::new(),
        };

        let mut hasher = Hasher::new(algo);
        index.serialize_body(&mut hasher)?;
        index.idx_checksum = hasher.finalize()?;
        Ok(index)
    }

    /// Number of objects.
    pub fn count(&self) -> u32 {
        self.oids.len() as u32
    }

    /// The digest algorithm in use.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algo
    }

    /// Look up the pack offset of an id.
    pub fn find_offset(&self, id: &ObjectId) -> Option<u64> {
        let range = self.fanout.range(id.first_byte());
        let pos = self.oids[range.clone()].binary_search(id).ok()?;
        Some(self.offsets[range.start + pos])
    }

    /// Reverse lookup: the id of the entry at a pack offset.
    ///
    /// The offset permutation is built on first use and cached.
    pub fn find_hash(&self, offset: u64) -> Option<ObjectId> {
        let perm = self.offset_permutation();
        let pos = perm
            .binary_search_by_key(&offset, |&i| self.offsets[i as usize])
            .ok()?;
        Some(self.oids[perm[pos] as usize])
    }

    /// The id at a sorted index position.
    pub fn oid_at(&self, pos: u32) -> ObjectId {
        self.oids[pos as usize]
    }

    /// The pack offset at a sorted index position.
    pub fn offset_at(&self, pos: u32) -> u64 {
        self.offsets[pos as usize]
    }

    /// The entry CRC-32 at a sorted index position.
    pub fn crc32_at(&self, pos: u32) -> u32 {
        self.crcs[pos as usize]
    }

    /// The CRC-32 recorded for an id.
    pub fn find_crc32(&self, id: &ObjectId) -> Option<u32> {
        let range = self.fanout.range(id.first_byte());
        let pos = self.oids[range.clone()].binary_search(id).ok()?;
        Some(self.crcs[range.start + pos])
    }

    /// Whether an id is present.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.find_offset(id).is_some()
    }

    /// The pack checksum recorded in the trailer.
    pub fn pack_checksum(&self) -> ObjectId {
        self.pack_checksum
    }

    /// The index's own trailing checksum.
    pub fn idx_checksum(&self) -> ObjectId {
        self.idx_checksum
    }

    /// Iterate entries in id order.
    pub fn entries(&self) -> impl ExactSizeIterator<Item = IndexEntry> + '_ {
        (0..self.count()).map(|i| IndexEntry {
            id: self.oid_at(i),
            offset: self.offset_at(i),
            crc32: self.crc32_at(i),
        })
    }

    /// Iterate entries in pack-offset order.
    pub fn entries_by_offset(&self) -> impl ExactSizeIterator<Item = IndexEntry> + '_ {
        self.offset_permutation().iter().map(|&i| IndexEntry {
            id: self.oid_at(i),
            offset: self.offset_at(i),
            crc32: self.crc32_at(i),
        })
    }

    /// Serialize to the canonical v2 layout, returning the self-checksum.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<ObjectId, PackError> {
        let mut hasher = Hasher::new(self.algo);
        let mut tee = TeeWriter { a: w, b: &mut hasher };
        self.serialize_body(&mut tee)?;
        let checksum = hasher.finalize()?;
        w.write_all(checksum.as_bytes())?;
        Ok(checksum)
    }

    /// Everything except the trailing self-checksum.
    fn serialize_body<W: Write>(&self, w: &mut W) -> Result<(), PackError> {
        w.write_all(&IDX_SIGNATURE)?;
        w.write_all(&IDX_VERSION.to_be_bytes())?;
        w.write_all(&self.fanout.to_bytes())?;
        for oid in &self.oids {
            w.write_all(oid.as_bytes())?;
        }
        for crc in &self.crcs {
            w.write_all(&crc.to_be_bytes())?;
        }
        let mut large: Vec<u64> = Vec::new();
        for &offset in &self.offsets {
            if offset >= LARGE_OFFSET_FLAG as u64 {
                w.write_all(&(LARGE_OFFSET_FLAG | large.len() as u32).to_be_bytes())?;
                large.push(offset);
            } else {
                w.write_all(&(offset as u32).to_be_bytes())?;
            }
        }
        for offset in large {
            w.write_all(&offset.to_be_bytes())?;
        }
        w.write_all(self.pack_checksum.as_bytes())?;
        Ok(())
    }

    fn offset_permutation(&self) -> &[u32] {
        self.by_offset.get_or_init(|| {
            let mut perm: Vec<u32> = (0..self.count()).collect();
            perm.sort_by_key(|&i| self.offsets[i as usize]);
            perm
        })
    }
}

struct TeeWriter<'a, A: Write, B: Write> {
    a: &'a mut A,
    b: &'a mut B,
}

impl<A: Write, B: Write> Write for TeeWriter<'_, A, B> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.a.write_all(buf)?;
        self.b.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

/// Accumulates index entries as a pack is scanned, then builds the
/// index.
///
/// Registered as a parser observer it produces the `.idx` for a pack
/// being ingested; the encoder uses it directly with the entries it
/// emitted.
pub struct PackIndexWriter {
    algo: HashAlgorithm,
    entries: Vec<IndexEntry>,
    pack_checksum: Option<ObjectId>,
}

impl PackIndexWriter {
    pub fn new(algo: HashAlgorithm) -> Self {
        Self {
            algo,
            entries: Vec::new(),
            pack_checksum: None,
        }
    }

    /// Record one entry.
    pub fn add(&mut self, id: ObjectId, offset: u64, crc32: u32) {
        self.entries.push(IndexEntry { id, offset, crc32 });
    }

    /// Record the pack checksum for the trailer.
    pub fn set_pack_checksum(&mut self, checksum: ObjectId) {
        self.pack_checksum = Some(checksum);
    }

    /// Build the finished index.
    pub fn finish(self) -> Result<PackIndex, PackError> {
        let pack_checksum = self.pack_checksum.ok_or_else(|| {
            PackError::CorruptIdx("pack checksum not recorded before finish".into())
        })?;
        PackIndex::from_entries(self.algo, self.entries, pack_checksum)
    }
}

/// Registered on a [`Parser`](crate::parser::Parser), the writer picks
/// up every decoded entry and the trailing pack hash, ready to `finish`
/// once parsing succeeds.
impl crate::parser::Observer for PackIndexWriter {
    fn on_inflated_object_content(
        &mut self,
        id: &ObjectId,
        pos: u64,
        crc32: u32,
        _content: &[u8],
    ) -> Result<(), PackError> {
        self.add(*id, pos, crc32);
        Ok(())
    }

    fn on_footer(&mut self, checksum: ObjectId) -> Result<(), PackError> {
        self.set_pack_checksum(checksum);
        Ok(())
    }
}
