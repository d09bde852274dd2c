//! Pack entry headers.
//!
//! Every pack entry starts with a type+size varint, optionally followed
//! by a delta base reference: ofs-deltas store a negative byte distance
//! to their base within the same pack, ref-deltas store the base's full
//! object id. The zlib payload follows immediately after.

use std::io::Read;

use odb_hash::{HashAlgorithm, ObjectId};
use odb_object::ObjectType;

use crate::{varint, PackError};

/// Metadata for one pack entry.
///
/// `disk_type` is the type as stored; for deltas the resolved concrete
/// type only becomes known after the chain is walked. `crc32` and `id`
/// are filled in once the payload has been read and decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Offset of the entry's first header byte in the pack.
    pub offset: u64,
    /// Offset of the zlib payload (header and base reference skipped).
    pub content_offset: u64,
    /// Type as stored on disk (possibly a delta type).
    pub disk_type: ObjectType,
    /// Inflated payload size in bytes.
    pub size: u64,
    /// Base object id (ref-deltas only).
    pub base_id: Option<ObjectId>,
    /// Absolute base offset, computed as `offset - stored_distance`
    /// (ofs-deltas only).
    pub base_offset: Option<u64>,
    /// CRC-32 of the entry's on-disk bytes; 0 until the payload has
    /// been scanned.
    pub crc32: u32,
    /// Resolved object id; populated after decoding.
    pub id: Option<ObjectId>,
    /// True for a ref-delta whose base lives outside this pack.
    pub external_ref: bool,
}

impl ObjectHeader {
    /// Whether this entry is stored as a delta.
    pub fn is_delta(&self) -> bool {
        self.disk_type.is_delta()
    }

    /// Size of the on-disk header (varint plus base reference).
    pub fn header_len(&self) -> u64 {
        self.content_offset - self.offset
    }
}

struct CountingReader<'a, R: ?Sized> {
    inner: &'a mut R,
    read: u64,
}

impl<R: Read + ?Sized> Read for CountingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read += n as u64;
        Ok(n)
    }
}

/// Read one entry header from `r`, which must be positioned at
/// `entry_offset` in the pack.
pub fn read_header<R: Read + ?Sized>(
    r: &mut R,
    entry_offset: u64,
    algo: HashAlgorithm,
) -> Result<ObjectHeader, PackError> {
    let mut counted = CountingReader {
        inner: r,
        read: 0,
    };

    let (type_code, size) = varint::read_entry_header(&mut counted)?;
    let disk_type = ObjectType::from_code(type_code)
        .map_err(|_| PackError::MalformedPack(format!("invalid object type code {type_code}")))?;

    let mut base_id = None;
    let mut base_offset = None;
    match disk_type {
        ObjectType::OfsDelta => {
            let distance = varint::read_ofs_offset(&mut counted)?;
            if distance == 0 || distance > entry_offset {
                return Err(PackError::MalformedPack(format!(
                    "ofs-delta at {entry_offset} has invalid base distance {distance}"
                )));
            }
            base_offset = Some(entry_offset - distance);
        }
        ObjectType::RefDelta => {
            let mut bytes = vec![0u8; algo.digest_len()];
            counted.read_exact(&mut bytes).map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    PackError::MalformedPack("truncated ref-delta base id".into())
                } else {
                    PackError::Io(e)
                }
            })?;
            base_id = Some(ObjectId::from_bytes(&bytes, algo)?);
        }
        _ => {}
    }

    Ok(ObjectHeader {
        offset: entry_offset,
        content_offset: entry_offset + counted.read,
        disk_type,
        size,
        base_id,
        base_offset,
        crc32: 0,
        id: None,
        external_ref: false,
    })
}

/// Parse an entry header out of mapped pack bytes.
///
/// `data` is the whole pack; the header is read at `offset`.
pub fn parse_header_at(
    data: &[u8],
    offset: u64,
    algo: HashAlgorithm,
) -> Result<ObjectHeader, PackError> {
    let start = usize::try_from(offset)
        .ok()
        .filter(|&s| s < data.len())
        .ok_or(PackError::OffsetNotFound(offset))?;
    read_header(&mut &data[start..], offset, algo)
}

/// Encode an entry header (type + size varint only).
///
/// The caller appends the base reference for delta entries.
pub fn encode_header(disk_type: ObjectType, size: u64) -> Vec<u8> {
    varint::write_entry_header(disk_type.code(), size)
}
