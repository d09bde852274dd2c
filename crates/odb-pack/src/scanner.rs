//! Sequential pack scanner.
//!
//! Walks the pack wire layout section by section: the 12-byte header,
//! then each object entry (header varint, optional delta base
//! reference, zlib payload), then the trailing content hash. The
//! scanner runs two digests while it reads: a CRC-32 over each entry's
//! on-disk bytes (reset per entry) and the pack content hash over
//! everything before the trailer. A sequential scan that reaches the
//! footer therefore verifies the pack for free.
//!
//! Payloads are pulled through a pooled inflater; the only per-object
//! allocation is whatever the caller's writer does.

use std::io::{BufRead, Read, Seek, SeekFrom, Write};

use odb_hash::hasher::Hasher;
use odb_hash::{HashAlgorithm, ObjectId};

use crate::entry::{read_header as read_entry_header, ObjectHeader};
use crate::{zlib, PackError, PACK_SIGNATURE, PACK_VERSION};

/// A pack byte source: always sequential, sometimes seekable.
pub trait PackSource: Read {
    /// Reposition to an absolute pack offset.
    fn seek_to(&mut self, _offset: u64) -> Result<u64, PackError> {
        Err(PackError::SeekNotSupported)
    }

    fn is_seekable(&self) -> bool {
        false
    }
}

/// A forward-only source (network stream, pipe).
pub struct StreamSource<R: Read>(pub R);

impl<R: Read> Read for StreamSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read> PackSource for StreamSource<R> {}

/// A random-access source (file, in-memory buffer).
pub struct SeekSource<R: Read + Seek>(pub R);

impl<R: Read + Seek> Read for SeekSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read + Seek> PackSource for SeekSource<R> {
    fn seek_to(&mut self, offset: u64) -> Result<u64, PackError> {
        Ok(self.0.seek(SeekFrom::Start(offset))?)
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

const INPUT_BUF_SIZE: usize = 64 * 1024;

/// Buffered reader that tracks its pack offset and feeds every consumed
/// byte into the running pack hash and the per-entry CRC.
struct InputReader<S> {
    src: S,
    buf: Box<[u8]>,
    pos: usize,
    cap: usize,
    offset: u64,
    hasher: Option<Hasher>,
    hash_valid: bool,
    crc: crc32fast::Hasher,
}

impl<S: PackSource> InputReader<S> {
    fn new(src: S, algo: HashAlgorithm) -> Self {
        Self {
            src,
            buf: vec![0u8; INPUT_BUF_SIZE].into_boxed_slice(),
            pos: 0,
            cap: 0,
            offset: 0,
            hasher: Some(Hasher::new(algo)),
            hash_valid: true,
            crc: crc32fast::Hasher::new(),
        }
    }

    fn begin_entry(&mut self) {
        self.crc = crc32fast::Hasher::new();
    }

    fn entry_crc(&self) -> u32 {
        self.crc.clone().finalize()
    }

    /// Finalize the running pack hash. Returns `None` when a seek made
    /// the sequential hash meaningless.
    fn finish_hash(&mut self) -> Result<Option<ObjectId>, PackError> {
        let hasher = self.hasher.take();
        if !self.hash_valid {
            return Ok(None);
        }
        match hasher {
            Some(h) => Ok(Some(h.finalize()?)),
            None => Ok(None),
        }
    }

    fn seek_to(&mut self, offset: u64) -> Result<(), PackError> {
        self.src.seek_to(offset)?;
        self.pos = 0;
        self.cap = 0;
        self.offset = offset;
        // A random repositioning breaks the byte-for-byte trailer hash.
        self.hash_valid = false;
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        self.src.is_seekable()
    }
}

impl<S: PackSource> BufRead for InputReader<S> {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        if self.pos >= self.cap {
            self.cap = self.src.read(&mut self.buf)?;
            self.pos = 0;
        }
        Ok(&self.buf[self.pos..self.cap])
    }

    fn consume(&mut self, amt: usize) {
        let consumed = &self.buf[self.pos..self.pos + amt];
        if let Some(hasher) = &mut self.hasher {
            hasher.update(consumed);
        }
        self.crc.update(consumed);
        self.pos += amt;
        self.offset += amt as u64;
    }
}

impl<S: PackSource> Read for InputReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

/// One scanned piece of the pack.
#[derive(Debug)]
pub enum Section {
    /// The 12-byte pack header.
    Header { version: u32, objects: u32 },
    /// One object entry. The payload has not been read yet; it is
    /// skipped automatically if the caller moves on.
    Object(ObjectHeader),
    /// The trailing pack hash, verified against the running digest on
    /// sequential scans.
    Footer { id: ObjectId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Objects,
    Trailer,
    Done,
}

/// Sequential pack reader.
pub struct Scanner<S: PackSource> {
    input: InputReader<S>,
    algo: HashAlgorithm,
    state: State,
    version: u32,
    objects_total: u32,
    objects_seen: u32,
    pending: Option<u64>,
}

impl<R: Read> Scanner<StreamSource<R>> {
    /// Scan a forward-only byte stream (SHA-1 repository).
    pub fn from_reader(r: R) -> Self {
        Self::new(StreamSource(r), HashAlgorithm::Sha1)
    }
}

impl<R: Read + Seek> Scanner<SeekSource<R>> {
    /// Scan a seekable source (SHA-1 repository).
    pub fn from_seekable(r: R) -> Self {
        Self::new(SeekSource(r), HashAlgorithm::Sha1)
    }
}

impl<S: PackSource> Scanner<S> {
    /// Scan an arbitrary source with an explicit id algorithm.
    pub fn new(src: S, algo: HashAlgorithm) -> Self {
        Self {
            input: InputReader::new(src, algo),
            algo,
            state: State::Header,
            version: 0,
            objects_total: 0,
            objects_seen: 0,
            pending: None,
        }
    }

    /// Parse the pack header: magic, version (must be 2), object count.
    ///
    /// Called implicitly by the other entry points.
    pub fn read_header(&mut self) -> Result<(u32, u32), PackError> {
        if self.state != State::Header {
            return Ok((self.version, self.objects_total));
        }

        let mut magic = [0u8; 4];
        let mut first = [0u8; 1];
        match self.input.read(&mut first)? {
            0 => return Err(PackError::EmptyPack),
            _ => magic[0] = first[0],
        }
        self.input.read_exact(&mut magic[1..]).map_err(truncated)?;
        if &magic != PACK_SIGNATURE {
            return Err(PackError::BadSignature { what: "pack" });
        }

        let mut word = [0u8; 4];
        self.input.read_exact(&mut word).map_err(truncated)?;
        let version = u32::from_be_bytes(word);
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedVersion { what: "pack", version });
        }

        self.input.read_exact(&mut word).map_err(truncated)?;
        self.version = version;
        self.objects_total = u32::from_be_bytes(word);
        self.state = State::Objects;
        self.maybe_enter_trailer();
        Ok((self.version, self.objects_total))
    }

    /// Declared object count.
    pub fn object_count(&mut self) -> Result<u32, PackError> {
        self.read_header()?;
        Ok(self.objects_total)
    }

    /// Pack format version.
    pub fn version(&mut self) -> Result<u32, PackError> {
        self.read_header()?;
        Ok(self.version)
    }

    pub fn is_seekable(&self) -> bool {
        self.input.is_seekable()
    }

    /// Read the next entry's header without its payload.
    ///
    /// If the previous entry's payload was never streamed it is
    /// discarded first, so headers can be read back to back.
    pub fn next_object_header(&mut self) -> Result<ObjectHeader, PackError> {
        self.read_header()?;
        self.discard_pending()?;
        if self.state != State::Objects {
            return Err(PackError::MalformedPack(
                "no object entries remaining".into(),
            ));
        }

        self.input.begin_entry();
        let offset = self.input.offset;
        let header = read_entry_header(&mut self.input, offset, self.algo)?;
        self.pending = Some(header.size);
        self.objects_seen += 1;
        Ok(header)
    }

    /// Stream the current entry's inflated payload into `w`.
    ///
    /// Returns the byte count written and the CRC-32 of the entry's
    /// on-disk bytes (header, base reference, compressed payload).
    pub fn stream_object<W: Write + ?Sized>(&mut self, w: &mut W) -> Result<(u64, u32), PackError> {
        let size = self.pending.take().ok_or_else(|| {
            PackError::MalformedPack("no object payload pending".into())
        })?;
        let mut inflater = zlib::inflater();
        let written = inflater.inflate_to_writer(&mut self.input, size, w)?;
        let crc = self.input.entry_crc();
        self.maybe_enter_trailer();
        Ok((written, crc))
    }

    /// Read the trailer and finish the scan.
    ///
    /// On a sequential scan the stored checksum must equal the running
    /// content hash. After a seek the running hash is meaningless and
    /// only the stored value is returned.
    pub fn footer(&mut self) -> Result<ObjectId, PackError> {
        self.read_header()?;
        self.discard_pending()?;
        if self.state == State::Objects && self.objects_seen < self.objects_total {
            return Err(PackError::MalformedPack(format!(
                "footer requested with {} of {} objects unscanned",
                self.objects_total - self.objects_seen,
                self.objects_total
            )));
        }
        if self.state == State::Done {
            return Err(PackError::MalformedPack("pack already fully scanned".into()));
        }

        let computed = self.input.finish_hash()?;
        let mut stored = vec![0u8; self.algo.digest_len()];
        self.input.read_exact(&mut stored).map_err(truncated)?;
        let stored = ObjectId::from_bytes(&stored, self.algo)?;

        if let Some(actual) = computed {
            if actual != stored {
                return Err(PackError::ChecksumMismatch {
                    expected: stored,
                    actual,
                });
            }
        }
        self.state = State::Done;
        Ok(stored)
    }

    /// Advance to the next section boundary.
    ///
    /// Yields `Header` once, then one `Object` per entry (skipping any
    /// unread payloads), then `Footer`, then `None`.
    pub fn scan(&mut self) -> Result<Option<Section>, PackError> {
        // Skipping the previous payload may reveal the trailer.
        if self.state == State::Objects {
            self.discard_pending()?;
        }
        match self.state {
            State::Header => {
                let (version, objects) = self.read_header()?;
                Ok(Some(Section::Header { version, objects }))
            }
            State::Objects => Ok(Some(Section::Object(self.next_object_header()?))),
            State::Trailer => Ok(Some(Section::Footer { id: self.footer()? })),
            State::Done => Ok(None),
        }
    }

    /// Reposition to an entry offset (seekable sources only).
    ///
    /// Resets the per-scan bookkeeping; the footer's running-hash check
    /// is disabled for the rest of this scanner's life.
    pub fn seek_to(&mut self, offset: u64) -> Result<(), PackError> {
        self.read_header()?;
        self.input.seek_to(offset)?;
        self.pending = None;
        self.objects_seen = 0;
        self.state = State::Objects;
        Ok(())
    }

    /// Current absolute offset in the pack.
    pub fn offset(&self) -> u64 {
        self.input.offset
    }

    fn discard_pending(&mut self) -> Result<(), PackError> {
        if self.pending.is_some() {
            self.stream_object(&mut std::io::sink())?;
        }
        Ok(())
    }

    fn maybe_enter_trailer(&mut self) {
        if self.state == State::Objects
            && self.objects_seen == self.objects_total
            && self.pending.is_none()
        {
            self.state = State::Trailer;
        }
    }
}

fn truncated(e: std::io::Error) -> PackError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        PackError::MalformedPack("truncated pack".into())
    } else {
        PackError::Io(e)
    }
}
