//! Staged access to the animation blob.
//!
//! The blob is treated as remote memory: nothing reads it in place. Bytes are
//! copied into small local buffers first, either immediately with
//! [`LocalStore::fetch`] or as a tagged [`Batch`] of transfers that all land at
//! a single barrier. A batch holds the mutable borrow of every destination
//! buffer until it is joined, so a buffer can't be read before its data arrives.

use std::io::{self, Read, Seek, SeekFrom};
use std::ops::BitOr;

use binrw::io::Cursor;
use binrw::{BinRead, Endian};
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::error::{DecodeError, Result};

/// Largest fixed-size record staged through [`LocalStore::read`].
const MAX_RECORD_SIZE: usize = 64;

/// Read-only storage holding an animation blob.
pub trait RemoteSource: Send + Sync {
    fn size(&self) -> usize;

    /// Copy `dst.len()` bytes starting at `offset`. The range has already been
    /// bounds checked against [`RemoteSource::size`].
    fn copy_to(&self, offset: usize, dst: &mut [u8]) -> io::Result<()>;
}

impl RemoteSource for [u8] {
    fn size(&self) -> usize {
        self.len()
    }

    fn copy_to(&self, offset: usize, dst: &mut [u8]) -> io::Result<()> {
        let src = self
            .get(offset..offset + dst.len())
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

impl RemoteSource for Vec<u8> {
    fn size(&self) -> usize {
        self.len()
    }

    fn copy_to(&self, offset: usize, dst: &mut [u8]) -> io::Result<()> {
        self.as_slice().copy_to(offset, dst)
    }
}

/// A blob behind any seekable reader, e.g. an open file. Transfers from
/// concurrent decoders are serialised on the reader.
#[derive(Debug)]
pub struct SeekSource<R> {
    reader: Mutex<R>,
    size: usize,
}

impl<R: Read + Seek> SeekSource<R> {
    pub fn new(mut reader: R) -> io::Result<Self> {
        let size = reader.seek(SeekFrom::End(0))? as usize;
        Ok(Self {
            reader: Mutex::new(reader),
            size,
        })
    }
}

impl<R: Read + Seek + Send> RemoteSource for SeekSource<R> {
    fn size(&self) -> usize {
        self.size
    }

    fn copy_to(&self, offset: usize, dst: &mut [u8]) -> io::Result<()> {
        let mut reader = self.reader.lock();
        reader.seek(SeekFrom::Start(offset as u64))?;
        reader.read_exact(dst)
    }
}

/// An animation blob and the byte order of its records.
#[derive(Debug)]
pub struct AnimBlob<S: ?Sized> {
    endian: Endian,
    source: S,
}

impl<S: RemoteSource> AnimBlob<S> {
    pub fn new(source: S, endian: Endian) -> Self {
        Self { endian, source }
    }

    pub fn little(source: S) -> Self {
        Self::new(source, Endian::Little)
    }
}

impl<S: RemoteSource + ?Sized> AnimBlob<S> {
    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn size(&self) -> usize {
        self.source.size()
    }
}

/// Identifies a group of outstanding transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag(u8);

impl Tag {
    pub const ANIM: Self = Self(0);
    pub const NEXT_FRAME: Self = Self(1);
    pub const BONE_FLAGS: Self = Self(2);
    pub const ZEROFRAME: Self = Self(3);

    /// Tags are bit positions in a [`TagSet`], so only 0..32 are valid.
    pub const fn new(id: u8) -> Self {
        assert!(id < 32);
        Self(id)
    }

    const fn bit(self) -> u32 {
        1 << self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TagSet(u32);

impl TagSet {
    pub const ALL: Self = Self(u32::MAX);
    pub const EMPTY: Self = Self(0);

    pub const fn contains(self, tag: Tag) -> bool {
        self.0 & tag.bit() != 0
    }
}

impl From<Tag> for TagSet {
    fn from(tag: Tag) -> Self {
        Self(tag.bit())
    }
}

impl BitOr for TagSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOr for Tag {
    type Output = TagSet;

    fn bitor(self, rhs: Self) -> TagSet {
        TagSet::from(self) | TagSet::from(rhs)
    }
}

/// A fixed-size on-disk record that can be staged and parsed in one step.
pub trait Record: for<'a> BinRead<Args<'a> = ()> {
    const SIZE: usize;

    fn parse(bytes: &[u8], endian: Endian) -> Result<Self> {
        Ok(Self::read_options(&mut Cursor::new(bytes), endian, ())?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub transfers: usize,
    pub bytes: usize,
    pub barriers: usize,
}

/// Per-worker view of a blob. Owns the transfer ledger for one decode context.
#[derive(Debug)]
pub struct LocalStore<'a, S: ?Sized> {
    blob: &'a AnimBlob<S>,
    stats: TransferStats,
}

impl<'a, S: RemoteSource + ?Sized> LocalStore<'a, S> {
    pub fn new(blob: &'a AnimBlob<S>) -> Self {
        Self {
            blob,
            stats: TransferStats::default(),
        }
    }

    pub fn endian(&self) -> Endian {
        self.blob.endian
    }

    pub fn blob_size(&self) -> usize {
        self.blob.size()
    }

    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    fn check(&self, offset: usize, len: usize) -> Result<()> {
        let size = self.blob.size();
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(()),
            _ => Err(DecodeError::OutOfBounds { offset, len, size }),
        }
    }

    fn transfer(&mut self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.check(offset, dst.len())?;
        self.blob
            .source
            .copy_to(offset, dst)
            .map_err(|source| DecodeError::Transfer {
                offset,
                len: dst.len(),
                source,
            })?;
        self.stats.transfers += 1;
        self.stats.bytes += dst.len();
        Ok(())
    }

    /// Copy `dst.len()` bytes at `offset` and wait for them.
    pub fn fetch<'b>(&mut self, offset: usize, dst: &'b mut [u8]) -> Result<&'b [u8]> {
        self.transfer(offset, dst)?;
        self.stats.barriers += 1;
        Ok(dst)
    }

    /// Stage and parse one fixed-size record.
    pub fn read<T: Record>(&mut self, offset: usize) -> Result<T> {
        let mut buf = [0u8; MAX_RECORD_SIZE];
        let endian = self.endian();
        let bytes = self.fetch(offset, &mut buf[..T::SIZE])?;
        T::parse(bytes, endian)
    }

    pub fn batch<'s, 'b>(&'s mut self) -> Batch<'s, 'a, 'b, S> {
        Batch {
            store: self,
            pending: Vec::new(),
        }
    }
}

struct Pending<'b> {
    tag: Tag,
    offset: usize,
    dst: &'b mut [u8],
}

/// Transfers issued together and completed at a barrier.
pub struct Batch<'s, 'a, 'b, S: RemoteSource + ?Sized> {
    store: &'s mut LocalStore<'a, S>,
    pending: Vec<Pending<'b>>,
}

impl<'b, S: RemoteSource + ?Sized> Batch<'_, '_, 'b, S> {
    /// Issue a transfer under `tag`. The range is validated now, the copy
    /// happens at the next barrier covering `tag`.
    pub fn fetch(&mut self, tag: Tag, offset: usize, dst: &'b mut [u8]) -> Result<()> {
        self.store.check(offset, dst.len())?;
        self.pending.push(Pending { tag, offset, dst });
        Ok(())
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Complete every outstanding transfer issued under any tag in `tags`.
    /// Transfers under the same tag land in issue order.
    pub fn sync(&mut self, tags: TagSet) -> Result<()> {
        let mut landed = 0;
        let mut remaining = Vec::with_capacity(self.pending.len());
        for pending in self.pending.drain(..) {
            if tags.contains(pending.tag) {
                self.store.transfer(pending.offset, pending.dst)?;
                landed += 1;
            } else {
                remaining.push(pending);
            }
        }
        self.pending = remaining;
        self.store.stats.barriers += 1;
        trace!(landed, outstanding = self.pending.len(), "staging barrier");
        Ok(())
    }

    /// Wait for every outstanding transfer and release the destination buffers.
    pub fn join(mut self) -> Result<()> {
        self.sync(TagSet::ALL)
    }
}

impl<S: RemoteSource + ?Sized> Drop for Batch<'_, '_, '_, S> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(outstanding = self.pending.len(), "staging batch dropped with transfers pending");
        }
    }
}

/// `base + delta` for a record-relative offset, if it stays non-negative.
pub(crate) fn offset_by(base: usize, delta: i64) -> Option<usize> {
    let target = (base as i64).checked_add(delta)?;
    usize::try_from(target).ok()
}
