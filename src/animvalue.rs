//! Run-length compressed per-axis curves.
//!
//! A stream is a list of 16-bit slots. Each block starts with a header slot
//! (`valid`, `total`) followed by `valid` sample slots; the block covers
//! `total` frames and frames past the last explicit sample hold it.

use binrw::binrw;

use crate::error::{DecodeError, Result};
use crate::math::Vec3;
use crate::staging::{offset_by, LocalStore, Record, RemoteSource, Tag};

const SLOT_SIZE: usize = 2;

impl Record for i16 {
    const SIZE: usize = 2;
}

#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockHeader {
    valid: u8,
    total: u8,
}

impl Record for BlockHeader {
    const SIZE: usize = 2;
}

impl BlockHeader {
    fn is_constant(&self) -> bool {
        self.total == 1 && self.valid == 1
    }
}

/// One block of a stream, used when authoring streams.
#[binrw]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimValueBlock {
    #[br(temp)]
    #[bw(calc = values.len() as u8)]
    valid: u8,
    pub total: u8,
    #[br(count = valid)]
    pub values: Vec<i16>,
}

impl AnimValueBlock {
    /// Split raw samples into blocks of at most 255 frames, dropping the
    /// trailing run of repeats in each block.
    pub fn compress(samples: &[i16]) -> Vec<Self> {
        samples
            .chunks(u8::MAX as usize)
            .map(|chunk| {
                let last = chunk[chunk.len() - 1];
                let valid = chunk.iter().rposition(|&v| v != last).map_or(1, |i| i + 2);
                Self {
                    total: chunk.len() as u8,
                    values: chunk[..valid].to_vec(),
                }
            })
            .collect()
    }
}

/// A curve starting at a blob offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimValueStream {
    offset: usize,
}

impl AnimValueStream {
    pub fn new(offset: usize) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    fn slot(block: usize, slot: u32) -> usize {
        block + slot as usize * SLOT_SIZE
    }

    fn header<S: RemoteSource + ?Sized>(store: &mut LocalStore<S>, offset: usize, frame: u32) -> Result<BlockHeader> {
        let header: BlockHeader = store.read(offset)?;
        if header.total == 0 {
            return Err(DecodeError::StreamExhausted { offset, frame });
        }
        if header.valid == 0 || header.valid > header.total {
            return Err(DecodeError::MalformedBlock {
                offset,
                valid: header.valid,
                total: header.total,
            });
        }
        Ok(header)
    }

    /// Walk to the block holding `frame`. Returns its offset, header and the
    /// frame relative to the block.
    fn locate<S: RemoteSource + ?Sized>(
        &self,
        store: &mut LocalStore<S>,
        first: BlockHeader,
        frame: u32,
    ) -> Result<(usize, BlockHeader, u32)> {
        let mut block = self.offset;
        let mut header = first;
        let mut k = frame;
        while header.total as u32 <= k {
            k -= header.total as u32;
            block = Self::slot(block, header.valid as u32 + 1);
            header = Self::header(store, block, frame)?;
        }
        Ok((block, header, k))
    }

    /// Samples at `frame` and `frame + 1`, scaled.
    pub fn extract<S: RemoteSource + ?Sized>(&self, store: &mut LocalStore<S>, frame: u32, scale: f32) -> Result<(f32, f32)> {
        let first = Self::header(store, self.offset, frame)?;
        if first.is_constant() {
            let v = store.read::<i16>(Self::slot(self.offset, 1))? as f32 * scale;
            return Ok((v, v));
        }

        let (block, header, k) = self.locate(store, first, frame)?;
        let valid = header.valid as u32;
        let total = header.total as u32;
        let v1_slot = if valid > k { k + 1 } else { valid };
        let v2_slot = if valid > k + 1 {
            Some(k + 2)
        } else if total > k + 1 {
            // held until the end of the block
            None
        } else {
            // continues into the next block
            Self::header(store, Self::slot(block, valid + 1), frame)?;
            Some(valid + 2)
        };

        let endian = store.endian();
        let mut raw1 = [0u8; SLOT_SIZE];
        let mut raw2 = [0u8; SLOT_SIZE];
        let mut batch = store.batch();
        batch.fetch(Tag::ANIM, Self::slot(block, v1_slot), &mut raw1)?;
        if let Some(slot) = v2_slot {
            batch.fetch(Tag::NEXT_FRAME, Self::slot(block, slot), &mut raw2)?;
        }
        batch.join()?;

        let v1 = i16::parse(&raw1, endian)? as f32 * scale;
        let v2 = match v2_slot {
            Some(_) => i16::parse(&raw2, endian)? as f32 * scale,
            None => v1,
        };
        Ok((v1, v2))
    }

    /// Sample at `frame`, scaled.
    pub fn extract1<S: RemoteSource + ?Sized>(&self, store: &mut LocalStore<S>, frame: u32, scale: f32) -> Result<f32> {
        let first = Self::header(store, self.offset, frame)?;
        if first.is_constant() {
            return Ok(store.read::<i16>(Self::slot(self.offset, 1))? as f32 * scale);
        }

        let (block, header, k) = self.locate(store, first, frame)?;
        let valid = header.valid as u32;
        let slot = if valid > k { k + 1 } else { valid };
        Ok(store.read::<i16>(Self::slot(block, slot))? as f32 * scale)
    }
}

/// Offsets of the x, y and z curves, relative to the pointer itself.
#[binrw]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnimValuePtr {
    pub offset: [i16; 3],
}

impl Record for AnimValuePtr {
    const SIZE: usize = 6;
}

impl AnimValuePtr {
    /// Curve for `axis` of a pointer stored at `base`, or `None` if the axis
    /// is not animated.
    pub fn stream(&self, base: usize, axis: usize) -> Result<Option<AnimValueStream>> {
        let delta = self.offset[axis];
        if delta <= 0 {
            return Ok(None);
        }
        offset_by(base, delta as i64)
            .map(|offset| Some(AnimValueStream::new(offset)))
            .ok_or(DecodeError::InvalidRecord {
                offset: base,
                reason: "curve offset out of range",
            })
    }

    pub fn extract<S: RemoteSource + ?Sized>(
        &self,
        store: &mut LocalStore<S>,
        base: usize,
        frame: u32,
        scale: &Vec3,
    ) -> Result<(Vec3, Vec3)> {
        let mut v1 = Vec3::zeros();
        let mut v2 = Vec3::zeros();
        for axis in 0..3 {
            if let Some(stream) = self.stream(base, axis)? {
                (v1[axis], v2[axis]) = stream.extract(store, frame, scale[axis])?;
            }
        }
        Ok((v1, v2))
    }

    pub fn extract1<S: RemoteSource + ?Sized>(
        &self,
        store: &mut LocalStore<S>,
        base: usize,
        frame: u32,
        scale: &Vec3,
    ) -> Result<Vec3> {
        let mut v = Vec3::zeros();
        for axis in 0..3 {
            if let Some(stream) = self.stream(base, axis)? {
                v[axis] = stream.extract1(store, frame, scale[axis])?;
            }
        }
        Ok(v)
    }
}
