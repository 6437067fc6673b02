//! Fixed-stride frame animation.
//!
//! Every frame stores the animated channels of all bones back to back, so
//! frame `f` starts `f * frame_length` bytes into the frame data. Channels that
//! never change are stored once in a separate constant segment. Decoding walks
//! both segments with a [`FrameCursor`], one bone at a time.

use binrw::binrw;
use tracing::trace;

use crate::compressed::{Quaternion48, Quaternion48S, Vector48, Vector96};
use crate::error::{DecodeError, Result};
use crate::math::{finite_quat, finite_vec, lerp, quaternion_blend, Quat, Vec3};
use crate::staging::{offset_by, LocalStore, Record, RemoteSource, Tag};

pub const STUDIO_FRAME_CONST_POS: u8 = 0x01;
pub const STUDIO_FRAME_CONST_ROT: u8 = 0x02;
pub const STUDIO_FRAME_ANIM_POS: u8 = 0x04;
pub const STUDIO_FRAME_ANIM_ROT: u8 = 0x08;
pub const STUDIO_FRAME_ANIM_POS2: u8 = 0x10;
pub const STUDIO_FRAME_CONST_POS2: u8 = 0x20;
pub const STUDIO_FRAME_CONST_ROT2: u8 = 0x40;
pub const STUDIO_FRAME_ANIM_ROT2: u8 = 0x80;

const MAX_CHANNEL_SIZE: usize = 16;

#[binrw]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameAnimHeader {
    pub constants_offset: i32,
    pub frame_offset: i32,
    pub frame_length: i32,
    pub unused: [i32; 3],
}

impl Record for FrameAnimHeader {
    const SIZE: usize = 24;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRotation {
    Animated,
    AnimatedSmallest,
    Constant,
    ConstantSmallest,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePosition {
    Animated,
    Constant,
    AnimatedFull,
    ConstantFull,
    None,
}

/// The rotation and position encodings selected by one bone's flag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoneEncoding {
    pub rotation: FrameRotation,
    pub position: FramePosition,
}

impl BoneEncoding {
    pub fn from_flags(flags: u8) -> Self {
        let has = |flag: u8| flags & flag != 0;
        let rotation = if has(STUDIO_FRAME_ANIM_ROT) {
            FrameRotation::Animated
        } else if has(STUDIO_FRAME_ANIM_ROT2) {
            FrameRotation::AnimatedSmallest
        } else if has(STUDIO_FRAME_CONST_ROT) {
            FrameRotation::Constant
        } else if has(STUDIO_FRAME_CONST_ROT2) {
            FrameRotation::ConstantSmallest
        } else {
            FrameRotation::None
        };
        let position = if has(STUDIO_FRAME_ANIM_POS) {
            FramePosition::Animated
        } else if has(STUDIO_FRAME_CONST_POS) {
            FramePosition::Constant
        } else if has(STUDIO_FRAME_ANIM_POS2) {
            FramePosition::AnimatedFull
        } else if has(STUDIO_FRAME_CONST_POS2) {
            FramePosition::ConstantFull
        } else {
            FramePosition::None
        };
        Self { rotation, position }
    }

    /// Bytes this bone occupies in each frame.
    pub fn frame_size(&self) -> usize {
        let rotation = match self.rotation {
            FrameRotation::Animated => Quaternion48::SIZE,
            FrameRotation::AnimatedSmallest => Quaternion48S::SIZE,
            _ => 0,
        };
        let position = match self.position {
            FramePosition::Animated => Vector48::SIZE,
            FramePosition::AnimatedFull => Vector96::SIZE,
            _ => 0,
        };
        rotation + position
    }

    /// Bytes this bone occupies in the constant segment.
    pub fn constant_size(&self) -> usize {
        let rotation = match self.rotation {
            FrameRotation::Constant => Quaternion48::SIZE,
            FrameRotation::ConstantSmallest => Quaternion48S::SIZE,
            _ => 0,
        };
        let position = match self.position {
            FramePosition::Constant => Vector48::SIZE,
            FramePosition::ConstantFull => Vector96::SIZE,
            _ => 0,
        };
        rotation + position
    }
}

/// Channels decoded for one bone. `None` where the bone has no data.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelSample {
    pub quat: Option<Quat>,
    pub pos: Option<Vec3>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameAnimBlock {
    offset: usize,
    header: FrameAnimHeader,
    bones: Vec<BoneEncoding>,
}

impl FrameAnimBlock {
    /// Stage the header and the per-bone flag bytes of the block at `offset`.
    pub fn read<S: RemoteSource + ?Sized>(store: &mut LocalStore<S>, offset: usize, bone_count: usize) -> Result<Self> {
        let endian = store.endian();
        let mut raw_header = [0u8; FrameAnimHeader::SIZE];
        let mut flags = vec![0u8; bone_count];
        let mut batch = store.batch();
        batch.fetch(Tag::ANIM, offset, &mut raw_header)?;
        batch.fetch(Tag::BONE_FLAGS, offset + FrameAnimHeader::SIZE, &mut flags)?;
        batch.join()?;

        let header = FrameAnimHeader::parse(&raw_header, endian)?;
        if header.frame_length < 0 {
            return Err(DecodeError::InvalidRecord {
                offset,
                reason: "negative frame length",
            });
        }
        Ok(Self {
            offset,
            header,
            bones: flags.into_iter().map(BoneEncoding::from_flags).collect(),
        })
    }

    pub fn header(&self) -> &FrameAnimHeader {
        &self.header
    }

    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    pub fn encoding(&self, bone: usize) -> Option<BoneEncoding> {
        self.bones.get(bone).copied()
    }

    pub fn encodings(&self) -> impl Iterator<Item = BoneEncoding> + use<'_> {
        self.bones.iter().copied()
    }

    /// Cursor positioned at the first bone of `frame`.
    pub fn cursor(&self, frame: u32) -> Result<FrameCursor> {
        let invalid = |reason: &'static str| DecodeError::InvalidRecord {
            offset: self.offset,
            reason,
        };
        let frame_length = self.header.frame_length as i64;
        let frame_data = offset_by(self.offset, self.header.frame_offset as i64 + frame as i64 * frame_length)
            .ok_or_else(|| invalid("frame data before the start of the blob"))?;
        let constant_data = offset_by(self.offset, self.header.constants_offset as i64)
            .ok_or_else(|| invalid("constant data before the start of the blob"))?;
        Ok(FrameCursor {
            frame_data,
            constant_data,
            frame_length: frame_length as usize,
        })
    }
}

/// Read position inside a frame and inside the constant segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCursor {
    frame_data: usize,
    constant_data: usize,
    frame_length: usize,
}

impl FrameCursor {
    pub fn frame_data(&self) -> usize {
        self.frame_data
    }

    pub fn constant_data(&self) -> usize {
        self.constant_data
    }

    /// Step past a bone without decoding it.
    pub fn skip_bone_frame(&mut self, encoding: BoneEncoding) {
        self.frame_data += encoding.frame_size();
        self.constant_data += encoding.constant_size();
    }

    fn take<T: Record, S: RemoteSource + ?Sized>(cursor: &mut usize, store: &mut LocalStore<S>) -> Result<T> {
        let value = store.read(*cursor)?;
        *cursor += T::SIZE;
        Ok(value)
    }

    /// The record at the frame cursor and the same record one frame later.
    fn take_pair<T: Record, S: RemoteSource + ?Sized>(&mut self, store: &mut LocalStore<S>) -> Result<(T, T)> {
        let endian = store.endian();
        let mut raw1 = [0u8; MAX_CHANNEL_SIZE];
        let mut raw2 = [0u8; MAX_CHANNEL_SIZE];
        let mut batch = store.batch();
        batch.fetch(Tag::ANIM, self.frame_data, &mut raw1[..T::SIZE])?;
        batch.fetch(Tag::NEXT_FRAME, self.frame_data + self.frame_length, &mut raw2[..T::SIZE])?;
        batch.join()?;
        self.frame_data += T::SIZE;
        Ok((T::parse(&raw1[..T::SIZE], endian)?, T::parse(&raw2[..T::SIZE], endian)?))
    }

    fn constant_rotation<S: RemoteSource + ?Sized>(&mut self, store: &mut LocalStore<S>, rotation: FrameRotation) -> Result<Option<Quat>> {
        Ok(match rotation {
            FrameRotation::Constant => Some(Self::take::<Quaternion48, _>(&mut self.constant_data, store)?.quat()),
            FrameRotation::ConstantSmallest => Some(Self::take::<Quaternion48S, _>(&mut self.constant_data, store)?.quat()),
            _ => None,
        })
    }

    fn constant_position<S: RemoteSource + ?Sized>(&mut self, store: &mut LocalStore<S>, position: FramePosition) -> Result<Option<Vec3>> {
        Ok(match position {
            FramePosition::Constant => Some(Self::take::<Vector48, _>(&mut self.constant_data, store)?.vec3()),
            FramePosition::ConstantFull => Some(Self::take::<Vector96, _>(&mut self.constant_data, store)?.vec3()),
            _ => None,
        })
    }

    /// Decode one bone at the cursor's frame and advance past it.
    pub fn extract_single_frame<S: RemoteSource + ?Sized>(
        &mut self,
        store: &mut LocalStore<S>,
        encoding: BoneEncoding,
    ) -> Result<ChannelSample> {
        let quat = match encoding.rotation {
            FrameRotation::Animated => Some(Self::take::<Quaternion48, _>(&mut self.frame_data, store)?.quat()),
            FrameRotation::AnimatedSmallest => Some(Self::take::<Quaternion48S, _>(&mut self.frame_data, store)?.quat()),
            rotation => self.constant_rotation(store, rotation)?,
        };
        let pos = match encoding.position {
            FramePosition::Animated => Some(Self::take::<Vector48, _>(&mut self.frame_data, store)?.vec3()),
            FramePosition::AnimatedFull => Some(Self::take::<Vector96, _>(&mut self.frame_data, store)?.vec3()),
            position => self.constant_position(store, position)?,
        };
        ChannelSample { quat, pos }.checked()
    }

    /// Decode one bone blended toward the following frame by `s` and advance
    /// past it. Constant channels are not blended.
    pub fn extract_two_frames<S: RemoteSource + ?Sized>(
        &mut self,
        store: &mut LocalStore<S>,
        encoding: BoneEncoding,
        s: f32,
    ) -> Result<ChannelSample> {
        let quat = match encoding.rotation {
            FrameRotation::Animated => {
                let (q1, q2) = self.take_pair::<Quaternion48, _>(store)?;
                Some(quaternion_blend(&q1.quat(), &q2.quat(), s))
            }
            FrameRotation::AnimatedSmallest => {
                let (q1, q2) = self.take_pair::<Quaternion48S, _>(store)?;
                Some(quaternion_blend(&q1.quat(), &q2.quat(), s))
            }
            rotation => self.constant_rotation(store, rotation)?,
        };
        let pos = match encoding.position {
            FramePosition::Animated => {
                let (p1, p2) = self.take_pair::<Vector48, _>(store)?;
                Some(lerp(&p1.vec3(), &p2.vec3(), s))
            }
            FramePosition::AnimatedFull => {
                let (p1, p2) = self.take_pair::<Vector96, _>(store)?;
                Some(lerp(&p1.vec3(), &p2.vec3(), s))
            }
            position => self.constant_position(store, position)?,
        };
        ChannelSample { quat, pos }.checked()
    }

    /// Blend toward the next frame when `s > 0`, otherwise decode the current
    /// frame alone.
    pub fn extract<S: RemoteSource + ?Sized>(
        &mut self,
        store: &mut LocalStore<S>,
        encoding: BoneEncoding,
        s: f32,
    ) -> Result<ChannelSample> {
        trace!(?encoding, s, "extracting frame bone");
        if s > 0.0 {
            self.extract_two_frames(store, encoding, s)
        } else {
            self.extract_single_frame(store, encoding)
        }
    }
}

impl ChannelSample {
    fn checked(self) -> Result<Self> {
        Ok(Self {
            quat: self.quat.map(|q| finite_quat(q, "rotation")).transpose()?,
            pos: self.pos.map(|p| finite_vec(p, "position")).transpose()?,
        })
    }
}
