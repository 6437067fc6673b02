//! Run-length bone records.
//!
//! An animation section is a chain of records, one per animated bone. Each
//! record's flags select how its rotation and position are stored; the
//! selection is decoded once into [`RotationTrack`] and [`PositionTrack`].

use binrw::binrw;
use tracing::trace;

use crate::animvalue::AnimValuePtr;
use crate::compressed::{Quaternion48, Quaternion64, Vector48};
use crate::error::{DecodeError, Result};
use crate::math::{angle_quaternion, finite_quat, finite_vec, lerp, quaternion_align, quaternion_blend, Quat, Vec3};
use crate::skeleton::{BoneBase, BONE_FIXED_ALIGNMENT};
use crate::staging::{offset_by, LocalStore, Record, RemoteSource};

pub const STUDIO_ANIM_RAWPOS: u8 = 0x01;
pub const STUDIO_ANIM_RAWROT: u8 = 0x02;
pub const STUDIO_ANIM_ANIMPOS: u8 = 0x04;
pub const STUDIO_ANIM_ANIMROT: u8 = 0x08;
pub const STUDIO_ANIM_DELTA: u8 = 0x10;
pub const STUDIO_ANIM_RAWROT2: u8 = 0x20;

/// Bone index that terminates a chain.
pub const CHAIN_END: u8 = 255;

const HEADER_SIZE: usize = 4;

#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub bone: u8,
    pub flags: u8,
    pub next_offset: i16,
}

impl Record for RecordHeader {
    const SIZE: usize = HEADER_SIZE;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationTrack {
    Quat48(usize),
    Quat64(usize),
    /// Euler angle curves behind a value pointer
    Curve(usize),
    Static,
}

impl RotationTrack {
    fn extent(&self) -> Option<(usize, usize)> {
        match *self {
            Self::Quat48(offset) => Some((offset, Quaternion48::SIZE)),
            Self::Quat64(offset) => Some((offset, Quaternion64::SIZE)),
            Self::Curve(offset) => Some((offset, AnimValuePtr::SIZE)),
            Self::Static => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionTrack {
    Vec48(usize),
    Curve(usize),
    Static,
}

impl PositionTrack {
    fn start(&self) -> Option<usize> {
        match *self {
            Self::Vec48(offset) | Self::Curve(offset) => Some(offset),
            Self::Static => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoneRecord {
    offset: usize,
    bone: u8,
    delta: bool,
    next: Option<usize>,
    rotation: RotationTrack,
    position: PositionTrack,
}

impl BoneRecord {
    /// Read the record at `offset`. Returns `None` for a terminator record.
    pub fn read<S: RemoteSource + ?Sized>(store: &mut LocalStore<S>, offset: usize) -> Result<Option<Self>> {
        let header: RecordHeader = store.read(offset)?;
        if header.bone == CHAIN_END {
            return Ok(None);
        }
        Self::from_header(offset, header, store.blob_size()).map(Some)
    }

    fn from_header(offset: usize, header: RecordHeader, blob_size: usize) -> Result<Self> {
        let flags = header.flags;
        let has = |flag: u8| flags & flag != 0;
        let payload = offset + HEADER_SIZE;

        let rotation = if has(STUDIO_ANIM_RAWROT) {
            RotationTrack::Quat48(payload)
        } else if has(STUDIO_ANIM_RAWROT2) {
            RotationTrack::Quat64(payload)
        } else if has(STUDIO_ANIM_ANIMROT) {
            RotationTrack::Curve(payload)
        } else {
            RotationTrack::Static
        };

        let position = if has(STUDIO_ANIM_RAWPOS) {
            let skip = if has(STUDIO_ANIM_RAWROT) { Quaternion48::SIZE } else { 0 }
                + if has(STUDIO_ANIM_RAWROT2) { Quaternion64::SIZE } else { 0 };
            PositionTrack::Vec48(payload + skip)
        } else if has(STUDIO_ANIM_ANIMPOS) {
            let skip = if has(STUDIO_ANIM_ANIMROT) { AnimValuePtr::SIZE } else { 0 };
            PositionTrack::Curve(payload + skip)
        } else {
            PositionTrack::Static
        };

        if let (Some((rot_start, rot_len)), Some(pos_start)) = (rotation.extent(), position.start()) {
            if pos_start < rot_start + rot_len {
                return Err(DecodeError::InvalidRecord {
                    offset,
                    reason: "position data overlaps rotation data",
                });
            }
        }

        let next = match header.next_offset {
            0 => None,
            delta if delta < 0 => {
                return Err(DecodeError::MalformedChain {
                    offset,
                    reason: "negative next offset",
                })
            }
            delta => match offset_by(offset, delta as i64) {
                Some(next) if next < blob_size => Some(next),
                _ => {
                    return Err(DecodeError::MalformedChain {
                        offset,
                        reason: "next record outside the blob",
                    })
                }
            },
        };

        Ok(Self {
            offset,
            bone: header.bone,
            delta: has(STUDIO_ANIM_DELTA),
            next,
            rotation,
            position,
        })
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn bone(&self) -> usize {
        self.bone as usize
    }

    pub fn is_delta(&self) -> bool {
        self.delta
    }

    pub fn rotation_track(&self) -> RotationTrack {
        self.rotation
    }

    pub fn position_track(&self) -> PositionTrack {
        self.position
    }

    /// The following record in the chain, if any.
    pub fn next<S: RemoteSource + ?Sized>(&self, store: &mut LocalStore<S>) -> Result<Option<Self>> {
        match self.next {
            Some(offset) => Self::read(store, offset),
            None => Ok(None),
        }
    }

    /// Rotation at `frame`, blended toward `frame + 1` by `s` when `s`
    /// exceeds `epsilon`.
    pub fn rotation<S: RemoteSource + ?Sized>(
        &self,
        store: &mut LocalStore<S>,
        frame: u32,
        s: f32,
        base: &BoneBase,
        epsilon: f32,
    ) -> Result<Quat> {
        let q = match self.rotation {
            RotationTrack::Quat48(offset) => {
                let raw: Quaternion48 = store.read(offset)?;
                return finite_quat(raw.quat(), "rotation");
            }
            RotationTrack::Quat64(offset) => {
                let raw: Quaternion64 = store.read(offset)?;
                return finite_quat(raw.quat(), "rotation");
            }
            RotationTrack::Static if self.delta => return Ok(Quat::identity()),
            RotationTrack::Static => return Ok(base.quat),
            RotationTrack::Curve(offset) => {
                let ptr: AnimValuePtr = store.read(offset)?;
                if s > epsilon {
                    let (mut angle1, mut angle2) = ptr.extract(store, offset, frame, &base.rotscale)?;
                    if !self.delta {
                        angle1 += base.rot;
                        angle2 += base.rot;
                    }
                    if angle1 == angle2 {
                        angle_quaternion(&angle1)
                    } else {
                        quaternion_blend(&angle_quaternion(&angle1), &angle_quaternion(&angle2), s)
                    }
                } else {
                    let mut angle = ptr.extract1(store, offset, frame, &base.rotscale)?;
                    if !self.delta {
                        angle += base.rot;
                    }
                    angle_quaternion(&angle)
                }
            }
        };

        let q = finite_quat(q, "rotation")?;
        if !self.delta && base.flags & BONE_FIXED_ALIGNMENT != 0 {
            Ok(quaternion_align(&base.qalignment, &q))
        } else {
            Ok(q)
        }
    }

    /// Position at `frame`, linearly blended toward `frame + 1` by `s` when
    /// `s` exceeds `epsilon`.
    pub fn position<S: RemoteSource + ?Sized>(
        &self,
        store: &mut LocalStore<S>,
        frame: u32,
        s: f32,
        base: &BoneBase,
        epsilon: f32,
    ) -> Result<Vec3> {
        let pos = match self.position {
            PositionTrack::Vec48(offset) => {
                let raw: Vector48 = store.read(offset)?;
                return finite_vec(raw.vec3(), "position");
            }
            PositionTrack::Static if self.delta => return Ok(Vec3::zeros()),
            PositionTrack::Static => return Ok(base.pos),
            PositionTrack::Curve(offset) => {
                let ptr: AnimValuePtr = store.read(offset)?;
                if s > epsilon {
                    let (p1, p2) = ptr.extract(store, offset, frame, &base.posscale)?;
                    lerp(&p1, &p2, s)
                } else {
                    ptr.extract1(store, offset, frame, &base.posscale)?
                }
            }
        };

        let pos = if self.delta { pos } else { pos + base.pos };
        finite_vec(pos, "position")
    }

    pub fn decode<S: RemoteSource + ?Sized>(
        &self,
        store: &mut LocalStore<S>,
        frame: u32,
        s: f32,
        base: &BoneBase,
        epsilon: f32,
    ) -> Result<(Vec3, Quat)> {
        trace!(bone = self.bone, rotation = ?self.rotation, position = ?self.position, "decoding bone record");
        let pos = self.position(store, frame, s, base, epsilon)?;
        let quat = self.rotation(store, frame, s, base, epsilon)?;
        Ok((pos, quat))
    }
}

const COMPRESSED_FRACTION_EPSILON: f32 = 0.0001;

/// Six curves holding a position and an Euler rotation, with curve offsets
/// relative to the record.
#[binrw]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressedTransform {
    pub scale: [f32; 6],
    pub offset: [i16; 6],
}

impl Record for CompressedTransform {
    const SIZE: usize = 36;
}

impl CompressedTransform {
    fn curves(&self, first: usize) -> AnimValuePtr {
        AnimValuePtr {
            offset: [self.offset[first], self.offset[first + 1], self.offset[first + 2]],
        }
    }

    fn scales(&self, first: usize) -> Vec3 {
        Vec3::new(self.scale[first], self.scale[first + 1], self.scale[first + 2])
    }
}

/// Decode the compressed transform record at `offset` at `frame`, blended
/// toward the next frame by `fraction`.
pub fn decode_compressed_transform<S: RemoteSource + ?Sized>(
    store: &mut LocalStore<S>,
    offset: usize,
    frame: u32,
    fraction: f32,
) -> Result<(Vec3, Quat)> {
    let record: CompressedTransform = store.read(offset)?;
    let (pos_curves, rot_curves) = (record.curves(0), record.curves(3));
    let (pos_scale, rot_scale) = (record.scales(0), record.scales(3));

    let (pos, quat) = if fraction > COMPRESSED_FRACTION_EPSILON {
        let (p1, p2) = pos_curves.extract(store, offset, frame, &pos_scale)?;
        let (angle1, angle2) = rot_curves.extract(store, offset, frame, &rot_scale)?;
        let quat = if angle1 == angle2 {
            angle_quaternion(&angle1)
        } else {
            quaternion_blend(&angle_quaternion(&angle1), &angle_quaternion(&angle2), fraction)
        };
        (lerp(&p1, &p2, fraction), quat)
    } else {
        let pos = pos_curves.extract1(store, offset, frame, &pos_scale)?;
        let angle = rot_curves.extract1(store, offset, frame, &rot_scale)?;
        (pos, angle_quaternion(&angle))
    };

    Ok((finite_vec(pos, "position")?, finite_quat(quat, "rotation")?))
}
