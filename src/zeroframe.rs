//! Zeroframe snapshot cache.
//!
//! A coarse copy of the animation sampled every `span` frames, stored per
//! animation bone as `count` positions followed by `count` rotations for the
//! channels its flags select. With a single snapshot the values are blended in
//! directly; with several, three neighbouring snapshots are run through a
//! Hermite spline.

use tracing::trace;

use crate::animation::Pose;
use crate::compressed::{Quaternion32, Quaternion64, Vector48};
use crate::error::{DecodeError, Result};
use crate::math::{finite_quat, finite_vec, hermite_spline3, lerp, quaternion_blend, quaternion_hermite, Quat, Vec3};
use crate::skeleton::{BONE_HAS_SAVEFRAME_POS, BONE_HAS_SAVEFRAME_ROT32, BONE_HAS_SAVEFRAME_ROT64};
use crate::staging::{LocalStore, Record, RemoteSource, Tag};

/// Largest neighbourhood staged at once: three 8-byte rotations.
const MAX_TRIPLET_SIZE: usize = 3 * Quaternion64::SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroframeDesc {
    offset: usize,
    span: u16,
    count: u16,
}

impl ZeroframeDesc {
    pub fn new(offset: usize, span: u16, count: u16) -> Result<Self> {
        if span == 0 {
            return Err(DecodeError::InvalidDescriptor("zeroframe span must be at least 1"));
        }
        if count == 0 {
            return Err(DecodeError::InvalidDescriptor("zeroframe count must be at least 1"));
        }
        Ok(Self { offset, span, count })
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn span(&self) -> u16 {
        self.span
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    /// Snapshot index and spline parameter for `frame`. Only meaningful with
    /// two or more snapshots.
    pub fn segment(&self, frame: f32) -> (usize, f32) {
        let span = self.span as f32;
        let last = self.count as usize - 1;
        let index = (frame / span) as usize;
        if index >= last {
            (last.saturating_sub(1), 1.0)
        } else {
            (index, ((frame - index as f32 * span) / span).clamp(0.0, 1.0))
        }
    }
}

/// An animation bone as seen by the cache: its saveframe flags and the pose
/// slot it writes, or `None` if the bone is not wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroframeBone {
    pub flags: u32,
    pub target: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SavedRotation {
    Rot64,
    Rot32,
}

impl SavedRotation {
    fn from_flags(flags: u32) -> Option<Self> {
        if flags & BONE_HAS_SAVEFRAME_ROT64 != 0 {
            Some(Self::Rot64)
        } else if flags & BONE_HAS_SAVEFRAME_ROT32 != 0 {
            Some(Self::Rot32)
        } else {
            None
        }
    }

    fn size(self) -> usize {
        match self {
            Self::Rot64 => Quaternion64::SIZE,
            Self::Rot32 => Quaternion32::SIZE,
        }
    }
}

/// Snapshot entries `first..=last` of the array at `offset`, in one transfer.
fn neighbours<T: Record, S: RemoteSource + ?Sized>(
    store: &mut LocalStore<S>,
    offset: usize,
    first: usize,
    last: usize,
) -> Result<Vec<T>> {
    let endian = store.endian();
    let len = (last - first + 1) * T::SIZE;
    let mut raw = [0u8; MAX_TRIPLET_SIZE];
    {
        let mut batch = store.batch();
        batch.fetch(Tag::ZEROFRAME, offset + first * T::SIZE, &mut raw[..len])?;
        batch.join()?;
    }
    raw[..len].chunks_exact(T::SIZE).map(|chunk| T::parse(chunk, endian)).collect()
}

fn saved_rotation<S: RemoteSource + ?Sized>(store: &mut LocalStore<S>, kind: SavedRotation, offset: usize) -> Result<Quat> {
    Ok(match kind {
        SavedRotation::Rot64 => store.read::<Quaternion64>(offset)?.quat(),
        SavedRotation::Rot32 => store.read::<Quaternion32>(offset)?.quat(),
    })
}

fn saved_rotations<S: RemoteSource + ?Sized>(
    store: &mut LocalStore<S>,
    kind: SavedRotation,
    offset: usize,
    first: usize,
    last: usize,
) -> Result<Vec<Quat>> {
    Ok(match kind {
        SavedRotation::Rot64 => neighbours::<Quaternion64, _>(store, offset, first, last)?
            .iter()
            .map(Quaternion64::quat)
            .collect(),
        SavedRotation::Rot32 => neighbours::<Quaternion32, _>(store, offset, first, last)?
            .iter()
            .map(Quaternion32::quat)
            .collect(),
    })
}

/// Blend the cache at `frame` into `pose` with `weight`. A weight of exactly
/// 1.0 overwrites the wanted entries rather than blending into them.
pub fn blend<S: RemoteSource + ?Sized>(
    store: &mut LocalStore<S>,
    desc: &ZeroframeDesc,
    bones: &[ZeroframeBone],
    frame: f32,
    weight: f32,
    pose: &mut Pose,
) -> Result<()> {
    let count = desc.count as usize;
    let mut cursor = desc.offset;

    if count == 1 {
        trace!(weight, "blending single zeroframe snapshot");
        for bone in bones {
            if bone.flags & BONE_HAS_SAVEFRAME_POS != 0 {
                if let Some(i) = bone.target {
                    let p = finite_vec(store.read::<Vector48>(cursor)?.vec3(), "zeroframe position")?;
                    pose.pos[i] = lerp(&pose.pos[i], &p, weight);
                }
                cursor += Vector48::SIZE;
            }
            if let Some(kind) = SavedRotation::from_flags(bone.flags) {
                if let Some(i) = bone.target {
                    let q = finite_quat(saved_rotation(store, kind, cursor)?, "zeroframe rotation")?;
                    pose.quat[i] = quaternion_blend(&pose.quat[i], &q, weight);
                }
                cursor += kind.size();
            }
        }
        return Ok(());
    }

    let (index, s1) = desc.segment(frame);
    let i0 = index.saturating_sub(1);
    let i2 = (index + 1).min(count - 1);
    let (off1, off2) = (index - i0, i2 - i0);
    trace!(index, s1, weight, "blending zeroframe spline");

    for bone in bones {
        if bone.flags & BONE_HAS_SAVEFRAME_POS != 0 {
            if let Some(i) = bone.target {
                let p: Vec<Vec3> = neighbours::<Vector48, _>(store, cursor, i0, i2)?
                    .iter()
                    .map(Vector48::vec3)
                    .collect();
                let p3 = finite_vec(hermite_spline3(p[0], p[off1], p[off2], s1), "zeroframe position")?;
                pose.pos[i] = if weight == 1.0 {
                    p3
                } else {
                    pose.pos[i] * (1.0 - weight) + p3 * weight
                };
            }
            cursor += Vector48::SIZE * count;
        }
        if let Some(kind) = SavedRotation::from_flags(bone.flags) {
            if let Some(i) = bone.target {
                let q = saved_rotations(store, kind, cursor, i0, i2)?;
                let q3 = finite_quat(quaternion_hermite(&q[0], &q[off1], &q[off2], s1), "zeroframe rotation")?;
                pose.quat[i] = if weight == 1.0 {
                    q3
                } else {
                    quaternion_blend(&pose.quat[i], &q3, weight)
                };
            }
            cursor += kind.size() * count;
        }
    }
    Ok(())
}
