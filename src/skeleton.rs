//! Bind-pose providers.
//!
//! Decoding needs a base transform per bone: the rest position and rotation
//! used to seed the pose, the Euler rotation and scales that compressed curves
//! are relative to, an alignment reference and the bone's flags. A model stores
//! these either per bone ([`BoneTable`]) or as parallel arrays shared between
//! sequences ([`LinearBones`]).

use crate::math::{angle_quaternion, Quat, Vec3};

pub const BONE_USED_BY_HITBOX: u32 = 0x0000_0100;
pub const BONE_USED_BY_ATTACHMENT: u32 = 0x0000_0200;
pub const BONE_USED_BY_VERTEX_LOD0: u32 = 0x0000_0400;
pub const BONE_USED_BY_VERTEX_LOD1: u32 = 0x0000_0800;
pub const BONE_USED_BY_VERTEX_LOD2: u32 = 0x0000_1000;
pub const BONE_USED_BY_VERTEX_LOD3: u32 = 0x0000_2000;
pub const BONE_USED_BY_VERTEX_LOD4: u32 = 0x0000_4000;
pub const BONE_USED_BY_VERTEX_LOD5: u32 = 0x0000_8000;
pub const BONE_USED_BY_VERTEX_LOD6: u32 = 0x0001_0000;
pub const BONE_USED_BY_VERTEX_LOD7: u32 = 0x0002_0000;
pub const BONE_USED_BY_BONE_MERGE: u32 = 0x0004_0000;
pub const BONE_USED_BY_ANYTHING: u32 = 0x0007_FF00;

pub const BONE_FIXED_ALIGNMENT: u32 = 0x0010_0000;
pub const BONE_HAS_SAVEFRAME_POS: u32 = 0x0020_0000;
pub const BONE_HAS_SAVEFRAME_ROT64: u32 = 0x0040_0000;
pub const BONE_HAS_SAVEFRAME_ROT32: u32 = 0x0080_0000;

/// Usage mask for bones needed at a given vertex LOD, 0 through 7.
pub const fn bone_used_by_vertex_at_lod(lod: u32) -> u32 {
    BONE_USED_BY_VERTEX_LOD0 << lod
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneBase {
    pub pos: Vec3,
    pub quat: Quat,
    pub rot: Vec3,
    pub posscale: Vec3,
    pub rotscale: Vec3,
    pub qalignment: Quat,
    pub flags: u32,
}

impl BoneBase {
    /// A bone at `pos` with Euler rotation `rot`, unit curve scales, no
    /// alignment and no flags.
    pub fn new(pos: Vec3, rot: Vec3) -> Self {
        let quat = angle_quaternion(&rot);
        Self {
            pos,
            quat,
            rot,
            posscale: Vec3::repeat(1.0),
            rotscale: Vec3::repeat(1.0),
            qalignment: quat,
            flags: 0,
        }
    }

    pub fn with_scales(self, posscale: Vec3, rotscale: Vec3) -> Self {
        Self {
            posscale,
            rotscale,
            ..self
        }
    }

    pub fn with_flags(self, flags: u32) -> Self {
        Self { flags, ..self }
    }

    pub fn with_alignment(self, qalignment: Quat) -> Self {
        Self {
            qalignment,
            flags: self.flags | BONE_FIXED_ALIGNMENT,
            ..self
        }
    }
}

impl Default for BoneBase {
    fn default() -> Self {
        Self::new(Vec3::zeros(), Vec3::zeros())
    }
}

/// Read-only source of per-bone base transforms.
pub trait BindPose {
    fn bone_count(&self) -> usize;

    fn bone(&self, index: usize) -> Option<BoneBase>;

    /// Position and rotation a bone is seeded with before decoding.
    fn rest(&self, index: usize) -> Option<(Vec3, Quat)> {
        self.bone(index).map(|bone| (bone.pos, bone.quat))
    }

    fn flags(&self, index: usize) -> Option<u32> {
        self.bone(index).map(|bone| bone.flags)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoneTable {
    bones: Vec<BoneBase>,
}

impl BoneTable {
    pub const fn new(bones: Vec<BoneBase>) -> Self {
        Self { bones }
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoneBase> + use<'_> {
        self.bones.iter()
    }
}

impl FromIterator<BoneBase> for BoneTable {
    fn from_iter<I: IntoIterator<Item = BoneBase>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl BindPose for BoneTable {
    fn bone_count(&self) -> usize {
        self.bones.len()
    }

    fn bone(&self, index: usize) -> Option<BoneBase> {
        self.bones.get(index).copied()
    }
}

/// Base transforms stored as parallel arrays, one entry per bone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearBones {
    pos: Vec<Vec3>,
    quat: Vec<Quat>,
    rot: Vec<Vec3>,
    posscale: Vec<Vec3>,
    rotscale: Vec<Vec3>,
    qalignment: Vec<Quat>,
    flags: Vec<u32>,
}

impl<'a> FromIterator<&'a BoneBase> for LinearBones {
    fn from_iter<I: IntoIterator<Item = &'a BoneBase>>(iter: I) -> Self {
        let mut linear = Self::default();
        for bone in iter {
            linear.pos.push(bone.pos);
            linear.quat.push(bone.quat);
            linear.rot.push(bone.rot);
            linear.posscale.push(bone.posscale);
            linear.rotscale.push(bone.rotscale);
            linear.qalignment.push(bone.qalignment);
            linear.flags.push(bone.flags);
        }
        linear
    }
}

impl BindPose for LinearBones {
    fn bone_count(&self) -> usize {
        self.flags.len()
    }

    fn bone(&self, index: usize) -> Option<BoneBase> {
        Some(BoneBase {
            pos: *self.pos.get(index)?,
            quat: *self.quat.get(index)?,
            rot: *self.rot.get(index)?,
            posscale: *self.posscale.get(index)?,
            rotscale: *self.rotscale.get(index)?,
            qalignment: *self.qalignment.get(index)?,
            flags: *self.flags.get(index)?,
        })
    }

    fn rest(&self, index: usize) -> Option<(Vec3, Quat)> {
        Some((*self.pos.get(index)?, *self.quat.get(index)?))
    }

    fn flags(&self, index: usize) -> Option<u32> {
        self.flags.get(index).copied()
    }
}

/// A model's bones, optionally with a shared linear table that takes
/// precedence when present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Skeleton {
    bones: BoneTable,
    linear: Option<LinearBones>,
}

impl Skeleton {
    pub const fn from_bones(bones: BoneTable) -> Self {
        Self { bones, linear: None }
    }

    /// Build the linear table from the per-bone table.
    pub fn with_linear_bones(self) -> Self {
        let linear = self.bones.iter().collect();
        Self {
            linear: Some(linear),
            ..self
        }
    }

    pub fn has_linear_bones(&self) -> bool {
        self.linear.is_some()
    }

    fn source(&self) -> &dyn BindPose {
        match &self.linear {
            Some(linear) => linear as &dyn BindPose,
            None => &self.bones,
        }
    }
}

impl BindPose for Skeleton {
    fn bone_count(&self) -> usize {
        self.bones.bone_count()
    }

    fn bone(&self, index: usize) -> Option<BoneBase> {
        self.source().bone(index)
    }

    fn rest(&self, index: usize) -> Option<(Vec3, Quat)> {
        self.source().rest(index)
    }

    fn flags(&self, index: usize) -> Option<u32> {
        self.source().flags(index)
    }
}
