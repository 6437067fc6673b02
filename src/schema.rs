use std::path::Path;

use anyhow::{bail, Result};
use binrw::Endian;
use serde::Deserialize;

use crate::animation::{AnimDesc, VirtualMapping};
use crate::config::DecodeConfig;
use crate::math::{Quat, Vec3};
use crate::skeleton::{BoneBase, BoneTable, Skeleton, BONE_USED_BY_ANYTHING};
use crate::zeroframe::ZeroframeDesc;

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl From<ByteOrder> for Endian {
    fn from(value: ByteOrder) -> Self {
        match value {
            ByteOrder::Little => Endian::Little,
            ByteOrder::Big => Endian::Big,
        }
    }
}

const fn unit_scale() -> [f32; 3] {
    [1.0; 3]
}

const fn used_by_anything() -> u32 {
    BONE_USED_BY_ANYTHING
}

#[derive(Debug, Deserialize, Clone)]
pub struct Bone {
    #[serde(default)]
    pub pos: [f32; 3],
    /// Euler angles in radians.
    #[serde(default)]
    pub rot: [f32; 3],
    #[serde(default = "unit_scale")]
    pub posscale: [f32; 3],
    #[serde(default = "unit_scale")]
    pub rotscale: [f32; 3],
    /// x, y, z, w
    #[serde(default)]
    pub alignment: Option<[f32; 4]>,
    #[serde(default = "used_by_anything")]
    pub flags: u32,
}

impl Bone {
    pub fn base(&self) -> BoneBase {
        let base = BoneBase::new(Vec3::from(self.pos), Vec3::from(self.rot))
            .with_scales(Vec3::from(self.posscale), Vec3::from(self.rotscale))
            .with_flags(self.flags);
        match self.alignment {
            Some([x, y, z, w]) => base.with_alignment(Quat::new(w, x, y, z)),
            None => base,
        }
    }
}

fn bone_table(bones: &[Bone]) -> BoneTable {
    bones.iter().map(Bone::base).collect()
}

fn index_table(ids: &[isize]) -> Vec<Option<usize>> {
    ids.iter().map(|&id| (id >= 0).then(|| id as usize)).collect()
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct Zeroframe {
    pub offset: usize,
    pub span: u16,
    pub count: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Animation {
    pub numframes: u32,
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub section_frames: u32,
    /// Blob offset of each section, -1 where the section is not resident.
    pub sections: Vec<i64>,
    #[serde(default)]
    pub zeroframe: Option<Zeroframe>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Virtual {
    pub master_bone: Vec<isize>,
    pub bone_map: Vec<isize>,
    pub anim_bones: Vec<Bone>,
    pub sequence_bones: Vec<Bone>,
}

/// Owned tables behind a [`VirtualMapping`].
#[derive(Debug, Clone)]
pub struct VirtualTables {
    pub anim_bones: BoneTable,
    pub master_bone: Vec<Option<usize>>,
    pub bone_map: Vec<Option<usize>>,
    pub sequence_bones: BoneTable,
}

impl VirtualTables {
    pub fn mapping(&self) -> VirtualMapping<'_> {
        VirtualMapping {
            anim_bones: &self.anim_bones,
            master_bone: &self.master_bone,
            bone_map: &self.bone_map,
            sequence_bones: &self.sequence_bones,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default)]
    pub decode: DecodeConfig,
    #[serde(default = "used_by_anything")]
    pub bone_mask: u32,
    /// Seed from a shared linear bone table instead of the per-bone records.
    #[serde(default)]
    pub linear_bones: bool,
    pub bones: Vec<Bone>,
    /// One weight per slot. Empty means every slot has weight 1.
    #[serde(default)]
    pub weights: Vec<f32>,
    pub animation: Animation,
    #[serde(default, rename = "virtual")]
    pub virtual_mapping: Option<Virtual>,
}

impl Scene {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(toml::from_str(&std::fs::read_to_string(path)?)?)
    }

    pub fn endian(&self) -> Endian {
        self.byte_order.into()
    }

    pub fn skeleton(&self) -> Skeleton {
        let skeleton = Skeleton::from_bones(bone_table(&self.bones));
        if self.linear_bones {
            skeleton.with_linear_bones()
        } else {
            skeleton
        }
    }

    pub fn virtual_tables(&self) -> Option<VirtualTables> {
        self.virtual_mapping.as_ref().map(|mapping| VirtualTables {
            anim_bones: bone_table(&mapping.anim_bones),
            master_bone: index_table(&mapping.master_bone),
            bone_map: index_table(&mapping.bone_map),
            sequence_bones: bone_table(&mapping.sequence_bones),
        })
    }

    /// Weight slots are model bones, or sequence bones for a virtual mapping.
    pub fn weights(&self) -> Vec<f32> {
        if !self.weights.is_empty() {
            return self.weights.clone();
        }
        let slots = match &self.virtual_mapping {
            Some(mapping) => mapping.sequence_bones.len(),
            None => self.bones.len(),
        };
        vec![1.0; slots]
    }

    pub fn anim_desc(&self) -> Result<AnimDesc> {
        let animation = &self.animation;
        let mut sections = Vec::with_capacity(animation.sections.len());
        for &offset in &animation.sections {
            sections.push(match usize::try_from(offset) {
                Ok(offset) => Some(offset),
                Err(_) if offset == -1 => None,
                Err(_) => bail!("Invalid section offset {}", offset),
            });
        }

        let desc = AnimDesc::new(animation.numframes, animation.flags, animation.section_frames, sections)?;
        Ok(match animation.zeroframe {
            Some(zeroframe) => desc.with_zeroframe(ZeroframeDesc::new(zeroframe.offset, zeroframe.span, zeroframe.count)?),
            None => desc,
        })
    }
}
