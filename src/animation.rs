//! Pose decoding for one animation at one point in time.
//!
//! [`AnimationDecoder::decode`] seeds every wanted bone from the bind pose (or
//! identity for delta animations), then overwrites it from whichever source the
//! animation has: a frame-anim block, an RLE record chain, or only the
//! zeroframe cache. Animations authored for a sub-model reach the composite
//! skeleton through a [`VirtualMapping`].

use tracing::{debug, trace};

use crate::channel::BoneRecord;
use crate::config::DecodeConfig;
use crate::error::{DecodeError, Result};
use crate::frame_anim::FrameAnimBlock;
use crate::math::{Quat, Vec3};
use crate::skeleton::{BindPose, BoneBase};
use crate::staging::{AnimBlob, LocalStore, RemoteSource, TransferStats};
use crate::zeroframe::{self, ZeroframeBone, ZeroframeDesc};

pub const STUDIO_DELTA: u32 = 0x0004;
pub const STUDIO_FRAMEANIM: u32 = 0x0040;

/// Per-animation header: frame count, flags, where each section's data
/// lives and the optional zeroframe cache.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimDesc {
    numframes: u32,
    flags: u32,
    section_frames: u32,
    sections: Vec<Option<usize>>,
    zeroframe: Option<ZeroframeDesc>,
}

impl AnimDesc {
    /// `sections[i]` is the blob offset of section `i`'s data, or `None` if it
    /// is not resident. With `section_frames == 0` only the first entry is used.
    pub fn new(numframes: u32, flags: u32, section_frames: u32, sections: Vec<Option<usize>>) -> Result<Self> {
        if numframes == 0 {
            return Err(DecodeError::InvalidDescriptor("an animation needs at least one frame"));
        }
        let required = if section_frames != 0 && numframes > section_frames {
            // the last frame of a long animation gets a section of its own
            (numframes / section_frames) as usize + 2
        } else {
            1
        };
        if sections.len() < required {
            return Err(DecodeError::TableTooShort {
                table: "sections",
                len: sections.len(),
                required,
            });
        }
        Ok(Self {
            numframes,
            flags,
            section_frames,
            sections,
            zeroframe: None,
        })
    }

    /// An unsectioned animation whose data, if any, starts at `data`.
    pub fn single(numframes: u32, flags: u32, data: Option<usize>) -> Result<Self> {
        Self::new(numframes, flags, 0, vec![data])
    }

    pub fn with_zeroframe(self, zeroframe: ZeroframeDesc) -> Self {
        Self {
            zeroframe: Some(zeroframe),
            ..self
        }
    }

    pub fn numframes(&self) -> u32 {
        self.numframes
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn is_delta(&self) -> bool {
        self.flags & STUDIO_DELTA != 0
    }

    pub fn is_frame_anim(&self) -> bool {
        self.flags & STUDIO_FRAMEANIM != 0
    }

    pub fn zeroframe(&self) -> Option<&ZeroframeDesc> {
        self.zeroframe.as_ref()
    }

    /// Blob offset and section-local frame for `frame`. A section that is not
    /// resident backs up to the closest earlier resident one, at its last frame.
    /// `None` when no usable section exists.
    pub fn locate(&self, frame: u32) -> Option<(usize, u32)> {
        if self.section_frames == 0 {
            return self.sections[0].map(|offset| (offset, frame));
        }

        let (section, local) = if self.numframes > self.section_frames && frame == self.numframes - 1 {
            ((self.numframes / self.section_frames) as usize + 1, 0)
        } else {
            let section = frame / self.section_frames;
            (section as usize, frame - section * self.section_frames)
        };

        if let Some(offset) = self.sections.get(section).copied().flatten() {
            return Some((offset, local));
        }
        let earlier = section.min(self.sections.len());
        self.sections[..earlier]
            .iter()
            .rev()
            .find_map(|offset| *offset)
            .map(|offset| (offset, self.section_frames - 1))
    }
}

/// Caller-owned output arrays, indexed by model bone.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    pub pos: Vec<Vec3>,
    pub quat: Vec<Quat>,
}

impl Pose {
    pub fn new(bone_count: usize) -> Self {
        Self {
            pos: vec![Vec3::zeros(); bone_count],
            quat: vec![Quat::identity(); bone_count],
        }
    }

    pub fn len(&self) -> usize {
        self.pos.len().min(self.quat.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, bone: usize) -> Option<(Vec3, Quat)> {
        Some((*self.pos.get(bone)?, *self.quat.get(bone)?))
    }

    fn set(&mut self, bone: usize, pos: Vec3, quat: Quat) {
        self.pos[bone] = pos;
        self.quat[bone] = quat;
    }
}

/// Tables connecting an animation authored for a sub-model to the composite
/// model it plays on.
#[derive(Clone, Copy)]
pub struct VirtualMapping<'r> {
    /// The animation's own bones, which its curves are relative to.
    pub anim_bones: &'r dyn BindPose,
    /// Animation bone to model bone.
    pub master_bone: &'r [Option<usize>],
    /// Model bone to sequence bone, which is also the weight slot.
    pub bone_map: &'r [Option<usize>],
    /// Rest pose used to seed non-delta animations.
    pub sequence_bones: &'r dyn BindPose,
}

#[derive(Clone, Copy)]
pub enum BoneMapping<'r> {
    /// Animation bones are model bones.
    Direct,
    Virtual(VirtualMapping<'r>),
}

/// Everything one decode call reads besides the blob.
#[derive(Clone, Copy)]
pub struct DecodeRequest<'r> {
    pub desc: &'r AnimDesc,
    /// Model bones: usage flags, bind pose and, on the direct path, curve bases.
    pub model_bones: &'r dyn BindPose,
    pub mapping: BoneMapping<'r>,
    /// Blend weight per slot. A bone with weight 0 is never written.
    pub bone_weight: &'r [f32],
    /// Position in the animation, 0 at the first frame and 1 at the last.
    pub cycle: f32,
    pub bone_mask: u32,
    /// Staleness of the section data. Anything above 0 cross-fades in the
    /// zeroframe cache after decoding.
    pub stall: f32,
}

/// The source a decode call took its pose from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePath {
    FrameAnim,
    Rle,
    Zeroframe,
}

/// Resolved per-call view of which bones to write.
struct Plan<'r> {
    anim_bones: &'r dyn BindPose,
    /// Animation bone to the model bone it writes, when that bone is wanted.
    targets: Vec<Option<usize>>,
    /// Animation bones must appear in ascending order in a record chain.
    ordered_chain: bool,
}

impl Plan<'_> {
    fn base(&self, bone: usize) -> Result<BoneBase> {
        self.anim_bones.bone(bone).ok_or(DecodeError::BoneOutOfRange {
            table: "animation bones",
            index: bone,
            count: self.anim_bones.bone_count(),
        })
    }

    fn zeroframe_bones(&self) -> Vec<ZeroframeBone> {
        self.targets
            .iter()
            .enumerate()
            .map(|(bone, &target)| ZeroframeBone {
                flags: self.anim_bones.flags(bone).unwrap_or(0),
                target,
            })
            .collect()
    }
}

fn check_len(table: &'static str, len: usize, required: usize) -> Result<()> {
    if len < required {
        Err(DecodeError::TableTooShort { table, len, required })
    } else {
        Ok(())
    }
}

fn check_index(table: &'static str, index: Option<usize>, count: usize) -> Result<()> {
    match index {
        Some(index) if index >= count => Err(DecodeError::BoneOutOfRange { table, index, count }),
        _ => Ok(()),
    }
}

/// Decodes poses from one blob. Owns the local store, so each worker needs its
/// own decoder; any number may share the blob.
pub struct AnimationDecoder<'a, S: ?Sized> {
    store: LocalStore<'a, S>,
    config: DecodeConfig,
}

impl<'a, S: RemoteSource + ?Sized> AnimationDecoder<'a, S> {
    pub fn new(blob: &'a AnimBlob<S>, config: DecodeConfig) -> Self {
        Self {
            store: LocalStore::new(blob),
            config,
        }
    }

    pub fn config(&self) -> &DecodeConfig {
        &self.config
    }

    /// Transfers staged by this decoder so far.
    pub fn stats(&self) -> TransferStats {
        self.store.stats()
    }

    fn plan<'r>(&self, request: &DecodeRequest<'r>, pose: &Pose) -> Result<(Plan<'r>, Vec<bool>)> {
        let model_count = request.model_bones.bone_count();
        check_len("pose", pose.len(), model_count)?;

        let weight = |slot: Option<usize>| slot.and_then(|k| request.bone_weight.get(k)).is_some_and(|&w| w > 0.0);
        let masked = |bone: usize| request.model_bones.flags(bone).is_some_and(|flags| flags & request.bone_mask != 0);

        match request.mapping {
            BoneMapping::Direct => {
                check_len("bone weights", request.bone_weight.len(), model_count)?;
                let wanted: Vec<bool> = (0..model_count).map(|m| masked(m) && weight(Some(m))).collect();
                let targets = wanted.iter().enumerate().map(|(m, &w)| w.then_some(m)).collect();
                Ok((
                    Plan {
                        anim_bones: request.model_bones,
                        targets,
                        ordered_chain: true,
                    },
                    wanted,
                ))
            }
            BoneMapping::Virtual(mapping) => {
                let anim_count = mapping.anim_bones.bone_count();
                check_len("master bones", mapping.master_bone.len(), anim_count)?;
                check_len("bone map", mapping.bone_map.len(), model_count)?;
                for &m in &mapping.master_bone[..anim_count] {
                    check_index("master bones", m, model_count)?;
                }
                let slots = request.bone_weight.len().min(mapping.sequence_bones.bone_count());
                for &k in &mapping.bone_map[..model_count] {
                    check_index("bone map", k, slots)?;
                }

                let wanted: Vec<bool> = (0..model_count).map(|m| masked(m) && weight(mapping.bone_map[m])).collect();
                let targets = mapping.master_bone[..anim_count]
                    .iter()
                    .map(|&m| m.filter(|&m| wanted[m]))
                    .collect();
                Ok((
                    Plan {
                        anim_bones: mapping.anim_bones,
                        targets,
                        ordered_chain: false,
                    },
                    wanted,
                ))
            }
        }
    }

    fn seed(&self, request: &DecodeRequest, wanted: &[bool], pose: &mut Pose) -> Result<()> {
        for m in (0..wanted.len()).filter(|&m| wanted[m]) {
            let (pos, quat) = if request.desc.is_delta() {
                (Vec3::zeros(), Quat::identity())
            } else {
                let (bones, index, table) = match request.mapping {
                    BoneMapping::Direct => (request.model_bones, Some(m), "model bones"),
                    BoneMapping::Virtual(mapping) => (mapping.sequence_bones, mapping.bone_map[m], "sequence bones"),
                };
                index.and_then(|i| bones.rest(i)).ok_or(DecodeError::BoneOutOfRange {
                    table,
                    index: index.unwrap_or(m),
                    count: bones.bone_count(),
                })?
            };
            pose.set(m, pos, quat);
        }
        Ok(())
    }

    fn decode_records(&mut self, plan: &Plan, offset: usize, frame: u32, s: f32, pose: &mut Pose) -> Result<()> {
        let epsilon = self.config.subframe_epsilon;
        let anim_count = plan.targets.len();
        let mut next_bone = 0;
        let mut record = BoneRecord::read(&mut self.store, offset)?;
        while let Some(current) = record {
            let bone = current.bone();
            if bone >= anim_count {
                return Err(DecodeError::MalformedChain {
                    offset: current.offset(),
                    reason: "record for a bone past the end of the skeleton",
                });
            }
            if plan.ordered_chain {
                if bone < next_bone {
                    return Err(DecodeError::MalformedChain {
                        offset: current.offset(),
                        reason: "records out of bone order",
                    });
                }
                next_bone = bone + 1;
            }
            if let Some(target) = plan.targets[bone] {
                trace!(bone, target, "decoding record");
                let (pos, quat) = current.decode(&mut self.store, frame, s, &plan.base(bone)?, epsilon)?;
                pose.set(target, pos, quat);
            }
            record = current.next(&mut self.store)?;
        }
        Ok(())
    }

    fn decode_frames(&mut self, plan: &Plan, offset: usize, frame: u32, s: f32, pose: &mut Pose) -> Result<()> {
        let block = FrameAnimBlock::read(&mut self.store, offset, plan.targets.len())?;
        let mut cursor = block.cursor(frame)?;
        for (encoding, &target) in block.encodings().zip(&plan.targets) {
            let Some(target) = target else {
                cursor.skip_bone_frame(encoding);
                continue;
            };
            let sample = cursor.extract(&mut self.store, encoding, s)?;
            if let Some(quat) = sample.quat {
                pose.quat[target] = quat;
            }
            if let Some(pos) = sample.pos {
                pose.pos[target] = pos;
            }
        }
        Ok(())
    }

    fn blend_zeroframe(&mut self, plan: &Plan, desc: &AnimDesc, frame: f32, weight: f32, pose: &mut Pose) -> Result<()> {
        match desc.zeroframe() {
            Some(zeroframe) => zeroframe::blend(&mut self.store, zeroframe, &plan.zeroframe_bones(), frame, weight, pose),
            None => Ok(()),
        }
    }

    /// Decode the wanted bones of `request` into `pose`. Bones that are not
    /// wanted are left untouched.
    pub fn decode(&mut self, request: &DecodeRequest, pose: &mut Pose) -> Result<DecodePath> {
        if !(0.0..=1.0).contains(&request.cycle) {
            return Err(DecodeError::CycleOutOfRange(request.cycle));
        }
        if !request.stall.is_finite() || request.stall < 0.0 {
            return Err(DecodeError::InvalidStall(request.stall));
        }

        let desc = request.desc;
        let frame_float = request.cycle * (desc.numframes - 1) as f32;
        let frame = (frame_float as u32).min(desc.numframes - 1);
        let s = frame_float - frame as f32;

        let (plan, wanted) = self.plan(request, pose)?;
        self.seed(request, &wanted, pose)?;
        let before = self.store.stats();

        let path = match desc.locate(frame) {
            None => {
                debug!(frame_float, "no resident animation data, decoding zeroframe cache");
                self.blend_zeroframe(&plan, desc, frame_float, 1.0, pose)?;
                return Ok(DecodePath::Zeroframe);
            }
            Some((offset, local)) if desc.is_frame_anim() => {
                debug!(offset, frame = local, s, "decoding frame animation");
                self.decode_frames(&plan, offset, local, s, pose)?;
                DecodePath::FrameAnim
            }
            Some((offset, local)) => {
                debug!(offset, frame = local, s, "decoding bone records");
                self.decode_records(&plan, offset, local, s, pose)?;
                DecodePath::Rle
            }
        };

        if request.stall > 0.0 {
            let weight = self.config.cross_fade.weight(request.stall);
            debug!(stall = request.stall, weight, "cross-fading zeroframe cache");
            self.blend_zeroframe(&plan, desc, frame_float, weight, pose)?;
        }

        let after = self.store.stats();
        debug!(
            transfers = after.transfers - before.transfers,
            bytes = after.bytes - before.bytes,
            "decode finished"
        );
        Ok(path)
    }

    /// Decode one model bone at an integer frame with no blending. Falls back
    /// to the bind pose (identity for delta animations) when the bone has no
    /// data or `weight` is not positive.
    pub fn sample_bone(&mut self, desc: &AnimDesc, bones: &dyn BindPose, bone: usize, frame: u32, weight: f32) -> Result<(Vec3, Quat)> {
        if frame >= desc.numframes {
            return Err(DecodeError::FrameOutOfRange {
                frame,
                numframes: desc.numframes,
            });
        }
        let count = bones.bone_count();
        let out_of_range = DecodeError::BoneOutOfRange {
            table: "model bones",
            index: bone,
            count,
        };
        let Some(base) = bones.bone(bone) else { return Err(out_of_range) };
        let fallback = if desc.is_delta() {
            (Vec3::zeros(), Quat::identity())
        } else {
            (base.pos, base.quat)
        };

        if weight <= 0.0 {
            return Ok(fallback);
        }
        let Some((offset, local)) = desc.locate(frame) else { return Ok(fallback) };

        if desc.is_frame_anim() {
            let block = FrameAnimBlock::read(&mut self.store, offset, count)?;
            let mut cursor = block.cursor(local)?;
            for encoding in block.encodings().take(bone) {
                cursor.skip_bone_frame(encoding);
            }
            let Some(encoding) = block.encoding(bone) else { return Ok(fallback) };
            let sample = cursor.extract_single_frame(&mut self.store, encoding)?;
            return Ok((sample.pos.unwrap_or(fallback.0), sample.quat.unwrap_or(fallback.1)));
        }

        let epsilon = self.config.subframe_epsilon;
        let mut record = BoneRecord::read(&mut self.store, offset)?;
        while let Some(current) = record {
            if current.bone() == bone {
                return current.decode(&mut self.store, local, 0.0, &base, epsilon);
            }
            record = current.next(&mut self.store)?;
        }
        Ok(fallback)
    }
}
