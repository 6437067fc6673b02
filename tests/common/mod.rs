#![allow(dead_code)]

use std::io::{Cursor, Seek, SeekFrom};

use binrw::{BinWrite, Endian};

use studio_bone_decode::animvalue::{AnimValueBlock, AnimValuePtr};
use studio_bone_decode::channel::{
    RecordHeader, CHAIN_END, STUDIO_ANIM_ANIMPOS, STUDIO_ANIM_ANIMROT, STUDIO_ANIM_DELTA, STUDIO_ANIM_RAWPOS,
    STUDIO_ANIM_RAWROT, STUDIO_ANIM_RAWROT2,
};
use studio_bone_decode::compressed::{Quaternion48, Quaternion64, Vector48, Vector96};
use studio_bone_decode::frame_anim::{
    FrameAnimHeader, STUDIO_FRAME_ANIM_POS, STUDIO_FRAME_ANIM_POS2, STUDIO_FRAME_ANIM_ROT, STUDIO_FRAME_CONST_POS,
    STUDIO_FRAME_CONST_ROT,
};
use studio_bone_decode::math::{Quat, Vec3};
use studio_bone_decode::staging::AnimBlob;

pub fn approx_quat(a: &Quat, b: &Quat, tolerance: f32) -> bool {
    (a.coords - b.coords).norm() < tolerance || (a.coords + b.coords).norm() < tolerance
}

pub fn approx_vec(a: &Vec3, b: &Vec3, tolerance: f32) -> bool {
    (a - b).norm() < tolerance
}

pub enum Rotation {
    Quat48(Quat),
    Quat64(Quat),
    /// Samples of the z Euler angle curve
    CurveZ(Vec<i16>),
    Static,
}

pub enum Position {
    Vec48(Vec3),
    /// Samples of the x position curve
    CurveX(Vec<i16>),
    Static,
}

pub struct Record {
    pub bone: u8,
    pub rotation: Rotation,
    pub position: Position,
    pub delta: bool,
}

impl Record {
    pub fn raw(bone: u8, quat: Quat, pos: Vec3) -> Self {
        Self {
            bone,
            rotation: Rotation::Quat64(quat),
            position: Position::Vec48(pos),
            delta: false,
        }
    }
}

pub enum FrameRot {
    Animated(Vec<Quat>),
    Constant(Quat),
    None,
}

pub enum FramePos {
    Animated(Vec<Vec3>),
    AnimatedFull(Vec<Vec3>),
    Constant(Vec3),
    None,
}

pub struct FrameBone {
    pub rotation: FrameRot,
    pub position: FramePos,
}

/// Appends animation records to a blob in a chosen byte order.
pub struct BlobBuilder {
    cursor: Cursor<Vec<u8>>,
    endian: Endian,
}

impl BlobBuilder {
    pub fn new(endian: Endian) -> Self {
        Self {
            cursor: Cursor::new(Vec::new()),
            endian,
        }
    }

    pub fn little() -> Self {
        Self::new(Endian::Little)
    }

    pub fn position(&self) -> usize {
        self.cursor.get_ref().len()
    }

    pub fn write<T: for<'a> BinWrite<Args<'a> = ()>>(&mut self, value: &T) -> usize {
        let offset = self.position();
        self.cursor.seek(SeekFrom::End(0)).unwrap();
        value.write_options(&mut self.cursor, self.endian, ()).unwrap();
        offset
    }

    fn write_at<T: for<'a> BinWrite<Args<'a> = ()>>(&mut self, offset: usize, value: &T) {
        self.cursor.seek(SeekFrom::Start(offset as u64)).unwrap();
        value.write_options(&mut self.cursor, self.endian, ()).unwrap();
        self.cursor.seek(SeekFrom::End(0)).unwrap();
    }

    pub fn pad(&mut self, len: usize) -> usize {
        self.write(&vec![0u8; len])
    }

    fn write_stream(&mut self, samples: &[i16]) -> usize {
        let offset = self.position();
        for block in AnimValueBlock::compress(samples) {
            self.write(&block);
        }
        offset
    }

    fn write_record(&mut self, record: &Record, last: bool) -> usize {
        let start = self.position();
        let mut flags = if record.delta { STUDIO_ANIM_DELTA } else { 0 };
        flags |= match record.rotation {
            Rotation::Quat48(_) => STUDIO_ANIM_RAWROT,
            Rotation::Quat64(_) => STUDIO_ANIM_RAWROT2,
            Rotation::CurveZ(_) => STUDIO_ANIM_ANIMROT,
            Rotation::Static => 0,
        };
        flags |= match record.position {
            Position::Vec48(_) => STUDIO_ANIM_RAWPOS,
            Position::CurveX(_) => STUDIO_ANIM_ANIMPOS,
            Position::Static => 0,
        };
        self.write(&RecordHeader {
            bone: record.bone,
            flags,
            next_offset: 0,
        });

        let rot_ptr = match &record.rotation {
            Rotation::Quat48(q) => {
                self.write(&Quaternion48::from(q));
                None
            }
            Rotation::Quat64(q) => {
                self.write(&Quaternion64::from(q));
                None
            }
            Rotation::CurveZ(_) => Some(self.write(&AnimValuePtr::default())),
            Rotation::Static => None,
        };
        let pos_ptr = match &record.position {
            Position::Vec48(p) => {
                self.write(&Vector48::from(p));
                None
            }
            Position::CurveX(_) => Some(self.write(&AnimValuePtr::default())),
            Position::Static => None,
        };

        if let (Some(ptr), Rotation::CurveZ(samples)) = (rot_ptr, &record.rotation) {
            let stream = self.write_stream(samples);
            self.write_at(ptr, &AnimValuePtr {
                offset: [0, 0, (stream - ptr) as i16],
            });
        }
        if let (Some(ptr), Position::CurveX(samples)) = (pos_ptr, &record.position) {
            let stream = self.write_stream(samples);
            self.write_at(ptr, &AnimValuePtr {
                offset: [(stream - ptr) as i16, 0, 0],
            });
        }

        if !last {
            let next_offset = (self.position() - start) as i16;
            self.write_at(start, &RecordHeader {
                bone: record.bone,
                flags,
                next_offset,
            });
        }
        start
    }

    /// A record chain. An empty list writes a lone terminator.
    pub fn rle_chain(&mut self, records: &[Record]) -> usize {
        if records.is_empty() {
            return self.write(&RecordHeader {
                bone: CHAIN_END,
                flags: 0,
                next_offset: 0,
            });
        }
        let start = self.position();
        for (i, record) in records.iter().enumerate() {
            self.write_record(record, i == records.len() - 1);
        }
        start
    }

    /// A frame-anim block covering `frames` frames.
    pub fn frame_anim(&mut self, bones: &[FrameBone], frames: usize) -> usize {
        let flags: Vec<u8> = bones
            .iter()
            .map(|bone| {
                let rot = match bone.rotation {
                    FrameRot::Animated(_) => STUDIO_FRAME_ANIM_ROT,
                    FrameRot::Constant(_) => STUDIO_FRAME_CONST_ROT,
                    FrameRot::None => 0,
                };
                let pos = match bone.position {
                    FramePos::Animated(_) => STUDIO_FRAME_ANIM_POS,
                    FramePos::AnimatedFull(_) => STUDIO_FRAME_ANIM_POS2,
                    FramePos::Constant(_) => STUDIO_FRAME_CONST_POS,
                    FramePos::None => 0,
                };
                rot | pos
            })
            .collect();

        let start = self.position();
        self.write(&FrameAnimHeader::default());
        self.write(&flags);

        let constants_offset = (self.position() - start) as i32;
        for bone in bones {
            if let FrameRot::Constant(q) = &bone.rotation {
                self.write(&Quaternion48::from(q));
            }
            if let FramePos::Constant(p) = &bone.position {
                self.write(&Vector48::from(p));
            }
        }

        let frame_offset = (self.position() - start) as i32;
        for frame in 0..frames {
            for bone in bones {
                if let FrameRot::Animated(q) = &bone.rotation {
                    self.write(&Quaternion48::from(&q[frame]));
                }
                match &bone.position {
                    FramePos::Animated(p) => {
                        self.write(&Vector48::from(&p[frame]));
                    }
                    FramePos::AnimatedFull(p) => {
                        self.write(&Vector96::from(&p[frame]));
                    }
                    _ => {}
                }
            }
        }
        let frame_length = if frames > 0 {
            (self.position() - start - frame_offset as usize) / frames
        } else {
            0
        };

        self.write_at(start, &FrameAnimHeader {
            constants_offset,
            frame_offset,
            frame_length: frame_length as i32,
            unused: [0; 3],
        });
        start
    }

    /// A zeroframe cache: per bone, `count` positions then `count` 64-bit
    /// rotations, for whichever channels are present.
    pub fn zeroframe(&mut self, bones: &[(Option<Vec<Vec3>>, Option<Vec<Quat>>)]) -> usize {
        let start = self.position();
        for (positions, rotations) in bones {
            for p in positions.iter().flatten() {
                self.write(&Vector48::from(p));
            }
            for q in rotations.iter().flatten() {
                self.write(&Quaternion64::from(q));
            }
        }
        start
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.cursor.get_ref().clone()
    }

    pub fn build(self) -> AnimBlob<Vec<u8>> {
        AnimBlob::new(self.cursor.into_inner(), self.endian)
    }
}
