//! Fixed-point rotation and half-float position records.
//!
//! Every type here is a plain `binrw` record that decodes into [`Quat`] or
//! [`Vec3`]. The `From<&Quat>`/`From<&Vec3>` impls are the matching encoders.

use binrw::binrw;
use half::prelude::*;

use crate::math::{Quat, Vec3};
use crate::staging::Record;

// wrapper type because we can't implement BinRead/BinWrite for f16
#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Float16(u16);

impl Float16 {
    pub fn to_f32(self) -> f32 {
        f16::from_bits(self.0).to_f32()
    }

    pub fn from_f32(f: f32) -> Self {
        Self(f16::from_f32(f).to_bits())
    }
}

/// Three half floats.
#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vector48 {
    pub x: Float16,
    pub y: Float16,
    pub z: Float16,
}

impl Vector48 {
    pub fn vec3(&self) -> Vec3 {
        Vec3::new(self.x.to_f32(), self.y.to_f32(), self.z.to_f32())
    }
}

impl From<&Vec3> for Vector48 {
    fn from(value: &Vec3) -> Self {
        Self {
            x: Float16::from_f32(value.x),
            y: Float16::from_f32(value.y),
            z: Float16::from_f32(value.z),
        }
    }
}

impl Record for Vector48 {
    const SIZE: usize = 6;
}

/// Full precision position.
#[binrw]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vector96 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector96 {
    pub fn vec3(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}

impl From<&Vec3> for Vector96 {
    fn from(value: &Vec3) -> Self {
        Self {
            x: value.x,
            y: value.y,
            z: value.z,
        }
    }
}

impl Record for Vector96 {
    const SIZE: usize = 12;
}

fn implied_w(x: f32, y: f32, z: f32, negate: bool) -> f32 {
    let w = (1.0 - x * x - y * y - z * z).sqrt();
    if negate {
        -w
    } else {
        w
    }
}

fn quantize(value: f32, scale: f32, bias: i32, max: i32) -> i32 {
    ((value * scale) as i32 + bias).clamp(0, max)
}

/// 16/16/15 bit x, y, z with the sign of w in the last bit.
#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quaternion48 {
    pub x: u16,
    pub y: u16,
    pub zw: u16,
}

impl Quaternion48 {
    pub fn quat(&self) -> Quat {
        let x = (self.x as i32 - 32768) as f32 * (1.0 / 32768.5);
        let y = (self.y as i32 - 32768) as f32 * (1.0 / 32768.5);
        let z = ((self.zw & 0x7FFF) as i32 - 16384) as f32 * (1.0 / 16384.5);
        Quat::new(implied_w(x, y, z, self.zw & 0x8000 != 0), x, y, z)
    }
}

impl From<&Quat> for Quaternion48 {
    fn from(value: &Quat) -> Self {
        let z = quantize(value.k, 16384.0, 16384, 32767) as u16;
        let wneg = if value.w < 0.0 { 0x8000 } else { 0 };
        Self {
            x: quantize(value.i, 32768.0, 32768, 65535) as u16,
            y: quantize(value.j, 32768.0, 32768, 65535) as u16,
            zw: z | wneg,
        }
    }
}

impl Record for Quaternion48 {
    const SIZE: usize = 6;
}

const SCALE48S: f32 = 23168.0;
const SHIFT48S: i32 = 16384;

/// "Smallest three" encoding: the three smallest components are stored and
/// the largest is rebuilt, with its position held in two spare bits.
#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quaternion48S {
    pub a: u16,
    pub b: u16,
    pub c: u16,
}

impl Quaternion48S {
    fn offset(&self) -> usize {
        let high = (self.a >> 15) as usize;
        let low = (self.b >> 15) as usize;
        low + high * 2
    }

    pub fn quat(&self) -> Quat {
        let unpack = |v: u16| ((v & 0x7FFF) as i32 - SHIFT48S) as f32 * (1.0 / SCALE48S);
        let ia = self.offset();
        let (a, b, c) = (unpack(self.a), unpack(self.b), unpack(self.c));
        // coords are stored x, y, z, w
        let mut coords = [0.0f32; 4];
        coords[ia] = a;
        coords[(ia + 1) % 4] = b;
        coords[(ia + 2) % 4] = c;
        coords[(ia + 3) % 4] = implied_w(a, b, c, self.c & 0x8000 != 0);
        Quat::new(coords[3], coords[0], coords[1], coords[2])
    }
}

impl From<&Quat> for Quaternion48S {
    fn from(value: &Quat) -> Self {
        let coords = [value.i, value.j, value.k, value.w];
        let mut largest = 0;
        for i in 1..4 {
            if coords[largest].abs() < coords[i].abs() {
                largest = i;
            }
        }
        let offset = (largest + 1) % 4;
        let max = (SCALE48S * 2.0) as i32;
        let pack = |i: usize| quantize(coords[i % 4], SCALE48S, SHIFT48S, max) as u16;
        let high = if offset > 1 { 0x8000 } else { 0 };
        let low = if offset & 1 != 0 { 0x8000 } else { 0 };
        let dneg = if coords[largest] < 0.0 { 0x8000 } else { 0 };
        Self {
            a: pack(offset) | high,
            b: pack(offset + 1) | low,
            c: pack(offset + 2) | dneg,
        }
    }
}

impl Record for Quaternion48S {
    const SIZE: usize = 6;
}

const Q64_MASK: u64 = 0x1F_FFFF;

/// 21 bits each for x, y, z and the sign of w in the top bit.
#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quaternion64(pub u64);

impl Quaternion64 {
    pub fn quat(&self) -> Quat {
        let unpack = |shift: u32| (((self.0 >> shift) & Q64_MASK) as i32 - 1048576) as f32 * (1.0 / 1048576.5);
        let (x, y, z) = (unpack(0), unpack(21), unpack(42));
        Quat::new(implied_w(x, y, z, self.0 >> 63 != 0), x, y, z)
    }
}

impl From<&Quat> for Quaternion64 {
    fn from(value: &Quat) -> Self {
        let pack = |v: f32| quantize(v, 1048576.0, 1048576, 2097151) as u64;
        let wneg = (value.w < 0.0) as u64;
        Self(pack(value.i) | pack(value.j) << 21 | pack(value.k) << 42 | wneg << 63)
    }
}

impl Record for Quaternion64 {
    const SIZE: usize = 8;
}

/// 11/10/10 bit x, y, z and the sign of w.
#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quaternion32(pub u32);

impl Quaternion32 {
    pub fn quat(&self) -> Quat {
        let x = ((self.0 & 0x7FF) as i32 - 1024) as f32 * (1.0 / 1024.0);
        let y = (((self.0 >> 11) & 0x3FF) as i32 - 512) as f32 * (1.0 / 512.0);
        let z = (((self.0 >> 21) & 0x3FF) as i32 - 512) as f32 * (1.0 / 512.0);
        Quat::new(implied_w(x, y, z, self.0 >> 31 != 0), x, y, z)
    }
}

impl From<&Quat> for Quaternion32 {
    fn from(value: &Quat) -> Self {
        let x = quantize(value.i, 1024.0, 1024, 2047) as u32;
        let y = quantize(value.j, 512.0, 512, 1023) as u32;
        let z = quantize(value.k, 512.0, 512, 1023) as u32;
        let wneg = (value.w < 0.0) as u32;
        Self(x | y << 11 | z << 21 | wneg << 31)
    }
}

impl Record for Quaternion32 {
    const SIZE: usize = 4;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::angle_quaternion;

    fn angle_between(a: &Quat, b: &Quat) -> f32 {
        let dot = a.coords.dot(&b.coords).abs().min(1.0);
        2.0 * dot.acos()
    }

    fn rotations() -> Vec<Quat> {
        vec![
            Quat::identity(),
            angle_quaternion(&Vec3::new(0.3, -1.1, 2.0)),
            angle_quaternion(&Vec3::new(-2.5, 0.7, -0.4)),
            angle_quaternion(&Vec3::new(3.0, 1.4, -3.0)),
        ]
    }

    #[test]
    fn test_quaternion48_precision() {
        for q in rotations() {
            let decoded = Quaternion48::from(&q).quat();
            assert!(angle_between(&q, &decoded) < 2e-3, "{q:?} -> {decoded:?}");
        }
    }

    #[test]
    fn test_quaternion48s_precision() {
        let mut rotations = rotations();
        // w near zero, which the implied-w encodings handle poorly
        rotations.push(Quat::new(0.01, -0.99, 0.1, 0.0).normalize());
        for q in rotations {
            let decoded = Quaternion48S::from(&q).quat();
            assert!(angle_between(&q, &decoded) < 2e-3, "{q:?} -> {decoded:?}");
        }
    }

    #[test]
    fn test_quaternion48s_offset_bits() {
        // largest component w -> offset 0, a holds x
        let packed = Quaternion48S::from(&Quat::identity());
        assert_eq!(packed.offset(), 0);
        assert_eq!(packed.c & 0x8000, 0);
        // largest component y -> offset 2
        let packed = Quaternion48S::from(&Quat::new(0.1, 0.1, -0.98, 0.1).normalize());
        assert_eq!(packed.offset(), 2);
        assert_ne!(packed.c & 0x8000, 0);
    }

    #[test]
    fn test_quaternion64_precision() {
        for q in rotations() {
            let decoded = Quaternion64::from(&q).quat();
            assert!(angle_between(&q, &decoded) < 1e-3, "{q:?} -> {decoded:?}");
        }
    }

    #[test]
    fn test_quaternion32_precision() {
        for q in rotations() {
            let decoded = Quaternion32::from(&q).quat();
            assert!(angle_between(&q, &decoded) < 5e-2, "{q:?} -> {decoded:?}");
        }
    }

    #[test]
    fn test_negative_w_sign_bit() {
        let q = Quat::new(-0.8, 0.6, 0.0, 0.0);
        assert!(Quaternion48::from(&q).quat().w < 0.0);
        assert!(Quaternion64::from(&q).quat().w < 0.0);
        assert!(Quaternion32::from(&q).quat().w < 0.0);
    }

    #[test]
    fn test_vector48() {
        let v = Vec3::new(1.5, -0.25, 1024.0);
        assert_eq!(Vector48::from(&v).vec3(), v);
    }

    #[test]
    fn test_out_of_range_components_are_not_finite() {
        let q = Quaternion48 { x: 65535, y: 65535, zw: 0x7FFF };
        assert!(q.quat().w.is_nan());
    }
}
