// Scena
// Copyright (c) 2026 The Project Scena Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `math` module provides the small set of linear-algebra primitives used by the decoder:
//! vectors, colors, texture coordinates, quaternions, and 4x4 column-major matrices, together
//! with the sign/magnitude dequantization helpers of the U3D bitstream.

use std::ops::{Add, AddAssign, Div, DivAssign, Mul, Sub};

use bytemuck::{Pod, Zeroable};

/// Reconstructs a quantized magnitude: the sign flag selects the sign, `iq` is the inverse
/// quantization step.
#[inline(always)]
pub fn inverse_quant(sign: bool, val: u32, iq: f32) -> f32 {
    if sign {
        -iq * val as f32
    } else {
        iq * val as f32
    }
}

/// A three-component vector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Vector3 { x, y, z }
    }

    /// The dot product.
    #[inline]
    pub fn dot(&self, other: &Vector3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// The cross product.
    #[inline]
    pub fn cross(&self, other: &Vector3) -> Vector3 {
        Vector3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn length(&self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn normalized(&self) -> Vector3 {
        *self / self.length()
    }

    /// Dequantizes a sign/magnitude triple. Bits 0, 1, and 2 of `signs` carry the signs of the
    /// x, y, and z components respectively.
    pub fn dequantize(signs: u8, x: u32, y: u32, z: u32, iq: f32) -> Vector3 {
        Vector3::new(
            inverse_quant(signs & 1 != 0, x, iq),
            inverse_quant(signs & 2 != 0, y, iq),
            inverse_quant(signs & 4 != 0, z, iq),
        )
    }
}

impl Add for Vector3 {
    type Output = Vector3;

    fn add(self, v: Vector3) -> Vector3 {
        Vector3::new(self.x + v.x, self.y + v.y, self.z + v.z)
    }
}

impl AddAssign for Vector3 {
    fn add_assign(&mut self, v: Vector3) {
        self.x += v.x;
        self.y += v.y;
        self.z += v.z;
    }
}

impl Sub for Vector3 {
    type Output = Vector3;

    fn sub(self, v: Vector3) -> Vector3 {
        Vector3::new(self.x - v.x, self.y - v.y, self.z - v.z)
    }
}

impl Mul<f32> for Vector3 {
    type Output = Vector3;

    fn mul(self, a: f32) -> Vector3 {
        Vector3::new(a * self.x, a * self.y, a * self.z)
    }
}

impl Div<f32> for Vector3 {
    type Output = Vector3;

    fn div(self, a: f32) -> Vector3 {
        Vector3::new(self.x / a, self.y / a, self.z / a)
    }
}

/// Spherical linear interpolation between two unit vectors. Returns `a` when the vectors are
/// parallel.
pub fn slerp(a: Vector3, b: Vector3, t: f32) -> Vector3 {
    let omega = a.dot(&b).clamp(-1.0, 1.0).acos();
    if omega == 0.0 {
        return a;
    }
    a * ((1.0 - t) * omega).sin() / omega.sin() + b * (t * omega).sin() / omega.sin()
}

/// A two-component vector.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vector2 {
    pub u: f32,
    pub v: f32,
}

/// An RGB color.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Color3 {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color3 {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Color3 { r, g, b }
    }
}

/// An RGBA color.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Color4 {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color4 {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Color4 { r, g, b, a }
    }

    /// Dequantizes a sign/magnitude quadruple. Bits 0..=3 of `signs` carry the signs of the
    /// r, g, b, and a components respectively.
    pub fn dequantize(signs: u8, r: u32, g: u32, b: u32, a: u32, iq: f32) -> Color4 {
        Color4::new(
            inverse_quant(signs & 1 != 0, r, iq),
            inverse_quant(signs & 2 != 0, g, iq),
            inverse_quant(signs & 4 != 0, b, iq),
            inverse_quant(signs & 8 != 0, a, iq),
        )
    }
}

impl Add for Color4 {
    type Output = Color4;

    fn add(self, c: Color4) -> Color4 {
        Color4::new(self.r + c.r, self.g + c.g, self.b + c.b, self.a + c.a)
    }
}

impl AddAssign for Color4 {
    fn add_assign(&mut self, c: Color4) {
        self.r += c.r;
        self.g += c.g;
        self.b += c.b;
        self.a += c.a;
    }
}

impl DivAssign<f32> for Color4 {
    fn div_assign(&mut self, val: f32) {
        self.r /= val;
        self.g /= val;
        self.b /= val;
        self.a /= val;
    }
}

/// A four-component texture coordinate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct TexCoord4 {
    pub u: f32,
    pub v: f32,
    pub s: f32,
    pub t: f32,
}

impl TexCoord4 {
    pub const fn new(u: f32, v: f32, s: f32, t: f32) -> Self {
        TexCoord4 { u, v, s, t }
    }

    /// Dequantizes a sign/magnitude quadruple. Bits 0..=3 of `signs` carry the signs of the
    /// u, v, s, and t components respectively.
    pub fn dequantize(signs: u8, u: u32, v: u32, s: u32, t: u32, iq: f32) -> TexCoord4 {
        TexCoord4::new(
            inverse_quant(signs & 1 != 0, u, iq),
            inverse_quant(signs & 2 != 0, v, iq),
            inverse_quant(signs & 4 != 0, s, iq),
            inverse_quant(signs & 8 != 0, t, iq),
        )
    }
}

impl Add for TexCoord4 {
    type Output = TexCoord4;

    fn add(self, c: TexCoord4) -> TexCoord4 {
        TexCoord4::new(self.u + c.u, self.v + c.v, self.s + c.s, self.t + c.t)
    }
}

impl AddAssign for TexCoord4 {
    fn add_assign(&mut self, c: TexCoord4) {
        self.u += c.u;
        self.v += c.v;
        self.s += c.s;
        self.t += c.t;
    }
}

impl DivAssign<f32> for TexCoord4 {
    fn div_assign(&mut self, val: f32) {
        self.u /= val;
        self.v /= val;
        self.s /= val;
        self.t /= val;
    }
}

/// A quaternion in (w, x, y, z) order.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    /// Lifts a sign-encoded vector to the unit quaternion with non-negative w:
    /// `w = sqrt(1 - min(1, |v|^2))`.
    pub fn from_encoded_vector(v: Vector3) -> Quaternion {
        let w = (1.0 - v.dot(&v).min(1.0)).sqrt();
        Quaternion { w, x: v.x, y: v.y, z: v.z }
    }
}

impl From<Vector3> for Quaternion {
    /// Embeds a vector as a pure quaternion (w = 0).
    fn from(v: Vector3) -> Quaternion {
        Quaternion { w: 0.0, x: v.x, y: v.y, z: v.z }
    }
}

impl From<Quaternion> for Vector3 {
    fn from(q: Quaternion) -> Vector3 {
        Vector3::new(q.x, q.y, q.z)
    }
}

impl Mul for Quaternion {
    type Output = Quaternion;

    fn mul(self, q: Quaternion) -> Quaternion {
        Quaternion {
            w: self.w * q.w - self.x * q.x - self.y * q.y - self.z * q.z,
            x: self.w * q.x + q.w * self.x + self.y * q.z - self.z * q.y,
            y: self.w * q.y + q.w * self.y + self.z * q.x - self.x * q.z,
            z: self.w * q.z + q.w * self.z + self.x * q.y - self.y * q.x,
        }
    }
}

/// A 4x4 matrix with column-vector convention: `m[i]` is column `i`, translation lives in
/// `m[3][0..3]`. The field order matches the wire layout of a U3D transform element.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Matrix4 {
    pub m: [[f32; 4]; 4],
}

impl Default for Matrix4 {
    fn default() -> Self {
        Matrix4::IDENTITY
    }
}

impl Matrix4 {
    pub const IDENTITY: Matrix4 = Matrix4 {
        m: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    /// Transforms a point (w = 1).
    pub fn transform_point(&self, v: Vector3) -> Vector3 {
        let m = &self.m;
        Vector3::new(
            m[0][0] * v.x + m[1][0] * v.y + m[2][0] * v.z + m[3][0],
            m[0][1] * v.x + m[1][1] * v.y + m[2][1] * v.z + m[3][1],
            m[0][2] * v.x + m[1][2] * v.y + m[2][2] * v.z + m[3][2],
        )
    }

    /// The inverse-transpose of the upper-left 3x3 block, used to transform directions.
    pub fn normal_matrix(&self) -> Matrix4 {
        let m = &self.m;
        let invdet = 1.0
            / (m[0][0] * m[1][1] * m[2][2]
                + m[0][1] * m[1][2] * m[2][0]
                + m[0][2] * m[1][0] * m[2][1]
                - m[0][2] * m[1][1] * m[2][0]
                - m[0][1] * m[1][0] * m[2][2]
                - m[0][0] * m[1][2] * m[2][1]);
        let mut ret = Matrix4::IDENTITY;
        ret.m[0][0] = invdet * (m[1][1] * m[2][2] - m[2][1] * m[1][2]);
        ret.m[1][0] = invdet * (m[0][2] * m[2][1] - m[0][1] * m[2][2]);
        ret.m[2][0] = invdet * (m[0][1] * m[1][2] - m[0][2] * m[1][1]);
        ret.m[0][1] = invdet * (m[2][0] * m[1][2] - m[1][0] * m[2][2]);
        ret.m[1][1] = invdet * (m[0][0] * m[2][2] - m[2][0] * m[0][2]);
        ret.m[2][1] = invdet * (m[1][0] * m[0][2] - m[0][0] * m[1][2]);
        ret.m[0][2] = invdet * (m[1][0] * m[2][1] - m[2][0] * m[1][1]);
        ret.m[1][2] = invdet * (m[2][0] * m[0][1] - m[0][0] * m[2][1]);
        ret.m[2][2] = invdet * (m[0][0] * m[1][1] - m[1][0] * m[0][1]);
        ret
    }

    /// The inverse of an affine transform (rotation/scale block plus translation).
    pub fn inverse(&self) -> Matrix4 {
        let m = &self.m;
        let mut ret = self.normal_matrix();
        // The normal matrix holds the transposed-inverse of the 3x3 block; transpose it back and
        // invert the translation.
        let r = ret.m;
        for i in 0..3 {
            for j in 0..3 {
                ret.m[i][j] = r[j][i];
            }
        }
        ret.m[3][0] = -ret.m[0][0] * m[3][0] - ret.m[1][0] * m[3][1] - ret.m[2][0] * m[3][2];
        ret.m[3][1] = -ret.m[0][1] * m[3][0] - ret.m[1][1] * m[3][1] - ret.m[2][1] * m[3][2];
        ret.m[3][2] = -ret.m[0][2] * m[3][0] - ret.m[1][2] * m[3][1] - ret.m[2][2] * m[3][2];
        ret
    }

    /// Tests whether the rotation block is orthonormal, i.e. whether the matrix could be a rigid
    /// view transform.
    pub fn is_view(&self) -> bool {
        let epsilon = 1e-6f32;
        let m = &self.m;
        let xv = Vector3::new(m[0][0], m[1][0], m[2][0]);
        if xv.length() < 1.0 - epsilon || 1.0 + epsilon < xv.length() {
            return false;
        }
        let yv = Vector3::new(m[0][1], m[1][1], m[2][1]);
        if yv.length() < 1.0 - epsilon || 1.0 + epsilon < yv.length() {
            return false;
        }
        let zv = Vector3::new(m[0][2], m[1][2], m[2][2]);
        if zv.length() < 1.0 - epsilon || 1.0 + epsilon < zv.length() {
            return false;
        }
        if xv.dot(&yv).abs() > epsilon || yv.dot(&zv).abs() > epsilon || zv.dot(&xv).abs() > epsilon
        {
            return false;
        }
        true
    }
}

impl Mul for Matrix4 {
    type Output = Matrix4;

    fn mul(self, mat: Matrix4) -> Matrix4 {
        let mut ret = Matrix4::IDENTITY;
        for i in 0..4 {
            for j in 0..4 {
                ret.m[i][j] = self.m[0][j] * mat.m[i][0]
                    + self.m[1][j] * mat.m[i][1]
                    + self.m[2][j] * mat.m[i][2]
                    + self.m[3][j] * mat.m[i][3];
            }
        }
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_inverse_quant() {
        assert_eq!(inverse_quant(false, 4, 0.5), 2.0);
        assert_eq!(inverse_quant(true, 4, 0.5), -2.0);
        assert_eq!(inverse_quant(true, 0, 0.5), 0.0);
    }

    #[test]
    fn verify_vector_dequantize_signs() {
        let v = Vector3::dequantize(0b101, 1, 2, 3, 1.0);
        assert_eq!(v, Vector3::new(-1.0, 2.0, -3.0));
    }

    #[test]
    fn verify_color_dequantize_signs() {
        let c = Color4::dequantize(0b1010, 1, 2, 3, 4, 2.0);
        assert_eq!(c, Color4::new(2.0, -4.0, 6.0, -8.0));
    }

    #[test]
    fn verify_slerp_endpoints() {
        let a = Vector3::new(1.0, 0.0, 0.0);
        let b = Vector3::new(0.0, 1.0, 0.0);
        assert_eq!(slerp(a, a, 0.5), a);
        let mid = slerp(a, b, 0.5);
        assert!((mid.length() - 1.0).abs() < 1e-6);
        assert!((mid.x - mid.y).abs() < 1e-6);
    }

    #[test]
    fn verify_quaternion_lift() {
        let q = Quaternion::from_encoded_vector(Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(q.w, 1.0);
        // Magnitudes above one clamp to w = 0 instead of going imaginary.
        let q = Quaternion::from_encoded_vector(Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(q.w, 0.0);
    }

    #[test]
    fn verify_quaternion_rotation() {
        // A rotation of pi/2 about z applied to the x axis yields the y axis.
        let half = std::f32::consts::FRAC_PI_4;
        let rot = Quaternion { w: half.cos(), x: 0.0, y: 0.0, z: half.sin() };
        let inv = Quaternion { w: half.cos(), x: 0.0, y: 0.0, z: -half.sin() };
        let v = Quaternion::from(Vector3::new(1.0, 0.0, 0.0));
        let rotated = Vector3::from(rot * v * inv);
        assert!((rotated.x - 0.0).abs() < 1e-6);
        assert!((rotated.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn verify_matrix_inverse() {
        // Translation by (1, 2, 3) composed with a scale of 2.
        let mut m = Matrix4::IDENTITY;
        m.m[0][0] = 2.0;
        m.m[1][1] = 2.0;
        m.m[2][2] = 2.0;
        m.m[3][0] = 1.0;
        m.m[3][1] = 2.0;
        m.m[3][2] = 3.0;

        let id = m * m.inverse();
        for i in 0..4 {
            for j in 0..4 {
                let expect = if i == j { 1.0 } else { 0.0 };
                assert!((id.m[i][j] - expect).abs() < 1e-5, "m[{}][{}] = {}", i, j, id.m[i][j]);
            }
        }
    }

    #[test]
    fn verify_matrix_transform_point() {
        let mut m = Matrix4::IDENTITY;
        m.m[3][0] = 1.0;
        m.m[3][1] = -1.0;
        let p = m.transform_point(Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(p, Vector3::new(2.0, 0.0, 1.0));
    }
}
