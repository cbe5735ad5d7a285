//! Uniform slots and the CPU-side staging blocks they are written into.
//!
//! wgpu has no per-uniform locations. A "location" here is a byte slot inside
//! one of two uniform blocks: the fragment program's parameter block, whose
//! layout is reflected at compile time, and the fixed vertex-stage block.

use crate::params::ParameterValue;
use std::collections::HashMap;

/// Uniform consumed by the vertex stage instead of the fragment program.
pub const FLIP_HORIZONTAL: &str = "uFlipHorizontal";

/// Canvas size in pixels.
pub const RESOLUTION: &str = "uRes";

/// Seconds since the viewer started.
pub const TIME: &str = "uTime";

/// Shader-side type of a uniform block member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformType {
    Float,
    Int,
    Uint,
    Vec2,
    Vec3,
    Vec4,
    /// Anything else (matrices, arrays, nested structs). Never written.
    Other { size: u32 },
}

impl UniformType {
    pub fn size(self) -> u32 {
        match self {
            UniformType::Float | UniformType::Int | UniformType::Uint => 4,
            UniformType::Vec2 => 8,
            UniformType::Vec3 => 12,
            UniformType::Vec4 => 16,
            UniformType::Other { size } => size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformSlot {
    pub offset: u32,
    pub ty: UniformType,
}

/// Where a named uniform lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformLocation {
    Fragment(UniformSlot),
    Vertex(UniformSlot),
}

/// Reflected layout of a fragment program's parameter block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniformLayout {
    /// Block size in bytes; zero when the program declares no block.
    pub size: u32,
    pub slots: HashMap<String, UniformSlot>,
}

impl UniformLayout {
    pub fn slot(&self, name: &str) -> Option<UniformSlot> {
        self.slots.get(name).copied()
    }
}

/// Vertex-stage uniform block, bound at binding 3.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VertexParams {
    pub flip_horizontal: u32,
    pub _padding: [u32; 3],
}

impl VertexParams {
    pub const SIZE: u32 = std::mem::size_of::<VertexParams>() as u32;

    /// Slot of a vertex-stage uniform, if `name` is one.
    pub fn slot(name: &str) -> Option<UniformSlot> {
        (name == FLIP_HORIZONTAL).then_some(UniformSlot { offset: 0, ty: UniformType::Uint })
    }
}

/// A value ready to be written into a slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
}

impl UniformValue {
    /// Whether this value can be written into a slot of type `ty`.
    /// Integers also fill unsigned slots, the way GL accepts `uniform1i` for
    /// booleans.
    pub fn fits(&self, ty: UniformType) -> bool {
        matches!(
            (self, ty),
            (UniformValue::Float(_), UniformType::Float)
                | (UniformValue::Int(_), UniformType::Int | UniformType::Uint)
                | (UniformValue::Vec2(_), UniformType::Vec2)
                | (UniformValue::Vec3(_), UniformType::Vec3)
        )
    }

    fn write_to(&self, out: &mut [u8]) {
        match self {
            UniformValue::Float(v) => out[..4].copy_from_slice(&v.to_ne_bytes()),
            UniformValue::Int(v) => out[..4].copy_from_slice(&v.to_ne_bytes()),
            UniformValue::Vec2(v) => out[..8].copy_from_slice(bytemuck::cast_slice(v)),
            UniformValue::Vec3(v) => out[..12].copy_from_slice(bytemuck::cast_slice(v)),
        }
    }
}

impl From<ParameterValue> for UniformValue {
    fn from(value: ParameterValue) -> Self {
        match value {
            ParameterValue::Float(v) => UniformValue::Float(v),
            ParameterValue::Bool(b) => UniformValue::Int(b as i32),
            ParameterValue::Color(rgb) => UniformValue::Vec3(rgb),
        }
    }
}

/// Byte image of one uniform block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniformStaging {
    bytes: Vec<u8>,
}

impl UniformStaging {
    pub fn new(size: u32) -> Self {
        Self { bytes: vec![0; size as usize] }
    }

    /// Writes `value` at `slot`. Returns false, leaving the block untouched,
    /// when the value does not fit the slot's type or bounds.
    pub fn write(&mut self, slot: UniformSlot, value: UniformValue) -> bool {
        if !value.fits(slot.ty) {
            return false;
        }
        let start = slot.offset as usize;
        let end = start + slot.ty.size() as usize;
        match self.bytes.get_mut(start..end) {
            Some(out) => {
                value.write_to(out);
                true
            }
            None => false,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Everything bound for one draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawUniforms {
    pub fragment: UniformStaging,
    pub vertex: UniformStaging,
}

impl DrawUniforms {
    pub fn new(layout: &UniformLayout) -> Self {
        Self {
            fragment: UniformStaging::new(layout.size),
            vertex: UniformStaging::new(VertexParams::SIZE),
        }
    }

    /// Writes into whichever block `location` points at.
    pub fn set(&mut self, location: UniformLocation, value: UniformValue) -> bool {
        match location {
            UniformLocation::Fragment(slot) => self.fragment.write(slot, value),
            UniformLocation::Vertex(slot) => self.vertex.write(slot, value),
        }
    }

    /// The vertex block decoded back into its struct.
    pub fn vertex_params(&self) -> VertexParams {
        bytemuck::pod_read_unaligned(self.vertex.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_rejects_mismatched_types() {
        let mut staging = UniformStaging::new(32);
        let vec3 = UniformSlot { offset: 16, ty: UniformType::Vec3 };
        assert!(staging.write(vec3, UniformValue::Vec3([0.25, 0.5, 1.0])));
        assert!(!staging.write(vec3, UniformValue::Float(1.0)));
        let floats: [f32; 3] = bytemuck::pod_read_unaligned(&staging.as_bytes()[16..28]);
        assert_eq!(floats, [0.25, 0.5, 1.0]);

        let past_end = UniformSlot { offset: 28, ty: UniformType::Vec2 };
        assert!(!staging.write(past_end, UniformValue::Vec2([1.0, 1.0])));
    }

    #[test]
    fn booleans_bind_as_integers() {
        assert_eq!(UniformValue::from(ParameterValue::Bool(true)), UniformValue::Int(1));
        let mut uniforms = DrawUniforms::new(&UniformLayout::default());
        let flip = VertexParams::slot(FLIP_HORIZONTAL).unwrap();
        assert!(uniforms.set(UniformLocation::Vertex(flip), UniformValue::Int(1)));
        assert_eq!(uniforms.vertex_params().flip_horizontal, 1);
        assert!(VertexParams::slot("uOther").is_none());
    }
}
