//! GPU shader pipeline.

pub mod compile;
pub mod gpu_context;
pub mod program_cache;
pub mod uniforms;
mod wgpu_pipeline;

pub use compile::{compile_fragment, compile_fragment_with, CompiledFragment};
pub use gpu_context::GpuContext;
pub use program_cache::{ProgramBuilder, ProgramCache, ProgramHandle};
pub use uniforms::{DrawUniforms, UniformLocation, UniformValue};
pub use wgpu_pipeline::{shader_capabilities, WgpuBackend};

use crate::source::TextureTarget;

/// Color an output surface is cleared to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearColor {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl ClearColor {
    pub const OPAQUE_BLACK: ClearColor = ClearColor { r: 0.0, g: 0.0, b: 0.0, a: 1.0 };
    pub const TRANSPARENT: ClearColor = ClearColor { r: 0.0, g: 0.0, b: 0.0, a: 0.0 };
}

impl From<ClearColor> for wgpu::Color {
    fn from(c: ClearColor) -> Self {
        wgpu::Color { r: c.r, g: c.g, b: c.b, a: c.a }
    }
}

/// GPU operations the render loop needs from a backend.
///
/// A tick issues at most one `clear` and one `draw`, then `end_frame`. A clear
/// is applied by the next draw, or by `end_frame` if nothing was drawn.
pub trait RenderBackend: ProgramBuilder + TextureTarget {
    fn surface_size(&self) -> (u32, u32);

    fn resize_surface(&mut self, width: u32, height: u32);

    fn clear(&mut self, color: ClearColor);

    /// One full-surface triangle (3 vertices) with `program` and `uniforms`.
    fn draw(&mut self, program: &Self::Program, uniforms: &DrawUniforms);

    fn end_frame(&mut self);
}
