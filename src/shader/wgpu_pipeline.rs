//! wgpu implementation of the render backend.

use super::compile::{
    CompiledFragment, FRAGMENT_ENTRY_POINT, PARAMS_BINDING, SAMPLER_BINDING, TEXTURE_BINDING, VERTEX_PARAMS_BINDING,
};
use super::gpu_context::GpuContext;
use super::program_cache::ProgramBuilder;
use super::uniforms::{DrawUniforms, VertexParams};
use super::{ClearColor, RenderBackend};
use crate::error::{EngineError, ShaderBuildError};
use crate::frame::{PixelFormat, VideoFrame};
use crate::source::TextureTarget;
use anyhow::{anyhow, Result};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, info};

/// Fixed vertex stage: one oversized triangle covering the viewport.
const VERTEX_SHADER: &str = r#"
struct VertexParams {
    flip_horizontal: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(3) var<uniform> vertex_params: VertexParams;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    var positions = array<vec2<f32>, 3>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(3.0, -1.0),
        vec2<f32>(-1.0, 3.0),
    );
    let pos = positions[index];
    var uv = 0.5 * (pos + vec2<f32>(1.0, 1.0));
    if (vertex_params.flip_horizontal != 0u) {
        uv.x = 1.0 - uv.x;
    }
    var out: VertexOutput;
    out.clip_position = vec4<f32>(pos, 0.0, 1.0);
    out.uv = uv;
    return out;
}
"#;

const VERTEX_ENTRY_POINT: &str = "vs_main";

/// Format of the input texture and the output surface.
pub const SURFACE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Smallest fragment uniform buffer, used by programs without a parameter block.
const MIN_UNIFORM_BUFFER: u64 = 16;

/// Parses and validates the fixed vertex stage.
fn validate_vertex_stage() -> Result<(), EngineError> {
    let module = naga::front::wgsl::parse_str(VERTEX_SHADER)
        .map_err(|e| EngineError::VertexStage(e.emit_to_string(VERTEX_SHADER)))?;
    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::default());
    validator
        .validate(&module)
        .map_err(|e| EngineError::VertexStage(e.emit_to_string(VERTEX_SHADER)))?;
    Ok(())
}

/// Shader capabilities a device opened with `features` accepts.
pub fn shader_capabilities(features: wgpu::Features) -> Capabilities {
    let mut capabilities = Capabilities::default();
    capabilities.set(Capabilities::FLOAT64, features.contains(wgpu::Features::SHADER_F64));
    capabilities.set(Capabilities::SHADER_INT64, features.contains(wgpu::Features::SHADER_INT64));
    capabilities.set(Capabilities::SHADER_FLOAT16, features.contains(wgpu::Features::SHADER_F16));
    capabilities
}

fn create_surface_texture(device: &wgpu::Device, width: u32, height: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Output Surface"),
        size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: SURFACE_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

fn create_input_texture(device: &wgpu::Device, width: u32, height: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Input Texture"),
        size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: SURFACE_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

/// Renders filter programs into an offscreen RGBA surface.
pub struct WgpuBackend {
    gpu: Arc<GpuContext>,
    vertex_module: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,

    input_texture: wgpu::Texture,
    input_size: (u32, u32),
    fragment_uniforms: wgpu::Buffer,
    vertex_uniforms: wgpu::Buffer,
    bind_group: Option<wgpu::BindGroup>,

    surface: wgpu::Texture,
    surface_view: wgpu::TextureView,
    surface_size: (u32, u32),
    pending_clear: Option<ClearColor>,
    readback_buffer: Option<wgpu::Buffer>,
    programs_built: usize,
}

impl WgpuBackend {
    /// Creates the backend with a `width` x `height` output surface.
    /// Fails if the fixed vertex stage does not build.
    pub fn new(gpu: Arc<GpuContext>, width: u32, height: u32) -> Result<Self, EngineError> {
        validate_vertex_stage()?;
        let device = &gpu.device;
        let (width, height) = (width.max(1), height.max(1));

        let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Vertex Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(VERTEX_SHADER)),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Filter Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: TEXTURE_BINDING,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: SAMPLER_BINDING,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: PARAMS_BINDING,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: VERTEX_PARAMS_BINDING,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Filter Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Input Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let fragment_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Filter Uniform Buffer"),
            size: MIN_UNIFORM_BUFFER,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let vertex_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Vertex Uniform Buffer"),
            size: VertexParams::SIZE as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let input_texture = create_input_texture(device, 1, 1);
        let surface = create_surface_texture(device, width, height);
        let surface_view = surface.create_view(&wgpu::TextureViewDescriptor::default());
        info!("Created output surface {}x{}", width, height);

        Ok(Self {
            vertex_module,
            bind_group_layout,
            pipeline_layout,
            sampler,
            input_texture,
            input_size: (1, 1),
            fragment_uniforms,
            vertex_uniforms,
            bind_group: None,
            surface,
            surface_view,
            surface_size: (width, height),
            pending_clear: None,
            readback_buffer: None,
            programs_built: 0,
            gpu,
        })
    }

    /// View of the output surface, for presenting.
    pub fn surface_view(&self) -> &wgpu::TextureView {
        &self.surface_view
    }

    pub fn gpu(&self) -> &Arc<GpuContext> {
        &self.gpu
    }

    /// Grows the fragment uniform buffer to hold at least `size` bytes.
    fn ensure_uniform_capacity(&mut self, size: u64) {
        if size <= self.fragment_uniforms.size() {
            return;
        }
        let size = size.next_multiple_of(MIN_UNIFORM_BUFFER);
        debug!("Growing filter uniform buffer to {} bytes", size);
        self.fragment_uniforms = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Filter Uniform Buffer"),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.bind_group = None;
    }

    fn bind_group(&mut self) -> &wgpu::BindGroup {
        let gpu = &self.gpu;
        let input_texture = &self.input_texture;
        let (sampler, fragment, vertex, layout) =
            (&self.sampler, &self.fragment_uniforms, &self.vertex_uniforms, &self.bind_group_layout);
        self.bind_group.get_or_insert_with(|| {
            let input_view = input_texture.create_view(&wgpu::TextureViewDescriptor::default());
            gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Filter Bind Group"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: TEXTURE_BINDING,
                        resource: wgpu::BindingResource::TextureView(&input_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: SAMPLER_BINDING,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                    wgpu::BindGroupEntry { binding: PARAMS_BINDING, resource: fragment.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: VERTEX_PARAMS_BINDING, resource: vertex.as_entire_binding() },
                ],
            })
        })
    }

    /// Records one pass over the output surface, optionally drawing.
    fn submit_pass(&mut self, load: wgpu::LoadOp<wgpu::Color>, pipeline: Option<&wgpu::RenderPipeline>) {
        if pipeline.is_some() {
            self.bind_group();
        }
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Filter Encoder") });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Filter Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.surface_view,
                    resolve_target: None,
                    ops: wgpu::Operations { load, store: wgpu::StoreOp::Store },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            if let (Some(pipeline), Some(bind_group)) = (pipeline, self.bind_group.as_ref()) {
                render_pass.set_pipeline(pipeline);
                render_pass.set_bind_group(0, bind_group, &[]);
                render_pass.draw(0..3, 0..1);
            }
        }
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Copies the output surface back to the CPU as a top-down RGBA frame.
    ///
    /// Consumers outside the window (snapshots, exporters) read the rendered
    /// output through this between ticks.
    pub fn read_surface(&mut self) -> Result<VideoFrame> {
        let (width, height) = self.surface_size;
        let unpadded_row = width * 4;
        let padded_row = unpadded_row.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let size = padded_row as wgpu::BufferAddress * height as wgpu::BufferAddress;

        let device = &self.gpu.device;
        let buffer = match self.readback_buffer.take() {
            Some(buffer) if buffer.size() == size => buffer,
            _ => device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Readback Buffer"),
                size,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            }),
        };

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Readback Encoder") });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.surface,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        self.gpu.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device
            .poll(wgpu::PollType::Wait { submission_index: None, timeout: None })
            .map_err(|e| anyhow!("GPU poll failed: {:?}", e))?;
        receiver.recv()??;

        let mut data = Vec::with_capacity((unpadded_row * height) as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks_exact(padded_row as usize) {
                data.extend_from_slice(&row[..unpadded_row as usize]);
            }
        }
        buffer.unmap();
        self.readback_buffer = Some(buffer);

        Ok(VideoFrame::from_data(width, height, PixelFormat::Rgba, data))
    }
}

impl ProgramBuilder for WgpuBackend {
    type Program = wgpu::RenderPipeline;

    fn capabilities(&self) -> Capabilities {
        shader_capabilities(self.gpu.device.features())
    }

    fn build_program(&mut self, fragment: &CompiledFragment) -> Result<wgpu::RenderPipeline, ShaderBuildError> {
        self.programs_built += 1;
        let device = &self.gpu.device;
        let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
        let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("Fragment Shader {}", self.programs_built)),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(fragment.wgsl.as_str())),
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&format!("Render Pipeline {}", self.programs_built)),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.vertex_module,
                entry_point: Some(VERTEX_ENTRY_POINT),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: Some(FRAGMENT_ENTRY_POINT),
                targets: &[Some(wgpu::ColorTargetState {
                    format: SURFACE_FORMAT,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        if let Some(error) = pollster::block_on(scope.pop()) {
            return Err(ShaderBuildError::link(&fragment.source, error.to_string()));
        }
        Ok(pipeline)
    }
}

impl TextureTarget for WgpuBackend {
    fn upload_frame(&mut self, frame: &VideoFrame) {
        let rgba = frame.to_rgba();
        if self.input_size != (rgba.width, rgba.height) {
            info!("Creating input texture {}x{}", rgba.width, rgba.height);
            self.input_texture = create_input_texture(&self.gpu.device, rgba.width, rgba.height);
            self.input_size = (rgba.width, rgba.height);
            self.bind_group = None;
        }
        self.gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.input_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &rgba.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(rgba.width * 4),
                rows_per_image: Some(rgba.height),
            },
            wgpu::Extent3d { width: rgba.width, height: rgba.height, depth_or_array_layers: 1 },
        );
    }
}

impl RenderBackend for WgpuBackend {
    fn surface_size(&self) -> (u32, u32) {
        self.surface_size
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        if self.surface_size == (width, height) {
            return;
        }
        info!("Resizing output surface to {}x{}", width, height);
        self.surface = create_surface_texture(&self.gpu.device, width, height);
        self.surface_view = self.surface.create_view(&wgpu::TextureViewDescriptor::default());
        self.surface_size = (width, height);
        self.readback_buffer = None;
    }

    fn clear(&mut self, color: ClearColor) {
        self.pending_clear = Some(color);
    }

    fn draw(&mut self, program: &wgpu::RenderPipeline, uniforms: &DrawUniforms) {
        self.ensure_uniform_capacity(uniforms.fragment.len() as u64);
        if !uniforms.fragment.is_empty() {
            self.gpu.queue.write_buffer(&self.fragment_uniforms, 0, uniforms.fragment.as_bytes());
        }
        self.gpu.queue.write_buffer(&self.vertex_uniforms, 0, uniforms.vertex.as_bytes());

        let load = match self.pending_clear.take() {
            Some(color) => wgpu::LoadOp::Clear(color.into()),
            None => wgpu::LoadOp::Load,
        };
        self.submit_pass(load, Some(program));
    }

    fn end_frame(&mut self) {
        if let Some(color) = self.pending_clear.take() {
            self.submit_pass(wgpu::LoadOp::Clear(color.into()), None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_follow_device_features() {
        assert_eq!(shader_capabilities(wgpu::Features::empty()), Capabilities::default());

        let wide = shader_capabilities(wgpu::Features::SHADER_F64 | wgpu::Features::SHADER_F16);
        assert!(wide.contains(Capabilities::FLOAT64));
        assert!(wide.contains(Capabilities::SHADER_FLOAT16));
        assert!(!wide.contains(Capabilities::SHADER_INT64));
    }

    #[test]
    fn vertex_stage_builds_without_optional_features() {
        assert!(validate_vertex_stage().is_ok());
    }
}
