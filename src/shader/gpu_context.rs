//! Shared GPU context for wgpu resources.

use crate::error::EngineError;
use std::sync::Arc;
use tracing::info;
use winit::window::Window;

/// Device and queue shared by the filter engine and the window presenter.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
}

impl GpuContext {
    /// Initializes a context able to present to `window`, returning the
    /// window's surface alongside it. Without a window the context is
    /// headless and no surface is returned.
    pub fn new(window: Option<Arc<Window>>) -> Result<(Arc<Self>, Option<wgpu::Surface<'static>>), EngineError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = match window {
            Some(window) => Some(
                instance
                    .create_surface(window)
                    .map_err(|e| EngineError::GpuInit(format!("failed to create surface: {e}")))?,
            ),
            None => None,
        };

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface.as_ref(),
            force_fallback_adapter: false,
        }))
        .map_err(|e| EngineError::GpuInit(format!("failed to find GPU adapter: {e:?}")))?;
        info!("Using GPU adapter: {}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Shaderlens Device"),
            required_features: wgpu::Features::empty(),
            required_limits: if surface.is_some() {
                wgpu::Limits::default()
            } else {
                wgpu::Limits::downlevel_defaults()
            },
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        }))
        .map_err(|e| EngineError::GpuInit(format!("failed to open GPU device: {e}")))?;

        let context = Arc::new(Self {
            device,
            queue,
            instance,
            adapter,
        });
        Ok((context, surface))
    }
}
