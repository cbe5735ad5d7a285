//! Shaderlens: real-time webcam filter viewer CLI.

use anyhow::{anyhow, Result};
use clap::Parser;
use shaderlens::capture::{AsyncCapture, CameraFacing, CaptureBackend, NokhwaCapture};
use shaderlens::catalog::FilterCatalog;
use shaderlens::config::{ConfigWatcher, ViewerConfig, DEFAULT_FILTER};
use shaderlens::controls::{SharedControls, ViewerControls};
use shaderlens::output::{WindowConfig, WindowPresenter};
use shaderlens::render_loop::{RenderLoop, TickOutcome};
use shaderlens::shader::{GpuContext, WgpuBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowAttributes, WindowId};

/// Real-time webcam filter viewer.
#[derive(Parser, Debug)]
#[command(name = "shaderlens")]
#[command(about = "Apply GPU filters to webcam video in real-time")]
struct Args {
    /// Camera device index
    #[arg(short, long)]
    input: Option<u32>,

    /// Requested camera frame width
    #[arg(long)]
    width: Option<u32>,

    /// Requested camera frame height
    #[arg(long)]
    height: Option<u32>,

    /// Requested camera frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Filter to start with
    #[arg(short, long)]
    filter: Option<String>,

    /// YAML config file, reloaded on change
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Camera facing; user-facing output is mirrored
    #[arg(long, value_enum)]
    facing: Option<CameraFacing>,

    /// List available cameras and exit
    #[arg(long)]
    list_devices: bool,

    /// List available filters and exit
    #[arg(long)]
    list_filters: bool,
}

impl Args {
    /// Command-line flags win over the config file.
    fn apply_overrides(&self, config: &mut ViewerConfig) {
        if let Some(input) = self.input {
            config.camera.device_index = input;
        }
        if let Some(width) = self.width {
            config.camera.width = width;
        }
        if let Some(height) = self.height {
            config.camera.height = height;
        }
        if let Some(fps) = self.fps {
            config.camera.fps = fps;
        }
        if let Some(filter) = &self.filter {
            config.filter = filter.clone();
        }
        if let Some(facing) = self.facing {
            config.facing = facing;
        }
    }
}

type ViewerLoop = RenderLoop<WgpuBackend, Option<AsyncCapture>>;

/// Application state for the event loop.
struct ShaderlensApp {
    config: ViewerConfig,
    catalog: Arc<FilterCatalog>,
    controls: SharedControls,
    watcher: Option<ConfigWatcher>,
    window: Option<Arc<Window>>,
    presenter: Option<WindowPresenter>,
    render_loop: Option<ViewerLoop>,
    start_time: Instant,
    presented: u64,
    snapshots: u32,
}

impl ShaderlensApp {
    fn new(config: ViewerConfig, catalog: Arc<FilterCatalog>, controls: SharedControls, watcher: Option<ConfigWatcher>) -> Self {
        Self {
            config,
            catalog,
            controls,
            watcher,
            window: None,
            presenter: None,
            render_loop: None,
            start_time: Instant::now(),
            presented: 0,
            snapshots: 0,
        }
    }

    fn initialize(&mut self, window: Arc<Window>) -> Result<()> {
        let size = window.inner_size();
        self.controls.lock().set_viewport(size.width, size.height);

        let (gpu, surface) = GpuContext::new(Some(window.clone()))?;
        let surface = surface.ok_or_else(|| anyhow!("no surface for the window"))?;
        let presenter = WindowPresenter::new(gpu.clone(), surface, window)?;

        let settings = self.config.loop_settings();
        let (width, height) = settings.surface_size((size.width, size.height));
        let backend = WgpuBackend::new(gpu, width, height)?;
        info!("Filter backend initialized at {}x{}", width, height);

        info!("Opening camera device {}...", self.config.camera.device_index);
        let capture = match AsyncCapture::new(self.config.camera.clone()) {
            Ok(capture) => Some(capture),
            Err(e) => {
                error!("Failed to initialize capture: {}", e);
                None
            }
        };

        self.presenter = Some(presenter);
        self.render_loop = Some(RenderLoop::new(
            backend,
            capture,
            self.catalog.clone(),
            self.controls.clone(),
            settings,
        ));
        Ok(())
    }

    fn reload_config(&mut self) {
        let Some((previous, current)) = self.watcher.as_mut().and_then(ConfigWatcher::check_for_changes) else {
            return;
        };
        current.apply_changes(&previous, &mut self.controls.lock());
        if let Some(render_loop) = &mut self.render_loop {
            render_loop.apply_settings(current.loop_settings());
        }
        self.config = current;
    }

    /// Writes the current output surface to a PPM file in the working directory.
    fn save_snapshot(&mut self) -> Result<PathBuf> {
        let render_loop = self.render_loop.as_mut().ok_or_else(|| anyhow!("renderer not initialized"))?;
        let frame = render_loop.backend_mut().read_surface()?;
        self.snapshots += 1;
        let path = PathBuf::from(format!("shaderlens-{:03}.ppm", self.snapshots));
        std::fs::write(&path, frame.to_ppm())?;
        Ok(path)
    }

    fn handle_key(&mut self, event: &KeyEvent, event_loop: &ActiveEventLoop) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }
        if let Key::Character(c) = event.logical_key.as_ref() {
            if c.eq_ignore_ascii_case("s") {
                match self.save_snapshot() {
                    Ok(path) => info!("Saved snapshot to {:?}", path),
                    Err(e) => error!("Snapshot failed: {:#}", e),
                }
                return;
            }
        }
        let mut controls = self.controls.lock();
        match event.logical_key.as_ref() {
            Key::Named(NamedKey::ArrowRight) => {
                if let Err(e) = controls.cycle_filter(1) {
                    error!("{}", e);
                }
            }
            Key::Named(NamedKey::ArrowLeft) => {
                if let Err(e) = controls.cycle_filter(-1) {
                    error!("{}", e);
                }
            }
            Key::Named(NamedKey::Escape) => {
                controls.stop();
                event_loop.exit();
            }
            Key::Character(c) if c.eq_ignore_ascii_case("r") => {
                controls.reset_parameters();
                info!("Parameters reset to defaults");
            }
            Key::Character(c) if c.eq_ignore_ascii_case("c") => controls.toggle_camera(),
            Key::Character(c) if c.eq_ignore_ascii_case("f") => controls.toggle_facing(),
            _ => {}
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        self.reload_config();
        let (Some(render_loop), Some(presenter)) = (&mut self.render_loop, &mut self.presenter) else {
            return;
        };

        if render_loop.tick(self.start_time.elapsed()) == TickOutcome::Halt {
            event_loop.exit();
            return;
        }
        let executed = render_loop.stats().executed;
        if executed != self.presented {
            self.presented = executed;
            if let Err(e) = presenter.present(render_loop.backend().surface_view()) {
                error!("Present error: {}", e);
            }
        }
    }
}

impl ApplicationHandler for ShaderlensApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_config = WindowConfig::default();
        let window_attrs = WindowAttributes::default()
            .with_title(window_config.title)
            .with_inner_size(PhysicalSize::new(window_config.width, window_config.height));

        match event_loop.create_window(window_attrs) {
            Ok(window) => {
                let window = Arc::new(window);
                self.window = Some(window.clone());
                if let Err(e) = self.initialize(window) {
                    error!("Initialization error: {:#}", e);
                    event_loop.exit();
                }
            }
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Window closed");
                self.controls.lock().stop();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(presenter) = &mut self.presenter {
                    presenter.resize(size);
                }
                self.controls.lock().set_viewport(size.width, size.height);
            }
            WindowEvent::KeyboardInput { event, .. } => self.handle_key(&event, event_loop),
            WindowEvent::RedrawRequested => {
                self.redraw(event_loop);
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn list_filters(catalog: &FilterCatalog) {
    println!("Available filters:");
    for filter in catalog.list() {
        println!("  {:<12} {}", filter.id, filter.label());
        for spec in &filter.parameters {
            let choices = spec.choices();
            if !choices.is_empty() {
                let labels: Vec<String> = choices.iter().map(|(value, label)| format!("{value}={label}")).collect();
                println!("      {} {{{}}}", spec.display_name(), labels.join(", "));
                continue;
            }
            match spec.range() {
                Some((min, max, _)) => println!("      {} [{} .. {}]", spec.display_name(), min, max),
                None => println!("      {}", spec.display_name()),
            }
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if args.list_devices {
        println!("Available cameras:");
        match NokhwaCapture::list_devices() {
            Ok(devices) => {
                for device in devices {
                    println!("  [{}] {}", device.index, device.name);
                }
            }
            Err(e) => {
                eprintln!("Failed to list devices: {}", e);
            }
        }
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => ViewerConfig::load(path)?,
        None => ViewerConfig::default(),
    };
    let base_dir = args
        .config
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let catalog = Arc::new(config.build_catalog(&base_dir)?);

    if args.list_filters {
        list_filters(&catalog);
        return Ok(());
    }

    let watcher = args.config.clone().and_then(|path| ConfigWatcher::new(path, config.clone()));
    args.apply_overrides(&mut config);

    info!("Starting Shaderlens with {} filters...", catalog.len());
    let mut controls = ViewerControls::new(catalog.clone(), DEFAULT_FILTER)?;
    config.apply_to(&mut controls);
    let controls = controls.into_shared();

    let interrupted = controls.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down...");
        interrupted.lock().stop();
    })?;

    if !config.camera_enabled {
        warn!("Camera disabled by config; press C to enable it");
    }

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = ShaderlensApp::new(config, catalog, controls, watcher);
    event_loop.run_app(&mut app)?;

    Ok(())
}
