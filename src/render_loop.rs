//! Paced render loop tying the frame source, the program cache and the
//! backend together.
//!
//! The driver calls [`RenderLoop::tick`] once per display refresh with the
//! time since it started. A tick either does nothing (paced out), clears the
//! surface (camera off), or uploads the newest frame and draws the selected
//! filter over it. Per-tick errors never stop scheduling.

use crate::catalog::{FilterCatalog, FilterDefinition};
use crate::controls::{SharedControls, TickInputs};
use crate::error::EngineError;
use crate::shader::uniforms::{FLIP_HORIZONTAL, RESOLUTION, TIME};
use crate::shader::{ClearColor, DrawUniforms, ProgramCache, ProgramHandle, RenderBackend, UniformValue};
use crate::source::{FrameSource, FrameSourceAdapter, FrameStatus};
use crate::utils::FpsCounter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

pub const DEFAULT_FPS_CAP: f64 = 30.0;
pub const DEFAULT_SURFACE_SCALE: f64 = 0.75;
/// Positive caps below this are raised to it.
pub const MIN_FPS_CAP: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    /// Upper bound on executed ticks per second. Zero, negative or
    /// non-finite values disable pacing.
    pub fps_cap: f64,
    /// Output surface size relative to the viewport, at most 1. Values that
    /// are not positive and finite fall back to the default.
    pub surface_scale: f64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            fps_cap: DEFAULT_FPS_CAP,
            surface_scale: DEFAULT_SURFACE_SCALE,
        }
    }
}

impl LoopSettings {
    /// Output surface size for a viewport, never smaller than 1x1.
    pub fn surface_size(&self, viewport: (u32, u32)) -> (u32, u32) {
        let factor = self.effective_scale();
        let scale = |v: u32| ((v as f64 * factor).floor() as u32).max(1);
        (scale(viewport.0), scale(viewport.1))
    }

    fn effective_scale(&self) -> f64 {
        if self.surface_scale.is_finite() && self.surface_scale > 0.0 {
            self.surface_scale.min(1.0)
        } else {
            DEFAULT_SURFACE_SCALE
        }
    }
}

/// Drops ticks that arrive sooner than one frame interval after the last
/// executed tick.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    last: Option<Duration>,
}

impl FramePacer {
    pub fn new(fps_cap: f64) -> Self {
        let interval = if fps_cap.is_finite() && fps_cap > 0.0 {
            Duration::from_secs_f64(1.0 / fps_cap.max(MIN_FPS_CAP))
        } else {
            Duration::ZERO
        };
        Self { interval, last: None }
    }

    /// Whether a tick at `now` should run. Running ticks restart the interval.
    pub fn ready(&mut self, now: Duration) -> bool {
        if let Some(last) = self.last {
            if now >= last && now - last < self.interval {
                return false;
            }
        }
        self.last = Some(now);
        true
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Whether the camera feeds the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Camera off: the surface is cleared to opaque black.
    Idle,
    /// Camera on: frames are filtered onto the surface.
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    ScheduleNext,
    Halt,
}

/// Counters over the loop's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Ticks that passed pacing.
    pub executed: u64,
    /// Ticks dropped by pacing.
    pub paced_out: u64,
    pub draws: u64,
}

pub struct RenderLoop<B: RenderBackend, S> {
    backend: B,
    frames: FrameSourceAdapter<S>,
    catalog: Arc<FilterCatalog>,
    controls: SharedControls,
    settings: LoopSettings,
    pacer: FramePacer,
    cache: ProgramCache<B::Program>,
    state: LoopState,
    last_error: Option<EngineError>,
    last_reported: Option<String>,
    stats: LoopStats,
    fps: FpsCounter,
}

impl<B: RenderBackend, S: FrameSource> RenderLoop<B, S> {
    pub fn new(
        backend: B,
        source: S,
        catalog: Arc<FilterCatalog>,
        controls: SharedControls,
        settings: LoopSettings,
    ) -> Self {
        Self {
            backend,
            frames: FrameSourceAdapter::new(source),
            catalog,
            controls,
            pacer: FramePacer::new(settings.fps_cap),
            settings,
            cache: ProgramCache::new(),
            state: LoopState::Idle,
            last_error: None,
            last_reported: None,
            stats: LoopStats::default(),
            fps: FpsCounter::new(),
        }
    }

    /// Runs one scheduling step. `now` is the time since the driver started.
    pub fn tick(&mut self, now: Duration) -> TickOutcome {
        let inputs = self.controls.lock().snapshot();
        if !inputs.running {
            info!("Render loop halted after {} frames", self.stats.executed);
            return TickOutcome::Halt;
        }
        if !self.pacer.ready(now) {
            self.stats.paced_out += 1;
            return TickOutcome::ScheduleNext;
        }
        self.stats.executed += 1;

        let (width, height) = self.settings.surface_size(inputs.viewport);
        if self.backend.surface_size() != (width, height) {
            self.backend.resize_surface(width, height);
        }

        self.update_state(inputs.camera_enabled);
        match self.state {
            LoopState::Idle => self.backend.clear(ClearColor::OPAQUE_BLACK),
            LoopState::Active => {
                if self.frames.upload_if_ready(&mut self.backend) == FrameStatus::NotReady {
                    debug!("No camera frame yet, drawing without upload");
                }
                self.backend.clear(ClearColor::TRANSPARENT);
                match self.draw_filter(&inputs, now) {
                    Ok(()) => self.last_reported = None,
                    Err(e) => self.report(e),
                }
            }
        }
        self.backend.end_frame();

        if let Some(fps) = self.fps.update(now) {
            debug!("[Perf] Rendering at {:.2} FPS ({}x{})", fps, width, height);
        }
        TickOutcome::ScheduleNext
    }

    fn update_state(&mut self, camera_enabled: bool) {
        let next = if camera_enabled { LoopState::Active } else { LoopState::Idle };
        if next == self.state {
            return;
        }
        info!("Render loop {:?} -> {:?}", self.state, next);
        if next == LoopState::Idle {
            self.frames.reset();
        }
        self.state = next;
    }

    fn draw_filter(&mut self, inputs: &TickInputs, now: Duration) -> Result<(), EngineError> {
        let filter = self.catalog.get(&inputs.filter_id)?.clone();
        let handle = self.cache.get_program(&mut self.backend, &filter.shader_source)?;

        let mut uniforms = DrawUniforms::new(handle.layout());
        let (width, height) = self.backend.surface_size();
        self.bind(&handle, &mut uniforms, RESOLUTION, UniformValue::Vec2([width as f32, height as f32]));
        self.bind(&handle, &mut uniforms, TIME, UniformValue::Float(now.as_secs_f32()));
        self.bind(&handle, &mut uniforms, FLIP_HORIZONTAL, UniformValue::Int(inputs.facing.mirrors() as i32));
        self.bind_parameters(&filter, &handle, &mut uniforms, inputs);

        self.backend.draw(handle.program(), &uniforms);
        self.stats.draws += 1;
        Ok(())
    }

    fn bind_parameters(
        &mut self,
        filter: &FilterDefinition,
        handle: &ProgramHandle<B::Program>,
        uniforms: &mut DrawUniforms,
        inputs: &TickInputs,
    ) {
        for spec in &filter.parameters {
            let Some(value) = inputs.params.get(&spec.name) else {
                continue;
            };
            self.bind(handle, uniforms, &spec.uniform_name(), UniformValue::from(*value));
        }
    }

    /// Writes `value` if the program uses `name` with a compatible type.
    fn bind(&mut self, handle: &ProgramHandle<B::Program>, uniforms: &mut DrawUniforms, name: &str, value: UniformValue) {
        let Some(location) = self.cache.uniform_location(handle, name) else {
            return;
        };
        if !uniforms.set(location, value) {
            debug!("Uniform {} does not accept {:?}", name, value);
        }
    }

    /// Logs an error unless it repeats the previous one, and keeps it for
    /// [`take_error`](Self::take_error).
    fn report(&mut self, e: EngineError) {
        let message = e.to_string();
        if self.last_reported.as_deref() != Some(message.as_str()) {
            error!("{}", message);
            if let EngineError::ShaderBuild(build) = &e {
                debug!("Offending shader source:\n{}", build.shader_source);
            }
            self.last_reported = Some(message);
        }
        self.last_error = Some(e);
    }

    /// The most recent per-tick error, if any, clearing it.
    pub fn take_error(&mut self) -> Option<EngineError> {
        self.last_error.take()
    }

    /// Replaces pacing and scaling settings, e.g. after a config reload.
    pub fn apply_settings(&mut self, settings: LoopSettings) {
        if settings.fps_cap != self.settings.fps_cap {
            self.pacer = FramePacer::new(settings.fps_cap);
        }
        self.settings = settings;
    }

    pub fn settings(&self) -> LoopSettings {
        self.settings
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn cache(&self) -> &ProgramCache<B::Program> {
        &self.cache
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{glsl, ParameterSpec};
    use crate::controls::ViewerControls;
    use crate::error::{BuildStage, ShaderBuildError};
    use crate::frame::VideoFrame;
    use crate::shader::{compile_fragment, CompiledFragment, ProgramBuilder};
    use crate::source::tests::{two_row_frame, ScriptedSource};
    use crate::source::TextureTarget;

    /// Records every backend call instead of touching a GPU.
    #[derive(Default)]
    struct FakeBackend {
        size: (u32, u32),
        resizes: Vec<(u32, u32)>,
        clears: Vec<ClearColor>,
        draws: Vec<(usize, DrawUniforms)>,
        uploads: usize,
        built: usize,
        frames_ended: usize,
    }

    impl ProgramBuilder for FakeBackend {
        type Program = usize;

        fn build_program(&mut self, _fragment: &CompiledFragment) -> Result<usize, ShaderBuildError> {
            self.built += 1;
            Ok(self.built)
        }
    }

    impl TextureTarget for FakeBackend {
        fn upload_frame(&mut self, _frame: &VideoFrame) {
            self.uploads += 1;
        }
    }

    impl RenderBackend for FakeBackend {
        fn surface_size(&self) -> (u32, u32) {
            self.size
        }

        fn resize_surface(&mut self, width: u32, height: u32) {
            self.size = (width, height);
            self.resizes.push((width, height));
        }

        fn clear(&mut self, color: ClearColor) {
            self.clears.push(color);
        }

        fn draw(&mut self, program: &usize, uniforms: &DrawUniforms) {
            self.draws.push((*program, uniforms.clone()));
        }

        fn end_frame(&mut self) {
            self.frames_ended += 1;
        }
    }

    const FRAME: Duration = Duration::from_millis(40);

    fn extra_filter(id: &str, shader_source: String, parameters: Vec<ParameterSpec>) -> FilterDefinition {
        FilterDefinition {
            id: id.to_string(),
            display_name: id.to_string(),
            order: Some(50),
            shader_source,
            parameters,
        }
    }

    fn setup_with(
        catalog: FilterCatalog,
        filter: &str,
    ) -> (RenderLoop<FakeBackend, ScriptedSource>, SharedControls) {
        let catalog = Arc::new(catalog);
        let controls = ViewerControls::new(catalog.clone(), filter).unwrap().into_shared();
        let render_loop = RenderLoop::new(
            FakeBackend::default(),
            ScriptedSource::default(),
            catalog,
            controls.clone(),
            LoopSettings::default(),
        );
        (render_loop, controls)
    }

    fn setup(filter: &str) -> (RenderLoop<FakeBackend, ScriptedSource>, SharedControls) {
        setup_with(FilterCatalog::builtin(), filter)
    }

    fn read_f32(bytes: &[u8], offset: u32) -> f32 {
        let offset = offset as usize;
        bytemuck::pod_read_unaligned(&bytes[offset..offset + 4])
    }

    #[test]
    fn ticks_inside_the_frame_interval_do_nothing() {
        let (mut render_loop, _controls) = setup("duotone");
        for ms in [0, 10, 20, 30, 34, 40, 60, 68] {
            assert_eq!(render_loop.tick(Duration::from_millis(ms)), TickOutcome::ScheduleNext);
        }
        // Executed at 0, 34 and 68 ms.
        let stats = render_loop.stats();
        assert_eq!(stats.executed, 3);
        assert_eq!(stats.paced_out, 5);
        assert_eq!(stats.draws, 3);
        assert_eq!(render_loop.backend().draws.len(), 3);
        assert_eq!(render_loop.backend().frames_ended, 3);
    }

    #[test]
    fn surface_follows_scaled_viewport() {
        let (mut render_loop, controls) = setup("passthrough");
        controls.lock().set_viewport(1000, 501);
        render_loop.tick(Duration::ZERO);
        render_loop.tick(FRAME);
        assert_eq!(render_loop.backend().resizes, vec![(750, 375)]);

        controls.lock().set_viewport(1, 1);
        render_loop.tick(FRAME * 2);
        assert_eq!(render_loop.backend().size, (1, 1));
    }

    #[test]
    fn camera_off_clears_to_black_without_drawing() {
        let (mut render_loop, controls) = setup("ascii");
        controls.lock().set_camera_enabled(false);
        render_loop.backend_mut().size = (960, 540);
        render_loop.tick(Duration::ZERO);

        assert_eq!(render_loop.state(), LoopState::Idle);
        assert_eq!(render_loop.backend().clears, vec![ClearColor::OPAQUE_BLACK]);
        assert!(render_loop.backend().draws.is_empty());

        controls.lock().set_camera_enabled(true);
        render_loop.tick(FRAME);
        assert_eq!(render_loop.state(), LoopState::Active);
        assert_eq!(render_loop.backend().clears.last(), Some(&ClearColor::TRANSPARENT));
        assert_eq!(render_loop.backend().draws.len(), 1);
    }

    #[test]
    fn fresh_frames_are_uploaded_once() {
        let (mut render_loop, _controls) = setup("linocut");
        render_loop.frames.source_mut().push(Some(two_row_frame()));
        render_loop.tick(Duration::ZERO);
        render_loop.tick(FRAME);
        assert_eq!(render_loop.backend().uploads, 1);
        assert_eq!(render_loop.backend().draws.len(), 2);
    }

    #[test]
    fn binds_resolution_time_flip_and_parameters() {
        let (mut render_loop, controls) = setup("duotone");
        controls.lock().set_viewport(400, 200);
        controls.lock().set_parameter("Gamma", 1.5).unwrap();
        render_loop.tick(Duration::from_millis(2500));

        let catalog = FilterCatalog::builtin();
        let source = &catalog.get("duotone").unwrap().shader_source;
        let layout = compile_fragment(source).unwrap().uniforms;
        let (_, uniforms) = &render_loop.backend().draws[0];
        let bytes = uniforms.fragment.as_bytes();

        let res = layout.slot("uRes").unwrap().offset;
        assert_eq!(read_f32(bytes, res), 300.0);
        assert_eq!(read_f32(bytes, res + 4), 150.0);
        assert_eq!(read_f32(bytes, layout.slot("uTime").unwrap().offset), 2.5);
        assert_eq!(read_f32(bytes, layout.slot("uGamma").unwrap().offset), 1.5);
        assert_eq!(read_f32(bytes, layout.slot("uContrast").unwrap().offset), 1.75);
        assert_eq!(uniforms.vertex_params().flip_horizontal, 1);

        controls.lock().toggle_facing();
        render_loop.tick(Duration::from_millis(2600));
        assert_eq!(render_loop.backend().draws[1].1.vertex_params().flip_horizontal, 0);
        assert_eq!(render_loop.cache().compile_count(), 1);
    }

    #[test]
    fn unknown_filter_skips_draw_and_keeps_scheduling() {
        let (mut render_loop, controls) = setup("duotone");
        assert!(controls.lock().select_filter("missing").is_err());

        for i in 0..3 {
            assert_eq!(render_loop.tick(FRAME * i), TickOutcome::ScheduleNext);
        }
        assert!(render_loop.backend().draws.is_empty());
        assert_eq!(render_loop.backend().clears, vec![ClearColor::TRANSPARENT; 3]);
        assert!(matches!(render_loop.take_error(), Some(EngineError::UnknownFilterId(id)) if id == "missing"));
        assert!(render_loop.take_error().is_none());
    }

    #[test]
    fn broken_shader_is_retried_every_tick() {
        let broken = extra_filter("broken", "#version 450\nvoid main() { fragColor = ; }".to_string(), Vec::new());
        let catalog = FilterCatalog::builtin().with_extra(vec![broken]).unwrap();
        let (mut render_loop, _controls) = setup_with(catalog, "broken");

        for i in 0..4 {
            assert_eq!(render_loop.tick(FRAME * i), TickOutcome::ScheduleNext);
            assert_eq!(render_loop.cache().compile_count(), i as usize + 1);
        }
        assert!(render_loop.backend().draws.is_empty());
        assert_eq!(render_loop.backend().built, 0);
        match render_loop.take_error() {
            Some(EngineError::ShaderBuild(e)) => assert_eq!(e.stage, BuildStage::Compile),
            other => panic!("expected a shader build error, got {other:?}"),
        }
    }

    #[test]
    fn absent_uniform_is_skipped_without_aborting_the_draw() {
        let body = "void main() { fragColor = texture(uTex, vUV); }\n";
        let gain = ParameterSpec::float("Gain", "Gain", 0.0, 2.0, 0.1, 1.0);
        let filter = extra_filter("plain", glsl::assemble(&[], &[], body), vec![gain]);
        let catalog = FilterCatalog::builtin().with_extra(vec![filter]).unwrap();
        let (mut render_loop, _controls) = setup_with(catalog, "plain");

        render_loop.tick(Duration::ZERO);
        render_loop.tick(FRAME);
        assert_eq!(render_loop.backend().draws.len(), 2);
        assert!(render_loop.take_error().is_none());
        // uRes, uTime, uFlipHorizontal and uGain, each resolved once.
        assert_eq!(render_loop.cache().lookup_count(), 4);
    }

    #[test]
    fn stop_halts_without_work() {
        let (mut render_loop, controls) = setup("passthrough");
        controls.lock().stop();
        assert_eq!(render_loop.tick(Duration::ZERO), TickOutcome::Halt);
        assert_eq!(render_loop.stats(), LoopStats::default());
        assert!(render_loop.backend().clears.is_empty());
    }

    #[test]
    fn pacer_runs_first_tick_and_respects_cap() {
        let mut pacer = FramePacer::new(30.0);
        assert!(pacer.ready(Duration::from_millis(5)));
        assert!(!pacer.ready(Duration::from_millis(30)));
        assert!(pacer.ready(Duration::from_millis(39)));

        let mut unpaced = FramePacer::new(0.0);
        assert!(unpaced.ready(Duration::ZERO));
        assert!(unpaced.ready(Duration::ZERO));
    }

    #[test]
    fn pacer_tolerates_degenerate_caps() {
        assert_eq!(FramePacer::new(1.0e-300).interval(), Duration::from_secs(1));
        assert_eq!(FramePacer::new(0.25).interval(), Duration::from_secs(1));
        assert_eq!(FramePacer::new(f64::NAN).interval(), Duration::ZERO);
        assert_eq!(FramePacer::new(f64::INFINITY).interval(), Duration::ZERO);
        assert_eq!(FramePacer::new(-5.0).interval(), Duration::ZERO);
        assert_eq!(FramePacer::new(1.0e300).interval(), Duration::ZERO);
    }

    #[test]
    fn surface_scale_is_bounded() {
        let viewport = (1280, 720);
        let size = |surface_scale| LoopSettings { fps_cap: 30.0, surface_scale }.surface_size(viewport);
        assert_eq!(size(1.0e300), (1280, 720));
        assert_eq!(size(f64::INFINITY), (960, 540));
        assert_eq!(size(f64::NAN), (960, 540));
        assert_eq!(size(-2.0), (960, 540));
        assert_eq!(size(1.0e-300), (1, 1));
    }

    #[test]
    fn tiny_fps_cap_from_reload_keeps_running() {
        let (mut render_loop, _controls) = setup("passthrough");
        render_loop.tick(Duration::ZERO);
        render_loop.apply_settings(LoopSettings { fps_cap: 1.0e-300, surface_scale: 0.75 });
        render_loop.tick(Duration::from_millis(500));
        render_loop.tick(Duration::from_millis(1000));
        assert_eq!(render_loop.stats().executed, 2);
    }

    #[test]
    fn settings_reload_replaces_pacing() {
        let (mut render_loop, _controls) = setup("passthrough");
        render_loop.tick(Duration::ZERO);
        render_loop.apply_settings(LoopSettings { fps_cap: 10.0, surface_scale: 0.5 });
        render_loop.tick(Duration::from_millis(50));
        render_loop.tick(Duration::from_millis(160));
        assert_eq!(render_loop.stats().executed, 3);
        assert_eq!(render_loop.settings().surface_scale, 0.5);
    }
}
