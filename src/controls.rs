//! Viewer state mutated by the UI between ticks.

use crate::capture::CameraFacing;
use crate::catalog::FilterCatalog;
use crate::error::EngineError;
use crate::params::{ParameterStore, ParameterValue, ParameterValueMap, RawValue};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// Controls shared between the UI glue and the render loop.
pub type SharedControls = Arc<Mutex<ViewerControls>>;

/// What the render loop reads at the start of a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickInputs {
    pub running: bool,
    pub camera_enabled: bool,
    pub facing: CameraFacing,
    pub filter_id: String,
    pub params: ParameterValueMap,
    pub viewport: (u32, u32),
}

#[derive(Debug, Clone)]
pub struct ViewerControls {
    camera_enabled: bool,
    facing: CameraFacing,
    /// Last id requested by the control surface, valid or not.
    selected_filter: String,
    params: ParameterStore,
    viewport: (u32, u32),
    running: bool,
}

impl ViewerControls {
    pub fn new(catalog: Arc<FilterCatalog>, initial_filter: &str) -> Result<Self, EngineError> {
        let params = ParameterStore::new(catalog, initial_filter)?;
        Ok(Self {
            camera_enabled: true,
            facing: CameraFacing::User,
            selected_filter: initial_filter.to_string(),
            params,
            viewport: (1280, 720),
            running: true,
        })
    }

    pub fn into_shared(self) -> SharedControls {
        Arc::new(Mutex::new(self))
    }

    /// One consistent view of the controls.
    pub fn snapshot(&self) -> TickInputs {
        TickInputs {
            running: self.running,
            camera_enabled: self.camera_enabled,
            facing: self.facing,
            filter_id: self.selected_filter.clone(),
            params: self.params.snapshot(),
            viewport: self.viewport,
        }
    }

    /// Requests filter `id`. The request is recorded even when `id` is
    /// unknown, so the render loop reports the error; parameters then stay
    /// with the previously active filter.
    pub fn select_filter(&mut self, id: &str) -> Result<(), EngineError> {
        self.selected_filter = id.to_string();
        self.params.select_filter(id)?;
        info!("Selected filter {}", self.params.active_filter().label());
        Ok(())
    }

    /// Steps through the catalog order, wrapping around.
    pub fn cycle_filter(&mut self, step: isize) -> Result<(), EngineError> {
        let next = self
            .params
            .catalog()
            .neighbor(self.params.active_filter().id.as_str(), step)
            .map(str::to_string);
        match next {
            Some(id) => self.select_filter(&id),
            None => Ok(()),
        }
    }

    pub fn set_parameter(&mut self, name: &str, raw: impl Into<RawValue>) -> Result<ParameterValue, EngineError> {
        self.params.set_value(name, raw)
    }

    pub fn reset_parameters(&mut self) {
        self.params.reset_to_defaults();
    }

    pub fn reset_parameter(&mut self, name: &str) -> Result<ParameterValue, EngineError> {
        self.params.reset_value(name)
    }

    pub fn set_camera_enabled(&mut self, enabled: bool) {
        if self.camera_enabled != enabled {
            info!("Camera {}", if enabled { "enabled" } else { "disabled" });
        }
        self.camera_enabled = enabled;
    }

    pub fn toggle_camera(&mut self) {
        self.set_camera_enabled(!self.camera_enabled);
    }

    pub fn set_facing(&mut self, facing: CameraFacing) {
        self.facing = facing;
    }

    pub fn toggle_facing(&mut self) {
        self.facing = self.facing.toggled();
        info!("Camera facing {:?}", self.facing);
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    /// Makes the next tick halt the loop.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    pub fn selected_filter(&self) -> &str {
        &self.selected_filter
    }

    pub fn camera_enabled(&self) -> bool {
        self.camera_enabled
    }

    pub fn facing(&self) -> CameraFacing {
        self.facing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controls() -> ViewerControls {
        ViewerControls::new(Arc::new(FilterCatalog::builtin()), "passthrough").unwrap()
    }

    #[test]
    fn snapshot_reflects_selection_and_values() {
        let mut controls = controls();
        controls.select_filter("duotone").unwrap();
        controls.set_parameter("Gamma", 1.25).unwrap();
        controls.set_viewport(640, 480);

        let inputs = controls.snapshot();
        assert_eq!(inputs.filter_id, "duotone");
        assert_eq!(inputs.params.get("Gamma"), Some(&ParameterValue::Float(1.25)));
        assert_eq!(inputs.viewport, (640, 480));
        assert!(inputs.running && inputs.camera_enabled);
    }

    #[test]
    fn unknown_selection_is_recorded_for_the_loop() {
        let mut controls = controls();
        controls.select_filter("ascii").unwrap();
        assert!(controls.select_filter("bogus").is_err());
        assert_eq!(controls.snapshot().filter_id, "bogus");
        assert_eq!(controls.params().active_filter().id, "ascii");

        controls.cycle_filter(1).unwrap();
        assert_eq!(controls.selected_filter(), "dither");
    }

    #[test]
    fn toggles_and_stop() {
        let mut controls = controls();
        controls.toggle_camera();
        controls.toggle_facing();
        let inputs = controls.snapshot();
        assert!(!inputs.camera_enabled);
        assert_eq!(inputs.facing, CameraFacing::Environment);

        controls.stop();
        assert!(!controls.snapshot().running);
    }
}
