//! YAML viewer configuration and hot reload.

use crate::capture::{CameraFacing, CaptureConfig};
use crate::catalog::{glsl, FilterCatalog, FilterDefinition, ParameterSpec};
use crate::controls::ViewerControls;
use crate::params::RawValue;
use crate::render_loop::{LoopSettings, DEFAULT_FPS_CAP, DEFAULT_SURFACE_SCALE};
use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use tracing::{error, info, warn};

/// Filter selected when nothing else asks for one.
pub const DEFAULT_FILTER: &str = "passthrough";

/// Shader files containing this are used verbatim; anything else is treated
/// as a body and gets the parameter block prepended.
const FULL_PROGRAM_MARKER: &str = "#version";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub fps_cap: f64,
    pub surface_scale: f64,
    /// Initially selected filter id.
    pub filter: String,
    /// Overrides applied on top of the selected filter's defaults.
    pub parameters: HashMap<String, RawValue>,
    pub camera_enabled: bool,
    pub facing: CameraFacing,
    pub camera: CaptureConfig,
    /// Extra filters registered at startup.
    pub filters: Vec<CustomFilter>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            fps_cap: DEFAULT_FPS_CAP,
            surface_scale: DEFAULT_SURFACE_SCALE,
            filter: DEFAULT_FILTER.to_string(),
            parameters: HashMap::new(),
            camera_enabled: true,
            facing: CameraFacing::User,
            camera: CaptureConfig::default(),
            filters: Vec::new(),
        }
    }
}

/// A filter defined outside the binary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CustomFilter {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub order: Option<i32>,
    /// Fragment shader path, relative to the config file.
    pub shader: PathBuf,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

impl CustomFilter {
    /// Reads the shader and builds the definition.
    pub fn load(&self, base_dir: &Path) -> Result<FilterDefinition> {
        let path = base_dir.join(&self.shader);
        info!("Loading shader for filter {} from {:?}", self.id, path);
        let code = fs::read_to_string(&path).with_context(|| format!("failed to read shader {:?}", path))?;
        let shader_source = if code.contains(FULL_PROGRAM_MARKER) {
            code
        } else {
            glsl::assemble(&self.parameters, &[], &code)
        };
        Ok(FilterDefinition {
            id: self.id.clone(),
            display_name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            order: self.order,
            shader_source,
            parameters: self.parameters.clone(),
        })
    }
}

impl ViewerConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| format!("failed to read config {:?}", path))?;
        Self::from_yaml(&content).with_context(|| format!("failed to parse config {:?}", path))
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            fps_cap: self.fps_cap,
            surface_scale: self.surface_scale,
        }
    }

    /// Built-in filters plus the custom ones, with shader paths resolved
    /// against `base_dir`.
    pub fn build_catalog(&self, base_dir: &Path) -> Result<FilterCatalog> {
        let extra = self
            .filters
            .iter()
            .map(|filter| filter.load(base_dir))
            .collect::<Result<Vec<_>>>()?;
        Ok(FilterCatalog::builtin().with_extra(extra)?)
    }

    /// Applies selection, overrides and camera flags to fresh controls.
    pub fn apply_to(&self, controls: &mut ViewerControls) {
        if let Err(e) = controls.select_filter(&self.filter) {
            error!("Config selects unusable filter: {}", e);
        }
        self.apply_parameters(controls);
        controls.set_camera_enabled(self.camera_enabled);
        controls.set_facing(self.facing);
    }

    /// Applies what differs from `previous`. Switching filters resets its
    /// parameters, so all overrides are re-applied after a switch. Without a
    /// switch, overrides dropped from the file return to their defaults.
    pub fn apply_changes(&self, previous: &ViewerConfig, controls: &mut ViewerControls) {
        if self.filter != previous.filter {
            if let Err(e) = controls.select_filter(&self.filter) {
                error!("Config selects unusable filter: {}", e);
            }
            self.apply_parameters(controls);
        } else if self.parameters != previous.parameters {
            for name in previous.parameters.keys() {
                if !self.parameters.contains_key(name) {
                    if let Err(e) = controls.reset_parameter(name) {
                        warn!("Ignoring removed config parameter: {}", e);
                    }
                }
            }
            for (name, raw) in &self.parameters {
                if previous.parameters.get(name) != Some(raw) {
                    self.apply_parameter(controls, name, raw);
                }
            }
        }
        if self.camera_enabled != previous.camera_enabled {
            controls.set_camera_enabled(self.camera_enabled);
        }
        if self.facing != previous.facing {
            controls.set_facing(self.facing);
        }
        if self.camera != previous.camera || self.filters != previous.filters {
            warn!("Camera settings and custom filters take effect after a restart");
        }
    }

    fn apply_parameters(&self, controls: &mut ViewerControls) {
        for (name, raw) in &self.parameters {
            self.apply_parameter(controls, name, raw);
        }
    }

    fn apply_parameter(&self, controls: &mut ViewerControls, name: &str, raw: &RawValue) {
        if let Err(e) = controls.set_parameter(name, raw.clone()) {
            warn!("Ignoring config parameter: {}", e);
        }
    }
}

/// Manages configuration file watching and reloading.
pub struct ConfigWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    rx: Receiver<std::result::Result<Event, notify::Error>>,
    current: ViewerConfig,
}

impl ConfigWatcher {
    /// Starts watching `path`, whose contents are currently `initial`.
    pub fn new(path: PathBuf, initial: ViewerConfig) -> Option<Self> {
        let (tx, rx) = channel();

        match RecommendedWatcher::new(tx, notify::Config::default()) {
            Ok(mut watcher) => {
                if let Err(e) = watcher.watch(&path, RecursiveMode::NonRecursive) {
                    warn!("Failed to watch config file {:?}: {}", path, e);
                    return None;
                }
                info!("Watching config file {:?} for changes", path);
                Some(Self {
                    path,
                    _watcher: watcher,
                    rx,
                    current: initial,
                })
            }
            Err(e) => {
                warn!("Failed to create config watcher: {}", e);
                None
            }
        }
    }

    /// Returns `(previous, current)` when the file changed and still parses.
    pub fn check_for_changes(&mut self) -> Option<(ViewerConfig, ViewerConfig)> {
        let mut needs_reload = false;
        while let Ok(res) = self.rx.try_recv() {
            if let Ok(event) = res {
                if matches!(event.kind, notify::EventKind::Modify(_) | notify::EventKind::Create(_)) {
                    needs_reload = true;
                }
            }
        }
        if !needs_reload {
            return None;
        }

        info!("Config file changed, checking for updates...");
        match ViewerConfig::load(&self.path) {
            Ok(config) if config == self.current => None,
            Ok(config) => {
                let previous = std::mem::replace(&mut self.current, config.clone());
                Some((previous, config))
            }
            Err(e) => {
                error!("{:#}", e);
                None
            }
        }
    }

    pub fn current(&self) -> &ViewerConfig {
        &self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterValue;
    use crate::render_loop::FramePacer;
    use std::sync::Arc;
    use std::time::Duration;

    fn controls() -> ViewerControls {
        ViewerControls::new(Arc::new(FilterCatalog::builtin()), DEFAULT_FILTER).unwrap()
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = ViewerConfig::from_yaml("{}").unwrap();
        assert_eq!(config, ViewerConfig::default());
        assert_eq!(config.loop_settings(), LoopSettings::default());
    }

    #[test]
    fn parses_overrides_and_camera() {
        let config = ViewerConfig::from_yaml(
            r##"
fps_cap: 24
filter: duotone
facing: environment
parameters:
  Gamma: 1.2
  ColorA: "#00FF88"
camera:
  device_index: 2
  width: 640
"##,
        )
        .unwrap();
        assert_eq!(config.fps_cap, 24.0);
        assert_eq!(config.facing, CameraFacing::Environment);
        assert_eq!(config.parameters.get("Gamma"), Some(&RawValue::Number(1.2)));
        assert_eq!(config.camera.device_index, 2);
        assert_eq!(config.camera.height, 720);
    }

    #[test]
    fn degenerate_loop_settings_are_tolerated() {
        let config = ViewerConfig::from_yaml("fps_cap: 1.0e-300\nsurface_scale: 1.0e300\n").unwrap();
        let settings = config.loop_settings();
        assert_eq!(FramePacer::new(settings.fps_cap).interval(), Duration::from_secs(1));
        assert_eq!(settings.surface_size((640, 480)), (640, 480));
    }

    #[test]
    fn apply_to_selects_and_overrides() {
        let config = ViewerConfig::from_yaml("filter: ascii\nparameters:\n  Invert: true\n  Bogus: 3\n").unwrap();
        let mut controls = controls();
        config.apply_to(&mut controls);
        assert_eq!(controls.selected_filter(), "ascii");
        assert_eq!(controls.params().value("Invert"), Some(ParameterValue::Bool(true)));
    }

    #[test]
    fn reload_applies_only_differences() {
        let previous = ViewerConfig::from_yaml("filter: duotone\nparameters:\n  Gamma: 1.2\n").unwrap();
        let mut controls = controls();
        previous.apply_to(&mut controls);
        controls.set_parameter("Contrast", 0.5).unwrap();

        let next = ViewerConfig::from_yaml("filter: duotone\ncamera_enabled: false\nparameters:\n  Gamma: 1.4\n").unwrap();
        next.apply_changes(&previous, &mut controls);
        assert_eq!(controls.params().value("Gamma"), Some(ParameterValue::Float(1.4)));
        // Untouched by the reload.
        assert_eq!(controls.params().value("Contrast"), Some(ParameterValue::Float(0.5)));
        assert!(!controls.camera_enabled());

        let trimmed = ViewerConfig::from_yaml("filter: duotone\ncamera_enabled: false\n").unwrap();
        trimmed.apply_changes(&next, &mut controls);
        assert_eq!(controls.params().value("Gamma"), Some(ParameterValue::Float(0.75)));
        assert_eq!(controls.params().value("Contrast"), Some(ParameterValue::Float(0.5)));

        let switched = ViewerConfig::from_yaml("filter: linocut\nparameters:\n  Threshold: 0.3\n").unwrap();
        switched.apply_changes(&trimmed, &mut controls);
        assert_eq!(controls.selected_filter(), "linocut");
        assert_eq!(controls.params().value("Threshold"), Some(ParameterValue::Float(0.3)));
        assert!(controls.camera_enabled());
    }

    #[test]
    fn custom_filters_join_the_catalog() {
        let dir = std::env::temp_dir().join(format!("shaderlens-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("gain.frag"),
            "void main() { fragColor = vec4(texture(uTex, vUV).rgb * uGain, 1.0); }\n",
        )
        .unwrap();

        let config = ViewerConfig::from_yaml(
            r#"
filters:
  - id: gain
    name: Gain
    order: 7
    shader: gain.frag
    parameters:
      - name: Gain
        type: float
        min: 0.0
        max: 4.0
        step: 0.1
        default: 2.0
"#,
        )
        .unwrap();
        let catalog = config.build_catalog(&dir).unwrap();
        let gain = catalog.get("gain").unwrap();
        assert_eq!(gain.label(), "7. Gain");
        assert!(gain.shader_source.contains("float uGain;"));
        assert_eq!(catalog.ids().last(), Some("gain"));
        assert!(crate::shader::compile_fragment(&gain.shader_source).is_ok());

        let missing = ViewerConfig::from_yaml("filters:\n  - id: gone\n    shader: nope.frag\n").unwrap();
        assert!(missing.build_catalog(&dir).is_err());
        let _ = fs::remove_dir_all(&dir);
    }
}
