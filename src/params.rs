//! Parameter state for the active filter.

use crate::catalog::{FilterCatalog, FilterDefinition, ParameterKind, ParameterSpec};
use crate::error::EngineError;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A coerced parameter value, ready to bind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterValue {
    Float(f32),
    Bool(bool),
    /// Normalized RGB.
    Color([f32; 3]),
}

/// Current values keyed by parameter name.
pub type ParameterValueMap = HashMap<String, ParameterValue>;

/// A value as supplied by a control surface, before coercion.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Bool(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<f32> for RawValue {
    fn from(value: f32) -> Self {
        RawValue::Number(value as f64)
    }
}

impl From<i32> for RawValue {
    fn from(value: i32) -> Self {
        RawValue::Number(value as f64)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

/// Decodes `#RRGGBB` (the `#` is optional) to normalized RGB.
pub fn parse_hex_color(hex: &str) -> Option<[f32; 3]> {
    let digits = hex.trim();
    let digits = digits.strip_prefix('#').unwrap_or(digits);
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok().map(|v| v as f32 / 255.0);
    Some([channel(0)?, channel(2)?, channel(4)?])
}

/// Like [`parse_hex_color`], but malformed input decodes to black.
pub fn hex_to_rgb(hex: &str) -> [f32; 3] {
    parse_hex_color(hex).unwrap_or([0.0, 0.0, 0.0])
}

fn truthy(text: &str) -> bool {
    matches!(text.trim().to_ascii_lowercase().as_str(), "true" | "1" | "on" | "yes")
}

/// Converts a raw control value to the type the schema declares.
pub fn coerce(spec: &ParameterSpec, raw: &RawValue) -> ParameterValue {
    match &spec.kind {
        ParameterKind::Float { default, .. } | ParameterKind::EnumeratedFloat { default, .. } => {
            let value = match raw {
                RawValue::Number(n) => *n as f32,
                RawValue::Bool(b) => {
                    if *b {
                        1.0
                    } else {
                        0.0
                    }
                }
                RawValue::Text(text) => match text.trim().parse::<f32>() {
                    Ok(v) if v.is_finite() => v,
                    _ => {
                        warn!("Parameter {} got non-numeric value {:?}, using default", spec.name, text);
                        *default
                    }
                },
            };
            ParameterValue::Float(value)
        }
        ParameterKind::Boolean { .. } => ParameterValue::Bool(match raw {
            RawValue::Bool(b) => *b,
            RawValue::Number(n) => *n != 0.0,
            RawValue::Text(text) => truthy(text),
        }),
        ParameterKind::Color { .. } => {
            let rgb = match raw {
                RawValue::Text(text) => parse_hex_color(text),
                _ => None,
            };
            ParameterValue::Color(rgb.unwrap_or_else(|| {
                warn!("Parameter {} got malformed color {:?}, using black", spec.name, raw);
                [0.0, 0.0, 0.0]
            }))
        }
    }
}

fn defaults(filter: &FilterDefinition) -> ParameterValueMap {
    filter
        .parameters
        .iter()
        .map(|spec| (spec.name.clone(), spec.default_value()))
        .collect()
}

/// Holds the active filter and its current parameter values.
///
/// Values always belong to the active filter: switching filters rebuilds the
/// map from schema defaults, so nothing carries over between filters.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    catalog: Arc<FilterCatalog>,
    filter: Arc<FilterDefinition>,
    values: ParameterValueMap,
}

impl ParameterStore {
    pub fn new(catalog: Arc<FilterCatalog>, initial_id: &str) -> Result<Self, EngineError> {
        let filter = catalog.get(initial_id)?.clone();
        let values = defaults(&filter);
        Ok(Self { catalog, filter, values })
    }

    /// Makes `id` the active filter with schema defaults. On error the
    /// current state is left untouched.
    pub fn select_filter(&mut self, id: &str) -> Result<(), EngineError> {
        let filter = self.catalog.get(id)?.clone();
        debug!("Selected filter {} with {} parameters", filter.id, filter.parameters.len());
        self.values = defaults(&filter);
        self.filter = filter;
        Ok(())
    }

    /// Coerces and stores a value. Out-of-range numbers are kept as given.
    pub fn set_value(&mut self, name: &str, raw: impl Into<RawValue>) -> Result<ParameterValue, EngineError> {
        let spec = self.filter.parameter(name).ok_or_else(|| EngineError::UnknownParameter {
            filter: self.filter.id.clone(),
            name: name.to_string(),
        })?;
        let value = coerce(spec, &raw.into());
        self.values.insert(name.to_string(), value);
        Ok(value)
    }

    pub fn value(&self, name: &str) -> Option<ParameterValue> {
        self.values.get(name).copied()
    }

    /// Owned copy of the current values.
    pub fn snapshot(&self) -> ParameterValueMap {
        self.values.clone()
    }

    pub fn reset_to_defaults(&mut self) {
        self.values = defaults(&self.filter);
    }

    /// Restores one parameter of the active filter to its schema default.
    pub fn reset_value(&mut self, name: &str) -> Result<ParameterValue, EngineError> {
        let spec = self.filter.parameter(name).ok_or_else(|| EngineError::UnknownParameter {
            filter: self.filter.id.clone(),
            name: name.to_string(),
        })?;
        let value = spec.default_value();
        self.values.insert(name.to_string(), value);
        Ok(value)
    }

    pub fn active_filter(&self) -> &Arc<FilterDefinition> {
        &self.filter
    }

    pub fn catalog(&self) -> &Arc<FilterCatalog> {
        &self.catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(id: &str) -> ParameterStore {
        ParameterStore::new(Arc::new(FilterCatalog::builtin()), id).unwrap()
    }

    fn assert_rgb(value: Option<ParameterValue>, expected: [f32; 3]) {
        let Some(ParameterValue::Color(rgb)) = value else {
            panic!("expected a color, got {value:?}");
        };
        for (got, want) in rgb.iter().zip(expected) {
            assert!((got - want).abs() < 1e-3, "{rgb:?} != {expected:?}");
        }
    }

    #[test]
    fn hex_colors_decode_with_or_without_hash() {
        assert_eq!(hex_to_rgb("#FFFFFF"), [1.0, 1.0, 1.0]);
        assert_eq!(hex_to_rgb("000000"), [0.0, 0.0, 0.0]);
        let rgb = hex_to_rgb("#00ff88");
        assert!((rgb[2] - 136.0 / 255.0).abs() < 1e-6);
        assert_eq!(hex_to_rgb("#12345"), [0.0, 0.0, 0.0]);
        assert_eq!(hex_to_rgb("#GGGGGG"), [0.0, 0.0, 0.0]);
        assert!(parse_hex_color("nope").is_none());
    }

    #[test]
    fn select_filter_loads_schema_defaults() {
        let mut store = store("passthrough");
        assert!(store.snapshot().is_empty());

        store.select_filter("ascii").unwrap();
        assert_eq!(store.value("Cell"), Some(ParameterValue::Float(16.0)));
        assert_eq!(store.value("Invert"), Some(ParameterValue::Bool(false)));
        assert_rgb(store.value("Foreground"), [0.0, 1.0, 0.533]);
        assert_eq!(store.snapshot().len(), 5);
    }

    #[test]
    fn unknown_filter_leaves_state_unchanged() {
        let mut store = store("duotone");
        store.set_value("Gamma", 1.5).unwrap();
        assert!(matches!(store.select_filter("missing"), Err(EngineError::UnknownFilterId(_))));
        assert_eq!(store.active_filter().id, "duotone");
        assert_eq!(store.value("Gamma"), Some(ParameterValue::Float(1.5)));
    }

    #[test]
    fn switching_back_restores_defaults() {
        let mut store = store("dither");
        store.set_value("Threshold", 0.9).unwrap();
        store.select_filter("linocut").unwrap();
        assert_eq!(store.value("Threshold"), Some(ParameterValue::Float(0.5)));
        assert_eq!(store.value("DitherAmt"), None);

        store.select_filter("dither").unwrap();
        assert_eq!(store.value("Threshold"), Some(ParameterValue::Float(0.4)));
    }

    #[test]
    fn raw_values_are_coerced_to_schema_types() {
        let mut store = store("ascii");
        assert_eq!(store.set_value("Cell", "32").unwrap(), ParameterValue::Float(32.0));
        assert_eq!(store.set_value("Cell", "abc").unwrap(), ParameterValue::Float(16.0));
        assert_eq!(store.set_value("Cell", 500.0).unwrap(), ParameterValue::Float(500.0));
        assert_eq!(store.set_value("Invert", "on").unwrap(), ParameterValue::Bool(true));
        assert_eq!(store.set_value("Invert", 0).unwrap(), ParameterValue::Bool(false));
        assert_eq!(store.set_value("Invert", "YES").unwrap(), ParameterValue::Bool(true));
        assert_eq!(store.set_value("Background", "zzz").unwrap(), ParameterValue::Color([0.0; 3]));
        assert_rgb(Some(store.set_value("Background", "FFFFFF").unwrap()), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        let mut store = store("duotone");
        let err = store.set_value("Nope", 1.0).unwrap_err();
        assert!(matches!(err, EngineError::UnknownParameter { ref name, .. } if name == "Nope"));
        assert_eq!(store.snapshot().len(), 4);
    }

    #[test]
    fn reset_reapplies_defaults() {
        let mut store = store("sketch");
        store.set_value("StrokeWeight", 1.8).unwrap();
        store.reset_to_defaults();
        assert_eq!(store.value("StrokeWeight"), Some(ParameterValue::Float(0.5)));
    }

    #[test]
    fn single_value_reset_touches_only_that_parameter() {
        let mut store = store("duotone");
        store.set_value("Gamma", 1.5).unwrap();
        store.set_value("Contrast", 0.5).unwrap();
        assert_eq!(store.reset_value("Gamma").unwrap(), ParameterValue::Float(0.75));
        assert_eq!(store.value("Gamma"), Some(ParameterValue::Float(0.75)));
        assert_eq!(store.value("Contrast"), Some(ParameterValue::Float(0.5)));
        assert!(store.reset_value("Nope").is_err());
    }

    #[test]
    fn raw_values_deserialize_untagged() {
        let values: HashMap<String, RawValue> =
            serde_yaml::from_str("a: true\nb: 0.25\nc: \"#FF0000\"\nd: 3\n").unwrap();
        assert_eq!(values["a"], RawValue::Bool(true));
        assert_eq!(values["b"], RawValue::Number(0.25));
        assert_eq!(values["c"], RawValue::Text("#FF0000".to_string()));
        assert_eq!(values["d"], RawValue::Number(3.0));
    }
}
