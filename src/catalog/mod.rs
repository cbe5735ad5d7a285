//! Filter catalog: the static registry of image filters.
//!
//! Definitions are assembled once at startup. Each carries a complete fragment
//! program with its shared GLSL helpers already inlined, so the engine only
//! ever deals in whole, independently compilable sources.

mod builtin;
pub mod glsl;

use crate::error::EngineError;
use crate::params::{hex_to_rgb, parse_hex_color, ParameterValue};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Sort key used for filters without an explicit order.
pub const UNORDERED: i32 = 999;

/// Prefix joining a parameter name to its uniform name.
pub const UNIFORM_PREFIX: &str = "u";

/// Type and range of an adjustable parameter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterKind {
    Float {
        min: f32,
        max: f32,
        step: f32,
        default: f32,
    },
    #[serde(rename = "bool")]
    Boolean { default: bool },
    /// Default is a `#RRGGBB` hex string.
    Color { default: String },
    /// A float stepped over `min..=max` whose values carry labels.
    EnumeratedFloat {
        min: f32,
        max: f32,
        step: f32,
        default: f32,
        options: Vec<String>,
    },
}

/// Schema entry for one filter parameter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(default)]
    pub display: String,
    #[serde(flatten)]
    pub kind: ParameterKind,
}

impl ParameterSpec {
    pub fn float(name: &str, display: &str, min: f32, max: f32, step: f32, default: f32) -> Self {
        Self {
            name: name.to_string(),
            display: display.to_string(),
            kind: ParameterKind::Float { min, max, step, default },
        }
    }

    pub fn boolean(name: &str, display: &str, default: bool) -> Self {
        Self {
            name: name.to_string(),
            display: display.to_string(),
            kind: ParameterKind::Boolean { default },
        }
    }

    pub fn color(name: &str, display: &str, default: &str) -> Self {
        Self {
            name: name.to_string(),
            display: display.to_string(),
            kind: ParameterKind::Color { default: default.to_string() },
        }
    }

    pub fn enumerated(
        name: &str,
        display: &str,
        (min, max, step): (f32, f32, f32),
        default: f32,
        options: &[&str],
    ) -> Self {
        Self {
            name: name.to_string(),
            display: display.to_string(),
            kind: ParameterKind::EnumeratedFloat {
                min,
                max,
                step,
                default,
                options: options.iter().map(|o| o.to_string()).collect(),
            },
        }
    }

    /// Name of the uniform this parameter binds to.
    pub fn uniform_name(&self) -> String {
        format!("{UNIFORM_PREFIX}{}", self.name)
    }

    /// Label shown by a control surface.
    pub fn display_name(&self) -> &str {
        if self.display.is_empty() {
            &self.name
        } else {
            &self.display
        }
    }

    /// `(min, max, step)` for numeric kinds.
    pub fn range(&self) -> Option<(f32, f32, f32)> {
        match self.kind {
            ParameterKind::Float { min, max, step, .. }
            | ParameterKind::EnumeratedFloat { min, max, step, .. } => Some((min, max, step)),
            ParameterKind::Boolean { .. } | ParameterKind::Color { .. } => None,
        }
    }

    /// Schema default, with colors decoded to normalized RGB.
    pub fn default_value(&self) -> ParameterValue {
        match &self.kind {
            ParameterKind::Float { default, .. } | ParameterKind::EnumeratedFloat { default, .. } => {
                ParameterValue::Float(*default)
            }
            ParameterKind::Boolean { default } => ParameterValue::Bool(*default),
            ParameterKind::Color { default } => ParameterValue::Color(hex_to_rgb(default)),
        }
    }

    /// Labeled choices of an enumerated parameter, in ascending value order.
    /// A whole, non-negative value is labeled by `options[value]`.
    pub fn choices(&self) -> Vec<(f32, String)> {
        let ParameterKind::EnumeratedFloat { min, max, step, ref options, .. } = self.kind else {
            return Vec::new();
        };
        if !(step > 0.0) {
            return Vec::new();
        }
        let mut choices = Vec::new();
        let mut index = 0usize;
        loop {
            let value = min + step * index as f32;
            if value > max + step * 1e-3 {
                break;
            }
            let slot = value.round();
            let label = if slot >= 0.0 && (value - slot).abs() < 1e-4 {
                options.get(slot as usize).cloned()
            } else {
                None
            }
            .unwrap_or_else(|| format!("Option {value}"));
            choices.push((value, label));
            index += 1;
        }
        choices
    }

    fn validate(&self) -> Result<(), String> {
        if let ParameterKind::Float { min, max, step, default }
        | ParameterKind::EnumeratedFloat { min, max, step, default, .. } = self.kind
        {
            if !(step > 0.0) {
                return Err(format!("parameter `{}` has non-positive step {step}", self.name));
            }
            if !(min <= default && default <= max) {
                return Err(format!(
                    "parameter `{}` default {default} outside [{min}, {max}]",
                    self.name
                ));
            }
        }
        if let ParameterKind::Color { default } = &self.kind {
            if parse_hex_color(default).is_none() {
                return Err(format!("parameter `{}` has malformed color default `{default}`", self.name));
            }
        }
        Ok(())
    }
}

/// An image filter: a fragment program plus its parameter schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterDefinition {
    pub id: String,
    pub display_name: String,
    pub order: Option<i32>,
    pub shader_source: String,
    pub parameters: Vec<ParameterSpec>,
}

impl FilterDefinition {
    /// Key used to order the catalog.
    pub fn sort_key(&self) -> i32 {
        self.order.unwrap_or(UNORDERED)
    }

    /// Menu label, numbered for regular filters.
    pub fn label(&self) -> String {
        match self.order {
            Some(order) if order >= 0 => format!("{order}. {}", self.display_name),
            _ => self.display_name.clone(),
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Checks schema invariants: unique names, sane ranges, decodable colors.
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |reason: String| EngineError::InvalidDefinition { id: self.id.clone(), reason };
        if self.id.is_empty() {
            return Err(invalid("empty filter id".to_string()));
        }
        let mut seen = HashSet::new();
        for spec in &self.parameters {
            if !seen.insert(spec.name.as_str()) {
                return Err(invalid(format!("duplicate parameter `{}`", spec.name)));
            }
            spec.validate().map_err(invalid)?;
        }
        Ok(())
    }
}

/// Ordered registry of filter definitions.
#[derive(Debug, Clone)]
pub struct FilterCatalog {
    filters: Vec<Arc<FilterDefinition>>,
}

impl FilterCatalog {
    /// Catalog of the built-in filters.
    pub fn builtin() -> Self {
        Self::from_sorted(builtin::definitions())
    }

    /// Adds startup-time definitions, validating each one.
    pub fn with_extra(self, extra: Vec<FilterDefinition>) -> Result<Self, EngineError> {
        let mut definitions: Vec<FilterDefinition> =
            self.filters.iter().map(|f| f.as_ref().clone()).collect();
        for definition in extra {
            definition.validate()?;
            if definitions.iter().any(|d| d.id == definition.id) {
                return Err(EngineError::InvalidDefinition {
                    id: definition.id,
                    reason: "filter id already registered".to_string(),
                });
            }
            definitions.push(definition);
        }
        Ok(Self::from_sorted(definitions))
    }

    fn from_sorted(mut definitions: Vec<FilterDefinition>) -> Self {
        definitions.sort_by_key(FilterDefinition::sort_key);
        Self {
            filters: definitions.into_iter().map(Arc::new).collect(),
        }
    }

    /// All filters, ascending by order with unordered filters last.
    pub fn list(&self) -> &[Arc<FilterDefinition>] {
        &self.filters
    }

    pub fn get(&self, id: &str) -> Result<&Arc<FilterDefinition>, EngineError> {
        self.filters
            .iter()
            .find(|f| f.id == id)
            .ok_or_else(|| EngineError::UnknownFilterId(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.filters.iter().map(|f| f.id.as_str())
    }

    /// The filter `step` positions away from `id`, wrapping around.
    pub fn neighbor(&self, id: &str, step: isize) -> Option<&str> {
        let len = self.filters.len() as isize;
        if len == 0 {
            return None;
        }
        let current = self.filters.iter().position(|f| f.id == id).unwrap_or(0) as isize;
        let next = (current + step).rem_euclid(len) as usize;
        Some(self.filters[next].id.as_str())
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Default for FilterCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
