//! Engine error types.

use std::fmt;
use thiserror::Error;

/// Stage of program construction that rejected a shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    /// Parsing or validating the fragment program.
    Compile,
    /// Pairing the fragment program with the fixed vertex stage and pipeline layout.
    Link,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStage::Compile => f.write_str("compile"),
            BuildStage::Link => f.write_str("link"),
        }
    }
}

/// A fragment program failed to compile or link.
#[derive(Debug, Clone, Error)]
#[error("shader {stage} failed: {diagnostic}")]
pub struct ShaderBuildError {
    pub stage: BuildStage,
    /// The offending fragment source.
    pub shader_source: String,
    /// Compiler or linker diagnostic.
    pub diagnostic: String,
}

impl ShaderBuildError {
    pub fn compile(source: &str, diagnostic: impl Into<String>) -> Self {
        Self {
            stage: BuildStage::Compile,
            shader_source: source.to_string(),
            diagnostic: diagnostic.into(),
        }
    }

    pub fn link(source: &str, diagnostic: impl Into<String>) -> Self {
        Self {
            stage: BuildStage::Link,
            shader_source: source.to_string(),
            diagnostic: diagnostic.into(),
        }
    }
}

/// Errors reported by the filter engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error(transparent)]
    ShaderBuild(#[from] ShaderBuildError),

    #[error("unknown filter id `{0}`")]
    UnknownFilterId(String),

    #[error("filter `{filter}` has no parameter `{name}`")]
    UnknownParameter { filter: String, name: String },

    #[error("invalid filter definition `{id}`: {reason}")]
    InvalidDefinition { id: String, reason: String },

    /// The fixed vertex stage did not build. Fatal to the whole engine.
    #[error("vertex stage failed to build: {0}")]
    VertexStage(String),

    #[error("GPU initialization failed: {0}")]
    GpuInit(String),
}
