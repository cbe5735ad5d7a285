//! Memoizes built GPU programs by fragment source.

use super::compile::{compile_fragment_with, CompiledFragment};
use super::uniforms::{UniformLayout, UniformLocation, VertexParams};
use crate::error::ShaderBuildError;
use naga::valid::Capabilities;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Turns a compiled fragment into a backend program paired with the fixed
/// vertex stage.
pub trait ProgramBuilder {
    type Program;

    /// Shader capabilities programs may use on this backend.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn build_program(&mut self, fragment: &CompiledFragment) -> Result<Self::Program, ShaderBuildError>;
}

/// A built program and the uniform layout reflected from its source.
#[derive(Debug)]
pub struct ProgramHandle<P> {
    program: P,
    layout: UniformLayout,
    locations: Mutex<HashMap<String, Option<UniformLocation>>>,
}

impl<P> ProgramHandle<P> {
    pub fn program(&self) -> &P {
        &self.program
    }

    pub fn layout(&self) -> &UniformLayout {
        &self.layout
    }

    fn resolve(&self, name: &str) -> Option<UniformLocation> {
        if let Some(slot) = VertexParams::slot(name) {
            return Some(UniformLocation::Vertex(slot));
        }
        self.layout.slot(name).map(UniformLocation::Fragment)
    }
}

/// Programs keyed by their exact fragment source.
///
/// Each distinct source is compiled at most once while it keeps succeeding.
/// Failures are returned to the caller and never stored, so a failing source
/// is rebuilt on every request.
pub struct ProgramCache<P> {
    programs: HashMap<String, Arc<ProgramHandle<P>>>,
    compile_count: usize,
    lookup_count: usize,
}

impl<P> ProgramCache<P> {
    pub fn new() -> Self {
        Self {
            programs: HashMap::new(),
            compile_count: 0,
            lookup_count: 0,
        }
    }

    /// The program for `source`, building it on first use.
    pub fn get_program<B>(&mut self, builder: &mut B, source: &str) -> Result<Arc<ProgramHandle<P>>, ShaderBuildError>
    where
        B: ProgramBuilder<Program = P> + ?Sized,
    {
        if let Some(handle) = self.programs.get(source) {
            return Ok(handle.clone());
        }

        self.compile_count += 1;
        let start = std::time::Instant::now();
        let fragment = compile_fragment_with(source, builder.capabilities())?;
        let program = builder.build_program(&fragment)?;
        info!(
            "Built shader program #{} ({} uniforms) in {:?}",
            self.compile_count,
            fragment.uniforms.slots.len(),
            start.elapsed()
        );

        let handle = Arc::new(ProgramHandle {
            program,
            layout: fragment.uniforms,
            locations: Mutex::new(HashMap::new()),
        });
        self.programs.insert(source.to_string(), handle.clone());
        Ok(handle)
    }

    /// Location of `name` in `handle`'s program, or `None` when the program
    /// does not use it. Both outcomes are memoized per handle.
    pub fn uniform_location(&mut self, handle: &ProgramHandle<P>, name: &str) -> Option<UniformLocation> {
        let mut locations = handle.locations.lock();
        if let Some(location) = locations.get(name) {
            return *location;
        }
        self.lookup_count += 1;
        let location = handle.resolve(name);
        if location.is_none() {
            debug!("Uniform {} not present in program", name);
        }
        locations.insert(name.to_string(), location);
        location
    }

    /// Number of compile attempts, successful or not.
    pub fn compile_count(&self) -> usize {
        self.compile_count
    }

    /// Number of uniform lookups that missed the per-program memo.
    pub fn lookup_count(&self) -> usize {
        self.lookup_count
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

impl<P> Default for ProgramCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FilterCatalog;
    use crate::error::BuildStage;
    use crate::shader::uniforms::{UniformSlot, UniformType};

    /// Hands out sequential ids instead of GPU pipelines.
    #[derive(Default)]
    struct CountingBuilder {
        built: usize,
    }

    impl ProgramBuilder for CountingBuilder {
        type Program = usize;

        fn build_program(&mut self, _fragment: &CompiledFragment) -> Result<usize, ShaderBuildError> {
            self.built += 1;
            Ok(self.built)
        }
    }

    fn duotone_source() -> String {
        FilterCatalog::builtin().get("duotone").unwrap().shader_source.clone()
    }

    #[test]
    fn same_source_returns_same_handle() {
        let mut cache = ProgramCache::new();
        let mut builder = CountingBuilder::default();
        let source = duotone_source();

        let first = cache.get_program(&mut builder, &source).unwrap();
        for _ in 0..10 {
            let again = cache.get_program(&mut builder, &source).unwrap();
            assert!(Arc::ptr_eq(&first, &again));
        }
        assert_eq!(cache.compile_count(), 1);
        assert_eq!(builder.built, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failures_are_not_memoized() {
        let mut cache: ProgramCache<usize> = ProgramCache::new();
        let mut builder = CountingBuilder::default();
        let broken = "#version 450\nvoid main() { oops( }";

        for attempt in 1..=3 {
            let err = cache.get_program(&mut builder, broken).unwrap_err();
            assert_eq!(err.stage, BuildStage::Compile);
            assert_eq!(cache.compile_count(), attempt);
        }
        assert!(cache.is_empty());
        assert_eq!(builder.built, 0);
    }

    const DOUBLE_PRECISION: &str = r"#version 450
layout(location = 0) in vec2 vUV;
layout(location = 0) out vec4 fragColor;
void main() {
    double d = double(vUV.x);
    fragColor = vec4(float(d), vUV.y, 0.0, 1.0);
}
";

    #[test]
    fn programs_needing_unavailable_capabilities_are_not_built() {
        let mut cache: ProgramCache<usize> = ProgramCache::new();
        let mut builder = CountingBuilder::default();

        let err = cache.get_program(&mut builder, DOUBLE_PRECISION).unwrap_err();
        assert_eq!(err.stage, BuildStage::Compile);
        assert_eq!(builder.built, 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn uniform_lookups_are_memoized_including_absence() {
        let mut cache = ProgramCache::new();
        let mut builder = CountingBuilder::default();
        let handle = cache.get_program(&mut builder, &duotone_source()).unwrap();

        let gamma = cache.uniform_location(&handle, "uGamma");
        assert!(matches!(
            gamma,
            Some(UniformLocation::Fragment(UniformSlot { ty: UniformType::Float, .. }))
        ));
        assert_eq!(cache.uniform_location(&handle, "uMissing"), None);
        assert_eq!(cache.lookup_count(), 2);

        assert_eq!(cache.uniform_location(&handle, "uGamma"), gamma);
        assert_eq!(cache.uniform_location(&handle, "uMissing"), None);
        assert_eq!(cache.lookup_count(), 2);

        assert!(matches!(
            cache.uniform_location(&handle, "uFlipHorizontal"),
            Some(UniformLocation::Vertex(_))
        ));
    }

    #[test]
    fn every_builtin_filter_compiles_and_links() {
        let mut cache = ProgramCache::new();
        let mut builder = CountingBuilder::default();
        for filter in FilterCatalog::builtin().list() {
            let handle = cache
                .get_program(&mut builder, &filter.shader_source)
                .unwrap_or_else(|e| panic!("{} failed: {}", filter.id, e));
            for name in ["uRes", "uTime"] {
                assert!(handle.layout().slot(name).is_some(), "{} lacks {}", filter.id, name);
            }
            for spec in &filter.parameters {
                assert!(
                    cache.uniform_location(&handle, &spec.uniform_name()).is_some(),
                    "{} lacks {}",
                    filter.id,
                    spec.uniform_name()
                );
            }
        }
        assert_eq!(cache.len(), 6);
    }
}
