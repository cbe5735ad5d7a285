//! GLSL fragment compilation through naga.
//!
//! Compiling parses and validates the fragment program. Linking checks its
//! interface against what the fixed vertex stage and the shared pipeline
//! layout provide, then reflects the parameter block and emits WGSL.
//!
//! Validation only allows the shader capabilities the device was opened with.

use super::uniforms::{UniformLayout, UniformSlot, UniformType};
use crate::error::ShaderBuildError;
use naga::front::glsl::{Frontend, Options};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{
    AddressSpace, Binding, ImageClass, ImageDimension, Module, ResourceBinding, Scalar, ScalarKind, ShaderStage,
    TypeInner, VectorSize,
};

/// Entry point every fragment program must define.
pub const FRAGMENT_ENTRY_POINT: &str = "main";

pub const TEXTURE_BINDING: u32 = 0;
pub const SAMPLER_BINDING: u32 = 1;
pub const PARAMS_BINDING: u32 = 2;
/// Owned by the vertex stage; fragment programs may not declare it.
pub const VERTEX_PARAMS_BINDING: u32 = 3;

/// A fragment program that passed compile and link checks.
#[derive(Debug, Clone)]
pub struct CompiledFragment {
    /// The GLSL the program was compiled from.
    pub source: String,
    pub wgsl: String,
    pub uniforms: UniformLayout,
}

/// Compiles and links a GLSL 450 fragment program for a device without
/// optional shader features.
pub fn compile_fragment(source: &str) -> Result<CompiledFragment, ShaderBuildError> {
    compile_fragment_with(source, Capabilities::default())
}

/// Compiles and links a GLSL 450 fragment program, allowing only
/// `capabilities`.
pub fn compile_fragment_with(source: &str, capabilities: Capabilities) -> Result<CompiledFragment, ShaderBuildError> {
    let mut frontend = Frontend::default();
    let options = Options::from(ShaderStage::Fragment);
    let module = frontend
        .parse(&options, source)
        .map_err(|e| ShaderBuildError::compile(source, e.emit_to_string(source)))?;

    let mut validator = Validator::new(ValidationFlags::all(), capabilities);
    let info = validator
        .validate(&module)
        .map_err(|e| ShaderBuildError::compile(source, e.emit_to_string(source)))?;

    let uniforms = link(&module).map_err(|diagnostic| ShaderBuildError::link(source, diagnostic))?;

    let wgsl = naga::back::wgsl::write_string(&module, &info, naga::back::wgsl::WriterFlags::empty())
        .map_err(|e| ShaderBuildError::compile(source, format!("WGSL generation error: {:?}", e)))?;
    check_wgsl(&wgsl, capabilities).map_err(|diagnostic| ShaderBuildError::link(source, diagnostic))?;

    Ok(CompiledFragment {
        source: source.to_string(),
        wgsl,
        uniforms,
    })
}

/// Re-reads the generated WGSL the way wgpu will.
fn check_wgsl(wgsl: &str, capabilities: Capabilities) -> Result<(), String> {
    let module = naga::front::wgsl::parse_str(wgsl)
        .map_err(|e| format!("generated WGSL does not parse: {}", e.emit_to_string(wgsl)))?;
    Validator::new(ValidationFlags::all(), capabilities)
        .validate(&module)
        .map_err(|e| format!("generated WGSL does not validate: {}", e.emit_to_string(wgsl)))?;
    Ok(())
}

fn link(module: &Module) -> Result<UniformLayout, String> {
    check_entry_point(module)?;

    let mut uniforms = UniformLayout::default();
    for (_, global) in module.global_variables.iter() {
        let name = global.name.as_deref().unwrap_or("<unnamed>");
        let Some(ResourceBinding { group, binding }) = global.binding else {
            match global.space {
                AddressSpace::Private | AddressSpace::Function | AddressSpace::WorkGroup => continue,
                _ => return Err(format!("global `{name}` is not bound to any pipeline resource")),
            }
        };
        if group != 0 {
            return Err(format!("global `{name}` uses bind group {group}; only group 0 exists"));
        }
        let inner = &module.types[global.ty].inner;
        match binding {
            TEXTURE_BINDING => match inner {
                TypeInner::Image {
                    dim: ImageDimension::D2,
                    arrayed: false,
                    class: ImageClass::Sampled { kind: ScalarKind::Float, multi: false },
                } => {}
                _ => return Err(format!("binding {binding} must be a float texture2D, `{name}` is not")),
            },
            SAMPLER_BINDING => match inner {
                TypeInner::Sampler { comparison: false } => {}
                _ => return Err(format!("binding {binding} must be a filtering sampler, `{name}` is not")),
            },
            PARAMS_BINDING => {
                if global.space != AddressSpace::Uniform {
                    return Err(format!("binding {binding} must be a uniform block"));
                }
                uniforms = reflect_block(module, inner)?;
            }
            VERTEX_PARAMS_BINDING => {
                return Err(format!("binding {binding} is reserved for the vertex stage"));
            }
            other => return Err(format!("global `{name}` uses binding {other}, which the pipeline layout lacks")),
        }
    }
    Ok(uniforms)
}

fn check_entry_point(module: &Module) -> Result<(), String> {
    let entry = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == ShaderStage::Fragment && ep.name == FRAGMENT_ENTRY_POINT)
        .ok_or_else(|| format!("no fragment entry point named `{FRAGMENT_ENTRY_POINT}`"))?;

    for argument in &entry.function.arguments {
        match &argument.binding {
            Some(Binding::Location { location: 0, .. }) => {
                let inner = &module.types[argument.ty].inner;
                if !matches!(inner, TypeInner::Vector { size: VectorSize::Bi, scalar: Scalar::F32 }) {
                    return Err("input at location 0 must be a vec2 texture coordinate".to_string());
                }
            }
            Some(Binding::Location { location, .. }) => {
                return Err(format!("input at location {location} is not produced by the vertex stage"));
            }
            Some(Binding::BuiltIn(_)) | None => {}
        }
    }

    let Some(result) = &entry.function.result else {
        return Err("fragment program writes no color output".to_string());
    };
    let mut locations = Vec::new();
    match &module.types[result.ty].inner {
        TypeInner::Struct { members, .. } => {
            for member in members {
                if let Some(Binding::Location { location, .. }) = member.binding {
                    locations.push(location);
                }
            }
        }
        _ => {
            if let Some(Binding::Location { location, .. }) = result.binding {
                locations.push(location);
            }
        }
    }
    match locations.as_slice() {
        [0] => Ok(()),
        [] => Err("fragment program writes no color output".to_string()),
        _ => Err(format!("fragment outputs {locations:?} do not match the single color target")),
    }
}

fn reflect_block(module: &Module, inner: &TypeInner) -> Result<UniformLayout, String> {
    let TypeInner::Struct { members, span } = inner else {
        return Err("parameter block must be a struct".to_string());
    };
    let mut layout = UniformLayout { size: *span, ..Default::default() };
    for member in members {
        let Some(name) = &member.name else { continue };
        let member_inner = &module.types[member.ty].inner;
        let ty = match member_inner {
            TypeInner::Scalar(Scalar::F32) => UniformType::Float,
            TypeInner::Scalar(Scalar::I32) => UniformType::Int,
            TypeInner::Scalar(Scalar::U32) => UniformType::Uint,
            TypeInner::Vector { size: VectorSize::Bi, scalar: Scalar::F32 } => UniformType::Vec2,
            TypeInner::Vector { size: VectorSize::Tri, scalar: Scalar::F32 } => UniformType::Vec3,
            TypeInner::Vector { size: VectorSize::Quad, scalar: Scalar::F32 } => UniformType::Vec4,
            other => UniformType::Other { size: other.size(module.to_ctx()) },
        };
        layout.slots.insert(name.clone(), UniformSlot { offset: member.offset, ty });
    }
    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{glsl, ParameterSpec};
    use crate::error::BuildStage;

    const BODY: &str = "void main() { fragColor = texture(uTex, vUV) * uGain; }\n";

    #[test]
    fn reflects_std140_parameter_block() {
        let params = vec![
            ParameterSpec::float("Gain", "Gain", 0.0, 2.0, 0.1, 1.0),
            ParameterSpec::color("Tint", "Tint", "#FFFFFF"),
            ParameterSpec::boolean("Invert", "Invert", false),
        ];
        let compiled = compile_fragment(&glsl::assemble(&params, &[], BODY)).unwrap();
        let layout = &compiled.uniforms;

        assert_eq!(layout.slot("uRes"), Some(UniformSlot { offset: 0, ty: UniformType::Vec2 }));
        assert_eq!(layout.slot("uTime"), Some(UniformSlot { offset: 8, ty: UniformType::Float }));
        assert_eq!(layout.slot("uGain"), Some(UniformSlot { offset: 12, ty: UniformType::Float }));
        assert_eq!(layout.slot("uTint"), Some(UniformSlot { offset: 16, ty: UniformType::Vec3 }));
        assert_eq!(layout.slot("uInvert"), Some(UniformSlot { offset: 28, ty: UniformType::Int }));
        assert!(layout.size >= 32);
        assert!(compiled.wgsl.contains("fn main"));
    }

    #[test]
    fn syntax_errors_fail_at_compile_stage() {
        let err = compile_fragment("#version 450\nvoid main() { this is not glsl }").unwrap_err();
        assert_eq!(err.stage, BuildStage::Compile);
        assert!(err.shader_source.contains("this is not glsl"));
        assert!(!err.diagnostic.is_empty());
    }

    #[test]
    fn extra_varyings_fail_at_link_stage() {
        let source = r"#version 450
layout(location = 0) in vec2 vUV;
layout(location = 1) in vec2 vExtra;
layout(location = 0) out vec4 fragColor;
void main() { fragColor = vec4(vUV + vExtra, 0.0, 1.0); }
";
        let err = compile_fragment(source).unwrap_err();
        assert_eq!(err.stage, BuildStage::Link);
        assert!(err.diagnostic.contains("location 1"));
    }

    #[test]
    fn foreign_bindings_fail_at_link_stage() {
        let source = r"#version 450
layout(location = 0) in vec2 vUV;
layout(location = 0) out vec4 fragColor;
layout(set = 0, binding = 3) uniform Stolen { float flip; };
void main() { fragColor = vec4(vUV, flip, 1.0); }
";
        let err = compile_fragment(source).unwrap_err();
        assert_eq!(err.stage, BuildStage::Link);
        assert!(err.diagnostic.contains("reserved"));
    }

    #[test]
    fn features_the_device_lacks_are_rejected() {
        let source = r"#version 450
layout(location = 0) in vec2 vUV;
layout(location = 0) out vec4 fragColor;
void main() {
    double d = double(vUV.x);
    fragColor = vec4(float(d), vUV.y, 0.0, 1.0);
}
";
        let err = compile_fragment(source).unwrap_err();
        assert_eq!(err.stage, crate::error::BuildStage::Compile);
        assert!(err.shader_source.contains("double d"));
    }

    #[test]
    fn builtin_filters_pass_default_capabilities() {
        for filter in crate::catalog::FilterCatalog::builtin().list() {
            let compiled = compile_fragment(&filter.shader_source)
                .unwrap_or_else(|e| panic!("{} failed: {}", filter.id, e));
            assert_eq!(compiled.source, filter.shader_source);
        }
    }

    #[test]
    fn program_without_parameter_block_has_empty_layout() {
        let source = r"#version 450
layout(location = 0) in vec2 vUV;
layout(location = 0) out vec4 fragColor;
void main() { fragColor = vec4(vUV, 0.0, 1.0); }
";
        let compiled = compile_fragment(source).unwrap();
        assert_eq!(compiled.uniforms.size, 0);
        assert!(compiled.uniforms.slots.is_empty());
    }
}
