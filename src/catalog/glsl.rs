//! Shared GLSL fragments and the assembler that turns a filter body into a
//! complete fragment program.
//!
//! Every assembled program shares one interface with the fixed vertex stage:
//! `vUV` at location 0, the input texture and sampler at bindings 0 and 1 of
//! group 0, and a std140 parameter block at binding 2 that starts with `uRes`
//! and `uTime` followed by one member per schema parameter.

use super::{ParameterKind, ParameterSpec};

/// Rec. 709 luminance.
pub const LUMA: &str = r"
float luma(vec3 c) {
    return dot(c, vec3(0.2126, 0.7152, 0.0722));
}
";

/// Sine-based pseudo-random value in `[0, 1)`.
pub const HASH: &str = r"
float hash(vec2 p) {
    return fract(sin(dot(p, vec2(127.1, 311.7))) * 43758.5453);
}
";

/// Sine-free hash, stable at large coordinates.
pub const HASH12: &str = r"
float hash12(vec2 p) {
    vec3 p3 = fract(vec3(p.x, p.y, p.x) * 0.1031);
    p3 = p3 + vec3(dot(p3, p3.yzx + vec3(33.33)));
    return fract((p3.x + p3.y) * p3.z);
}
";

pub const ADJUST_CONTRAST: &str = r"
vec3 adjustContrast(vec3 c, float k) {
    return clamp(vec3(0.5) + (c - vec3(0.5)) * k, vec3(0.0), vec3(1.0));
}
";

/// 2D rotation matrix.
pub const ROT: &str = r"
mat2 rot(float a) {
    float s = sin(a);
    float c = cos(a);
    return mat2(c, -s, s, c);
}
";

/// Sobel gradient magnitude of the input luminance. Requires [`LUMA`].
pub const SOBEL: &str = r"
float sobelEdge(vec2 uv, vec2 px) {
    float tl = luma(texture(uTex, uv + vec2(-1.0, -1.0) * px).rgb);
    float t  = luma(texture(uTex, uv + vec2( 0.0, -1.0) * px).rgb);
    float tr = luma(texture(uTex, uv + vec2( 1.0, -1.0) * px).rgb);
    float l  = luma(texture(uTex, uv + vec2(-1.0,  0.0) * px).rgb);
    float r  = luma(texture(uTex, uv + vec2( 1.0,  0.0) * px).rgb);
    float bl = luma(texture(uTex, uv + vec2(-1.0,  1.0) * px).rgb);
    float b  = luma(texture(uTex, uv + vec2( 0.0,  1.0) * px).rgb);
    float br = luma(texture(uTex, uv + vec2( 1.0,  1.0) * px).rgb);
    float gx = -tl - 2.0 * l - bl + tr + 2.0 * r + br;
    float gy = -tl - 2.0 * t - tr + bl + 2.0 * b + br;
    return length(vec2(gx, gy));
}
";

const PRELUDE: &str = r"#version 450
layout(location = 0) in vec2 vUV;
layout(location = 0) out vec4 fragColor;

layout(set = 0, binding = 0) uniform texture2D u_texture;
layout(set = 0, binding = 1) uniform sampler u_sampler;
#define uTex sampler2D(u_texture, u_sampler)
";

/// GLSL type a parameter occupies inside the parameter block.
pub fn glsl_type(kind: &ParameterKind) -> &'static str {
    match kind {
        ParameterKind::Float { .. } | ParameterKind::EnumeratedFloat { .. } => "float",
        ParameterKind::Boolean { .. } => "int",
        ParameterKind::Color { .. } => "vec3",
    }
}

/// Builds a self-contained fragment program from a schema, helper snippets
/// and the filter's own body (which defines `main`).
pub fn assemble(parameters: &[ParameterSpec], helpers: &[&str], body: &str) -> String {
    let mut source = String::from(PRELUDE);
    source.push_str("\nlayout(std140, set = 0, binding = 2) uniform FilterParams {\n");
    source.push_str("    vec2 uRes;\n    float uTime;\n");
    for spec in parameters {
        source.push_str(&format!("    {} {};\n", glsl_type(&spec.kind), spec.uniform_name()));
    }
    source.push_str("};\n");
    for helper in helpers {
        source.push_str(helper);
    }
    source.push_str(body);
    source
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_declares_schema_uniforms_in_order() {
        let params = vec![
            ParameterSpec::float("Threshold", "Threshold", 0.0, 1.0, 0.01, 0.5),
            ParameterSpec::boolean("Invert", "Invert", false),
            ParameterSpec::color("Ink", "Ink", "#000000"),
        ];
        let source = assemble(&params, &[LUMA], "void main() { fragColor = vec4(1.0); }\n");

        assert!(source.starts_with("#version 450"));
        let threshold = source.find("float uThreshold;").unwrap();
        let invert = source.find("int uInvert;").unwrap();
        let ink = source.find("vec3 uInk;").unwrap();
        assert!(source.find("float uTime;").unwrap() < threshold);
        assert!(threshold < invert && invert < ink);
        assert!(source.contains("    float uTime;\n    float uThreshold;\n    int uInvert;\n    vec3 uInk;\n};\n"));
        assert!(source.contains("float luma(vec3 c)"));
        assert!(source.ends_with("void main() { fragColor = vec4(1.0); }\n"));
    }
}
