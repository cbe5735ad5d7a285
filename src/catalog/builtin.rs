//! Built-in filter definitions.

use super::glsl::{self, assemble};
use super::{FilterDefinition, ParameterSpec};

pub(super) fn definitions() -> Vec<FilterDefinition> {
    vec![passthrough(), linocut(), duotone(), ascii(), dither(), sketch()]
}

fn filter(
    id: &str,
    name: &str,
    order: i32,
    parameters: Vec<ParameterSpec>,
    helpers: &[&str],
    body: &str,
) -> FilterDefinition {
    FilterDefinition {
        id: id.to_string(),
        display_name: name.to_string(),
        order: Some(order),
        shader_source: assemble(&parameters, helpers, body),
        parameters,
    }
}

/// Light beautification: skin smoothing, sharpening and a soft vignette.
fn passthrough() -> FilterDefinition {
    filter("passthrough", "Passthrough", -1, Vec::new(), &[glsl::LUMA], PASSTHROUGH)
}

const PASSTHROUGH: &str = r"
#define SKIN_SMOOTH 0.35
#define BRIGHTNESS 0.5
#define SATURATION 0.0
#define SHARPNESS 0.5

float skinMask(vec3 color) {
    float skinness = 0.0;
    if (color.r > 0.35 && color.g > 0.2 && color.b > 0.1) {
        float rg = color.r - color.g;
        float rb = color.r - color.b;
        if (rg > 0.0 && rg < 0.4 && rb > 0.0 && rb < 0.4) {
            skinness = smoothstep(0.0, 0.3, rg) * smoothstep(0.0, 0.3, rb);
        }
    }
    return skinness;
}

void main() {
    vec2 uv = vUV;
    vec2 texel = vec2(1.0) / uRes;
    vec3 color = texture(uTex, uv).rgb;

    vec3 smoothed = vec3(0.0);
    float totalWeight = 0.0;
    for (int y = -2; y <= 2; y++) {
        for (int x = -2; x <= 2; x++) {
            vec2 offset = vec2(float(x), float(y)) * texel * 2.0;
            vec3 neighbor = texture(uTex, uv + offset).rgb;
            float spatialWeight = exp(-float(x * x + y * y) / 8.0);
            float colorDiff = length(neighbor - color);
            float rangeWeight = exp(-(colorDiff * colorDiff) / 0.02);
            float weight = spatialWeight * rangeWeight;
            smoothed = smoothed + neighbor * weight;
            totalWeight = totalWeight + weight;
        }
    }
    smoothed = smoothed / vec3(totalWeight);

    float skinAmount = skinMask(color);
    vec3 result = mix(color, smoothed, vec3(skinAmount * SKIN_SMOOTH));

    vec3 blurred = vec3(0.0);
    for (int y = -1; y <= 1; y++) {
        for (int x = -1; x <= 1; x++) {
            blurred = blurred + texture(uTex, uv + vec2(float(x), float(y)) * texel).rgb;
        }
    }
    blurred = blurred / vec3(9.0);
    result = result + (result - blurred) * (SHARPNESS * (1.0 - skinAmount * 0.7));

    result = result * (1.0 + BRIGHTNESS * 0.3);
    float l = luma(result);
    result = mix(vec3(l), result, vec3(1.0 + SATURATION * 0.3));
    result = result * result * (vec3(3.0) - result * 2.0);

    vec2 vig = uv * 2.0 - vec2(1.0);
    result = result * (1.0 - dot(vig, vig) * 0.15);

    fragColor = vec4(clamp(result, vec3(0.0), vec3(1.0)), 1.0);
}
";

/// Hard two-tone cut with edge detail.
fn linocut() -> FilterDefinition {
    filter(
        "linocut",
        "Linocut",
        1,
        vec![
            ParameterSpec::float("Threshold", "Cut Threshold", 0.0, 1.0, 0.01, 0.5),
            ParameterSpec::color("InkColor", "Ink", "#0B0B0B"),
            ParameterSpec::color("Paper", "Paper", "#F3E9DA"),
        ],
        &[glsl::LUMA, glsl::HASH, glsl::SOBEL],
        LINOCUT,
    )
}

const LINOCUT: &str = r"
void main() {
    vec2 uv = vUV;
    vec2 px = vec2(1.0) / uRes;
    float brightness = luma(texture(uTex, uv).rgb);
    float edge = sobelEdge(uv, px);
    float cutValue = step(uThreshold, brightness + edge * 0.1);
    fragColor = vec4(mix(uInkColor, uPaper, vec3(cutValue)), 1.0);
}
";

/// Luminance mapped onto a two-color gradient.
fn duotone() -> FilterDefinition {
    filter(
        "duotone",
        "Duotone",
        2,
        vec![
            ParameterSpec::float("Contrast", "Contrast", 0.0, 2.0, 0.01, 1.75),
            ParameterSpec::float("Gamma", "Gamma", 0.5, 2.0, 0.01, 0.75),
            ParameterSpec::color("ColorA", "Shadow", "#0D0D0D"),
            ParameterSpec::color("ColorB", "Highlight", "#00a3d7"),
        ],
        &[glsl::LUMA],
        DUOTONE,
    )
}

const DUOTONE: &str = r"
void main() {
    vec3 c = texture(uTex, vUV).rgb;
    c = pow(c, vec3(uGamma));
    float l = luma(c);
    l = clamp((l - 0.5) * max(uContrast, 0.0) + 0.5, 0.0, 1.0);
    vec3 mixed = mix(uColorA, uColorB, vec3(smoothstep(0.0, 1.0, l)));
    fragColor = vec4(mixed, 1.0);
}
";

/// Block-glyph character grid.
fn ascii() -> FilterDefinition {
    filter(
        "ascii",
        "ASCII",
        3,
        vec![
            ParameterSpec::float("Cell", "Cell Size", 4.0, 128.0, 1.0, 16.0),
            ParameterSpec::float("Contrast", "Contrast", 0.5, 2.5, 0.01, 1.2),
            ParameterSpec::boolean("Invert", "Invert", false),
            ParameterSpec::color("Foreground", "Foreground", "#00FF88"),
            ParameterSpec::color("Background", "Background", "#000000"),
        ],
        &[glsl::LUMA],
        ASCII,
    )
}

const ASCII: &str = r"
#define GLYPH_WIDTH 5
#define GLYPH_HEIGHT 7
#define GLYPH_COUNT 12

// 5-bit row masks of increasingly dense block glyphs.
int glyphRow(int glyph, int row) {
    bool even = (row - (row / 2) * 2) == 0;
    if (glyph < 3) {
        return 0;
    }
    if (glyph < 5) {
        return even ? 10 : 0;
    }
    if (glyph < 7) {
        return even ? 21 : 10;
    }
    if (glyph < 9) {
        return even ? 31 : 21;
    }
    return 31;
}

float glyphSample(int glyph, int col, int row) {
    int x = clamp(col, 0, GLYPH_WIDTH - 1);
    int y = clamp(row, 0, GLYPH_HEIGHT - 1);
    float rowBits = float(glyphRow(glyph, y));
    float shift = pow(2.0, float(GLYPH_WIDTH - 1 - x));
    return mod(floor(rowBits / shift), 2.0);
}

void main() {
    float cellPx = max(uCell, 2.0);
    vec2 gridDim = uRes / vec2(cellPx);
    vec2 cellIndex = floor(vUV * gridDim);
    vec2 cellUV = fract(vUV * gridDim);

    vec2 baseUV = (cellIndex + vec2(0.5)) / gridDim;
    vec3 s0 = texture(uTex, baseUV).rgb;
    vec3 s1 = texture(uTex, baseUV + vec2(0.15 / gridDim.x, 0.0)).rgb;
    vec3 s2 = texture(uTex, baseUV + vec2(-0.15 / gridDim.x, 0.0)).rgb;
    vec3 s3 = texture(uTex, baseUV + vec2(0.0, 0.15 / gridDim.y)).rgb;
    float lum = luma((s0 + s1 + s2 + s3) * 0.25);
    lum = pow(lum, 1.0 / max(uContrast, 0.0001));
    float t = uInvert != 0 ? 1.0 - lum : lum;
    int glyph = clamp(int(floor(t * float(GLYPH_COUNT))), 0, GLYPH_COUNT - 1);

    int gx = int(floor(cellUV.x * float(GLYPH_WIDTH)));
    int gy = int(floor(cellUV.y * float(GLYPH_HEIGHT)));
    float mask = glyphSample(glyph, gx, gy);

    fragColor = vec4(mix(uBackground, uForeground, vec3(mask)), 1.0);
}
";

/// One-bit dithering with random or Atkinson-style noise.
fn dither() -> FilterDefinition {
    filter(
        "dither",
        "Dither",
        5,
        vec![
            ParameterSpec::enumerated("DitherType", "Dither Type", (0.0, 1.0, 1.0), 0.0, &["Random", "Atkinson"]),
            ParameterSpec::float("Threshold", "Threshold", 0.0, 1.0, 0.01, 0.4),
            ParameterSpec::float("Contrast", "Contrast", 0.5, 2.5, 0.01, 1.2),
            ParameterSpec::float("DitherAmt", "Dither Amount", 0.0, 1.0, 0.01, 0.45),
            ParameterSpec::float("PixelSize", "Pixel Size", 1.0, 128.0, 1.0, 1.0),
            ParameterSpec::color("Foreground", "Foreground", "#ffffff"),
            ParameterSpec::color("Background", "Background", "#000000"),
        ],
        &[glsl::LUMA, glsl::ADJUST_CONTRAST, glsl::HASH12],
        DITHER,
    )
}

const DITHER: &str = r"
float interleavedGradient(vec2 pos) {
    vec3 magic = vec3(0.06711056, 0.00583715, 52.9829189);
    return fract(magic.z * fract(dot(pos, magic.xy)));
}

// Single-pass stand-in for Atkinson error diffusion.
float atkinsonDither(vec2 uv, float value) {
    float noise = interleavedGradient(uv * uRes);
    vec2 px = vec2(1.0) / uRes;
    float right = luma(texture(uTex, uv + vec2(px.x, 0.0)).rgb);
    float downRight = luma(texture(uTex, uv + vec2(px.x, px.y)).rgb);
    float down = luma(texture(uTex, uv + vec2(0.0, px.y)).rgb);
    float downLeft = luma(texture(uTex, uv + vec2(-px.x, px.y)).rgb);
    float localVariation = (right + downRight + down + downLeft) / 4.0;
    float error = (value - localVariation) * 0.75;
    return noise + error * 0.3;
}

void main() {
    vec2 uv = vUV;
    vec2 px = vec2(1.0) / uRes;
    vec2 cell = px * max(1.0, uPixelSize);
    vec2 grid = floor(uv / cell) * cell + cell * 0.5;
    vec2 suv = clamp(grid, vec2(0.0), vec2(1.0));

    vec3 c = adjustContrast(texture(uTex, suv).rgb, uContrast);
    float y = luma(c);

    float d = 0.0;
    if (uDitherAmt > 0.0) {
        int ditherType = int(uDitherType + 0.5);
        if (ditherType == 0) {
            d = (hash12(uv * uRes + vec2(fract(uTime * 0.1))) - 0.5) * uDitherAmt;
        } else {
            d = (atkinsonDither(suv, y) - 0.5) * uDitherAmt;
        }
    }

    float bw = step(uThreshold + d, y);
    fragColor = vec4(mix(uBackground, uForeground, vec3(bw)), 1.0);
}
";

/// Pencil hatching following the local gradient, with outline and paper colors.
fn sketch() -> FilterDefinition {
    filter(
        "sketch",
        "Sketch",
        6,
        vec![
            ParameterSpec::float("StrokeWeight", "Stroke Weight", 0.5, 2.0, 0.1, 0.5),
            ParameterSpec::float("MaskThreshold", "Mask Brightness Cutoff", 0.0, 1.0, 0.01, 0.4),
            ParameterSpec::color("OutlineColor", "Outline", "#000000"),
            ParameterSpec::color("BackgroundColor", "Shadow", "#444444"),
            ParameterSpec::color("PaperColor", "Paper", "#fefefe"),
        ],
        &[glsl::LUMA, glsl::HASH, glsl::ROT],
        SKETCH,
    )
}

const SKETCH: &str = r"
#define STROKE_ANGLE 2.3
#define DENSITY 1.2

// Hatch line intensity for one stroke family.
float hatch(vec2 uv, float angle, float freq, float seed, float width) {
    vec2 centered = uv - vec2(0.5);
    float id = floor((rot(angle) * centered).x * freq);
    float angleJitter = (hash(vec2(id, seed)) - 0.5) * 0.25;
    vec2 varied = rot(angle + angleJitter) * centered + vec2(0.5);
    varied.x = varied.x + sin(varied.y * 15.0 + id * 0.3) * 0.015 + sin(varied.y * 8.0 + id * 0.5) * 0.025;
    float posJitter = (hash(vec2(id, seed + 1.0)) - 0.5) * 0.5;
    float strokeFract = fract(varied.x * freq + posJitter);
    float pressure = 0.3 + hash(vec2(id, seed + 2.0)) * 0.6;
    float gap = step(0.88, hash(vec2(id, floor(varied.y * 12.0) + seed + 3.0)));
    return smoothstep(width, width * 0.3, strokeFract) * pressure * (1.0 - gap);
}

void main() {
    vec2 uv = vUV;
    vec2 texel = vec2(1.0) / uRes;
    float lumaVal = luma(texture(uTex, uv).rgb);
    float maskValue = step(uMaskThreshold, lumaVal);

    float smoothedLuma = 0.0;
    float totalWeight = 0.0;
    for (int y = -1; y <= 1; y++) {
        for (int x = -1; x <= 1; x++) {
            vec2 offset = vec2(float(x), float(y)) * texel * 2.5;
            float weight = 1.0 - length(vec2(float(x), float(y))) / 2.0;
            smoothedLuma = smoothedLuma + luma(texture(uTex, uv + offset).rgb) * weight;
            totalWeight = totalWeight + weight;
        }
    }
    smoothedLuma = smoothedLuma / totalWeight;
    float detail = abs(lumaVal - smoothedLuma);
    bool smoothSkin = detail < 0.03 && lumaVal > 0.2 && lumaVal < 0.8;

    vec2 gradDir = vec2(0.0);
    float edge = 0.0;
    for (int i = 0; i < 8; i++) {
        float angle = float(i) * 0.785;
        vec2 dir = vec2(cos(angle), sin(angle));
        float near = luma(texture(uTex, uv + dir * texel * 2.0).rgb);
        gradDir = gradDir + dir * (near - lumaVal);
        float far = luma(texture(uTex, uv + dir * texel * (uStrokeWeight * 1.5)).rgb);
        edge = edge + abs(far - lumaVal);
    }
    float gradAngle = atan(gradDir.y, gradDir.x);
    float gradMag = length(gradDir);
    edge = smoothstep(0.15, 0.6, edge) * (0.7 + gradMag * 2.5);
    float textured = smoothstep(0.02, 0.08, detail);
    edge = edge * (1.0 - textured * 0.8);

    float strokeAngle = STROKE_ANGLE + gradAngle * 0.5;
    float freq = DENSITY * 60.0;
    bool allowStroke = !smoothSkin || gradMag > 0.15;

    float stroke1 = 0.0;
    if (lumaVal < 0.6 && allowStroke) {
        float intensity = smoothSkin ? 0.3 : 1.0;
        stroke1 = hatch(uv, strokeAngle, freq, 1.0, 0.35 + (1.0 - lumaVal) * 0.3) * intensity;
    }
    float stroke2 = 0.0;
    if (lumaVal < 0.35 && !smoothSkin) {
        stroke2 = hatch(uv, strokeAngle + 1.3 + gradAngle * 0.4, freq * 0.9, 5.0, 0.4 + (1.0 - lumaVal) * 0.25);
    }
    float stroke3 = 0.0;
    if (lumaVal < 0.25 && !smoothSkin) {
        stroke3 = hatch(uv, strokeAngle - 0.6 + gradAngle * 0.3, freq * 0.765, 8.0, 0.45 + (1.0 - lumaVal) * 0.2);
    }

    float textureReduction = smoothstep(0.02, 0.12, detail);
    float shading = 1.0;
    if (smoothSkin && gradMag < 0.15) {
        shading = 0.95 + lumaVal * 0.05;
    } else if (lumaVal < 0.08) {
        float smudge = smoothSkin ? 0.0 : hash(uv * 200.0) * 0.15;
        shading = 1.0 - min(1.0, max(stroke1, max(stroke2, stroke3)) + smudge);
    } else if (lumaVal < 0.15) {
        shading = mix(1.0 - max(stroke1, max(stroke2 * 0.85, stroke3 * 0.75)), 1.0, textureReduction * 0.75);
    } else if (lumaVal < 0.28) {
        shading = mix(1.0 - max(stroke1, stroke2 * 0.7), 1.0, textureReduction * 0.7);
    } else if (lumaVal < 0.4) {
        shading = mix(1.0 - stroke1 * 0.75, 1.0, textureReduction * 0.65);
    } else if (lumaVal < 0.55) {
        shading = mix(1.0 - stroke1 * 0.25, 1.0, textureReduction * 0.5);
    }

    if (lumaVal < 0.65 && !smoothSkin) {
        float grain = hash(uv * 400.0) * 0.05;
        shading = mix(shading, shading - grain, smoothstep(0.65, 0.3, lumaVal) * 0.15);
    }

    float edgeShadow = 0.0;
    if (edge > 0.1) {
        for (int i = 0; i < 4; i++) {
            float angle = float(i) * 1.57;
            vec2 dir = vec2(cos(angle), sin(angle));
            if (luma(texture(uTex, uv + dir * texel * 3.0).rgb) > lumaVal) {
                edgeShadow = edgeShadow + 0.3;
            }
        }
        edgeShadow = min(1.0, edgeShadow);
    }
    shading = shading * (1.0 - edgeShadow * 2.2);

    float pencil = clamp(min(1.0 - edge * 1.1, shading), 0.0, 1.0);
    vec3 drawn = mix(uOutlineColor, uPaperColor, vec3(pencil));
    fragColor = vec4(mix(uBackgroundColor, drawn, vec3(maskValue)), 1.0);
}
";
