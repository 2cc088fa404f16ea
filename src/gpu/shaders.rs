//! WGSL source of the liquid metal effect
//!
//! The vertex stage draws a 4-vertex triangle strip covering the target.
//! The fragment stage reads the icon texture's red channel as an edge
//! signal (0 = solid icon, 1 = background) and paints animated chrome
//! stripes over it, bent by 2D simplex noise and a fake refraction per
//! colour channel. Output colour is premultiplied by opacity.

/// Bind group 0: icon texture, its sampler, then the uniform block.
/// Field order must match `GpuUniforms` in renderer.rs.
pub const LIQUID_METAL_SHADER: &str = r#"
struct Uniforms {
    time: f32,
    ratio: f32,
    img_ratio: f32,
    pattern_scale: f32,
    refraction: f32,
    edge: f32,
    pattern_blur: f32,
    liquid: f32,
}

@group(0) @binding(0) var icon_texture: texture_2d<f32>;
@group(0) @binding(1) var icon_sampler: sampler;
@group(0) @binding(2) var<uniform> u: Uniforms;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) position: vec2<f32>) -> VertexOutput {
    var output: VertexOutput;
    output.uv = 0.5 * (position + vec2<f32>(1.0));
    output.clip_position = vec4<f32>(position, 0.0, 1.0);
    return output;
}

// Hermite step that also accepts reversed edges
fn sstep(e0: f32, e1: f32, x: f32) -> f32 {
    let t = clamp((x - e0) / (e1 - e0), 0.0, 1.0);
    return t * t * (3.0 - 2.0 * t);
}

// Floored modulo
fn fmod(x: f32, y: f32) -> f32 {
    return x - y * floor(x / y);
}

fn mod289_3(x: vec3<f32>) -> vec3<f32> {
    return x - floor(x * (1.0 / 289.0)) * 289.0;
}

fn mod289_2(x: vec2<f32>) -> vec2<f32> {
    return x - floor(x * (1.0 / 289.0)) * 289.0;
}

fn permute(x: vec3<f32>) -> vec3<f32> {
    return mod289_3(((x * 34.0) + 1.0) * x);
}

fn snoise(v: vec2<f32>) -> f32 {
    let C = vec4<f32>(0.211324865405187, 0.366025403784439, -0.577350269189626, 0.024390243902439);
    var i = floor(v + dot(v, C.yy));
    let x0 = v - i + dot(i, C.xx);
    var i1 = vec2<f32>(0.0, 1.0);
    if (x0.x > x0.y) {
        i1 = vec2<f32>(1.0, 0.0);
    }
    let x12 = x0.xyxy + C.xxzz - vec4<f32>(i1, 0.0, 0.0);
    i = mod289_2(i);
    let p = permute(permute(i.y + vec3<f32>(0.0, i1.y, 1.0)) + i.x + vec3<f32>(0.0, i1.x, 1.0));
    var m = max(0.5 - vec3<f32>(dot(x0, x0), dot(x12.xy, x12.xy), dot(x12.zw, x12.zw)), vec3<f32>(0.0));
    m = m * m;
    m = m * m;
    let x = 2.0 * fract(p * C.www) - 1.0;
    let h = abs(x) - 0.5;
    let ox = floor(x + 0.5);
    let a0 = x - ox;
    m = m * (1.79284291400159 - 0.85373472095314 * (a0 * a0 + h * h));
    let g = vec3<f32>(a0.x * x0.x + h.x * x0.y, a0.yz * x12.xz + h.yz * x12.yw);
    return 130.0 * dot(m, g);
}

fn get_img_uv(vuv: vec2<f32>) -> vec2<f32> {
    var img_uv = vuv - 0.5;
    if (u.ratio > u.img_ratio) {
        img_uv.x = img_uv.x * u.ratio / u.img_ratio;
    } else {
        img_uv.y = img_uv.y * u.img_ratio / u.ratio;
    }
    img_uv = img_uv + 0.5;
    img_uv.y = 1.0 - img_uv.y;
    return img_uv;
}

fn rotate(uv: vec2<f32>, th: f32) -> vec2<f32> {
    return mat2x2<f32>(vec2<f32>(cos(th), sin(th)), vec2<f32>(-sin(th), cos(th))) * uv;
}

fn get_color_channel(c1: f32, c2: f32, stripe_p: f32, w: vec3<f32>, extra_blur: f32, bulge: f32) -> f32 {
    var ch = c2;
    let blur = u.pattern_blur + extra_blur;
    ch = mix(ch, c1, sstep(0.0, blur, stripe_p));
    var border = w.x;
    ch = mix(ch, c2, sstep(border - blur, border + blur, stripe_p));
    let b = sstep(0.2, 0.8, bulge);
    border = w.x + 0.4 * (1.0 - b) * w.y;
    ch = mix(ch, c1, sstep(border - blur, border + blur, stripe_p));
    border = w.x + 0.5 * (1.0 - b) * w.y;
    ch = mix(ch, c2, sstep(border - blur, border + blur, stripe_p));
    border = w.x + w.y;
    ch = mix(ch, c1, sstep(border - blur, border + blur, stripe_p));
    let gradient_t = (stripe_p - w.x - w.y) / w.z;
    let gradient = mix(c1, c2, sstep(0.0, 1.0, gradient_t));
    ch = mix(ch, gradient, sstep(border - blur, border + blur, stripe_p));
    return ch;
}

fn get_img_frame_alpha(uv: vec2<f32>, frame_width: f32) -> f32 {
    var alpha = sstep(0.0, frame_width, uv.x) * sstep(1.0, 1.0 - frame_width, uv.x);
    alpha = alpha * sstep(0.0, frame_width, uv.y) * sstep(1.0, 1.0 - frame_width, uv.y);
    return alpha;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    var uv = input.uv;
    uv.y = 1.0 - uv.y;
    uv.x = uv.x * u.ratio;
    let diagonal = uv.x - uv.y;
    let t = 0.001 * u.time;

    let img_uv = get_img_uv(input.uv);
    let img = textureSample(icon_texture, icon_sampler, img_uv);

    let color1 = vec3<f32>(0.98, 0.98, 1.0);
    let color2 = vec3<f32>(0.1, 0.1, 0.1 + 0.1 * sstep(0.7, 1.3, uv.x + uv.y));

    var edge = img.r;
    var grad_uv = uv - 0.5;
    let dist = length(grad_uv + vec2<f32>(0.0, 0.2 * diagonal));
    grad_uv = rotate(grad_uv, (0.25 - 0.2 * diagonal) * 3.14159);

    var bulge = pow(1.8 * dist, 1.2);
    bulge = 1.0 - bulge;
    bulge = bulge * pow(uv.y, 0.3);

    let cycle_width = u.pattern_scale;
    let thin_strip_1_ratio = 0.12 / cycle_width * (1.0 - 0.4 * bulge);
    let thin_strip_2_ratio = 0.07 / cycle_width * (1.0 + 0.4 * bulge);
    let wide_strip_ratio = 1.0 - thin_strip_1_ratio - thin_strip_2_ratio;
    let thin_strip_1_width = cycle_width * thin_strip_1_ratio;
    let thin_strip_2_width = cycle_width * thin_strip_2_ratio;

    var opacity = 1.0 - sstep(0.9 - 0.5 * u.edge, 1.0 - 0.5 * u.edge, edge);
    opacity = opacity * get_img_frame_alpha(img_uv, 0.01);

    let noise = snoise(uv - t);
    edge = edge + (1.0 - edge) * u.liquid * noise;

    let refr = clamp(1.0 - bulge, 0.0, 1.0);

    var dir = grad_uv.x + diagonal;
    dir = dir - 2.0 * noise * diagonal * (sstep(0.0, 1.0, edge) * sstep(1.0, 0.0, edge));
    bulge = bulge * clamp(pow(uv.y, 0.1), 0.3, 1.0);
    dir = dir * (0.1 + (1.1 - edge) * bulge);
    dir = dir * sstep(1.0, 0.7, edge);
    dir = dir + 0.18 * (sstep(0.1, 0.2, uv.y) * sstep(0.4, 0.2, uv.y));
    dir = dir + 0.03 * (sstep(0.1, 0.2, 1.0 - uv.y) * sstep(0.4, 0.2, 1.0 - uv.y));
    dir = dir * (0.5 + 0.5 * pow(uv.y, 2.0));
    dir = dir * cycle_width;
    dir = dir - t;

    var refr_r = refr + 0.03 * bulge * noise;
    var refr_b = 1.3 * refr;
    refr_r = refr_r + 5.0 * (sstep(-0.1, 0.2, uv.y) * sstep(0.5, 0.1, uv.y)) * (sstep(0.4, 0.6, bulge) * sstep(1.0, 0.4, bulge));
    refr_r = refr_r - diagonal;
    refr_b = refr_b + (sstep(0.0, 0.4, uv.y) * sstep(0.8, 0.1, uv.y)) * (sstep(0.4, 0.6, bulge) * sstep(0.8, 0.4, bulge));
    refr_b = refr_b - 0.2 * edge;
    refr_r = refr_r * u.refraction;
    refr_b = refr_b * u.refraction;

    var w = vec3<f32>(thin_strip_1_width, thin_strip_2_width, wide_strip_ratio);
    w.y = w.y - 0.02 * sstep(0.0, 1.0, edge + bulge);

    let stripe_r = fmod(dir + refr_r, 1.0);
    let r = get_color_channel(color1.r, color2.r, stripe_r, w, 0.02 + 0.03 * u.refraction * bulge, bulge);
    let stripe_g = fmod(dir, 1.0);
    let g = get_color_channel(color1.g, color2.g, stripe_g, w, 0.01 / (1.0 - diagonal), bulge);
    let stripe_b = fmod(dir - refr_b, 1.0);
    let b = get_color_channel(color1.b, color2.b, stripe_b, w, 0.01, bulge);

    let color = vec3<f32>(r, g, b) * opacity;
    return vec4<f32>(color, opacity);
}
"#;

/// Get the shader source code for the metallic renderer
pub fn get_shader() -> &'static str {
    LIQUID_METAL_SHADER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_points_present() {
        let source = get_shader();
        assert!(source.contains("fn vs_main("));
        assert!(source.contains("fn fs_main("));
    }

    #[test]
    fn test_uniform_block_has_eight_floats() {
        let source = get_shader();
        let start = source.find("struct Uniforms {").unwrap();
        let end = start + source[start..].find('}').unwrap();
        let fields = source[start..end].matches(": f32").count();
        assert_eq!(fields, 8);
    }
}
