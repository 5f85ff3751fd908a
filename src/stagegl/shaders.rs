//! WGSL sources for the batch and cover programs.
//!
//! The batch program is generated for a fixed number of texture slots: WGSL
//! cannot index a list of bindings dynamically, so the fragment stage picks
//! the slot through an if-chain.

use std::fmt::Write;

use crate::filters::FilterShader;

/// Batch program sampling from `texture_units` slots.
pub fn batch_source(texture_units: usize) -> String {
    let units = texture_units.max(1);
    let mut src = String::with_capacity(2048 + units * 160);

    let _ = writeln!(
        src,
        "struct Projection {{\n    size: vec2<f32>,\n    flip: f32,\n    _pad: f32,\n}};\n"
    );
    let _ = writeln!(
        src,
        "@group(0) @binding({}) var<uniform> projection: Projection;",
        units + 1
    );
    for i in 0..units {
        let _ = writeln!(src, "@group(0) @binding({i}) var texture_{i}: texture_2d<f32>;");
    }
    let _ = writeln!(src, "@group(0) @binding({units}) var card_sampler: sampler;\n");

    src.push_str(
        r#"struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) texture_index: f32,
    @location(3) alpha: f32,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) @interpolate(flat) texture_index: f32,
    @location(2) alpha: f32,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var y = in.position.y;
    if (projection.flip > 0.5) {
        y = projection.size.y - y;
    }
    var out: VertexOutput;
    out.clip_position = vec4<f32>(
        in.position.x / projection.size.x * 2.0 - 1.0,
        1.0 - y / projection.size.y * 2.0,
        0.0,
        1.0,
    );
    out.uv = in.uv;
    out.texture_index = in.texture_index;
    out.alpha = in.alpha;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let index = i32(in.texture_index + 0.5);
    var color = vec4<f32>(0.0);
"#,
    );

    for i in 0..units {
        let keyword = if i == 0 { "    if" } else { " else if" };
        let _ = write!(
            src,
            "{keyword} (index == {i}) {{\n        color = textureSampleLevel(texture_{i}, card_sampler, in.uv, 0.0);\n    }}"
        );
    }
    src.push_str("\n    return color * in.alpha;\n}\n");
    src
}

/// Full-target copy of one texture, optionally through a filter body.
///
/// Bindings: 0 source texture, 1 sampler, 2 uniforms (`params` then `flip`).
pub fn cover_source(filter: Option<&FilterShader>) -> String {
    let body = filter.map(|f| f.body.as_str()).unwrap_or("");
    format!(
        r#"struct CoverUniforms {{
    params: array<vec4<f32>, {max_params}>,
    flip: vec4<f32>,
}};

@group(0) @binding(0) var source: texture_2d<f32>;
@group(0) @binding(1) var source_sampler: sampler;
@group(0) @binding(2) var<uniform> uniforms: CoverUniforms;

struct CoverOutput {{
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}};

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> CoverOutput {{
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(1.0, 1.0),
    );
    let corner = corners[vertex_index];
    var v = corner.y;
    if (uniforms.flip.x > 0.5) {{
        v = 1.0 - corner.y;
    }}
    var out: CoverOutput;
    out.clip_position = vec4<f32>(corner.x * 2.0 - 1.0, 1.0 - corner.y * 2.0, 0.0, 1.0);
    out.uv = vec2<f32>(corner.x, v);
    return out;
}}

@fragment
fn fs_main(in: CoverOutput) -> @location(0) vec4<f32> {{
    let texel = textureSampleLevel(source, source_sampler, in.uv, 0.0);
    var color = vec4<f32>(0.0);
    if (texel.a > 0.0) {{
        color = vec4<f32>(texel.rgb / texel.a, texel.a);
    }}
    let params = uniforms.params;
    {body}
    return vec4<f32>(color.rgb * color.a, color.a);
}}
"#,
        max_params = FilterShader::MAX_PARAMS,
    )
}
