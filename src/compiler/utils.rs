//! Identifier helpers shared by the schema validator and the WGSL emitter.

/// Words WGSL reserves or uses as keywords that a schema is likely to collide with.
const RESERVED: &[&str] = &[
    "alias", "array", "bitcast", "bool", "break", "case", "common", "const", "const_assert",
    "continue", "continuing", "default", "diagnostic", "discard", "else", "enable", "f16", "f32",
    "false", "filter", "fn", "for", "i32", "if", "layout", "let", "loop", "mat2x2", "mat3x3",
    "mat4x4", "module", "override", "pass", "ptr", "requires", "resource", "return", "sampler",
    "self", "set", "std", "struct", "switch", "target", "true", "type", "u32", "var", "vec2",
    "vec3", "vec4", "while",
];

/// Non-reserved words the generated include spells out: address spaces,
/// access modes, attributes, texture types and storage formats.
pub const GENERATED_INCLUDE_WORDS: &[&str] = &[
    "uniform", "storage", "read", "write", "read_write", "group", "binding", "location",
    "texture_1d", "texture_2d", "texture_2d_array", "texture_3d", "texture_storage_2d",
    "rgba8unorm", "rgba16float", "rgba32float", "r32float", "rg32float",
];

/// Whether `s` can be used verbatim as a WGSL identifier.
pub fn is_valid_wgsl_ident(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    if s == "_" || s.starts_with("__") {
        return false;
    }
    if !chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        return false;
    }
    !RESERVED.contains(&s)
}

/// `BlueNoise` -> `BLUE_NOISE`, `spheres` -> `SPHERES`.
pub fn upper_snake(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev_lower_or_digit = false;
    for ch in s.chars() {
        if ch.is_ascii_uppercase() && prev_lower_or_digit {
            out.push('_');
        }
        prev_lower_or_digit = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        out.push(ch.to_ascii_uppercase());
    }
    out
}
