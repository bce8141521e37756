use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Deserialize;
use tracing::debug;

use crate::compiler::types::HostType;
use crate::compiler::utils::{GENERATED_INCLUDE_WORDS, is_valid_wgsl_ident, upper_snake};
use crate::error::SchemaError;

/// Upper bound on static branches per program; the permutation index is a `u32` bitmask.
pub const MAX_STATIC_BRANCHES: usize = 32;

const DEFAULT_SCHEMA_JSON: &str = include_str!("../assets/schema.json");

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Semantic {
    pub name: String,
    #[serde(default)]
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    /// Host type name, e.g. `f32x4`.
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub semantic: Option<Semantic>,
}

impl FieldDecl {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            semantic: None,
        }
    }

    pub fn with_semantic(mut self, name: impl Into<String>, index: u32) -> Self {
        self.semantic = Some(Semantic {
            name: name.into(),
            index,
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BufferKind {
    Constant,
    Structured,
}

fn default_one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BufferSchema {
    pub name: String,
    pub kind: BufferKind,
    pub fields: Vec<FieldDecl>,
    #[serde(rename = "elementCount", default = "default_one")]
    pub element_count: u32,
    #[serde(rename = "cpuWritable", default)]
    pub cpu_writable: bool,
    #[serde(rename = "gpuWritable", default)]
    pub gpu_writable: bool,
    #[serde(rename = "structName", default)]
    pub struct_name: Option<String>,
}

impl BufferSchema {
    pub fn constant(name: impl Into<String>, fields: Vec<FieldDecl>) -> Self {
        Self {
            name: name.into(),
            kind: BufferKind::Constant,
            fields,
            element_count: 1,
            cpu_writable: true,
            gpu_writable: false,
            struct_name: None,
        }
    }

    pub fn structured(name: impl Into<String>, element_count: u32, fields: Vec<FieldDecl>) -> Self {
        Self {
            name: name.into(),
            kind: BufferKind::Structured,
            fields,
            element_count,
            cpu_writable: true,
            gpu_writable: false,
            struct_name: None,
        }
    }

    pub fn gpu_writable(mut self) -> Self {
        self.gpu_writable = true;
        self
    }

    pub fn with_struct_name(mut self, struct_name: impl Into<String>) -> Self {
        self.struct_name = Some(struct_name.into());
        self
    }

    /// Device struct type name.
    pub fn struct_name(&self) -> String {
        self.struct_name
            .clone()
            .unwrap_or_else(|| format!("{}Data", self.name))
    }

    /// Name of the generated element-count constant for structured buffers.
    pub fn count_constant(&self) -> Option<String> {
        (self.kind == BufferKind::Structured).then(|| format!("{}_COUNT", upper_snake(&self.name)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextureKind {
    Image,
    Buffer,
    VolumeArray,
    TextureArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureFormat {
    Rgba8unorm,
    Rgba16float,
    Rgba32float,
    R32float,
    Rg32float,
}

impl TextureFormat {
    pub fn wgsl(self) -> &'static str {
        match self {
            TextureFormat::Rgba8unorm => "rgba8unorm",
            TextureFormat::Rgba16float => "rgba16float",
            TextureFormat::Rgba32float => "rgba32float",
            TextureFormat::R32float => "r32float",
            TextureFormat::Rg32float => "rg32float",
        }
    }

    pub fn bytes_per_texel(self) -> u32 {
        match self {
            TextureFormat::Rgba8unorm | TextureFormat::R32float => 4,
            TextureFormat::Rgba16float | TextureFormat::Rg32float => 8,
            TextureFormat::Rgba32float => 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TextureSchema {
    pub name: String,
    pub kind: TextureKind,
    pub format: TextureFormat,
    pub width: u32,
    #[serde(default = "default_one")]
    pub height: u32,
    #[serde(rename = "sourceSlices", default)]
    pub source_slices: Option<Vec<String>>,
    /// Write-only storage texture instead of a sampled one.
    #[serde(default)]
    pub storage: bool,
}

impl TextureSchema {
    pub fn image(name: impl Into<String>, format: TextureFormat, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            kind: TextureKind::Image,
            format,
            width,
            height,
            source_slices: None,
            storage: false,
        }
    }

    /// Layer count for arrays, depth for volumes, 1 otherwise.
    pub fn layers(&self) -> u32 {
        self.source_slices
            .as_ref()
            .map_or(1, |slices| slices.len() as u32)
    }

    pub fn layer_constant(&self) -> Option<String> {
        matches!(self.kind, TextureKind::TextureArray | TextureKind::VolumeArray)
            .then(|| format!("{}_LAYERS", upper_snake(&self.name)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerFilter {
    Linear,
    Nearest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerAddress {
    Clamp,
    Repeat,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SamplerSchema {
    pub name: String,
    pub filter: SamplerFilter,
    pub address: SamplerAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VertexFormatSchema {
    pub name: String,
    pub fields: Vec<FieldDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StaticBranchDecl {
    pub name: String,
    #[serde(rename = "bitIndex")]
    pub bit_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Compute,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Pixel => "pixel",
            ShaderStage::Compute => "compute",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "stage")]
pub enum ProgramStage {
    #[serde(rename = "compute")]
    ComputeSingleEntry {
        #[serde(rename = "entryPoint")]
        entry_point: String,
    },
    #[serde(rename = "vertexPixel")]
    VertexPixelPair {
        #[serde(rename = "vertexEntry")]
        vertex_entry: String,
        #[serde(rename = "pixelEntry")]
        pixel_entry: String,
        #[serde(rename = "vertexFormat")]
        vertex_format: String,
    },
}

fn default_profile() -> String {
    "wgsl".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProgramSchema {
    pub name: String,
    #[serde(flatten)]
    pub stage: ProgramStage,
    #[serde(rename = "sourceFile")]
    pub source_file: String,
    #[serde(rename = "targetProfile", default = "default_profile")]
    pub target_profile: String,
    #[serde(rename = "staticBranches", default)]
    pub static_branches: Vec<StaticBranchDecl>,
}

impl ProgramSchema {
    pub fn compute(
        name: impl Into<String>,
        entry_point: impl Into<String>,
        source_file: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            stage: ProgramStage::ComputeSingleEntry {
                entry_point: entry_point.into(),
            },
            source_file: source_file.into(),
            target_profile: default_profile(),
            static_branches: Vec::new(),
        }
    }

    pub fn vertex_pixel(
        name: impl Into<String>,
        vertex_entry: impl Into<String>,
        pixel_entry: impl Into<String>,
        vertex_format: impl Into<String>,
        source_file: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            stage: ProgramStage::VertexPixelPair {
                vertex_entry: vertex_entry.into(),
                pixel_entry: pixel_entry.into(),
                vertex_format: vertex_format.into(),
            },
            source_file: source_file.into(),
            target_profile: default_profile(),
            static_branches: Vec::new(),
        }
    }

    /// Declares branches in order, bit index = position.
    pub fn with_branches<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.static_branches = names
            .iter()
            .enumerate()
            .map(|(i, name)| StaticBranchDecl {
                name: name.as_ref().to_string(),
                bit_index: i as u32,
            })
            .collect();
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.target_profile = profile.into();
        self
    }

    /// Entry points the compiled module must export, with the stage each runs in.
    pub fn entry_points(&self) -> Vec<(&str, ShaderStage)> {
        match &self.stage {
            ProgramStage::ComputeSingleEntry { entry_point } => {
                vec![(entry_point.as_str(), ShaderStage::Compute)]
            }
            ProgramStage::VertexPixelPair {
                vertex_entry,
                pixel_entry,
                ..
            } => vec![
                (vertex_entry.as_str(), ShaderStage::Vertex),
                (pixel_entry.as_str(), ShaderStage::Pixel),
            ],
        }
    }

    pub fn branch_names(&self) -> Vec<String> {
        self.static_branches.iter().map(|b| b.name.clone()).collect()
    }

    /// `2^B`. Only meaningful once the branch count has been validated.
    pub fn permutation_count(&self) -> u64 {
        1u64 << self.static_branches.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaDecl {
    Buffer(BufferSchema),
    Texture(TextureSchema),
    Sampler(SamplerSchema),
    VertexFormat(VertexFormatSchema),
    Program(ProgramSchema),
}

impl SchemaDecl {
    pub fn name(&self) -> &str {
        match self {
            SchemaDecl::Buffer(b) => &b.name,
            SchemaDecl::Texture(t) => &t.name,
            SchemaDecl::Sampler(s) => &s.name,
            SchemaDecl::VertexFormat(v) => &v.name,
            SchemaDecl::Program(p) => &p.name,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            SchemaDecl::Buffer(_) => "buffer",
            SchemaDecl::Texture(_) => "texture",
            SchemaDecl::Sampler(_) => "sampler",
            SchemaDecl::VertexFormat(_) => "vertex format",
            SchemaDecl::Program(_) => "program",
        }
    }
}

/// On-disk schema document: one array per declaration kind.
#[derive(Debug, Default, Deserialize)]
struct SchemaDocument {
    #[serde(default)]
    buffers: Vec<BufferSchema>,
    #[serde(default)]
    textures: Vec<TextureSchema>,
    #[serde(default)]
    samplers: Vec<SamplerSchema>,
    #[serde(rename = "vertexFormats", default)]
    vertex_formats: Vec<VertexFormatSchema>,
    #[serde(default)]
    programs: Vec<ProgramSchema>,
}

impl SchemaDocument {
    fn into_decls(self) -> Vec<SchemaDecl> {
        let mut decls = Vec::new();
        decls.extend(self.buffers.into_iter().map(SchemaDecl::Buffer));
        decls.extend(self.textures.into_iter().map(SchemaDecl::Texture));
        decls.extend(self.samplers.into_iter().map(SchemaDecl::Sampler));
        decls.extend(self.vertex_formats.into_iter().map(SchemaDecl::VertexFormat));
        decls.extend(self.programs.into_iter().map(SchemaDecl::Program));
        decls
    }
}

/// Validated, immutable table of every schema declaration.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    decls: Vec<SchemaDecl>,
    by_name: HashMap<String, usize>,
}

impl SchemaRegistry {
    pub fn new(decls: Vec<SchemaDecl>) -> Result<Self, SchemaError> {
        let mut by_name: HashMap<String, usize> = HashMap::new();
        for (i, decl) in decls.iter().enumerate() {
            if let Some(&first) = by_name.get(decl.name()) {
                return Err(SchemaError::DuplicateName {
                    name: decl.name().to_string(),
                    first: decls[first].kind_name(),
                    second: decl.kind_name(),
                });
            }
            by_name.insert(decl.name().to_string(), i);
        }

        let registry = Self { decls, by_name };
        registry.validate()?;
        debug!(declarations = registry.decls.len(), "schema registry validated");
        Ok(registry)
    }

    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let doc: SchemaDocument = serde_json::from_str(json)?;
        Self::new(doc.into_decls())
    }

    /// The embedded path-tracer schema.
    pub fn load_default() -> Result<Self, SchemaError> {
        Self::from_json(DEFAULT_SCHEMA_JSON)
    }

    pub fn decls(&self) -> &[SchemaDecl] {
        &self.decls
    }

    pub fn get(&self, name: &str) -> Option<&SchemaDecl> {
        self.by_name.get(name).map(|&i| &self.decls[i])
    }

    pub fn buffers(&self) -> impl Iterator<Item = &BufferSchema> {
        self.decls.iter().filter_map(|d| match d {
            SchemaDecl::Buffer(b) => Some(b),
            _ => None,
        })
    }

    pub fn textures(&self) -> impl Iterator<Item = &TextureSchema> {
        self.decls.iter().filter_map(|d| match d {
            SchemaDecl::Texture(t) => Some(t),
            _ => None,
        })
    }

    pub fn samplers(&self) -> impl Iterator<Item = &SamplerSchema> {
        self.decls.iter().filter_map(|d| match d {
            SchemaDecl::Sampler(s) => Some(s),
            _ => None,
        })
    }

    pub fn vertex_formats(&self) -> impl Iterator<Item = &VertexFormatSchema> {
        self.decls.iter().filter_map(|d| match d {
            SchemaDecl::VertexFormat(v) => Some(v),
            _ => None,
        })
    }

    pub fn programs(&self) -> impl Iterator<Item = &ProgramSchema> {
        self.decls.iter().filter_map(|d| match d {
            SchemaDecl::Program(p) => Some(p),
            _ => None,
        })
    }

    pub fn program(&self, name: &str) -> Option<&ProgramSchema> {
        match self.get(name)? {
            SchemaDecl::Program(p) => Some(p),
            _ => None,
        }
    }

    pub fn buffer(&self, name: &str) -> Option<&BufferSchema> {
        match self.get(name)? {
            SchemaDecl::Buffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn vertex_format(&self, name: &str) -> Option<&VertexFormatSchema> {
        match self.get(name)? {
            SchemaDecl::VertexFormat(v) => Some(v),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), SchemaError> {
        // Generated names share the namespace with declarations.
        let mut generated: HashMap<String, &'static str> = self
            .decls
            .iter()
            .map(|d| (d.name().to_string(), d.kind_name()))
            .collect();
        let mut claim = |name: String, kind: &'static str| match generated.get(&name) {
            Some(&first) => Err(SchemaError::DuplicateName {
                name,
                first,
                second: kind,
            }),
            None => {
                generated.insert(name, kind);
                Ok(())
            }
        };

        for decl in &self.decls {
            check_ident(decl.name(), decl.kind_name())?;
            match decl {
                SchemaDecl::Buffer(b) => {
                    validate_buffer(b)?;
                    claim(b.struct_name(), "generated struct")?;
                    if let Some(count) = b.count_constant() {
                        claim(count, "generated constant")?;
                    }
                }
                SchemaDecl::Texture(t) => {
                    validate_texture(t)?;
                    if let Some(layers) = t.layer_constant() {
                        claim(layers, "generated constant")?;
                    }
                }
                SchemaDecl::Sampler(_) => {}
                SchemaDecl::VertexFormat(v) => validate_vertex_format(v)?,
                SchemaDecl::Program(_) => {}
            }
        }

        // Branch names become macros over every active line, including the
        // generated include, so they may not shadow anything it declares.
        let namespace = self.shader_namespace();
        for program in self.programs() {
            self.validate_program(program, &namespace)?;
        }
        Ok(())
    }

    /// Every identifier the generated include or a program's entry points
    /// declare, with what declares it.
    fn shader_namespace(&self) -> HashMap<String, &'static str> {
        let mut names: HashMap<String, &'static str> = HashMap::new();
        for decl in &self.decls {
            names.entry(decl.name().to_string()).or_insert(decl.kind_name());
            match decl {
                SchemaDecl::Buffer(b) => {
                    names.entry(b.struct_name()).or_insert("generated struct");
                    if let Some(count) = b.count_constant() {
                        names.entry(count).or_insert("generated constant");
                    }
                    for field in &b.fields {
                        names.entry(field.name.clone()).or_insert("field");
                    }
                }
                SchemaDecl::Texture(t) => {
                    if let Some(layers) = t.layer_constant() {
                        names.entry(layers).or_insert("generated constant");
                    }
                }
                SchemaDecl::VertexFormat(v) => {
                    for field in &v.fields {
                        names.entry(field.name.clone()).or_insert("field");
                    }
                }
                SchemaDecl::Program(p) => {
                    for (entry, _) in p.entry_points() {
                        names.entry(entry.to_string()).or_insert("entry point");
                    }
                }
                SchemaDecl::Sampler(_) => {}
            }
        }
        names
    }

    fn validate_program(
        &self,
        program: &ProgramSchema,
        namespace: &HashMap<String, &'static str>,
    ) -> Result<(), SchemaError> {
        let count = program.static_branches.len();
        if count > MAX_STATIC_BRANCHES {
            return Err(SchemaError::TooManyBranches {
                program: program.name.clone(),
                count,
            });
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for (position, branch) in program.static_branches.iter().enumerate() {
            check_ident(&branch.name, &format!("static branch of {}", program.name))?;
            if !seen.insert(branch.name.as_str()) {
                return Err(SchemaError::DuplicateBranch {
                    program: program.name.clone(),
                    branch: branch.name.clone(),
                });
            }
            if let Some(&first) = namespace.get(&branch.name) {
                return Err(SchemaError::DuplicateName {
                    name: branch.name.clone(),
                    first,
                    second: "static branch",
                });
            }
            if GENERATED_INCLUDE_WORDS.contains(&branch.name.as_str()) {
                return Err(invalid(
                    &program.name,
                    format!("static branch '{}' shadows a word of the generated include", branch.name),
                ));
            }
            if branch.bit_index as usize != position {
                return Err(SchemaError::NonContiguousBranch {
                    program: program.name.clone(),
                    branch: branch.name.clone(),
                    bit_index: branch.bit_index,
                    expected: position as u32,
                });
            }
        }

        for (entry, stage) in program.entry_points() {
            check_ident(entry, &format!("{stage} entry point of {}", program.name))?;
        }

        if let ProgramStage::VertexPixelPair { vertex_format, .. } = &program.stage {
            if self.vertex_format(vertex_format).is_none() {
                return Err(SchemaError::UnknownReference {
                    owner: program.name.clone(),
                    name: vertex_format.clone(),
                    expected: "vertex format",
                });
            }
        }

        if !matches!(program.target_profile.as_str(), "wgsl" | "webgpu") {
            return Err(SchemaError::UnknownProfile {
                program: program.name.clone(),
                profile: program.target_profile.clone(),
            });
        }

        if program.source_file.trim().is_empty() {
            return Err(invalid(&program.name, "empty source file"));
        }
        Ok(())
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> SchemaError {
    SchemaError::InvalidDeclaration {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn check_ident(name: &str, context: &str) -> Result<(), SchemaError> {
    if is_valid_wgsl_ident(name) {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier {
            name: name.to_string(),
            context: context.to_string(),
        })
    }
}

fn validate_fields(owner: &str, fields: &[FieldDecl]) -> Result<(), SchemaError> {
    if fields.is_empty() {
        return Err(invalid(owner, "declares no fields"));
    }
    let mut seen: HashSet<&str> = HashSet::new();
    for field in fields {
        check_ident(&field.name, &format!("field of {owner}"))?;
        if !seen.insert(field.name.as_str()) {
            return Err(invalid(owner, format!("field '{}' declared twice", field.name)));
        }
        if HostType::from_name(&field.ty).is_none() {
            return Err(SchemaError::UnmappedType {
                owner: owner.to_string(),
                field: field.name.clone(),
                ty: field.ty.clone(),
            });
        }
    }
    Ok(())
}

fn validate_buffer(buffer: &BufferSchema) -> Result<(), SchemaError> {
    validate_fields(&buffer.name, &buffer.fields)?;
    check_ident(&buffer.struct_name(), &format!("struct name of {}", buffer.name))?;
    match buffer.kind {
        BufferKind::Constant => {
            if buffer.element_count != 1 {
                return Err(invalid(&buffer.name, "constant buffers hold exactly one element"));
            }
            if buffer.gpu_writable {
                return Err(invalid(&buffer.name, "constant buffers cannot be GPU-writable"));
            }
        }
        BufferKind::Structured => {
            if buffer.element_count == 0 {
                return Err(invalid(&buffer.name, "element count must be at least 1"));
            }
        }
    }
    Ok(())
}

fn validate_texture(texture: &TextureSchema) -> Result<(), SchemaError> {
    if texture.width == 0 || texture.height == 0 {
        return Err(invalid(&texture.name, "texture extent must be non-zero"));
    }
    let is_array = matches!(texture.kind, TextureKind::VolumeArray | TextureKind::TextureArray);
    match (&texture.source_slices, is_array) {
        (Some(slices), true) if slices.is_empty() => {
            return Err(invalid(&texture.name, "source slice list is empty"));
        }
        (None, true) => {
            return Err(invalid(&texture.name, "array textures need source slices"));
        }
        (Some(_), false) => {
            return Err(invalid(&texture.name, "only array textures take source slices"));
        }
        _ => {}
    }
    if texture.kind == TextureKind::Buffer && texture.height != 1 {
        return Err(invalid(&texture.name, "buffer textures are one-dimensional"));
    }
    if texture.storage && texture.kind != TextureKind::Image {
        return Err(invalid(&texture.name, "only image textures can be storage textures"));
    }
    Ok(())
}

fn validate_vertex_format(format: &VertexFormatSchema) -> Result<(), SchemaError> {
    validate_fields(&format.name, &format.fields)?;
    for field in &format.fields {
        let Some(semantic) = &field.semantic else {
            return Err(invalid(
                &format.name,
                format!("vertex field '{}' has no semantic", field.name),
            ));
        };
        if semantic.name.is_empty()
            || !semantic
                .name
                .chars()
                .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '_')
        {
            return Err(invalid(
                &format.name,
                format!("semantic '{}' must be upper-case", semantic.name),
            ));
        }
    }
    Ok(())
}
