//! Layout compiler: turns the validated schema into host POD layouts and the
//! generated WGSL include that declares the same structs and resource globals.
//!
//! Host and device agree byte for byte: fields keep their declared order and
//! width, and any declaration that would make WGSL insert padding is rejected
//! instead of being silently widened.

use std::fmt::Write as _;

use bytemuck::Pod;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::compiler::reflection::{SlotIndex, SlotKind};
use crate::compiler::types::HostType;
use crate::error::SchemaError;
use crate::schema::{
    BufferKind, BufferSchema, FieldDecl, SchemaRegistry, Semantic, TextureKind, TextureSchema,
};

const GENERATED_HEADER: &str = "// Generated from the schema registry. Do not edit.";

/// Bind group every schema resource lives in.
pub const SCHEMA_BIND_GROUP: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub name: String,
    pub ty: HostType,
    pub offset: u32,
    pub semantic: Option<Semantic>,
}

impl FieldLayout {
    pub fn size(&self) -> u32 {
        self.ty.size()
    }
}

/// Host-side description of one struct: a buffer element or a vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLayout {
    /// Declaration name (`Spheres`).
    pub name: String,
    /// Device struct type name (`Sphere`).
    pub struct_name: String,
    pub fields: Vec<FieldLayout>,
    /// Packed element size; also the array stride on the device.
    pub stride: u32,
    pub element_count: u32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldAccessError {
    #[error("'{layout}' has no field '{field}'")]
    UnknownField { layout: String, field: String },

    #[error("field '{layout}.{field}' is {expected} bytes, value is {actual} bytes")]
    SizeMismatch {
        layout: String,
        field: String,
        expected: u32,
        actual: usize,
    },

    #[error("element {element} is out of range for '{layout}' ({count} elements)")]
    ElementOutOfRange {
        layout: String,
        element: u32,
        count: u32,
    },

    #[error("byte slice of {actual} bytes is too small for '{layout}' ({expected} bytes)")]
    ShortBuffer {
        layout: String,
        expected: u64,
        actual: usize,
    },
}

impl HostLayout {
    pub fn byte_size(&self) -> u64 {
        u64::from(self.stride) * u64::from(self.element_count)
    }

    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Zeroed host storage for every element.
    pub fn zeroed(&self) -> Vec<u8> {
        vec![0; self.byte_size() as usize]
    }

    fn locate(
        &self,
        bytes_len: usize,
        element: u32,
        field: &str,
        value_len: usize,
    ) -> Result<std::ops::Range<usize>, FieldAccessError> {
        if element >= self.element_count {
            return Err(FieldAccessError::ElementOutOfRange {
                layout: self.name.clone(),
                element,
                count: self.element_count,
            });
        }
        if (bytes_len as u64) < self.byte_size() {
            return Err(FieldAccessError::ShortBuffer {
                layout: self.name.clone(),
                expected: self.byte_size(),
                actual: bytes_len,
            });
        }
        let layout = self.field(field).ok_or_else(|| FieldAccessError::UnknownField {
            layout: self.name.clone(),
            field: field.to_string(),
        })?;
        if layout.size() as usize != value_len {
            return Err(FieldAccessError::SizeMismatch {
                layout: self.name.clone(),
                field: field.to_string(),
                expected: layout.size(),
                actual: value_len,
            });
        }
        let start = element as usize * self.stride as usize + layout.offset as usize;
        Ok(start..start + value_len)
    }

    pub fn write_field<T: Pod>(
        &self,
        bytes: &mut [u8],
        element: u32,
        field: &str,
        value: T,
    ) -> Result<(), FieldAccessError> {
        let src = bytemuck::bytes_of(&value);
        let range = self.locate(bytes.len(), element, field, src.len())?;
        bytes[range].copy_from_slice(src);
        Ok(())
    }

    pub fn read_field<T: Pod>(
        &self,
        bytes: &[u8],
        element: u32,
        field: &str,
    ) -> Result<T, FieldAccessError> {
        let range = self.locate(bytes.len(), element, field, std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(&bytes[range]))
    }
}

/// Slot assigned to one schema resource in the generated include.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSlot {
    pub name: String,
    pub kind: SlotKind,
    pub slot: SlotIndex,
}

/// Everything the layout compiler produces from one registry.
#[derive(Debug, Clone)]
pub struct CompiledLayouts {
    buffers: Vec<HostLayout>,
    vertex_formats: Vec<HostLayout>,
    slots: Vec<ResourceSlot>,
    source: String,
}

impl CompiledLayouts {
    pub fn buffers(&self) -> &[HostLayout] {
        &self.buffers
    }

    pub fn buffer(&self, name: &str) -> Option<&HostLayout> {
        self.buffers.iter().find(|l| l.name == name)
    }

    pub fn vertex_formats(&self) -> &[HostLayout] {
        &self.vertex_formats
    }

    pub fn vertex_format(&self, name: &str) -> Option<&HostLayout> {
        self.vertex_formats.iter().find(|l| l.name == name)
    }

    pub fn slots(&self) -> &[ResourceSlot] {
        &self.slots
    }

    pub fn slot(&self, name: &str) -> Option<&ResourceSlot> {
        self.slots.iter().find(|s| s.name == name)
    }

    /// The generated WGSL include.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parse the generated include with naga and check that every struct
    /// lands at exactly the host offsets and stride.
    pub fn verify_device_layout(&self) -> Result<(), SchemaError> {
        let module = naga::front::wgsl::parse_str(&self.source).map_err(|e| {
            SchemaError::LayoutMismatch {
                owner: "schema".to_string(),
                detail: e.emit_to_string(&self.source),
            }
        })?;

        for layout in &self.buffers {
            let mismatch = |detail: String| SchemaError::LayoutMismatch {
                owner: layout.name.clone(),
                detail,
            };

            let (members, span) = module
                .types
                .iter()
                .find_map(|(_, ty)| match (&ty.name, &ty.inner) {
                    (Some(name), naga::TypeInner::Struct { members, span })
                        if *name == layout.struct_name =>
                    {
                        Some((members, *span))
                    }
                    _ => None,
                })
                .ok_or_else(|| mismatch(format!("struct '{}' not found", layout.struct_name)))?;

            if members.len() != layout.fields.len() {
                return Err(mismatch(format!(
                    "{} device members, {} host fields",
                    members.len(),
                    layout.fields.len()
                )));
            }
            for (member, field) in members.iter().zip(&layout.fields) {
                if member.name.as_deref() != Some(field.name.as_str()) || member.offset != field.offset
                {
                    return Err(mismatch(format!(
                        "member {:?} at device offset {}, host field '{}' at offset {}",
                        member.name, member.offset, field.name, field.offset
                    )));
                }
            }
            if span != layout.stride {
                return Err(mismatch(format!(
                    "device span {span}, host stride {}",
                    layout.stride
                )));
            }

            let global_ty = module
                .global_variables
                .iter()
                .find(|(_, var)| var.name.as_deref() == Some(layout.name.as_str()))
                .map(|(_, var)| &module.types[var.ty].inner);
            if let Some(naga::TypeInner::Array { stride, .. }) = global_ty {
                if *stride != layout.stride {
                    return Err(mismatch(format!(
                        "device array stride {stride}, host stride {}",
                        layout.stride
                    )));
                }
            }
        }
        debug!(buffers = self.buffers.len(), "device layout matches host layout");
        Ok(())
    }
}

/// Compile host layouts and the generated include for every declaration.
#[instrument(skip_all, fields(declarations = registry.decls().len()))]
pub fn compile_layouts(registry: &SchemaRegistry) -> Result<CompiledLayouts, SchemaError> {
    let mut buffers = Vec::new();
    for buffer in registry.buffers() {
        let layout = layout_struct(&buffer.name, &buffer.struct_name(), &buffer.fields, true)?;
        buffers.push(HostLayout {
            element_count: buffer.element_count,
            ..layout
        });
    }

    let mut vertex_formats = Vec::new();
    for format in registry.vertex_formats() {
        vertex_formats.push(layout_struct(&format.name, &format.name, &format.fields, false)?);
    }

    let mut slots = Vec::new();
    let mut globals = Vec::new();
    let mut next_binding = 0u32;
    let mut assign = |name: &str, kind: SlotKind| {
        let slot = SlotIndex {
            group: SCHEMA_BIND_GROUP,
            binding: next_binding,
        };
        next_binding += 1;
        slots.push(ResourceSlot {
            name: name.to_string(),
            kind,
            slot,
        });
        slot
    };

    for (buffer, layout) in registry.buffers().zip(&buffers) {
        let kind = match buffer.kind {
            BufferKind::Constant => SlotKind::ConstantBuffer,
            BufferKind::Structured => SlotKind::StructuredBuffer,
        };
        let slot = assign(&buffer.name, kind);
        globals.push(format!("{} {}", slot_attrs(slot), buffer_global(buffer, layout)));
    }
    for texture in registry.textures() {
        let kind = if texture.storage {
            SlotKind::StorageTexture
        } else {
            SlotKind::Texture
        };
        let slot = assign(&texture.name, kind);
        globals.push(format!(
            "{} var {}: {};",
            slot_attrs(slot),
            texture.name,
            texture_type(texture)
        ));
    }
    for sampler in registry.samplers() {
        let slot = assign(&sampler.name, SlotKind::Sampler);
        globals.push(format!("{} var {}: sampler;", slot_attrs(slot), sampler.name));
    }

    let mut blocks = Vec::new();
    for layout in &buffers {
        blocks.push(struct_block(layout));
    }
    for layout in &vertex_formats {
        blocks.push(struct_block(layout));
    }

    let mut constants = Vec::new();
    for buffer in registry.buffers() {
        if let Some(name) = buffer.count_constant() {
            constants.push(format!("const {name}: u32 = {}u;", buffer.element_count));
        }
    }
    for texture in registry.textures() {
        if let Some(name) = texture.layer_constant() {
            constants.push(format!("const {name}: u32 = {}u;", texture.layers()));
        }
    }
    if !constants.is_empty() {
        blocks.push(constants.join("\n"));
    }
    if !globals.is_empty() {
        blocks.push(globals.join("\n"));
    }

    let mut source = String::from(GENERATED_HEADER);
    source.push('\n');
    for block in blocks {
        source.push('\n');
        source.push_str(&block);
        source.push('\n');
    }

    info!(
        buffers = buffers.len(),
        vertex_formats = vertex_formats.len(),
        slots = slots.len(),
        "schema layouts compiled"
    );

    Ok(CompiledLayouts {
        buffers,
        vertex_formats,
        slots,
        source,
    })
}

/// Pack fields in order with no padding; reject anything WGSL would pad.
/// `device_struct` applies the host-shareable alignment rules; vertex
/// attributes only need 4-byte offsets.
fn layout_struct(
    owner: &str,
    struct_name: &str,
    fields: &[FieldDecl],
    device_struct: bool,
) -> Result<HostLayout, SchemaError> {
    let mut offset = 0u32;
    let mut struct_align = 4u32;
    let mut out = Vec::with_capacity(fields.len());
    for field in fields {
        let unmapped = || SchemaError::UnmappedType {
            owner: owner.to_string(),
            field: field.name.clone(),
            ty: field.ty.clone(),
        };
        let ty = HostType::from_name(&field.ty).ok_or_else(unmapped)?;
        let align = if device_struct {
            ty.device_align().ok_or_else(unmapped)?
        } else {
            ty.wgsl().ok_or_else(unmapped)?;
            4
        };
        if offset % align != 0 {
            return Err(SchemaError::ImplicitPadding {
                owner: owner.to_string(),
                field: field.name.clone(),
                offset,
                align,
            });
        }
        struct_align = struct_align.max(align);
        out.push(FieldLayout {
            name: field.name.clone(),
            ty,
            offset,
            semantic: field.semantic.clone(),
        });
        offset += ty.size();
    }
    if device_struct && offset % struct_align != 0 {
        return Err(SchemaError::UnalignedStride {
            owner: owner.to_string(),
            size: offset,
            align: struct_align,
        });
    }
    Ok(HostLayout {
        name: owner.to_string(),
        struct_name: struct_name.to_string(),
        fields: out,
        stride: offset,
        element_count: 1,
    })
}

fn slot_attrs(slot: SlotIndex) -> String {
    format!("@group({}) @binding({})", slot.group, slot.binding)
}

fn wgsl_type(ty: HostType) -> &'static str {
    // Layouts only hold types that passed the mapping check.
    ty.wgsl().unwrap_or("f32")
}

fn struct_block(layout: &HostLayout) -> String {
    let mut block = format!("struct {} {{\n", layout.struct_name);
    for (location, field) in layout.fields.iter().enumerate() {
        match &field.semantic {
            Some(semantic) => {
                let _ = writeln!(
                    block,
                    "    @location({location}) {}: {}, // {}{}",
                    field.name,
                    wgsl_type(field.ty),
                    semantic.name,
                    semantic.index
                );
            }
            None => {
                let _ = writeln!(block, "    {}: {},", field.name, wgsl_type(field.ty));
            }
        }
    }
    block.push('}');
    block
}

fn buffer_global(buffer: &BufferSchema, layout: &HostLayout) -> String {
    match buffer.kind {
        BufferKind::Constant => format!("var<uniform> {}: {};", buffer.name, layout.struct_name),
        BufferKind::Structured => {
            let access = if buffer.gpu_writable { "read_write" } else { "read" };
            format!(
                "var<storage, {access}> {}: array<{}, {}>;",
                buffer.name, layout.struct_name, buffer.element_count
            )
        }
    }
}

fn texture_type(texture: &TextureSchema) -> String {
    if texture.storage {
        return format!("texture_storage_2d<{}, write>", texture.format.wgsl());
    }
    match texture.kind {
        TextureKind::Image => "texture_2d<f32>",
        TextureKind::Buffer => "texture_1d<f32>",
        TextureKind::VolumeArray => "texture_3d<f32>",
        TextureKind::TextureArray => "texture_2d_array<f32>",
    }
    .to_string()
}
