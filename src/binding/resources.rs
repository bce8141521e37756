use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::binding::device::{
    BufferDesc, DeviceError, ResourceDevice, ResourceHandle, SamplerDesc, TextureDesc,
};
use crate::compiler::layout::CompiledLayouts;
use crate::compiler::reflection::SlotKind;
use crate::error::ResourceCreationError;
use crate::schema::{BufferKind, SchemaRegistry};

/// What a registered resource is, as far as binding is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    ConstantBuffer,
    StructuredBuffer,
    Texture,
    StorageTexture,
    Sampler,
}

impl ResourceKind {
    pub fn satisfies(self, slot: SlotKind) -> bool {
        matches!(
            (self, slot),
            (ResourceKind::ConstantBuffer, SlotKind::ConstantBuffer)
                | (ResourceKind::StructuredBuffer, SlotKind::StructuredBuffer)
                | (ResourceKind::Texture, SlotKind::Texture)
                | (ResourceKind::StorageTexture, SlotKind::StorageTexture)
                | (ResourceKind::Sampler, SlotKind::Sampler)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceEntry {
    pub handle: ResourceHandle,
    pub kind: ResourceKind,
}

/// Live resources keyed by schema name. Created explicitly, torn down explicitly.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    entries: BTreeMap<String, ResourceEntry>,
    /// Creation order, destroyed in reverse.
    order: Vec<String>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create every buffer, texture and sampler the schema declares. On
    /// failure everything created so far is destroyed again.
    pub fn create<D: ResourceDevice + ?Sized>(
        schema: &SchemaRegistry,
        layouts: &CompiledLayouts,
        device: &mut D,
    ) -> Result<Self, ResourceCreationError> {
        let mut registry = Self::new();
        if let Err(e) = registry.create_all(schema, layouts, device) {
            if let Err(teardown) = registry.destroy(device) {
                warn!(error = %teardown, "teardown after failed resource creation");
            }
            return Err(e);
        }
        info!(resources = registry.len(), "schema resources created");
        Ok(registry)
    }

    fn create_all<D: ResourceDevice + ?Sized>(
        &mut self,
        schema: &SchemaRegistry,
        layouts: &CompiledLayouts,
        device: &mut D,
    ) -> Result<(), ResourceCreationError> {
        for buffer in schema.buffers() {
            let failed = |reason: String| ResourceCreationError {
                resource: buffer.name.clone(),
                kind: "buffer",
                reason,
            };
            let layout = layouts
                .buffer(&buffer.name)
                .ok_or_else(|| failed("no host layout compiled".to_string()))?;
            let desc = BufferDesc {
                label: buffer.name.clone(),
                kind: buffer.kind,
                size: layout.byte_size(),
                stride: layout.stride,
                cpu_writable: buffer.cpu_writable,
                gpu_writable: buffer.gpu_writable,
            };
            let handle = device
                .create_buffer(&desc)
                .map_err(|e| failed(e.to_string()))?;
            let kind = match buffer.kind {
                BufferKind::Constant => ResourceKind::ConstantBuffer,
                BufferKind::Structured => ResourceKind::StructuredBuffer,
            };
            debug!(name = %buffer.name, size = desc.size, "buffer created");
            self.insert(&buffer.name, kind, handle);
        }

        for texture in schema.textures() {
            let desc = TextureDesc {
                label: texture.name.clone(),
                kind: texture.kind,
                format: texture.format,
                width: texture.width,
                height: texture.height,
                layers: texture.layers(),
                storage: texture.storage,
            };
            let handle = device
                .create_texture(&desc)
                .map_err(|e| ResourceCreationError {
                    resource: texture.name.clone(),
                    kind: "texture",
                    reason: e.to_string(),
                })?;
            let kind = if texture.storage {
                ResourceKind::StorageTexture
            } else {
                ResourceKind::Texture
            };
            self.insert(&texture.name, kind, handle);
        }

        for sampler in schema.samplers() {
            let desc = SamplerDesc {
                label: sampler.name.clone(),
                filter: sampler.filter,
                address: sampler.address,
            };
            let handle = device
                .create_sampler(&desc)
                .map_err(|e| ResourceCreationError {
                    resource: sampler.name.clone(),
                    kind: "sampler",
                    reason: e.to_string(),
                })?;
            self.insert(&sampler.name, ResourceKind::Sampler, handle);
        }
        Ok(())
    }

    /// Register a resource under `name`, returning the entry it replaces.
    pub fn insert(
        &mut self,
        name: &str,
        kind: ResourceKind,
        handle: ResourceHandle,
    ) -> Option<ResourceEntry> {
        let previous = self
            .entries
            .insert(name.to_string(), ResourceEntry { handle, kind });
        if previous.is_none() {
            self.order.push(name.to_string());
        }
        previous
    }

    /// Forget `name` without destroying its device resource.
    pub fn remove(&mut self, name: &str) -> Option<ResourceEntry> {
        self.order.retain(|n| n != name);
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&ResourceEntry> {
        self.entries.get(name)
    }

    pub fn handle(&self, name: &str) -> Option<ResourceHandle> {
        self.entries.get(name).map(|e| e.handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Upload `data` to the start of buffer `name`.
    pub fn write<D: ResourceDevice + ?Sized>(
        &self,
        device: &mut D,
        name: &str,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let handle = self
            .handle(name)
            .ok_or_else(|| DeviceError::UnknownResource(name.to_string()))?;
        device.write_buffer(handle, 0, data)
    }

    pub fn read<D: ResourceDevice + ?Sized>(
        &self,
        device: &D,
        name: &str,
        len: u64,
    ) -> Result<Vec<u8>, DeviceError> {
        let handle = self
            .handle(name)
            .ok_or_else(|| DeviceError::UnknownResource(name.to_string()))?;
        device.read_buffer(handle, 0, len)
    }

    /// Destroy every registered resource in reverse creation order. All
    /// handles are attempted; the first failure is returned.
    pub fn destroy<D: ResourceDevice + ?Sized>(&mut self, device: &mut D) -> Result<(), DeviceError> {
        let mut first_error = None;
        for name in self.order.drain(..).rev() {
            if let Some(entry) = self.entries.remove(&name) {
                if let Err(e) = device.destroy(entry.handle) {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
