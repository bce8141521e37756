//! Reflection over a validated naga module: which resource globals each
//! requested entry point actually reads or writes, and where they are bound.

use crate::compiler::validation::EntryPointDecl;
use crate::schema::ShaderStage;

/// Kind of resource a program input expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    ConstantBuffer,
    StructuredBuffer,
    Texture,
    StorageTexture,
    Sampler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotIndex {
    pub group: u32,
    pub binding: u32,
}

/// One named input of a compiled variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundInput {
    pub name: String,
    pub kind: SlotKind,
    pub slot: SlotIndex,
    /// Stages whose entry point uses the input, in pipeline order.
    pub stages: Vec<ShaderStage>,
}

/// Inputs of one compiled variant, ordered by slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reflection {
    inputs: Vec<BoundInput>,
}

impl Reflection {
    pub fn new(mut inputs: Vec<BoundInput>) -> Self {
        inputs.sort_by_key(|input| input.slot);
        Self { inputs }
    }

    pub fn inputs(&self) -> &[BoundInput] {
        &self.inputs
    }

    pub fn input(&self, name: &str) -> Option<&BoundInput> {
        self.inputs.iter().find(|input| input.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|input| input.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

fn naga_stage(stage: ShaderStage) -> naga::ShaderStage {
    match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Pixel => naga::ShaderStage::Fragment,
        ShaderStage::Compute => naga::ShaderStage::Compute,
    }
}

fn slot_kind(module: &naga::Module, var: &naga::GlobalVariable) -> Option<SlotKind> {
    match var.space {
        naga::AddressSpace::Uniform => Some(SlotKind::ConstantBuffer),
        naga::AddressSpace::Storage { .. } => Some(SlotKind::StructuredBuffer),
        naga::AddressSpace::Handle => match module.types[var.ty].inner {
            naga::TypeInner::Image {
                class: naga::ImageClass::Storage { .. },
                ..
            } => Some(SlotKind::StorageTexture),
            naga::TypeInner::Image { .. } => Some(SlotKind::Texture),
            naga::TypeInner::Sampler { .. } => Some(SlotKind::Sampler),
            _ => None,
        },
        _ => None,
    }
}

/// Collect the bound inputs of `entry_points`. A missing entry point, or one
/// declared for a different stage, is reported as a diagnostic string.
pub fn reflect_module(
    module: &naga::Module,
    info: &naga::valid::ModuleInfo,
    entry_points: &[EntryPointDecl],
) -> Result<Reflection, String> {
    let mut inputs: Vec<BoundInput> = Vec::new();

    for decl in entry_points {
        let (index, entry) = module
            .entry_points
            .iter()
            .enumerate()
            .find(|(_, ep)| ep.name == decl.name)
            .ok_or_else(|| format!("entry point '{}' not found", decl.name))?;
        if entry.stage != naga_stage(decl.stage) {
            return Err(format!(
                "entry point '{}' is a {:?} entry point, expected {}",
                decl.name, entry.stage, decl.stage
            ));
        }

        let function_info = info.get_entry_point(index);
        for (handle, var) in module.global_variables.iter() {
            if function_info[handle].is_empty() {
                continue;
            }
            let (Some(binding), Some(kind)) = (&var.binding, slot_kind(module, var)) else {
                continue;
            };
            let name = var.name.clone().unwrap_or_default();
            match inputs.iter_mut().find(|input| input.name == name) {
                Some(input) => {
                    if !input.stages.contains(&decl.stage) {
                        input.stages.push(decl.stage);
                        input.stages.sort();
                    }
                }
                None => inputs.push(BoundInput {
                    name,
                    kind,
                    slot: SlotIndex {
                        group: binding.group,
                        binding: binding.binding,
                    },
                    stages: vec![decl.stage],
                }),
            }
        }
    }

    Ok(Reflection::new(inputs))
}
