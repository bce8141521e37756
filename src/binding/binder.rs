//! Per-draw binding of live resources to the inputs a compiled variant
//! reflects. Names are the only join key; nothing is cached between draws.

use crate::binding::device::{DeviceContext, ResourceHandle};
use crate::binding::resources::ResourceRegistry;
use crate::compiler::permutation::CompiledVariant;
use crate::compiler::reflection::SlotIndex;
use crate::error::ReflectionMismatchError;
use crate::schema::ShaderStage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundResource {
    pub name: String,
    pub stage: ShaderStage,
    pub slot: SlotIndex,
    pub handle: ResourceHandle,
}

/// Bind calls issued for one draw or dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindReport {
    pub program: String,
    pub permutation: u32,
    pub bindings: Vec<BoundResource>,
}

/// Bind every input of `variant`. All inputs are resolved before the first
/// bind call, so a mismatch leaves `ctx` untouched.
pub fn bind_for_draw<X: DeviceContext + ?Sized>(
    variant: &CompiledVariant,
    resources: &ResourceRegistry,
    ctx: &mut X,
) -> Result<BindReport, ReflectionMismatchError> {
    let mut bindings = Vec::new();
    for input in variant.reflection.inputs() {
        let entry = resources
            .get(&input.name)
            .ok_or_else(|| ReflectionMismatchError::MissingResource {
                name: input.name.clone(),
                program: variant.program.to_string(),
                permutation: variant.permutation,
            })?;
        if !entry.kind.satisfies(input.kind) {
            return Err(ReflectionMismatchError::KindMismatch {
                name: input.name.clone(),
                program: variant.program.to_string(),
                permutation: variant.permutation,
                expected: input.kind,
                actual: entry.kind,
            });
        }
        for &stage in &input.stages {
            bindings.push(BoundResource {
                name: input.name.clone(),
                stage,
                slot: input.slot,
                handle: entry.handle,
            });
        }
    }

    for binding in &bindings {
        ctx.bind_resource(binding.stage, binding.slot, binding.handle);
    }

    Ok(BindReport {
        program: variant.program.to_string(),
        permutation: variant.permutation,
        bindings,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::binding::headless::HeadlessContext;
    use crate::binding::resources::ResourceKind;
    use crate::compiler::permutation::BranchSymbols;
    use crate::compiler::reflection::{BoundInput, Reflection, SlotKind};

    fn variant(inputs: Vec<BoundInput>) -> CompiledVariant {
        CompiledVariant {
            program: Arc::from("Draw"),
            permutation: 3,
            symbols: BranchSymbols::new(vec!["A".into(), "B".into()], 3),
            bytecode: Arc::from(""),
            reflection: Arc::new(Reflection::new(inputs)),
        }
    }

    fn input(name: &str, kind: SlotKind, binding: u32, stages: &[ShaderStage]) -> BoundInput {
        BoundInput {
            name: name.to_string(),
            kind,
            slot: SlotIndex { group: 0, binding },
            stages: stages.to_vec(),
        }
    }

    #[test]
    fn one_bind_per_input_and_stage() {
        let variant = variant(vec![
            input("Globals", SlotKind::ConstantBuffer, 0, &[ShaderStage::Vertex, ShaderStage::Pixel]),
            input("Albedo", SlotKind::Texture, 1, &[ShaderStage::Pixel]),
        ]);
        let mut resources = ResourceRegistry::new();
        resources.insert("Globals", ResourceKind::ConstantBuffer, ResourceHandle(10));
        resources.insert("Albedo", ResourceKind::Texture, ResourceHandle(11));
        resources.insert("Unused", ResourceKind::Sampler, ResourceHandle(12));

        let mut ctx = HeadlessContext::new();
        let report = bind_for_draw(&variant, &resources, &mut ctx).unwrap();
        assert_eq!(report.bindings.len(), 3);
        let handles: Vec<_> = ctx.calls().iter().map(|c| (c.stage, c.handle.0)).collect();
        assert_eq!(
            handles,
            vec![(ShaderStage::Vertex, 10), (ShaderStage::Pixel, 10), (ShaderStage::Pixel, 11)]
        );
    }

    #[test]
    fn kind_mismatch_binds_nothing() {
        let variant = variant(vec![
            input("Globals", SlotKind::ConstantBuffer, 0, &[ShaderStage::Compute]),
            input("Albedo", SlotKind::Texture, 1, &[ShaderStage::Compute]),
        ]);
        let mut resources = ResourceRegistry::new();
        resources.insert("Globals", ResourceKind::ConstantBuffer, ResourceHandle(1));
        resources.insert("Albedo", ResourceKind::Sampler, ResourceHandle(2));

        let mut ctx = HeadlessContext::new();
        let err = bind_for_draw(&variant, &resources, &mut ctx).unwrap_err();
        assert_eq!(
            err,
            ReflectionMismatchError::KindMismatch {
                name: "Albedo".to_string(),
                program: "Draw".to_string(),
                permutation: 3,
                expected: SlotKind::Texture,
                actual: ResourceKind::Sampler,
            }
        );
        assert!(ctx.calls().is_empty());
    }
}
