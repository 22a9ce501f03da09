//! Resource slots and uniform block layouts reflected from WGSL modules.

use std::collections::BTreeSet;

use naga::valid::ModuleInfo;
use naga::{AddressSpace, Binding, ImageClass, TypeInner};

use crate::backend::ShaderStage;

/// A member of a reflected uniform block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformMemberLayout {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

/// A uniform block declared by a shader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBlockLayout {
    /// Variable name, used to match renderer blocks by name
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub size: u32,
    pub members: Vec<UniformMemberLayout>,
}

impl UniformBlockLayout {
    pub fn member(&self, name: &str) -> Option<&UniformMemberLayout> {
        self.members.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Texture { depth: bool },
    Sampler { comparison: bool },
}

/// A texture or sampler binding declared by a shader.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceSlot {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub kind: SlotKind,
}

/// Everything the renderer needs to know about a shader's interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderReflection {
    pub uniform_blocks: Vec<UniformBlockLayout>,
    pub textures: Vec<ResourceSlot>,
    pub samplers: Vec<ResourceSlot>,
    /// Vertex input locations consumed by the vertex entry point
    pub vertex_inputs: BTreeSet<u32>,
    /// Color output locations written by the fragment entry point
    pub fragment_outputs: BTreeSet<u32>,
}

impl ShaderReflection {
    /// Reflect the entry point of `stage` in a validated `module`.
    ///
    /// Only globals the entry point actually uses are reported, which is what
    /// derived pipeline layouts contain.
    pub fn from_module(module: &naga::Module, info: &ModuleInfo, stage: ShaderStage) -> Self {
        let mut reflection = Self::default();
        let gctx = module.to_ctx();
        let naga_stage = match stage {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
            ShaderStage::Compute => naga::ShaderStage::Compute,
        };
        let Some(entry_index) = module
            .entry_points
            .iter()
            .position(|ep| ep.stage == naga_stage)
        else {
            return reflection;
        };
        let entry = &module.entry_points[entry_index];
        let usage = info.get_entry_point(entry_index);

        for (handle, variable) in module.global_variables.iter() {
            let (Some(name), Some(binding)) = (&variable.name, &variable.binding) else {
                continue;
            };
            if usage[handle].is_empty() {
                continue;
            }
            let inner = &module.types[variable.ty].inner;

            match (variable.space, inner) {
                (AddressSpace::Uniform, _) => {
                    let members = match inner {
                        TypeInner::Struct { members, .. } => members
                            .iter()
                            .map(|m| UniformMemberLayout {
                                name: m.name.clone().unwrap_or_default(),
                                offset: m.offset,
                                size: module.types[m.ty].inner.size(gctx),
                            })
                            .collect(),
                        _ => vec![UniformMemberLayout {
                            name: name.clone(),
                            offset: 0,
                            size: inner.size(gctx),
                        }],
                    };
                    reflection.uniform_blocks.push(UniformBlockLayout {
                        name: name.clone(),
                        group: binding.group,
                        binding: binding.binding,
                        size: inner.size(gctx),
                        members,
                    });
                }
                (AddressSpace::Handle, TypeInner::Image { class, .. }) => {
                    reflection.textures.push(ResourceSlot {
                        name: name.clone(),
                        group: binding.group,
                        binding: binding.binding,
                        kind: SlotKind::Texture {
                            depth: matches!(class, ImageClass::Depth { .. }),
                        },
                    });
                }
                (AddressSpace::Handle, TypeInner::Sampler { comparison }) => {
                    reflection.samplers.push(ResourceSlot {
                        name: name.clone(),
                        group: binding.group,
                        binding: binding.binding,
                        kind: SlotKind::Sampler {
                            comparison: *comparison,
                        },
                    });
                }
                _ => {}
            }
        }

        if stage == ShaderStage::Vertex {
            for argument in &entry.function.arguments {
                match (&argument.binding, &module.types[argument.ty].inner) {
                    (Some(Binding::Location { location, .. }), _) => {
                        reflection.vertex_inputs.insert(*location);
                    }
                    (None, TypeInner::Struct { members, .. }) => {
                        for member in members {
                            if let Some(Binding::Location { location, .. }) = member.binding {
                                reflection.vertex_inputs.insert(location);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        if stage == ShaderStage::Fragment {
            if let Some(result) = &entry.function.result {
                match (&result.binding, &module.types[result.ty].inner) {
                    (Some(Binding::Location { location, .. }), _) => {
                        reflection.fragment_outputs.insert(*location);
                    }
                    (None, TypeInner::Struct { members, .. }) => {
                        for member in members {
                            if let Some(Binding::Location { location, .. }) = member.binding {
                                reflection.fragment_outputs.insert(location);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        reflection
    }

    /// Combine the interfaces of several stages. Slots declared by more than one stage are kept
    /// once.
    pub fn merge(&mut self, other: &ShaderReflection) {
        for block in &other.uniform_blocks {
            if !self
                .uniform_blocks
                .iter()
                .any(|b| b.group == block.group && b.binding == block.binding)
            {
                self.uniform_blocks.push(block.clone());
            }
        }
        for (mine, theirs) in [
            (&mut self.textures, &other.textures),
            (&mut self.samplers, &other.samplers),
        ] {
            for slot in theirs {
                if !mine
                    .iter()
                    .any(|s| s.group == slot.group && s.binding == slot.binding)
                {
                    mine.push(slot.clone());
                }
            }
        }
        self.vertex_inputs.extend(other.vertex_inputs.iter().copied());
        self.fragment_outputs
            .extend(other.fragment_outputs.iter().copied());
    }

    pub fn block(&self, name: &str) -> Option<&UniformBlockLayout> {
        self.uniform_blocks.iter().find(|b| b.name == name)
    }

    pub fn has_block(&self, name: &str) -> bool {
        self.block(name).is_some()
    }

    pub fn texture(&self, name: &str) -> Option<&ResourceSlot> {
        self.textures.iter().find(|t| t.name == name)
    }

    /// Highest consumed vertex input location, if any.
    pub fn max_vertex_location(&self) -> Option<u32> {
        self.vertex_inputs.iter().next_back().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
        struct MatricesBlock {
            ModelMatrix: mat4x4<f32>,
            NormalMatrix: mat4x4<f32>,
            isBillboard: i32,
        }

        struct ShaderPropertiesBlock {
            Tint: vec3<f32>,
            Strength: f32,
        }

        @group(0) @binding(0) var<uniform> Matrices: MatricesBlock;
        @group(0) @binding(2) var<uniform> ShaderProperties: ShaderPropertiesBlock;
        @group(2) @binding(1) var ObjectTextures1: texture_2d<f32>;
        @group(2) @binding(7) var ObjectSampler: sampler;

        struct VertexInput {
            @location(0) position: vec3<f32>,
            @location(2) uv: vec2<f32>,
        }

        @vertex
        fn main(input: VertexInput) -> @builtin(position) vec4<f32> {
            let c = textureSampleLevel(ObjectTextures1, ObjectSampler, input.uv, 0.0);
            return Matrices.ModelMatrix * vec4<f32>(input.position * ShaderProperties.Tint * ShaderProperties.Strength, 1.0) + c * 0.0;
        }
    "#;

    fn reflect(source: &str, stage: ShaderStage) -> ShaderReflection {
        let module = naga::front::wgsl::parse_str(source).unwrap();
        let info = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .unwrap();
        ShaderReflection::from_module(&module, &info, stage)
    }

    #[test]
    fn test_reflects_blocks_slots_and_inputs() {
        let reflection = reflect(SOURCE, ShaderStage::Vertex);

        let matrices = reflection.block("Matrices").unwrap();
        assert_eq!((matrices.group, matrices.binding), (0, 0));
        assert_eq!(matrices.member("NormalMatrix").unwrap().offset, 64);
        assert_eq!(matrices.member("isBillboard").unwrap().offset, 128);

        let properties = reflection.block("ShaderProperties").unwrap();
        let names: Vec<_> = properties.members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["Tint", "Strength"]);
        assert_eq!(properties.member("Strength").unwrap().offset, 12);

        assert_eq!(reflection.texture("ObjectTextures1").unwrap().binding, 1);
        assert_eq!(reflection.samplers.len(), 1);
        assert_eq!(reflection.vertex_inputs.iter().copied().collect::<Vec<_>>(), [0, 2]);
        assert_eq!(reflection.max_vertex_location(), Some(2));
    }

    #[test]
    fn test_merge_deduplicates_slots() {
        let mut a = reflect(SOURCE, ShaderStage::Vertex);
        let b = a.clone();
        a.merge(&b);
        assert_eq!(a.uniform_blocks.len(), 2);
        assert_eq!(a.textures.len(), 1);
        assert_eq!(a.samplers.len(), 1);
    }

    #[test]
    fn test_reflects_fragment_outputs() {
        let source = r#"
            struct GBuffer {
                @location(0) normals: vec4<f32>,
                @location(1) albedo: vec4<f32>,
            }

            @fragment
            fn main() -> GBuffer {
                var out: GBuffer;
                out.normals = vec4<f32>(0.0);
                out.albedo = vec4<f32>(1.0);
                return out;
            }
        "#;
        let reflection = reflect(source, ShaderStage::Fragment);
        assert_eq!(reflection.fragment_outputs.iter().copied().collect::<Vec<_>>(), [0, 1]);
        assert!(reflection.vertex_inputs.is_empty());
    }

    #[test]
    fn test_unused_globals_are_not_reported() {
        let source = r#"
            struct ParamsBlock {
                Exposure: f32,
            }

            @group(1) @binding(2) var<uniform> ShaderParameters: ParamsBlock;
            @group(2) @binding(0) var Unused: texture_2d<f32>;

            @fragment
            fn main() -> @location(0) vec4<f32> {
                return vec4<f32>(ShaderParameters.Exposure);
            }
        "#;
        let reflection = reflect(source, ShaderStage::Fragment);
        assert!(reflection.has_block("ShaderParameters"));
        assert!(reflection.textures.is_empty());
    }
}
