//! Bind group layouts derived from the resource declarations of WGSL modules.

use std::collections::BTreeMap;

/// One `@group(g) @binding(b)` resource declared by a module.
#[derive(Debug, Clone)]
pub(super) struct LayoutEntry {
    pub group: u32,
    pub binding: u32,
    pub ty: wgpu::BindingType,
}

/// Every resource binding declared by `module`, used or not.
pub(super) fn declared_entries(module: &naga::Module) -> Vec<LayoutEntry> {
    let mut entries = Vec::new();
    for (_, var) in module.global_variables.iter() {
        let Some(binding) = &var.binding else {
            continue;
        };
        let ty = match (&module.types[var.ty].inner, var.space) {
            (_, naga::AddressSpace::Uniform) => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            (_, naga::AddressSpace::Storage { access }) => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage {
                    read_only: !access.contains(naga::StorageAccess::STORE),
                },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            (naga::TypeInner::Image { dim, arrayed, class }, _) => {
                let view_dimension = view_dimension(*dim, *arrayed);
                match class {
                    naga::ImageClass::Sampled { kind, multi } => wgpu::BindingType::Texture {
                        sample_type: match kind {
                            naga::ScalarKind::Sint => wgpu::TextureSampleType::Sint,
                            naga::ScalarKind::Uint => wgpu::TextureSampleType::Uint,
                            _ => wgpu::TextureSampleType::Float { filterable: true },
                        },
                        view_dimension,
                        multisampled: *multi,
                    },
                    naga::ImageClass::Depth { multi } => wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension,
                        multisampled: *multi,
                    },
                    naga::ImageClass::Storage { .. } => {
                        log::warn!(
                            "Storage texture at group {} binding {} is not supported",
                            binding.group,
                            binding.binding
                        );
                        continue;
                    }
                }
            }
            (naga::TypeInner::Sampler { comparison }, _) => {
                wgpu::BindingType::Sampler(if *comparison {
                    wgpu::SamplerBindingType::Comparison
                } else {
                    wgpu::SamplerBindingType::Filtering
                })
            }
            _ => continue,
        };
        entries.push(LayoutEntry {
            group: binding.group,
            binding: binding.binding,
            ty,
        });
    }
    entries
}

fn view_dimension(dim: naga::ImageDimension, arrayed: bool) -> wgpu::TextureViewDimension {
    match (dim, arrayed) {
        (naga::ImageDimension::D1, _) => wgpu::TextureViewDimension::D1,
        (naga::ImageDimension::D2, false) => wgpu::TextureViewDimension::D2,
        (naga::ImageDimension::D2, true) => wgpu::TextureViewDimension::D2Array,
        (naga::ImageDimension::D3, _) => wgpu::TextureViewDimension::D3,
        (naga::ImageDimension::Cube, false) => wgpu::TextureViewDimension::Cube,
        (naga::ImageDimension::Cube, true) => wgpu::TextureViewDimension::CubeArray,
    }
}

/// One layout per group up to the highest declared group. Groups without declarations get
/// an empty layout.
pub(super) fn bind_group_layouts(
    device: &wgpu::Device,
    label: Option<&str>,
    stages: &[&[LayoutEntry]],
) -> Vec<wgpu::BindGroupLayout> {
    let mut groups: BTreeMap<u32, BTreeMap<u32, wgpu::BindingType>> = BTreeMap::new();
    for entry in stages.iter().flat_map(|entries| entries.iter()) {
        groups
            .entry(entry.group)
            .or_default()
            .insert(entry.binding, entry.ty);
    }
    let count = groups.keys().next_back().map_or(0, |max| max + 1);

    (0..count)
        .map(|group| {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = groups
                .get(&group)
                .into_iter()
                .flatten()
                .map(|(binding, ty)| wgpu::BindGroupLayoutEntry {
                    binding: *binding,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: *ty,
                    count: None,
                })
                .collect();
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: label.map(|l| format!("{l}:group{group}")).as_deref(),
                entries: &entries,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_entries_cover_every_resource_kind() {
        let module = naga::front::wgsl::parse_str(
            r#"
            struct Block { value: vec4<f32> }
            @group(0) @binding(0) var<uniform> block: Block;
            @group(2) @binding(0) var color: texture_2d<f32>;
            @group(2) @binding(1) var shadow: texture_depth_2d;
            @group(2) @binding(6) var volume: texture_3d<f32>;
            @group(2) @binding(8) var linear: sampler;
            @fragment fn main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }
            "#,
        )
        .unwrap();
        let entries = declared_entries(&module);
        assert_eq!(entries.len(), 5);

        let find = |group: u32, binding: u32| {
            entries
                .iter()
                .find(|e| e.group == group && e.binding == binding)
                .map(|e| e.ty)
                .unwrap()
        };
        assert!(matches!(find(0, 0), wgpu::BindingType::Buffer { .. }));
        assert!(matches!(
            find(2, 1),
            wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Depth,
                ..
            }
        ));
        assert!(matches!(
            find(2, 6),
            wgpu::BindingType::Texture {
                view_dimension: wgpu::TextureViewDimension::D3,
                ..
            }
        ));
        assert!(matches!(
            find(2, 8),
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
        ));
    }
}
