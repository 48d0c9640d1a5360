use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::mem;
use std::path::{Path, PathBuf};

use anyhow::Context;
use gltf::json;
use gltf::json::validation::{Checked, USize64};
use serde_json::json;

use crate::config::LayerTable;
use crate::mesh::{LayerMesh, MeshRegistry};
use crate::scene_graph::{Scene, SceneNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON document with a `.bin` sidecar holding the buffer.
    Gltf,
    /// Single binary container.
    Glb,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Gltf => "gltf",
            OutputFormat::Glb => "glb",
        }
    }

    /// `foo.gds` becomes `foo.gds.gltf` or `foo.gds.glb`.
    pub fn default_output_path(self, input: &Path) -> PathBuf {
        let mut path = input.as_os_str().to_owned();
        path.push(".");
        path.push(self.extension());
        PathBuf::from(path)
    }
}

/// Serializable glTF document plus the contents of its single buffer.
pub struct GltfDocument {
    pub root: json::Root,
    pub blob: Vec<u8>,
}

impl GltfDocument {
    pub fn build(
        scene: &Scene,
        registry: &MeshRegistry,
        layers: &LayerTable,
    ) -> anyhow::Result<Self> {
        let mut root = json::Root::default();
        root.asset.generator = Some(format!("gds-extrude {}", env!("CARGO_PKG_VERSION")));

        for layer in layers.iter() {
            root.materials.push(json::Material {
                name: Some(layer.name.clone()),
                double_sided: false,
                pbr_metallic_roughness: json::material::PbrMetallicRoughness {
                    base_color_factor: json::material::PbrBaseColorFactor(layer.color),
                    metallic_factor: json::material::StrengthFactor(0.5),
                    roughness_factor: json::material::StrengthFactor(0.5),
                    ..Default::default()
                },
                ..Default::default()
            });
        }

        let mut blob = Vec::new();
        for (_, mesh) in registry.iter() {
            let primitive = push_mesh_buffers(&mut root, &mut blob, mesh);
            root.meshes.push(json::Mesh {
                extensions: Default::default(),
                extras: Default::default(),
                name: Some(mesh.name()),
                primitives: vec![primitive],
                weights: None,
            });
        }

        if !blob.is_empty() {
            root.buffers.push(json::Buffer {
                byte_length: USize64::from(blob.len()),
                extensions: Default::default(),
                extras: Default::default(),
                name: None,
                uri: None,
            });
        }

        // Arena order is allocation order, so node ids index the node table directly.
        for (_, node) in scene.nodes.iter() {
            root.nodes.push(node_json(node)?);
        }

        root.scenes.push(json::Scene {
            extensions: Default::default(),
            extras: Default::default(),
            name: Some(scene.root().name.clone()),
            nodes: vec![json::Index::new(scene.root_id().index() as u32)],
        });
        root.scene = Some(json::Index::new(0));

        Ok(Self { root, blob })
    }

    pub fn write(&self, path: &Path, format: OutputFormat) -> anyhow::Result<()> {
        match format {
            OutputFormat::Gltf => self.write_gltf(path),
            OutputFormat::Glb => self.write_glb(path),
        }
    }

    /// Writes the JSON document to `path` and the buffer next to it, with the
    /// extension replaced by `.bin`. A `path` that already ends in `.bin` is
    /// rejected, since the document would overwrite its own buffer.
    pub fn write_gltf(&self, path: &Path) -> anyhow::Result<()> {
        let bin_path = path.with_extension("bin");
        if bin_path == path {
            anyhow::bail!(
                "Output {} would be overwritten by its .bin buffer, use another extension",
                path.display()
            );
        }

        let mut root = self.root.clone();

        if !self.blob.is_empty() {
            let uri = bin_path
                .file_name()
                .and_then(|name| name.to_str())
                .with_context(|| format!("Invalid buffer path {}", bin_path.display()))?
                .to_string();

            std::fs::write(&bin_path, &self.blob)
                .with_context(|| format!("Failed to write {}", bin_path.display()))?;
            log::info!(
                "Wrote {} bytes of buffer data to {}",
                self.blob.len(),
                bin_path.display()
            );

            if let Some(buffer) = root.buffers.first_mut() {
                buffer.uri = Some(uri);
            }
        }

        let file =
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &root)?;
        writer.flush()?;

        log::info!("Wrote {}", path.display());
        Ok(())
    }

    pub fn write_glb(&self, path: &Path) -> anyhow::Result<()> {
        let bytes = self.to_glb_bytes()?;
        std::fs::write(path, &bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        log::info!("Wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    pub fn to_glb_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(&self.root)?;

        let chunk_header = 2 * mem::size_of::<u32>();
        let mut length = 12 + chunk_header + align_to_four(json.len());
        if !self.blob.is_empty() {
            length += chunk_header + align_to_four(self.blob.len());
        }

        let glb = gltf::binary::Glb {
            header: gltf::binary::Header {
                magic: *b"glTF",
                version: 2,
                length: length as u32,
            },
            json: Cow::Owned(json),
            bin: (!self.blob.is_empty()).then(|| Cow::Borrowed(self.blob.as_slice())),
        };

        let mut bytes = Vec::with_capacity(length);
        glb.to_writer(&mut bytes).context("Failed to encode GLB")?;
        Ok(bytes)
    }
}

fn align_to_four(length: usize) -> usize {
    (length + 3) & !3
}

/// Appends the index and position data of `mesh` to the blob and returns a
/// primitive pointing at the new accessors.
fn push_mesh_buffers(
    root: &mut json::Root,
    blob: &mut Vec<u8>,
    mesh: &LayerMesh,
) -> json::mesh::Primitive {
    let indices = (!mesh.triangles.is_empty()).then(|| {
        let bytes: &[u8] = bytemuck::cast_slice(&mesh.triangles);
        let view = push_view(root, blob, bytes, json::buffer::Target::ElementArrayBuffer);
        let (min, max) = mesh.index_range;

        push_accessor(
            root,
            view,
            mesh.index_count(),
            json::accessor::ComponentType::U32,
            json::accessor::Type::Scalar,
            json!([min]),
            json!([max]),
        )
    });

    let positions = {
        let bytes: &[u8] = bytemuck::cast_slice(&mesh.positions);
        let view = push_view(root, blob, bytes, json::buffer::Target::ArrayBuffer);
        let (min, max) = (mesh.bounds.min, mesh.bounds.max);

        push_accessor(
            root,
            view,
            mesh.positions.len(),
            json::accessor::ComponentType::F32,
            json::accessor::Type::Vec3,
            json!([min.x, min.y, min.z]),
            json!([max.x, max.y, max.z]),
        )
    };

    let mut attributes = BTreeMap::new();
    attributes.insert(Checked::Valid(json::mesh::Semantic::Positions), positions);

    json::mesh::Primitive {
        attributes,
        extensions: Default::default(),
        extras: Default::default(),
        indices,
        material: Some(json::Index::new(mesh.material as u32)),
        mode: Checked::Valid(json::mesh::Mode::Triangles),
        targets: None,
    }
}

fn push_view(
    root: &mut json::Root,
    blob: &mut Vec<u8>,
    bytes: &[u8],
    target: json::buffer::Target,
) -> json::Index<json::buffer::View> {
    let offset = blob.len();
    blob.extend_from_slice(bytes);

    root.buffer_views.push(json::buffer::View {
        buffer: json::Index::new(0),
        byte_length: USize64::from(bytes.len()),
        byte_offset: Some(USize64::from(offset)),
        byte_stride: None,
        extensions: Default::default(),
        extras: Default::default(),
        name: None,
        target: Some(Checked::Valid(target)),
    });

    json::Index::new(root.buffer_views.len() as u32 - 1)
}

fn push_accessor(
    root: &mut json::Root,
    view: json::Index<json::buffer::View>,
    count: usize,
    component_type: json::accessor::ComponentType,
    type_: json::accessor::Type,
    min: json::Value,
    max: json::Value,
) -> json::Index<json::Accessor> {
    root.accessors.push(json::Accessor {
        buffer_view: Some(view),
        byte_offset: None,
        count: USize64::from(count),
        component_type: Checked::Valid(json::accessor::GenericComponentType(component_type)),
        extensions: Default::default(),
        extras: Default::default(),
        type_: Checked::Valid(type_),
        min: Some(min),
        max: Some(max),
        name: None,
        normalized: false,
        sparse: None,
    });

    json::Index::new(root.accessors.len() as u32 - 1)
}

fn node_json(node: &SceneNode) -> anyhow::Result<json::Node> {
    let transform = &node.transform;

    let children = (!node.child_ids.is_empty()).then(|| {
        node.child_ids
            .iter()
            .map(|id| json::Index::new(id.index() as u32))
            .collect()
    });

    let extras = match &node.cell_type {
        Some(cell) => Some(serde_json::value::to_raw_value(&json!({ "type": cell }))?),
        None => None,
    };

    Ok(json::Node {
        camera: None,
        children,
        extensions: Default::default(),
        extras,
        matrix: None,
        mesh: node.mesh_id.map(|id| json::Index::new(id.index() as u32)),
        name: Some(node.name.clone()),
        rotation: transform
            .has_rotation()
            .then(|| json::scene::UnitQuaternion(transform.rotation().to_array())),
        scale: transform.has_scale().then(|| transform.scale().to_array()),
        translation: transform
            .has_translation()
            .then(|| transform.translation().to_array()),
        skin: None,
        weights: None,
    })
}

#[cfg(test)]
mod tests {
    use glam::DVec2;

    use super::*;
    use crate::config::{LayerKey, LayerSpec};
    use crate::geometry::Solidifier;
    use crate::layout::{Cell, Layout, Reference, Shape};
    use crate::mesh::build_cell_meshes;
    use crate::scene_graph::assemble_scene;

    fn layers() -> LayerTable {
        LayerTable::new(vec![
            LayerSpec::new(LayerKey::new(1, 0), "metal", 0.0, 1.0, [0.8, 0.2, 0.2, 1.0]),
            LayerSpec::new(LayerKey::new(2, 0), "via", 1.0, 2.0, [0.2, 0.2, 0.8, 1.0]),
        ])
        .unwrap()
    }

    fn document() -> GltfDocument {
        let mut child = Cell::new("child");
        child.shapes.push(Shape {
            layer: LayerKey::new(1, 0),
            polygon: vec![DVec2::ZERO, DVec2::X, DVec2::ONE, DVec2::Y],
        });

        let mut top = Cell::new("top");
        top.references.push(Reference {
            rotation: Some(90.0),
            display_name: Some("U1".to_string()),
            ..Reference::new("child", DVec2::new(4.0, 0.0))
        });
        top.references.push(Reference::new("child", DVec2::new(8.0, 0.0)));

        let mut layout = Layout::new("lib");
        layout.add_cell(child).unwrap();
        layout.add_cell(top).unwrap();

        let layers = layers();
        let solidifier = Solidifier::new(1e-5);
        let mut registry = MeshRegistry::new();
        for cell in layout.cells() {
            for mesh in build_cell_meshes(cell, &layers, &solidifier) {
                registry.register(mesh).unwrap();
            }
        }

        let scene = assemble_scene(&layout, &layers, &registry, "top").unwrap();
        GltfDocument::build(&scene, &registry, &layers).unwrap()
    }

    #[test]
    fn glb_reads_back_with_shared_mesh() {
        let bytes = document().to_glb_bytes().unwrap();
        let gltf = gltf::Gltf::from_slice(&bytes).unwrap();

        assert_eq!(gltf.meshes().count(), 1);
        assert_eq!(gltf.materials().count(), 2);
        assert_eq!(gltf.buffers().count(), 1);

        let scene = gltf.default_scene().unwrap();
        let root = scene.nodes().next().unwrap();
        assert_eq!(root.name(), Some("top"));

        let instances: Vec<_> = root.children().collect();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].name(), Some("U1"));
        assert_eq!(instances[1].name(), Some("???"));

        for instance in &instances {
            let mesh_node = instance.children().next().unwrap();
            assert_eq!(mesh_node.name(), Some("child_metal"));
            assert_eq!(mesh_node.mesh().unwrap().index(), 0);
        }

        let (translation, rotation, scale) = instances[0].transform().decomposed();
        assert_eq!(translation, [4.0, 0.0, 0.0]);
        assert_eq!(rotation, [0.0, 0.0, 0.7071068, 0.7071068]);
        assert_eq!(scale, [1.0, 1.0, 1.0]);

        let extras = instances[0].extras().as_ref().unwrap();
        let extras: serde_json::Value = serde_json::from_str(extras.get()).unwrap();
        assert_eq!(extras["type"], "child");
    }

    #[test]
    fn accessors_carry_bounds_and_index_range() {
        let document = document();
        let gltf = gltf::Gltf::from_slice(&document.to_glb_bytes().unwrap()).unwrap();
        let primitive = gltf.meshes().next().unwrap().primitives().next().unwrap();

        let indices = primitive.indices().unwrap();
        assert_eq!(indices.count(), 36);
        assert_eq!(indices.data_type(), gltf::accessor::DataType::U32);
        assert_eq!(indices.min().unwrap(), json!([0]));
        assert_eq!(indices.max().unwrap(), json!([7]));

        let positions = primitive.get(&gltf::Semantic::Positions).unwrap();
        assert_eq!(positions.count(), 8);
        assert_eq!(positions.dimensions(), gltf::accessor::Dimensions::Vec3);

        let max = positions.max().unwrap();
        assert_eq!(max[2], json!(1.0));

        assert_eq!(primitive.material().index(), Some(0));
        let material = gltf.materials().next().unwrap();
        assert_eq!(material.name(), Some("metal"));
        assert!(!material.double_sided());
        let pbr = material.pbr_metallic_roughness();
        assert_eq!(pbr.base_color_factor(), [0.8, 0.2, 0.2, 1.0]);
        assert_eq!(pbr.metallic_factor(), 0.5);
    }

    #[test]
    fn buffer_holds_indices_then_positions() {
        let document = document();

        assert_eq!(document.blob.len(), 36 * 4 + 8 * 12);

        let heights: Vec<f32> = document.blob[36 * 4..]
            .chunks_exact(12)
            .map(|position| bytemuck::pod_read_unaligned(&position[8..12]))
            .collect();
        assert_eq!(heights.len(), 8);
        assert!(heights.iter().all(|&z| z == 0.0 || z == 1.0));
    }

    #[test]
    fn gltf_and_sidecar_import() {
        let dir = std::env::temp_dir().join(format!("gds-extrude-writer-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("layout.gds.gltf");

        document().write(&path, OutputFormat::Gltf).unwrap();
        assert!(dir.join("layout.gds.bin").exists());

        let (gltf, buffers, _) = gltf::import(&path).unwrap();
        assert_eq!(buffers.len(), 1);

        let mesh = gltf.meshes().next().unwrap();
        let primitive = mesh.primitives().next().unwrap();
        let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));
        assert_eq!(reader.read_positions().unwrap().count(), 8);
        assert_eq!(reader.read_indices().unwrap().into_u32().count(), 36);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn output_named_like_its_buffer_is_rejected() {
        let dir = std::env::temp_dir().join(format!("gds-extrude-bin-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("layout.bin");

        let error = document().write(&path, OutputFormat::Gltf).unwrap_err();
        assert!(error.to_string().contains("layout.bin"));
        assert!(!path.exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn empty_scene_has_no_buffer() {
        let layout = {
            let mut layout = Layout::new("lib");
            layout.add_cell(Cell::new("top")).unwrap();
            layout
        };
        let registry = MeshRegistry::new();
        let scene = assemble_scene(&layout, &layers(), &registry, "top").unwrap();

        let document = GltfDocument::build(&scene, &registry, &layers()).unwrap();
        assert!(document.blob.is_empty());
        assert!(document.root.buffers.is_empty());

        let gltf = gltf::Gltf::from_slice(&document.to_glb_bytes().unwrap()).unwrap();
        assert_eq!(gltf.nodes().count(), 1);
        assert_eq!(gltf.meshes().count(), 0);
    }

    #[test]
    fn default_output_path_appends_extension() {
        let input = Path::new("chips/inverter.gds");

        assert_eq!(
            OutputFormat::Gltf.default_output_path(input),
            PathBuf::from("chips/inverter.gds.gltf")
        );
        assert_eq!(
            OutputFormat::Glb.default_output_path(input),
            PathBuf::from("chips/inverter.gds.glb")
        );
    }
}
