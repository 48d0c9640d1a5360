use glam::Vec3;

use crate::config::{LayerSpec, LayerTable};
use crate::geometry::{Solid, Solidifier, Triangulator};
use crate::layout::Cell;
use crate::math::bounds::AABB;

/// All polygons of one cell on one layer, merged into a single mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerMesh {
    pub cell: String,
    pub layer: String,
    /// Index of the layer in the layer table, which is also its material.
    pub material: usize,
    pub positions: Vec<Vec3>,
    pub triangles: Vec<[u32; 3]>,
    pub bounds: AABB,
    /// Smallest and largest vertex index referenced by `triangles`.
    pub index_range: (u32, u32),
}

impl LayerMesh {
    pub fn name(&self) -> String {
        mesh_node_name(&self.cell, &self.layer)
    }

    pub fn index_count(&self) -> usize {
        self.triangles.len() * 3
    }
}

pub fn mesh_node_name(cell: &str, layer: &str) -> String {
    format!("{}_{}", cell, layer)
}

/// Accumulates solids into one position buffer and one index buffer.
pub struct LayerMeshBuilder {
    cell: String,
    layer: String,
    material: usize,
    positions: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
}

impl LayerMeshBuilder {
    pub fn new(cell: impl Into<String>, layer: impl Into<String>, material: usize) -> Self {
        Self {
            cell: cell.into(),
            layer: layer.into(),
            material,
            positions: Vec::new(),
            triangles: Vec::new(),
        }
    }

    pub fn push_solid(&mut self, solid: &Solid) {
        let vertex_offset = self.positions.len() as u32;

        self.positions.extend_from_slice(&solid.positions);
        self.triangles.extend(
            solid
                .triangles
                .iter()
                .map(|&triangle| triangle.map(|index| index + vertex_offset)),
        );
    }

    /// Freezes the buffers. Returns `None` when no solid contributed any
    /// positions.
    pub fn finish(self) -> Option<LayerMesh> {
        let bounds = AABB::from_points(self.positions.iter().copied())?;

        let flat = self.triangles.iter().flatten().copied();
        let index_range = flat
            .clone()
            .min()
            .zip(flat.max())
            .unwrap_or((0, 0));

        Some(LayerMesh {
            cell: self.cell,
            layer: self.layer,
            material: self.material,
            positions: self.positions,
            triangles: self.triangles,
            bounds,
            index_range,
        })
    }
}

/// Builds one mesh per configured layer the cell has shapes on, in layer
/// table order. Shapes on layers missing from the table are skipped.
pub fn build_cell_meshes<T: Triangulator>(
    cell: &Cell,
    layers: &LayerTable,
    solidifier: &Solidifier<T>,
) -> Vec<LayerMesh> {
    let unknown = cell
        .shapes
        .iter()
        .filter(|shape| layers.get(shape.layer).is_none())
        .count();

    if unknown > 0 {
        log::debug!(
            "Cell {}: skipping {} shapes on unconfigured layers",
            cell.name,
            unknown
        );
    }

    layers
        .iter()
        .enumerate()
        .filter_map(|(material, layer)| build_layer_mesh(cell, layer, material, solidifier))
        .collect()
}

fn build_layer_mesh<T: Triangulator>(
    cell: &Cell,
    layer: &LayerSpec,
    material: usize,
    solidifier: &Solidifier<T>,
) -> Option<LayerMesh> {
    let mut builder = LayerMeshBuilder::new(&cell.name, &layer.name, material);
    let mut polygon_count = 0;

    for polygon in cell.shapes_on(layer.key) {
        let solid = solidifier.solidify(polygon, layer.zmin, layer.zmax);
        if solid.is_empty() {
            log::debug!(
                "Cell {} layer {}: dropping polygon with {} points",
                cell.name,
                layer.name,
                polygon.len()
            );
            continue;
        }

        builder.push_solid(&solid);
        polygon_count += 1;
    }

    if polygon_count == 0 {
        return None;
    }

    let mesh = builder.finish();
    if let Some(mesh) = &mesh {
        log::debug!(
            "Cell {} layer {}: {} polygons, {} triangles",
            cell.name,
            layer.name,
            polygon_count,
            mesh.triangles.len()
        );
    }

    mesh
}
