use rayon::prelude::*;

use crate::config::{ConvertOptions, LayerTable};
use crate::geometry::Solidifier;
use crate::layout::Layout;
use crate::mesh::{build_cell_meshes, LayerMesh, MeshRegistry};
use crate::scene_graph::{assemble_scene, Scene};

/// Result of converting one layout.
pub struct Conversion {
    pub scene: Scene,
    pub registry: MeshRegistry,
}

/// Builds the layer meshes of every cell and registers them in cell order,
/// so the mesh table is the same with and without `parallel`.
pub fn build_meshes(
    layout: &Layout,
    layers: &LayerTable,
    options: &ConvertOptions,
) -> anyhow::Result<MeshRegistry> {
    let solidifier = Solidifier::new(options.inset);

    let per_cell: Vec<Vec<LayerMesh>> = if options.parallel {
        layout
            .cell_slice()
            .par_iter()
            .map(|cell| build_cell_meshes(cell, layers, &solidifier))
            .collect()
    } else {
        layout
            .cells()
            .map(|cell| build_cell_meshes(cell, layers, &solidifier))
            .collect()
    };

    let mut registry = MeshRegistry::new();
    for mesh in per_cell.into_iter().flatten() {
        registry.register(mesh)?;
    }

    if registry.is_empty() {
        log::warn!("No shapes lie on a configured layer, the scene has no meshes");
    } else {
        log::info!(
            "Built {} layer meshes for {} cells",
            registry.len(),
            layout.cell_slice().len()
        );
    }

    Ok(registry)
}

pub fn convert(
    layout: &Layout,
    layers: &LayerTable,
    options: &ConvertOptions,
) -> anyhow::Result<Conversion> {
    let root = layout.root_cell(options.top_cell.as_deref())?;
    log::info!("Using {} as the top cell", root.name);

    let registry = build_meshes(layout, layers, options)?;
    let scene = assemble_scene(layout, layers, &registry, &root.name)?;

    log::info!(
        "Scene has {} nodes, {} of them mesh instances",
        scene.node_count(),
        scene.mesh_node_count()
    );

    if let Some(bounds) = scene.world_bounds(&registry) {
        log::info!(
            "Scene extent: {:?} to {:?}, size {:?}",
            bounds.min,
            bounds.max,
            bounds.size()
        );
    }

    Ok(Conversion { scene, registry })
}
