use glam::{Quat, Vec3};
use thiserror::Error;

use crate::config::LayerTable;
use crate::layout::{Cell, Layout, Reference, Rotation};
use crate::mesh::{mesh_node_name, MeshRegistry};
use crate::scene_graph::node::{NodeId, SceneNode};
use crate::scene_graph::scene::Scene;
use crate::scene_graph::transform::Transform;

/// Name given to instance nodes whose reference carries no name property.
pub const UNNAMED_INSTANCE: &str = "???";

#[derive(Debug, Error, PartialEq)]
pub enum AssemblyError {
    #[error("Cyclic cell reference: {}", cycle.join(" -> "))]
    CyclicReference { cycle: Vec<String> },

    #[error("Cell '{parent}' references undefined cell '{name}'")]
    UnknownCell { name: String, parent: String },

    #[error("Root cell '{0}' is not defined in the layout")]
    UnknownRoot(String),
}

/// Rotation about the layout normal for a reference angle in degrees.
/// Angles other than quarter turns come out as the identity.
pub fn reference_rotation(angle: Option<f64>) -> Quat {
    match angle.and_then(Rotation::from_degrees) {
        Some(Rotation::Deg90) => Quat::from_xyzw(0.0, 0.0, 0.7071068, 0.7071068),
        Some(Rotation::Deg180) => Quat::from_xyzw(0.0, 0.0, 1.0, 0.0),
        Some(Rotation::Deg270) => Quat::from_xyzw(0.0, 0.0, 0.7071068, -0.7071068),
        None => Quat::IDENTITY,
    }
}

/// Builds the instance tree below a root cell. Every reference gets its own
/// node subtree; layer meshes are shared through the registry.
pub struct SceneAssembler<'a> {
    layout: &'a Layout,
    layers: &'a LayerTable,
    registry: &'a MeshRegistry,
    scene: Scene,
    /// Cells currently being expanded, outermost first.
    in_progress: Vec<&'a str>,
}

impl<'a> SceneAssembler<'a> {
    pub fn new(
        layout: &'a Layout,
        layers: &'a LayerTable,
        registry: &'a MeshRegistry,
        root: &Cell,
    ) -> Self {
        Self {
            layout,
            layers,
            registry,
            scene: Scene::new(&root.name),
            in_progress: Vec::new(),
        }
    }

    pub fn assemble(mut self, root: &'a Cell) -> Result<Scene, AssemblyError> {
        log::debug!("Building scene graph from {}", root.name);

        let root_id = self.scene.root_id();
        self.visit(root, root_id, 1)?;
        self.attach_layer_meshes(&root.name, root_id);

        Ok(self.scene)
    }

    fn visit(
        &mut self,
        cell: &'a Cell,
        parent_id: NodeId,
        depth: usize,
    ) -> Result<(), AssemblyError> {
        self.in_progress.push(&cell.name);

        for reference in &cell.references {
            let target = self
                .layout
                .cell(&reference.target)
                .ok_or_else(|| AssemblyError::UnknownCell {
                    name: reference.target.clone(),
                    parent: cell.name.clone(),
                })?;

            let instance_id = self.add_instance_node(reference, depth);
            self.attach_layer_meshes(&target.name, instance_id);

            if !target.references.is_empty() {
                self.check_cycle(&target.name)?;
                self.visit(target, instance_id, depth + 1)?;
            }

            self.scene.attach_child(parent_id, instance_id);
        }

        self.in_progress.pop();
        Ok(())
    }

    fn check_cycle(&self, name: &str) -> Result<(), AssemblyError> {
        match self.in_progress.iter().position(|&cell| cell == name) {
            Some(start) => {
                let mut cycle: Vec<String> = self.in_progress[start..]
                    .iter()
                    .map(|cell| cell.to_string())
                    .collect();
                cycle.push(name.to_string());

                Err(AssemblyError::CyclicReference { cycle })
            }
            None => Ok(()),
        }
    }

    fn add_instance_node(&mut self, reference: &Reference, depth: usize) -> NodeId {
        let name = reference
            .display_name
            .clone()
            .unwrap_or_else(|| UNNAMED_INSTANCE.to_string());

        log::debug!("{}{} ({})", "  ".repeat(depth), name, reference.target);

        if let Some(angle) = reference.rotation {
            if Rotation::from_degrees(angle).is_none() && !Rotation::is_identity_angle(angle) {
                log::warn!(
                    "Instance {} of {}: rotation of {} degrees is not supported, ignoring it",
                    name,
                    reference.target,
                    angle
                );
            }
        }

        let magnification = reference.magnification as f32;
        let scale = if reference.mirror_y {
            Vec3::new(magnification, -magnification, magnification)
        } else {
            Vec3::splat(magnification)
        };

        let mut node = SceneNode::new(name);
        node.cell_type = Some(reference.target.clone());
        node.transform = Transform::new(
            Vec3::new(reference.origin.x as f32, reference.origin.y as f32, 0.0),
            reference_rotation(reference.rotation),
            scale,
        );

        self.scene.add_node(node)
    }

    /// Adds one mesh node per registered layer mesh of `cell_name`, in layer
    /// table order.
    fn attach_layer_meshes(&mut self, cell_name: &str, parent_id: NodeId) {
        for layer in self.layers.iter() {
            if let Some(mesh_id) = self.registry.lookup(cell_name, &layer.name) {
                let node = SceneNode::with_mesh(mesh_node_name(cell_name, &layer.name), mesh_id);
                let node_id = self.scene.add_node(node);
                self.scene.attach_child(parent_id, node_id);
            }
        }
    }
}

/// Assembles the scene below the cell named `root_name`.
pub fn assemble_scene(
    layout: &Layout,
    layers: &LayerTable,
    registry: &MeshRegistry,
    root_name: &str,
) -> Result<Scene, AssemblyError> {
    let root = layout
        .cell(root_name)
        .ok_or_else(|| AssemblyError::UnknownRoot(root_name.to_string()))?;

    SceneAssembler::new(layout, layers, registry, root).assemble(root)
}
