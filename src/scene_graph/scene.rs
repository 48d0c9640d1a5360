use glam::Mat4;
use id_arena::Arena;

use crate::math::bounds::AABB;
use crate::mesh::MeshRegistry;
use crate::scene_graph::node::{NodeId, SceneNode};

/// Node tree of the converted layout. Nodes live in an arena; the root is
/// always the first node.
pub struct Scene {
    pub nodes: Arena<SceneNode>,
    root_id: NodeId,
}

impl Scene {
    pub fn new(root_name: impl Into<String>) -> Self {
        let mut nodes = Arena::new();
        let root_id = nodes.alloc(SceneNode::new(root_name));

        Self { nodes, root_id }
    }

    pub fn root_id(&self) -> NodeId {
        self.root_id
    }

    pub fn root(&self) -> &SceneNode {
        &self.nodes[self.root_id]
    }

    pub fn add_node(&mut self, node: SceneNode) -> NodeId {
        self.nodes.alloc(node)
    }

    pub fn get_node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id)
    }

    #[cfg(test)]
    pub fn get_node_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, node)| node.name == name)
            .map(|(id, _)| id)
    }

    /// Appends `child_id` to the children of `parent_id`, detaching it from
    /// any previous parent first.
    pub fn attach_child(&mut self, parent_id: NodeId, child_id: NodeId) {
        if let Some(old_parent_id) = self.get_node(child_id).and_then(|child| child.parent_id) {
            if let Some(old_parent) = self.nodes.get_mut(old_parent_id) {
                old_parent.child_ids.retain(|&id| id != child_id);
            }
        }

        if let Some(child) = self.nodes.get_mut(child_id) {
            child.parent_id = Some(parent_id);
        }

        if let Some(parent) = self.nodes.get_mut(parent_id) {
            parent.child_ids.push(child_id);
        }
    }

    /// Composes the local transforms from the root down to `node_id`.
    pub fn world_matrix(&self, node_id: NodeId) -> Mat4 {
        match self.get_node(node_id) {
            Some(node) => {
                let parent_matrix = node
                    .parent_id
                    .map_or(Mat4::IDENTITY, |parent_id| self.world_matrix(parent_id));
                parent_matrix * node.transform.local_matrix()
            }
            None => Mat4::IDENTITY,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn mesh_node_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|(_, node)| node.mesh_id.is_some())
            .count()
    }

    /// World-space box around every mesh instance in the scene.
    pub fn world_bounds(&self, registry: &MeshRegistry) -> Option<AABB> {
        self.nodes
            .iter()
            .filter_map(|(id, node)| {
                let mesh = registry.get(node.mesh_id?)?;
                Some(mesh.bounds.transformed(&self.world_matrix(id)))
            })
            .reduce(|bounds, mesh_bounds| bounds.union(&mesh_bounds))
    }
}
