use id_arena::Id;

use crate::mesh::MeshId;
#[cfg(test)]
use crate::scene_graph::scene::Scene;
use crate::scene_graph::transform::Transform;

pub type NodeId = Id<SceneNode>;

#[derive(Debug, Clone, Default)]
pub struct SceneNode {
    pub name: String,
    pub transform: Transform,
    pub mesh_id: Option<MeshId>,
    /// Name of the instantiated cell, for instance nodes.
    pub cell_type: Option<String>,
    pub parent_id: Option<NodeId>,
    pub child_ids: Vec<NodeId>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_mesh(name: impl Into<String>, mesh_id: MeshId) -> Self {
        Self {
            mesh_id: Some(mesh_id),
            ..Self::new(name)
        }
    }

    #[cfg(test)]
    pub fn children<'a, 'b>(&'a self, scene: &'b Scene) -> impl Iterator<Item = &'b SceneNode> + 'b
    where
        'a: 'b,
    {
        self.child_ids
            .iter()
            .filter_map(move |id| scene.get_node(*id))
    }
}
