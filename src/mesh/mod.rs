pub mod builder;
pub mod registry;

pub use builder::{build_cell_meshes, mesh_node_name, LayerMesh};
pub use registry::{MeshId, MeshRegistry};
