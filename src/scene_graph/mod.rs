pub mod assembler;
pub mod node;
pub mod scene;
pub mod transform;

pub use assembler::assemble_scene;
pub use node::SceneNode;
pub use scene::Scene;
