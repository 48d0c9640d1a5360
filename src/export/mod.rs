pub mod gltf_writer;

pub use gltf_writer::{GltfDocument, OutputFormat};
