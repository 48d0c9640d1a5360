use std::collections::HashMap;

use id_arena::{Arena, Id};
use thiserror::Error;

use super::builder::LayerMesh;

pub type MeshId = Id<LayerMesh>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MeshKey {
    pub cell: String,
    pub layer: String,
}

impl MeshKey {
    pub fn new(cell: impl Into<String>, layer: impl Into<String>) -> Self {
        Self {
            cell: cell.into(),
            layer: layer.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("A mesh for cell '{cell}' on layer '{layer}' is already registered")]
    DuplicateMesh { cell: String, layer: String },
}

/// One shared mesh per (cell, layer). Meshes are allocated in registration
/// order, so a mesh id's index is its position in the output mesh table.
#[derive(Default)]
pub struct MeshRegistry {
    meshes: Arena<LayerMesh>,
    by_key: HashMap<MeshKey, MeshId>,
}

impl MeshRegistry {
    pub fn new() -> Self {
        Self {
            meshes: Arena::new(),
            by_key: HashMap::new(),
        }
    }

    pub fn register(&mut self, mesh: LayerMesh) -> Result<MeshId, RegistryError> {
        let key = MeshKey::new(mesh.cell.clone(), mesh.layer.clone());

        if self.by_key.contains_key(&key) {
            return Err(RegistryError::DuplicateMesh {
                cell: key.cell,
                layer: key.layer,
            });
        }

        let id = self.meshes.alloc(mesh);
        self.by_key.insert(key, id);

        Ok(id)
    }

    pub fn lookup(&self, cell: &str, layer: &str) -> Option<MeshId> {
        self.by_key.get(&MeshKey::new(cell, layer)).copied()
    }

    pub fn get(&self, id: MeshId) -> Option<&LayerMesh> {
        self.meshes.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (MeshId, &LayerMesh)> {
        self.meshes.iter()
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.len() == 0
    }
}
