use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;

/// GDSII (layer number, datatype) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerKey {
    pub layer: u16,
    pub datatype: u16,
}

impl LayerKey {
    pub const fn new(layer: u16, datatype: u16) -> Self {
        Self { layer, datatype }
    }
}

impl std::fmt::Display for LayerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.layer, self.datatype)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    pub key: LayerKey,
    pub name: String,
    pub zmin: f64,
    pub zmax: f64,
    pub color: [f32; 4],
}

impl LayerSpec {
    pub fn new(
        key: LayerKey,
        name: impl Into<String>,
        zmin: f64,
        zmax: f64,
        color: [f32; 4],
    ) -> Self {
        Self {
            key,
            name: name.into(),
            zmin,
            zmax,
            color,
        }
    }
}

/// Ordered layer stack. Table order decides material indices and the order
/// in which layer meshes are attached below an instance node.
#[derive(Debug, Clone, Default)]
pub struct LayerTable {
    layers: Vec<LayerSpec>,
    by_key: HashMap<LayerKey, usize>,
}

#[derive(Debug, Deserialize)]
struct LayerEntry {
    layer: u16,
    datatype: u16,
    name: String,
    zmin: f64,
    zmax: f64,
    color: [f32; 4],
}

impl LayerTable {
    pub fn new(layers: Vec<LayerSpec>) -> anyhow::Result<Self> {
        let mut by_key = HashMap::with_capacity(layers.len());

        for (index, layer) in layers.iter().enumerate() {
            if by_key.insert(layer.key, index).is_some() {
                bail!("Layer {} is configured more than once", layer.key);
            }

            if layers[..index].iter().any(|other| other.name == layer.name) {
                bail!("Layer name '{}' is configured more than once", layer.name);
            }

            if layer.zmax <= layer.zmin {
                log::warn!(
                    "Layer '{}' has zmax ({}) <= zmin ({})",
                    layer.name,
                    layer.zmax,
                    layer.zmin
                );
            }
        }

        Ok(Self { layers, by_key })
    }

    /// Loads a layer stack from a JSON array of layer entries.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let entries: Vec<LayerEntry> =
            serde_json::from_str(json).context("Invalid layer table JSON")?;

        let layers = entries
            .into_iter()
            .map(|entry| {
                LayerSpec::new(
                    LayerKey::new(entry.layer, entry.datatype),
                    entry.name,
                    entry.zmin,
                    entry.zmax,
                    entry.color,
                )
            })
            .collect();

        Self::new(layers)
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read layer table {}", path.display()))?;
        Self::from_json_str(&json)
            .with_context(|| format!("Failed to load layer table {}", path.display()))
    }

    /// The SkyWater 130nm stack.
    pub fn sky130() -> Self {
        let layers = [
            ((235, 4), "substrate", -2.0, 0.0, [0.2, 0.2, 0.2, 1.0]),
            ((64, 20), "nwell", -0.5, 0.01, [0.4, 0.4, 0.4, 1.0]),
            ((65, 20), "diff", -0.12, 0.02, [0.9, 0.9, 0.9, 1.0]),
            ((66, 20), "poly", 0.0, 0.18, [0.75, 0.35, 0.46, 1.0]),
            ((66, 44), "licon", 0.0, 0.936, [0.2, 0.2, 0.2, 1.0]),
            ((67, 20), "li1", 0.936, 1.136, [1.0, 0.81, 0.55, 1.0]),
            ((67, 44), "mcon", 1.011, 1.376, [0.2, 0.2, 0.2, 1.0]),
            ((68, 20), "met1", 1.376, 1.736, [0.16, 0.38, 0.83, 1.0]),
            ((68, 44), "via", 1.736, 2.0, [0.2, 0.2, 0.2, 1.0]),
            ((69, 20), "met2", 2.0, 2.36, [0.65, 0.75, 0.9, 1.0]),
            ((69, 44), "via2", 2.36, 2.786, [0.2, 0.2, 0.2, 1.0]),
            ((70, 20), "met3", 2.786, 3.631, [0.2, 0.62, 0.86, 1.0]),
            ((70, 44), "via3", 3.631, 4.0211, [0.2, 0.2, 0.2, 1.0]),
            ((71, 20), "met4", 4.0211, 4.8661, [0.15, 0.11, 0.38, 1.0]),
            ((71, 44), "via4", 4.8661, 5.371, [0.2, 0.2, 0.2, 1.0]),
            ((72, 20), "met5", 5.371, 6.6311, [0.4, 0.4, 0.4, 1.0]),
        ];

        let layers: Vec<LayerSpec> = layers
            .into_iter()
            .map(|((layer, datatype), name, zmin, zmax, color)| {
                LayerSpec::new(LayerKey::new(layer, datatype), name, zmin, zmax, color)
            })
            .collect();

        let by_key = layers
            .iter()
            .enumerate()
            .map(|(index, layer)| (layer.key, index))
            .collect();

        Self { layers, by_key }
    }

    pub fn get(&self, key: LayerKey) -> Option<&LayerSpec> {
        self.by_key.get(&key).map(|&index| &self.layers[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &LayerSpec> {
        self.layers.iter()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Knobs for one conversion run.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Distance every boundary vertex is pulled inwards before triangulation.
    pub inset: f64,
    /// Cell to use as scene root instead of the first top-level cell.
    pub top_cell: Option<String>,
    /// Build per-cell meshes on the rayon pool.
    pub parallel: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            inset: 1e-5,
            top_cell: None,
            parallel: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sky130_table_keeps_order_and_positions() {
        let table = LayerTable::sky130();

        assert_eq!(table.len(), 16);
        assert_eq!(table.iter().next().unwrap().name, "substrate");
        assert_eq!(table.iter().nth(7).unwrap().key, LayerKey::new(68, 20));
        assert_eq!(table.get(LayerKey::new(72, 20)).unwrap().name, "met5");
        assert!(table.get(LayerKey::new(1, 0)).is_none());
    }

    #[test]
    fn loads_layer_table_from_json() {
        let json = r#"[
            { "layer": 1, "datatype": 0, "name": "metal", "zmin": 0.0, "zmax": 1.0,
              "color": [1.0, 0.0, 0.0, 1.0] },
            { "layer": 2, "datatype": 0, "name": "via", "zmin": 1.0, "zmax": 1.5,
              "color": [0.5, 0.5, 0.5, 1.0] }
        ]"#;

        let table = LayerTable::from_json_str(json).unwrap();
        let names: Vec<_> = table.iter().map(|layer| layer.name.as_str()).collect();

        assert_eq!(names, ["metal", "via"]);
        assert_eq!(table.get(LayerKey::new(2, 0)).unwrap().zmax, 1.5);
    }

    #[test]
    fn rejects_duplicate_layer_keys() {
        let layers = vec![
            LayerSpec::new(LayerKey::new(1, 0), "a", 0.0, 1.0, [1.0; 4]),
            LayerSpec::new(LayerKey::new(1, 0), "b", 1.0, 2.0, [1.0; 4]),
        ];

        assert!(LayerTable::new(layers).is_err());
    }

    #[test]
    fn rejects_duplicate_layer_names() {
        let layers = vec![
            LayerSpec::new(LayerKey::new(1, 0), "a", 0.0, 1.0, [1.0; 4]),
            LayerSpec::new(LayerKey::new(2, 0), "a", 1.0, 2.0, [1.0; 4]),
        ];

        assert!(LayerTable::new(layers).is_err());
    }
}
