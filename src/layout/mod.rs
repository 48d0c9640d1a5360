pub mod gds;
pub mod path;

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Context};
use glam::DVec2;

use crate::config::LayerKey;

pub use gds::read_gds;

/// Implicitly closed ring of points; the last point connects to the first.
pub type Polygon2D = Vec<DVec2>;

/// Cell written by KLayout to carry tool metadata, never geometry.
pub const CONTEXT_INFO_CELL: &str = "$$$CONTEXT_INFO$$$";

#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub layer: LayerKey,
    pub polygon: Polygon2D,
}

/// Quarter-turn rotations that map to a fixed quaternion about the layout normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Returns `None` for zero and for any angle that is not a multiple of 90°.
    pub fn from_degrees(angle: f64) -> Option<Rotation> {
        let angle = angle.rem_euclid(360.0);

        if (angle - 90.0).abs() < 1e-9 {
            Some(Rotation::Deg90)
        } else if (angle - 180.0).abs() < 1e-9 {
            Some(Rotation::Deg180)
        } else if (angle - 270.0).abs() < 1e-9 {
            Some(Rotation::Deg270)
        } else {
            None
        }
    }

    pub fn is_identity_angle(angle: f64) -> bool {
        let angle = angle.rem_euclid(360.0);
        angle < 1e-9 || (360.0 - angle) < 1e-9
    }
}

/// A placed instance of another cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    /// Name of the referenced cell. The cell itself is owned by the [`Layout`].
    pub target: String,
    pub origin: DVec2,
    /// Counter-clockwise rotation in degrees, as stored in the layout.
    pub rotation: Option<f64>,
    /// Reflection about the x axis, applied before rotation.
    pub mirror_y: bool,
    pub magnification: f64,
    pub display_name: Option<String>,
}

impl Reference {
    pub fn new(target: impl Into<String>, origin: DVec2) -> Self {
        Self {
            target: target.into(),
            origin,
            rotation: None,
            mirror_y: false,
            magnification: 1.0,
            display_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub name: String,
    pub shapes: Vec<Shape>,
    pub references: Vec<Reference>,
}

impl Cell {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shapes: Vec::new(),
            references: Vec::new(),
        }
    }

    pub fn shapes_on(&self, layer: LayerKey) -> impl Iterator<Item = &Polygon2D> {
        self.shapes
            .iter()
            .filter(move |shape| shape.layer == layer)
            .map(|shape| &shape.polygon)
    }
}

/// All cells of one layout, in file order.
#[derive(Debug, Clone)]
pub struct Layout {
    pub name: String,
    cells: Vec<Cell>,
    by_name: HashMap<String, usize>,
}

impl Layout {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn add_cell(&mut self, cell: Cell) -> anyhow::Result<()> {
        if self.by_name.contains_key(&cell.name) {
            bail!("Cell '{}' is defined more than once", cell.name);
        }

        self.by_name.insert(cell.name.clone(), self.cells.len());
        self.cells.push(cell);

        Ok(())
    }

    pub fn cell(&self, name: &str) -> Option<&Cell> {
        self.by_name.get(name).map(|&index| &self.cells[index])
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter()
    }

    pub fn cell_slice(&self) -> &[Cell] {
        &self.cells
    }

    /// Cells that no other cell references, in file order.
    pub fn top_level_cells(&self) -> impl Iterator<Item = &Cell> {
        let referenced: HashSet<&str> = self
            .cells
            .iter()
            .flat_map(|cell| cell.references.iter())
            .map(|reference| reference.target.as_str())
            .collect();

        self.cells.iter().filter(move |cell| {
            cell.name != CONTEXT_INFO_CELL && !referenced.contains(cell.name.as_str())
        })
    }

    /// The cell the scene is built from: the named cell if given, otherwise
    /// the first top-level cell.
    pub fn root_cell(&self, name: Option<&str>) -> anyhow::Result<&Cell> {
        match name {
            Some(name) => self
                .cell(name)
                .with_context(|| format!("Top cell '{}' not found in layout", name)),
            None => self
                .top_level_cells()
                .next()
                .context("Layout has no top-level cell"),
        }
    }
}
