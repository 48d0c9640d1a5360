use glam::{DVec2, Vec3};
use itertools::Itertools;

use super::polygon::{inset_polygon, is_clockwise};
use super::triangulate::{EarcutTriangulator, Pslg, Triangulator};

/// Watertight triangle mesh of one extruded polygon.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Solid {
    pub positions: Vec<Vec3>,
    pub triangles: Vec<[u32; 3]>,
}

impl Solid {
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Extrudes simple polygons between two heights.
pub struct Solidifier<T = EarcutTriangulator> {
    triangulator: T,
    inset: f64,
}

impl Solidifier {
    pub fn new(inset: f64) -> Self {
        Self::with_triangulator(EarcutTriangulator, inset)
    }
}

impl<T: Triangulator> Solidifier<T> {
    pub fn with_triangulator(triangulator: T, inset: f64) -> Self {
        Self { triangulator, inset }
    }

    /// Builds the closed solid of `polygon` extruded from `zmin` to `zmax`.
    ///
    /// Positions are the triangulated ring at `zmax` followed by the same
    /// ring at `zmin`. Triangles are the top cap, the reversed bottom cap,
    /// then the two halves of every side quad. A polygon the triangulator
    /// cannot fill still gets its side walls.
    pub fn solidify(&self, polygon: &[DVec2], zmin: f64, zmax: f64) -> Solid {
        if polygon.len() < 3 {
            return Solid::default();
        }

        let clockwise = is_clockwise(polygon);
        let ring = inset_polygon(polygon, self.inset, clockwise);
        let ring_len = ring.len() as u32;

        let cap = self.triangulator.triangulate(&Pslg::closed_ring(ring));
        let layer_len = cap.vertices.len() as u32;

        let top = cap
            .vertices
            .iter()
            .map(|vertex| Vec3::new(vertex.x as f32, vertex.y as f32, zmax as f32));
        let bottom = cap
            .vertices
            .iter()
            .map(|vertex| Vec3::new(vertex.x as f32, vertex.y as f32, zmin as f32));
        let positions: Vec<Vec3> = top.chain(bottom).collect();

        let mut triangles = Vec::with_capacity(cap.triangles.len() * 2 + ring_len as usize * 2);
        triangles.extend_from_slice(&cap.triangles);
        triangles.extend(
            cap.triangles
                .iter()
                .map(|&[a, b, c]| [c + layer_len, b + layer_len, a + layer_len]),
        );

        // Walk the boundary so that side faces point away from the interior
        let walk: Vec<u32> = if clockwise {
            (0..ring_len).rev().collect()
        } else {
            (0..ring_len).collect()
        };

        let mut left = Vec::with_capacity(walk.len());
        for (&top_this, &top_next) in walk.iter().circular_tuple_windows() {
            let bottom_this = top_this + layer_len;
            let bottom_next = top_next + layer_len;

            triangles.push([bottom_this, bottom_next, top_next]);
            left.push([top_next, top_this, bottom_this]);
        }
        triangles.extend(left);

        Solid {
            positions,
            triangles,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::geometry::triangulate::Triangulation;

    /// Every directed edge appears exactly once and its reverse exactly once.
    pub fn is_closed_manifold(triangles: &[[u32; 3]]) -> bool {
        let mut edges: HashMap<(u32, u32), usize> = HashMap::new();

        for &[a, b, c] in triangles {
            for edge in [(a, b), (b, c), (c, a)] {
                *edges.entry(edge).or_default() += 1;
            }
        }

        edges
            .iter()
            .all(|(&(a, b), &count)| count == 1 && edges.get(&(b, a)) == Some(&1))
    }

    fn signed_volume(solid: &Solid) -> f32 {
        solid
            .triangles
            .iter()
            .map(|&[a, b, c]| {
                let pa = solid.positions[a as usize];
                let pb = solid.positions[b as usize];
                let pc = solid.positions[c as usize];
                pa.dot(pb.cross(pc)) / 6.0
            })
            .sum()
    }

    fn unit_square() -> Vec<DVec2> {
        vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(1.0, 0.0),
            DVec2::new(1.0, 1.0),
            DVec2::new(0.0, 1.0),
        ]
    }

    #[test]
    fn unit_square_becomes_a_closed_box() {
        let solid = Solidifier::new(1e-5).solidify(&unit_square(), 0.0, 1.0);

        assert_eq!(solid.positions.len(), 8);
        assert_eq!(solid.triangles.len(), 12);
        assert!(is_closed_manifold(&solid.triangles));
        assert!(solid.positions[..4].iter().all(|position| position.z == 1.0));
        assert!(solid.positions[4..].iter().all(|position| position.z == 0.0));
    }

    #[test]
    fn faces_point_outwards_for_both_orientations() {
        let mut clockwise = unit_square();
        clockwise.reverse();

        for polygon in [unit_square(), clockwise] {
            let solid = Solidifier::new(1e-5).solidify(&polygon, 0.0, 2.0);

            assert!(is_closed_manifold(&solid.triangles));
            // Outward winding gives a positive enclosed volume
            approx::assert_relative_eq!(signed_volume(&solid), 2.0, max_relative = 1e-3);
        }
    }

    #[test]
    fn convex_polygons_are_watertight() {
        let hexagon: Vec<DVec2> = (0..6)
            .map(|i| {
                let angle = i as f64 * std::f64::consts::TAU / 6.0;
                DVec2::new(angle.cos() * 3.0 + 10.0, angle.sin() * 3.0 - 4.0)
            })
            .collect();
        let triangle = vec![DVec2::ZERO, DVec2::new(5.0, 0.0), DVec2::new(0.0, 2.0)];

        for polygon in [hexagon, triangle] {
            let solid = Solidifier::new(1e-5).solidify(&polygon, -0.5, 0.25);
            let n = polygon.len();

            assert_eq!(solid.positions.len(), 2 * n);
            assert_eq!(solid.triangles.len(), 2 * (n - 2) + 2 * n);
            assert!(is_closed_manifold(&solid.triangles));
        }
    }

    #[test]
    fn concave_polygon_is_watertight() {
        let notched = vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(4.0, 0.0),
            DVec2::new(4.0, 4.0),
            DVec2::new(2.0, 1.0),
            DVec2::new(0.0, 4.0),
        ];
        let solid = Solidifier::new(1e-5).solidify(&notched, 0.0, 1.0);

        assert!(is_closed_manifold(&solid.triangles));
    }

    #[test]
    fn solidify_is_deterministic() {
        let solidifier = Solidifier::new(1e-5);

        assert_eq!(
            solidifier.solidify(&unit_square(), 0.0, 1.0),
            solidifier.solidify(&unit_square(), 0.0, 1.0)
        );
    }

    struct NoTriangles;

    impl Triangulator for NoTriangles {
        fn triangulate(&self, input: &Pslg) -> Triangulation {
            Triangulation::empty(input.vertices.clone())
        }
    }

    #[test]
    fn empty_triangulation_keeps_side_walls() {
        let solidifier = Solidifier::with_triangulator(NoTriangles, 1e-5);
        let solid = solidifier.solidify(&unit_square(), 0.0, 1.0);

        assert_eq!(solid.positions.len(), 8);
        assert_eq!(solid.triangles.len(), 8);
    }

    #[test]
    fn too_few_points_give_an_empty_solid() {
        let solid = Solidifier::new(1e-5).solidify(&[DVec2::ZERO, DVec2::X], 0.0, 1.0);
        assert!(solid.is_empty());
        assert!(solid.triangles.is_empty());
    }
}
