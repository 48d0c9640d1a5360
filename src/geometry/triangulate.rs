use glam::DVec2;

/// Planar straight-line graph: points plus edges the triangulation must keep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pslg {
    pub vertices: Vec<DVec2>,
    pub segments: Vec<[u32; 2]>,
}

impl Pslg {
    /// The boundary of a simple polygon: every edge `i -> i + 1`, wrapping
    /// around to the first vertex.
    pub fn closed_ring(vertices: Vec<DVec2>) -> Self {
        let count = vertices.len() as u32;
        let segments = (0..count).map(|i| [i, (i + 1) % count]).collect();

        Self { vertices, segments }
    }

    /// True when the segments are exactly the ring through the vertices in
    /// order, in either direction.
    pub fn is_closed_ring(&self) -> bool {
        let count = self.vertices.len() as u32;
        if count < 3 || self.segments.len() != count as usize {
            return false;
        }

        self.segments.iter().enumerate().all(|(i, &[a, b])| {
            let i = i as u32;
            let next = (i + 1) % count;
            (a == i && b == next) || (a == next && b == i)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Triangulation {
    /// Input vertices in input order, possibly followed by interior points.
    pub vertices: Vec<DVec2>,
    /// Counter-clockwise triangles (y up).
    pub triangles: Vec<[u32; 3]>,
}

impl Triangulation {
    pub fn empty(vertices: Vec<DVec2>) -> Self {
        Self {
            vertices,
            triangles: Vec::new(),
        }
    }
}

/// Constrained triangulation of a simple polygon.
///
/// Implementations keep the input vertices at the front of the output in
/// their original order, never place Steiner points on the segments, and
/// return an empty triangle list for degenerate input instead of failing.
pub trait Triangulator: Sync {
    fn triangulate(&self, input: &Pslg) -> Triangulation;
}

/// Ear-clipping triangulator. Only accepts graphs describing a single closed
/// ring, which ear clipping honours by construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct EarcutTriangulator;

impl Triangulator for EarcutTriangulator {
    fn triangulate(&self, input: &Pslg) -> Triangulation {
        if !input.is_closed_ring() {
            log::warn!(
                "Cannot triangulate {} vertices and {} segments that are not a single ring",
                input.vertices.len(),
                input.segments.len()
            );
            return Triangulation::empty(input.vertices.clone());
        }

        let coordinates: Vec<f64> = input
            .vertices
            .iter()
            .flat_map(|vertex| [vertex.x, vertex.y])
            .collect();

        let indices = match earcutr::earcut(&coordinates, &[], 2) {
            Ok(indices) => indices,
            Err(error) => {
                log::debug!("Ear clipping failed: {:?}", error);
                return Triangulation::empty(input.vertices.clone());
            }
        };

        let triangles = indices
            .chunks_exact(3)
            .map(|triangle| {
                counter_clockwise(
                    &input.vertices,
                    [triangle[0] as u32, triangle[1] as u32, triangle[2] as u32],
                )
            })
            .collect();

        Triangulation {
            vertices: input.vertices.clone(),
            triangles,
        }
    }
}

fn counter_clockwise(vertices: &[DVec2], [a, b, c]: [u32; 3]) -> [u32; 3] {
    let pa = vertices[a as usize];
    let pb = vertices[b as usize];
    let pc = vertices[c as usize];

    if (pb - pa).perp_dot(pc - pa) < 0.0 {
        [a, c, b]
    } else {
        [a, b, c]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(vertices: &[DVec2], [a, b, c]: [u32; 3]) -> f64 {
        let pa = vertices[a as usize];
        (vertices[b as usize] - pa).perp_dot(vertices[c as usize] - pa) * 0.5
    }

    #[test]
    fn closed_ring_segments_wrap_around() {
        let pslg = Pslg::closed_ring(vec![DVec2::ZERO, DVec2::X, DVec2::Y]);

        assert_eq!(pslg.segments, vec![[0, 1], [1, 2], [2, 0]]);
        assert!(pslg.is_closed_ring());
    }

    #[test]
    fn square_gives_two_counter_clockwise_triangles() {
        for vertices in [
            vec![DVec2::ZERO, DVec2::X, DVec2::ONE, DVec2::Y],
            vec![DVec2::ZERO, DVec2::Y, DVec2::ONE, DVec2::X],
        ] {
            let triangulation = EarcutTriangulator.triangulate(&Pslg::closed_ring(vertices));

            assert_eq!(triangulation.vertices.len(), 4);
            assert_eq!(triangulation.triangles.len(), 2);
            for triangle in &triangulation.triangles {
                assert!(area(&triangulation.vertices, *triangle) > 0.0);
            }
        }
    }

    #[test]
    fn concave_polygon_covers_its_area() {
        let vertices = vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(4.0, 0.0),
            DVec2::new(4.0, 4.0),
            DVec2::new(2.0, 1.0),
            DVec2::new(0.0, 4.0),
        ];
        let triangulation = EarcutTriangulator.triangulate(&Pslg::closed_ring(vertices));

        let total: f64 = triangulation
            .triangles
            .iter()
            .map(|triangle| area(&triangulation.vertices, *triangle))
            .sum();

        assert_eq!(triangulation.triangles.len(), 3);
        approx::assert_relative_eq!(total, 10.0);
    }

    #[test]
    fn collinear_input_yields_no_triangles() {
        let vertices = vec![DVec2::ZERO, DVec2::X, DVec2::new(2.0, 0.0)];
        let triangulation = EarcutTriangulator.triangulate(&Pslg::closed_ring(vertices));

        assert!(triangulation.triangles.is_empty());
        assert_eq!(triangulation.vertices.len(), 3);
    }

    #[test]
    fn non_ring_graph_is_left_untriangulated() {
        let pslg = Pslg {
            vertices: vec![DVec2::ZERO, DVec2::X, DVec2::Y],
            segments: vec![[0, 1]],
        };

        assert!(EarcutTriangulator.triangulate(&pslg).triangles.is_empty());
    }
}
