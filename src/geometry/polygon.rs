use glam::DVec2;
use itertools::Itertools;

/// Shoelace sum `Σ (x[i+1] - x[i]) * (y[i+1] + y[i])` over every edge,
/// including the closing one. Twice the negated signed area.
pub fn shoelace_sum(polygon: &[DVec2]) -> f64 {
    polygon
        .iter()
        .circular_tuple_windows()
        .map(|(a, b)| (b.x - a.x) * (b.y + a.y))
        .sum()
}

/// With y pointing up, a positive shoelace sum means clockwise.
pub fn is_clockwise(polygon: &[DVec2]) -> bool {
    shoelace_sum(polygon) > 0.0
}

/// Unit normal on the right-hand side of the edge `from -> to`, or zero for
/// a zero-length edge.
fn right_normal(from: DVec2, to: DVec2) -> DVec2 {
    let edge = to - from;
    DVec2::new(edge.y, -edge.x).normalize_or_zero()
}

/// Pulls every vertex inwards by at most `epsilon`.
///
/// Each vertex moves against the average of the unit normals of its two
/// incident edges, so adjacent polygons that share boundary points no longer
/// coincide exactly once triangulated.
pub fn inset_polygon(polygon: &[DVec2], epsilon: f64, clockwise: bool) -> Vec<DVec2> {
    let count = polygon.len();
    let orientation = if clockwise { -1.0 } else { 1.0 };

    (0..count)
        .map(|i| {
            let point = polygon[i];
            let previous = polygon[(i + count - 1) % count];
            let next = polygon[(i + 1) % count];

            let outgoing = right_normal(point, next);
            let incoming = right_normal(previous, point);
            let outward = (outgoing + incoming) * 0.5 * orientation;

            point - outward * epsilon
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_square() -> Vec<DVec2> {
        vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(1.0, 0.0),
            DVec2::new(1.0, 1.0),
            DVec2::new(0.0, 1.0),
        ]
    }

    fn notched() -> Vec<DVec2> {
        vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(4.0, 0.0),
            DVec2::new(4.0, 4.0),
            DVec2::new(2.0, 1.0),
            DVec2::new(0.0, 4.0),
        ]
    }

    #[test]
    fn counter_clockwise_square_is_not_clockwise() {
        assert_relative_eq!(shoelace_sum(&unit_square()), -2.0);
        assert!(!is_clockwise(&unit_square()));
    }

    #[test]
    fn reversing_flips_orientation() {
        for polygon in [unit_square(), notched()] {
            let mut reversed = polygon.clone();
            reversed.reverse();

            assert_ne!(is_clockwise(&polygon), is_clockwise(&reversed));
            assert_relative_eq!(shoelace_sum(&polygon), -shoelace_sum(&reversed));
        }
    }

    #[test]
    fn inset_moves_square_corners_inwards() {
        let inset = inset_polygon(&unit_square(), 0.1, false);

        assert_relative_eq!(inset[0].x, 0.05);
        assert_relative_eq!(inset[0].y, 0.05);
        assert_relative_eq!(inset[2].x, 0.95);
        assert_relative_eq!(inset[2].y, 0.95);
    }

    #[test]
    fn inset_is_orientation_independent() {
        let mut clockwise = unit_square();
        clockwise.reverse();

        let inset = inset_polygon(&clockwise, 0.1, is_clockwise(&clockwise));

        for point in inset {
            assert!(point.x > 0.0 && point.x < 1.0);
            assert!(point.y > 0.0 && point.y < 1.0);
        }
    }

    #[test]
    fn inset_distance_never_exceeds_epsilon() {
        let epsilon = 1e-5;

        for polygon in [unit_square(), notched()] {
            for clockwise_input in [false, true] {
                let mut polygon = polygon.clone();
                if clockwise_input {
                    polygon.reverse();
                }

                let inset = inset_polygon(&polygon, epsilon, is_clockwise(&polygon));
                for (original, moved) in polygon.iter().zip(&inset) {
                    let distance = original.distance(*moved);
                    assert!(distance >= 0.0 && distance <= epsilon * (1.0 + 1e-9));
                }
            }
        }
    }

    #[test]
    fn inset_tolerates_repeated_points() {
        let polygon = vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(1.0, 0.0),
            DVec2::new(1.0, 0.0),
            DVec2::new(0.0, 1.0),
        ];

        let inset = inset_polygon(&polygon, 1e-5, is_clockwise(&polygon));
        assert!(inset.iter().all(|point| point.is_finite()));
    }
}
