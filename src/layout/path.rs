use glam::DVec2;
use itertools::Itertools;

use super::Polygon2D;

/// How the ends of a path are finished, from the GDSII PATHTYPE record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathEnds {
    /// Pathtype 0: ends flush with the first/last point.
    Flush,
    /// Pathtype 1 and 2: ends extended by half the width. Round ends are
    /// approximated as square.
    HalfWidth,
    /// Pathtype 4: explicit begin/end extensions.
    Custom { begin: f64, end: f64 },
}

impl PathEnds {
    pub fn from_pathtype(pathtype: i16, begin: f64, end: f64) -> Self {
        match pathtype {
            1 | 2 => PathEnds::HalfWidth,
            4 => PathEnds::Custom { begin, end },
            _ => PathEnds::Flush,
        }
    }

    fn extensions(self, half_width: f64) -> (f64, f64) {
        match self {
            PathEnds::Flush => (0.0, 0.0),
            PathEnds::HalfWidth => (half_width, half_width),
            PathEnds::Custom { begin, end } => (begin, end),
        }
    }
}

fn left_normal(direction: DVec2) -> DVec2 {
    DVec2::new(-direction.y, direction.x)
}

/// Outlines a centreline path of the given width into a closed polygon.
///
/// The outline is the left-hand offset walked forwards followed by the
/// right-hand offset walked backwards, with mitre joins at interior points.
/// Returns `None` for paths without area.
pub fn path_outline(points: &[DVec2], width: f64, ends: PathEnds) -> Option<Polygon2D> {
    let half_width = width.abs() * 0.5;
    if half_width <= 0.0 {
        return None;
    }

    let mut centre: Vec<DVec2> = points.iter().copied().dedup().collect();
    if centre.len() < 2 {
        return None;
    }

    let directions: Vec<DVec2> = centre
        .iter()
        .tuple_windows()
        .map(|(a, b)| (*b - *a).normalize())
        .collect();

    let (begin_extension, end_extension) = ends.extensions(half_width);
    let last = centre.len() - 1;
    centre[0] -= directions[0] * begin_extension;
    centre[last] += directions[directions.len() - 1] * end_extension;

    let mut offsets = Vec::with_capacity(centre.len());
    offsets.push(left_normal(directions[0]) * half_width);

    for (incoming, outgoing) in directions.iter().tuple_windows() {
        let n0 = left_normal(*incoming);
        let n1 = left_normal(*outgoing);
        let denominator = 1.0 + n0.dot(n1);

        // A full reversal has no finite mitre
        let offset = if denominator.abs() < 1e-12 {
            n0 * half_width
        } else {
            (n0 + n1) * (half_width / denominator)
        };
        offsets.push(offset);
    }

    offsets.push(left_normal(directions[directions.len() - 1]) * half_width);

    let left = centre.iter().zip(&offsets).map(|(point, offset)| *point + *offset);
    let right = centre
        .iter()
        .zip(&offsets)
        .rev()
        .map(|(point, offset)| *point - *offset);

    Some(left.chain(right).collect())
}
