use glam::{Mat4, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AABB {
    pub min: Vec3,
    pub max: Vec3,
}

impl AABB {
    pub fn new(point1: Vec3, point2: Vec3) -> AABB {
        let min = point1.min(point2);
        let max = point1.max(point2);
        AABB { min, max }
    }

    /// Smallest box containing every point, or `None` for no points.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<AABB> {
        points.into_iter().fold(None, |bounds, point| match bounds {
            None => Some(AABB::new(point, point)),
            Some(bounds) => Some(bounds.extended(point)),
        })
    }

    pub fn extended(&self, point: Vec3) -> AABB {
        AABB {
            min: self.min.min(point),
            max: self.max.max(point),
        }
    }

    pub fn union(&self, other: &AABB) -> AABB {
        AABB {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn corners(&self) -> [Vec3; 8] {
        [
            Vec3::new(self.min.x, self.min.y, self.min.z),
            Vec3::new(self.max.x, self.min.y, self.min.z),
            Vec3::new(self.min.x, self.max.y, self.min.z),
            Vec3::new(self.max.x, self.max.y, self.min.z),
            Vec3::new(self.min.x, self.min.y, self.max.z),
            Vec3::new(self.max.x, self.min.y, self.max.z),
            Vec3::new(self.min.x, self.max.y, self.max.z),
            Vec3::new(self.max.x, self.max.y, self.max.z),
        ]
    }

    /// Box around this box after transforming all of its corners.
    pub fn transformed(&self, transform: &Mat4) -> AABB {
        let corners = self
            .corners()
            .map(|corner| transform.transform_point3(corner));

        // Eight corners, never empty
        let mut bounds = AABB::new(corners[0], corners[0]);
        for corner in &corners[1..] {
            bounds = bounds.extended(*corner);
        }
        bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn from_points_collects_extrema() {
        let bounds = AABB::from_points([
            Vec3::new(1.0, -2.0, 0.5),
            Vec3::new(-1.0, 3.0, 0.0),
            Vec3::new(0.0, 0.0, 2.0),
        ])
        .unwrap();

        assert_eq!(bounds.min, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(bounds.max, Vec3::new(1.0, 3.0, 2.0));
        assert_eq!(bounds.size(), Vec3::new(2.0, 5.0, 2.0));
        assert!(AABB::from_points(std::iter::empty()).is_none());
    }

    #[test]
    fn transformed_box_follows_rotation() {
        let bounds = AABB::new(Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0));
        let rotation = Mat4::from_quat(Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));

        let rotated = bounds.transformed(&rotation);

        assert!(rotated.min.abs_diff_eq(Vec3::new(-1.0, 0.0, 0.0), 1e-6));
        assert!(rotated.max.abs_diff_eq(Vec3::new(0.0, 2.0, 1.0), 1e-6));
    }
}
