//! Minimal point and rigid-transform arithmetic used to project segment
//! points from camera frame into world (global) frame.

/// A point in either camera or world frame, depending on context.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub const ZERO: Point3 = Point3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn scale(self, s: f32) -> Self {
        Point3::new(self.x * s, self.y * s, self.z * s)
    }

    pub fn add(self, rhs: Point3) -> Self {
        Point3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

/// A rigid sensor-to-world transform, `T_G_C` in the spec's notation.
#[derive(Debug, Clone, Copy)]
pub struct Transform3 {
    pub rotation: [[f32; 3]; 3],
    pub translation: Point3,
}

impl Transform3 {
    pub fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: Point3::ZERO,
        }
    }

    pub fn from_translation(t: Point3) -> Self {
        Self { translation: t, ..Self::identity() }
    }

    /// Maps a point from camera frame into world frame: `T_G_C * p`.
    pub fn transform_point(&self, p: Point3) -> Point3 {
        let r = &self.rotation;
        Point3::new(
            r[0][0] * p.x + r[0][1] * p.y + r[0][2] * p.z + self.translation.x,
            r[1][0] * p.x + r[1][1] * p.y + r[1][2] * p.z + self.translation.y,
            r[2][0] * p.x + r[2][1] * p.y + r[2][2] * p.z + self.translation.z,
        )
    }

    /// The sensor origin in world frame.
    pub fn origin(&self) -> Point3 {
        self.translation
    }
}
