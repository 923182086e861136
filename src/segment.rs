//! One ingestion step's input (spec §3 `Segment`).

use crate::label::Label;
use crate::math::{Point3, Transform3};

/// A bundle for one `integrate_point_cloud` call: points in camera frame,
/// the sensor-to-world pose, per-point colors, and an output labels array
/// that the [`crate::assigner::LabelAssigner`] fills in (one label per
/// point, all equal once a segment is assigned — spec §3).
#[derive(Debug, Clone)]
pub struct Segment {
    pub points_c: Vec<Point3>,
    pub t_g_c: Transform3,
    pub colors: Vec<[u8; 3]>,
    pub labels: Vec<Label>,
}

impl Segment {
    /// Builds a segment with all labels initialized to [`Label::NONE`],
    /// ready for [`crate::assigner::LabelAssigner`].
    pub fn new(points_c: Vec<Point3>, t_g_c: Transform3, colors: Vec<[u8; 3]>) -> Self {
        let labels = vec![Label::NONE; points_c.len()];
        Self { points_c, t_g_c, colors, labels }
    }

    pub fn len(&self) -> usize {
        self.points_c.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points_c.is_empty()
    }

    /// Assigns the same label to every point of the segment (spec §4.3
    /// Stage B/C: "assign every point of S the label L").
    pub fn assign_label(&mut self, label: Label) {
        for l in self.labels.iter_mut() {
            *l = label;
        }
    }
}
