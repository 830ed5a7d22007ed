use std::collections::BTreeMap;

use nalgebra::Isometry3;

/// A fiducial with a known world pose, immutable for a run.
#[derive(Debug, Clone)]
pub struct Landmark {
    pub id: i32,
    pub pose: Isometry3<f64>,
}

impl Landmark {
    pub fn new(id: i32, pose: Isometry3<f64>) -> Self {
        Self { id, pose }
    }

    /// The world position of the tag center.
    pub fn position(&self) -> nalgebra::Point3<f64> {
        self.pose.translation.vector.into()
    }
}

/// The static field map: tag id to world pose. Shared read-only
/// between camera workers and the smoother.
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    tags: BTreeMap<i32, Landmark>,
}

impl FieldMap {
    pub fn new<I: IntoIterator<Item = Landmark>>(tags: I) -> Self {
        Self {
            tags: tags.into_iter().map(|t| (t.id, t)).collect(),
        }
    }

    pub fn get(&self, id: i32) -> Option<&Landmark> {
        self.tags.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Landmark> {
        self.tags.values()
    }
}
