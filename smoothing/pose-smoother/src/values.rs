use std::collections::BTreeMap;

use field_geom::Pose2;

/// The current estimate for every state variable in the window,
/// ordered by key.
#[derive(Debug, Clone, Default)]
pub struct Values {
    map: BTreeMap<i64, Pose2>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, key: i64) -> bool {
        self.map.contains_key(&key)
    }

    pub fn insert(&mut self, key: i64, pose: Pose2) {
        self.map.insert(key, pose);
    }

    pub fn get(&self, key: i64) -> Option<Pose2> {
        self.map.get(&key).copied()
    }

    /// The pose at `key`.
    ///
    /// Panics if the key is absent. Factor insertion validates keys
    /// and marginalisation removes factors together with their keys,
    /// so a miss here is a graph-integrity bug.
    pub fn pose(&self, key: i64) -> Pose2 {
        match self.map.get(&key) {
            Some(p) => *p,
            None => panic!("state key {key} missing from values"),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = i64> + '_ {
        self.map.keys().copied()
    }

    pub fn newest_key(&self) -> Option<i64> {
        self.map.keys().next_back().copied()
    }

    pub(crate) fn remove(&mut self, key: i64) {
        self.map.remove(&key);
    }
}
