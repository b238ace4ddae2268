use crate::model::Surface;
use std::collections::HashSet;

/// Keep the first surface for each fingerprint, preserving input order.
pub fn deduplicate(surfaces: Vec<Surface>) -> Vec<Surface> {
    let mut engine = DedupEngine::new();
    surfaces.into_iter().filter(|s| engine.add(s)).collect()
}

/// Incremental form of [`deduplicate`].
#[derive(Debug, Default)]
pub struct DedupEngine {
    seen: HashSet<String>,
}

impl DedupEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the surface's fingerprint has not been seen before.
    pub fn add(&mut self, surface: &Surface) -> bool {
        self.seen.insert(surface.fingerprint().to_string())
    }

    pub fn contains(&self, surface: &Surface) -> bool {
        self.seen.contains(surface.fingerprint())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn reset(&mut self) {
        self.seen.clear();
    }
}
