//! Two-tier deduplication: [`GlobalDedup`] gates URLs and element
//! interactions across every page of one scan, [`local`] folds result sets by
//! surface fingerprint.

pub mod global;
pub mod local;

pub use global::{DedupStats, ElementClass, GlobalDedup};
pub use local::{DedupEngine, deduplicate};
