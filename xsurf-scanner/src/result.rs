use crate::dedup::DedupStats;
use crate::model::Surface;
use serde::Serialize;

/// Aggregate outcome of one scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlResult {
    pub target_url: String,
    pub pages_crawled: usize,
    pub surfaces: Vec<Surface>,
    /// One entry per page-level failure.
    pub errors: Vec<String>,
    /// The scan-wide timeout fired before the page queue drained.
    pub timed_out: bool,
    pub dedup_stats: DedupStats,
}

impl CrawlResult {
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            ..Default::default()
        }
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// What a single page contributed.
#[derive(Debug, Clone, Default)]
pub struct PageOutcome {
    pub url: String,
    /// URL after redirects.
    pub final_url: String,
    pub surfaces: Vec<Surface>,
    /// Same-scope links for the next level.
    pub links: Vec<String>,
    pub actions_performed: usize,
    pub navigation_timed_out: bool,
    /// Page-level failure, if the page could not be analyzed.
    pub error: Option<String>,
}

impl PageOutcome {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            final_url: url.clone(),
            url,
            ..Default::default()
        }
    }

    pub fn with_error(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(url)
        }
    }
}
