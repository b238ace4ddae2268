use crate::model::{ParamType, Source, Surface};
use crate::url_utils::strip_query;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

/// Path segment families that look like identifiers, in match priority.
static PATH_PARAM_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    vec![
        ("numeric", Regex::new(r"^[0-9]+$").unwrap()),
        ("uuid", Regex::new(r"^[a-f0-9-]{32,36}$").unwrap()),
        ("id_prefix", Regex::new(r"^(id|ID)_?\d+$").unwrap()),
        ("hash", Regex::new(r"^[a-f0-9]{32,64}$").unwrap()),
    ]
});

/// Extracts query and path parameters from a URL string.
#[derive(Debug, Default, Clone, Copy)]
pub struct UrlAnalyzer;

impl UrlAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, url: &str, method: &str) -> Vec<Surface> {
        let Ok(parsed) = Url::parse(url) else {
            debug!("URL analyzer skipping unparseable URL {}", url);
            return Vec::new();
        };

        let mut surfaces = self.query_surfaces(&parsed, url, method);
        surfaces.extend(self.path_surfaces(&parsed, url, method));
        surfaces
    }

    fn query_surfaces(&self, parsed: &Url, url: &str, method: &str) -> Vec<Surface> {
        let base = strip_query(url);
        let mut seen = HashSet::new();

        parsed
            .query_pairs()
            .filter(|(key, _)| seen.insert(key.to_string()))
            .map(|(key, value)| {
                Surface::builder(&base, method, key.to_string(), ParamType::Query, Source::UrlAnalysis)
                    .page_url(url)
                    .sample_payload(value.to_string())
                    .trigger_chain(vec!["page_load".to_string()])
                    .build()
            })
            .collect()
    }

    fn path_surfaces(&self, parsed: &Url, url: &str, method: &str) -> Vec<Surface> {
        let segments: Vec<&str> = parsed
            .path()
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        segments
            .iter()
            .enumerate()
            .filter_map(|(position, segment)| {
                let family = classify_segment(segment)?;
                debug!("Path segment {} looks like a {} identifier", segment, family);
                Some(
                    Surface::builder(url, method, *segment, ParamType::Path, Source::UrlAnalysis)
                        .path_position(position)
                        .page_url(url)
                        .element_type(family)
                        .sample_payload(*segment)
                        .trigger_chain(vec!["page_load".to_string()])
                        .build(),
                )
            })
            .collect()
    }
}

/// Name of the first identifier family `segment` belongs to.
pub fn classify_segment(segment: &str) -> Option<&'static str> {
    PATH_PARAM_PATTERNS
        .iter()
        .find(|(_, pattern)| pattern.is_match(segment))
        .map(|(family, _)| *family)
}
