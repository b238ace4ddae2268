//! The attack surface record and its fingerprint.
//!
//! A [`Surface`] is built once through [`SurfaceBuilder`] and never mutated.
//! Its `url_pattern` and `fingerprint` are derived at build time from the
//! method, URL, parameter name and parameter type only, so two observations of
//! the same parameter compare equal no matter when or how they were made.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::url_utils::{scheme_host_path, strip_query};

/// Replaces a path parameter segment in `url_pattern`.
pub const PATH_PLACEHOLDER: &str = "{param}";

const FINGERPRINT_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParamType {
    Query,
    Path,
    JsonBody,
    FormData,
    FormInput,
    HiddenInput,
    Editable,
    Header,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::Query => "query",
            ParamType::Path => "path",
            ParamType::JsonBody => "json-body",
            ParamType::FormData => "form-data",
            ParamType::FormInput => "form-input",
            ParamType::HiddenInput => "hidden-input",
            ParamType::Editable => "editable",
            ParamType::Header => "header",
        }
    }
}

/// Which analyzer produced a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    UrlAnalysis,
    DomForm,
    DomHidden,
    DomEditable,
    DomShadow,
    TrafficIntercept,
    TrafficAfterInteraction,
    SinkHook,
    ResponseAnalysis,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::UrlAnalysis => "url-analysis",
            Source::DomForm => "dom-form",
            Source::DomHidden => "dom-hidden",
            Source::DomEditable => "dom-editable",
            Source::DomShadow => "dom-shadow",
            Source::TrafficIntercept => "traffic-intercept",
            Source::TrafficAfterInteraction => "traffic-after-interaction",
            Source::SinkHook => "sink-hook",
            Source::ResponseAnalysis => "response-analysis",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Surface {
    url: String,
    method: String,
    param_name: String,
    param_type: ParamType,
    source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    element_selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    element_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_url: Option<String>,
    action_trigger: String,
    is_cross_origin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
    depth_level: usize,
    trigger_chain: Vec<String>,
    sample_payload: String,
    url_pattern: String,
    fingerprint: String,
}

impl Surface {
    pub fn builder(
        url: impl Into<String>,
        method: impl Into<String>,
        param_name: impl Into<String>,
        param_type: ParamType,
        source: Source,
    ) -> SurfaceBuilder {
        SurfaceBuilder {
            url: url.into(),
            method: method.into(),
            param_name: param_name.into(),
            param_type,
            source,
            element_selector: None,
            element_type: None,
            page_url: None,
            action_trigger: "page_load".to_string(),
            is_cross_origin: false,
            timestamp: None,
            depth_level: 0,
            trigger_chain: Vec::new(),
            sample_payload: String::new(),
            path_position: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn param_name(&self) -> &str {
        &self.param_name
    }

    pub fn param_type(&self) -> ParamType {
        self.param_type
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn element_selector(&self) -> Option<&str> {
        self.element_selector.as_deref()
    }

    pub fn element_type(&self) -> Option<&str> {
        self.element_type.as_deref()
    }

    pub fn page_url(&self) -> Option<&str> {
        self.page_url.as_deref()
    }

    pub fn action_trigger(&self) -> &str {
        &self.action_trigger
    }

    pub fn is_cross_origin(&self) -> bool {
        self.is_cross_origin
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn depth_level(&self) -> usize {
        self.depth_level
    }

    pub fn trigger_chain(&self) -> &[String] {
        &self.trigger_chain
    }

    pub fn sample_payload(&self) -> &str {
        &self.sample_payload
    }

    pub fn url_pattern(&self) -> &str {
        &self.url_pattern
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

pub struct SurfaceBuilder {
    url: String,
    method: String,
    param_name: String,
    param_type: ParamType,
    source: Source,
    element_selector: Option<String>,
    element_type: Option<String>,
    page_url: Option<String>,
    action_trigger: String,
    is_cross_origin: bool,
    timestamp: Option<DateTime<Utc>>,
    depth_level: usize,
    trigger_chain: Vec<String>,
    sample_payload: String,
    path_position: Option<usize>,
}

impl SurfaceBuilder {
    pub fn element_selector(mut self, selector: impl Into<String>) -> Self {
        self.element_selector = Some(selector.into());
        self
    }

    pub fn element_type(mut self, element_type: impl Into<String>) -> Self {
        self.element_type = Some(element_type.into());
        self
    }

    pub fn page_url(mut self, page_url: impl Into<String>) -> Self {
        self.page_url = Some(page_url.into());
        self
    }

    pub fn action_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.action_trigger = trigger.into();
        self
    }

    pub fn cross_origin(mut self, cross_origin: bool) -> Self {
        self.is_cross_origin = cross_origin;
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Stamp with the current time.
    pub fn observed_now(self) -> Self {
        self.timestamp(Utc::now())
    }

    pub fn depth_level(mut self, depth: usize) -> Self {
        self.depth_level = depth;
        self
    }

    pub fn trigger_chain(mut self, chain: Vec<String>) -> Self {
        self.trigger_chain = chain;
        self
    }

    pub fn sample_payload(mut self, payload: impl Into<String>) -> Self {
        self.sample_payload = payload.into();
        self
    }

    /// Index (among the non-empty path segments) of the segment this path
    /// surface stands for.
    pub fn path_position(mut self, position: usize) -> Self {
        self.path_position = Some(position);
        self
    }

    pub fn build(self) -> Surface {
        let method = self.method.to_uppercase();
        let url_pattern = url_pattern(
            &self.url,
            self.param_type,
            &self.param_name,
            self.path_position,
        );
        let fingerprint = fingerprint(&method, &url_pattern, &self.param_name, self.param_type);

        Surface {
            url: self.url,
            method,
            param_name: self.param_name,
            param_type: self.param_type,
            source: self.source,
            element_selector: self.element_selector,
            element_type: self.element_type,
            page_url: self.page_url,
            action_trigger: self.action_trigger,
            is_cross_origin: self.is_cross_origin,
            timestamp: self.timestamp,
            depth_level: self.depth_level,
            trigger_chain: self.trigger_chain,
            sample_payload: self.sample_payload,
            url_pattern,
            fingerprint,
        }
    }
}

/// URL with query and fragment removed. For path surfaces the parameter
/// segment is replaced by [`PATH_PLACEHOLDER`]: the segment at
/// `path_position` when given, otherwise every segment equal to `param_name`.
pub fn url_pattern(
    url: &str,
    param_type: ParamType,
    param_name: &str,
    path_position: Option<usize>,
) -> String {
    if param_type != ParamType::Path {
        return strip_query(url);
    }

    let Ok(parsed) = Url::parse(url) else {
        return strip_query(url);
    };

    let segments: Vec<&str> = parsed
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let replaced: Vec<&str> = segments
        .iter()
        .enumerate()
        .map(|(idx, segment)| {
            let is_param = match path_position {
                Some(pos) => pos == idx,
                None => *segment == param_name,
            };
            if is_param { PATH_PLACEHOLDER } else { segment }
        })
        .collect();

    let base = scheme_host_path(&parsed);
    let origin = &base[..base.len() - parsed.path().len()];
    let mut pattern = format!("{}/{}", origin, replaced.join("/"));
    if parsed.path().len() > 1 && parsed.path().ends_with('/') {
        pattern.push('/');
    }
    pattern
}

/// First sixteen hex characters of `sha256(method|url_pattern|param_name|param_type)`.
pub fn fingerprint(method: &str, url_pattern: &str, param_name: &str, param_type: ParamType) -> String {
    let mut hasher = Sha256::new();
    hasher.update(
        format!(
            "{}|{}|{}|{}",
            method.to_uppercase(),
            url_pattern,
            param_name,
            param_type.as_str()
        )
        .as_bytes(),
    );
    let digest = hex::encode(hasher.finalize());
    digest[..FINGERPRINT_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_surface() -> SurfaceBuilder {
        Surface::builder(
            "https://example.com/search?q=test",
            "get",
            "q",
            ParamType::Query,
            Source::TrafficIntercept,
        )
    }

    #[test]
    fn test_fingerprint_ignores_observation_details() {
        let a = query_surface()
            .depth_level(0)
            .trigger_chain(vec!["page_load".into()])
            .sample_payload("test")
            .observed_now()
            .build();
        let b = query_surface()
            .depth_level(2)
            .trigger_chain(vec!["page_load".into(), "click_Menu".into()])
            .sample_payload("something else")
            .action_trigger("search_input_0")
            .build();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
        assert_eq!(a.method(), "GET");
    }

    #[test]
    fn test_fingerprint_ignores_query_values() {
        let a = query_surface().build();
        let b = Surface::builder(
            "https://example.com/search?q=other&page=2",
            "GET",
            "q",
            ParamType::Query,
            Source::UrlAnalysis,
        )
        .build();
        assert_eq!(a.url_pattern(), "https://example.com/search");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_distinguishes_param_type() {
        let query = query_surface().build();
        let form = Surface::builder(
            "https://example.com/search",
            "GET",
            "q",
            ParamType::FormInput,
            Source::DomForm,
        )
        .build();
        assert_ne!(query.fingerprint(), form.fingerprint());
    }

    #[test]
    fn test_path_pattern_by_position() {
        let surface = Surface::builder(
            "https://example.com/users/42/posts/42",
            "GET",
            "path_param_3",
            ParamType::Path,
            Source::TrafficIntercept,
        )
        .path_position(3)
        .build();
        assert_eq!(
            surface.url_pattern(),
            "https://example.com/users/42/posts/{param}"
        );
    }

    #[test]
    fn test_path_pattern_by_segment_value() {
        let pattern = url_pattern(
            "http://localhost:8080/items/1234?x=1",
            ParamType::Path,
            "1234",
            None,
        );
        assert_eq!(pattern, "http://localhost:8080/items/{param}");
    }

    #[test]
    fn test_serialized_enums_are_kebab_case() {
        let surface = Surface::builder(
            "https://example.com/api",
            "POST",
            "user.name",
            ParamType::JsonBody,
            Source::TrafficAfterInteraction,
        )
        .build();
        let value = serde_json::to_value(&surface).unwrap();
        assert_eq!(value["param_type"], "json-body");
        assert_eq!(value["source"], "traffic-after-interaction");
        assert_eq!(value["fingerprint"], surface.fingerprint());
    }
}
