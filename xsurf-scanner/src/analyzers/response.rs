use crate::browser::{ObservedResponse, ResponseListener};
use crate::model::{ParamType, Source, Surface};
use crate::url_utils::strip_query;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{LazyLock, Mutex};
use tracing::{debug, warn};
use url::Url;

static JSONP_CALL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*[\w$.]+\s*\(").unwrap());

const CALLBACK_PARAMS: [&str; 4] = ["callback", "jsonp", "cb", "jsoncallback"];
const SENSITIVE_HEADERS: [&str; 5] = [
    "location",
    "set-cookie",
    "refresh",
    "x-redirect",
    "content-disposition",
];
const REDIRECT_PARAMS: [&str; 5] = ["msg", "message", "url", "redirect", "next"];
const PERMISSIVE_CSP: [&str; 3] = ["'unsafe-inline'", "'unsafe-eval'", "*"];

pub const JSONP_SAMPLE: &str = "xsurf_callback";
pub const CRLF_SAMPLE: &str = "test%0d%0aX-Injected:true";

/// Watches responses for JSONP endpoints and header reflection.
/// Each distinct URL is examined once.
pub struct ResponseAnalyzer {
    page_url: String,
    analyzed: Mutex<HashSet<String>>,
    captured: Mutex<Vec<Surface>>,
}

impl ResponseAnalyzer {
    pub fn new(page_url: &str) -> Self {
        Self {
            page_url: page_url.to_string(),
            analyzed: Mutex::new(HashSet::new()),
            captured: Mutex::new(Vec::new()),
        }
    }

    pub fn captured(&self) -> Vec<Surface> {
        self.captured.lock().unwrap().clone()
    }

    pub fn analyze_response(&self, response: &ObservedResponse) -> Vec<Surface> {
        if !self.analyzed.lock().unwrap().insert(response.url.clone()) {
            return Vec::new();
        }

        let query: Vec<(String, String)> = Url::parse(&response.url)
            .map(|u| {
                u.query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();

        let mut surfaces = Vec::new();
        if let Some(surface) = self.detect_jsonp(response, &query) {
            surfaces.push(surface);
        }
        if let Some(surface) = self.detect_header_injection(response, &query) {
            surfaces.push(surface);
        }
        self.check_csp(response);
        surfaces
    }

    fn detect_jsonp(&self, response: &ObservedResponse, query: &[(String, String)]) -> Option<Surface> {
        let content_type = response.header("content-type")?.to_lowercase();
        if !(content_type.contains("javascript") || content_type.contains("json")) {
            return None;
        }
        let body = response.body.as_deref()?;
        if !JSONP_CALL.is_match(body) {
            return None;
        }

        let param = CALLBACK_PARAMS
            .iter()
            .find(|name| query.iter().any(|(k, _)| k == *name))
            .map(|name| name.to_string())
            .or_else(|| query.first().map(|(k, _)| k.clone()))
            .unwrap_or_else(|| "callback".to_string());

        debug!("JSONP endpoint {} (callback parameter {})", response.url, param);
        Some(
            Surface::builder(strip_query(&response.url), "GET", param, ParamType::Query, Source::ResponseAnalysis)
                .page_url(&self.page_url)
                .element_type("jsonp")
                .sample_payload(JSONP_SAMPLE)
                .observed_now()
                .build(),
        )
    }

    fn detect_header_injection(
        &self,
        response: &ObservedResponse,
        query: &[(String, String)],
    ) -> Option<Surface> {
        let (header, _) = SENSITIVE_HEADERS.iter().find_map(|name| {
            let value = response.header(name)?;
            let has_crlf = value.contains('\r') || value.contains('\n');
            let echoes_param = query
                .iter()
                .any(|(_, v)| v.len() >= 3 && value.contains(v.as_str()));
            (has_crlf || echoes_param).then_some((*name, value))
        })?;

        let param = REDIRECT_PARAMS
            .iter()
            .find(|name| query.iter().any(|(k, _)| k == *name))
            .map(|name| name.to_string())
            .or_else(|| query.first().map(|(k, _)| k.clone()))
            .unwrap_or_else(|| "msg".to_string());

        debug!("Header {} on {} may reflect {}", header, response.url, param);
        Some(
            Surface::builder(strip_query(&response.url), "GET", param, ParamType::Header, Source::ResponseAnalysis)
                .page_url(&self.page_url)
                .element_type(header)
                .sample_payload(CRLF_SAMPLE)
                .observed_now()
                .build(),
        )
    }

    fn check_csp(&self, response: &ObservedResponse) {
        let Some(csp) = response.header("content-security-policy") else {
            return;
        };
        let permissive: Vec<&str> = PERMISSIVE_CSP
            .iter()
            .copied()
            .filter(|token| csp.split_whitespace().any(|part| part.trim_end_matches(';') == *token))
            .collect();
        if !permissive.is_empty() {
            warn!(
                "Permissive Content-Security-Policy on {}: {}",
                response.url,
                permissive.join(", ")
            );
        }
    }
}

impl ResponseListener for ResponseAnalyzer {
    fn on_response(&self, response: &ObservedResponse) {
        let surfaces = self.analyze_response(response);
        if !surfaces.is_empty() {
            self.captured.lock().unwrap().extend(surfaces);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://example.com/";

    #[test]
    fn test_jsonp_callback_priority() {
        let analyzer = ResponseAnalyzer::new(PAGE);
        let response = ObservedResponse::new("https://example.com/api/feed?format=js&cb=handle", 200)
            .with_header("Content-Type", "application/javascript")
            .with_body("handle({\"items\":[]});");
        let surfaces = analyzer.analyze_response(&response);
        assert_eq!(surfaces.len(), 1);
        assert_eq!(surfaces[0].param_name(), "cb");
        assert_eq!(surfaces[0].url(), "https://example.com/api/feed");
        assert_eq!(surfaces[0].sample_payload(), JSONP_SAMPLE);
    }

    #[test]
    fn test_jsonp_falls_back_to_first_key_then_literal() {
        let analyzer = ResponseAnalyzer::new(PAGE);
        let first_key = ObservedResponse::new("https://example.com/a?fn=x", 200)
            .with_header("content-type", "text/javascript")
            .with_body("x(1)");
        assert_eq!(analyzer.analyze_response(&first_key)[0].param_name(), "fn");

        let no_query = ObservedResponse::new("https://example.com/b", 200)
            .with_header("content-type", "application/json")
            .with_body("  $cb_1 (42)");
        assert_eq!(analyzer.analyze_response(&no_query)[0].param_name(), "callback");
    }

    #[test]
    fn test_plain_json_is_not_jsonp() {
        let analyzer = ResponseAnalyzer::new(PAGE);
        let response = ObservedResponse::new("https://example.com/api?callback=x", 200)
            .with_header("content-type", "application/json")
            .with_body("{\"ok\":true}");
        assert!(analyzer.analyze_response(&response).is_empty());
    }

    #[test]
    fn test_each_url_analyzed_once() {
        let analyzer = ResponseAnalyzer::new(PAGE);
        let response = ObservedResponse::new("https://example.com/jsonp?callback=f", 200)
            .with_header("content-type", "application/javascript")
            .with_body("f([])");
        analyzer.on_response(&response);
        analyzer.on_response(&response);
        assert_eq!(analyzer.captured().len(), 1);
    }

    #[test]
    fn test_reflected_redirect_parameter() {
        let analyzer = ResponseAnalyzer::new(PAGE);
        let response = ObservedResponse::new("https://example.com/go?id=7&next=/welcome", 302)
            .with_header("Location", "https://example.com/welcome");
        let surfaces = analyzer.analyze_response(&response);
        assert_eq!(surfaces.len(), 1);
        assert_eq!(surfaces[0].param_type(), ParamType::Header);
        assert_eq!(surfaces[0].param_name(), "next");
        assert_eq!(surfaces[0].element_type(), Some("location"));
    }

    #[test]
    fn test_raw_crlf_in_header_is_flagged() {
        let analyzer = ResponseAnalyzer::new(PAGE);
        let response = ObservedResponse::new("https://example.com/download", 200)
            .with_header("content-disposition", "attachment; filename=a\r\nX-Evil: 1");
        let surfaces = analyzer.analyze_response(&response);
        assert_eq!(surfaces[0].param_name(), "msg");
    }

    #[test]
    fn test_csp_is_log_only() {
        let analyzer = ResponseAnalyzer::new(PAGE);
        let response = ObservedResponse::new("https://example.com/", 200)
            .with_header("content-security-policy", "script-src 'self' 'unsafe-inline'");
        assert!(analyzer.analyze_response(&response).is_empty());
    }
}
