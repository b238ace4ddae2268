use crate::browser::{ObservedRequest, RequestListener};
use crate::model::{ParamType, Source, Surface, SurfaceBuilder};
use crate::url_utils::{host_of, host_in_scope};
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{LazyLock, Mutex};
use tracing::debug;
use url::Url;

/// Value the interaction engine types into search boxes. Seeing it in a
/// request path means the path itself carries user input.
pub const SEARCH_PROBE: &str = "XSURF_SEARCH_PROBE";

const BODY_METHODS: [&str; 5] = ["POST", "PUT", "PATCH", "DELETE", "OPTIONS"];

static MULTIPART_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[;\s]name="([^"]+)""#).unwrap());

/// Who gets credited for the traffic observed right now.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    pub depth: usize,
    pub trigger_chain: Vec<String>,
    pub action: String,
    pub source: Source,
}

impl Default for Attribution {
    fn default() -> Self {
        Self {
            depth: 0,
            trigger_chain: vec!["page_load".to_string()],
            action: "page_load".to_string(),
            source: Source::TrafficIntercept,
        }
    }
}

/// Turns a page's outgoing requests into surfaces.
///
/// Attached before navigation. The interaction engine updates the current
/// [`Attribution`] right before every action so each surface records the
/// UI step that provoked it.
pub struct TrafficInterceptor {
    page_url: Mutex<String>,
    scope: Option<Vec<String>>,
    blocked_resource_types: Vec<String>,
    attribution: Mutex<Attribution>,
    captured: Mutex<Vec<Surface>>,
}

impl TrafficInterceptor {
    /// `scope` of `None` captures every request (capture-all mode).
    pub fn new(page_url: &str, scope: Option<Vec<String>>, blocked_resource_types: Vec<String>) -> Self {
        Self {
            page_url: Mutex::new(page_url.to_string()),
            scope,
            blocked_resource_types: blocked_resource_types
                .into_iter()
                .map(|t| t.to_lowercase())
                .collect(),
            attribution: Mutex::new(Attribution::default()),
            captured: Mutex::new(Vec::new()),
        }
    }

    /// Update the page identity after a redirect.
    pub fn set_page_url(&self, page_url: &str) {
        *self.page_url.lock().unwrap() = page_url.to_string();
    }

    pub fn attribute(&self, attribution: Attribution) {
        *self.attribution.lock().unwrap() = attribution;
    }

    pub fn set_action(&self, action: &str) {
        self.attribution.lock().unwrap().action = action.to_string();
    }

    pub fn attribution(&self) -> Attribution {
        self.attribution.lock().unwrap().clone()
    }

    /// Everything captured so far.
    pub fn captured(&self) -> Vec<Surface> {
        self.captured.lock().unwrap().clone()
    }

    pub fn captured_count(&self) -> usize {
        self.captured.lock().unwrap().len()
    }

    pub fn analyze_request(&self, request: &ObservedRequest) -> Vec<Surface> {
        if self
            .blocked_resource_types
            .contains(&request.resource_type.to_lowercase())
        {
            return Vec::new();
        }

        let Some(request_host) = host_of(&request.url) else {
            return Vec::new();
        };
        if let Some(scope) = &self.scope
            && !host_in_scope(&request_host, scope)
        {
            debug!("Dropping out-of-scope request to {}", request.url);
            return Vec::new();
        }

        let page_url = self.page_url.lock().unwrap().clone();
        let cross_origin = host_of(&page_url).is_some_and(|page_host| page_host != request_host);
        let attribution = self.attribution();

        let ctx = RequestContext {
            request,
            page_url: &page_url,
            cross_origin,
            attribution: &attribution,
        };

        let method = request.method.to_uppercase();
        if method == "GET" {
            ctx.get_surfaces()
        } else if BODY_METHODS.contains(&method.as_str()) {
            ctx.body_surfaces(&method)
        } else {
            Vec::new()
        }
    }
}

impl RequestListener for TrafficInterceptor {
    fn on_request(&self, request: &ObservedRequest) {
        let surfaces = self.analyze_request(request);
        if surfaces.is_empty() {
            return;
        }
        debug!(
            "{} {} yielded {} surfaces",
            request.method,
            request.url,
            surfaces.len()
        );
        self.captured.lock().unwrap().extend(surfaces);
    }
}

struct RequestContext<'a> {
    request: &'a ObservedRequest,
    page_url: &'a str,
    cross_origin: bool,
    attribution: &'a Attribution,
}

impl RequestContext<'_> {
    fn surface(&self, method: &str, name: impl Into<String>, param_type: ParamType) -> SurfaceBuilder {
        Surface::builder(&self.request.url, method, name, param_type, self.attribution.source)
            .page_url(self.page_url)
            .action_trigger(&self.attribution.action)
            .cross_origin(self.cross_origin)
            .depth_level(self.attribution.depth)
            .trigger_chain(self.attribution.trigger_chain.clone())
            .element_type(self.request.resource_type.clone())
            .observed_now()
    }

    fn get_surfaces(&self) -> Vec<Surface> {
        let Ok(parsed) = Url::parse(&self.request.url) else {
            return Vec::new();
        };

        let mut surfaces: Vec<Surface> = parsed
            .query_pairs()
            .map(|(key, value)| {
                self.surface("GET", key.to_string(), ParamType::Query)
                    .sample_payload(value.to_string())
                    .build()
            })
            .collect();

        let segments: Vec<&str> = parsed
            .path()
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        for (position, segment) in segments.iter().enumerate() {
            let decoded = urlencoding::decode(segment)
                .map(|d| d.into_owned())
                .unwrap_or_else(|_| segment.to_string());
            if decoded.contains(SEARCH_PROBE) {
                surfaces.push(
                    self.surface("GET", format!("path_param_{}", position), ParamType::Path)
                        .path_position(position)
                        .sample_payload(decoded)
                        .build(),
                );
            }
        }

        surfaces
    }

    fn body_surfaces(&self, method: &str) -> Vec<Surface> {
        if method == "OPTIONS" {
            return vec![
                self.surface(method, "cors_preflight", ParamType::Header)
                    .sample_payload("Access-Control-Request-Method")
                    .build(),
            ];
        }

        let body = self
            .request
            .post_data
            .as_deref()
            .filter(|b| !b.is_empty());
        let Some(body) = body else {
            return vec![self.surface(method, "body", ParamType::JsonBody).build()];
        };

        let content_type = self
            .request
            .header("content-type")
            .unwrap_or_default()
            .to_lowercase();

        let fields: Vec<(String, String, ParamType)> = if content_type.contains("json") {
            json_body_fields(body)
                .into_iter()
                .map(|(name, sample)| (name, sample, ParamType::JsonBody))
                .collect()
        } else if content_type.contains("x-www-form-urlencoded") {
            urlencoded_fields(body)
                .into_iter()
                .map(|(name, sample)| (name, sample, ParamType::FormData))
                .collect()
        } else if content_type.contains("multipart/form-data") {
            multipart_field_names(body)
                .into_iter()
                .map(|name| (name, String::new(), ParamType::FormData))
                .collect()
        } else {
            Vec::new()
        };

        fields
            .into_iter()
            .map(|(name, sample, param_type)| {
                self.surface(method, name, param_type)
                    .sample_payload(sample)
                    .build()
            })
            .collect()
    }
}

/// Dotted key paths of a JSON document with a sample value for each.
/// Arrays are represented by their first element only. Malformed JSON yields
/// nothing.
pub fn json_body_fields(body: &str) -> Vec<(String, String)> {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return Vec::new();
    };
    let mut fields = Vec::new();
    walk_json(&value, "", &mut fields);
    fields
}

fn walk_json(value: &Value, prefix: &str, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                out.push((path.clone(), scalar_sample(child)));
                if child.is_object() || child.is_array() {
                    walk_json(child, &path, out);
                }
            }
        }
        Value::Array(items) => {
            if let Some(first) = items.first()
                && (first.is_object() || first.is_array())
            {
                walk_json(first, prefix, out);
            }
        }
        _ => {}
    }
}

fn scalar_sample(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn urlencoded_fields(body: &str) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    url::form_urlencoded::parse(body.as_bytes())
        .filter(|(key, _)| !key.is_empty() && seen.insert(key.to_string()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

fn multipart_field_names(body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    MULTIPART_FIELD
        .captures_iter(body)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://app.example.com/dashboard";

    fn interceptor() -> TrafficInterceptor {
        TrafficInterceptor::new(
            PAGE,
            Some(vec!["example.com".to_string()]),
            vec!["image".into(), "stylesheet".into(), "font".into(), "media".into()],
        )
    }

    fn names(surfaces: &[Surface]) -> Vec<&str> {
        surfaces.iter().map(|s| s.param_name()).collect()
    }

    #[test]
    fn test_repeated_query_key_yields_one_surface_per_value() {
        let surfaces = interceptor().analyze_request(&ObservedRequest::new(
            "GET",
            "https://app.example.com/search?q=test&q=test2",
        ));
        assert_eq!(surfaces.len(), 2);
        assert_eq!(surfaces[0].param_name(), "q");
        assert_eq!(surfaces[1].param_name(), "q");
        assert_eq!(surfaces[0].fingerprint(), surfaces[1].fingerprint());
        assert_eq!(surfaces[0].sample_payload(), "test");
        assert_eq!(surfaces[1].sample_payload(), "test2");
    }

    #[test]
    fn test_json_body_walk_samples_first_array_element() {
        let fields = json_body_fields(r#"{"user":{"name":"x","tags":["a","b"]}}"#);
        let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["user", "user.name", "user.tags"]);

        let nested = json_body_fields(r#"{"items":[{"sku":"1"},{"sku":"2","extra":true}]}"#);
        let names: Vec<&str> = nested.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["items", "items.sku"]);
    }

    #[test]
    fn test_malformed_json_body_yields_nothing() {
        let request = ObservedRequest::new("POST", "https://app.example.com/api/save")
            .with_body("application/json", "{not json");
        assert!(interceptor().analyze_request(&request).is_empty());
    }

    #[test]
    fn test_form_and_multipart_bodies() {
        let form = ObservedRequest::new("POST", "https://app.example.com/login")
            .with_body("application/x-www-form-urlencoded", "user=bob&pass=secret&user=again");
        let surfaces = interceptor().analyze_request(&form);
        assert_eq!(names(&surfaces), vec!["user", "pass"]);
        assert!(surfaces.iter().all(|s| s.param_type() == ParamType::FormData));

        let body = "--XYZ\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nhi\r\n\
                    --XYZ\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\r\nx\r\n--XYZ--";
        let multipart = ObservedRequest::new("PUT", "https://app.example.com/upload")
            .with_body("multipart/form-data; boundary=XYZ", body);
        assert_eq!(names(&interceptor().analyze_request(&multipart)), vec!["title", "file"]);
    }

    #[test]
    fn test_options_and_empty_body_markers() {
        let preflight = ObservedRequest::new("OPTIONS", "https://api.example.com/v1/items");
        let surfaces = interceptor().analyze_request(&preflight);
        assert_eq!(names(&surfaces), vec!["cors_preflight"]);
        assert_eq!(surfaces[0].param_type(), ParamType::Header);
        assert!(surfaces[0].is_cross_origin());

        let delete = ObservedRequest::new("DELETE", "https://app.example.com/api/items/9");
        let surfaces = interceptor().analyze_request(&delete);
        assert_eq!(names(&surfaces), vec!["body"]);
    }

    #[test]
    fn test_scope_and_resource_type_filters() {
        let tracker = ObservedRequest::new("GET", "https://tracker.io/pixel?id=1");
        assert!(interceptor().analyze_request(&tracker).is_empty());

        let capture_all = TrafficInterceptor::new(PAGE, None, vec!["image".into()]);
        let surfaces = capture_all.analyze_request(&tracker);
        assert_eq!(surfaces.len(), 1);
        assert!(surfaces[0].is_cross_origin());

        let image = ObservedRequest::new("GET", "https://app.example.com/logo.png?v=3")
            .with_resource_type("Image");
        assert!(capture_all.analyze_request(&image).is_empty());
    }

    #[test]
    fn test_probe_marker_in_path_yields_positional_surface() {
        let request = ObservedRequest::new(
            "GET",
            format!("https://app.example.com/search/{}/page/1", SEARCH_PROBE),
        );
        let surfaces = interceptor().analyze_request(&request);
        assert_eq!(names(&surfaces), vec!["path_param_1"]);
        assert_eq!(
            surfaces[0].url_pattern(),
            "https://app.example.com/search/{param}/page/1"
        );
    }

    #[test]
    fn test_surfaces_carry_current_attribution() {
        let interceptor = interceptor();
        interceptor.attribute(Attribution {
            depth: 2,
            trigger_chain: vec!["page_load".into(), "click_Menu".into(), "click_Edit".into()],
            action: "click_Edit".into(),
            source: Source::TrafficAfterInteraction,
        });
        interceptor.on_request(&ObservedRequest::new(
            "GET",
            "https://app.example.com/api/item?id=4",
        ));

        let captured = interceptor.captured();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].depth_level(), 2);
        assert_eq!(captured[0].trigger_chain().len(), 3);
        assert_eq!(captured[0].action_trigger(), "click_Edit");
        assert_eq!(captured[0].source(), Source::TrafficAfterInteraction);
        assert!(!captured[0].is_cross_origin());
    }
}
