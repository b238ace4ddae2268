//! Renderer abstraction for browser-driven page analysis.
//!
//! Defines the `Renderer` and `PageContext` traits that abstract over the
//! browser engine (Chromium via chromiumoxide, or the in-memory scripted
//! renderer used by tests). Everything the analyzers and the interaction
//! engine need from a live page goes through `PageContext`.

pub mod chromium;
pub mod scripted;
mod scripts;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use chromium::ChromiumRenderer;
pub use scripted::{ScriptedElement, ScriptedForm, ScriptedPage, ScriptedRenderer, ScriptedSite};

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A visible element as seen by the interaction engine.
///
/// `element_ref` is a handle that stays valid as long as the node remains
/// attached to the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementSnapshot {
    pub element_ref: String,
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub text: String,
    /// `#id`, or the tag followed by its classes.
    pub selector: String,
    pub bbox: BoundingBox,
    pub href: Option<String>,
    pub input_type: Option<String>,
    pub has_mouseover: bool,
    pub has_change: bool,
    pub has_click_handler: bool,
    pub visible: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// input, textarea or select that is not hidden
    Control,
    Hidden,
    Editable,
}

/// Raw data for one candidate input, used by the DOM analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputField {
    pub kind: FieldKind,
    pub tag: String,
    #[serde(default)]
    pub input_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub aria_label: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub form_method: Option<String>,
    #[serde(default)]
    pub form_action: Option<String>,
    #[serde(default)]
    pub in_shadow: bool,
    /// Position among fields of the same kind.
    #[serde(default)]
    pub index: usize,
}

impl InputField {
    pub fn new(kind: FieldKind, tag: impl Into<String>) -> Self {
        Self {
            kind,
            tag: tag.into(),
            input_type: None,
            name: None,
            id: None,
            placeholder: None,
            aria_label: None,
            title: None,
            class_name: None,
            visible: true,
            form_method: None,
            form_action: None,
            in_shadow: false,
            index: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormField {
    pub element_ref: String,
    pub tag: String,
    pub input_type: Option<String>,
    pub name: Option<String>,
    pub visible: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormSnapshot {
    pub element_ref: String,
    pub index: usize,
    pub fields: Vec<FormField>,
    /// First submit control, if the form has one.
    pub submit: Option<ElementSnapshot>,
}

/// A call recorded by the sink hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkCall {
    pub function: String,
    #[serde(default)]
    pub argument: String,
    #[serde(default)]
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    Hover,
    Click,
    SelectOption(usize),
    Fill(String),
    PressEnter,
    SubmitForm,
}

impl Interaction {
    pub fn verb(&self) -> &'static str {
        match self {
            Interaction::Hover => "hover",
            Interaction::Click => "click",
            Interaction::SelectOption(_) => "select",
            Interaction::Fill(_) => "fill",
            Interaction::PressEnter => "enter",
            Interaction::SubmitForm => "submit",
        }
    }
}

/// An outgoing request observed on a page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedRequest {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub post_data: Option<String>,
    pub resource_type: String,
}

impl ObservedRequest {
    pub fn new(method: &str, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.to_uppercase(),
            headers: HashMap::new(),
            post_data: None,
            resource_type: "xhr".to_string(),
        }
    }

    pub fn with_body(mut self, content_type: &str, body: impl Into<String>) -> Self {
        self.headers
            .insert("content-type".to_string(), content_type.to_string());
        self.post_data = Some(body.into());
        self
    }

    pub fn with_resource_type(mut self, resource_type: &str) -> Self {
        self.resource_type = resource_type.to_lowercase();
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        lookup_header(&self.headers, name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedResponse {
    pub url: String,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl ObservedResponse {
    pub fn new(url: impl Into<String>, status: u16) -> Self {
        Self {
            url: url.into(),
            status,
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        lookup_header(&self.headers, name)
    }
}

fn lookup_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Receives every outgoing request of a page. Called from the binding's
/// event task, so implementations must not block.
pub trait RequestListener: Send + Sync {
    fn on_request(&self, request: &ObservedRequest);
}

pub trait ResponseListener: Send + Sync {
    fn on_response(&self, response: &ObservedResponse);
}

/// A browser engine that can create isolated page contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new isolated browsing context with a single blank page.
    async fn new_context(&self) -> Result<Box<dyn PageContext>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently open contexts.
    fn active_contexts(&self) -> usize;
}

/// One isolated browsing context holding exactly one page.
#[async_trait]
pub trait PageContext: Send + Sync {
    /// Script evaluated in every new document before any page script runs.
    async fn add_init_script(&mut self, source: &str) -> Result<()>;
    async fn on_request(&mut self, listener: Arc<dyn RequestListener>) -> Result<()>;
    async fn on_response(&mut self, listener: Arc<dyn ResponseListener>) -> Result<()>;
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<NavigationResult>;
    async fn current_url(&self) -> Result<String>;
    /// Resolves once no request has been in flight for a short quiet period.
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<()>;
    /// Controls, hidden inputs and editable regions, including those inside
    /// shadow roots at any depth.
    async fn input_fields(&self) -> Result<Vec<InputField>>;
    /// Visible, enabled interactive elements of the top-level document.
    async fn interactive_elements(&self) -> Result<Vec<ElementSnapshot>>;
    async fn forms(&self) -> Result<Vec<FormSnapshot>>;
    /// Visible inputs that look like search boxes.
    async fn search_inputs(&self) -> Result<Vec<ElementSnapshot>>;
    async fn interact(
        &self,
        element_ref: &str,
        interaction: &Interaction,
        timeout: Duration,
    ) -> Result<()>;
    async fn sink_calls(&self) -> Result<Vec<SinkCall>>;
    /// Absolute `href`s of every anchor on the page.
    async fn links(&self) -> Result<Vec<String>>;
    async fn close(self: Box<Self>) -> Result<()>;
}
