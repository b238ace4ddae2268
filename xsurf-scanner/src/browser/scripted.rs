//! Deterministic in-memory renderer.
//!
//! Serves a fixed site model: pages with inputs, forms, links and interactive
//! elements that emit requests and reveal further elements when interacted
//! with. Drives the orchestrator and interaction engine without a browser.

use super::{
    ElementSnapshot, FormSnapshot, InputField, Interaction, NavigationResult, ObservedRequest,
    ObservedResponse, PageContext, Renderer, RequestListener, ResponseListener, SinkCall,
};
use crate::error::{Result, ScanError};
use crate::url_utils::normalize_url;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct ScriptedElement {
    pub snapshot: ElementSnapshot,
    /// Requests fired when the element is interacted with.
    pub requests: Vec<ObservedRequest>,
    /// Elements attached to the document after the interaction.
    pub reveals: Vec<ScriptedElement>,
    pub fails: bool,
}

impl ScriptedElement {
    pub fn new(element_ref: &str, tag: &str, text: &str) -> Self {
        let snapshot = ElementSnapshot {
            element_ref: element_ref.to_string(),
            tag: tag.to_string(),
            text: text.to_string(),
            selector: tag.to_string(),
            bbox: super::BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 80.0,
                height: 24.0,
            },
            visible: true,
            enabled: true,
            ..Default::default()
        };
        Self {
            snapshot,
            ..Default::default()
        }
    }

    pub fn button(element_ref: &str, text: &str) -> Self {
        Self::new(element_ref, "button", text)
    }

    pub fn link(element_ref: &str, text: &str, href: &str) -> Self {
        let mut element = Self::new(element_ref, "a", text);
        element.snapshot.href = Some(href.to_string());
        element
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.snapshot.id = Some(id.to_string());
        self.snapshot.selector = format!("#{}", id);
        self
    }

    pub fn with_selector(mut self, selector: &str) -> Self {
        self.snapshot.selector = selector.to_string();
        self
    }

    pub fn with_classes(mut self, classes: &[&str]) -> Self {
        self.snapshot.classes = classes.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.snapshot.bbox.x = x;
        self.snapshot.bbox.y = y;
        self
    }

    pub fn with_mouseover(mut self) -> Self {
        self.snapshot.has_mouseover = true;
        self
    }

    pub fn with_change_handler(mut self) -> Self {
        self.snapshot.has_change = true;
        self
    }

    pub fn with_input_type(mut self, input_type: &str) -> Self {
        self.snapshot.input_type = Some(input_type.to_string());
        self
    }

    pub fn emits(mut self, request: ObservedRequest) -> Self {
        self.requests.push(request);
        self
    }

    pub fn reveals(mut self, element: ScriptedElement) -> Self {
        self.reveals.push(element);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fails = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedForm {
    pub snapshot: FormSnapshot,
    /// Requests fired when the form is submitted by either route.
    pub on_submit: Vec<ObservedRequest>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedPage {
    pub final_url: Option<String>,
    pub load_delay: Option<Duration>,
    pub fail_navigation: bool,
    pub inputs: Vec<InputField>,
    pub elements: Vec<ScriptedElement>,
    pub forms: Vec<ScriptedForm>,
    pub search_inputs: Vec<ScriptedElement>,
    pub links: Vec<String>,
    /// Requests fired while the page loads.
    pub load_requests: Vec<ObservedRequest>,
    /// Responses delivered for requests with a matching URL.
    pub responses: Vec<ObservedResponse>,
    /// Calls the sink hooks observe, if they were installed.
    pub sink_calls: Vec<SinkCall>,
}

impl ScriptedPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn redirect_to(mut self, url: &str) -> Self {
        self.final_url = Some(url.to_string());
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    pub fn with_input(mut self, input: InputField) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_element(mut self, element: ScriptedElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn with_form(mut self, form: ScriptedForm) -> Self {
        self.forms.push(form);
        self
    }

    pub fn with_search_input(mut self, element: ScriptedElement) -> Self {
        self.search_inputs.push(element);
        self
    }

    pub fn with_link(mut self, href: &str) -> Self {
        self.links.push(href.to_string());
        self
    }

    pub fn with_load_request(mut self, request: ObservedRequest) -> Self {
        self.load_requests.push(request);
        self
    }

    pub fn with_response(mut self, response: ObservedResponse) -> Self {
        self.responses.push(response);
        self
    }

    pub fn with_sink_call(mut self, function: &str, argument: &str) -> Self {
        self.sink_calls.push(SinkCall {
            function: function.to_string(),
            argument: argument.to_string(),
            timestamp: 0.0,
        });
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedSite {
    pages: HashMap<String, ScriptedPage>,
}

impl ScriptedSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, page: ScriptedPage) -> Self {
        self.pages.insert(normalize_url(url), page);
        self
    }

    fn lookup(&self, url: &str) -> Option<&ScriptedPage> {
        self.pages.get(&normalize_url(url))
    }
}

/// Renderer over a [`ScriptedSite`]. Counters are shared by every context it
/// creates.
#[derive(Clone)]
pub struct ScriptedRenderer {
    site: Arc<ScriptedSite>,
    active: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
    interactions: Arc<AtomicUsize>,
    events: Arc<Mutex<Vec<String>>>,
}

impl ScriptedRenderer {
    pub fn new(site: ScriptedSite) -> Self {
        Self {
            site: Arc::new(site),
            active: Arc::new(AtomicUsize::new(0)),
            opened: Arc::new(AtomicUsize::new(0)),
            interactions: Arc::new(AtomicUsize::new(0)),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of `interact` calls that reached an attached element.
    pub fn interactions(&self) -> usize {
        self.interactions.load(Ordering::SeqCst)
    }

    pub fn contexts_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Ordered log of setup calls, navigations and interactions.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// A context that is not registered as opened, for driving analyzers directly.
    pub fn context(&self) -> ScriptedContext {
        ScriptedContext {
            site: self.site.clone(),
            active: self.active.clone(),
            interactions: self.interactions.clone(),
            events: self.events.clone(),
            state: Mutex::new(ContextState::default()),
        }
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn new_context(&self) -> Result<Box<dyn PageContext>> {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.context()))
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct ContextState {
    requested_url: Option<String>,
    page: Option<ScriptedPage>,
    live_elements: Vec<ScriptedElement>,
    hooks_installed: bool,
    request_listeners: Vec<Arc<dyn RequestListener>>,
    response_listeners: Vec<Arc<dyn ResponseListener>>,
}

pub struct ScriptedContext {
    site: Arc<ScriptedSite>,
    active: Arc<AtomicUsize>,
    interactions: Arc<AtomicUsize>,
    events: Arc<Mutex<Vec<String>>>,
    state: Mutex<ContextState>,
}

impl ScriptedContext {
    fn log(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn dispatch(&self, requests: &[ObservedRequest]) {
        if requests.is_empty() {
            return;
        }
        let (request_listeners, response_listeners, responses) = {
            let state = self.state.lock().unwrap();
            (
                state.request_listeners.clone(),
                state.response_listeners.clone(),
                state
                    .page
                    .as_ref()
                    .map(|p| p.responses.clone())
                    .unwrap_or_default(),
            )
        };

        for request in requests {
            for listener in &request_listeners {
                listener.on_request(request);
            }
            for response in responses.iter().filter(|r| r.url == request.url) {
                for listener in &response_listeners {
                    listener.on_response(response);
                }
            }
        }
    }

    /// Requests triggered by interacting with `element_ref`, plus any
    /// elements it reveals.
    fn resolve_interaction(
        &self,
        element_ref: &str,
        interaction: &Interaction,
    ) -> Result<(Vec<ObservedRequest>, Vec<ScriptedElement>)> {
        let state = self.state.lock().unwrap();
        let page = state
            .page
            .as_ref()
            .ok_or_else(|| ScanError::Interaction("no page loaded".to_string()))?;

        if let Some(element) = state
            .live_elements
            .iter()
            .chain(page.search_inputs.iter())
            .find(|e| e.snapshot.element_ref == element_ref)
        {
            if element.fails {
                return Err(ScanError::Interaction(format!(
                    "{} on {} failed",
                    interaction.verb(),
                    element_ref
                )));
            }
            let is_search = page
                .search_inputs
                .iter()
                .any(|s| s.snapshot.element_ref == element_ref);
            // search boxes only fire when submitted
            if is_search && *interaction != Interaction::PressEnter {
                return Ok((Vec::new(), Vec::new()));
            }
            return Ok((element.requests.clone(), element.reveals.clone()));
        }

        for form in &page.forms {
            let submits_form = form.snapshot.element_ref == element_ref
                || form
                    .snapshot
                    .submit
                    .as_ref()
                    .is_some_and(|s| s.element_ref == element_ref);
            if submits_form {
                return Ok((form.on_submit.clone(), Vec::new()));
            }
            if form
                .snapshot
                .fields
                .iter()
                .any(|f| f.element_ref == element_ref)
            {
                return Ok((Vec::new(), Vec::new()));
            }
        }

        Err(ScanError::ElementDetached(element_ref.to_string()))
    }
}

#[async_trait]
impl PageContext for ScriptedContext {
    async fn add_init_script(&mut self, _source: &str) -> Result<()> {
        self.log("init_script".to_string());
        self.state.lock().unwrap().hooks_installed = true;
        Ok(())
    }

    async fn on_request(&mut self, listener: Arc<dyn RequestListener>) -> Result<()> {
        self.log("request_listener".to_string());
        self.state.lock().unwrap().request_listeners.push(listener);
        Ok(())
    }

    async fn on_response(&mut self, listener: Arc<dyn ResponseListener>) -> Result<()> {
        self.log("response_listener".to_string());
        self.state.lock().unwrap().response_listeners.push(listener);
        Ok(())
    }

    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<NavigationResult> {
        let start = Instant::now();
        self.log(format!("navigate {}", url));

        let page = self.site.lookup(url).cloned().ok_or_else(|| ScanError::Navigation {
            url: url.to_string(),
            reason: "404 Not Found".to_string(),
        })?;
        if page.fail_navigation {
            return Err(ScanError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_CONNECTION_REFUSED".to_string(),
            });
        }

        let delay = page.load_delay.unwrap_or_default();
        {
            let mut state = self.state.lock().unwrap();
            state.requested_url = Some(url.to_string());
            state.live_elements = page.elements.clone();
            state.page = Some(page.clone());
        }

        self.dispatch(&page.load_requests);

        if delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(ScanError::NavigationTimeout {
                url: url.to_string(),
                timeout,
            });
        }
        tokio::time::sleep(delay).await;

        Ok(NavigationResult {
            final_url: page.final_url.clone().unwrap_or_else(|| url.to_string()),
            load_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn current_url(&self) -> Result<String> {
        let state = self.state.lock().unwrap();
        let page_url = state
            .page
            .as_ref()
            .and_then(|p| p.final_url.clone())
            .or_else(|| state.requested_url.clone());
        Ok(page_url.unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn input_fields(&self) -> Result<Vec<InputField>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .page
            .as_ref()
            .map(|p| p.inputs.clone())
            .unwrap_or_default())
    }

    async fn interactive_elements(&self) -> Result<Vec<ElementSnapshot>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .live_elements
            .iter()
            .filter(|e| e.snapshot.visible && e.snapshot.enabled)
            .map(|e| e.snapshot.clone())
            .collect())
    }

    async fn forms(&self) -> Result<Vec<FormSnapshot>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .page
            .as_ref()
            .map(|p| p.forms.iter().map(|f| f.snapshot.clone()).collect())
            .unwrap_or_default())
    }

    async fn search_inputs(&self) -> Result<Vec<ElementSnapshot>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .page
            .as_ref()
            .map(|p| {
                p.search_inputs
                    .iter()
                    .filter(|e| e.snapshot.visible)
                    .map(|e| e.snapshot.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn interact(
        &self,
        element_ref: &str,
        interaction: &Interaction,
        _timeout: Duration,
    ) -> Result<()> {
        let (requests, revealed) = self.resolve_interaction(element_ref, interaction)?;
        self.interactions.fetch_add(1, Ordering::SeqCst);
        self.log(format!("{} {}", interaction.verb(), element_ref));

        if !revealed.is_empty() {
            let mut state = self.state.lock().unwrap();
            for element in revealed {
                let attached = state
                    .live_elements
                    .iter()
                    .any(|e| e.snapshot.element_ref == element.snapshot.element_ref);
                if !attached {
                    state.live_elements.push(element);
                }
            }
        }

        self.dispatch(&requests);
        Ok(())
    }

    async fn sink_calls(&self) -> Result<Vec<SinkCall>> {
        let state = self.state.lock().unwrap();
        if !state.hooks_installed {
            return Ok(Vec::new());
        }
        Ok(state
            .page
            .as_ref()
            .map(|p| p.sink_calls.clone())
            .unwrap_or_default())
    }

    async fn links(&self) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .page
            .as_ref()
            .map(|p| p.links.clone())
            .unwrap_or_default())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.log("close".to_string());
        let _ = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        Ok(())
    }
}
