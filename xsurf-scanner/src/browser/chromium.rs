//! Chromium binding using chromiumoxide.
//!
//! Every [`PageContext`] is its own CDP browser context, so pages processed
//! concurrently never share cookies or storage. Network observation is driven
//! by one event task per page that feeds the registered listeners and keeps
//! the in-flight request count used for idle detection.

use super::{
    ElementSnapshot, FormSnapshot, InputField, Interaction, NavigationResult, ObservedRequest,
    ObservedResponse, PageContext, Renderer, RequestListener, ResponseListener, SinkCall, scripts,
};
use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{BrowserContextId, CloseParams};
use chromiumoxide::cdp::browser_protocol::network::{
    self, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
    GetResponseBodyParams, Headers, RequestId, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Quiet period after the last request before the network counts as idle.
const NETWORK_QUIET: Duration = Duration::from_millis(500);
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Locate a Chromium binary: explicit path, `XSURF_CHROME_PATH`, then `PATH`.
pub fn find_chromium(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured
        && path.exists()
    {
        return Some(path.to_path_buf());
    }

    if let Ok(p) = std::env::var("XSURF_CHROME_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"]
        .iter()
        .find_map(|name| which::which(name).ok())
}

pub struct ChromiumRenderer {
    browser: Arc<Browser>,
    handler_task: JoinHandle<()>,
    active_count: Arc<AtomicUsize>,
    user_agent: Option<String>,
}

impl ChromiumRenderer {
    /// Launch Chromium with the settings in `config`. Failure here is fatal
    /// for the scan.
    pub async fn launch(config: &ScanConfig) -> Result<Self> {
        let chrome_path = find_chromium(config.chrome_path.as_deref()).ok_or_else(|| {
            ScanError::Browser(
                "Chromium not found; install Chrome/Chromium or set XSURF_CHROME_PATH".to_string(),
            )
        })?;
        debug!("Using Chromium at {}", chrome_path.display());

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking");
        builder = if config.headless {
            builder.arg("--headless=new")
        } else {
            builder.with_head()
        };
        let browser_config = builder
            .build()
            .map_err(|e| ScanError::Browser(format!("failed to build browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScanError::Browser(format!("failed to launch Chromium: {}", e)))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });
        info!("Chromium launched (headless: {})", config.headless);

        Ok(Self {
            browser: Arc::new(browser),
            handler_task,
            active_count: Arc::new(AtomicUsize::new(0)),
            user_agent: config.user_agent.clone(),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn PageContext>> {
        let context_id = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await?
            .result
            .browser_context_id;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(ScanError::Browser)?;
        let page = match self.browser.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                let _ = self
                    .browser
                    .execute(DisposeBrowserContextParams::new(context_id))
                    .await;
                return Err(e.into());
            }
        };

        if let Some(user_agent) = &self.user_agent {
            page.execute(SetUserAgentOverrideParams::new(user_agent.clone()))
                .await?;
        }
        page.execute(network::EnableParams::default()).await?;

        let shared = Arc::new(SharedState::default());
        let event_task = spawn_network_task(page.clone(), shared.clone()).await?;

        self.active_count.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ChromiumContext {
            browser: self.browser.clone(),
            context_id,
            page,
            shared,
            event_task,
            active_count: self.active_count.clone(),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        if let Err(e) = self.browser.execute(CloseParams::default()).await {
            debug!("Browser close returned {}", e);
        }
        self.handler_task.abort();
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Listeners {
    requests: Vec<Arc<dyn RequestListener>>,
    responses: Vec<Arc<dyn ResponseListener>>,
}

struct NetworkState {
    inflight: HashSet<RequestId>,
    last_activity: Instant,
    /// Script/JSON responses waiting for their body.
    pending: HashMap<RequestId, ObservedResponse>,
}

impl Default for NetworkState {
    fn default() -> Self {
        Self {
            inflight: HashSet::new(),
            last_activity: Instant::now(),
            pending: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct SharedState {
    listeners: Mutex<Listeners>,
    network: Mutex<NetworkState>,
}

impl SharedState {
    fn dispatch_request(&self, request: &ObservedRequest) {
        let listeners = self.listeners.lock().unwrap().requests.clone();
        for listener in listeners {
            listener.on_request(request);
        }
    }

    fn dispatch_response(&self, response: &ObservedResponse) {
        let listeners = self.listeners.lock().unwrap().responses.clone();
        for listener in listeners {
            listener.on_response(response);
        }
    }

    fn settle_request(&self, request_id: &RequestId) -> Option<ObservedResponse> {
        let mut network = self.network.lock().unwrap();
        network.inflight.remove(request_id);
        network.last_activity = Instant::now();
        network.pending.remove(request_id)
    }
}

async fn spawn_network_task(page: Page, shared: Arc<SharedState>) -> Result<JoinHandle<()>> {
    let mut requests = page.event_listener::<EventRequestWillBeSent>().await?;
    let mut responses = page.event_listener::<EventResponseReceived>().await?;
    let mut finished = page.event_listener::<EventLoadingFinished>().await?;
    let mut failed = page.event_listener::<EventLoadingFailed>().await?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = requests.next() => {
                    {
                        let mut network = shared.network.lock().unwrap();
                        network.inflight.insert(event.request_id.clone());
                        network.last_activity = Instant::now();
                    }
                    let request = ObservedRequest {
                        url: event.request.url.clone(),
                        method: event.request.method.to_uppercase(),
                        headers: header_map(&event.request.headers),
                        post_data: event.request.post_data.clone(),
                        resource_type: event
                            .r#type
                            .as_ref()
                            .map(|t| format!("{:?}", t).to_lowercase())
                            .unwrap_or_else(|| "other".to_string()),
                    };
                    shared.dispatch_request(&request);
                }
                Some(event) = responses.next() => {
                    let mut response = ObservedResponse::new(
                        event.response.url.clone(),
                        u16::try_from(event.response.status).unwrap_or(0),
                    );
                    response.headers = header_map(&event.response.headers);
                    let mime = event.response.mime_type.to_lowercase();
                    if mime.contains("json") || mime.contains("javascript") {
                        shared
                            .network
                            .lock()
                            .unwrap()
                            .pending
                            .insert(event.request_id.clone(), response);
                    } else {
                        shared.dispatch_response(&response);
                    }
                }
                Some(event) = finished.next() => {
                    if let Some(response) = shared.settle_request(&event.request_id) {
                        let page = page.clone();
                        let request_id = event.request_id.clone();
                        let url = response.url.clone();
                        dispatch_with_body(shared.clone(), response, async move {
                            match page.execute(GetResponseBodyParams::new(request_id)).await {
                                Ok(body) if !body.result.base64_encoded => Some(body.result.body.clone()),
                                Ok(_) => None,
                                Err(e) => {
                                    debug!("No body for {}: {}", url, e);
                                    None
                                }
                            }
                        });
                    }
                }
                Some(event) = failed.next() => {
                    shared.settle_request(&event.request_id);
                }
                else => break,
            }
        }
    }))
}

/// Fetch a response body on its own task, then hand the response to the
/// listeners. The event loop keeps draining while the body is in transit.
fn dispatch_with_body<F>(shared: Arc<SharedState>, mut response: ObservedResponse, body: F) -> JoinHandle<()>
where
    F: Future<Output = Option<String>> + Send + 'static,
{
    tokio::spawn(async move {
        response.body = body.await;
        shared.dispatch_response(&response);
    })
}

fn header_map(headers: &Headers) -> HashMap<String, String> {
    headers
        .inner()
        .as_object()
        .map(|object| {
            object
                .iter()
                .map(|(name, value)| {
                    let value = value
                        .as_str()
                        .map(String::from)
                        .unwrap_or_else(|| value.to_string());
                    (name.to_lowercase(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

pub struct ChromiumContext {
    browser: Arc<Browser>,
    context_id: BrowserContextId,
    page: Page,
    shared: Arc<SharedState>,
    event_task: JoinHandle<()>,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumContext {
    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| ScanError::Script(e.to_string()))?;
        result
            .into_value()
            .map_err(|e| ScanError::Script(format!("failed to convert result: {:?}", e)))
    }
}

#[async_trait]
impl PageContext for ChromiumContext {
    async fn add_init_script(&mut self, source: &str) -> Result<()> {
        self.page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(source))
            .await?;
        Ok(())
    }

    async fn on_request(&mut self, listener: Arc<dyn RequestListener>) -> Result<()> {
        self.shared.listeners.lock().unwrap().requests.push(listener);
        Ok(())
    }

    async fn on_response(&mut self, listener: Arc<dyn ResponseListener>) -> Result<()> {
        self.shared.listeners.lock().unwrap().responses.push(listener);
        Ok(())
    }

    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<NavigationResult> {
        let start = Instant::now();
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(ScanError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(ScanError::NavigationTimeout {
                    url: url.to_string(),
                    timeout,
                });
            }
        }

        let final_url = self.current_url().await.unwrap_or_else(|_| url.to_string());
        Ok(NavigationResult {
            final_url,
            load_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self
            .page
            .url()
            .await?
            .map(|u| u.to_string())
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let network = self.shared.network.lock().unwrap();
                if network.inflight.is_empty() && network.last_activity.elapsed() >= NETWORK_QUIET {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(ScanError::Timeout(timeout));
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    async fn input_fields(&self) -> Result<Vec<InputField>> {
        self.eval(scripts::input_fields()).await
    }

    async fn interactive_elements(&self) -> Result<Vec<ElementSnapshot>> {
        self.eval(scripts::interactive_elements()).await
    }

    async fn forms(&self) -> Result<Vec<FormSnapshot>> {
        self.eval(scripts::forms()).await
    }

    async fn search_inputs(&self) -> Result<Vec<ElementSnapshot>> {
        self.eval(scripts::search_inputs()).await
    }

    async fn interact(
        &self,
        element_ref: &str,
        interaction: &Interaction,
        timeout: Duration,
    ) -> Result<()> {
        let script = scripts::interaction(element_ref, interaction);
        let outcome: String = tokio::time::timeout(timeout, self.eval(script))
            .await
            .map_err(|_| ScanError::Timeout(timeout))??;
        match outcome.as_str() {
            scripts::OK => Ok(()),
            scripts::DETACHED => Err(ScanError::ElementDetached(element_ref.to_string())),
            other => Err(ScanError::Interaction(format!(
                "{} on {}: {}",
                interaction.verb(),
                element_ref,
                other
            ))),
        }
    }

    async fn sink_calls(&self) -> Result<Vec<SinkCall>> {
        self.eval(scripts::sink_calls()).await
    }

    async fn links(&self) -> Result<Vec<String>> {
        self.eval(scripts::links()).await
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.event_task.abort();
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        if let Err(e) = self.page.close().await {
            debug!("Page close returned {}", e);
        }
        if let Err(e) = self
            .browser
            .execute(DisposeBrowserContextParams::new(self.context_id))
            .await
        {
            warn!("Failed to dispose browser context: {}", e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::TrafficInterceptor;

    #[test]
    fn test_missing_configured_path_is_ignored() {
        let missing = Path::new("/definitely/not/a/chrome");
        assert_ne!(find_chromium(Some(missing)), Some(missing.to_path_buf()));
    }

    #[test]
    fn test_header_map_lowercases_names() {
        let headers = Headers::new(serde_json::json!({"Content-Type": "application/json", "X-Count": 3}));
        let map = header_map(&headers);
        assert_eq!(map["content-type"], "application/json");
        assert_eq!(map["x-count"], "3");
    }

    #[derive(Default)]
    struct RecordingListener(Mutex<Vec<ObservedResponse>>);

    impl ResponseListener for RecordingListener {
        fn on_response(&self, response: &ObservedResponse) {
            self.0.lock().unwrap().push(response.clone());
        }
    }

    #[tokio::test]
    async fn test_slow_body_does_not_hold_up_request_bookkeeping() {
        let shared = Arc::new(SharedState::default());
        let listener = Arc::new(RecordingListener::default());
        shared.listeners.lock().unwrap().responses.push(listener.clone());

        let id = RequestId::new("req-1");
        {
            let mut network = shared.network.lock().unwrap();
            network.inflight.insert(id.clone());
            network
                .pending
                .insert(id.clone(), ObservedResponse::new("https://example.com/api/data.json", 200));
        }

        let response = shared.settle_request(&id).unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<String>();
        let task = dispatch_with_body(shared.clone(), response, async move { rx.await.ok() });

        // the request is settled while its body is still outstanding
        assert!(shared.network.lock().unwrap().inflight.is_empty());
        assert!(listener.0.lock().unwrap().is_empty());

        tx.send(r#"{"ok":true}"#.to_string()).unwrap();
        task.await.unwrap();
        let seen = listener.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].body.as_deref(), Some(r#"{"ok":true}"#));
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_context_lifecycle() {
        let renderer = ChromiumRenderer::launch(&ScanConfig::default())
            .await
            .expect("failed to launch Chromium");
        let mut ctx = renderer.new_context().await.expect("failed to create context");
        assert_eq!(renderer.active_contexts(), 1);

        let interceptor = Arc::new(TrafficInterceptor::new("about:blank", None, vec![]));
        ctx.on_request(interceptor).await.expect("listener");
        ctx.navigate(
            "data:text/html,<form><input name=q><button>Go</button></form>",
            Duration::from_secs(10),
        )
        .await
        .expect("navigation failed");

        let fields = ctx.input_fields().await.expect("input fields");
        assert_eq!(fields[0].name.as_deref(), Some("q"));
        let forms = ctx.forms().await.expect("forms");
        assert_eq!(forms.len(), 1);
        assert!(forms[0].submit.is_some());

        let field_ref = forms[0].fields[0].element_ref.clone();
        ctx.interact(&field_ref, &Interaction::Fill("hello".into()), Duration::from_secs(2))
            .await
            .expect("fill failed");
        let missing = ctx
            .interact("x-missing", &Interaction::Click, Duration::from_secs(2))
            .await;
        assert!(matches!(missing, Err(ScanError::ElementDetached(_))));

        ctx.close().await.expect("close failed");
        assert_eq!(renderer.active_contexts(), 0);
        renderer.shutdown().await.expect("shutdown failed");
    }
}
