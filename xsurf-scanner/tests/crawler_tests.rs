// Orchestrator tests driven by the scripted renderer

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use xsurf_scanner::browser::{
    FieldKind, InputField, ObservedRequest, ScriptedElement, ScriptedPage, ScriptedRenderer,
    ScriptedSite,
};
use xsurf_scanner::writer::SurfaceRecord;
use xsurf_scanner::{PageContext, ParamType, Renderer, ResultWriter, ScanConfig, Source, SurfaceCrawler};

fn fast_config() -> ScanConfig {
    ScanConfig::new()
        .with_settle_delay(Duration::ZERO)
        .with_idle_timeout(Duration::from_millis(10))
        .with_navigation_timeout(Duration::from_secs(1))
}

fn named_input(name: &str) -> InputField {
    let mut field = InputField::new(FieldKind::Control, "input");
    field.input_type = Some("text".to_string());
    field.name = Some(name.to_string());
    field
}

fn crawler(renderer: &ScriptedRenderer, config: ScanConfig) -> SurfaceCrawler {
    SurfaceCrawler::new(Arc::new(renderer.clone()), config)
}

fn param_names(result: &xsurf_scanner::CrawlResult) -> Vec<&str> {
    result.surfaces.iter().map(|s| s.param_name()).collect()
}

// ============================================================================
// Full page pipeline
// ============================================================================

#[tokio::test]
async fn test_every_analyzer_contributes_surfaces() {
    let home = ScriptedPage::new()
        .with_load_request(ObservedRequest::new("GET", "https://shop.test/api/config?lang=en"))
        .with_input(named_input("q"))
        .with_element(
            ScriptedElement::button("more", "Load more")
                .emits(ObservedRequest::new("GET", "https://shop.test/api/items?page=2")),
        )
        .with_link("/products/42")
        .with_sink_call("eval", "var r = params.redirect;");
    let site = ScriptedSite::new()
        .page("https://shop.test/", home)
        .page("https://shop.test/products/42", ScriptedPage::new());
    let renderer = ScriptedRenderer::new(site);

    let result = crawler(&renderer, fast_config())
        .crawl("https://shop.test/")
        .await
        .unwrap();

    assert_eq!(result.pages_crawled, 2);
    assert!(result.errors.is_empty(), "errors: {:?}", result.errors);
    let names = param_names(&result);
    for expected in ["lang", "q", "page", "redirect", "42"] {
        assert!(names.contains(&expected), "missing {} in {:?}", expected, names);
    }

    let page = result.surfaces.iter().find(|s| s.param_name() == "page").unwrap();
    assert_eq!(page.source(), Source::TrafficAfterInteraction);
    let id = result.surfaces.iter().find(|s| s.param_name() == "42").unwrap();
    assert_eq!(id.param_type(), ParamType::Path);
}

#[tokio::test]
async fn test_listeners_are_installed_before_navigation_and_contexts_released() {
    let site = ScriptedSite::new()
        .page("https://shop.test/", ScriptedPage::new().with_link("/about"))
        .page("https://shop.test/about", ScriptedPage::new());
    let renderer = ScriptedRenderer::new(site);

    crawler(&renderer, fast_config())
        .crawl("https://shop.test/")
        .await
        .unwrap();

    let events = renderer.events();
    assert_eq!(
        &events[..4],
        &[
            "init_script".to_string(),
            "request_listener".to_string(),
            "response_listener".to_string(),
            "navigate https://shop.test/".to_string(),
        ]
    );
    assert_eq!(renderer.contexts_opened(), 2);
    assert_eq!(renderer.active_contexts(), 0);
    assert_eq!(events.iter().filter(|e| *e == "close").count(), 2);
}

#[tokio::test]
async fn test_redirect_target_is_analyzed() {
    let site = ScriptedSite::new().page(
        "https://shop.test/go",
        ScriptedPage::new().redirect_to("https://shop.test/landing?campaign=spring"),
    );
    let renderer = ScriptedRenderer::new(site);

    let result = crawler(&renderer, fast_config())
        .crawl("https://shop.test/go")
        .await
        .unwrap();

    assert_eq!(param_names(&result), vec!["campaign"]);
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test]
async fn test_navigation_timeout_keeps_partial_dom() {
    let slow = ScriptedPage::new()
        .with_load_delay(Duration::from_secs(5))
        .with_input(named_input("email"));
    let renderer = ScriptedRenderer::new(ScriptedSite::new().page("https://shop.test/", slow));
    let config = fast_config().with_navigation_timeout(Duration::from_millis(50));

    let result = crawler(&renderer, config).crawl("https://shop.test/").await.unwrap();

    assert!(result.errors.is_empty());
    assert_eq!(param_names(&result), vec!["email"]);
}

#[tokio::test]
async fn test_failed_page_does_not_cancel_its_batch() {
    let site = ScriptedSite::new()
        .page(
            "https://shop.test/",
            ScriptedPage::new().with_link("/bad").with_link("/good"),
        )
        .page("https://shop.test/bad", ScriptedPage::new().failing())
        .page(
            "https://shop.test/good",
            ScriptedPage::new().with_input(named_input("comment")),
        );
    let renderer = ScriptedRenderer::new(site);

    let result = crawler(&renderer, fast_config()).crawl("https://shop.test/").await.unwrap();

    assert_eq!(result.pages_crawled, 3);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("https://shop.test/bad"));
    assert!(param_names(&result).contains(&"comment"));
    assert_eq!(renderer.active_contexts(), 0);
}

/// Hands out one working context, then panics.
struct PanicsAfterFirstContext {
    inner: ScriptedRenderer,
    calls: AtomicUsize,
}

#[async_trait]
impl Renderer for PanicsAfterFirstContext {
    async fn new_context(&self) -> xsurf_scanner::error::Result<Box<dyn PageContext>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            panic!("renderer crashed");
        }
        self.inner.new_context().await
    }

    async fn shutdown(&self) -> xsurf_scanner::error::Result<()> {
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.inner.active_contexts()
    }
}

#[tokio::test]
async fn test_panicked_page_is_counted_and_reported() {
    let site = ScriptedSite::new()
        .page(
            "https://shop.test/",
            ScriptedPage::new().with_input(named_input("q")).with_link("/cart"),
        )
        .page("https://shop.test/cart", ScriptedPage::new());
    let renderer = PanicsAfterFirstContext {
        inner: ScriptedRenderer::new(site),
        calls: AtomicUsize::new(0),
    };

    let result = SurfaceCrawler::new(Arc::new(renderer), fast_config())
        .crawl("https://shop.test/")
        .await
        .unwrap();

    assert_eq!(result.pages_crawled, 2);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("https://shop.test/cart"));
    assert!(result.errors[0].contains("panicked"));
    assert_eq!(param_names(&result), vec!["q"]);
}

#[tokio::test]
async fn test_invalid_target_is_an_error() {
    let renderer = ScriptedRenderer::new(ScriptedSite::new());
    assert!(crawler(&renderer, fast_config()).crawl("not a url").await.is_err());
}

// ============================================================================
// Queue bounds and scope
// ============================================================================

#[tokio::test]
async fn test_max_pages_bounds_the_queue() {
    let mut home = ScriptedPage::new();
    let mut site = ScriptedSite::new();
    for i in 1..=5 {
        home = home.with_link(&format!("/p{}", i));
        site = site.page(&format!("https://shop.test/p{}", i), ScriptedPage::new());
    }
    let renderer = ScriptedRenderer::new(site.page("https://shop.test/", home));

    let result = crawler(&renderer, fast_config().with_max_pages(3))
        .crawl("https://shop.test/")
        .await
        .unwrap();

    assert_eq!(result.pages_crawled, 3);
    assert_eq!(renderer.contexts_opened(), 3);
}

#[tokio::test]
async fn test_links_outside_scope_and_depth_are_not_followed() {
    let site = ScriptedSite::new()
        .page(
            "https://shop.test/",
            ScriptedPage::new()
                .with_link("https://elsewhere.test/x")
                .with_link("https://api.shop.test/docs")
                .with_link("/level1"),
        )
        .page("https://api.shop.test/docs", ScriptedPage::new())
        .page("https://shop.test/level1", ScriptedPage::new().with_link("/level2"))
        .page("https://shop.test/level2", ScriptedPage::new());
    let renderer = ScriptedRenderer::new(site);

    let result = crawler(&renderer, fast_config().with_max_link_depth(1))
        .crawl("https://shop.test/")
        .await
        .unwrap();

    // seed, subdomain and level1; level2 is two hops away
    assert_eq!(result.pages_crawled, 3);
    let events = renderer.events();
    assert!(!events.iter().any(|e| e.contains("elsewhere.test")));
    assert!(!events.iter().any(|e| e.contains("level2")));
}

#[tokio::test]
async fn test_scoped_mode_drops_third_party_traffic() {
    let page = || {
        ScriptedPage::new()
            .with_load_request(ObservedRequest::new("GET", "https://cdn.other.net/track?uid=7"))
            .with_load_request(ObservedRequest::new("GET", "https://shop.test/api/cart?id=1"))
    };

    let renderer = ScriptedRenderer::new(ScriptedSite::new().page("https://shop.test/", page()));
    let scoped = crawler(&renderer, fast_config().with_capture_cross_origin(false))
        .crawl("https://shop.test/")
        .await
        .unwrap();
    assert_eq!(param_names(&scoped), vec!["id"]);

    let renderer = ScriptedRenderer::new(ScriptedSite::new().page("https://shop.test/", page()));
    let capture_all = crawler(&renderer, fast_config())
        .crawl("https://shop.test/")
        .await
        .unwrap();
    let uid = capture_all
        .surfaces
        .iter()
        .find(|s| s.param_name() == "uid")
        .unwrap();
    assert!(uid.is_cross_origin());
}

// ============================================================================
// Incremental persistence
// ============================================================================

#[tokio::test]
async fn test_scan_timeout_leaves_persisted_surfaces_intact() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("result.json");
    let writer = Arc::new(ResultWriter::new(&path).unwrap());

    let site = ScriptedSite::new()
        .page(
            "https://shop.test/?ref=home",
            ScriptedPage::new().with_link("/slow"),
        )
        .page(
            "https://shop.test/slow",
            ScriptedPage::new()
                .with_load_delay(Duration::from_secs(10))
                .with_input(named_input("never")),
        );
    let renderer = ScriptedRenderer::new(site);
    let config = fast_config()
        .with_concurrency(1)
        .with_navigation_timeout(Duration::from_secs(30))
        .with_global_timeout(Duration::from_millis(500));

    let result = crawler(&renderer, config)
        .with_writer(writer.clone())
        .crawl("https://shop.test/?ref=home")
        .await
        .unwrap();

    assert!(result.timed_out);
    assert_eq!(result.pages_crawled, 1);

    let content = std::fs::read_to_string(&path).unwrap();
    let records: Vec<SurfaceRecord> = serde_json::from_str(&content).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].param_name, "ref");
    assert_eq!(records[0].base_url, "https://shop.test/?ref=home");
}

#[tokio::test]
async fn test_progress_callback_sees_every_page() {
    let site = ScriptedSite::new()
        .page("https://shop.test/", ScriptedPage::new().with_link("/a"))
        .page("https://shop.test/a", ScriptedPage::new());
    let renderer = ScriptedRenderer::new(site);
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();

    crawler(&renderer, fast_config())
        .with_progress_callback(Arc::new(move |n, url| sink.lock().unwrap().push((n, url))))
        .crawl("https://shop.test/")
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            (1, "https://shop.test/".to_string()),
            (2, "https://shop.test/a".to_string())
        ]
    );
}
