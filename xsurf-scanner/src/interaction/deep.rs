use super::sweeps::{interact_with_timeout, probe_search_inputs, submit_forms};
use super::{InteractionConfig, InteractionNode, choose_interaction, element_fingerprint};
use crate::analyzers::traffic::{Attribution, TrafficInterceptor};
use crate::browser::{ElementSnapshot, Interaction, PageContext};
use crate::dedup::GlobalDedup;
use crate::error::Result;
use crate::model::{Source, Surface};
use crate::url_utils::resolve_link;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

/// What one page's exploration produced. Failures never abort exploration;
/// they are counted here instead.
#[derive(Debug, Default, Clone)]
pub struct ExplorationReport {
    /// Surfaces captured while exploring, in capture order.
    pub surfaces: Vec<Surface>,
    pub actions_performed: usize,
    pub nodes_discovered: usize,
    /// Nodes rejected by page-local or scan-wide dedup.
    pub nodes_skipped: usize,
    pub failures: usize,
    pub timed_out: bool,
    pub errors: Vec<String>,
}

/// Depth-bounded breadth-first exploration of a page's interactive elements.
///
/// One engine serves every page of a scan; the per-page state (queue,
/// visited and known fingerprints) lives inside [`explore`](Self::explore)
/// while the [`GlobalDedup`] is shared with every other page worker.
pub struct DeepInteractionEngine {
    config: InteractionConfig,
    dedup: Arc<GlobalDedup>,
}

struct PageState {
    queue: VecDeque<InteractionNode>,
    visited: HashSet<String>,
    known: HashSet<String>,
}

impl DeepInteractionEngine {
    pub fn new(config: InteractionConfig, dedup: Arc<GlobalDedup>) -> Self {
        Self { config, dedup }
    }

    pub fn config(&self) -> &InteractionConfig {
        &self.config
    }

    /// Explore `ctx` until the queue drains, the action budget is spent or
    /// `budget` elapses. Traffic provoked along the way is attributed
    /// through `interceptor`.
    pub async fn explore(
        &self,
        ctx: &dyn PageContext,
        interceptor: &TrafficInterceptor,
        page_url: &str,
        budget: Option<Duration>,
    ) -> ExplorationReport {
        let deadline = budget.map(|b| Instant::now() + b);
        let window_start = interceptor.captured_count();
        let mut report = ExplorationReport::default();

        let initial = match ctx.interactive_elements().await {
            Ok(elements) => elements,
            Err(e) => {
                report.errors.push(format!("element discovery failed on {}: {}", page_url, e));
                return report;
            }
        };

        let mut state = PageState {
            queue: VecDeque::new(),
            visited: HashSet::new(),
            known: initial.iter().map(element_fingerprint).collect(),
        };
        for element in initial {
            state.queue.push_back(InteractionNode::new(
                page_url,
                element,
                0,
                vec!["page_load".to_string()],
            ));
        }
        report.nodes_discovered = state.queue.len();
        debug!("Exploring {} with {} initial nodes", page_url, report.nodes_discovered);

        while let Some(node) = state.queue.pop_front() {
            if report.actions_performed >= self.config.max_actions {
                debug!("Action budget of {} reached on {}", self.config.max_actions, page_url);
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                report.timed_out = true;
                debug!("Exploration budget elapsed on {}", page_url);
                break;
            }

            if !state.visited.insert(node.fingerprint.clone()) {
                report.nodes_skipped += 1;
                continue;
            }
            if !self.passes_global_gate(&node, page_url) {
                report.nodes_skipped += 1;
                continue;
            }

            self.run_sweeps(ctx, interceptor, &node).await;

            let interaction = choose_interaction(&node.element);
            let label = node.label(&interaction);
            let mut chain = node.trigger_chain.clone();
            chain.push(label.clone());
            interceptor.attribute(Attribution {
                depth: node.depth,
                trigger_chain: chain.clone(),
                action: label.clone(),
                source: Source::TrafficAfterInteraction,
            });

            report.actions_performed += 1;
            if let Err(e) = self.perform(ctx, &node.element, &interaction).await {
                debug!("{} failed on {}: {}", label, page_url, e);
                report.failures += 1;
                report.errors.push(format!("{}: {}", label, e));
                continue;
            }
            self.settle(ctx).await;

            if node.depth < self.config.max_depth {
                let added = self.discover(ctx, &mut state, page_url, node.depth + 1, &chain).await;
                report.nodes_discovered += added;
            }
        }

        report.surfaces = interceptor.captured().into_iter().skip(window_start).collect();
        info!(
            "Explored {}: {} actions, {} nodes, {} skipped, {} failures, {} surfaces",
            page_url,
            report.actions_performed,
            report.nodes_discovered,
            report.nodes_skipped,
            report.failures,
            report.surfaces.len()
        );
        report
    }

    async fn run_sweeps(&self, ctx: &dyn PageContext, interceptor: &TrafficInterceptor, node: &InteractionNode) {
        let base = Attribution {
            depth: node.depth,
            trigger_chain: node.trigger_chain.clone(),
            action: "form_sweep".to_string(),
            source: Source::TrafficAfterInteraction,
        };
        let timeout = self.config.interaction_timeout;
        let settle = self.config.settle_delay;
        let forms = submit_forms(ctx, interceptor, &base, timeout, settle).await;
        let search = probe_search_inputs(ctx, interceptor, &base, timeout, settle).await;
        if forms.submitted + search.submitted > 0 {
            debug!(
                "Sweeps submitted {} forms and {} search inputs",
                forms.submitted, search.submitted
            );
        }
    }

    /// Same-scheme links must lead to an unvisited URL, and the element
    /// must not have been clicked within its dedup scope.
    fn passes_global_gate(&self, node: &InteractionNode, page_url: &str) -> bool {
        if let Some(href) = node.element.href.as_deref()
            && let Some(target) = resolve_link(page_url, href)
            && same_scheme(page_url, &target)
            && !self.dedup.should_visit_url(&target)
        {
            return false;
        }
        self.dedup
            .should_click_element(&node.text, &node.selector, page_url)
    }

    async fn perform(&self, ctx: &dyn PageContext, element: &ElementSnapshot, interaction: &Interaction) -> Result<()> {
        let timeout = self.config.interaction_timeout;
        let result = interact_with_timeout(ctx, &element.element_ref, interaction, timeout).await;
        match (result, interaction) {
            // single-option selects
            (Err(_), Interaction::SelectOption(index)) if *index > 0 => {
                interact_with_timeout(ctx, &element.element_ref, &Interaction::SelectOption(0), timeout).await
            }
            (result, _) => result,
        }
    }

    async fn settle(&self, ctx: &dyn PageContext) {
        if self.config.settle_delay > Duration::ZERO {
            tokio::time::sleep(self.config.settle_delay).await;
        }
        let idle = self.config.idle_timeout;
        if let Ok(Err(e)) = tokio::time::timeout(idle, ctx.wait_for_network_idle(idle)).await {
            debug!("Network idle wait ended early: {}", e);
        }
    }

    /// Queue every element not seen before on this page. Returns how many
    /// were added.
    async fn discover(
        &self,
        ctx: &dyn PageContext,
        state: &mut PageState,
        page_url: &str,
        depth: usize,
        chain: &[String],
    ) -> usize {
        let elements = match ctx.interactive_elements().await {
            Ok(elements) => elements,
            Err(e) => {
                debug!("Element discovery failed on {}: {}", page_url, e);
                return 0;
            }
        };

        let mut added = 0;
        for element in elements {
            if state.known.insert(element_fingerprint(&element)) {
                state
                    .queue
                    .push_back(InteractionNode::new(page_url, element, depth, chain.to_vec()));
                added += 1;
            }
        }
        if added > 0 {
            debug!("Discovered {} new elements at depth {}", added, depth);
        }
        added
    }
}

fn same_scheme(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => a.scheme() == b.scheme(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{
        ObservedRequest, PageContext, ScriptedElement, ScriptedPage, ScriptedRenderer, ScriptedSite,
    };
    use crate::model::Source;

    const PAGE: &str = "https://example.com/app";

    fn config(max_depth: usize, max_actions: usize) -> InteractionConfig {
        InteractionConfig {
            max_depth,
            max_actions,
            interaction_timeout: Duration::from_secs(1),
            settle_delay: Duration::ZERO,
            idle_timeout: Duration::from_millis(10),
        }
    }

    async fn explore_page(
        renderer: &ScriptedRenderer,
        engine: &DeepInteractionEngine,
        url: &str,
    ) -> ExplorationReport {
        let mut ctx = renderer.context();
        let interceptor = Arc::new(TrafficInterceptor::new(url, None, vec![]));
        ctx.on_request(interceptor.clone()).await.unwrap();
        ctx.navigate(url, Duration::from_secs(1)).await.unwrap();
        engine.explore(&ctx, &interceptor, url, None).await
    }

    #[tokio::test]
    async fn test_depth_bound_stops_discovery() {
        let level3 = ScriptedElement::button("d", "Level three").at(0.0, 90.0);
        let level2 = ScriptedElement::button("c", "Level two").at(0.0, 60.0).reveals(level3);
        let level1 = ScriptedElement::button("b", "Level one").at(0.0, 30.0).reveals(level2);
        let root = ScriptedElement::button("a", "Open panel").reveals(level1);
        let site = ScriptedSite::new().page(PAGE, ScriptedPage::new().with_element(root));
        let renderer = ScriptedRenderer::new(site);
        let engine = DeepInteractionEngine::new(config(2, 50), Arc::new(GlobalDedup::new()));

        let report = explore_page(&renderer, &engine, PAGE).await;

        let events = renderer.events();
        assert!(events.contains(&"click a".to_string()));
        assert!(events.contains(&"click b".to_string()));
        assert!(events.contains(&"click c".to_string()));
        assert!(!events.contains(&"click d".to_string()));
        assert_eq!(report.actions_performed, 3);
        assert_eq!(report.nodes_discovered, 3);
    }

    #[tokio::test]
    async fn test_action_budget_is_never_exceeded() {
        let mut page = ScriptedPage::new();
        for i in 0..10 {
            page = page.with_element(
                ScriptedElement::button(&format!("b{}", i), &format!("Item {}", i)).at(0.0, i as f64 * 30.0),
            );
        }
        let renderer = ScriptedRenderer::new(ScriptedSite::new().page(PAGE, page));
        let engine = DeepInteractionEngine::new(config(2, 3), Arc::new(GlobalDedup::new()));

        let report = explore_page(&renderer, &engine, PAGE).await;

        assert_eq!(report.actions_performed, 3);
        assert_eq!(renderer.interactions(), 3);
    }

    #[tokio::test]
    async fn test_unchanged_page_discovers_nothing_new() {
        let page = ScriptedPage::new()
            .with_element(ScriptedElement::button("a", "Refresh"))
            .with_element(ScriptedElement::button("b", "Sort").at(100.0, 0.0));
        let renderer = ScriptedRenderer::new(ScriptedSite::new().page(PAGE, page));
        let engine = DeepInteractionEngine::new(config(2, 50), Arc::new(GlobalDedup::new()));

        let report = explore_page(&renderer, &engine, PAGE).await;

        assert_eq!(report.nodes_discovered, 2);
        assert_eq!(report.actions_performed, 2);
    }

    #[tokio::test]
    async fn test_failed_interaction_does_not_stop_exploration() {
        let page = ScriptedPage::new()
            .with_element(ScriptedElement::button("a", "Broken").failing())
            .with_element(
                ScriptedElement::button("b", "Load more")
                    .at(0.0, 40.0)
                    .emits(ObservedRequest::new("GET", "https://example.com/api/items?page=2")),
            );
        let renderer = ScriptedRenderer::new(ScriptedSite::new().page(PAGE, page));
        let engine = DeepInteractionEngine::new(config(2, 50), Arc::new(GlobalDedup::new()));

        let report = explore_page(&renderer, &engine, PAGE).await;

        assert_eq!(report.failures, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.surfaces.len(), 1);
        assert_eq!(report.surfaces[0].param_name(), "page");
    }

    #[tokio::test]
    async fn test_traffic_is_attributed_to_the_triggering_action() {
        let page = ScriptedPage::new()
            .with_load_request(ObservedRequest::new("GET", "https://example.com/api/init?session=1"))
            .with_element(
                ScriptedElement::button("a", "Load more")
                    .emits(ObservedRequest::new("GET", "https://example.com/api/items?page=2")),
            );
        let renderer = ScriptedRenderer::new(ScriptedSite::new().page(PAGE, page));
        let engine = DeepInteractionEngine::new(config(2, 50), Arc::new(GlobalDedup::new()));

        let report = explore_page(&renderer, &engine, PAGE).await;

        // page-load traffic is outside the exploration window
        assert_eq!(report.surfaces.len(), 1);
        let surface = &report.surfaces[0];
        assert_eq!(surface.source(), Source::TrafficAfterInteraction);
        assert_eq!(surface.action_trigger(), "click_Load more");
        assert_eq!(surface.trigger_chain(), ["page_load", "click_Load more"]);
        assert_eq!(surface.depth_level(), 0);
    }

    #[tokio::test]
    async fn test_global_dedup_spans_pages() {
        let page_for = |suffix: &str| {
            ScriptedPage::new()
                .with_element(
                    ScriptedElement::link(&format!("login-{}", suffix), "Login", "/login").with_selector("a.link"),
                )
                .with_element(
                    ScriptedElement::button(&format!("delete-{}", suffix), "Delete")
                        .with_selector("button.btn-danger")
                        .at(0.0, 50.0),
                )
        };
        let site = ScriptedSite::new()
            .page("https://example.com/posts/1", page_for("1"))
            .page("https://example.com/posts/2", page_for("2"));
        let renderer = ScriptedRenderer::new(site);
        let engine = DeepInteractionEngine::new(config(1, 50), Arc::new(GlobalDedup::new()));

        let first = explore_page(&renderer, &engine, "https://example.com/posts/1").await;
        let second = explore_page(&renderer, &engine, "https://example.com/posts/2").await;

        assert_eq!(first.actions_performed, 2);
        assert_eq!(second.actions_performed, 1);
        assert_eq!(second.nodes_skipped, 1);
        let events = renderer.events();
        assert!(events.contains(&"click delete-2".to_string()));
        assert!(!events.contains(&"click login-2".to_string()));
    }

    #[tokio::test]
    async fn test_skipped_nodes_do_not_repeat_sweeps() {
        let search = ScriptedElement::new("s", "input", "")
            .with_input_type("search")
            .emits(ObservedRequest::new("GET", "https://example.com/search?q=probe"));
        let mut page = ScriptedPage::new().with_search_input(search);
        for i in 0..4 {
            page = page.with_element(
                ScriptedElement::link(&format!("login-{}", i), "Login", "/login")
                    .with_selector("a.nav")
                    .at(0.0, i as f64 * 30.0),
            );
        }
        let renderer = ScriptedRenderer::new(ScriptedSite::new().page(PAGE, page));
        let engine = DeepInteractionEngine::new(config(0, 50), Arc::new(GlobalDedup::new()));

        let report = explore_page(&renderer, &engine, PAGE).await;

        assert_eq!(report.actions_performed, 1);
        assert_eq!(report.nodes_skipped, 3);
        let events = renderer.events();
        assert_eq!(events.iter().filter(|e| *e == "fill s").count(), 1);
        assert_eq!(events.iter().filter(|e| *e == "enter s").count(), 1);
    }

    #[tokio::test]
    async fn test_zero_budget_times_out_before_acting() {
        let page = ScriptedPage::new().with_element(ScriptedElement::button("a", "Go"));
        let renderer = ScriptedRenderer::new(ScriptedSite::new().page(PAGE, page));
        let engine = DeepInteractionEngine::new(config(2, 50), Arc::new(GlobalDedup::new()));

        let mut ctx = renderer.context();
        ctx.navigate(PAGE, Duration::from_secs(1)).await.unwrap();
        let interceptor = TrafficInterceptor::new(PAGE, None, vec![]);
        let report = engine.explore(&ctx, &interceptor, PAGE, Some(Duration::ZERO)).await;

        assert!(report.timed_out);
        assert_eq!(report.actions_performed, 0);
        assert_eq!(renderer.interactions(), 0);
    }
}
