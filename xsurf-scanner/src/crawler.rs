use crate::analyzers::{DomAnalyzer, ResponseAnalyzer, SinkHookInstrumentor, TrafficInterceptor, UrlAnalyzer};
use crate::browser::{PageContext, Renderer};
use crate::config::ScanConfig;
use crate::dedup::{GlobalDedup, deduplicate};
use crate::error::{Result, ScanError};
use crate::interaction::{DeepInteractionEngine, InteractionConfig, LightInteractionPass};
use crate::result::{CrawlResult, PageOutcome};
use crate::url_utils::{normalize_url, resolve_link, url_in_scope};
use crate::writer::ResultWriter;
use futures::FutureExt;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

pub type ProgressCallback = Arc<dyn Fn(usize, String) + Send + Sync>;

/// Page-level breadth-first crawl that runs every analyzer on each page.
///
/// Pages are processed in batches of `concurrency`, each in its own browsing
/// context. Surfaces are persisted through the optional [`ResultWriter`] as
/// soon as their page finishes, so the scan-wide timeout never loses work
/// that already completed.
pub struct SurfaceCrawler {
    renderer: Arc<dyn Renderer>,
    config: ScanConfig,
    dedup: Arc<GlobalDedup>,
    writer: Option<Arc<ResultWriter>>,
    progress_callback: Option<ProgressCallback>,
}

impl SurfaceCrawler {
    pub fn new(renderer: Arc<dyn Renderer>, config: ScanConfig) -> Self {
        Self {
            renderer,
            config,
            dedup: Arc::new(GlobalDedup::new()),
            writer: None,
            progress_callback: None,
        }
    }

    /// Share an existing dedup manager, e.g. to continue a previous scan.
    pub fn with_dedup(mut self, dedup: Arc<GlobalDedup>) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_writer(mut self, writer: Arc<ResultWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn dedup(&self) -> &Arc<GlobalDedup> {
        &self.dedup
    }

    pub async fn crawl(&self, target: &str) -> Result<CrawlResult> {
        self.crawl_urls(target, vec![target.to_string()]).await
    }

    /// Crawl starting from `seeds` (usually the target plus pre-discovered
    /// URLs). Only an invalid target is an error; page failures end up in
    /// [`CrawlResult::errors`].
    pub async fn crawl_urls(&self, target: &str, seeds: Vec<String>) -> Result<CrawlResult> {
        let parsed = Url::parse(target)
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", target, e)))?;
        let seed_host = parsed
            .host_str()
            .ok_or_else(|| ScanError::InvalidUrl(format!("{} has no host", target)))?
            .to_lowercase();

        let link_scope = self.config.scope_for(&seed_host);
        let traffic_scope = if self.config.capture_cross_origin {
            None
        } else {
            Some(link_scope.clone())
        };
        info!(
            "Starting surface crawl of {} ({} seeds, {} pages max, concurrency {})",
            target,
            seeds.len(),
            self.config.max_pages,
            self.config.concurrency
        );

        let interaction_config = InteractionConfig::from(&self.config);
        let worker = Arc::new(PageWorker {
            renderer: self.renderer.clone(),
            config: self.config.clone(),
            engine: DeepInteractionEngine::new(interaction_config.clone(), self.dedup.clone()),
            light: LightInteractionPass::new(&interaction_config),
            traffic_scope,
            link_scope,
        });

        let state = Arc::new(Mutex::new(CrawlResult::new(target)));
        let run = self.run_queue(worker, target, seeds, state.clone());
        let timed_out = tokio::time::timeout(self.config.global_timeout, run)
            .await
            .is_err();

        let mut result = std::mem::take(&mut *state.lock().unwrap());
        if timed_out {
            warn!(
                "Scan timeout of {:?} reached after {} pages; keeping partial results",
                self.config.global_timeout, result.pages_crawled
            );
            result.timed_out = true;
        }
        result.surfaces = deduplicate(result.surfaces);
        result.dedup_stats = self.dedup.stats();

        info!(
            "Crawl complete: {} pages, {} surfaces, {} errors",
            result.pages_crawled,
            result.surfaces.len(),
            result.errors.len()
        );
        Ok(result)
    }

    async fn run_queue(
        &self,
        worker: Arc<PageWorker>,
        target: &str,
        seeds: Vec<String>,
        state: Arc<Mutex<CrawlResult>>,
    ) {
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        let mut seen: HashSet<String> = HashSet::new();
        for seed in seeds {
            if seen.insert(normalize_url(&seed)) {
                queue.push_back((seed, 0));
            }
        }

        let mut started = 0;
        while !queue.is_empty() && started < self.config.max_pages {
            let batch_size = self
                .config
                .concurrency
                .max(1)
                .min(self.config.max_pages - started);

            let mut batch = JoinSet::new();
            for _ in 0..batch_size {
                let Some((url, link_depth)) = queue.pop_front() else {
                    break;
                };
                started += 1;
                if let Some(ref callback) = self.progress_callback {
                    callback(started, url.clone());
                }
                let worker = worker.clone();
                batch.spawn(async move {
                    let outcome = match AssertUnwindSafe(worker.process(&url)).catch_unwind().await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            warn!("Page task for {} panicked", url);
                            PageOutcome::with_error(&url, "page task panicked")
                        }
                    };
                    (outcome, link_depth)
                });
            }

            while let Some(joined) = batch.join_next().await {
                let (outcome, link_depth) = match joined {
                    Ok(done) => done,
                    Err(e) => {
                        warn!("Page task failed: {}", e);
                        let mut result = state.lock().unwrap();
                        result.pages_crawled += 1;
                        result.errors.push(format!("page task failed: {}", e));
                        continue;
                    }
                };

                if link_depth < self.config.max_link_depth {
                    for link in &outcome.links {
                        if seen.insert(normalize_url(link)) {
                            queue.push_back((link.clone(), link_depth + 1));
                        }
                    }
                }
                self.record(target, outcome, &state).await;
            }
        }
    }

    async fn record(&self, target: &str, outcome: PageOutcome, state: &Mutex<CrawlResult>) {
        if let Some(writer) = &self.writer
            && !outcome.surfaces.is_empty()
        {
            if let Err(e) = writer.write_surfaces(target, &outcome.surfaces).await {
                warn!("Failed to persist surfaces from {}: {}", outcome.url, e);
            }
        }

        let mut result = state.lock().unwrap();
        result.pages_crawled += 1;
        match outcome.error {
            Some(error) => result.errors.push(format!("{}: {}", outcome.url, error)),
            None => debug!(
                "{} yielded {} surfaces after {} actions",
                outcome.final_url,
                outcome.surfaces.len(),
                outcome.actions_performed
            ),
        }
        result.surfaces.extend(outcome.surfaces);
    }
}

struct PageWorker {
    renderer: Arc<dyn Renderer>,
    config: ScanConfig,
    engine: DeepInteractionEngine,
    light: LightInteractionPass,
    /// `None` captures traffic to any host.
    traffic_scope: Option<Vec<String>>,
    link_scope: Vec<String>,
}

impl PageWorker {
    /// Analyze one page in a fresh context. The context is always closed.
    async fn process(&self, url: &str) -> PageOutcome {
        let mut ctx = match self.renderer.new_context().await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!("Could not open a browsing context for {}: {}", url, e);
                return PageOutcome::with_error(url, e.to_string());
            }
        };

        let outcome = match self.analyze(ctx.as_mut(), url).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Skipping {}: {}", url, e);
                PageOutcome::with_error(url, e.to_string())
            }
        };

        if let Err(e) = ctx.close().await {
            warn!("Failed to close context for {}: {}", url, e);
        }
        outcome
    }

    async fn analyze(&self, ctx: &mut dyn PageContext, url: &str) -> Result<PageOutcome> {
        // listeners must exist before the first request goes out
        let hooks = SinkHookInstrumentor::new();
        hooks.install(&mut *ctx).await?;
        let interceptor = Arc::new(TrafficInterceptor::new(
            url,
            self.traffic_scope.clone(),
            self.config.blocked_resource_types.clone(),
        ));
        ctx.on_request(interceptor.clone()).await?;
        let responses = Arc::new(ResponseAnalyzer::new(url));
        ctx.on_response(responses.clone()).await?;

        let mut outcome = PageOutcome::new(url);
        match ctx.navigate(url, self.config.navigation_timeout).await {
            Ok(nav) => outcome.final_url = nav.final_url,
            Err(e) if e.is_navigation_timeout() => {
                warn!("{}; continuing with the partially loaded page", e);
                outcome.navigation_timed_out = true;
                outcome.final_url = ctx.current_url().await.unwrap_or_else(|_| url.to_string());
            }
            Err(e) => return Err(e),
        }
        let page_url = outcome.final_url.clone();
        interceptor.set_page_url(&page_url);

        let mut surfaces = UrlAnalyzer::new().analyze(&page_url, "GET");
        match DomAnalyzer::new().analyze(ctx, &page_url).await {
            Ok(found) => surfaces.extend(found),
            Err(e) => debug!("DOM analysis failed on {}: {}", page_url, e),
        }

        // before exploration, which may navigate away
        outcome.links = match ctx.links().await {
            Ok(links) => self.in_scope_links(&page_url, links),
            Err(e) => {
                debug!("Link extraction failed on {}: {}", page_url, e);
                Vec::new()
            }
        };

        if self.config.light_pass {
            self.light.run(ctx, &interceptor, &page_url).await;
        }
        let report = self
            .engine
            .explore(ctx, &interceptor, &page_url, Some(self.config.page_budget))
            .await;
        outcome.actions_performed = report.actions_performed;

        surfaces.extend(interceptor.captured());
        match hooks.harvest(ctx, &page_url).await {
            Ok(found) => surfaces.extend(found),
            Err(e) => debug!("Sink hook harvest failed on {}: {}", page_url, e),
        }
        surfaces.extend(responses.captured());

        outcome.surfaces = deduplicate(surfaces);
        Ok(outcome)
    }

    fn in_scope_links(&self, page_url: &str, links: Vec<String>) -> Vec<String> {
        let mut seen = HashSet::new();
        links
            .into_iter()
            .filter_map(|href| resolve_link(page_url, &href))
            .filter(|link| url_in_scope(link, &self.link_scope))
            .filter(|link| seen.insert(normalize_url(link)))
            .collect()
    }
}
