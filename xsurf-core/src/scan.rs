use crate::discovery::AssetDiscovery;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;
use xsurf_scanner::url_utils::{host_in_scope, host_of, query_shape_key};
use xsurf_scanner::{
    ChromiumRenderer, CrawlResult, DedupStats, GlobalDedup, ProgressCallback, Renderer,
    ResultWriter, ScanConfig, SurfaceCrawler,
};

/// Options for one scan invocation
pub struct ScanOptions {
    pub urls: Vec<String>,
    pub config: ScanConfig,
    /// JSON result file, merged incrementally while the scan runs.
    pub output: Option<PathBuf>,
    /// Keep existing records in `output` instead of clearing it first.
    pub append: bool,
    pub discovery: Option<AssetDiscovery>,
    pub show_progress: bool,
}

impl ScanOptions {
    pub fn new(urls: Vec<String>, config: ScanConfig) -> Self {
        Self {
            urls,
            config,
            output: None,
            append: false,
            discovery: None,
            show_progress: false,
        }
    }
}

/// Extract the path component from a URL
pub fn extract_url_path(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| {
            let path = u.path().to_string();
            if path.is_empty() || path == "/" {
                "/".to_string()
            } else {
                path
            }
        })
        .unwrap_or_else(|| url.to_string())
}

/// Launch Chromium, scan every target and shut the browser down again.
/// Only a browser that cannot start is fatal.
pub async fn execute_scan(options: ScanOptions) -> Result<Vec<CrawlResult>, String> {
    let renderer = ChromiumRenderer::launch(&options.config)
        .await
        .map_err(|e| format!("Failed to start browser: {}", e))?;
    let renderer: Arc<dyn Renderer> = Arc::new(renderer);

    let results = execute_scan_with(renderer.clone(), options).await;

    if let Err(e) = renderer.shutdown().await {
        warn!("Browser shutdown failed: {}", e);
    }
    results
}

/// Scan with an already running renderer.
pub async fn execute_scan_with(
    renderer: Arc<dyn Renderer>,
    options: ScanOptions,
) -> Result<Vec<CrawlResult>, String> {
    let ScanOptions {
        urls,
        config,
        output,
        append,
        discovery,
        show_progress,
    } = options;

    if urls.is_empty() {
        return Err("No target URLs given".to_string());
    }

    let writer = match output {
        Some(path) => {
            let writer = ResultWriter::new(&path)
                .map_err(|e| format!("Cannot open result file {}: {}", path.display(), e))?;
            if !append {
                writer
                    .clear()
                    .await
                    .map_err(|e| format!("Cannot reset result file {}: {}", path.display(), e))?;
            }
            Some(Arc::new(writer))
        }
        None => None,
    };

    let progress_bar = if show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message("Starting scan...");
        Some(Arc::new(pb))
    } else {
        None
    };

    let dedup = Arc::new(GlobalDedup::new());
    let mut results = Vec::new();
    let mut failures = Vec::new();

    for (idx, target) in urls.iter().enumerate() {
        if let Some(ref pb) = progress_bar
            && urls.len() > 1
        {
            pb.println(format!("Scanning target {}/{}: {}", idx + 1, urls.len(), target));
        }

        let seeds = match &discovery {
            Some(discovery) => {
                if let Some(ref pb) = progress_bar {
                    pb.set_message(format!("Discovering assets of {}...", target));
                }
                let found = discovery
                    .discover(target, config.concurrency, config.max_link_depth)
                    .await;
                select_seeds(target, found, config.max_pages)
            }
            None => vec![target.clone()],
        };

        // each target is an independent scan
        dedup.reset();
        let mut crawler = SurfaceCrawler::new(renderer.clone(), config.clone())
            .with_dedup(dedup.clone())
            .with_progress_callback(progress_callback(progress_bar.clone()));
        if let Some(ref writer) = writer {
            crawler = crawler.with_writer(writer.clone());
        }

        match crawler.crawl_urls(target, seeds).await {
            Ok(result) => {
                log_dedup_stats(&result.dedup_stats);
                results.push(result);
            }
            Err(e) => {
                warn!("Failed to scan {}: {}", target, e);
                if let Some(ref pb) = progress_bar {
                    pb.println(format!("[!] Failed to scan {}: {}", target, e));
                }
                failures.push(format!("{}: {}", target, e));
            }
        }
    }

    if let Some(ref pb) = progress_bar {
        let surfaces: usize = results.iter().map(CrawlResult::surface_count).sum();
        pb.finish_with_message(format!("Scan complete! {} surfaces found", surfaces));
    }

    if results.is_empty() {
        return Err(failures.join("; "));
    }
    Ok(results)
}

fn progress_callback(progress_bar: Option<Arc<ProgressBar>>) -> ProgressCallback {
    match progress_bar {
        Some(pb) => Arc::new(move |count: usize, url: String| {
            pb.set_message(format!("[{}] Analyzing {}", count, extract_url_path(&url)));
            pb.tick();
        }),
        None => Arc::new(|_count: usize, _url: String| {}),
    }
}

/// Narrow discovered URLs to the target's domain, collapse URLs that only
/// differ in query values and cap at `max_pages`. The target always comes
/// first.
pub fn select_seeds(target: &str, discovered: Vec<String>, max_pages: usize) -> Vec<String> {
    let Some(target_host) = host_of(target) else {
        return vec![target.to_string()];
    };
    let scope = vec![target_host];

    let mut shapes = HashSet::new();
    let mut seeds = Vec::new();
    for url in std::iter::once(target.to_string()).chain(discovered) {
        let Some(host) = host_of(&url) else {
            continue;
        };
        if !host_in_scope(&host, &scope) {
            continue;
        }
        let Some(shape) = query_shape_key(&url) else {
            continue;
        };
        if shapes.insert(shape) {
            seeds.push(url);
        }
    }

    seeds.truncate(max_pages.max(1));
    info!("{} seed URLs for {}", seeds.len(), target);
    seeds
}

fn log_dedup_stats(stats: &DedupStats) {
    info!(
        "Global dedup: {} URLs visited, {} skipped ({:.1}%); {} elements clicked, {} skipped ({:.1}%)",
        stats.urls_visited,
        stats.urls_skipped,
        stats.url_dedup_rate() * 100.0,
        stats.elements_clicked,
        stats.elements_skipped,
        stats.element_dedup_rate() * 100.0
    );
}
