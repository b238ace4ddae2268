use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use url::Url;
use xsurf_core::collaborators::{ChatMutationGenerator, MutationGenerator};
use xsurf_core::discovery::AssetDiscovery;
use xsurf_core::report::{ReportData, ReportFormat, render_report, save_report};
use xsurf_core::scan::{ScanOptions, execute_scan};
use xsurf_scanner::ScanConfig;

/// Install the fmt subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "xsurf=debug" } else { "xsurf=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Load URLs from either a file or a single URL argument
pub fn load_urls_from_source(
    url: Option<&Url>,
    hosts_file: Option<&PathBuf>,
) -> Result<Vec<String>, String> {
    if let Some(hosts_file_path) = hosts_file {
        load_urls_from_file(hosts_file_path)
    } else if let Some(url) = url {
        Ok(vec![url.as_str().to_string()])
    } else {
        Err("Either --url or --hosts-file must be provided".to_string())
    }
}

/// Load and parse URLs from a file, skipping blanks and `#` comments
pub fn load_urls_from_file(path: &PathBuf) -> Result<Vec<String>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read hosts file {}: {}", path.display(), e))?;

    let urls: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_url_line)
        .collect();

    if urls.is_empty() {
        return Err(format!("No valid URLs found in {}", path.display()));
    }

    Ok(urls)
}

/// Parse a single line as an http(s) URL, adding `http://` when the scheme
/// is missing
pub fn parse_url_line(line: &str) -> Option<String> {
    if let Ok(url) = Url::parse(line)
        && matches!(url.scheme(), "http" | "https")
        && url.host_str().is_some()
    {
        return Some(line.to_string());
    }

    let with_scheme = format!("http://{}", line);
    if !line.contains(char::is_whitespace)
        && let Ok(url) = Url::parse(&with_scheme)
        && url.host_str().is_some()
    {
        return Some(with_scheme);
    }

    warn!("Skipping invalid URL '{}'", line);
    None
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

fn parse_format(args: &ArgMatches) -> ReportFormat {
    args.get_one::<String>("format")
        .and_then(|f| ReportFormat::from_str(f))
        .unwrap_or(ReportFormat::Text)
}

/// Config file first, then command line overrides.
pub fn scan_config_from_args(args: &ArgMatches) -> Result<ScanConfig> {
    let mut config = match args.get_one::<String>("config") {
        Some(raw) => {
            let path = expand_path(raw);
            ScanConfig::from_file(&path)
                .with_context(|| format!("Could not load config {}", path.display()))?
        }
        None => ScanConfig::new(),
    };

    if let Some(&depth) = args.get_one::<usize>("depth") {
        config = config.with_max_depth(depth);
    }
    if let Some(&actions) = args.get_one::<usize>("max-actions") {
        config = config.with_max_actions(actions);
    }
    if let Some(&pages) = args.get_one::<usize>("max-pages") {
        config = config.with_max_pages(pages);
    }
    if let Some(&concurrency) = args.get_one::<usize>("concurrency") {
        config = config.with_concurrency(concurrency);
    }
    if let Some(&secs) = args.get_one::<u64>("nav-timeout") {
        config = config.with_navigation_timeout(Duration::from_secs(secs));
    }
    if let Some(&millis) = args.get_one::<u64>("interaction-timeout") {
        config = config.with_interaction_timeout(Duration::from_millis(millis));
    }
    if let Some(&secs) = args.get_one::<u64>("timeout") {
        config = config.with_global_timeout(Duration::from_secs(secs));
    }
    if args.get_flag("scoped") {
        config = config.with_capture_cross_origin(false);
    }
    if let Some(domains) = args.get_many::<String>("scope-domain") {
        for domain in domains {
            config = config.with_scope_domain(domain.as_str());
        }
    }
    if args.get_flag("light-pass") {
        config = config.with_light_pass(true);
    }
    if args.get_flag("headful") {
        config = config.with_headless(false);
    }

    if config.max_pages == 0 {
        bail!("--max-pages must be at least 1");
    }
    Ok(config)
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_scan_plan(urls: &[String], config: &ScanConfig, output: &Path) {
    print_divider();
    println!("{}", "  XSURF SCAN".bright_white().bold());
    print_divider();
    println!();
    if urls.len() == 1 {
        println!("{} Target: {}", "→".blue(), urls[0].bright_white());
    } else {
        println!("{} Targets: {}", "→".blue(), urls.len().to_string().bright_white());
    }
    println!(
        "{} Depth {} · {} actions/page · {} pages · concurrency {}",
        "→".blue(),
        config.max_depth.to_string().cyan(),
        config.max_actions_per_page.to_string().cyan(),
        config.max_pages.to_string().cyan(),
        config.concurrency.to_string().cyan()
    );
    let capture = if config.capture_cross_origin {
        "all origins".to_string()
    } else {
        "target domain only".to_string()
    };
    println!("{} Traffic capture: {}", "→".blue(), capture.bright_white());
    println!(
        "{} Output: {}",
        "→".blue(),
        output.display().to_string().bright_white()
    );
    println!();
}

pub async fn handle_scan(args: &ArgMatches) -> Result<()> {
    let urls = load_urls_from_source(
        args.get_one::<Url>("url"),
        args.get_one::<PathBuf>("hosts-file"),
    )
    .map_err(|e| anyhow!(e))?;
    let config = scan_config_from_args(args)?;
    let output = expand_path(
        args.get_one::<String>("output")
            .map(String::as_str)
            .unwrap_or("result.json"),
    );
    let format = parse_format(args);

    print_scan_plan(&urls, &config, &output);

    let mut options = ScanOptions::new(urls, config);
    options.output = Some(output.clone());
    options.append = args.get_flag("append");
    options.discovery = args.get_one::<PathBuf>("discovery").map(AssetDiscovery::new);
    options.show_progress = true;

    let results = execute_scan(options).await.map_err(|e| anyhow!(e))?;

    println!("\n{} Scan complete!\n", "✓".green().bold());
    let report = render_report(&ReportData::from_crawls(&results), &format)
        .context("Failed to render report")?;
    print!("{}", report);

    let total: usize = results.iter().map(|r| r.surface_count()).sum();
    println!(
        "\n{} {} surfaces saved to {}",
        "✓".green().bold(),
        total.to_string().cyan(),
        output.display().to_string().bright_white()
    );
    if results.iter().any(|r| r.timed_out) {
        println!(
            "{} Scan timeout reached; results are partial",
            "⚠".yellow().bold()
        );
    }
    Ok(())
}

pub fn handle_report(args: &ArgMatches) -> Result<()> {
    let input = expand_path(
        args.get_one::<String>("input")
            .map(String::as_str)
            .unwrap_or("result.json"),
    );
    let format = parse_format(args);

    let data = ReportData::from_file(&input).map_err(|e| anyhow!(e))?;
    let report = render_report(&data, &format).context("Failed to render report")?;

    match args.get_one::<PathBuf>("report") {
        Some(path) => {
            save_report(&report, path)
                .with_context(|| format!("Could not write {}", path.display()))?;
            println!(
                "{} Report saved to {}",
                "✓".green().bold(),
                path.display().to_string().bright_white()
            );
        }
        None => print!("{}", report),
    }
    Ok(())
}

pub async fn handle_mutate(args: &ArgMatches) -> Result<()> {
    let payload = args
        .get_one::<String>("payload")
        .ok_or_else(|| anyhow!("--payload is required"))?;
    let generator = ChatMutationGenerator::from_env().map_err(|e| anyhow!(e))?;

    let mutations = generator.generate(payload).await;
    if mutations.is_empty() {
        println!("{} No mutations returned", "⚠".yellow().bold());
        return Ok(());
    }
    for (idx, mutation) in mutations.iter().enumerate() {
        println!("  {} {}", format!("[{}]", idx + 1).cyan(), mutation);
    }
    Ok(())
}
