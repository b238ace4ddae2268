// Report generation from scan results or a persisted result file

use crate::scan::extract_url_path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use url::Url;
use xsurf_scanner::writer::{SurfaceRecord, load_records};
use xsurf_scanner::{CrawlResult, DedupStats};

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
    Markdown,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            "markdown" | "md" => Some(ReportFormat::Markdown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportData {
    pub targets: Vec<String>,
    /// Unknown when the report is built from a result file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages_crawled: Option<usize>,
    pub surfaces: Vec<SurfaceRecord>,
    pub errors: Vec<String>,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedup_stats: Option<DedupStats>,
}

impl ReportData {
    pub fn from_crawl(result: &CrawlResult) -> Self {
        Self {
            targets: vec![result.target_url.clone()],
            pages_crawled: Some(result.pages_crawled),
            surfaces: result
                .surfaces
                .iter()
                .map(|s| SurfaceRecord::from_surface(&result.target_url, s))
                .collect(),
            errors: result.errors.clone(),
            timed_out: result.timed_out,
            dedup_stats: Some(result.dedup_stats.clone()),
        }
    }

    /// Merge several per-target results into one report.
    pub fn from_crawls(results: &[CrawlResult]) -> Self {
        let mut data = Self::from_records(Vec::new());
        data.pages_crawled = Some(0);
        for result in results {
            let single = Self::from_crawl(result);
            data.targets.extend(single.targets);
            data.pages_crawled = data.pages_crawled.map(|n| n + result.pages_crawled);
            data.surfaces.extend(single.surfaces);
            data.errors.extend(single.errors);
            data.timed_out |= single.timed_out;
        }
        data
    }

    pub fn from_records(records: Vec<SurfaceRecord>) -> Self {
        let mut targets: Vec<String> = Vec::new();
        for record in &records {
            if !targets.contains(&record.base_url) {
                targets.push(record.base_url.clone());
            }
        }
        Self {
            targets,
            pages_crawled: None,
            surfaces: records,
            errors: Vec::new(),
            timed_out: false,
            dedup_stats: None,
        }
    }

    /// Load a result file written by the scanner.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Err(format!("Result file not found: {}", path.display()));
        }
        Ok(Self::from_records(load_records(path)))
    }

    /// Host → parameter location → records, both levels sorted.
    fn grouped(&self) -> BTreeMap<String, BTreeMap<String, Vec<&SurfaceRecord>>> {
        let mut groups: BTreeMap<String, BTreeMap<String, Vec<&SurfaceRecord>>> = BTreeMap::new();
        for record in &self.surfaces {
            let host = Url::parse(&record.request_url)
                .ok()
                .and_then(|u| u.host_str().map(String::from))
                .unwrap_or_else(|| "unknown".to_string());
            groups
                .entry(host)
                .or_default()
                .entry(record.param_location.clone())
                .or_default()
                .push(record);
        }
        groups
    }

    fn cross_origin_count(&self) -> usize {
        self.surfaces.iter().filter(|s| s.is_cross_origin).count()
    }

    fn format_targets(&self) -> String {
        match self.targets.len() {
            0 => "Unknown".to_string(),
            1 => self.targets[0].clone(),
            n => format!("{} URLs", n),
        }
    }
}

pub fn generate_report(result: &CrawlResult, format: &ReportFormat) -> Result<String, serde_json::Error> {
    render_report(&ReportData::from_crawl(result), format)
}

pub fn render_report(data: &ReportData, format: &ReportFormat) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Text => Ok(generate_text_report(data)),
        ReportFormat::Json => generate_json_report(data),
        ReportFormat::Markdown => Ok(generate_markdown_report(data)),
    }
}

pub fn generate_text_report(data: &ReportData) -> String {
    let mut report = String::new();

    report.push_str(RULE);
    report.push('\n');
    report.push_str("                    XSURF ATTACK SURFACE REPORT\n");
    report.push_str(RULE);
    report.push_str("\n\n");

    report.push_str(&format!("Targets:       {}\n", data.format_targets()));
    if let Some(pages) = data.pages_crawled {
        report.push_str(&format!("Pages Crawled: {}\n", pages));
    }
    report.push_str(&format!("Surfaces:      {}\n", data.surfaces.len()));
    report.push_str(&format!("Cross-origin:  {}\n", data.cross_origin_count()));
    report.push_str(&format!("Errors:        {}\n", data.errors.len()));
    if data.timed_out {
        report.push_str("Status:        Timed out (partial results)\n");
    }
    if let Some(ref stats) = data.dedup_stats {
        report.push_str(&format!(
            "Dedup:         {} URLs visited / {} skipped, {} elements clicked / {} skipped\n",
            stats.urls_visited, stats.urls_skipped, stats.elements_clicked, stats.elements_skipped
        ));
    }
    report.push('\n');

    if !data.surfaces.is_empty() {
        report.push_str(RULE);
        report.push_str("\nSURFACES\n");
        report.push_str(RULE);
        report.push_str("\n\n");

        for (host, locations) in data.grouped() {
            report.push_str(&format!("## {}\n", host));
            for (location, records) in locations {
                report.push_str(&format!("  [{}] {} parameter(s)\n", location, records.len()));
                for record in records {
                    report.push_str(&format!(
                        "    {:<6} {:<24} {}{}\n",
                        record.method,
                        record.param_name,
                        extract_url_path(&record.request_url),
                        if record.is_cross_origin { "  (cross-origin)" } else { "" }
                    ));
                    if record.depth_level > 0 || record.trigger_chain.contains("->") {
                        report.push_str(&format!(
                            "           depth {}: {}\n",
                            record.depth_level, record.trigger_chain
                        ));
                    }
                }
            }
            report.push('\n');
        }
    }

    if !data.errors.is_empty() {
        report.push_str(RULE);
        report.push_str("\nERRORS\n");
        report.push_str(RULE);
        report.push_str("\n\n");
        for error in &data.errors {
            report.push_str(&format!("  ✗ {}\n", error));
        }
        report.push('\n');
    }

    report.push_str("Generated by xsurf - XSS attack surface discovery\n");
    report.push_str("For authorized security testing only.\n");
    report
}

pub fn generate_json_report(data: &ReportData) -> Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "xsurf",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "format": "json",
                "disclaimer": "For authorized security testing only"
            },
            "summary": {
                "targets": data.targets,
                "pages_crawled": data.pages_crawled,
                "total_surfaces": data.surfaces.len(),
                "cross_origin_surfaces": data.cross_origin_count(),
                "total_errors": data.errors.len(),
                "timed_out": data.timed_out,
                "dedup": data.dedup_stats,
            },
            "surfaces": data.grouped(),
            "errors": data.errors,
        }
    });

    serde_json::to_string_pretty(&json_report)
}

pub fn generate_markdown_report(data: &ReportData) -> String {
    let mut report = String::new();
    report.push_str("# xsurf Attack Surface Report\n\n");

    report.push_str("| | |\n|---|---|\n");
    report.push_str(&format!("| Targets | {} |\n", data.format_targets()));
    if let Some(pages) = data.pages_crawled {
        report.push_str(&format!("| Pages crawled | {} |\n", pages));
    }
    report.push_str(&format!("| Surfaces | {} |\n", data.surfaces.len()));
    report.push_str(&format!("| Errors | {} |\n", data.errors.len()));
    if data.timed_out {
        report.push_str("| Status | timed out, partial results |\n");
    }
    report.push('\n');

    for (host, locations) in data.grouped() {
        report.push_str(&format!("## {}\n\n", host));
        for (location, records) in locations {
            report.push_str(&format!("### {} parameters\n\n", location));
            report.push_str("| Method | Parameter | Path | Depth | Trigger chain |\n");
            report.push_str("|---|---|---|---|---|\n");
            for record in records {
                report.push_str(&format!(
                    "| {} | `{}` | `{}` | {} | {} |\n",
                    record.method,
                    escape_cell(&record.param_name),
                    escape_cell(&extract_url_path(&record.request_url)),
                    record.depth_level,
                    escape_cell(&record.trigger_chain)
                ));
            }
            report.push('\n');
        }
    }

    if !data.errors.is_empty() {
        report.push_str("## Errors\n\n");
        for error in &data.errors {
            report.push_str(&format!("- {}\n", error));
        }
        report.push('\n');
    }

    report.push_str("_For authorized security testing only._\n");
    report
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}
