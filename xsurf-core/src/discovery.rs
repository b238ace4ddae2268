//! Wrapper around an external URL-discovery spider (gospider-compatible
//! command line, JSON-lines output).
//!
//! The tool is optional. When it is missing, times out or finds nothing the
//! scan falls back to the seed URL alone.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const DEFAULT_BINARY: &str = "gospider";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct AssetDiscovery {
    binary: PathBuf,
    timeout: Duration,
    available: OnceCell<bool>,
}

impl Default for AssetDiscovery {
    fn default() -> Self {
        Self::new(DEFAULT_BINARY)
    }
}

impl AssetDiscovery {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: Duration::from_secs(120),
            available: OnceCell::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &PathBuf {
        &self.binary
    }

    /// Runs `<binary> --help` once and caches the answer.
    pub async fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                let probe = Command::new(&self.binary)
                    .arg("--help")
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .status();
                match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
                    Ok(Ok(_)) => {
                        info!("Asset discovery available: {}", self.binary.display());
                        true
                    }
                    Ok(Err(e)) => {
                        warn!(
                            "Asset discovery tool {} unavailable ({}); scanning seed URLs only",
                            self.binary.display(),
                            e
                        );
                        false
                    }
                    Err(_) => {
                        warn!(
                            "Asset discovery tool {} did not answer within {:?}; scanning seed URLs only",
                            self.binary.display(),
                            PROBE_TIMEOUT
                        );
                        false
                    }
                }
            })
            .await
    }

    /// Discover URLs reachable from `target`. Never fails: every problem
    /// degrades to `[target]`.
    pub async fn discover(&self, target: &str, concurrency: usize, depth: usize) -> Vec<String> {
        if !self.is_available().await {
            return vec![target.to_string()];
        }

        info!(
            "Running {} against {} (concurrency {}, depth {})",
            self.binary.display(),
            target,
            concurrency,
            depth
        );
        let run = Command::new(&self.binary)
            .arg("-s")
            .arg(target)
            .arg("-c")
            .arg(concurrency.to_string())
            .arg("-d")
            .arg(depth.to_string())
            .arg("--json")
            .arg("--no-redirect")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Asset discovery failed: {}", e);
                return vec![target.to_string()];
            }
            Err(_) => {
                warn!("Asset discovery timed out after {:?}", self.timeout);
                return vec![target.to_string()];
            }
        };

        if !output.stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("discovery stderr: {}", stderr.chars().take(200).collect::<String>());
        }

        let urls = parse_output(&String::from_utf8_lossy(&output.stdout));
        info!("Asset discovery found {} URLs", urls.len());
        if urls.is_empty() {
            vec![target.to_string()]
        } else {
            urls
        }
    }
}

/// Sorted distinct URLs from JSON lines (`url` or `output` field), also
/// accepting bare `http(s)://` lines.
pub fn parse_output(output: &str) -> Vec<String> {
    let mut urls = BTreeSet::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(value) => {
                let found = value
                    .get("url")
                    .or_else(|| value.get("output"))
                    .and_then(|v| v.as_str());
                if let Some(url) = found {
                    urls.insert(url.to_string());
                }
            }
            Err(_) => {
                if line.starts_with("http://") || line.starts_with("https://") {
                    urls.insert(line.to_string());
                }
            }
        }
    }
    urls.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_lines_and_raw_urls() {
        let output = r#"
{"output":"https://shop.test/b","type":"url"}
{"url":"https://shop.test/a","source":"body"}
https://shop.test/c
[linkfinder] - not a url
{"url":"https://shop.test/a"}
{"type":"subdomain"}
"#;
        assert_eq!(
            parse_output(output),
            vec![
                "https://shop.test/a".to_string(),
                "https://shop.test/b".to_string(),
                "https://shop.test/c".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_output("").is_empty());
        assert!(parse_output("\n  \n").is_empty());
    }

    #[tokio::test]
    async fn test_missing_tool_degrades_to_seed() {
        let discovery = AssetDiscovery::new("/nonexistent/xsurf-spider");
        assert!(!discovery.is_available().await);
        assert_eq!(
            discovery.discover("https://shop.test/", 10, 3).await,
            vec!["https://shop.test/".to_string()]
        );
    }
}
