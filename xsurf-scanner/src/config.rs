use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Scan settings. Durations are (de)serialized as milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Maximum UI interaction depth per page.
    pub max_depth: usize,
    pub max_actions_per_page: usize,
    pub max_pages: usize,
    /// Link hops from the seed the page queue will follow.
    pub max_link_depth: usize,
    pub concurrency: usize,
    #[serde(with = "duration_ms")]
    pub navigation_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub interaction_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub settle_delay: Duration,
    #[serde(with = "duration_ms")]
    pub idle_timeout: Duration,
    /// Wall clock allowed for one page's deep exploration.
    #[serde(with = "duration_ms")]
    pub page_budget: Duration,
    #[serde(with = "duration_ms")]
    pub global_timeout: Duration,
    /// Capture requests to any host instead of only the scan scope.
    pub capture_cross_origin: bool,
    /// Extra domains treated as in scope besides the seed's.
    pub scope_domains: Vec<String>,
    pub blocked_resource_types: Vec<String>,
    /// Run the light form/button pass before the deep engine.
    pub light_pass: bool,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub user_agent: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_actions_per_page: 50,
            max_pages: 50,
            max_link_depth: 3,
            concurrency: 3,
            navigation_timeout: Duration::from_secs(30),
            interaction_timeout: Duration::from_secs(3),
            settle_delay: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(3),
            page_budget: Duration::from_secs(120),
            global_timeout: Duration::from_secs(3600),
            capture_cross_origin: true,
            scope_domains: Vec::new(),
            blocked_resource_types: ["image", "stylesheet", "font", "media"]
                .into_iter()
                .map(String::from)
                .collect(),
            light_pass: false,
            headless: true,
            chrome_path: None,
            user_agent: None,
        }
    }
}

impl ScanConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            ScanError::ParseError(format!("Invalid config file {}: {}", path.display(), e))
        })
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_actions(mut self, actions: usize) -> Self {
        self.max_actions_per_page = actions;
        self
    }

    pub fn with_max_pages(mut self, pages: usize) -> Self {
        self.max_pages = pages;
        self
    }

    pub fn with_max_link_depth(mut self, depth: usize) -> Self {
        self.max_link_depth = depth;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    pub fn with_interaction_timeout(mut self, timeout: Duration) -> Self {
        self.interaction_timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_page_budget(mut self, budget: Duration) -> Self {
        self.page_budget = budget;
        self
    }

    pub fn with_global_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout = timeout;
        self
    }

    pub fn with_capture_cross_origin(mut self, capture: bool) -> Self {
        self.capture_cross_origin = capture;
        self
    }

    pub fn with_scope_domain(mut self, domain: impl Into<String>) -> Self {
        self.scope_domains.push(domain.into());
        self
    }

    pub fn with_blocked_resource_types(mut self, types: Vec<String>) -> Self {
        self.blocked_resource_types = types;
        self
    }

    pub fn with_light_pass(mut self, enabled: bool) -> Self {
        self.light_pass = enabled;
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_chrome_path(mut self, path: PathBuf) -> Self {
        self.chrome_path = Some(path);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Domains the traffic interceptor keeps in scoped mode: the seed host
    /// plus configured extras.
    pub fn scope_for(&self, seed_host: &str) -> Vec<String> {
        let mut scope = vec![seed_host.to_lowercase()];
        for domain in &self.scope_domains {
            let domain = domain.trim().to_lowercase();
            if !domain.is_empty() && !scope.contains(&domain) {
                scope.push(domain);
            }
        }
        scope
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
