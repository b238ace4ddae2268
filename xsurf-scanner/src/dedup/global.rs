use crate::url_utils::{normalize_url, root_domain};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;
use url::Url;

/// Selector fragments that mark page chrome rather than page content.
const CHROME_KEYWORDS: [&str; 9] = [
    "nav",
    "header",
    "footer",
    "menu",
    "sidebar",
    "topbar",
    "bottom",
    "breadcrumb",
    "toolbar",
];

/// Link and button captions that appear on every page of a site.
const COMMON_ACTIONS: [&str; 16] = [
    "login", "logout", "sign in", "sign up", "register", "home", "about", "contact", "help",
    "faq", "登录", "注册", "首页", "关于", "联系", "帮助",
];

/// Longest caption that is still matched by substring against [`COMMON_ACTIONS`].
const SHORT_CAPTION_CHARS: usize = 24;
const SIGNATURE_TEXT_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementClass {
    /// Site chrome; deduplicated once per root domain.
    Navigation,
    /// Page content; deduplicated once per page path.
    Business,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupStats {
    pub urls_visited: usize,
    pub urls_skipped: usize,
    pub elements_clicked: usize,
    pub elements_skipped: usize,
}

impl DedupStats {
    pub fn url_dedup_rate(&self) -> f64 {
        rate(self.urls_skipped, self.urls_visited + self.urls_skipped)
    }

    pub fn element_dedup_rate(&self) -> f64 {
        rate(self.elements_skipped, self.elements_clicked + self.elements_skipped)
    }
}

fn rate(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

#[derive(Default)]
struct DedupState {
    visited_urls: HashSet<String>,
    clicked_signatures: HashSet<String>,
    stats: DedupStats,
}

/// Scan-wide record of visited URLs and clicked elements.
///
/// One instance is created per scan and shared by every page worker. Checks
/// insert atomically, so concurrent callers never both get `true` for the
/// same key.
#[derive(Default)]
pub struct GlobalDedup {
    state: Mutex<DedupState>,
}

impl GlobalDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every update leaves the sets consistent, so a poisoned lock is still
    /// usable.
    fn state(&self) -> MutexGuard<'_, DedupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True the first time a normalized URL is seen, false afterwards.
    pub fn should_visit_url(&self, url: &str) -> bool {
        let key = normalize_url(url);
        let mut state = self.state();
        if state.visited_urls.insert(key) {
            state.stats.urls_visited += 1;
            true
        } else {
            state.stats.urls_skipped += 1;
            debug!("Skipping already visited URL {}", url);
            false
        }
    }

    /// True the first time an element signature is seen within its scope.
    pub fn should_click_element(&self, text: &str, selector: &str, page_url: &str) -> bool {
        let signature = element_signature(text, selector, page_url);
        let mut state = self.state();
        if state.clicked_signatures.insert(signature) {
            state.stats.elements_clicked += 1;
            true
        } else {
            state.stats.elements_skipped += 1;
            debug!("Skipping already clicked element '{}' ({})", text.trim(), selector);
            false
        }
    }

    pub fn is_url_visited(&self, url: &str) -> bool {
        self.state()
            .visited_urls
            .contains(&normalize_url(url))
    }

    pub fn stats(&self) -> DedupStats {
        self.state().stats.clone()
    }

    /// Forget everything, for running another independent scan.
    pub fn reset(&self) {
        *self.state() = DedupState::default();
    }
}

pub fn classify_element(text: &str, selector: &str) -> ElementClass {
    let selector = selector.to_lowercase();
    if CHROME_KEYWORDS.iter().any(|k| selector.contains(k)) {
        return ElementClass::Navigation;
    }

    let caption = text.trim().to_lowercase();
    let is_common = COMMON_ACTIONS.iter().any(|action| {
        caption == *action
            || (caption.chars().count() <= SHORT_CAPTION_CHARS && caption.contains(action))
    });
    if is_common {
        ElementClass::Navigation
    } else {
        ElementClass::Business
    }
}

/// Root domain for navigation elements, `host/path` for business elements.
fn signature_scope(class: ElementClass, page_url: &str) -> String {
    let Ok(parsed) = Url::parse(page_url) else {
        return page_url.to_lowercase();
    };
    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    match class {
        ElementClass::Navigation => root_domain(&host),
        ElementClass::Business => format!("{}{}", host, parsed.path().to_lowercase()),
    }
}

pub fn element_signature(text: &str, selector: &str, page_url: &str) -> String {
    let class = classify_element(text, selector);
    let scope = signature_scope(class, page_url);
    let text: String = text.trim().chars().take(SIGNATURE_TEXT_CHARS).collect();

    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{}|{}", text, selector, scope).as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}
