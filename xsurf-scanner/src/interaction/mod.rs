//! Active exploration of a loaded page.
//!
//! [`DeepInteractionEngine`] runs a depth-bounded breadth-first search over
//! interactive elements. [`LightInteractionPass`] is a shallow fill-and-click
//! pass. Both feed the traffic they provoke through the page's
//! [`TrafficInterceptor`](crate::analyzers::TrafficInterceptor).

pub mod deep;
pub mod light;
pub mod sweeps;

pub use deep::{DeepInteractionEngine, ExplorationReport};
pub use light::{LightInteractionPass, LightPassReport};

use crate::browser::{ElementSnapshot, Interaction};
use crate::config::ScanConfig;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Typed into inputs whose change handler is being exercised.
pub const CHANGE_PROBE: &str = "XSURF_CHANGE_PROBE";

const NODE_TEXT_CHARS: usize = 50;
const ELEMENT_TEXT_CHARS: usize = 30;
const LABEL_TEXT_CHARS: usize = 20;

#[derive(Debug, Clone)]
pub struct InteractionConfig {
    pub max_depth: usize,
    pub max_actions: usize,
    pub interaction_timeout: Duration,
    pub settle_delay: Duration,
    pub idle_timeout: Duration,
}

impl From<&ScanConfig> for InteractionConfig {
    fn from(config: &ScanConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            max_actions: config.max_actions_per_page,
            interaction_timeout: config.interaction_timeout,
            settle_delay: config.settle_delay,
            idle_timeout: config.idle_timeout,
        }
    }
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self::from(&ScanConfig::default())
    }
}

/// An element waiting in the exploration queue.
#[derive(Debug, Clone)]
pub struct InteractionNode {
    pub selector: String,
    pub fingerprint: String,
    pub text: String,
    pub depth: usize,
    pub trigger_chain: Vec<String>,
    pub element: ElementSnapshot,
}

impl InteractionNode {
    pub fn new(page_url: &str, element: ElementSnapshot, depth: usize, trigger_chain: Vec<String>) -> Self {
        let text: String = element.text.trim().chars().take(NODE_TEXT_CHARS).collect();
        let fingerprint = node_fingerprint(page_url, &element.selector, &text, &element);
        Self {
            selector: element.selector.clone(),
            fingerprint,
            text,
            depth,
            trigger_chain,
            element,
        }
    }

    /// Short description used in trigger chains, e.g. `click_Add to cart`.
    pub fn label(&self, interaction: &Interaction) -> String {
        let subject: String = if self.text.is_empty() {
            self.selector.chars().take(LABEL_TEXT_CHARS).collect()
        } else {
            self.text.chars().take(LABEL_TEXT_CHARS).collect()
        };
        format!("{}_{}", interaction.verb(), subject)
    }
}

/// Identity of a queued node: page, selector, caption and exact box. Two
/// identical-looking rows at different positions stay distinct.
pub fn node_fingerprint(page_url: &str, selector: &str, text: &str, element: &ElementSnapshot) -> String {
    let bbox = element.bbox;
    short_hash(&format!(
        "{}|{}|{}|{},{},{},{}",
        page_url, selector, text, bbox.x, bbox.y, bbox.width, bbox.height
    ))
}

/// Identity used for new-element discovery: tag, id, sorted classes, rounded
/// position and a caption prefix.
pub fn element_fingerprint(element: &ElementSnapshot) -> String {
    let mut classes = element.classes.clone();
    classes.sort();
    let text: String = element.text.trim().chars().take(ELEMENT_TEXT_CHARS).collect();
    short_hash(&format!(
        "{}|{}|{}|{},{}|{}",
        element.tag.to_lowercase(),
        element.id.as_deref().unwrap_or_default(),
        classes.join(" "),
        element.bbox.x.round() as i64,
        element.bbox.y.round() as i64,
        text
    ))
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Hover beats change beats click.
pub fn choose_interaction(element: &ElementSnapshot) -> Interaction {
    if element.has_mouseover {
        Interaction::Hover
    } else if element.tag.eq_ignore_ascii_case("select") {
        Interaction::SelectOption(1)
    } else if element.has_change {
        Interaction::Fill(CHANGE_PROBE.to_string())
    } else {
        Interaction::Click
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::BoundingBox;

    fn element(tag: &str, text: &str, x: f64, y: f64) -> ElementSnapshot {
        ElementSnapshot {
            element_ref: "1".into(),
            tag: tag.into(),
            text: text.into(),
            selector: format!("{}.row", tag),
            classes: vec!["row".into(), "item".into()],
            bbox: BoundingBox { x, y, width: 100.0, height: 20.0 },
            visible: true,
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_node_fingerprint_is_position_sensitive() {
        let page = "https://example.com/list";
        let a = InteractionNode::new(page, element("button", "Edit", 0.0, 10.0), 0, vec![]);
        let b = InteractionNode::new(page, element("button", "Edit", 0.0, 40.0), 0, vec![]);
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_element_fingerprint_ignores_class_order_and_subpixel_jitter() {
        let a = element("button", "Edit", 10.2, 20.4);
        let mut b = element("button", "Edit", 9.8, 19.6);
        b.classes.reverse();
        b.element_ref = "99".into();
        assert_eq!(element_fingerprint(&a), element_fingerprint(&b));
    }

    #[test]
    fn test_interaction_priority() {
        let mut el = element("select", "", 0.0, 0.0);
        assert_eq!(choose_interaction(&el), Interaction::SelectOption(1));
        el.has_mouseover = true;
        assert_eq!(choose_interaction(&el), Interaction::Hover);

        let mut input = element("input", "", 0.0, 0.0);
        input.has_change = true;
        assert_eq!(
            choose_interaction(&input),
            Interaction::Fill(CHANGE_PROBE.to_string())
        );
        assert_eq!(choose_interaction(&element("a", "Docs", 0.0, 0.0)), Interaction::Click);
    }

    #[test]
    fn test_label_truncates_caption() {
        let node = InteractionNode::new(
            "https://example.com/",
            element("button", "  A very long caption for a button  ", 0.0, 0.0),
            1,
            vec![],
        );
        assert_eq!(node.label(&Interaction::Click), "click_A very long caption ");
    }
}
