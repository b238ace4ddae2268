use crate::browser::{FieldKind, InputField, PageContext};
use crate::error::Result;
use crate::model::{ParamType, Source, Surface};
use tracing::debug;
use url::Url;

const SEARCH_SIGNALS: [&str; 2] = ["search", "搜索"];
const NON_DATA_INPUT_TYPES: [&str; 4] = ["hidden", "submit", "button", "image"];

/// Extracts statically present inputs from a loaded page: visible form
/// controls, hidden inputs, content-editable regions, and the same inside
/// shadow roots.
#[derive(Debug, Default, Clone, Copy)]
pub struct DomAnalyzer;

impl DomAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub async fn analyze(&self, ctx: &dyn PageContext, page_url: &str) -> Result<Vec<Surface>> {
        let fields = ctx.input_fields().await?;
        let surfaces = self.surfaces_from_fields(&fields, page_url);
        debug!(
            "DOM analyzer found {} surfaces in {} candidate fields on {}",
            surfaces.len(),
            fields.len(),
            page_url
        );
        Ok(surfaces)
    }

    pub fn surfaces_from_fields(&self, fields: &[InputField], page_url: &str) -> Vec<Surface> {
        fields
            .iter()
            .filter_map(|field| match field.kind {
                FieldKind::Control => self.control_surface(field, page_url),
                FieldKind::Hidden => self.hidden_surface(field, page_url),
                FieldKind::Editable => self.editable_surface(field, page_url),
            })
            .collect()
    }

    fn control_surface(&self, field: &InputField, page_url: &str) -> Option<Surface> {
        if !field.visible {
            return None;
        }
        if let Some(input_type) = field.input_type.as_deref()
            && NON_DATA_INPUT_TYPES.contains(&input_type.to_lowercase().as_str())
        {
            return None;
        }

        let name = non_empty(&field.name)
            .or_else(|| non_empty(&field.id))
            .or_else(|| search_fallback_name(field))?;

        let method = field
            .form_method
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or("GET");
        let action = resolve_action(page_url, field.form_action.as_deref());
        let source = if field.in_shadow { Source::DomShadow } else { Source::DomForm };

        Some(
            Surface::builder(action, method, name, ParamType::FormInput, source)
                .element_selector(selector_for(field))
                .element_type(field.input_type.clone().unwrap_or_else(|| field.tag.clone()))
                .page_url(page_url)
                .trigger_chain(vec!["page_load".to_string()])
                .build(),
        )
    }

    fn hidden_surface(&self, field: &InputField, page_url: &str) -> Option<Surface> {
        let name = non_empty(&field.name)?;
        let method = field
            .form_method
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or("POST");
        let action = resolve_action(page_url, field.form_action.as_deref());
        let source = if field.in_shadow { Source::DomShadow } else { Source::DomHidden };

        Some(
            Surface::builder(action, method, name, ParamType::HiddenInput, source)
                .element_selector(selector_for(field))
                .element_type("hidden")
                .page_url(page_url)
                .trigger_chain(vec!["page_load".to_string()])
                .build(),
        )
    }

    fn editable_surface(&self, field: &InputField, page_url: &str) -> Option<Surface> {
        let name = non_empty(&field.id).unwrap_or_else(|| format!("contenteditable_{}", field.index));
        let source = if field.in_shadow { Source::DomShadow } else { Source::DomEditable };

        Some(
            Surface::builder(page_url, "POST", name, ParamType::Editable, source)
                .element_selector(selector_for(field))
                .element_type("contenteditable")
                .page_url(page_url)
                .trigger_chain(vec!["page_load".to_string()])
                .build(),
        )
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn has_search_signal(value: &str) -> bool {
    let lower = value.to_lowercase();
    SEARCH_SIGNALS.iter().any(|signal| lower.contains(signal))
}

/// Name for an unnamed field that looks like a search box: its sanitized
/// placeholder, aria-label or title, else `search_input`.
pub fn search_fallback_name(field: &InputField) -> Option<String> {
    let signals = [
        &field.placeholder,
        &field.aria_label,
        &field.title,
        &field.class_name,
        &field.input_type,
    ];
    let search_like = signals
        .iter()
        .filter_map(|v| v.as_deref())
        .any(has_search_signal);
    if !search_like {
        return None;
    }

    let label = [&field.placeholder, &field.aria_label, &field.title]
        .into_iter()
        .find_map(non_empty)
        .map(|label| sanitize_name(&label))
        .filter(|name| !name.is_empty());

    Some(label.unwrap_or_else(|| "search_input".to_string()))
}

/// Non-alphanumerics become `_`, leading and trailing `_` are trimmed, the
/// result is lower-cased.
pub fn sanitize_name(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    replaced.trim_matches('_').to_lowercase()
}

fn resolve_action(page_url: &str, action: Option<&str>) -> String {
    let Some(action) = action.map(str::trim).filter(|a| !a.is_empty()) else {
        return page_url.to_string();
    };
    Url::parse(page_url)
        .and_then(|base| base.join(action))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| page_url.to_string())
}

fn selector_for(field: &InputField) -> String {
    let selector = if let Some(id) = non_empty(&field.id) {
        format!("#{}", id)
    } else if let Some(name) = non_empty(&field.name) {
        format!("{}[name=\"{}\"]", field.tag, name)
    } else {
        field.tag.clone()
    };
    if field.in_shadow {
        format!("shadow_dom >> {}", selector)
    } else {
        selector
    }
}
