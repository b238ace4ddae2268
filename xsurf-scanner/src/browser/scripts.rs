//! Page-side snippets evaluated by the Chromium binding.
//!
//! Every element handed to Rust carries a `data-xsurf-ref` attribute so it can
//! be found again later regardless of how the DOM around it changes. Snippets
//! return plain JSON values matching the serde shapes in `browser`.

use super::Interaction;

pub const REF_ATTRIBUTE: &str = "data-xsurf-ref";

/// Shared helpers prepended to every snippet.
const PRELUDE: &str = r#"
const __xsurfRef = (el) => {
  if (!el.hasAttribute('data-xsurf-ref')) {
    window.__xsurfNextRef = (window.__xsurfNextRef || 0) + 1;
    el.setAttribute('data-xsurf-ref', 'x' + window.__xsurfNextRef);
  }
  return el.getAttribute('data-xsurf-ref');
};
const __xsurfVisible = (el) => {
  const rect = el.getBoundingClientRect();
  if (rect.width <= 0 || rect.height <= 0) return false;
  const style = window.getComputedStyle(el);
  return style.display !== 'none' && style.visibility !== 'hidden' && style.opacity !== '0';
};
const __xsurfSelector = (el) => {
  if (el.id) return '#' + el.id;
  const classes = Array.from(el.classList || []).filter(c => c && !c.includes(':'));
  return el.tagName.toLowerCase() + (classes.length ? '.' + classes.join('.') : '');
};
const __xsurfSnapshot = (el) => {
  const rect = el.getBoundingClientRect();
  const style = window.getComputedStyle(el);
  return {
    element_ref: __xsurfRef(el),
    tag: el.tagName.toLowerCase(),
    id: el.id || null,
    classes: Array.from(el.classList || []),
    text: (el.innerText || el.value || el.getAttribute('aria-label') || '').trim().slice(0, 200),
    selector: __xsurfSelector(el),
    bbox: { x: rect.x, y: rect.y, width: rect.width, height: rect.height },
    href: el.tagName === 'A' ? el.href || null : null,
    input_type: el.getAttribute('type') ? el.getAttribute('type').toLowerCase() : null,
    has_mouseover: !!(el.onmouseover || el.hasAttribute('onmouseover') || el.onmouseenter),
    has_change: !!(el.onchange || el.hasAttribute('onchange')),
    has_click_handler: !!(el.onclick || el.hasAttribute('onclick') || style.cursor === 'pointer'),
    visible: __xsurfVisible(el),
    enabled: !el.disabled
  };
};
"#;

const INPUT_FIELDS_BODY: &str = r#"
const fields = [];
const counters = { control: 0, hidden: 0, editable: 0 };
const push = (kind, el, inShadow) => {
  const form = el.form || el.closest && el.closest('form');
  fields.push({
    kind,
    tag: el.tagName.toLowerCase(),
    input_type: el.getAttribute('type') ? el.getAttribute('type').toLowerCase() : null,
    name: el.getAttribute('name'),
    id: el.id || null,
    placeholder: el.getAttribute('placeholder'),
    aria_label: el.getAttribute('aria-label'),
    title: el.getAttribute('title'),
    class_name: typeof el.className === 'string' ? el.className : null,
    visible: __xsurfVisible(el),
    form_method: form ? (form.getAttribute('method') || null) : null,
    form_action: form ? (form.getAttribute('action') || null) : null,
    in_shadow: inShadow,
    index: counters[kind]++
  });
};
const sweep = (root, inShadow) => {
  root.querySelectorAll('input, textarea, select').forEach(el => {
    const type = (el.getAttribute('type') || '').toLowerCase();
    push(type === 'hidden' ? 'hidden' : 'control', el, inShadow);
  });
  if (!inShadow) {
    root.querySelectorAll('[contenteditable=""], [contenteditable="true"]').forEach(el => push('editable', el, false));
  }
  root.querySelectorAll('*').forEach(el => {
    if (el.shadowRoot) sweep(el.shadowRoot, true);
  });
};
sweep(document, false);
return fields;
"#;

const INTERACTIVE_ELEMENTS_BODY: &str = r#"
const candidates = document.querySelectorAll(
  'a[href], button, input:not([type="hidden"]), select, textarea, [onclick], [onmouseover], [onchange], ' +
  '[role="button"], [role="link"], [role="tab"], [role="menuitem"]'
);
const out = [];
candidates.forEach(el => {
  if (!__xsurfVisible(el) || el.disabled) return;
  out.push(__xsurfSnapshot(el));
});
return out;
"#;

const FORMS_BODY: &str = r#"
return Array.from(document.forms).map((form, index) => {
  const fields = Array.from(form.querySelectorAll('input, textarea, select')).map(el => ({
    element_ref: __xsurfRef(el),
    tag: el.tagName.toLowerCase(),
    input_type: el.getAttribute('type') ? el.getAttribute('type').toLowerCase() : null,
    name: el.getAttribute('name'),
    visible: __xsurfVisible(el),
    enabled: !el.disabled
  }));
  const submit = form.querySelector('button[type="submit"], input[type="submit"], button:not([type])');
  return {
    element_ref: __xsurfRef(form),
    index,
    fields,
    submit: submit ? __xsurfSnapshot(submit) : null
  };
});
"#;

const SEARCH_INPUTS_BODY: &str = r#"
const pattern = /search|搜索/i;
return Array.from(document.querySelectorAll('input, textarea')).filter(el => {
  if (!__xsurfVisible(el) || el.disabled) return false;
  const type = (el.getAttribute('type') || '').toLowerCase();
  if (type === 'search') return true;
  const name = (el.getAttribute('name') || '').toLowerCase();
  if (name === 'q' || pattern.test(name)) return true;
  return pattern.test(el.getAttribute('placeholder') || '') || pattern.test(el.getAttribute('aria-label') || '');
}).map(__xsurfSnapshot);
"#;

const SINK_CALLS_BODY: &str = r#"
return (window.__xsurfSinkCalls || []).map(c => ({
  function: String(c.function),
  argument: String(c.argument),
  timestamp: Number(c.timestamp) || 0
}));
"#;

const LINKS_BODY: &str = r#"
return Array.from(document.querySelectorAll('a[href]')).map(a => a.href).filter(Boolean);
"#;

fn wrap(body: &str) -> String {
    format!("(() => {{\n{}\n{}\n}})()", PRELUDE, body)
}

pub fn input_fields() -> String {
    wrap(INPUT_FIELDS_BODY)
}

pub fn interactive_elements() -> String {
    wrap(INTERACTIVE_ELEMENTS_BODY)
}

pub fn forms() -> String {
    wrap(FORMS_BODY)
}

pub fn search_inputs() -> String {
    wrap(SEARCH_INPUTS_BODY)
}

pub fn sink_calls() -> String {
    wrap(SINK_CALLS_BODY)
}

pub fn links() -> String {
    wrap(LINKS_BODY)
}

/// Outcome markers returned by [`interaction`].
pub const OK: &str = "ok";
pub const DETACHED: &str = "detached";

/// Script performing `interaction` on the element tagged `element_ref`.
/// Evaluates to [`OK`], [`DETACHED`] or an error description.
pub fn interaction(element_ref: &str, interaction: &Interaction) -> String {
    let target = json_string(element_ref);
    let action = match interaction {
        Interaction::Hover => r#"
  ['mouseover', 'mouseenter', 'mousemove'].forEach(type =>
    el.dispatchEvent(new MouseEvent(type, { bubbles: true, cancelable: true, view: window })));
  return 'ok';"#
            .to_string(),
        Interaction::Click => r#"
  el.scrollIntoView({ block: 'center' });
  el.click();
  return 'ok';"#
            .to_string(),
        Interaction::SelectOption(index) => format!(
            r#"
  if (!el.options || el.options.length <= {index}) return 'no option {index}';
  el.selectedIndex = {index};
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return 'ok';"#
        ),
        Interaction::Fill(value) => format!(
            r#"
  const value = {value};
  el.focus();
  if (el.isContentEditable) {{
    el.textContent = value;
  }} else {{
    const proto = el.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
    const setter = Object.getOwnPropertyDescriptor(proto, 'value').set;
    setter.call(el, value);
  }}
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return 'ok';"#,
            value = json_string(value)
        ),
        Interaction::PressEnter => r#"
  el.focus();
  ['keydown', 'keypress', 'keyup'].forEach(type =>
    el.dispatchEvent(new KeyboardEvent(type, { key: 'Enter', code: 'Enter', keyCode: 13, which: 13, bubbles: true })));
  if (el.form) {
    if (el.form.requestSubmit) el.form.requestSubmit(); else el.form.submit();
  }
  return 'ok';"#
            .to_string(),
        Interaction::SubmitForm => r#"
  const form = el.tagName === 'FORM' ? el : el.form;
  if (!form) return 'not a form';
  if (form.requestSubmit) form.requestSubmit(); else form.submit();
  return 'ok';"#
            .to_string(),
    };

    format!(
        "(() => {{\n  const el = document.querySelector('[{}=' + JSON.stringify({}) + ']');\n  if (!el || !el.isConnected) return '{}';\n  try {{{}\n  }} catch (e) {{ return String(e); }}\n}})()",
        REF_ATTRIBUTE, target, DETACHED, action
    )
}

fn json_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_value_is_json_escaped() {
        let script = interaction("x1", &Interaction::Fill("a'b\"c</script>".into()));
        assert!(script.contains(r#"const value = "a'b\"c</script>";"#));
        assert!(script.contains("data-xsurf-ref"));
    }

    #[test]
    fn test_select_script_uses_index() {
        let script = interaction("x2", &Interaction::SelectOption(1));
        assert!(script.contains("el.selectedIndex = 1;"));
    }

    #[test]
    fn test_snippets_are_self_invoking() {
        for script in [input_fields(), interactive_elements(), forms(), search_inputs(), sink_calls(), links()] {
            assert!(script.starts_with("(() => {"));
            assert!(script.ends_with("})()"));
        }
    }
}
