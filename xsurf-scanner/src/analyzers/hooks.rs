use crate::browser::{PageContext, SinkCall};
use crate::error::Result;
use crate::model::{ParamType, Source, Surface};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;

/// Wraps the dynamic code sinks and records every call in
/// `window.__xsurfSinkCalls` before delegating to the original.
pub const HOOK_SCRIPT: &str = r#"
(() => {
  if (window.__xsurfHooksInstalled) return;
  window.__xsurfHooksInstalled = true;
  window.__xsurfSinkCalls = [];
  const record = (fn, arg) => {
    try {
      window.__xsurfSinkCalls.push({
        function: fn,
        argument: String(arg).slice(0, 1000),
        timestamp: Date.now()
      });
    } catch (_) {}
  };

  const originalEval = window.eval;
  window.eval = function (code) {
    record('eval', code);
    return originalEval.apply(this, arguments);
  };

  const wrapTimer = (name) => {
    const original = window[name];
    window[name] = function (handler) {
      if (typeof handler === 'string') record(name, handler);
      return original.apply(this, arguments);
    };
  };
  wrapTimer('setTimeout');
  wrapTimer('setInterval');

  const originalWrite = document.write;
  document.write = function () {
    record('document.write', Array.prototype.join.call(arguments, ''));
    return originalWrite.apply(this, arguments);
  };
  const originalWriteln = document.writeln;
  document.writeln = function () {
    record('document.writeln', Array.prototype.join.call(arguments, ''));
    return originalWriteln.apply(this, arguments);
  };

  const OriginalFunction = window.Function;
  const HookedFunction = function () {
    record('Function', Array.prototype.join.call(arguments, ', '));
    return OriginalFunction.apply(this, arguments);
  };
  HookedFunction.prototype = OriginalFunction.prototype;
  window.Function = HookedFunction;

  const originalCreateElement = document.createElement;
  document.createElement = function (tag) {
    const el = originalCreateElement.apply(this, arguments);
    if (String(tag).toLowerCase() === 'script') {
      const srcDesc = Object.getOwnPropertyDescriptor(HTMLScriptElement.prototype, 'src');
      const textDesc = Object.getOwnPropertyDescriptor(Node.prototype, 'textContent');
      try {
        Object.defineProperty(el, 'src', {
          get() { return srcDesc.get.call(this); },
          set(v) { record('script.src', v); srcDesc.set.call(this, v); }
        });
        Object.defineProperty(el, 'textContent', {
          get() { return textDesc.get.call(this); },
          set(v) { record('script.textContent', v); textDesc.set.call(this, v); }
        });
      } catch (_) {}
    }
    return el;
  };
})();
"#;

static PARAM_REFERENCES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r#"\.get\(\s*['"](\w+)['"]\s*\)"#).unwrap(),
        Regex::new(r"\b(?:params|query|search)\.(\w+)").unwrap(),
        Regex::new(r#"\b(?:params|query|search)\[\s*['"](\w+)['"]\s*\]"#).unwrap(),
    ]
});

/// Location-derived sources, keyed by the marker used as parameter name.
const LOCATION_SOURCES: [(&str, &str); 3] = [
    ("location.search", "_url_search_"),
    ("location.hash", "_url_hash_"),
    ("document.URL", "_document_url_"),
];

const MAX_SAMPLE_LEN: usize = 200;

/// Installs sink hooks before navigation and turns the recorded calls into
/// surfaces once the page has settled.
#[derive(Debug, Default, Clone, Copy)]
pub struct SinkHookInstrumentor;

impl SinkHookInstrumentor {
    pub fn new() -> Self {
        Self
    }

    pub async fn install(&self, ctx: &mut dyn PageContext) -> Result<()> {
        ctx.add_init_script(HOOK_SCRIPT).await
    }

    pub async fn harvest(&self, ctx: &dyn PageContext, page_url: &str) -> Result<Vec<Surface>> {
        let calls = ctx.sink_calls().await?;
        debug!("Harvested {} sink calls on {}", calls.len(), page_url);
        Ok(self.surfaces_from_calls(&calls, page_url))
    }

    pub fn surfaces_from_calls(&self, calls: &[SinkCall], page_url: &str) -> Vec<Surface> {
        calls
            .iter()
            .flat_map(|call| {
                let names = extract_param_refs(&call.argument);
                let names = if names.is_empty() {
                    vec![format!("{}_dynamic", call.function)]
                } else {
                    names
                };
                let sample: String = call.argument.chars().take(MAX_SAMPLE_LEN).collect();
                names.into_iter().map(move |name| {
                    Surface::builder(page_url, "GET", name, ParamType::Query, Source::SinkHook)
                        .page_url(page_url)
                        .element_type(call.function.clone())
                        .action_trigger(format!("sink:{}", call.function))
                        .sample_payload(sample.clone())
                        .build()
                })
            })
            .collect()
    }
}

/// Parameter names referenced by a snippet of sink argument text, in order of
/// first appearance.
pub fn extract_param_refs(code: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = PARAM_REFERENCES
        .iter()
        .flat_map(|pattern| {
            pattern
                .captures_iter(code)
                .filter_map(|caps| caps.get(1).map(|m| (m.start(), m.as_str().to_string())))
                .collect::<Vec<_>>()
        })
        .collect();

    for (needle, marker) in LOCATION_SOURCES {
        if let Some(pos) = code.find(needle) {
            found.push((pos, marker.to_string()));
        }
    }

    found.sort_by_key(|(pos, _)| *pos);
    let mut seen = HashSet::new();
    found
        .into_iter()
        .map(|(_, name)| name)
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(function: &str, argument: &str) -> SinkCall {
        SinkCall {
            function: function.to_string(),
            argument: argument.to_string(),
            timestamp: 0.0,
        }
    }

    #[test]
    fn test_extracts_search_params_accessors() {
        let refs = extract_param_refs(
            "var p = new URLSearchParams(location.search); render(p.get('name') + p.get(\"q\"))",
        );
        assert_eq!(refs, vec!["_url_search_", "name", "q"]);
    }

    #[test]
    fn test_extracts_object_and_bracket_access() {
        let refs = extract_param_refs("show(query.term); load(params['page']); go(search.q); x(query.term)");
        assert_eq!(refs, vec!["term", "page", "q"]);
    }

    #[test]
    fn test_location_sources() {
        assert_eq!(
            extract_param_refs("document.write(location.hash.slice(1) + document.URL)"),
            vec!["_url_hash_", "_document_url_"]
        );
    }

    #[test]
    fn test_unattributed_call_yields_generic_surface() {
        let surfaces = SinkHookInstrumentor::new()
            .surfaces_from_calls(&[call("eval", "1 + 1")], "https://example.com/app");
        assert_eq!(surfaces.len(), 1);
        assert_eq!(surfaces[0].param_name(), "eval_dynamic");
        assert_eq!(surfaces[0].source(), Source::SinkHook);
        assert_eq!(surfaces[0].element_type(), Some("eval"));
    }

    #[test]
    fn test_one_surface_per_distinct_name() {
        let long_arg = format!("render(params.id, params.id, params.name); {}", "x".repeat(500));
        let surfaces = SinkHookInstrumentor::new()
            .surfaces_from_calls(&[call("setTimeout", &long_arg)], "https://example.com/");
        let names: Vec<&str> = surfaces.iter().map(|s| s.param_name()).collect();
        assert_eq!(names, vec!["id", "name"]);
        assert_eq!(surfaces[0].sample_payload().chars().count(), MAX_SAMPLE_LEN);
    }
}
