//! Fill-then-submit sweeps that run before every queued interaction. A
//! click-only search never exercises a form, so forms and search boxes are
//! revisited each cycle as new ones appear.

use crate::analyzers::traffic::{Attribution, SEARCH_PROBE, TrafficInterceptor};
use crate::browser::{FormField, FormSnapshot, Interaction, PageContext};
use crate::error::{Result, ScanError};
use std::time::Duration;
use tracing::debug;

/// Fields filled per form.
pub const MAX_FIELDS_PER_FORM: usize = 5;

const SAFE_INPUT_TYPES: [&str; 3] = ["text", "email", "password"];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepOutcome {
    pub fields_filled: usize,
    pub submitted: usize,
    pub failures: usize,
}

impl SweepOutcome {
    fn merge(&mut self, other: SweepOutcome) {
        self.fields_filled += other.fields_filled;
        self.submitted += other.submitted;
        self.failures += other.failures;
    }
}

/// Run `interaction` on `element_ref`, failing after `timeout`.
pub async fn interact_with_timeout(
    ctx: &dyn PageContext,
    element_ref: &str,
    interaction: &Interaction,
    timeout: Duration,
) -> Result<()> {
    match tokio::time::timeout(timeout, ctx.interact(element_ref, interaction, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(ScanError::Timeout(timeout)),
    }
}

/// Text inputs, untyped inputs and textareas. Everything else (checkboxes,
/// files, dates, selects) is left alone.
pub fn is_safe_field(field: &FormField) -> bool {
    if field.tag.eq_ignore_ascii_case("textarea") {
        return true;
    }
    if !field.tag.eq_ignore_ascii_case("input") {
        return false;
    }
    match field.input_type.as_deref() {
        None | Some("") => true,
        Some(input_type) => SAFE_INPUT_TYPES.contains(&input_type.to_lowercase().as_str()),
    }
}

pub fn canned_value(field: &FormField) -> String {
    match field.input_type.as_deref().map(str::to_lowercase).as_deref() {
        Some("email") => "test@example.com".to_string(),
        Some("password") => "Pass123!".to_string(),
        _ => format!(
            "test_{}",
            field.name.as_deref().filter(|n| !n.is_empty()).unwrap_or("field")
        ),
    }
}

/// Fill the safe fields of every form and submit the ones that received input.
pub async fn submit_forms(
    ctx: &dyn PageContext,
    interceptor: &TrafficInterceptor,
    base: &Attribution,
    timeout: Duration,
    settle: Duration,
) -> SweepOutcome {
    let forms = match ctx.forms().await {
        Ok(forms) => forms,
        Err(e) => {
            debug!("Form sweep could not enumerate forms: {}", e);
            return SweepOutcome { failures: 1, ..Default::default() };
        }
    };

    let mut outcome = SweepOutcome::default();
    for form in &forms {
        interceptor.attribute(Attribution {
            action: format!("form_{}", form.index),
            ..base.clone()
        });
        outcome.merge(submit_form(ctx, form, timeout).await);
        if settle > Duration::ZERO {
            tokio::time::sleep(settle).await;
        }
    }
    outcome
}

async fn submit_form(ctx: &dyn PageContext, form: &FormSnapshot, timeout: Duration) -> SweepOutcome {
    let mut outcome = SweepOutcome::default();

    let candidates = form
        .fields
        .iter()
        .filter(|f| f.visible && f.enabled && is_safe_field(f))
        .take(MAX_FIELDS_PER_FORM);
    for field in candidates {
        let fill = Interaction::Fill(canned_value(field));
        match interact_with_timeout(ctx, &field.element_ref, &fill, timeout).await {
            Ok(()) => outcome.fields_filled += 1,
            Err(e) => {
                debug!("Skipping field {:?} of form {}: {}", field.name, form.index, e);
                outcome.failures += 1;
            }
        }
    }

    if outcome.fields_filled == 0 {
        return outcome;
    }

    let submitted = match form.submit.as_ref().filter(|s| s.visible && s.enabled) {
        Some(button) => {
            interact_with_timeout(ctx, &button.element_ref, &Interaction::Click, timeout).await
        }
        None => {
            interact_with_timeout(ctx, &form.element_ref, &Interaction::SubmitForm, timeout).await
        }
    };
    match submitted {
        Ok(()) => outcome.submitted += 1,
        Err(e) => {
            debug!("Submitting form {} failed: {}", form.index, e);
            outcome.failures += 1;
        }
    }
    outcome
}

/// Type the search probe into every visible search box and press Enter.
pub async fn probe_search_inputs(
    ctx: &dyn PageContext,
    interceptor: &TrafficInterceptor,
    base: &Attribution,
    timeout: Duration,
    settle: Duration,
) -> SweepOutcome {
    let inputs = match ctx.search_inputs().await {
        Ok(inputs) => inputs,
        Err(e) => {
            debug!("Search sweep could not enumerate inputs: {}", e);
            return SweepOutcome { failures: 1, ..Default::default() };
        }
    };

    let mut outcome = SweepOutcome::default();
    for (idx, input) in inputs.iter().enumerate() {
        interceptor.attribute(Attribution {
            action: format!("search_input_{}", idx),
            ..base.clone()
        });

        let fill = Interaction::Fill(SEARCH_PROBE.to_string());
        let result = match interact_with_timeout(ctx, &input.element_ref, &fill, timeout).await {
            Ok(()) => {
                outcome.fields_filled += 1;
                interact_with_timeout(ctx, &input.element_ref, &Interaction::PressEnter, timeout).await
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => outcome.submitted += 1,
            Err(e) => {
                debug!("Search input {} failed: {}", idx, e);
                outcome.failures += 1;
            }
        }
        if settle > Duration::ZERO {
            tokio::time::sleep(settle).await;
        }
    }
    outcome
}
