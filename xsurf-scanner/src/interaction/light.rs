use super::InteractionConfig;
use super::sweeps::interact_with_timeout;
use crate::analyzers::traffic::{Attribution, TrafficInterceptor};
use crate::browser::{ElementSnapshot, FormField, Interaction, PageContext};
use crate::model::{Source, Surface};
use std::time::Duration;
use tracing::debug;

/// Elements clicked per category.
const MAX_CLICKS_PER_CATEGORY: usize = 5;

const SKIPPED_INPUT_TYPES: [&str; 8] = [
    "hidden", "submit", "button", "image", "reset", "file", "checkbox", "radio",
];

#[derive(Debug, Default, Clone)]
pub struct LightPassReport {
    pub surfaces: Vec<Surface>,
    pub fields_filled: usize,
    pub forms_submitted: usize,
    pub elements_clicked: usize,
    pub failures: usize,
}

/// One quick fill-submit-click round over the freshly loaded page, without
/// any follow-up exploration.
#[derive(Debug, Clone)]
pub struct LightInteractionPass {
    interaction_timeout: Duration,
    settle_delay: Duration,
}

impl LightInteractionPass {
    pub fn new(config: &InteractionConfig) -> Self {
        Self {
            interaction_timeout: config.interaction_timeout,
            settle_delay: config.settle_delay,
        }
    }

    pub async fn run(
        &self,
        ctx: &dyn PageContext,
        interceptor: &TrafficInterceptor,
        page_url: &str,
    ) -> LightPassReport {
        let window_start = interceptor.captured_count();
        interceptor.attribute(Attribution {
            depth: 0,
            trigger_chain: vec!["page_load".to_string(), "light_pass".to_string()],
            action: "light_pass".to_string(),
            source: Source::TrafficAfterInteraction,
        });

        let mut report = LightPassReport::default();
        self.fill_and_submit(ctx, &mut report).await;
        self.click_candidates(ctx, &mut report).await;

        report.surfaces = interceptor.captured().into_iter().skip(window_start).collect();
        interceptor.attribute(Attribution::default());
        debug!(
            "Light pass on {}: {} fields, {} forms, {} clicks, {} surfaces",
            page_url,
            report.fields_filled,
            report.forms_submitted,
            report.elements_clicked,
            report.surfaces.len()
        );
        report
    }

    async fn fill_and_submit(&self, ctx: &dyn PageContext, report: &mut LightPassReport) {
        let forms = match ctx.forms().await {
            Ok(forms) => forms,
            Err(e) => {
                debug!("Light pass could not enumerate forms: {}", e);
                report.failures += 1;
                return;
            }
        };

        for form in forms {
            for field in form.fields.iter().filter(|f| f.visible && is_fillable(f)) {
                let fill = Interaction::Fill(test_value(field.input_type.as_deref()).to_string());
                if self.act(ctx, &field.element_ref, &fill).await {
                    report.fields_filled += 1;
                } else {
                    report.failures += 1;
                }
            }

            let submitted = match form.submit.as_ref() {
                Some(button) => self.act(ctx, &button.element_ref, &Interaction::Click).await,
                None => self.act(ctx, &form.element_ref, &Interaction::SubmitForm).await,
            };
            if submitted {
                report.forms_submitted += 1;
                self.settle().await;
            } else {
                report.failures += 1;
            }
        }
    }

    async fn click_candidates(&self, ctx: &dyn PageContext, report: &mut LightPassReport) {
        let elements = match ctx.interactive_elements().await {
            Ok(elements) => elements,
            Err(e) => {
                debug!("Light pass could not enumerate elements: {}", e);
                report.failures += 1;
                return;
            }
        };

        let buttons: Vec<&ElementSnapshot> = elements
            .iter()
            .filter(|e| e.visible && is_plain_button(e))
            .take(MAX_CLICKS_PER_CATEGORY)
            .collect();
        let handlers: Vec<&ElementSnapshot> = elements
            .iter()
            .filter(|e| e.visible && e.has_click_handler && !is_plain_button(e))
            .take(MAX_CLICKS_PER_CATEGORY)
            .collect();

        for element in buttons.into_iter().chain(handlers) {
            if self.act(ctx, &element.element_ref, &Interaction::Click).await {
                report.elements_clicked += 1;
                self.settle().await;
            } else {
                report.failures += 1;
            }
        }
    }

    async fn act(&self, ctx: &dyn PageContext, element_ref: &str, interaction: &Interaction) -> bool {
        match interact_with_timeout(ctx, element_ref, interaction, self.interaction_timeout).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Light pass {} on {} failed: {}", interaction.verb(), element_ref, e);
                false
            }
        }
    }

    async fn settle(&self) {
        if self.settle_delay > Duration::ZERO {
            tokio::time::sleep(self.settle_delay).await;
        }
    }
}

fn is_fillable(field: &FormField) -> bool {
    let tag = field.tag.to_lowercase();
    if tag == "textarea" {
        return true;
    }
    if tag != "input" {
        return false;
    }
    let input_type = field.input_type.as_deref().unwrap_or("text").to_lowercase();
    !SKIPPED_INPUT_TYPES.contains(&input_type.as_str())
}

fn is_plain_button(element: &ElementSnapshot) -> bool {
    let input_type = element.input_type.as_deref().map(str::to_lowercase);
    match element.tag.to_lowercase().as_str() {
        "button" => input_type.as_deref() != Some("submit"),
        "input" => input_type.as_deref() == Some("button"),
        _ => false,
    }
}

/// Value typed into a field of the given `type`.
pub fn test_value(input_type: Option<&str>) -> &'static str {
    match input_type.map(str::to_lowercase).as_deref() {
        Some("text") | None => "test_value",
        Some("email") => "test@example.com",
        Some("password") => "Test123!",
        Some("tel") => "1234567890",
        Some("number") => "123",
        Some("url") => "https://example.com",
        Some("search") => "test search",
        Some("date") => "2024-01-01",
        Some(_) => "test",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{
        FormSnapshot, ObservedRequest, PageContext, ScriptedElement, ScriptedForm, ScriptedPage,
        ScriptedRenderer, ScriptedSite,
    };
    use std::sync::Arc;

    const PAGE: &str = "https://example.com/contact";

    fn field(element_ref: &str, input_type: Option<&str>) -> FormField {
        FormField {
            element_ref: element_ref.into(),
            tag: "input".into(),
            input_type: input_type.map(String::from),
            name: Some(element_ref.into()),
            visible: true,
            enabled: true,
        }
    }

    #[test]
    fn test_values_by_type() {
        assert_eq!(test_value(None), "test_value");
        assert_eq!(test_value(Some("EMAIL")), "test@example.com");
        assert_eq!(test_value(Some("tel")), "1234567890");
        assert_eq!(test_value(Some("color")), "test");
    }

    #[test]
    fn test_fillable_fields() {
        assert!(is_fillable(&field("a", Some("number"))));
        assert!(is_fillable(&field("b", None)));
        assert!(!is_fillable(&field("c", Some("hidden"))));
        assert!(!is_fillable(&field("d", Some("submit"))));
    }

    #[tokio::test]
    async fn test_light_pass_submits_and_clicks_with_light_pass_trigger() {
        let form = ScriptedForm {
            snapshot: FormSnapshot {
                element_ref: "form-0".into(),
                index: 0,
                fields: vec![field("email", Some("email")), field("token", Some("hidden"))],
                submit: None,
            },
            on_submit: vec![ObservedRequest::new("POST", "https://example.com/contact")
                .with_body("application/x-www-form-urlencoded", "email=test%40example.com")],
        };
        let page = ScriptedPage::new()
            .with_form(form)
            .with_element(
                ScriptedElement::button("more", "Show more")
                    .emits(ObservedRequest::new("GET", "https://example.com/api/faq?offset=10")),
            );
        let renderer = ScriptedRenderer::new(ScriptedSite::new().page(PAGE, page));
        let mut ctx = renderer.context();
        let interceptor = Arc::new(TrafficInterceptor::new(PAGE, None, vec![]));
        ctx.on_request(interceptor.clone()).await.unwrap();
        ctx.navigate(PAGE, Duration::from_secs(1)).await.unwrap();

        let config = InteractionConfig {
            settle_delay: Duration::ZERO,
            ..InteractionConfig::default()
        };
        let report = LightInteractionPass::new(&config).run(&ctx, &interceptor, PAGE).await;

        assert_eq!(report.fields_filled, 1);
        assert_eq!(report.forms_submitted, 1);
        assert_eq!(report.elements_clicked, 1);
        let names: Vec<&str> = report.surfaces.iter().map(|s| s.param_name()).collect();
        assert_eq!(names, vec!["email", "offset"]);
        assert!(report.surfaces.iter().all(|s| s.action_trigger() == "light_pass"));
        assert!(renderer.events().contains(&"submit form-0".to_string()));
        // attribution is handed back to page-load defaults
        assert_eq!(interceptor.attribution(), Attribution::default());
    }
}
