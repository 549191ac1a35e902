//! Prompt templates for the bundled agent engine

use anyhow::{Context as _, Result};
use tera::{Context, Tera};

const ACTION_TEMPLATE: &str = "action";
const IMPORTANCE_TEMPLATE: &str = "importance";

pub const DEFAULT_ACTION_TEMPLATE: &str = r#"It is step {{ step }} of the simulation.
{{ agent }} is currently at the {{ location }}, doing: {{ action }}.
{% if notes %}Recent memories of {{ agent }}:
{% for note in notes %}- {{ note }}
{% endfor %}{% endif %}
Known locations: {{ locations | join(sep=", ") }}.

What does {{ agent }} do next, and where? Answer with a JSON object:
{"action": "<short description>", "location": "<one of the known locations>"}
"#;

pub const DEFAULT_IMPORTANCE_TEMPLATE: &str = r#"On a scale of 1 to 10, where 1 is purely mundane (e.g., brushing teeth, making bed) and 10 is extremely poignant (e.g., a break up, college acceptance), rate the likely poignancy of the following event for {{ agent }}.
Event: {{ event }}
Rating:"#;

/// Compiled prompt templates
pub struct PromptLibrary {
    tera: Tera,
}

impl PromptLibrary {
    pub fn new(action: &str, importance: &str) -> Result<Self> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.add_raw_template(ACTION_TEMPLATE, action)
            .context("Invalid action prompt template")?;
        tera.add_raw_template(IMPORTANCE_TEMPLATE, importance)
            .context("Invalid importance prompt template")?;
        Ok(Self { tera })
    }

    /// Library using the built-in templates
    pub fn builtin() -> Result<Self> {
        Self::new(DEFAULT_ACTION_TEMPLATE, DEFAULT_IMPORTANCE_TEMPLATE)
    }

    pub fn render_action(
        &self,
        step: u64,
        agent: &str,
        location: &str,
        action: &str,
        notes: &[String],
        locations: &[String],
    ) -> Result<String> {
        let mut context = Context::new();
        context.insert("step", &step);
        context.insert("agent", agent);
        context.insert("location", location);
        context.insert("action", action);
        context.insert("notes", notes);
        context.insert("locations", locations);
        self.tera
            .render(ACTION_TEMPLATE, &context)
            .context("Failed to render action prompt")
    }

    pub fn render_importance(&self, agent: &str, event: &str) -> Result<String> {
        let mut context = Context::new();
        context.insert("agent", agent);
        context.insert("event", event);
        self.tera
            .render(IMPORTANCE_TEMPLATE, &context)
            .context("Failed to render importance prompt")
    }
}
