use serde::Deserialize;

use crate::error::PromptwireError;
use crate::request::ReasoningConfig;

/// Upper bound on the rendered prompt, in UTF-8 bytes.
pub const MAX_PROMPT_BYTES: usize = 124 * 1024;

/// Marker replaced by the user's input when a template is applied.
pub const INPUT_PLACEHOLDER: &str = "${INPUT_DATA}";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

/// A stored prompt template, in the shape the template service returns it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    #[serde(default)]
    pub template_id: String,
    #[serde(default)]
    pub template_name: String,
    pub template_prompt: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(rename = "modelversion")]
    pub model_id: String,
    /// Hint shown in place of the empty input.
    #[serde(default)]
    pub template_guidance: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub reasoning: Option<ReasoningConfig>,
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
}

fn default_placeholder() -> String {
    INPUT_PLACEHOLDER.to_string()
}

impl Template {
    pub fn new(template_prompt: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            template_id: String::new(),
            template_name: String::new(),
            template_prompt: template_prompt.into(),
            system_prompt: None,
            model_id: model_id.into(),
            template_guidance: None,
            visibility: Visibility::default(),
            reasoning: None,
            placeholder: default_placeholder(),
        }
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    pub fn from_json(json: &str) -> Result<Self, PromptwireError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Substitute `input` for the first placeholder occurrence.
    /// Always renders from the template source, so reapplying the same input
    /// yields the same prompt.
    pub fn render(&self, input: &str) -> String {
        if self.placeholder.is_empty() {
            return self.template_prompt.clone();
        }
        self.template_prompt.replacen(&self.placeholder, input, 1)
    }

    pub fn guidance(&self) -> &str {
        self.template_guidance
            .as_deref()
            .filter(|g| !g.trim().is_empty())
            .unwrap_or("Enter your input")
    }
}

/// The prompt input box: raw user input plus its rendered form.
/// Edits that would push the rendered prompt past [`MAX_PROMPT_BYTES`] are rejected
/// and the previous input is kept.
#[derive(Debug, Clone, Default)]
pub struct PromptInput {
    template: Option<Template>,
    input: String,
    rendered: String,
}

impl PromptInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(template: Template) -> Self {
        let rendered = template.render("");
        Self {
            template: Some(template),
            input: String::new(),
            rendered,
        }
    }

    pub fn template(&self) -> Option<&Template> {
        self.template.as_ref()
    }

    /// Swap the active template and re-render the current input against it.
    pub fn set_template(&mut self, template: Option<Template>) -> Result<(), PromptwireError> {
        let rendered = match &template {
            Some(t) => t.render(&self.input),
            None => self.input.clone(),
        };
        check_size(&rendered)?;
        self.template = template;
        self.rendered = rendered;
        Ok(())
    }

    /// Apply a user edit. On rejection the prior input and rendering are retained.
    pub fn set_input(&mut self, input: &str) -> Result<&str, PromptwireError> {
        let rendered = match &self.template {
            Some(t) => t.render(input),
            None => input.to_string(),
        };
        if let Err(e) = check_size(&rendered) {
            tracing::warn!(
                bytes = rendered.len(),
                max = MAX_PROMPT_BYTES,
                "input rejected, keeping previous value"
            );
            return Err(e);
        }
        self.input = input.to_string();
        self.rendered = rendered;
        Ok(&self.rendered)
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn rendered(&self) -> &str {
        &self.rendered
    }

    pub fn byte_count(&self) -> usize {
        self.rendered.len()
    }

    pub fn word_count(&self) -> usize {
        self.rendered.split_whitespace().count()
    }

    /// "Words: N | Size: X.XX KB / 124 KB"
    pub fn size_label(&self) -> String {
        format!(
            "Words: {} | Size: {:.2} KB / {} KB",
            self.word_count(),
            self.byte_count() as f64 / 1024.0,
            MAX_PROMPT_BYTES / 1024
        )
    }

    /// Reset after a send; the template stays selected only if `keep_template`.
    pub fn clear(&mut self, keep_template: bool) {
        if !keep_template {
            self.template = None;
        }
        self.input.clear();
        self.rendered = match &self.template {
            Some(t) => t.render(""),
            None => String::new(),
        };
    }
}

fn check_size(rendered: &str) -> Result<(), PromptwireError> {
    if rendered.len() > MAX_PROMPT_BYTES {
        return Err(PromptwireError::InputTooLarge {
            bytes: rendered.len(),
            max: MAX_PROMPT_BYTES,
        });
    }
    Ok(())
}
