use serde::{Deserialize, Serialize};

use crate::error::PromptwireError;
use crate::models::MAX_IMAGES;
use crate::template::MAX_PROMPT_BYTES;

/// Which gateway route handles the request.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// One-shot prompt, optionally with images.
    #[serde(rename = "sendmessage")]
    SendMessage,
    /// Multi-turn chat keyed by a correlation id.
    Chat,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendMessage => "sendmessage",
            Self::Chat => "chat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_k: 250,
            top_p: 0.999,
            max_tokens: 4000,
        }
    }
}

impl SamplingParams {
    pub fn validate(&self) -> Result<(), PromptwireError> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(PromptwireError::InvalidRequest(format!(
                "temperature must be in [0, 1], got {}",
                self.temperature
            )));
        }
        if !(1..=250).contains(&self.top_k) {
            return Err(PromptwireError::InvalidRequest(format!(
                "top_k must be in [1, 250], got {}",
                self.top_k
            )));
        }
        if !(0.0..=0.999).contains(&self.top_p) {
            return Err(PromptwireError::InvalidRequest(format!(
                "top_p must be in [0, 0.999], got {}",
                self.top_p
            )));
        }
        if self.max_tokens == 0 {
            return Err(PromptwireError::InvalidRequest(
                "max_tokens must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reasoning mode settings. Presence means reasoning is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReasoningConfig {
    pub budget_tokens: u32,
}

/// Immutable once sent. Built with [`RequestPayload::new`] and the `with_*` setters.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPayload {
    pub action: Action,
    pub prompt: String,
    pub model_id: String,
    pub sampling: SamplingParams,
    pub system_prompt: Option<String>,
    /// Opaque object-storage references of previously uploaded images.
    pub image_keys: Vec<String>,
    pub reasoning: Option<ReasoningConfig>,
    /// Correlation id for multi-turn chat.
    pub session_id: Option<String>,
}

/// Outbound frame as it appears on the wire.
#[derive(Serialize)]
struct WireRequest<'a> {
    action: &'static str,
    data: &'a str,
    max_tokens_to_sample: u32,
    temperature: f64,
    #[serde(rename = "modelId")]
    model_id: &'a str,
    top_k: u32,
    top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_prompt: Option<&'a str>,
    #[serde(rename = "imageS3Keys", skip_serializing_if = "no_images")]
    image_keys: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    reasoning: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_budget_tokens: Option<u32>,
}

fn no_images(keys: &&[String]) -> bool {
    keys.is_empty()
}

impl RequestPayload {
    pub fn new(action: Action, prompt: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            action,
            prompt: prompt.into(),
            model_id: model_id.into(),
            sampling: SamplingParams::default(),
            system_prompt: None,
            image_keys: Vec::new(),
            reasoning: None,
            session_id: None,
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    /// Blank system prompts are dropped, matching how the gateway treats them.
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        let system_prompt = system_prompt.into();
        self.system_prompt = (!system_prompt.trim().is_empty()).then_some(system_prompt);
        self
    }

    pub fn with_images(mut self, image_keys: Vec<String>) -> Self {
        self.image_keys = image_keys;
        self
    }

    pub fn with_reasoning(mut self, budget_tokens: u32) -> Self {
        self.reasoning = Some(ReasoningConfig { budget_tokens });
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn validate(&self) -> Result<(), PromptwireError> {
        if self.prompt.trim().is_empty() {
            return Err(PromptwireError::InvalidRequest(
                "prompt must not be empty".to_string(),
            ));
        }
        if self.prompt.len() > MAX_PROMPT_BYTES {
            return Err(PromptwireError::InputTooLarge {
                bytes: self.prompt.len(),
                max: MAX_PROMPT_BYTES,
            });
        }
        if self.model_id.trim().is_empty() {
            return Err(PromptwireError::InvalidRequest(
                "model id must not be empty".to_string(),
            ));
        }
        self.sampling.validate()?;

        if self.image_keys.len() > MAX_IMAGES {
            return Err(PromptwireError::InvalidRequest(format!(
                "at most {MAX_IMAGES} images per request, got {}",
                self.image_keys.len()
            )));
        }
        if let Some(reasoning) = &self.reasoning
            && (reasoning.budget_tokens == 0 || reasoning.budget_tokens >= self.sampling.max_tokens)
        {
            return Err(PromptwireError::InvalidRequest(format!(
                "reasoning budget must be in [1, {}), got {}",
                self.sampling.max_tokens, reasoning.budget_tokens
            )));
        }
        if self.action == Action::Chat
            && self.session_id.as_deref().is_none_or(|s| s.trim().is_empty())
        {
            return Err(PromptwireError::InvalidRequest(
                "chat requests require a session id".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize to the JSON text frame sent once the connection is ready.
    pub fn to_wire(&self) -> Result<String, PromptwireError> {
        let system = self.system_prompt.as_deref();
        let (system, system_prompt) = match self.action {
            Action::SendMessage => (system, None),
            Action::Chat => (None, system),
        };

        let wire = WireRequest {
            action: self.action.as_str(),
            data: &self.prompt,
            max_tokens_to_sample: self.sampling.max_tokens,
            temperature: self.sampling.temperature,
            model_id: &self.model_id,
            top_k: self.sampling.top_k,
            top_p: self.sampling.top_p,
            system,
            system_prompt,
            image_keys: &self.image_keys,
            session_id: self.session_id.as_deref(),
            reasoning: self.reasoning.is_some(),
            reasoning_budget_tokens: self.reasoning.map(|r| r.budget_tokens),
        };
        Ok(serde_json::to_string(&wire)?)
    }
}
