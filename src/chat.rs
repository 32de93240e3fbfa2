use serde::Serialize;

use crate::auth::TokenProvider;
use crate::error::PromptwireError;
use crate::request::{Action, RequestPayload, SamplingParams};
use crate::session::{Connector, SessionHandle, SessionSlot, SessionState};
use crate::template::{PromptInput, Template};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    /// False for assistant turns cut short by an error, drop, or cancel.
    pub complete: bool,
}

/// A multi-turn chat. History lives server-side under `session_id`; the local
/// transcript is for display.
#[derive(Debug)]
pub struct Conversation {
    session_id: String,
    model_id: String,
    sampling: SamplingParams,
    system_prompt: Option<String>,
    input: PromptInput,
    transcript: Vec<Turn>,
    slot: SessionSlot,
}

impl Conversation {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            model_id: model_id.into(),
            sampling: SamplingParams::default(),
            system_prompt: None,
            input: PromptInput::new(),
            transcript: Vec::new(),
            slot: SessionSlot::new(),
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        let s = system_prompt.into();
        self.system_prompt = (!s.trim().is_empty()).then_some(s);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    /// Apply a template to the next message only. Its model and system prompt
    /// become the conversation's settings.
    pub fn use_template(&mut self, template: Template) -> Result<(), PromptwireError> {
        self.model_id = template.model_id.clone();
        self.system_prompt = template
            .system_prompt
            .clone()
            .filter(|s| !s.trim().is_empty());
        self.input.set_template(Some(template))
    }

    /// Render `text` (through the pending template, if any), record it, and
    /// open a chat session. Any previous session still streaming is cancelled.
    pub async fn send<P: TokenProvider>(
        &mut self,
        connector: &Connector<P>,
        text: &str,
    ) -> Result<SessionHandle, PromptwireError> {
        if text.trim().is_empty() {
            return Err(PromptwireError::InvalidRequest(
                "message must not be empty".to_string(),
            ));
        }
        let prompt = self.input.set_input(text)?.to_string();

        let mut payload = RequestPayload::new(Action::Chat, prompt.clone(), self.model_id.clone())
            .with_sampling(self.sampling)
            .with_session_id(self.session_id.clone());
        if let Some(system) = &self.system_prompt {
            payload = payload.with_system_prompt(system.clone());
        }

        let handle = self.slot.submit(connector, payload).await?;

        self.transcript.push(Turn {
            role: Role::User,
            text: prompt,
            complete: true,
        });
        self.input.clear(false);
        Ok(handle)
    }

    /// Record the assistant's reply from a finished session. Empty replies are skipped.
    pub fn finish_turn(&mut self, state: &SessionState) {
        if state.output().is_empty() {
            return;
        }
        self.transcript.push(Turn {
            role: Role::Assistant,
            text: state.output().to_string(),
            complete: state.outcome().is_some_and(|o| o.is_complete()),
        });
    }

    /// Stop the reply currently streaming, if any.
    pub fn cancel(&mut self) {
        self.slot.cancel_current();
    }
}
