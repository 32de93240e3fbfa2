use std::collections::HashMap;

use serde::Deserialize;

use crate::error::PromptwireError;
use crate::request::RequestPayload;

pub const DEFAULT_MODEL: &str = "anthropic.claude-3-haiku-20240307-v1:0";

/// Maximum number of image references per request.
pub const MAX_IMAGES: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelEntry {
    pub model_id: String,
    /// One-line description shown by `promptwire models`.
    #[serde(default)]
    pub description: String,
    /// Accepts image references alongside the prompt.
    #[serde(default)]
    pub vision: bool,
    /// Accepts the reasoning flag and a reasoning token budget.
    #[serde(default)]
    pub reasoning: bool,
}

impl ModelEntry {
    fn builtin(model_id: &str, description: &str, vision: bool, reasoning: bool) -> Self {
        Self {
            model_id: model_id.to_string(),
            description: description.to_string(),
            vision,
            reasoning,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: HashMap<String, ModelEntry>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelCatalog {
    pub fn builtin() -> Self {
        let entries = [
            ModelEntry::builtin(DEFAULT_MODEL, "fast, inexpensive", true, false),
            ModelEntry::builtin(
                "anthropic.claude-3-sonnet-20240229-v1:0",
                "balanced",
                true,
                false,
            ),
            ModelEntry::builtin(
                "anthropic.claude-3-5-sonnet-20240620-v1:0",
                "strong general purpose",
                true,
                false,
            ),
            ModelEntry::builtin(
                "anthropic.claude-3-7-sonnet-20250219-v1:0",
                "extended thinking",
                true,
                true,
            ),
            ModelEntry::builtin(
                "anthropic.claude-3-opus-20240229-v1:0",
                "most capable claude 3",
                true,
                false,
            ),
            ModelEntry::builtin("anthropic.claude-v2:1", "legacy", false, false),
            ModelEntry::builtin("anthropic.claude-v2", "legacy", false, false),
            ModelEntry::builtin("anthropic.claude-instant-v1", "legacy, fast", false, false),
        ];
        Self::from_entries(entries)
    }

    pub fn from_entries(entries: impl IntoIterator<Item = ModelEntry>) -> Self {
        let models = entries
            .into_iter()
            .map(|e| (e.model_id.clone(), e))
            .collect();
        Self { models }
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, entry: ModelEntry) {
        self.models.insert(entry.model_id.clone(), entry);
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelEntry> {
        self.models.get(model_id)
    }

    /// Entries sorted by model id.
    pub fn list(&self) -> Vec<&ModelEntry> {
        let mut all: Vec<&ModelEntry> = self.models.values().collect();
        all.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        all
    }

    /// Look up a model, suggesting close matches when it is unknown.
    pub fn resolve(&self, model_id: &str) -> Result<&ModelEntry, PromptwireError> {
        self.get(model_id).ok_or_else(|| PromptwireError::ModelNotFound {
            model: model_id.to_string(),
            suggestions: self.suggest(model_id),
        })
    }

    /// Check the payload against the capabilities its model advertises.
    pub fn check(&self, payload: &RequestPayload) -> Result<(), PromptwireError> {
        let entry = self.resolve(&payload.model_id)?;

        if !payload.image_keys.is_empty() && !entry.vision {
            return Err(PromptwireError::InvalidRequest(format!(
                "model {} does not accept images",
                entry.model_id
            )));
        }
        if payload.reasoning.is_some() && !entry.reasoning {
            return Err(PromptwireError::InvalidRequest(format!(
                "model {} does not support reasoning mode",
                entry.model_id
            )));
        }
        Ok(())
    }

    fn suggest(&self, model_id: &str) -> Vec<String> {
        let needle = model_id.to_lowercase();
        let mut matches: Vec<String> = self
            .models
            .keys()
            .filter(|k| {
                let k = k.to_lowercase();
                !needle.is_empty() && (k.contains(&needle) || needle.contains(&k))
            })
            .cloned()
            .collect();
        matches.sort();
        matches.truncate(3);
        matches
    }
}
