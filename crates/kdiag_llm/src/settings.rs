//! Provider settings and credentials.
//!
//! Settings are layered: built-in defaults, then an optional
//! `<workspace>/.kdiag/settings.json`, then environment overrides.
//! API keys only ever come from the environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use kdiag_core::DEFAULT_SEARCH_MAX_TOKENS;

use crate::error::{LlmError, LlmResult};

pub const PERPLEXITY_API_KEY_ENV: &str = "PERPLEXITY_API_KEY";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Settings for the search-augmented model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchSettings {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.perplexity.ai".to_string(),
            model: "sonar".to_string(),
            max_tokens: DEFAULT_SEARCH_MAX_TOKENS,
        }
    }
}

/// Settings for the general-purpose chat model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    pub base_url: String,
    pub model: String,
    /// Provider default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: None,
        }
    }
}

/// All provider settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderSettings {
    pub search: SearchSettings,
    pub chat: ChatSettings,
}

impl ProviderSettings {
    /// Path of the settings file inside a workspace.
    pub fn settings_path(workspace_root: &Path) -> PathBuf {
        workspace_root.join(".kdiag").join("settings.json")
    }

    /// Defaults, overlaid by the workspace settings file if present, then
    /// by environment variables.
    pub fn load(workspace_root: &Path) -> LlmResult<Self> {
        let path = Self::settings_path(workspace_root);
        let mut settings = if path.exists() {
            Self::from_file(&path)?
        } else {
            debug!("No settings file at {:?}, using defaults", path);
            Self::default()
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Read a settings file. Missing sections fall back to defaults.
    pub fn from_file(path: &Path) -> LlmResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings = serde_json::from_str(&content)
            .map_err(|e| LlmError::Settings(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded provider settings from {:?}", path);
        Ok(settings)
    }

    /// Apply `KDIAG_*` overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |target: &mut String, key: &str| {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *target = value;
            }
        };
        set(&mut self.search.model, "KDIAG_SEARCH_MODEL");
        set(&mut self.search.base_url, "KDIAG_SEARCH_BASE_URL");
        set(&mut self.chat.model, "KDIAG_CHAT_MODEL");
        set(&mut self.chat.base_url, "KDIAG_CHAT_BASE_URL");
    }
}

/// API keys for both providers. Either may be missing; the first call
/// that needs a missing key fails.
#[derive(Clone, Default)]
pub struct Credentials {
    pub perplexity_api_key: Option<String>,
    pub openai_api_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Self {
            perplexity_api_key: non_empty(PERPLEXITY_API_KEY_ENV),
            openai_api_key: non_empty(OPENAI_API_KEY_ENV),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("perplexity_api_key", &self.perplexity_api_key.as_ref().map(|_| "***"))
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "***"))
            .finish()
    }
}
