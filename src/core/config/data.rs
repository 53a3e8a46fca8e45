use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::core::providers::gemini::DEFAULT_GEMINI_BASE_URL;
use crate::core::providers::openai::DEFAULT_OPENAI_BASE_URL;
use crate::core::think_parser::ThinkMarkers;

/// Wire protocol a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Gemini,
}

impl ProviderKind {
    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => DEFAULT_OPENAI_BASE_URL,
            ProviderKind::Gemini => DEFAULT_GEMINI_BASE_URL,
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Gemini => "gemini-2.5-flash",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
}

impl ProviderConfig {
    pub fn resolved_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.kind.default_base_url().to_string())
    }
}

/// Providers available without any configuration.
pub fn builtin_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            id: "openai".to_string(),
            kind: ProviderKind::OpenAi,
            base_url: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
        },
        ProviderConfig {
            id: "gemini".to_string(),
            kind: ProviderKind::Gemini,
            base_url: None,
            api_key_env: Some("GEMINI_API_KEY".to_string()),
        },
    ]
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Config {
    pub default_provider: Option<String>,
    pub default_model: Option<String>,
    /// User-defined providers; an entry with a built-in id replaces it.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub think_markers: ThinkMarkers,
    /// Models that must not be streamed map to `false`.
    #[serde(default)]
    pub stream_models: HashMap<String, bool>,
    /// Generate a title after the first completed turn (default on).
    pub auto_title: Option<bool>,
    pub title_model: Option<String>,
    pub storage_dir: Option<PathBuf>,
    /// Language requested for generated titles.
    pub language: Option<String>,
    pub log_file: Option<PathBuf>,
}

impl Config {
    pub fn find_provider(&self, id: &str) -> Option<ProviderConfig> {
        self.providers
            .iter()
            .find(|p| p.id.eq_ignore_ascii_case(id))
            .cloned()
            .or_else(|| {
                builtin_providers()
                    .into_iter()
                    .find(|p| p.id.eq_ignore_ascii_case(id))
            })
    }

    /// The requested provider, else the configured default, else `openai`.
    pub fn resolve_provider(&self, requested: Option<&str>) -> Option<ProviderConfig> {
        let id = requested
            .filter(|id| !id.is_empty())
            .or(self.default_provider.as_deref())
            .unwrap_or("openai");
        self.find_provider(id)
    }

    pub fn resolve_model(&self, requested: Option<&str>, provider: &ProviderConfig) -> String {
        requested
            .filter(|model| !model.is_empty())
            .map(str::to_string)
            .or_else(|| self.default_model.clone())
            .unwrap_or_else(|| provider.kind.default_model().to_string())
    }

    /// Models stream unless listed as `false` in `stream_models`.
    pub fn supports_stream(&self, model: &str) -> bool {
        self.stream_models.get(model).copied().unwrap_or(true)
    }

    pub fn auto_title_enabled(&self) -> bool {
        self.auto_title.unwrap_or(true)
    }

    pub fn title_language(&self) -> &str {
        self.language.as_deref().unwrap_or("English")
    }
}

/// Renders a path with `~` for the home directory on Unix.
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            if let Ok(relative) = path.strip_prefix(PathBuf::from(home)) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
