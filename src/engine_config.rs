//! Unified configuration for tutorstream.
//!
//! Settings are read from `.tutorstream/tutorstream.toml` and layered:
//! file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [backend]
//! base_url = "http://localhost:8000"
//! generate_path = "/api/generate"
//! history_path = "/api/history"
//! completion_path = "/api/file-completion"
//! connect_timeout_secs = 10
//!
//! [conversation]
//! context_window = 10
//! streaming = true
//! history_poll_secs = 30
//!
//! [store]
//! dir = ".tutorstream/store"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ledger::DEFAULT_CONTEXT_WINDOW;

pub const ENV_API_URL: &str = "TUTORSTREAM_API_URL";
pub const ENV_API_TOKEN: &str = "TUTORSTREAM_API_TOKEN";
pub const ENV_CONTEXT_WINDOW: &str = "TUTORSTREAM_CONTEXT_WINDOW";

/// Where the generation backend lives and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_generate_path")]
    pub generate_path: String,
    #[serde(default = "default_history_path")]
    pub history_path: String,
    #[serde(default = "default_completion_path")]
    pub completion_path: String,
    /// Bearer token forwarded with every request, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_generate_path() -> String {
    "/api/generate".to_string()
}

fn default_history_path() -> String {
    "/api/history".to_string()
}

fn default_completion_path() -> String {
    "/api/file-completion".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            generate_path: default_generate_path(),
            history_path: default_history_path(),
            completion_path: default_completion_path(),
            api_token: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Conversation behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSection {
    /// How many recent messages are sent as memory with each prompt
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// Use incremental delivery (false = single JSON response)
    #[serde(default = "default_streaming")]
    pub streaming: bool,
    /// Seconds between authoritative history fetches in watch mode
    #[serde(default = "default_history_poll_secs")]
    pub history_poll_secs: u64,
}

fn default_context_window() -> usize {
    DEFAULT_CONTEXT_WINDOW
}

fn default_streaming() -> bool {
    true
}

fn default_history_poll_secs() -> u64 {
    30
}

impl Default for ConversationSection {
    fn default() -> Self {
        Self {
            context_window: default_context_window(),
            streaming: default_streaming(),
            history_poll_secs: default_history_poll_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSection {
    /// Directory for the persisted conversation (relative paths resolve
    /// against the project directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// The complete tutorstream.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineToml {
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub conversation: ConversationSection,
    #[serde(default)]
    pub store: StoreSection,
}

impl EngineToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse tutorstream.toml")
    }

    /// Load `tutorstream.toml` from `data_dir`, or defaults when absent.
    pub fn load_or_default(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize tutorstream.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Overlay environment variables on top of the file settings.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overlay values from any key lookup. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.is_empty()) {
            self.backend.base_url = url;
        }
        if let Some(token) = lookup(ENV_API_TOKEN).filter(|v| !v.is_empty()) {
            self.backend.api_token = Some(token);
        }
        if let Some(window) = lookup(ENV_CONTEXT_WINDOW).and_then(|v| v.parse().ok()) {
            self.conversation.context_window = window;
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let url = &self.backend.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            warnings.push(format!(
                "Invalid base_url '{}': should start with http:// or https://",
                url
            ));
        }

        for (name, path) in [
            ("generate_path", &self.backend.generate_path),
            ("history_path", &self.backend.history_path),
            ("completion_path", &self.backend.completion_path),
        ] {
            if !path.starts_with('/') {
                warnings.push(format!("{} '{}' should start with '/'", name, path));
            }
        }

        if self.conversation.context_window == 0 {
            warnings.push(
                "context_window = 0 sends no conversation memory with prompts".to_string(),
            );
        }
        if self.conversation.history_poll_secs == 0 {
            warnings.push("history_poll_secs must be at least 1".to_string());
        }

        warnings
    }
}

/// File name of the config inside the data directory.
pub const CONFIG_FILE: &str = "tutorstream.toml";

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let toml = EngineToml::default();
        assert_eq!(toml.conversation.context_window, 10);
        assert!(toml.conversation.streaming);
        assert_eq!(toml.backend.generate_path, "/api/generate");
        assert!(toml.backend.api_token.is_none());
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let toml = EngineToml::parse(
            r#"
            [backend]
            base_url = "https://tutor.example.com"

            [conversation]
            context_window = 4
            "#,
        )
        .unwrap();
        assert_eq!(toml.backend.base_url, "https://tutor.example.com");
        assert_eq!(toml.backend.history_path, "/api/history");
        assert_eq!(toml.conversation.context_window, 4);
        assert!(toml.conversation.streaming);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = EngineToml::parse("[backend\nbase_url=").unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_overrides_layer_on_file() {
        let mut toml = EngineToml::default();
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_API_URL, "https://override.example.com"),
            (ENV_API_TOKEN, "secret"),
            (ENV_CONTEXT_WINDOW, "not-a-number"),
        ]);
        toml.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(toml.backend.base_url, "https://override.example.com");
        assert_eq!(toml.backend.api_token.as_deref(), Some("secret"));
        assert_eq!(toml.conversation.context_window, 10);
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut toml = EngineToml::default();
        toml.backend.base_url = "localhost:8000".to_string();
        toml.backend.history_path = "api/history".to_string();
        toml.conversation.context_window = 0;
        let warnings = toml.validate();
        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].contains("base_url"));
        assert!(warnings[1].contains("history_path"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut toml = EngineToml::default();
        toml.conversation.streaming = false;
        toml.save(&path).unwrap();

        let loaded = EngineToml::load_or_default(dir.path()).unwrap();
        assert!(!loaded.conversation.streaming);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let loaded = EngineToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.backend.base_url, "http://localhost:8000");
    }
}
