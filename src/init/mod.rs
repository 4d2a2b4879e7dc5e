//! `tutorstream init`: create the project data directory.
//!
//! ```text
//! .tutorstream/
//! ├── tutorstream.toml   # Configuration (defaults written on first init)
//! └── store/             # Persisted conversation
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::engine_config::{CONFIG_FILE, EngineToml};

/// Name of the per-project data directory.
pub const DATA_DIR: &str = ".tutorstream";

/// Default store directory inside [`DATA_DIR`].
pub const STORE_DIR: &str = "store";

#[derive(Debug)]
pub struct InitResult {
    pub data_dir: PathBuf,
    /// False if the directory already existed.
    pub created: bool,
    /// Whether a default config file was written.
    pub wrote_config: bool,
}

/// Initialize `project_dir`. Safe to run again: missing pieces are filled
/// in and an existing config is never overwritten.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let data_dir = data_dir(project_dir);
    let created = !data_dir.exists();

    let store_dir = data_dir.join(STORE_DIR);
    std::fs::create_dir_all(&store_dir)
        .with_context(|| format!("Failed to create directory: {}", store_dir.display()))?;

    let config_path = data_dir.join(CONFIG_FILE);
    let wrote_config = if config_path.exists() {
        false
    } else {
        EngineToml::default().save(&config_path)?;
        true
    };

    Ok(InitResult {
        data_dir,
        created,
        wrote_config,
    })
}

pub fn is_initialized(project_dir: &Path) -> bool {
    data_dir(project_dir).exists()
}

pub fn data_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(DATA_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_project_creates_layout() {
        let dir = tempdir().unwrap();
        assert!(!is_initialized(dir.path()));

        let result = init_project(dir.path()).unwrap();
        assert!(result.created);
        assert!(result.wrote_config);
        assert_eq!(result.data_dir, dir.path().join(".tutorstream"));
        assert!(result.data_dir.join("store").is_dir());
        assert!(result.data_dir.join("tutorstream.toml").is_file());
        assert!(is_initialized(dir.path()));
    }

    #[test]
    fn test_init_project_is_idempotent_and_keeps_config() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();
        let config_path = dir.path().join(DATA_DIR).join(CONFIG_FILE);
        std::fs::write(&config_path, "[conversation]\ncontext_window = 3\n").unwrap();

        let again = init_project(dir.path()).unwrap();
        assert!(!again.created);
        assert!(!again.wrote_config);
        let toml = EngineToml::load(&config_path).unwrap();
        assert_eq!(toml.conversation.context_window, 3);
    }
}
