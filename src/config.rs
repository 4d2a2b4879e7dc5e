use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::engine_config::{CONFIG_FILE, EngineToml};
use crate::init::{DATA_DIR, STORE_DIR};

/// Values given on the command line. They win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub api_url: Option<String>,
    pub context_window: Option<usize>,
    pub no_stream: bool,
}

/// Runtime configuration.
///
/// Resolves the project directories and carries the fully layered
/// [`EngineToml`] (file, then environment, then CLI).
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub data_dir: PathBuf,
    pub config_path: PathBuf,
    pub store_dir: PathBuf,
    pub verbose: bool,
    settings: EngineToml,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool, overrides: &CliOverrides) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let data_dir = project_dir.join(DATA_DIR);

        let mut settings = EngineToml::load_or_default(&data_dir)?;
        settings.apply_env();
        Self::apply_cli(&mut settings, overrides);

        Ok(Self::from_parts(project_dir, verbose, settings))
    }

    /// Build from already-loaded settings, without touching the environment.
    pub fn from_parts(project_dir: PathBuf, verbose: bool, settings: EngineToml) -> Self {
        let data_dir = project_dir.join(DATA_DIR);
        let config_path = data_dir.join(CONFIG_FILE);
        let store_dir = match &settings.store.dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => project_dir.join(dir),
            None => data_dir.join(STORE_DIR),
        };

        Self {
            project_dir,
            data_dir,
            config_path,
            store_dir,
            verbose,
            settings,
        }
    }

    fn apply_cli(settings: &mut EngineToml, overrides: &CliOverrides) {
        if let Some(url) = &overrides.api_url {
            settings.backend.base_url = url.clone();
        }
        if let Some(window) = overrides.context_window {
            settings.conversation.context_window = window;
        }
        if overrides.no_stream {
            settings.conversation.streaming = false;
        }
    }

    pub fn settings(&self) -> &EngineToml {
        &self.settings
    }
}
