//! Configuration view and validation commands: `tutorstream config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use tutorstream::engine_config::{CONFIG_FILE, EngineToml};
    use tutorstream::init::data_dir;

    let data_dir = data_dir(project_dir);
    let config_path = data_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("tutorstream Configuration");
            println!("=========================");
            println!();

            let mut toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                EngineToml::load(&config_path)?
            } else {
                println!("No tutorstream.toml found at {}", config_path.display());
                println!("Using default configuration.");
                EngineToml::default()
            };
            println!();
            toml.apply_env();

            println!("Effective values (with env overrides):");
            println!("[backend]");
            println!("  base_url = \"{}\"", toml.backend.base_url);
            println!("  generate_path = \"{}\"", toml.backend.generate_path);
            println!("  history_path = \"{}\"", toml.backend.history_path);
            println!("  completion_path = \"{}\"", toml.backend.completion_path);
            println!(
                "  api_token = {}",
                if toml.backend.api_token.is_some() {
                    "(set)"
                } else {
                    "(not set)"
                }
            );
            println!(
                "  connect_timeout_secs = {}",
                toml.backend.connect_timeout_secs
            );
            println!();
            println!("[conversation]");
            println!("  context_window = {}", toml.conversation.context_window);
            println!("  streaming = {}", toml.conversation.streaming);
            println!(
                "  history_poll_secs = {}",
                toml.conversation.history_poll_secs
            );
            println!();
            println!("[store]");
            match &toml.store.dir {
                Some(dir) => println!("  dir = \"{}\"", dir.display()),
                None => println!("  dir = (default: .tutorstream/store)"),
            }
            println!();

            if !config_path.exists() {
                println!("Run 'tutorstream config init' to create a tutorstream.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No tutorstream.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = EngineToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!(
                    "tutorstream.toml already exists at {}",
                    config_path.display()
                );
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !data_dir.exists() {
                std::fs::create_dir_all(&data_dir)?;
            }

            EngineToml::default().save(&config_path)?;

            println!("Created tutorstream.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [backend] base_url, endpoint paths, api_token");
            println!("  - [conversation] context_window, streaming, history_poll_secs");
            println!("  - [store] dir");
            println!();
        }
    }

    Ok(())
}
