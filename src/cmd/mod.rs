//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module     | Commands handled                                   |
//! |------------|----------------------------------------------------|
//! | `project`  | `Init`                                             |
//! | `config`   | `Config`                                           |
//! | `chat`     | `Chat`                                             |
//! | `history`  | `History`, `Sync`, `Edit`, `Remove`, `React`, `Clear` |
//! | `complete` | `Complete`                                         |

pub mod chat;
pub mod complete;
pub mod config;
pub mod history;
pub mod project;

pub use chat::cmd_chat;
pub use complete::cmd_complete;
pub use config::cmd_config;
pub use history::{cmd_clear, cmd_edit, cmd_history, cmd_react, cmd_remove, cmd_sync};
pub use project::cmd_init;

use anyhow::{Context, Result};
use tutorstream::config::Config;
use tutorstream::conversation::Conversation;
use tutorstream::session::GenerationClient;
use tutorstream::store::{FileStore, LedgerStore};

/// Open the project's persisted conversation.
pub(crate) async fn open_conversation(config: &Config) -> Result<Conversation> {
    let settings = config.settings();
    let client = GenerationClient::from_config(&settings.backend)
        .context("Failed to create HTTP client")?;
    let store = LedgerStore::new(FileStore::new(config.store_dir.clone()));
    Ok(Conversation::open(store, client, &settings.conversation).await)
}
