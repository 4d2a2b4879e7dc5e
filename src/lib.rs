pub mod client;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod engine_config;
pub mod errors;
pub mod init;
pub mod ledger;
pub mod session;
pub mod store;
pub mod stream;

pub use conversation::Conversation;
pub use errors::{ApiError, CompletionError, FeatureAccessError, GenerationError, LedgerError};
