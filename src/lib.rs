pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod invoke;
pub mod logging;
pub mod provider;
pub mod tools;
pub mod types;

pub use chat::{drain, FunctionRegistry, SessionEvent, SessionRegistry};
pub use cli::run_cli;
pub use config::Config;
pub use error::{ChatError, Result};
pub use invoke::{Generation, InferenceBackend, Orchestrator};
pub use provider::{LocalBackend, ModelProvider};
