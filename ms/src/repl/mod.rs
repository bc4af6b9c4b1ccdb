//! Interactive REPL for MentorSTEM+
//!
//! A line-based front-end over [`Assistant`]: slash commands drive the
//! form, proposals, plan editing, history, narration and export; plain
//! text goes to InspiraTEC while a refinement chat is open.

mod command;
mod session;

pub use command::{Command, CommandError};
pub use session::ReplSession;

use std::sync::Arc;

use eyre::Result;

use crate::app::Assistant;
use crate::config::Config;
use crate::form::ProjectForm;
use crate::llm::{LlmClient, create_client};
use crate::store::JsonFileStore;

/// Build the model client, pointing configuration mistakes at the config file
fn connect(config: &Config) -> Result<Arc<dyn LlmClient>> {
    create_client(&config.llm).map_err(|e| {
        if e.is_initialization() {
            eyre::eyre!("{} Check the `llm` section of the configuration.", e)
        } else {
            eyre::eyre!("Failed to create LLM client: {}", e)
        }
    })
}

/// Run the interactive REPL
///
/// This is the main entry point for `ms new`.
pub async fn run_interactive(config: Config, initial_form: Option<ProjectForm>) -> Result<()> {
    let client = connect(&config)?;
    let store = Arc::new(JsonFileStore::new(config.storage.history_path()));
    let assistant = Assistant::new(config, client, store)?;

    let mut session = ReplSession::new(assistant);
    session.run(initial_form).await
}

/// Run the REPL with a saved project already open
pub async fn run_with_saved(config: Config, id: i64) -> Result<()> {
    let client = connect(&config)?;
    let store = Arc::new(JsonFileStore::new(config.storage.history_path()));
    let mut assistant = Assistant::new(config, client, store)?;
    assistant.open_saved(id)?;

    let mut session = ReplSession::new(assistant);
    session.run(None).await
}
