use anyhow::Result;
use std::sync::Arc;

use crate::cli::{CliCommand, parse_cli_args, usage_text, version_text};
use crate::command_handlers::{
    handle_register, handle_run, handle_scan_once, handle_scan_worker, handle_status, handle_track,
};
use crate::config::PresenceConfig;

pub type OutputHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything a command needs from its environment
#[derive(Clone)]
pub struct AppContext {
    config: PresenceConfig,
    output_hook: OutputHook,
}

impl AppContext {
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            config,
            output_hook: Arc::new(|line| println!("{}", line)),
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(PresenceConfig::from_env()?))
    }

    pub fn with_output_hook(mut self, output_hook: OutputHook) -> Self {
        self.output_hook = output_hook;
        self
    }

    pub fn with_db_path(mut self, db_path: std::path::PathBuf) -> Self {
        self.config.db_path = db_path;
        self
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    pub fn emit_line(&self, line: &str) {
        (self.output_hook)(line);
    }
}

/// Run the app by parsing CLI-style args and dispatching the command.
pub async fn run<I, S>(args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let command = parse_cli_args(args)?;
    let context = AppContext::from_env()?;
    execute_command_with_context(command, &context).await
}

/// Execute a pre-parsed command. This is reusable for non-CLI entrypoints.
pub async fn execute_command_with_context(command: CliCommand, context: &AppContext) -> Result<()> {
    match command {
        CliCommand::Help => {
            context.emit_line(&usage_text());
            Ok(())
        }
        CliCommand::Version => {
            context.emit_line(&version_text());
            Ok(())
        }
        CliCommand::Run { options } => handle_run(context, &options).await,
        CliCommand::ScanOnce { options } => handle_scan_once(context, &options).await,
        CliCommand::ScanWorker { options } => handle_scan_worker(context, &options).await,
        CliCommand::Status => handle_status(context),
        CliCommand::Register { mac, name, track } => handle_register(context, &mac, &name, track),
        CliCommand::Track { mac, enabled } => handle_track(context, &mac, enabled),
    }
}
