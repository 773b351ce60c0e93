//! CLI route: single route table and run context. Dispatches to `Repo` and presentation.

use crate::cli::parse::{Commands, SelectionArgs, TransferArgs};
use crate::cli::presentation::{
    format_batch_text, format_checkout_text, format_pull_text, format_status_json,
    format_status_text, format_transfer_text,
};
use crate::config::ConfigLoader;
use crate::error::RepoError;
use crate::repo::{OperationOptions, Repo};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// Rendered command result; `ok` is false when part of a batch failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub text: String,
    pub ok: bool,
}

impl CommandOutput {
    fn new(text: String, ok: bool) -> Self {
        Self { text, ok }
    }
}

/// Runtime context for CLI execution: working directory, workspace and config override.
pub struct RunContext {
    workspace: PathBuf,
    config_path: Option<PathBuf>,
    cwd: PathBuf,
}

impl RunContext {
    pub fn new(workspace: PathBuf, config_path: Option<PathBuf>) -> Result<Self, RepoError> {
        let cwd = std::env::current_dir()?;
        let workspace = if workspace.is_absolute() {
            workspace
        } else {
            cwd.join(workspace)
        };
        Ok(Self {
            workspace,
            config_path,
            cwd,
        })
    }

    fn open_repo(&self) -> Result<Repo, RepoError> {
        match &self.config_path {
            Some(path) => {
                let root = Repo::discover(&self.workspace)?;
                let config = ConfigLoader::load_from_file(path)?;
                Repo::with_config(root, config)
            }
            None => Repo::open(&self.workspace),
        }
    }

    /// Targets are given relative to the current directory
    fn absolute(&self, targets: &[PathBuf]) -> Vec<PathBuf> {
        targets.iter().map(|t| absolutize(&self.cwd, t)).collect()
    }

    fn options(
        selection: &SelectionArgs,
        transfer: Option<&TransferArgs>,
        force: bool,
        allow_missing: bool,
    ) -> OperationOptions {
        OperationOptions {
            recursive: selection.recursive,
            with_deps: selection.with_deps,
            allow_missing,
            force,
            jobs: transfer.and_then(|t| t.jobs),
            remote: transfer.and_then(|t| t.remote.clone()),
        }
    }

    /// Execute a CLI command via the single route table.
    pub async fn execute(&self, command: &Commands) -> Result<CommandOutput, RepoError> {
        let started = Instant::now();
        let result = self.execute_inner(command).await;
        info!(
            command = command.name(),
            ok = matches!(&result, Ok(out) if out.ok),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Command finished"
        );
        result
    }

    async fn execute_inner(&self, command: &Commands) -> Result<CommandOutput, RepoError> {
        let repo = match command {
            Commands::Init => Repo::init(&self.workspace)?,
            _ => self.open_repo()?,
        };
        match command {
            Commands::Init => Ok(CommandOutput::new(
                format!("Initialized lode workspace in {}", repo.root().display()),
                true,
            )),
            Commands::Add { targets } => {
                let result = repo
                    .add(&self.absolute(targets), &OperationOptions::default())
                    .await?;
                Ok(CommandOutput::new(
                    format_batch_text("Added", &result),
                    result.is_ok(),
                ))
            }
            Commands::Commit {
                selection,
                allow_missing,
            } => {
                let options = Self::options(selection, None, false, *allow_missing);
                let result = repo
                    .commit(&self.absolute(&selection.targets), &options)
                    .await?;
                Ok(CommandOutput::new(
                    format_batch_text("Committed", &result),
                    result.is_ok(),
                ))
            }
            Commands::Checkout {
                selection,
                force,
                transfer,
            } => {
                let options = Self::options(selection, Some(transfer), *force, false);
                let result = repo
                    .checkout(&self.absolute(&selection.targets), &options)
                    .await?;
                Ok(CommandOutput::new(
                    format_checkout_text(&result),
                    result.is_ok(),
                ))
            }
            Commands::Push {
                selection,
                transfer,
            } => {
                let options = Self::options(selection, Some(transfer), false, false);
                let report = repo
                    .push(&self.absolute(&selection.targets), &options)
                    .await?;
                Ok(CommandOutput::new(
                    format_transfer_text("pushed", &report),
                    report.failed.is_empty(),
                ))
            }
            Commands::Fetch {
                selection,
                transfer,
            } => {
                let options = Self::options(selection, Some(transfer), false, false);
                let report = repo
                    .fetch(&self.absolute(&selection.targets), &options)
                    .await?;
                Ok(CommandOutput::new(
                    format_transfer_text("fetched", &report),
                    report.failed.is_empty(),
                ))
            }
            Commands::Pull {
                selection,
                force,
                transfer,
            } => {
                let options = Self::options(selection, Some(transfer), *force, false);
                let summary = repo
                    .pull(&self.absolute(&selection.targets), &options)
                    .await?;
                let ok = summary.failed.is_empty() && summary.failures.is_empty();
                Ok(CommandOutput::new(format_pull_text(&summary), ok))
            }
            Commands::Status { selection, format } => {
                let options = Self::options(selection, None, false, false);
                let statuses = repo.status(&self.absolute(&selection.targets), &options)?;
                let text = if format == "json" {
                    format_status_json(&statuses)?
                } else {
                    format_status_text(&statuses)
                };
                Ok(CommandOutput::new(text, true))
            }
        }
    }
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}
