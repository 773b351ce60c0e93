//! CLI domain: parse, route, and presentation only.
//! No domain orchestration; a single route table dispatches to `Repo`.

mod parse;
mod presentation;
mod route;

pub use parse::{Cli, Commands, SelectionArgs, TransferArgs};
pub use presentation::{
    format_batch_text, format_checkout_text, format_pull_text, format_status_json,
    format_status_text, format_transfer_text,
};
pub use route::{CommandOutput, RunContext};
