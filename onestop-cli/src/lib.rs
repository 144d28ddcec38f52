//! Command-line interface for the Onestop transit registry.
#![forbid(unsafe_code)]

use camino::Utf8Path;
use clap::{Parser, Subcommand};
use onestop_core::ApplyConfig;
use onestop_store::Registry;
use serde::Serialize;
use std::io::Write;

mod apply;
mod create;
mod error;
mod paths;

pub use error::CliError;

use apply::{ApplyArgs, TrialArgs, run_apply, run_trial};
use create::{CreateArgs, run_create};

const ARG_CREATE_PAYLOAD: &str = "payload";
const ARG_CHANGESET_ID: &str = "changeset-id";
const ARG_DATABASE: &str = "database";
const ARG_NOTES: &str = "notes";
const ARG_USER_EMAIL: &str = "user-email";
const ARG_ADMIN: &str = "admin";
const ARG_FEED: &str = "feed";
const ARG_FEED_VERSION_SHA1: &str = "feed-version-sha1";
const ARG_MAX_ENTITIES_PER_PAYLOAD: &str = "max-entities-per-payload";
const ARG_STOP_RSP_DISTANCE_THRESHOLD: &str = "stop-rsp-distance-threshold-meters";
const ENV_CREATE_PAYLOAD: &str = "ONESTOP_CMDS_CREATE_PAYLOAD";
const ENV_CREATE_DATABASE: &str = "ONESTOP_CMDS_CREATE_DATABASE";
const ENV_APPLY_CHANGESET_ID: &str = "ONESTOP_CMDS_APPLY_CHANGESET_ID";
const ENV_APPLY_DATABASE: &str = "ONESTOP_CMDS_APPLY_DATABASE";
const ENV_TRIAL_CHANGESET_ID: &str = "ONESTOP_CMDS_TRIAL_CHANGESET_ID";
const ENV_TRIAL_DATABASE: &str = "ONESTOP_CMDS_TRIAL_DATABASE";

/// Run the Onestop CLI with the current process arguments and environment.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    match cli.command {
        Command::Create(args) => run_create(args),
        Command::Apply(args) => run_apply(args),
        Command::Trial(args) => run_trial(args),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "onestop",
    about = "Edit the Onestop transit registry through changesets",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a changeset from a JSON change payload.
    Create(CreateArgs),
    /// Apply a changeset to the registry.
    Apply(ApplyArgs),
    /// Report what applying a changeset would do without writing anything.
    Trial(TrialArgs),
}

fn open_registry(database: &Utf8Path, settings: ApplyConfig) -> Result<Registry, CliError> {
    Registry::open(database, settings).map_err(|source| CliError::OpenRegistry {
        path: database.to_path_buf(),
        source: Box::new(source),
    })
}

fn write_json<T: Serialize>(writer: &mut dyn Write, value: &T) -> Result<(), CliError> {
    let payload = serde_json::to_string_pretty(value).map_err(CliError::SerialiseOutput)?;
    writer
        .write_all(payload.as_bytes())
        .map_err(CliError::WriteOutput)?;
    writer.write_all(b"\n").map_err(CliError::WriteOutput)?;
    Ok(())
}

#[cfg(test)]
mod tests;
