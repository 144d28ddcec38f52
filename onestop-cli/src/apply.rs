//! Apply and trial command implementations for the Onestop CLI.

use camino::Utf8PathBuf;
use clap::Parser;
use onestop_core::{ApplyConfig, ChangesetId, Issue};
use onestop_store::TrialOutcome;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::{
    ARG_CHANGESET_ID, ARG_DATABASE, ARG_STOP_RSP_DISTANCE_THRESHOLD, CliError,
    ENV_APPLY_CHANGESET_ID, ENV_APPLY_DATABASE, ENV_TRIAL_CHANGESET_ID, ENV_TRIAL_DATABASE,
    open_registry, paths, write_json,
};

/// CLI arguments for the `apply` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "apply",
    long_about = "Apply every payload of a changeset in one transaction, run \
                 the quality checks over the touched entities and reconcile \
                 the open issues. Prints the outcome as JSON.",
    about = "Apply a changeset"
)]
#[ortho_config(prefix = "ONESTOP")]
pub(crate) struct ApplyArgs {
    /// Id of the changeset to apply.
    #[arg(value_name = "id")]
    #[serde(default)]
    pub(crate) changeset_id: Option<ChangesetId>,
    /// Path to an existing registry database.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Distance in metres above which a stop is reported as detached from
    /// its route stop pattern.
    #[arg(long = ARG_STOP_RSP_DISTANCE_THRESHOLD, value_name = "meters")]
    #[serde(default)]
    pub(crate) stop_rsp_distance_threshold_meters: Option<f64>,
}

/// CLI arguments for the `trial` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "trial",
    long_about = "Run the full apply algorithm for a changeset and roll it \
                 back. Prints whether the apply would succeed and the issues \
                 it would leave open.",
    about = "Dry-run a changeset"
)]
#[ortho_config(prefix = "ONESTOP")]
pub(crate) struct TrialArgs {
    /// Id of the changeset to try.
    #[arg(value_name = "id")]
    #[serde(default)]
    pub(crate) changeset_id: Option<ChangesetId>,
    /// Path to an existing registry database.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Distance in metres above which a stop is reported as detached from
    /// its route stop pattern.
    #[arg(long = ARG_STOP_RSP_DISTANCE_THRESHOLD, value_name = "meters")]
    #[serde(default)]
    pub(crate) stop_rsp_distance_threshold_meters: Option<f64>,
}

impl ApplyArgs {
    pub(crate) fn into_config(self) -> Result<ChangesetConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ChangesetConfig::resolve(
            merged.changeset_id,
            merged.database,
            merged.stop_rsp_distance_threshold_meters,
            (ENV_APPLY_CHANGESET_ID, ENV_APPLY_DATABASE),
        )
    }
}

impl TrialArgs {
    pub(crate) fn into_config(self) -> Result<ChangesetConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ChangesetConfig::resolve(
            merged.changeset_id,
            merged.database,
            merged.stop_rsp_distance_threshold_meters,
            (ENV_TRIAL_CHANGESET_ID, ENV_TRIAL_DATABASE),
        )
    }
}

/// Resolved configuration shared by `apply` and `trial`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ChangesetConfig {
    pub(crate) changeset_id: ChangesetId,
    pub(crate) database: Utf8PathBuf,
    pub(crate) settings: ApplyConfig,
}

impl ChangesetConfig {
    pub(crate) fn resolve(
        changeset_id: Option<ChangesetId>,
        database: Option<Utf8PathBuf>,
        threshold: Option<f64>,
        (env_changeset_id, env_database): (&'static str, &'static str),
    ) -> Result<Self, CliError> {
        let changeset_id = changeset_id.ok_or(CliError::MissingArgument {
            field: ARG_CHANGESET_ID,
            env: env_changeset_id,
        })?;
        let database = database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: env_database,
        })?;
        let defaults = ApplyConfig::default();
        let settings = ApplyConfig {
            stop_rsp_distance_threshold_meters: threshold
                .unwrap_or(defaults.stop_rsp_distance_threshold_meters),
            ..defaults
        };
        settings.validate()?;
        Ok(Self {
            changeset_id,
            database,
            settings,
        })
    }
}

/// JSON rendering of a dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TrialReport {
    pub(crate) would_succeed: bool,
    pub(crate) issues: Vec<Issue>,
    pub(crate) failure: Option<String>,
}

impl From<TrialOutcome> for TrialReport {
    fn from(outcome: TrialOutcome) -> Self {
        Self {
            would_succeed: outcome.would_succeed,
            issues: outcome.issues,
            failure: outcome.failure.map(|err| err.to_string()),
        }
    }
}

pub(crate) fn run_apply(args: ApplyArgs) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    run_apply_with(args, &mut stdout)
}

pub(crate) fn run_apply_with(args: ApplyArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    paths::require_file(&config.database, ARG_DATABASE)?;
    let mut registry = open_registry(&config.database, config.settings)?;
    let outcome = registry.apply(config.changeset_id)?;
    write_json(writer, &outcome)
}

pub(crate) fn run_trial(args: TrialArgs) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    run_trial_with(args, &mut stdout)
}

pub(crate) fn run_trial_with(args: TrialArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    paths::require_file(&config.database, ARG_DATABASE)?;
    let mut registry = open_registry(&config.database, config.settings)?;
    let report = TrialReport::from(registry.trial_apply(config.changeset_id));
    write_json(writer, &report)
}
