//! Create command implementation for the Onestop CLI.

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use onestop_core::{ApplyConfig, ChangesetId, ChangesetUser, NewChangeset, PayloadBody};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::{
    ARG_ADMIN, ARG_CREATE_PAYLOAD, ARG_DATABASE, ARG_FEED, ARG_FEED_VERSION_SHA1,
    ARG_MAX_ENTITIES_PER_PAYLOAD, ARG_NOTES, ARG_USER_EMAIL, CliError, ENV_CREATE_DATABASE,
    ENV_CREATE_PAYLOAD, open_registry, paths, write_json,
};

/// CLI arguments for the `create` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "create",
    long_about = "Create a changeset from a JSON file holding a change payload \
                 (`{\"changes\": [...]}`). Large payloads are split into \
                 several payloads of at most --max-entities-per-payload \
                 operations.",
    about = "Create a changeset from a change payload"
)]
#[ortho_config(prefix = "ONESTOP")]
pub(crate) struct CreateArgs {
    /// Path to a JSON file containing the change payload.
    #[arg(value_name = "path")]
    #[serde(default)]
    pub(crate) payload: Option<Utf8PathBuf>,
    /// Path to the registry database; created when missing.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Free-form description stored with the changeset.
    #[arg(long = ARG_NOTES, value_name = "text")]
    #[serde(default)]
    pub(crate) notes: Option<String>,
    /// E-mail address of the author.
    #[arg(long = ARG_USER_EMAIL, value_name = "email")]
    #[serde(default)]
    pub(crate) user_email: Option<String>,
    /// Mark the author as an administrator.
    #[arg(long = ARG_ADMIN)]
    #[serde(default)]
    pub(crate) admin: bool,
    /// Onestop id of the feed the payload was imported from.
    #[arg(long = ARG_FEED, value_name = "onestop-id")]
    #[serde(default)]
    pub(crate) feed: Option<String>,
    /// SHA-1 of the feed archive the payload was imported from.
    #[arg(long = ARG_FEED_VERSION_SHA1, value_name = "sha1")]
    #[serde(default)]
    pub(crate) feed_version_sha1: Option<String>,
    /// Maximum operations stored in a single payload.
    #[arg(long = ARG_MAX_ENTITIES_PER_PAYLOAD, value_name = "count")]
    #[serde(default)]
    pub(crate) max_entities_per_payload: Option<usize>,
}

impl CreateArgs {
    pub(crate) fn into_config(self) -> Result<CreateConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        CreateConfig::try_from(merged)
    }
}

/// Feed snapshot a changeset was imported from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FeedSource {
    pub(crate) feed: String,
    pub(crate) sha1: String,
}

/// Resolved `create` command configuration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CreateConfig {
    pub(crate) payload: Utf8PathBuf,
    pub(crate) database: Utf8PathBuf,
    pub(crate) notes: Option<String>,
    pub(crate) user: Option<ChangesetUser>,
    pub(crate) source: Option<FeedSource>,
    pub(crate) settings: ApplyConfig,
}

impl TryFrom<CreateArgs> for CreateConfig {
    type Error = CliError;

    fn try_from(args: CreateArgs) -> Result<Self, Self::Error> {
        let payload = args.payload.ok_or(CliError::MissingArgument {
            field: ARG_CREATE_PAYLOAD,
            env: ENV_CREATE_PAYLOAD,
        })?;
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_CREATE_DATABASE,
        })?;
        let source = match (args.feed, args.feed_version_sha1) {
            (Some(feed), Some(sha1)) => Some(FeedSource { feed, sha1 }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(CliError::MissingCompanion {
                    field: ARG_FEED,
                    companion: ARG_FEED_VERSION_SHA1,
                });
            }
            (None, Some(_)) => {
                return Err(CliError::MissingCompanion {
                    field: ARG_FEED_VERSION_SHA1,
                    companion: ARG_FEED,
                });
            }
        };
        let user = match (args.user_email, args.admin) {
            (None, false) => None,
            (email, admin) => Some(ChangesetUser { email, admin }),
        };
        let defaults = ApplyConfig::default();
        let settings = ApplyConfig {
            max_entities_per_payload: args
                .max_entities_per_payload
                .unwrap_or(defaults.max_entities_per_payload),
            ..defaults
        };
        settings.validate()?;
        Ok(Self {
            payload,
            database,
            notes: args.notes,
            user,
            source,
            settings,
        })
    }
}

/// Summary printed after a changeset is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateReport {
    pub(crate) changeset_id: ChangesetId,
    pub(crate) payload_count: usize,
}

pub(crate) fn run_create(args: CreateArgs) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    run_create_with(args, &mut stdout)
}

pub(crate) fn run_create_with(args: CreateArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let report = execute_create(args)?;
    write_json(writer, &report)
}

fn execute_create(args: CreateArgs) -> Result<CreateReport, CliError> {
    let config = args.into_config()?;
    paths::require_file(&config.payload, ARG_CREATE_PAYLOAD)?;
    let body = load_payload(&config.payload)?;
    paths::ensure_database_dir(&config.database)?;
    let mut registry = open_registry(&config.database, config.settings)?;

    let mut new = NewChangeset {
        notes: config.notes,
        user: config.user,
        provenance: None,
    };
    if let Some(source) = config.source {
        let version = registry.register_feed_version(&source.feed, &source.sha1)?;
        new = new.imported_from(source.feed, version.id);
    }
    let changeset = registry.create_changeset(&new)?;
    let payloads = registry.add_changes(changeset.id, body.changes)?;
    log::info!(
        "created changeset {} with {} payload(s)",
        changeset.id,
        payloads.len()
    );
    Ok(CreateReport {
        changeset_id: changeset.id,
        payload_count: payloads.len(),
    })
}

/// Loads a JSON-encoded [`PayloadBody`] from disk.
pub(crate) fn load_payload(path: &Utf8Path) -> Result<PayloadBody, CliError> {
    let json = paths::read_to_string(path).map_err(|source| CliError::ReadPayload {
        path: path.to_path_buf(),
        source,
    })?;
    PayloadBody::from_json(&json).map_err(|source| CliError::InvalidPayload {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
pub(crate) fn config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<CreateConfig, CliError> {
    let merged = CreateArgs::merge_from_layers(layers).map_err(CliError::from)?;
    CreateConfig::try_from(merged)
}
