//! Error types emitted by the Onestop CLI.
//!
//! Registry failures are boxed so `Result<_, CliError>` stays small under
//! `clippy::result_large_err`.

use std::sync::Arc;

use camino::Utf8PathBuf;
use onestop_core::{ConfigError, ValidationError};
use onestop_store::{ApplyError, StoreError, WriteError};
use thiserror::Error;

/// Errors emitted by the Onestop CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        field: &'static str,
        env: &'static str,
    },
    /// Two options must be given together.
    #[error("--{field} requires --{companion}")]
    MissingCompanion {
        field: &'static str,
        companion: &'static str,
    },
    /// The merged engine settings are unusable.
    #[error("invalid registry settings: {0}")]
    InvalidSettings(#[from] ConfigError),
    /// A referenced input path does not exist on disk.
    #[error("{field} path {path:?} does not exist")]
    MissingSourceFile {
        field: &'static str,
        path: Utf8PathBuf,
    },
    /// A referenced input path exists but is not a file.
    #[error("{field} path {path:?} exists but is not a file")]
    SourcePathNotFile {
        field: &'static str,
        path: Utf8PathBuf,
    },
    /// A referenced input path could not be inspected due to an IO error.
    #[error("failed to inspect {field} path {path:?}: {source}")]
    InspectSourcePath {
        field: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The database directory could not be created.
    #[error("failed to prepare database directory for {path:?}: {source}")]
    PrepareDatabaseDir {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Reading the payload file failed.
    #[error("failed to read change payload at {path:?}: {source}")]
    ReadPayload {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The payload file is not a change payload.
    #[error("change payload at {path:?} is invalid: {source}")]
    InvalidPayload {
        path: Utf8PathBuf,
        #[source]
        source: ValidationError,
    },
    /// Opening the registry database failed.
    #[error("failed to open registry at {path:?}: {source}")]
    OpenRegistry {
        path: Utf8PathBuf,
        #[source]
        source: Box<StoreError>,
    },
    /// Creating the changeset or registering its feed version failed.
    #[error("failed to create changeset: {0}")]
    CreateChangeset(#[source] Box<WriteError>),
    /// Attaching payloads or applying the changeset failed.
    #[error(transparent)]
    Apply(Box<ApplyError>),
    /// Serialising command output failed.
    #[error("failed to serialise command output: {0}")]
    SerialiseOutput(#[source] serde_json::Error),
    /// Writing command output failed.
    #[error("failed to write command output: {0}")]
    WriteOutput(#[source] std::io::Error),
}

impl From<WriteError> for CliError {
    fn from(err: WriteError) -> Self {
        Self::CreateChangeset(Box::new(err))
    }
}

impl From<ApplyError> for CliError {
    fn from(err: ApplyError) -> Self {
        Self::Apply(Box::new(err))
    }
}
