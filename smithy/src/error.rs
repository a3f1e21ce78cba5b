use std::path::PathBuf;

use thiserror::Error;

use crate::finding::FindingId;

/// Problems detected while merging environment and programmatic options into a
/// [`RunnerConfig`](crate::config::RunnerConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required env variable '{0}' not found")]
    MissingEnv(&'static str),

    #[error("invalid value '{value}' for '{key}': {reason}")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid configuration, field '{field}': {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },

    #[error("{}: could not load target metadata: {reason}", path.display())]
    TargetMetadata { path: PathBuf, reason: String },
}

/// Errors surfaced by [`Storer`](crate::store::Storer) backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Control sentinel: the instance holds no findings.
    #[error("no findings found")]
    NoFindingsFound,

    #[error("invalid finding: {reason}")]
    InvalidFinding { reason: String },

    #[error("no finding found for id {0}")]
    FindingNotFound(FindingId),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("could not apply migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("findings service request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("findings service returned HTTP {status}: {body}")]
    Service { status: u16, body: String },

    #[error("findings service kept returning full pages after {0} pages")]
    PageLimit(u32),

    #[error("could not (de)serialize finding: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store is closed")]
    Closed,

    #[error("no store configured for this run")]
    Unavailable,

    #[error("could not prepare store location: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_no_findings(&self) -> bool {
        matches!(self, Self::NoFindingsFound)
    }
}

/// Terminal outcome of a runner invocation.
///
/// Component failures arrive as `anyhow::Error` and are wrapped with the step
/// that produced them.
#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("invalid runner configuration: {0}")]
    ConfigInvalid(#[from] ConfigError),

    #[error("could not initialise store: {0}")]
    StoreOpenFailed(#[source] StoreError),

    #[error("could not read: {0}")]
    StoreReadFailed(#[source] StoreError),

    #[error("could not store vulnerabilities: {0}")]
    StoreWriteFailed(#[source] StoreError),

    #[error("could not update: {0}")]
    StoreUpdateFailed(#[source] StoreError),

    /// Only ever logged; a close failure never replaces the run result.
    #[error("could not close store: {0}")]
    StoreCloseFailed(#[source] StoreError),

    #[error("invalid raw finding: {0}")]
    InvalidFinding(#[source] StoreError),

    #[error("could not prepare target: {0:#}")]
    TargetPrepareFailed(anyhow::Error),

    #[error("could not transform raw findings: {0:#}")]
    ScanTransformFailed(anyhow::Error),

    #[error("could not enrich: {0:#}")]
    EnrichFailed(anyhow::Error),

    #[error("could not filter: {0:#}")]
    FilterFailed(anyhow::Error),

    #[error("could not report findings: {0:#}")]
    ReportFailed(anyhow::Error),

    #[error("unexpected panic in the component runner{}", describe_panic(.0))]
    Panic(Option<anyhow::Error>),

    #[error("recovered from panic in the component runner: {0:#}")]
    PanicRecovered(anyhow::Error),

    #[error("run cancelled before completion")]
    Cancelled,
}

fn describe_panic(err: &Option<anyhow::Error>) -> String {
    err.as_ref().map(|e| format!(": {e:#}")).unwrap_or_default()
}

impl ComponentError {
    /// Whether the run terminated because of an unrecovered panic.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Panic(_))
    }

    /// Name of the step that failed, used in the terminal log record.
    pub fn step(&self) -> &'static str {
        match self {
            Self::ConfigInvalid(_) => "configure",
            Self::StoreOpenFailed(_) => "open-store",
            Self::StoreReadFailed(_) => "read",
            Self::StoreWriteFailed(_) => "store",
            Self::StoreUpdateFailed(_) => "update",
            Self::StoreCloseFailed(_) => "close",
            Self::InvalidFinding(_) => "validate",
            Self::TargetPrepareFailed(_) => "prepare",
            Self::ScanTransformFailed(_) => "transform",
            Self::EnrichFailed(_) => "annotate",
            Self::FilterFailed(_) => "filter",
            Self::ReportFailed(_) => "report",
            Self::Panic(_) | Self::PanicRecovered(_) => "panic",
            Self::Cancelled => "cancelled",
        }
    }
}
