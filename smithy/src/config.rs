use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::VERSION;
use crate::env::{self, EnvLoader, ProcessEnv};
use crate::error::ConfigError;
use crate::finding::InstanceId;
use crate::panic::{DefaultPanicHandler, PanicHandler};
use crate::store::Storer;

pub const ENV_COMPONENT_NAME: &str = "SMITHY_COMPONENT_NAME";
pub const ENV_INSTANCE_ID: &str = "SMITHY_INSTANCE_ID";
pub const ENV_LOG_LEVEL: &str = "SMITHY_LOG_LEVEL";
pub const ENV_STORE_TYPE: &str = "SMITHY_STORE_TYPE";
pub const ENV_STORE_SQLITE_PATH: &str = "SMITHY_STORE_SQLITE_PATH";
pub const ENV_STORE_POSTGRES_DSN: &str = "SMITHY_STORE_POSTGRES_DSN";
pub const ENV_STORE_POSTGRES_MAX_CONNECTIONS: &str = "SMITHY_STORE_POSTGRES_MAX_CONNECTIONS";
pub const ENV_STORE_FINDINGS_SERVICE_ADDR: &str = "SMITHY_STORE_FINDINGS_SERVICE_ADDR";
pub const ENV_STORE_PAGE_SIZE: &str = "SMITHY_STORE_PAGE_SIZE";
pub const ENV_RUN_REPORTERS_WITHOUT_FINDINGS: &str = "SMITHY_RUN_REPORTERS_WITHOUT_FINDINGS";
pub const ENV_SCAN_TIME: &str = "SMITHY_SCAN_TIME";
pub const ENV_SCAN_ID: &str = "SMITHY_SCAN_ID";
pub const ENV_SCAN_TAGS: &str = "SMITHY_SCAN_TAGS";
pub const ENV_TARGET_METADATA_PATH: &str = "SMITHY_TARGET_METADATA_PATH";

const DEFAULT_SQLITE_PATH: &str = "smithy.db";
const DEFAULT_FINDINGS_SERVICE_ADDR: &str = "http://localhost:50051";
const DEFAULT_POSTGRES_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_PAGE_SIZE: u32 = 100;

const REASON_CANNOT_BE_EMPTY: &str = "cannot be empty";
const REASON_CANNOT_BE_NIL: &str = "cannot be nil";
const REASON_MUST_BE_POSITIVE: &str = "must be greater than zero";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    #[default]
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level: {other} (valid: debug, info, warn, error)")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend tag selecting which [`Storer`] the harness instantiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreType {
    #[default]
    Sqlite,
    Postgresql,
    FindingsClient,
}

impl StoreType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgresql => "postgresql",
            Self::FindingsClient => "findings-client",
        }
    }
}

impl FromStr for StoreType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sqlite" => Ok(Self::Sqlite),
            "postgresql" => Ok(Self::Postgresql),
            "findings-client" => Ok(Self::FindingsClient),
            other => Err(format!(
                "unsupported store type: {other} (valid: sqlite, postgresql, findings-client)"
            )),
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-specific connection parameters. Only the fields of the selected
/// backend are consulted.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreParams {
    pub sqlite_path: PathBuf,
    pub postgres_dsn: Option<String>,
    pub postgres_max_connections: u32,
    pub findings_service_addr: String,
    pub page_size: u32,
}

impl Default for StoreParams {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from(DEFAULT_SQLITE_PATH),
            postgres_dsn: None,
            postgres_max_connections: DEFAULT_POSTGRES_MAX_CONNECTIONS,
            findings_service_addr: DEFAULT_FINDINGS_SERVICE_ADDR.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl StoreParams {
    fn from_env(env: &dyn EnvLoader) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            sqlite_path: env::parse_or(env, ENV_STORE_SQLITE_PATH, defaults.sqlite_path)?,
            postgres_dsn: env::lookup(env, ENV_STORE_POSTGRES_DSN),
            postgres_max_connections: env::parse_or(
                env,
                ENV_STORE_POSTGRES_MAX_CONNECTIONS,
                defaults.postgres_max_connections,
            )?,
            findings_service_addr: env::lookup(env, ENV_STORE_FINDINGS_SERVICE_ADDR)
                .unwrap_or(defaults.findings_service_addr),
            page_size: env::parse_or(env, ENV_STORE_PAGE_SIZE, defaults.page_size)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub store_type: StoreType,
    pub params: StoreParams,
    pub disable_store_check: bool,
}

/// Legacy informational keys propagated by some pipelines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanInfo {
    pub scan_time: Option<DateTime<Utc>>,
    pub scan_id: Option<String>,
    pub scan_tags: Vec<String>,
}

impl ScanInfo {
    fn from_env(env: &dyn EnvLoader) -> Result<Self, ConfigError> {
        let scan_tags = env::lookup(env, ENV_SCAN_TAGS)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            scan_time: env::parse_opt(env, ENV_SCAN_TIME)?,
            scan_id: env::lookup(env, ENV_SCAN_ID),
            scan_tags,
        })
    }
}

/// Immutable configuration shared by every step of a run.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    sdk_version: &'static str,
    component_name: String,
    instance_id: InstanceId,
    log_level: LogLevel,
    store: StoreConfig,
    run_reporters_without_findings: bool,
    panic_handler: Arc<dyn PanicHandler>,
    timeout: Option<Duration>,
    scan: ScanInfo,
    target_metadata_path: Option<PathBuf>,
}

impl RunnerConfig {
    pub fn sdk_version(&self) -> &'static str {
        self.sdk_version
    }

    pub fn component_name(&self) -> &str {
        &self.component_name
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    pub fn store(&self) -> &StoreConfig {
        &self.store
    }

    pub fn run_reporters_without_findings(&self) -> bool {
        self.run_reporters_without_findings
    }

    pub fn panic_handler(&self) -> &Arc<dyn PanicHandler> {
        &self.panic_handler
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn scan(&self) -> &ScanInfo {
        &self.scan
    }

    pub fn target_metadata_path(&self) -> Option<&Path> {
        self.target_metadata_path.as_deref()
    }
}

/// Builder collecting programmatic overrides on top of the environment.
///
/// Overrides always win over environment values. [`RunnerOptions::build`]
/// freezes the result into a [`RunnerConfig`]; runners call it once in their
/// prologue and never touch the options again.
pub struct RunnerOptions {
    env: Box<dyn EnvLoader>,
    component_name: Option<String>,
    instance_id: Option<InstanceId>,
    store_type: Option<StoreType>,
    store_params: Option<StoreParams>,
    log_level: Option<LogLevel>,
    panic_handler: Option<Arc<dyn PanicHandler>>,
    disable_store_check: Option<bool>,
    run_reporters_without_findings: Option<bool>,
    timeout: Option<Duration>,
    pub(crate) storer: Option<Box<dyn Storer>>,
    pub(crate) cancellation_token: Option<CancellationToken>,
}

impl RunnerOptions {
    /// Options backed by the process environment.
    pub fn from_env() -> Self {
        Self::with_env(ProcessEnv)
    }

    /// Options backed by a custom environment source.
    pub fn with_env(env: impl EnvLoader + 'static) -> Self {
        Self {
            env: Box::new(env),
            component_name: None,
            instance_id: None,
            store_type: None,
            store_params: None,
            log_level: None,
            panic_handler: None,
            disable_store_check: None,
            run_reporters_without_findings: None,
            timeout: None,
            storer: None,
            cancellation_token: None,
        }
    }

    pub fn component_name(mut self, name: impl Into<String>) -> Self {
        self.component_name = Some(name.into());
        self
    }

    pub fn instance_id(mut self, id: InstanceId) -> Self {
        self.instance_id = Some(id);
        self
    }

    pub fn store_type(mut self, store_type: StoreType) -> Self {
        self.store_type = Some(store_type);
        self
    }

    pub fn store_params(mut self, params: StoreParams) -> Self {
        self.store_params = Some(params);
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    pub fn panic_handler(mut self, handler: impl PanicHandler + 'static) -> Self {
        self.panic_handler = Some(Arc::new(handler));
        self
    }

    pub fn disable_store_check(mut self, disable: bool) -> Self {
        self.disable_store_check = Some(disable);
        self
    }

    pub fn run_reporters_without_findings(mut self, enabled: bool) -> Self {
        self.run_reporters_without_findings = Some(enabled);
        self
    }

    /// Deadline for the whole run, measured from the start of the prologue.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Uses `storer` instead of opening the configured backend.
    pub fn storer(mut self, storer: impl Storer + 'static) -> Self {
        self.storer = Some(Box::new(storer));
        self
    }

    /// Parent token; cancelling it aborts the run at its next suspension point.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    pub(crate) fn disable_store_check_by_default(mut self) -> Self {
        self.disable_store_check.get_or_insert(true);
        self
    }

    pub fn build(&self) -> Result<RunnerConfig, ConfigError> {
        let env = self.env.as_ref();

        let component_name = match &self.component_name {
            Some(name) => name.clone(),
            None => env::lookup(env, ENV_COMPONENT_NAME).ok_or(ConfigError::MissingEnv(ENV_COMPONENT_NAME))?,
        };
        if component_name.trim().is_empty() {
            return Err(ConfigError::InvalidField {
                field: "component_name",
                reason: REASON_CANNOT_BE_EMPTY,
            });
        }

        let instance_id = match self.instance_id {
            Some(id) => id,
            None => env::parse_opt::<InstanceId>(env, ENV_INSTANCE_ID)?
                .ok_or(ConfigError::MissingEnv(ENV_INSTANCE_ID))?,
        };
        if instance_id.is_nil() {
            return Err(ConfigError::InvalidField {
                field: "instance_id",
                reason: REASON_CANNOT_BE_NIL,
            });
        }

        let log_level = match self.log_level {
            Some(level) => level,
            None => env::parse_or(env, ENV_LOG_LEVEL, LogLevel::default())?,
        };

        let store_type = match self.store_type {
            Some(st) => st,
            None => env::parse_or(env, ENV_STORE_TYPE, StoreType::default())?,
        };

        let params = match &self.store_params {
            Some(p) => p.clone(),
            None => StoreParams::from_env(env)?,
        };

        let disable_store_check = self.disable_store_check.unwrap_or(false);
        if !disable_store_check && self.storer.is_none() {
            validate_store_params(store_type, &params)?;
        }

        let run_reporters_without_findings = match self.run_reporters_without_findings {
            Some(enabled) => enabled,
            None => env::parse_or(env, ENV_RUN_REPORTERS_WITHOUT_FINDINGS, false)?,
        };

        let panic_handler = self
            .panic_handler
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultPanicHandler));

        Ok(RunnerConfig {
            sdk_version: VERSION,
            component_name,
            instance_id,
            log_level,
            store: StoreConfig {
                store_type,
                params,
                disable_store_check,
            },
            run_reporters_without_findings,
            panic_handler,
            timeout: self.timeout,
            scan: ScanInfo::from_env(env)?,
            target_metadata_path: env::lookup(env, ENV_TARGET_METADATA_PATH).map(PathBuf::from),
        })
    }
}

fn validate_store_params(store_type: StoreType, params: &StoreParams) -> Result<(), ConfigError> {
    if params.page_size == 0 {
        return Err(ConfigError::InvalidField {
            field: "page_size",
            reason: REASON_MUST_BE_POSITIVE,
        });
    }

    match store_type {
        StoreType::Sqlite if params.sqlite_path.as_os_str().is_empty() => Err(ConfigError::InvalidField {
            field: "sqlite_path",
            reason: REASON_CANNOT_BE_EMPTY,
        }),
        StoreType::Postgresql if params.postgres_dsn.as_deref().is_none_or(str::is_empty) => {
            Err(ConfigError::InvalidField {
                field: "postgres_dsn",
                reason: REASON_CANNOT_BE_EMPTY,
            })
        }
        StoreType::Postgresql if params.postgres_max_connections == 0 => Err(ConfigError::InvalidField {
            field: "postgres_max_connections",
            reason: REASON_MUST_BE_POSITIVE,
        }),
        StoreType::FindingsClient if params.findings_service_addr.trim().is_empty() => {
            Err(ConfigError::InvalidField {
                field: "findings_service_addr",
                reason: REASON_CANNOT_BE_EMPTY,
            })
        }
        _ => Ok(()),
    }
}

impl fmt::Debug for RunnerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerOptions")
            .field("component_name", &self.component_name)
            .field("instance_id", &self.instance_id)
            .field("store_type", &self.store_type)
            .field("log_level", &self.log_level)
            .field("disable_store_check", &self.disable_store_check)
            .field("run_reporters_without_findings", &self.run_reporters_without_findings)
            .field("timeout", &self.timeout)
            .field("custom_storer", &self.storer.is_some())
            .finish_non_exhaustive()
    }
}
