use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, field, warn};

use crate::config::{LogLevel, RunnerConfig, RunnerOptions};
use crate::error::{ComponentError, ConfigError, StoreError};
use crate::finding::InstanceId;
use crate::logging;
use crate::panic::GuardedRun;
use crate::store::{self, Storer};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);
const TARGET_METADATA_FILE: &str = "target.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentType {
    Target,
    Scanner,
    Enricher,
    Filter,
    Reporter,
}

impl ComponentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Target => "target",
            Self::Scanner => "scanner",
            Self::Enricher => "enricher",
            Self::Filter => "filter",
            Self::Reporter => "reporter",
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run state handed to every component call.
///
/// Events emitted by components inherit the run span, so `component_type`,
/// `component_name`, `instance_id` and `sdk_version` are attached without the
/// component doing anything.
pub struct RunContext {
    component_type: ComponentType,
    config: Arc<RunnerConfig>,
    span: Span,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    store: Option<Box<dyn Storer>>,
    target_metadata: Option<Value>,
}

impl RunContext {
    /// Runs the common prologue. On failure the error has already been logged
    /// and no component code has run.
    pub(crate) async fn initialise(
        component_type: ComponentType,
        options: RunnerOptions,
    ) -> Result<Self, ComponentError> {
        let started = Instant::now();
        let mut options = match component_type {
            ComponentType::Target => options.disable_store_check_by_default(),
            _ => options,
        };

        let config = match options.build() {
            Ok(config) => config,
            Err(err) => {
                logging::try_init(LogLevel::default());
                let err = ComponentError::from(err);
                error!(
                    component_type = component_type.as_str(),
                    error = %err,
                    step = err.step(),
                    "could not configure component"
                );
                return Err(err);
            }
        };
        logging::try_init(config.log_level());

        let span = tracing::error_span!(
            "smithy",
            component_type = component_type.as_str(),
            component_name = config.component_name(),
            instance_id = %config.instance_id(),
            sdk_version = config.sdk_version(),
            num_raw_findings = field::Empty,
            num_parsed_findings = field::Empty,
            num_enriched_findings = field::Empty,
            num_filtered_findings = field::Empty,
        );

        let fail = |err: ComponentError| {
            span.in_scope(|| error!(error = %err, step = err.step(), "could not initialise component"));
            err
        };

        let target_metadata = match (component_type, config.target_metadata_path()) {
            (ComponentType::Scanner, Some(path)) => {
                Some(load_target_metadata(path).map_err(|e| fail(e.into()))?)
            }
            _ => None,
        };

        let store = match options.storer.take() {
            Some(injected) => Some(injected),
            None if config.store().disable_store_check => None,
            None => {
                let store_cfg = config.store();
                let opened = store::open(store_cfg.store_type, &store_cfg.params)
                    .instrument(span.clone())
                    .await
                    .map_err(|e| fail(ComponentError::StoreOpenFailed(e)))?;
                Some(opened)
            }
        };

        let cancel = options
            .cancellation_token
            .take()
            .map(|parent| parent.child_token())
            .unwrap_or_default();

        span.in_scope(|| debug!(store_type = %config.store().store_type, "component initialised"));

        Ok(Self {
            component_type,
            deadline: config.timeout().map(|t| started + t),
            config: Arc::new(config),
            span,
            cancel,
            store,
            target_metadata,
        })
    }

    pub fn component_type(&self) -> ComponentType {
        self.component_type
    }

    pub fn instance_id(&self) -> InstanceId {
        self.config.instance_id()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run span; enter it (or `instrument` spawned work with it) to keep the
    /// run keys on component-owned records.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn store(&self) -> Option<&dyn Storer> {
        self.store.as_deref()
    }

    /// Contents of `target.json` when `SMITHY_TARGET_METADATA_PATH` was set.
    /// Only populated for scanners.
    pub fn target_metadata(&self) -> Option<&Value> {
        self.target_metadata.as_ref()
    }

    pub(crate) fn require_store(&self) -> Result<&dyn Storer, StoreError> {
        self.store().ok_or(StoreError::Unavailable)
    }

    pub(crate) fn record_count(&self, key: &'static str, count: usize) {
        self.span.record(key, count as u64);
    }

    /// Drives `steps` until completion, cancellation, deadline or a shutdown
    /// signal, converting panics through the configured handler.
    pub(crate) async fn guarded<F>(&self, steps: F) -> Result<(), ComponentError>
    where
        F: Future<Output = Result<(), ComponentError>>,
    {
        let _guard = GuardedRun::enter();
        let steps = AssertUnwindSafe(steps.instrument(self.span.clone())).catch_unwind();
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            outcome = steps => match outcome {
                Ok(result) => result,
                Err(payload) => self.recover(payload),
            },
            _ = self.cancel.cancelled() => {
                self.span.in_scope(|| debug!("run cancelled by caller"));
                Err(ComponentError::Cancelled)
            }
            _ = deadline => {
                self.span.in_scope(|| debug!("run deadline exceeded"));
                Err(ComponentError::Cancelled)
            }
            _ = shutdown_signal() => {
                self.span.in_scope(|| debug!("run interrupted by shutdown signal"));
                Err(ComponentError::Cancelled)
            }
        }
    }

    fn recover(&self, payload: Box<dyn Any + Send>) -> Result<(), ComponentError> {
        match self.config.panic_handler().handle_panic(self, Some(payload)) {
            (err, true) => Err(ComponentError::Panic(err)),
            (Some(err), false) => Err(ComponentError::PanicRecovered(err)),
            (None, false) => Ok(()),
        }
    }

    /// Closes the store and emits the terminal record. A close failure is
    /// logged and never replaces `result`.
    pub(crate) async fn finish(self, result: Result<(), ComponentError>) -> Result<(), ComponentError> {
        if let Some(store) = &self.store {
            let closed = tokio::time::timeout(CLOSE_TIMEOUT, store.close())
                .instrument(self.span.clone())
                .await;
            self.span.in_scope(|| match closed {
                Ok(Ok(())) => debug!("store closed"),
                Ok(Err(e)) => {
                    let err = ComponentError::StoreCloseFailed(e);
                    warn!(error = %err, step = err.step(), "could not close store");
                }
                Err(_) => warn!(
                    timeout_secs = CLOSE_TIMEOUT.as_secs(),
                    step = "close",
                    "timed out closing store"
                ),
            });
        }

        self.span.in_scope(|| match &result {
            Ok(()) => debug!("component has completed successfully!"),
            Err(err) => error!(
                error = %err,
                step = err.step(),
                fatal = err.is_fatal(),
                "component failed"
            ),
        });
        result
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("component_type", &self.component_type)
            .field("instance_id", &self.instance_id())
            .field("deadline", &self.deadline)
            .field("has_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

fn load_target_metadata(path: &Path) -> Result<Value, ConfigError> {
    let file = if path.is_dir() {
        path.join(TARGET_METADATA_FILE)
    } else {
        path.to_path_buf()
    };
    let invalid = |reason: String| ConfigError::TargetMetadata {
        path: file.clone(),
        reason,
    };

    let meta = std::fs::metadata(&file).map_err(|e| invalid(e.to_string()))?;
    if !meta.is_file() {
        return Err(invalid("not a regular file".to_string()));
    }
    let raw = std::fs::read_to_string(&file).map_err(|e| invalid(e.to_string()))?;
    serde_json::from_str(&raw).map_err(|e| invalid(e.to_string()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "could not install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "could not install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
