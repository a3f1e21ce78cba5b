pub mod component;
pub mod config;
pub mod context;
pub mod env;
pub mod error;
pub mod finding;
pub mod logging;
pub mod panic;
pub mod runner;
pub mod store;

/// Build-stamped SDK version, attached to every run as `sdk_version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use component::{Enricher, Filter, Reporter, Scanner, Target};
pub use config::{LogLevel, RunnerConfig, RunnerOptions, ScanInfo, StoreParams, StoreType};
pub use context::{ComponentType, RunContext};
pub use error::{ComponentError, ConfigError, StoreError};
pub use finding::{Finding, FindingId, InstanceId, VulnerabilityFinding};
pub use panic::{DefaultPanicHandler, PanicHandler};
pub use runner::{run_enricher, run_filter, run_reporter, run_scanner, run_target};
pub use store::{QueryOpts, Storer};
