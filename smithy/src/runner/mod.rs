//! Entry points driving a component through its role's fixed steps.
//!
//! Every runner shares the same shape: build the context (config, logging,
//! store), run the role's steps under panic and cancellation guards, then close
//! the store and emit one terminal record.

mod enricher;
mod filter;
mod reporter;
mod scanner;
mod target;

pub use enricher::run_enricher;
pub use filter::run_filter;
pub use reporter::run_reporter;
pub use scanner::run_scanner;
pub use target::run_target;
