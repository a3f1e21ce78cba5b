//! Reference components built on the smithy runtime.

pub mod findings_file;
pub mod json_logger;

pub use findings_file::FindingsFileScanner;
pub use json_logger::JsonLogger;
