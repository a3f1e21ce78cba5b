use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use smithy::{RunnerOptions, run_scanner};
use smithy_components::FindingsFileScanner;

/// Scanner persisting raw findings read from a JSON file
#[derive(Parser)]
#[command(name = "findings-file", version)]
struct Cli {
    /// Path to the tool's raw output (a JSON array of findings)
    #[arg(long, env = "SMITHY_RAW_OUT_FILE_PATH")]
    raw_out_file_path: PathBuf,

    /// Component name attached to every log record
    #[arg(long, env = "SMITHY_COMPONENT_NAME", default_value = "findings-file")]
    component_name: String,

    /// Run deadline in seconds
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    let options = RunnerOptions::from_env()
        .component_name(args.component_name)
        .timeout(Duration::from_secs(args.timeout_secs));
    let scanner = FindingsFileScanner::new(args.raw_out_file_path);

    // the runner has already logged the failure
    if run_scanner(&scanner, options).await.is_err() {
        process::exit(1);
    }
}
