use std::process;
use std::time::Duration;

use clap::Parser;
use smithy::{RunnerOptions, run_reporter};
use smithy_components::JsonLogger;

/// Reporter logging every finding of the run as JSON
#[derive(Parser)]
#[command(name = "json-logger", version)]
struct Cli {
    /// Component name attached to every log record
    #[arg(long, env = "SMITHY_COMPONENT_NAME", default_value = "json-logger")]
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

    // the runner has already logged the failure
    if run_reporter(&JsonLogger::new(), options).await.is_err() {
        process::exit(1);
    }
}
