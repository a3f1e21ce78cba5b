use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use smithy::{Finding, RunContext, Scanner};
use tracing::debug;

/// Scanner reading raw findings from a JSON array produced by a tool run.
#[derive(Debug, Clone)]
pub struct FindingsFileScanner {
    path: PathBuf,
}

impl FindingsFileScanner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parses raw tool output. Blank input means the tool found nothing.
pub fn parse_findings(raw: &str) -> Result<Vec<Finding>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_str(raw).context("raw output is not valid JSON")?;
    match value {
        Value::Array(items) => Ok(items.into_iter().map(Finding::new).collect()),
        Value::Object(_) => Ok(vec![Finding::new(value)]),
        other => anyhow::bail!("expected a JSON array of findings, got {other}"),
    }
}

#[async_trait]
impl Scanner for FindingsFileScanner {
    async fn transform(&self, _ctx: &RunContext) -> Result<Vec<Finding>> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("could not read raw output {}", self.path.display()))?;
        let findings = parse_findings(&raw)
            .with_context(|| format!("could not parse raw output {}", self.path.display()))?;
        debug!(path = %self.path.display(), count = findings.len(), "parsed raw output");
        Ok(findings)
    }
}
