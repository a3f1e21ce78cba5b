use anyhow::{Context, Result};
use async_trait::async_trait;
use smithy::{Reporter, RunContext, VulnerabilityFinding};
use tracing::info;

/// Reporter logging every finding as canonical JSON under the `finding` key.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLogger;

impl JsonLogger {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Reporter for JsonLogger {
    async fn report(&self, _ctx: &RunContext, findings: &[VulnerabilityFinding]) -> Result<()> {
        for vf in findings {
            let json = vf
                .finding
                .to_canonical_json()
                .with_context(|| format!("could not serialize finding {:?}", vf.id))?;
            info!(num_findings = findings.len(), finding = %json, "found finding");
        }
        Ok(())
    }
}
