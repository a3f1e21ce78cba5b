use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{QueryOpts, Storer};
use crate::error::StoreError;
use crate::finding::{Finding, FindingId, InstanceId, VulnerabilityFinding};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound on pages fetched by an unpaged read.
const MAX_PAGES: u32 = 10_000;

/// Client for a remote findings service speaking JSON over HTTP.
///
/// All operations target `{addr}/v1/instances/{instance_id}/findings`:
/// `GET` pages through findings, `POST` appends, `PUT` updates. Each call is a
/// single request; retries are left to the caller.
#[derive(Debug)]
pub struct FindingsClient {
    client: reqwest::Client,
    base_url: String,
    page_size: u32,
    max_pages: u32,
    closed: AtomicBool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<FindingId>,
    details: Finding,
}

#[derive(Debug, Serialize)]
struct WireFindingRef<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<FindingId>,
    details: &'a Finding,
}

#[derive(Debug, Default, Deserialize)]
struct ReadResponse {
    #[serde(default)]
    findings: Vec<WireFinding>,
}

#[derive(Debug, Serialize)]
struct WriteRequest<'a> {
    findings: &'a [Finding],
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    findings: Vec<WireFindingRef<'a>>,
}

#[derive(Debug, Deserialize)]
struct NotFoundResponse {
    id: FindingId,
}

impl FindingsClient {
    pub fn new(addr: &str, page_size: u32) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("smithy/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: addr.trim_end_matches('/').to_string(),
            page_size: page_size.max(1),
            max_pages: MAX_PAGES,
            closed: AtomicBool::new(false),
        })
    }

    fn findings_url(&self, instance_id: InstanceId) -> String {
        format!("{}/v1/instances/{instance_id}/findings", self.base_url)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch_page(
        &self,
        instance_id: InstanceId,
        opts: QueryOpts,
    ) -> Result<Vec<VulnerabilityFinding>, StoreError> {
        let url = format!(
            "{}?page={}&page_size={}",
            self.findings_url(instance_id),
            opts.page,
            opts.page_size
        );
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(service_error(response).await);
        }

        let body: ReadResponse = response.json().await?;
        Ok(body
            .findings
            .into_iter()
            .map(|f| VulnerabilityFinding {
                id: f.id,
                finding: f.details,
            })
            .collect())
    }
}

async fn service_error(response: reqwest::Response) -> StoreError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StoreError::Service { status, body }
}

#[async_trait]
impl Storer for FindingsClient {
    async fn read(
        &self,
        instance_id: InstanceId,
        opts: Option<QueryOpts>,
    ) -> Result<Vec<VulnerabilityFinding>, StoreError> {
        self.ensure_open()?;

        let findings = match opts {
            Some(opts) => self.fetch_page(instance_id, opts).await?,
            None => {
                let mut all = Vec::new();
                let mut page = 0;
                loop {
                    if page == self.max_pages {
                        return Err(StoreError::PageLimit(self.max_pages));
                    }
                    let batch = self
                        .fetch_page(instance_id, QueryOpts::new(page, self.page_size))
                        .await?;
                    let last = batch.len() < self.page_size as usize;
                    all.extend(batch);
                    if last {
                        break;
                    }
                    page += 1;
                }
                all
            }
        };

        if findings.is_empty() {
            return Err(StoreError::NoFindingsFound);
        }
        Ok(findings)
    }

    async fn write(&self, instance_id: InstanceId, findings: &[Finding]) -> Result<(), StoreError> {
        self.ensure_open()?;
        for finding in findings {
            self.validate(finding)?;
        }

        let response = self
            .client
            .post(self.findings_url(instance_id))
            .json(&WriteRequest { findings })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(service_error(response).await);
        }

        debug!(instance_id = %instance_id, count = findings.len(), "wrote findings");
        Ok(())
    }

    async fn update(
        &self,
        instance_id: InstanceId,
        findings: &[VulnerabilityFinding],
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        for vf in findings {
            self.validate(&vf.finding)?;
        }

        let body = UpdateRequest {
            findings: findings
                .iter()
                .map(|vf| WireFindingRef {
                    id: vf.id,
                    details: &vf.finding,
                })
                .collect(),
        };
        let response = self
            .client
            .put(self.findings_url(instance_id))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            let text = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<NotFoundResponse>(&text) {
                Ok(missing) => StoreError::FindingNotFound(missing.id),
                Err(_) => StoreError::Service {
                    status: status.as_u16(),
                    body: text,
                },
            });
        }
        if !status.is_success() {
            return Err(service_error(response).await);
        }

        debug!(instance_id = %instance_id, count = findings.len(), "updated findings");
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
