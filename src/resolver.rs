//! Metadata resolution against the lookup service.
//!
//! All identifiers found in one document go out in a single request. The
//! response records are indexed by both their `Document_ID` and their
//! `Content_ID` (upper-cased; the first record wins on a duplicate key), and
//! every link with an identifier is then marked found, expired, or not
//! found.
//!
//! # Wire format
//!
//! ```text
//! POST <lookup.url>
//! {"Lookup_ID": ["CMS-ABC-000042", "DOC99"]}
//!
//! 200 OK
//! {"Version": "...", "Changelog": "...",
//!  "Results": [{"Document_ID": "DOC99", "Content_ID": "CMS-ABC-000042",
//!               "Title": "Policy X", "Status": "Active"}]}
//! ```
//!
//! The request is retried per the network policy (HTTP 429, 5xx and
//! connection errors); each attempt is bounded by the configured budget
//! (transport timeout plus a margin) and raced against cancellation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use link_harness_core::changelog::ChangeEntry;
use link_harness_core::models::{DocumentRecord, Hyperlink, LinkStatus};
use link_harness_core::rules::{has_status_suffix, plan_not_found, RuleOptions};

use crate::config::LookupConfig;
use crate::error::ResolveError;
use crate::retry::{self, RetryError, RetryPolicy};

/// Response body of the lookup service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LookupResponse {
    #[serde(rename = "Results", default)]
    pub results: Vec<DocumentRecord>,
    /// Service version and release notes; carried, not interpreted.
    #[serde(rename = "Version", default)]
    pub version: Option<String>,
    #[serde(rename = "Changelog", default)]
    pub changelog: Option<String>,
}

/// Transport to the lookup service.
#[async_trait]
pub trait LookupClient: Send + Sync {
    async fn lookup(&self, ids: &[String]) -> Result<LookupResponse, ResolveError>;
}

/// JSON-over-HTTP lookup client.
pub struct HttpLookupClient {
    client: reqwest::Client,
    url: String,
    request_field: String,
}

impl HttpLookupClient {
    pub fn new(config: &LookupConfig) -> Result<Self, ResolveError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            request_field: config.request_field.clone(),
        })
    }
}

#[async_trait]
impl LookupClient for HttpLookupClient {
    async fn lookup(&self, ids: &[String]) -> Result<LookupResponse, ResolveError> {
        let mut body = serde_json::Map::new();
        body.insert(self.request_field.clone(), serde_json::json!(ids));

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&serde_json::Value::Object(body))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ResolveError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ResolveError::Decode(e.to_string()))
    }
}

/// In-memory lookup client serving a fixed record set.
///
/// Records are returned when their document or content id was requested.
/// Every request is kept for inspection.
#[derive(Default)]
pub struct StaticLookupClient {
    records: Vec<DocumentRecord>,
    requests: Mutex<Vec<Vec<String>>>,
}

impl StaticLookupClient {
    pub fn new(records: Vec<DocumentRecord>) -> Self {
        Self {
            records,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LookupClient for StaticLookupClient {
    async fn lookup(&self, ids: &[String]) -> Result<LookupResponse, ResolveError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(ids.to_vec());
        }
        let wanted = |key: &str| !key.is_empty() && ids.iter().any(|id| id.eq_ignore_ascii_case(key));
        Ok(LookupResponse {
            results: self
                .records
                .iter()
                .filter(|r| wanted(r.document_id.trim()) || wanted(r.content_id.trim()))
                .cloned()
                .collect(),
            ..Default::default()
        })
    }
}

/// Records indexed by upper-cased document id and content id.
#[derive(Debug, Clone, Default)]
pub struct LookupTable {
    records: HashMap<String, DocumentRecord>,
}

impl LookupTable {
    pub fn from_records(records: Vec<DocumentRecord>) -> Self {
        let mut table = Self::default();
        for record in records {
            for key in [&record.document_id, &record.content_id] {
                let key = key.trim().to_uppercase();
                if key.is_empty() || table.records.contains_key(&key) {
                    continue;
                }
                table.records.insert(key, record.clone());
            }
        }
        table
    }

    pub fn get(&self, id: &str) -> Option<&DocumentRecord> {
        self.records.get(&id.trim().to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Per-document resolution tally, for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionSummary {
    pub active: usize,
    pub expired: usize,
    pub not_found: usize,
}

pub struct MetadataResolver {
    client: Arc<dyn LookupClient>,
    policy: RetryPolicy,
    budget: Duration,
}

impl MetadataResolver {
    pub fn new(client: Arc<dyn LookupClient>, policy: RetryPolicy, budget: Duration) -> Self {
        Self {
            client,
            policy,
            budget,
        }
    }

    /// Fetch records for `ids` in one batched request.
    ///
    /// No request is made for an empty id set.
    pub async fn fetch(
        &self,
        ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<LookupTable, ResolveError> {
        if ids.is_empty() {
            return Ok(LookupTable::default());
        }
        tracing::debug!(count = ids.len(), "resolving lookup identifiers");

        let client = self.client.as_ref();
        let budget = self.budget;
        let result = retry::run(&self.policy, "lookup", cancel, move |_| async move {
            tokio::select! {
                res = tokio::time::timeout(budget, client.lookup(ids)) => {
                    res.unwrap_or(Err(ResolveError::Timeout(budget)))
                }
                _ = cancel.cancelled() => Err(ResolveError::Cancelled),
            }
        })
        .await;

        match result {
            Ok(response) => {
                tracing::debug!(records = response.results.len(), "lookup response received");
                Ok(LookupTable::from_records(response.results))
            }
            Err(RetryError::Cancelled) => Err(ResolveError::Cancelled),
            Err(RetryError::Failed { source, .. }) => Err(source),
        }
    }
}

/// Mark each link found, expired, or not found.
///
/// Found links take the record's ids and status. A link whose identifier is
/// missing from the table is marked not found, with ` - Not Found` queued for
/// its display text, unless its text already carries a status suffix.
pub fn apply_resolution(
    links: &mut [Hyperlink],
    table: &LookupTable,
    opts: &RuleOptions,
) -> (Vec<ChangeEntry>, ResolutionSummary) {
    let mut entries = Vec::new();
    let mut summary = ResolutionSummary::default();

    for link in links.iter_mut() {
        let Some(id) = link.lookup_id.clone() else {
            continue;
        };
        match table.get(&id) {
            Some(record) => {
                link.document_id = non_empty(&record.document_id);
                link.content_id = non_empty(&record.content_id);
                link.status = LinkStatus::from_service(&record.status);
                if link.status == LinkStatus::Expired {
                    summary.expired += 1;
                } else {
                    summary.active += 1;
                }
            }
            None if has_status_suffix(&link.display_text) => {}
            None => {
                let plan = plan_not_found(link, opts);
                link.status = plan.status;
                if let Some(text) = plan.new_text {
                    link.updated_text = Some(text);
                    link.refresh_pending();
                }
                entries.extend(plan.entries);
                summary.not_found += 1;
            }
        }
    }
    (entries, summary)
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}
