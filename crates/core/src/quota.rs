//! External usage-metering contract.
//!
//! The quota store is a collaborator, not part of this process: allowance
//! is read before a billable task is accepted and a usage event is written
//! after successful completion. Tier and expiry are never mutated here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Decision returned by the metering service for one user.
#[derive(Debug, Clone, Deserialize)]
pub struct Allowance {
    pub allowed: bool,
    #[serde(default)]
    pub remaining: u32,
    #[serde(default)]
    pub daily_limit: u32,
    #[serde(default)]
    pub today_count: u32,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Allowance {
    pub fn unlimited() -> Self {
        Self {
            allowed: true,
            remaining: u32::MAX,
            daily_limit: u32::MAX,
            today_count: 0,
            reason: None,
        }
    }
}

/// One completed generation, as reported to the metering service.
#[derive(Debug, Clone, Serialize)]
pub struct UsageEvent {
    pub task_id: String,
    pub engine: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motion: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait QuotaService: Send + Sync {
    async fn check_allowance(&self, user_id: &str) -> anyhow::Result<Allowance>;

    async fn record_usage(&self, user_id: &str, event: UsageEvent) -> anyhow::Result<()>;
}

/// HTTP implementation against the external metering service.
pub struct HttpQuotaService {
    base_url: String,
    client: reqwest::Client,
}

impl HttpQuotaService {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl QuotaService for HttpQuotaService {
    async fn check_allowance(&self, user_id: &str) -> anyhow::Result<Allowance> {
        let url = format!("{}/users/{user_id}/allowance", self.base_url);
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        let allowance: Allowance = resp.json().await?;
        debug!(
            user_id,
            allowed = allowance.allowed,
            remaining = allowance.remaining,
            "allowance checked"
        );
        Ok(allowance)
    }

    async fn record_usage(&self, user_id: &str, event: UsageEvent) -> anyhow::Result<()> {
        let url = format!("{}/users/{user_id}/usage", self.base_url);
        self.client
            .post(&url)
            .json(&event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// No-op metering for deployments without a quota service. Everything is
/// allowed and nothing is recorded.
pub struct Unmetered;

#[async_trait]
impl QuotaService for Unmetered {
    async fn check_allowance(&self, _user_id: &str) -> anyhow::Result<Allowance> {
        Ok(Allowance::unlimited())
    }

    async fn record_usage(&self, _user_id: &str, _event: UsageEvent) -> anyhow::Result<()> {
        Ok(())
    }
}
