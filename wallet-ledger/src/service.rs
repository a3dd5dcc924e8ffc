//! Notifier and authorizer implementations
//!
//! HTTP clients talk to the external notification and authorization services.
//! The local variants are used when no service URL is configured.

use crate::{
    gateway::{Authorizer, Notifier},
    types::{Account, Transaction},
    Error, Result,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reply expected from the notification service on success
const NOTIFY_ACCEPTED: &str = "Autorizado";

#[derive(Debug, Serialize)]
struct DispatchRequest {
    message: String,
}

#[derive(Debug, Deserialize)]
struct DispatchResponse {
    message: String,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    message: serde_json::Value,
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Notifier calling `GET {base_url}/dispatch`
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    base_url: String,
    client: Client,
}

impl HttpNotifier {
    /// Create a notifier for `base_url`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, account: &Account, entry: &Transaction) -> Result<()> {
        let url = format!("{}/dispatch", self.base_url.trim_end_matches('/'));
        let request = DispatchRequest {
            message: format!(
                "{}, you received a new transfer of {}",
                account.customer_name, entry.amount
            ),
        };

        let response: DispatchResponse = self
            .client
            .get(&url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.message != NOTIFY_ACCEPTED {
            return Err(Error::Notification(response.message));
        }

        tracing::debug!(account_id = %account.id, entry_id = %entry.id, "Notification dispatched");
        Ok(())
    }
}

/// Authorizer calling `GET {base_url}/auth`
#[derive(Debug, Clone)]
pub struct HttpAuthorizer {
    base_url: String,
    client: Client,
}

impl HttpAuthorizer {
    /// Create an authorizer for `base_url`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl Authorizer for HttpAuthorizer {
    async fn authorize(&self, account: &Account) -> Result<()> {
        let url = format!("{}/auth", self.base_url.trim_end_matches('/'));

        let response: AuthResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.message != serde_json::Value::Bool(true) {
            return Err(Error::Unauthorized(format!(
                "transfer denied for account {}",
                account.id
            )));
        }

        Ok(())
    }
}

/// Notifier that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, account: &Account, entry: &Transaction) -> Result<()> {
        tracing::info!(
            account_id = %account.id,
            entry_id = %entry.id,
            entry_type = %entry.entry_type,
            amount = %entry.amount,
            "Balance changed"
        );
        Ok(())
    }
}

/// Authorizer that approves every account
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _account: &Account) -> Result<()> {
        Ok(())
    }
}
