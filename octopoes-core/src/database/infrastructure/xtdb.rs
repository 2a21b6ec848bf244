//! HTTP adapter for an XTDB multinode deployment.
//!
//! Every client (tenant) owns one node, addressed as `{base}/{client}/...`.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use octopoes_config::XtdbSettings;
use reqwest::{StatusCode, header};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::{
    database::{
        ports::{Document, DocumentStore, TransactionOperation, TransactionReceipt},
        query::Query,
    },
    error::{OctopoesError, Result},
};

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(rename = "txId")]
    tx_id: u64,
    #[serde(rename = "txTime")]
    tx_time: DateTime<Utc>,
}

#[derive(Clone)]
pub struct XtdbHttpClient {
    http_client: reqwest::Client,
    base_url: String,
    client: String,
    await_timeout_ms: u64,
}

impl fmt::Debug for XtdbHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XtdbHttpClient")
            .field("base_url", &self.base_url)
            .field("client", &self.client)
            .finish()
    }
}

fn format_valid_time(valid_time: DateTime<Utc>) -> String {
    valid_time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl XtdbHttpClient {
    /// Client for the node named `client`, or the configured default node.
    pub fn new(settings: &XtdbSettings, client: Option<&str>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| {
                OctopoesError::Store(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            http_client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            client: client.unwrap_or(&settings.client).to_string(),
            await_timeout_ms: settings.request_timeout_ms,
        })
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    fn node_url(&self, endpoint: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.client, endpoint)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(OctopoesError::Store(format!("XTDB responded {status}: {body}")))
    }

    async fn await_transaction(&self, tx_id: u64) -> Result<TxResponse> {
        let response = self
            .http_client
            .get(self.node_url("await-tx"))
            .query(&[
                ("txId", tx_id.to_string()),
                ("timeout", self.await_timeout_ms.to_string()),
            ])
            .send()
            .await?;
        let awaited: TxResponse = Self::check(response).await?.json().await?;
        debug!(tx_id = awaited.tx_id, "transaction awaited");
        Ok(awaited)
    }

    pub async fn create_node(&self) -> Result<()> {
        info!(client = %self.client, "creating XTDB node");
        let response = self
            .http_client
            .post(format!("{}/create-node", self.base_url))
            .json(&json!({ "node": self.client }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn delete_node(&self) -> Result<()> {
        info!(client = %self.client, "deleting XTDB node");
        let response = self
            .http_client
            .post(format!("{}/delete-node", self.base_url))
            .json(&json!({ "node": self.client }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

fn encode_operation(operation: &TransactionOperation) -> Value {
    match operation {
        TransactionOperation::Put {
            document,
            valid_time,
        } => json!(["put", document, format_valid_time(*valid_time)]),
        TransactionOperation::Delete { id, valid_time } => {
            json!(["delete", id, format_valid_time(*valid_time)])
        }
    }
}

#[async_trait]
impl DocumentStore for XtdbHttpClient {
    async fn get_entity(
        &self,
        id: &str,
        valid_time: DateTime<Utc>,
    ) -> Result<Option<Document>> {
        let response = self
            .http_client
            .get(self.node_url("entity"))
            .query(&[("eid", id.to_string()), ("valid-time", format_valid_time(valid_time))])
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let document: Document = Self::check(response).await?.json().await?;
        Ok(Some(document))
    }

    async fn query(
        &self,
        query: &Query,
        valid_time: DateTime<Utc>,
    ) -> Result<Vec<Vec<Value>>> {
        let edn = query.to_edn();
        debug!(query = %edn, "XTDB query");

        let response = self
            .http_client
            .post(self.node_url("query"))
            .query(&[("valid-time", format_valid_time(valid_time))])
            .header(header::CONTENT_TYPE, "application/edn")
            .header(header::ACCEPT, "application/json")
            .body(edn)
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn submit_transaction(
        &self,
        operations: Vec<TransactionOperation>,
    ) -> Result<TransactionReceipt> {
        let tx_ops: Vec<Value> = operations.iter().map(encode_operation).collect();
        let response = self
            .http_client
            .post(self.node_url("submit-tx"))
            .json(&json!({ "tx-ops": tx_ops }))
            .send()
            .await?;
        let submitted: TxResponse = Self::check(response).await?.json().await?;

        let indexed = self.await_transaction(submitted.tx_id).await?;
        Ok(TransactionReceipt {
            tx_id: indexed.tx_id,
            tx_time: indexed.tx_time,
        })
    }

    async fn status(&self) -> Result<Value> {
        let response = self
            .http_client
            .get(self.node_url("status"))
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}
