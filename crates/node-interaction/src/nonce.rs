//! Reads account nonces through the node's JSON-RPC `query` call.

use std::sync::atomic::{AtomicU64, Ordering};

use alloy::{primitives::Address, rlp::Decodable};
use anyhow::{Context as _, Result, bail};
use serde::{Deserialize, Serialize};

/// The discriminator prefixed to the address bytes to ask the node for an account nonce.
pub const QUERY_TYPE_NONCE: u8 = 0x01;

const QUERY_METHOD: &str = "query";

/// A client for the node's query endpoint.
///
/// Every call is a single read of node state: it is never retried and can be issued repeatedly
/// and concurrently.
#[derive(Debug)]
pub struct NonceClient {
    endpoint: String,
    client: reqwest::Client,
    next_request_id: AtomicU64,
}

impl NonceClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
            next_request_id: AtomicU64::new(0),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the current nonce of the account at `address`.
    #[tracing::instrument(level = "debug", skip(self), fields(endpoint = %self.endpoint))]
    pub async fn get_nonce(&self, address: Address) -> Result<u64> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: format!(
                "chain-it-{}",
                self.next_request_id.fetch_add(1, Ordering::Relaxed)
            ),
            method: QUERY_METHOD,
            params: [hex::encode_upper(nonce_query_payload(&address))],
        };
        tracing::trace!(?request, "Sending nonce query");

        let body = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send the nonce query to {}", self.endpoint))?
            .error_for_status()
            .context("The query endpoint rejected the nonce query")?
            .text()
            .await
            .context("Failed to read the nonce query response")?;
        tracing::trace!(%body, "Received nonce query response");

        let data = parse_query_response(&body)?;
        let nonce = decode_nonce(&data)?;
        tracing::debug!(nonce, "Fetched the on-chain nonce");
        Ok(nonce)
    }
}

/// Builds the `query` parameter asking for the nonce of `address`.
pub fn nonce_query_payload(address: &Address) -> Vec<u8> {
    let address = address.as_slice();
    let mut payload = Vec::with_capacity(1 + address.len());
    payload.push(QUERY_TYPE_NONCE);
    payload.extend_from_slice(address);
    payload
}

/// Decodes the RLP encoded nonce returned by the node. Accounts the node has never seen come back
/// with an empty payload, which is nonce zero.
pub fn decode_nonce(data: &[u8]) -> Result<u64> {
    if data.is_empty() {
        return Ok(0);
    }

    let mut buffer = data;
    let nonce = u64::decode(&mut buffer)
        .map_err(|error| anyhow::anyhow!("Failed to decode the nonce payload: {error}"))?;
    if !buffer.is_empty() {
        bail!(
            "Found {} trailing bytes after the nonce in payload 0x{}",
            buffer.len(),
            hex::encode(data)
        );
    }
    Ok(nonce)
}

/// Extracts the result data bytes from a `query` response body.
pub fn parse_query_response(body: &str) -> Result<Vec<u8>> {
    let response: JsonRpcResponse =
        serde_json::from_str(body).context("The nonce query response is not valid JSON-RPC")?;

    match &response.error {
        serde_json::Value::Null => {}
        serde_json::Value::String(error) if error.is_empty() => {}
        error => bail!("The node returned an error for the nonce query: {error}"),
    }

    let Some(result) = response.result else {
        bail!("The nonce query response has neither a result nor an error");
    };
    let QueryResult { code, data, log } = match result {
        QueryResultEnvelope::Tagged(_, result) | QueryResultEnvelope::Plain(result) => {
            result.result
        }
    };
    if code != 0 {
        bail!("The node failed the nonce query with code {code}: {log}");
    }

    hex::decode(data.trim().trim_start_matches("0x"))
        .with_context(|| format!("The nonce query result data '{data}' is not hex"))
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: String,
    method: &'a str,
    params: [String; 1],
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<QueryResultEnvelope>,
    #[serde(default)]
    error: serde_json::Value,
}

/// Some node versions wrap their results in a `[type byte, result]` pair.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QueryResultEnvelope {
    Tagged(u8, ResultQuery),
    Plain(ResultQuery),
}

#[derive(Debug, Deserialize)]
struct ResultQuery {
    result: QueryResult,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    data: String,
    #[serde(default)]
    log: String,
}
