//! JSON-RPC ledger gateway client
//!
//! Talks to the escrow gateway exposed by the node infrastructure. Transport
//! failures map to `LedgerUnavailable`; gateway error objects carrying a
//! revert map to `LedgerSubmission` with the revert reason preserved.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::NetworkConfig;
use crate::error::{EscrowError, EscrowResult};
use crate::types::{digest_from_hex, digest_to_hex, Digest32, EscrowId, MilestoneIndex};

use super::{CreatedEscrow, EscrowDetails, EscrowLedger};

/// JSON-RPC error code the gateway uses for contract reverts
const REVERT_CODE: i32 = 3;

/// JSON-RPC request
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

/// JSON-RPC response
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
    #[allow(dead_code)]
    id: u64,
}

/// JSON-RPC error
#[derive(Debug, Deserialize)]
struct RpcError {
    code: i32,
    message: String,
}

/// Shared JSON-RPC transport
///
/// One instance per network, shared between the escrow client and the token
/// client for that network.
pub struct JsonRpcTransport {
    client: Client,
    url: String,
    request_id: AtomicU64,
}

impl JsonRpcTransport {
    pub fn new(url: &str, timeout_secs: u64) -> EscrowResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| EscrowError::LedgerUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            url: url.to_string(),
            request_id: AtomicU64::new(0),
        })
    }

    /// Make an RPC call
    pub(crate) async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> EscrowResult<T> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);

        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        debug!("Ledger RPC call: {} id={}", method, id);

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| EscrowError::LedgerUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EscrowError::LedgerUnavailable(format!(
                "HTTP {} - {}",
                status, body
            )));
        }

        let rpc_response: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| EscrowError::LedgerUnavailable(e.to_string()))?;

        if let Some(error) = rpc_response.error {
            return Err(map_rpc_error(error));
        }

        rpc_response
            .result
            .ok_or_else(|| EscrowError::LedgerUnavailable("Empty response".to_string()))
    }
}

/// Classify a gateway error object.
///
/// Reverts are the ledger rejecting the transaction; everything else is
/// treated as the gateway/node being unable to serve the call.
fn map_rpc_error(error: RpcError) -> EscrowError {
    let message = error.message;
    let lowered = message.to_lowercase();
    if error.code == REVERT_CODE || lowered.contains("revert") {
        EscrowError::LedgerSubmission { reason: message }
    } else {
        EscrowError::LedgerUnavailable(format!("RPC error {}: {}", error.code, message))
    }
}

/// Escrow contract client for one network
pub struct EscrowRpcClient {
    transport: Arc<JsonRpcTransport>,
    network: String,
    chain_id: u64,
    contract: String,
    operator_key: Option<String>,
}

impl EscrowRpcClient {
    /// Build a client from a validated network entry
    pub fn new(config: &NetworkConfig) -> EscrowResult<Self> {
        config.validate()?;
        let transport = Arc::new(JsonRpcTransport::new(&config.rpc_url, config.timeout_secs)?);
        Ok(Self::with_transport(transport, config))
    }

    /// Build a client sharing an existing transport
    pub fn with_transport(transport: Arc<JsonRpcTransport>, config: &NetworkConfig) -> Self {
        Self {
            transport,
            network: config.id.clone(),
            chain_id: config.chain_id,
            contract: config.escrow_contract.clone(),
            operator_key: config.operator_key.clone(),
        }
    }

    pub fn transport(&self) -> Arc<JsonRpcTransport> {
        self.transport.clone()
    }

    fn require_operator_key(&self) -> EscrowResult<&str> {
        self.operator_key.as_deref().ok_or_else(|| {
            EscrowError::Configuration(format!(
                "no operator key configured for network '{}'",
                self.network
            ))
        })
    }
}

#[async_trait]
impl EscrowLedger for EscrowRpcClient {
    async fn ping(&self) -> EscrowResult<()> {
        let chain_id: u64 = self
            .transport
            .call("escrow_chainId", serde_json::json!([]))
            .await?;
        if chain_id != self.chain_id {
            return Err(EscrowError::Configuration(format!(
                "network '{}' expects chain id {} but the gateway reports {}",
                self.network, self.chain_id, chain_id
            )));
        }
        Ok(())
    }

    async fn create_escrow(
        &self,
        beneficiary: &str,
        total_amount: u128,
        milestone_hashes: &[Digest32],
    ) -> EscrowResult<CreatedEscrow> {
        #[derive(Deserialize)]
        struct RawCreated {
            #[serde(rename = "escrowId")]
            escrow_id: u64,
            #[serde(rename = "txHash")]
            tx_hash: String,
        }

        let key = self.require_operator_key()?;
        let hashes: Vec<String> = milestone_hashes.iter().map(digest_to_hex).collect();

        let raw: RawCreated = self
            .transport
            .call(
                "escrow_createEscrow",
                serde_json::json!([
                    self.contract,
                    key,
                    beneficiary,
                    total_amount.to_string(),
                    hashes,
                ]),
            )
            .await?;

        info!(
            "Created escrow {} on '{}': tx={}",
            raw.escrow_id, self.network, raw.tx_hash
        );

        Ok(CreatedEscrow {
            escrow_id: raw.escrow_id,
            tx_hash: raw.tx_hash,
        })
    }

    async fn release_milestone(
        &self,
        escrow_id: EscrowId,
        index: MilestoneIndex,
        proof_hash: &Digest32,
    ) -> EscrowResult<String> {
        let key = self.require_operator_key()?;

        let tx_hash: String = self
            .transport
            .call(
                "escrow_releaseMilestone",
                serde_json::json!([
                    self.contract,
                    key,
                    escrow_id,
                    index,
                    digest_to_hex(proof_hash),
                ]),
            )
            .await?;

        info!(
            "Released milestone {} of escrow {} on '{}': tx={}",
            index, escrow_id, self.network, tx_hash
        );

        Ok(tx_hash)
    }

    async fn get_escrow_details(&self, escrow_id: EscrowId) -> EscrowResult<EscrowDetails> {
        #[derive(Deserialize)]
        struct RawDetails {
            funder: String,
            beneficiary: String,
            #[serde(rename = "totalAmount")]
            total_amount: String,
            #[serde(rename = "releasedAmount")]
            released_amount: String,
            #[serde(rename = "completedMilestones")]
            completed_milestones: u32,
            #[serde(rename = "totalMilestones")]
            total_milestones: u32,
            #[serde(rename = "isActive")]
            is_active: bool,
        }

        let raw: RawDetails = self
            .transport
            .call(
                "escrow_getDetails",
                serde_json::json!([self.contract, escrow_id]),
            )
            .await?;

        Ok(EscrowDetails {
            funder: raw.funder,
            beneficiary: raw.beneficiary,
            total_amount: parse_base_amount(&raw.total_amount)?,
            released_amount: parse_base_amount(&raw.released_amount)?,
            completed_milestones: raw.completed_milestones,
            total_milestones: raw.total_milestones,
            is_active: raw.is_active,
        })
    }

    async fn get_milestone_hash(
        &self,
        escrow_id: EscrowId,
        index: MilestoneIndex,
    ) -> EscrowResult<Digest32> {
        let hash: String = self
            .transport
            .call(
                "escrow_getMilestoneHash",
                serde_json::json!([self.contract, escrow_id, index]),
            )
            .await?;
        Ok(digest_from_hex(&hash)?)
    }
}

pub(crate) fn parse_base_amount(s: &str) -> EscrowResult<u128> {
    s.parse::<u128>()
        .map_err(|e| EscrowError::Serialization(format!("invalid base amount '{}': {}", s, e)))
}
