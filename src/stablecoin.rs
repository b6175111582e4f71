//! Stablecoin transfer service
//!
//! Balance queries, transfers and allowance approvals against the token
//! contracts configured per network. Amounts cross the public API in human
//! units as decimals; conversion to base units happens at the ledger
//! boundary using the token's own precision, fetched per call so a config
//! change or token migration never silently shifts magnitudes.
//!
//! The mirror store keeps a log of confirmed operations; rows are written
//! only after the ledger confirmed, so the log never claims a transfer that
//! did not happen.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::commitment::{amount_to_base_units, base_units_to_amount};
use crate::config::{EscrowConfig, NetworkConfig};
use crate::error::{EscrowError, EscrowResult};
use crate::ledger::rpc::parse_base_amount;
use crate::ledger::JsonRpcTransport;
use crate::storage::MirrorStore;
use crate::types::{TransferKind, TransferRecord};

/// Confirmed token submission: transaction hash plus the sending address
#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmedSubmission {
    #[serde(rename = "txHash")]
    pub tx_hash: String,
    pub from: String,
}

/// Token ledger operations for one network, amounts in base units
#[async_trait]
pub trait TokenLedger: Send + Sync {
    async fn decimals(&self, token_contract: &str) -> EscrowResult<u32>;

    async fn symbol(&self, token_contract: &str) -> EscrowResult<String>;

    async fn balance_of(&self, token_contract: &str, address: &str) -> EscrowResult<u128>;

    async fn allowance(
        &self,
        token_contract: &str,
        owner: &str,
        spender: &str,
    ) -> EscrowResult<u128>;

    /// Gas estimate for a transfer from the operator account
    async fn estimate_transfer_gas(
        &self,
        token_contract: &str,
        to: &str,
        amount: u128,
    ) -> EscrowResult<u128>;

    /// Submit a transfer from the operator account and await confirmation
    async fn transfer(
        &self,
        token_contract: &str,
        to: &str,
        amount: u128,
    ) -> EscrowResult<ConfirmedSubmission>;

    /// Submit an allowance approval from the operator account
    async fn approve(
        &self,
        token_contract: &str,
        spender: &str,
        amount: u128,
    ) -> EscrowResult<ConfirmedSubmission>;
}

/// Token gateway client, sharing the network's JSON-RPC transport
pub struct TokenRpcClient {
    transport: Arc<JsonRpcTransport>,
    network: String,
    operator_key: Option<String>,
}

impl TokenRpcClient {
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
            operator_key: config.operator_key.clone(),
        }
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
impl TokenLedger for TokenRpcClient {
    async fn decimals(&self, token_contract: &str) -> EscrowResult<u32> {
        self.transport
            .call("token_decimals", serde_json::json!([token_contract]))
            .await
    }

    async fn symbol(&self, token_contract: &str) -> EscrowResult<String> {
        self.transport
            .call("token_symbol", serde_json::json!([token_contract]))
            .await
    }

    async fn balance_of(&self, token_contract: &str, address: &str) -> EscrowResult<u128> {
        let raw: String = self
            .transport
            .call(
                "token_balanceOf",
                serde_json::json!([token_contract, address]),
            )
            .await?;
        parse_base_amount(&raw)
    }

    async fn allowance(
        &self,
        token_contract: &str,
        owner: &str,
        spender: &str,
    ) -> EscrowResult<u128> {
        let raw: String = self
            .transport
            .call(
                "token_allowance",
                serde_json::json!([token_contract, owner, spender]),
            )
            .await?;
        parse_base_amount(&raw)
    }

    async fn estimate_transfer_gas(
        &self,
        token_contract: &str,
        to: &str,
        amount: u128,
    ) -> EscrowResult<u128> {
        let key = self.require_operator_key()?;
        let raw: String = self
            .transport
            .call(
                "token_estimateTransferGas",
                serde_json::json!([token_contract, key, to, amount.to_string()]),
            )
            .await?;
        parse_base_amount(&raw)
    }

    async fn transfer(
        &self,
        token_contract: &str,
        to: &str,
        amount: u128,
    ) -> EscrowResult<ConfirmedSubmission> {
        let key = self.require_operator_key()?;
        self.transport
            .call(
                "token_transfer",
                serde_json::json!([token_contract, key, to, amount.to_string()]),
            )
            .await
    }

    async fn approve(
        &self,
        token_contract: &str,
        spender: &str,
        amount: u128,
    ) -> EscrowResult<ConfirmedSubmission> {
        let key = self.require_operator_key()?;
        self.transport
            .call(
                "token_approve",
                serde_json::json!([token_contract, key, spender, amount.to_string()]),
            )
            .await
    }
}

/// Token balance in both human units and base units
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBalance {
    /// Symbol reported by the token contract, which may differ from the
    /// configured alias used to look the token up
    pub symbol: String,
    pub amount: Decimal,
    #[serde(with = "crate::types::u128_string")]
    pub base_units: u128,
    pub decimals: u32,
}

/// Confirmed transfer or approval outcome
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub tx_hash: String,
    pub amount_base: u128,
}

/// Stablecoin service over all configured networks
pub struct StablecoinService<S: MirrorStore> {
    ledgers: HashMap<String, Arc<dyn TokenLedger>>,
    config: EscrowConfig,
    store: Arc<S>,
}

impl<S: MirrorStore> StablecoinService<S> {
    /// Build gateway clients for every configured network
    pub fn new(config: EscrowConfig, store: Arc<S>) -> EscrowResult<Self> {
        config.validate()?;
        let mut ledgers: HashMap<String, Arc<dyn TokenLedger>> = HashMap::new();
        for network in &config.networks {
            let client = TokenRpcClient::new(network)?;
            ledgers.insert(network.id.clone(), Arc::new(client));
        }
        Ok(Self {
            ledgers,
            config,
            store,
        })
    }

    /// Build with injected ledgers, used by tests
    pub fn with_ledgers(
        config: EscrowConfig,
        ledgers: HashMap<String, Arc<dyn TokenLedger>>,
        store: Arc<S>,
    ) -> Self {
        Self {
            ledgers,
            config,
            store,
        }
    }

    fn ledger(&self, network_id: &str) -> EscrowResult<&Arc<dyn TokenLedger>> {
        self.ledgers.get(network_id).ok_or_else(|| {
            EscrowError::Configuration(format!("unknown network '{}'", network_id))
        })
    }

    /// Resolve the token contract and fetch its current precision
    async fn token_context(
        &self,
        network_id: &str,
        symbol: &str,
    ) -> EscrowResult<(&Arc<dyn TokenLedger>, String, u32)> {
        let network = self.config.network(network_id)?;
        let contract = network.token_contract(symbol)?.to_string();
        let ledger = self.ledger(network_id)?;
        let decimals = ledger.decimals(&contract).await?;
        Ok((ledger, contract, decimals))
    }

    /// Balance of an address in the given token
    pub async fn balance(
        &self,
        network_id: &str,
        symbol: &str,
        address: &str,
    ) -> EscrowResult<TokenBalance> {
        if address.trim().is_empty() {
            return Err(EscrowError::Validation(
                "address must not be empty".to_string(),
            ));
        }
        let (ledger, contract, decimals) = self.token_context(network_id, symbol).await?;
        let base_units = ledger.balance_of(&contract, address).await?;
        Ok(TokenBalance {
            symbol: ledger.symbol(&contract).await?,
            amount: base_units_to_amount(base_units, decimals)?,
            base_units,
            decimals,
        })
    }

    /// Remaining allowance granted by `owner` to `spender`
    pub async fn allowance(
        &self,
        network_id: &str,
        symbol: &str,
        owner: &str,
        spender: &str,
    ) -> EscrowResult<TokenBalance> {
        let (ledger, contract, decimals) = self.token_context(network_id, symbol).await?;
        let base_units = ledger.allowance(&contract, owner, spender).await?;
        Ok(TokenBalance {
            symbol: ledger.symbol(&contract).await?,
            amount: base_units_to_amount(base_units, decimals)?,
            base_units,
            decimals,
        })
    }

    /// Gas estimate for a transfer from the operator account
    pub async fn estimate_transfer_gas(
        &self,
        network_id: &str,
        symbol: &str,
        to: &str,
        amount: Decimal,
    ) -> EscrowResult<u128> {
        let (ledger, contract, decimals) = self.token_context(network_id, symbol).await?;
        let amount_base = validate_amount(amount, decimals)?;
        ledger
            .estimate_transfer_gas(&contract, to, amount_base)
            .await
    }

    /// Transfer tokens from the operator account.
    ///
    /// The log row is written after confirmation; a store failure at that
    /// point is logged but does not fail the transfer, the funds moved.
    pub async fn transfer(
        &self,
        network_id: &str,
        symbol: &str,
        to: &str,
        amount: Decimal,
    ) -> EscrowResult<TransferReceipt> {
        if to.trim().is_empty() {
            return Err(EscrowError::Validation(
                "recipient must not be empty".to_string(),
            ));
        }
        let (ledger, contract, decimals) = self.token_context(network_id, symbol).await?;
        let amount_base = validate_amount(amount, decimals)?;

        let confirmed = ledger.transfer(&contract, to, amount_base).await?;

        info!(
            network = network_id,
            token = symbol,
            to,
            tx_hash = %confirmed.tx_hash,
            "token transfer confirmed"
        );

        self.log_confirmed(
            &confirmed,
            to,
            amount_base,
            symbol,
            network_id,
            TransferKind::Transfer,
        )
        .await;

        Ok(TransferReceipt {
            tx_hash: confirmed.tx_hash,
            amount_base,
        })
    }

    /// Grant a spender an allowance from the operator account
    pub async fn approve_spender(
        &self,
        network_id: &str,
        symbol: &str,
        spender: &str,
        amount: Decimal,
    ) -> EscrowResult<TransferReceipt> {
        if spender.trim().is_empty() {
            return Err(EscrowError::Validation(
                "spender must not be empty".to_string(),
            ));
        }
        let (ledger, contract, decimals) = self.token_context(network_id, symbol).await?;
        // Approvals of zero revoke an allowance, so only negatives are
        // rejected here.
        if amount < Decimal::ZERO {
            return Err(EscrowError::Validation(format!(
                "approval amount must not be negative, got {}",
                amount
            )));
        }
        let amount_base = amount_to_base_units(amount, decimals)?;

        let confirmed = ledger.approve(&contract, spender, amount_base).await?;

        info!(
            network = network_id,
            token = symbol,
            spender,
            tx_hash = %confirmed.tx_hash,
            "token approval confirmed"
        );

        self.log_confirmed(
            &confirmed,
            spender,
            amount_base,
            symbol,
            network_id,
            TransferKind::Approve,
        )
        .await;

        Ok(TransferReceipt {
            tx_hash: confirmed.tx_hash,
            amount_base,
        })
    }

    /// Confirmed operations on a network involving the given address
    pub async fn history(
        &self,
        network_id: &str,
        address: &str,
    ) -> EscrowResult<Vec<TransferRecord>> {
        self.config.network(network_id)?;
        self.store.list_transfers(network_id, address).await
    }

    /// Token symbols configured on a network
    pub fn supported_tokens(&self, network_id: &str) -> EscrowResult<Vec<String>> {
        let network = self.config.network(network_id)?;
        let mut symbols: Vec<String> = network.tokens.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }

    async fn log_confirmed(
        &self,
        confirmed: &ConfirmedSubmission,
        counterparty: &str,
        amount_base: u128,
        symbol: &str,
        network_id: &str,
        kind: TransferKind,
    ) {
        let record = TransferRecord::confirmed(
            confirmed.tx_hash.clone(),
            confirmed.from.clone(),
            counterparty.to_string(),
            amount_base,
            symbol.to_string(),
            network_id.to_string(),
            kind,
        );
        if let Err(e) = self.store.record_transfer(&record).await {
            warn!(
                tx_hash = %confirmed.tx_hash,
                error = %e,
                "confirmed token operation could not be logged"
            );
        }
    }
}

fn validate_amount(amount: Decimal, decimals: u32) -> EscrowResult<u128> {
    if amount <= Decimal::ZERO {
        return Err(EscrowError::Validation(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    amount_to_base_units(amount, decimals)
}
