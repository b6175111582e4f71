//! Milestone Escrow Service
//!
//! Off-chain service layer for milestone-gated fund release on a blockchain
//! escrow ledger, plus stablecoin transfer plumbing for the same networks.
//!
//! Architecture:
//!
//! - **Commitment hashing** ([`commitment`]): deterministic keccak-256
//!   content hashes binding each milestone's metadata; the same scheme
//!   derives the release proof hash.
//! - **Ledger adapter** ([`ledger`]): JSON-RPC gateway client behind the
//!   [`EscrowLedger`] trait, with an in-memory [`FakeLedger`] that enforces
//!   the contract's rules for tests and local development.
//! - **Mirror store** ([`storage`]): read-optimized off-chain cache of
//!   milestone state behind [`MirrorStore`], with sled and in-memory
//!   backends. Eventually consistent with the ledger, never authoritative.
//! - **Orchestrator** ([`ops`]): creation, readiness, release and the
//!   mirror repair paths.
//! - **Stablecoin service** ([`stablecoin`]): token balances, transfers and
//!   approvals with a confirmed-only transaction log.
//!
//! [`EscrowService`] ties one mirror store to an orchestrator per configured
//! network and is the intended entry point:
//!
//! ```no_run
//! use std::sync::Arc;
//! use milestone_escrow::{EscrowConfig, EscrowService, MemoryStore};
//!
//! # async fn run() -> milestone_escrow::EscrowResult<()> {
//! let config = EscrowConfig::development();
//! let store = Arc::new(MemoryStore::new());
//! let service = EscrowService::new(config, store)?;
//! let networks = service.supported_networks();
//! # Ok(())
//! # }
//! ```

pub mod commitment;
pub mod config;
pub mod error;
pub mod ledger;
pub mod ops;
pub mod retry;
pub mod stablecoin;
pub mod storage;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::error;

pub use commitment::{commitment_hash, MilestoneDef, NATIVE_DECIMALS};
pub use config::{EscrowConfig, NetworkConfig, NetworkInfo, RetryPolicy};
pub use error::{EscrowError, EscrowResult};
pub use ledger::{
    CreatedEscrow, DisabledLedger, EscrowDetails, EscrowLedger, EscrowRpcClient, FakeLedger,
};
pub use ops::{
    CreateEscrowRequest, EscrowCreated, EscrowOps, MilestoneReleased, ReadinessBlocker,
    ReadinessReport, RebuildReport, SyncReport,
};
pub use stablecoin::{
    ConfirmedSubmission, StablecoinService, TokenBalance, TokenLedger, TokenRpcClient,
    TransferReceipt,
};
pub use storage::{MemoryStore, MirrorStats, MirrorStore, SledStore, StorageConfig};
pub use types::{
    Digest32, EscrowId, MilestoneIndex, MilestoneRecord, MilestoneStatus, TransferKind,
    TransferRecord, TransferStatus,
};

/// Escrow service over all configured networks
///
/// One orchestrator per network, all sharing a single mirror store.
pub struct EscrowService<S: MirrorStore> {
    ops: HashMap<String, EscrowOps<S>>,
    config: EscrowConfig,
    store: Arc<S>,
}

impl<S: MirrorStore + 'static> EscrowService<S> {
    /// Validate the configuration and build a gateway client per network
    pub fn new(config: EscrowConfig, store: Arc<S>) -> EscrowResult<Self> {
        config.validate()?;
        let mut ops = HashMap::new();
        for network in &config.networks {
            let client = EscrowRpcClient::new(network)?;
            ops.insert(
                network.id.clone(),
                EscrowOps::new(
                    Arc::new(client),
                    store.clone(),
                    network.clone(),
                    config.retry.clone(),
                ),
            );
        }
        Ok(Self { ops, config, store })
    }

    /// Build and verify connectivity and chain identity of every configured
    /// network before returning
    pub async fn connect(config: EscrowConfig, store: Arc<S>) -> EscrowResult<Self> {
        let service = Self::new(config, store)?;
        service.health_check().await?;
        Ok(service)
    }

    /// Ping every network's ledger, verifying reachability and chain identity
    pub async fn health_check(&self) -> EscrowResult<()> {
        for (id, ops) in &self.ops {
            if let Err(e) = ops.ledger().ping().await {
                error!(network = %id, error = %e, "ledger health check failed");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Build with an injected ledger for a single network.
    ///
    /// Used by tests and local development against a [`FakeLedger`].
    pub fn with_ledger(
        config: EscrowConfig,
        network_id: &str,
        ledger: Arc<dyn EscrowLedger>,
        store: Arc<S>,
    ) -> EscrowResult<Self> {
        config.validate()?;
        let network = config.network(network_id)?.clone();
        let mut ops = HashMap::new();
        ops.insert(
            network_id.to_string(),
            EscrowOps::new(ledger, store.clone(), network, config.retry.clone()),
        );
        Ok(Self { ops, config, store })
    }

    fn ops(&self, network_id: &str) -> EscrowResult<&EscrowOps<S>> {
        self.ops.get(network_id).ok_or_else(|| {
            EscrowError::Configuration(format!("unknown network '{}'", network_id))
        })
    }

    /// Create a milestone escrow on the given network
    pub async fn create_milestone_escrow(
        &self,
        network_id: &str,
        request: CreateEscrowRequest,
    ) -> EscrowResult<EscrowCreated> {
        self.ops(network_id)?.create_milestone_escrow(request).await
    }

    /// Check whether a milestone can be released right now
    pub async fn check_milestone_readiness(
        &self,
        network_id: &str,
        escrow_id: EscrowId,
        index: MilestoneIndex,
    ) -> EscrowResult<ReadinessReport> {
        self.ops(network_id)?
            .check_milestone_readiness(escrow_id, index)
            .await
    }

    /// Release a milestone's funds
    pub async fn release_milestone(
        &self,
        network_id: &str,
        escrow_id: EscrowId,
        index: MilestoneIndex,
        proof_data: Option<String>,
    ) -> EscrowResult<MilestoneReleased> {
        self.ops(network_id)?
            .release_milestone(escrow_id, index, proof_data)
            .await
    }

    /// Complete mirror rows the ledger already shows released
    pub async fn sync_from_ledger(
        &self,
        network_id: &str,
        escrow_id: EscrowId,
    ) -> EscrowResult<SyncReport> {
        self.ops(network_id)?.sync_from_ledger(escrow_id).await
    }

    /// Rebuild missing mirror rows from on-chain commitments
    pub async fn rebuild_mirror(
        &self,
        network_id: &str,
        escrow_id: EscrowId,
        defs: &[MilestoneDef],
    ) -> EscrowResult<RebuildReport> {
        self.ops(network_id)?.rebuild_mirror(escrow_id, defs).await
    }

    /// Authoritative escrow state from the ledger
    pub async fn escrow_details(
        &self,
        network_id: &str,
        escrow_id: EscrowId,
    ) -> EscrowResult<EscrowDetails> {
        self.ops(network_id)?.fetch_details(escrow_id).await
    }

    /// Mirror rows for an escrow, ordered by index
    pub async fn milestones(&self, escrow_id: EscrowId) -> EscrowResult<Vec<MilestoneRecord>> {
        self.store.list_milestones(escrow_id).await
    }

    /// Static network listing, no ledger call
    pub fn supported_networks(&self) -> Vec<NetworkInfo> {
        self.config.supported_networks()
    }

    /// Mirror store summary counts
    pub async fn stats(&self) -> EscrowResult<MirrorStats> {
        self.store.stats().await
    }
}
