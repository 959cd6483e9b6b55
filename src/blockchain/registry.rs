//! Immutable per-chain wiring.
//!
//! Built once at startup and shared read-only; lookups never lock.

use std::collections::HashMap;
use std::sync::Arc;

use crate::blockchain::client::RpcClient;
use crate::blockchain::signer::TransactionSigner;
use crate::domain::ChainType;
use crate::resilience::circuit_breaker::{BreakerSnapshot, CircuitBreaker};

/// Everything the executor needs to talk to one chain.
#[derive(Clone)]
pub struct ChainHandle {
    pub chain: ChainType,
    pub chain_id: u64,
    /// Breaker-guarded client.
    pub rpc: Arc<dyn RpcClient>,
    pub signer: Arc<dyn TransactionSigner>,
    pub breaker: Arc<CircuitBreaker>,
    /// Depth the executor waits for before marking a write `Success`.
    pub confirmation_blocks: u64,
    /// Depth the sweep requires before marking `Confirmed`.
    pub finality_blocks: u64,
}

impl std::fmt::Debug for ChainHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainHandle")
            .field("chain", &self.chain)
            .field("chain_id", &self.chain_id)
            .field("confirmation_blocks", &self.confirmation_blocks)
            .field("finality_blocks", &self.finality_blocks)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: HashMap<ChainType, ChainHandle>,
}

impl ChainRegistry {
    pub fn new(handles: impl IntoIterator<Item = ChainHandle>) -> Self {
        Self {
            chains: handles.into_iter().map(|h| (h.chain, h)).collect(),
        }
    }

    pub fn get(&self, chain: ChainType) -> Option<&ChainHandle> {
        self.chains.get(&chain)
    }

    pub fn chains(&self) -> impl Iterator<Item = &ChainHandle> {
        self.chains.values()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Breaker state of every chain, sorted by chain.
    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut handles: Vec<_> = self.chains.values().collect();
        handles.sort_by_key(|h| h.chain);
        handles.iter().map(|h| h.breaker.snapshot()).collect()
    }
}
