use htlc_bridge_types::ChainId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::ChainGateway;

/// Chain id → gateway lookup shared by the orchestrator
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: Arc<RwLock<HashMap<ChainId, Arc<dyn ChainGateway>>>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gateway under its own chain id, replacing any previous one
    pub fn register(&self, gateway: Arc<dyn ChainGateway>) {
        let chain = gateway.chain_id().clone();
        tracing::info!(chain = %chain, kind = %gateway.kind(), "registered chain gateway");
        self.gateways.write().unwrap().insert(chain, gateway);
    }

    pub fn get(&self, chain: &ChainId) -> Option<Arc<dyn ChainGateway>> {
        self.gateways.read().unwrap().get(chain).cloned()
    }

    pub fn contains(&self, chain: &ChainId) -> bool {
        self.gateways.read().unwrap().contains_key(chain)
    }

    pub fn chains(&self) -> Vec<ChainId> {
        let mut chains: Vec<_> = self.gateways.read().unwrap().keys().cloned().collect();
        chains.sort();
        chains
    }

    pub fn all(&self) -> Vec<Arc<dyn ChainGateway>> {
        self.gateways.read().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.gateways.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayRegistry")
            .field("chains", &self.chains())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulatedChain;
    use htlc_bridge_types::{ChainKind, SystemClock};

    #[test]
    fn test_register_and_lookup() {
        let registry = GatewayRegistry::new();
        let clock = Arc::new(SystemClock);
        registry.register(Arc::new(SimulatedChain::new("sepolia", ChainKind::Evm, clock.clone())));
        registry.register(Arc::new(SimulatedChain::new("devnet", ChainKind::Solana, clock)));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&ChainId::new("sepolia")));
        assert_eq!(
            registry.get(&ChainId::new("devnet")).unwrap().kind(),
            ChainKind::Solana
        );
        assert!(registry.get(&ChainId::new("mainnet")).is_none());
        assert_eq!(
            registry.chains(),
            vec![ChainId::new("devnet"), ChainId::new("sepolia")]
        );
    }
}
