use txqueue_core::{
    chain::{RpcChainConfig, RpcChainService},
    error::EngineError,
};

use crate::config::ChainConfig;

/// Builds one RPC client per configured chain. Duplicate chain ids are a configuration mistake.
pub fn build_chain_service(chains: &[ChainConfig]) -> Result<RpcChainService, EngineError> {
    let mut service = RpcChainService::new();
    let mut seen = Vec::with_capacity(chains.len());

    for chain in chains {
        if seen.contains(&chain.settings.chain_id) {
            return Err(EngineError::RpcConfigError {
                message: format!("Chain {} is configured more than once", chain.settings.chain_id),
            });
        }
        seen.push(chain.settings.chain_id);

        service.add_chain(RpcChainConfig {
            settings: &chain.settings,
            rpc_url: &chain.rpc_url,
        })?;
    }

    if chains.is_empty() {
        tracing::warn!("No chains configured, every enqueue will be rejected");
    }

    Ok(service)
}
