use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as};
use txqueue_core::{
    chain::Chain,
    error::EngineError,
    transaction::{GasQuote, TxType},
};

/// Lowest bump accepted by common mempools for a same-nonce replacement.
pub const MIN_BUMP_PERCENT: u32 = 110;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasConfig {
    /// Floor for the priority fee, in wei
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default)]
    pub priority_fee_tip: u128,

    #[serde(default = "default_base_fee_multiplier")]
    pub base_fee_multiplier: u32,

    /// Percentage applied to every fee on escalation, 120 means +20%
    #[serde(default = "default_bump_percent")]
    pub bump_percent: u32,

    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    pub max_fee_cap: Option<u128>,
}

fn default_base_fee_multiplier() -> u32 {
    2
}

fn default_bump_percent() -> u32 {
    120
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            priority_fee_tip: 0,
            base_fee_multiplier: default_base_fee_multiplier(),
            bump_percent: default_bump_percent(),
            max_fee_cap: None,
        }
    }
}

/// Produces fee bids and escalates them for same-nonce replacements.
#[derive(Debug, Clone, Default)]
pub struct GasPricingStrategy {
    config: GasConfig,
}

impl GasPricingStrategy {
    pub fn new(config: GasConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GasConfig {
        &self.config
    }

    fn bump_percent(&self) -> u128 {
        self.config.bump_percent.max(MIN_BUMP_PERCENT) as u128
    }

    /// Fresh bid from current network conditions.
    ///
    /// EIP-1559 bids fall back to a legacy gas price when the chain is configured without a
    /// base fee or the latest block has none.
    pub async fn quote<C: Chain>(&self, chain: &C, tx_type: TxType) -> Result<GasQuote, EngineError> {
        if tx_type.is_eip1559() && chain.settings().eip1559 {
            if let Some(base_fee) = chain.get_base_fee().await? {
                let suggested_tip = chain.get_max_priority_fee_per_gas().await?;
                return Ok(self.eip1559_quote(base_fee, suggested_tip));
            }
            tracing::debug!(
                chain_id = chain.chain_id(),
                "Latest block has no base fee, falling back to legacy gas price"
            );
        }

        let gas_price = chain.get_gas_price().await?;
        let gas_price = match self.config.max_fee_cap {
            Some(cap) => gas_price.min(cap),
            None => gas_price,
        };
        Ok(GasQuote::Legacy { gas_price })
    }

    pub fn eip1559_quote(&self, base_fee: u128, suggested_tip: u128) -> GasQuote {
        let tip = suggested_tip.max(self.config.priority_fee_tip);
        let max_fee = base_fee
            .saturating_mul(self.config.base_fee_multiplier as u128)
            .saturating_add(tip);

        let (max_fee, tip) = match self.config.max_fee_cap {
            Some(cap) if max_fee > cap => (cap, tip.min(cap)),
            _ => (max_fee, tip),
        };

        GasQuote::Eip1559 {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: tip,
        }
    }

    /// Bumps every component of `previous`, rounding up and adding at least one wei, so the
    /// result always outbids it. Fails when the configured cap leaves no room to outbid.
    pub fn escalate(&self, previous: &GasQuote) -> Result<GasQuote, EngineError> {
        let next = match *previous {
            GasQuote::Legacy { gas_price } => GasQuote::Legacy {
                gas_price: self.bump(gas_price),
            },
            GasQuote::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let tip = self.bump(max_priority_fee_per_gas);
                GasQuote::Eip1559 {
                    max_fee_per_gas: self.bump(max_fee_per_gas).max(tip),
                    max_priority_fee_per_gas: tip,
                }
            }
        };

        if let Some(cap) = self.config.max_fee_cap {
            let ceiling = next.gas_price().or(next.max_fee_per_gas()).unwrap_or_default();
            if ceiling > cap {
                return Err(EngineError::SubmissionError {
                    chain_id: 0,
                    message: format!("escalated fee {ceiling} exceeds the configured cap {cap}"),
                });
            }
        }

        Ok(next)
    }

    /// Escalation that also keeps up with the market: the higher of the bumped previous bid
    /// and a fresh quote, per component.
    pub async fn escalate_for_chain<C: Chain>(
        &self,
        chain: &C,
        previous: &GasQuote,
    ) -> Result<GasQuote, EngineError> {
        let bumped = self.escalate(previous).map_err(|e| match e {
            EngineError::SubmissionError { message, .. } => EngineError::SubmissionError {
                chain_id: chain.chain_id(),
                message,
            },
            other => other,
        })?;

        let tx_type = match previous {
            GasQuote::Legacy { .. } => TxType::Legacy,
            GasQuote::Eip1559 { .. } => TxType::Eip1559,
        };

        let fresh = match self.quote(chain, tx_type).await {
            Ok(fresh) => fresh,
            Err(e) => {
                tracing::debug!(error = %e, "Fresh quote unavailable, using bumped bid only");
                return Ok(bumped);
            }
        };

        Ok(match (bumped, fresh) {
            (GasQuote::Legacy { gas_price: a }, GasQuote::Legacy { gas_price: b }) => {
                GasQuote::Legacy {
                    gas_price: a.max(b),
                }
            }
            (
                GasQuote::Eip1559 {
                    max_fee_per_gas: fee_a,
                    max_priority_fee_per_gas: tip_a,
                },
                GasQuote::Eip1559 {
                    max_fee_per_gas: fee_b,
                    max_priority_fee_per_gas: tip_b,
                },
            ) => GasQuote::Eip1559 {
                max_fee_per_gas: fee_a.max(fee_b),
                max_priority_fee_per_gas: tip_a.max(tip_b),
            },
            (bumped, _) => bumped,
        })
    }

    fn bump(&self, fee: u128) -> u128 {
        let percent = self.bump_percent();
        let bumped = fee.saturating_mul(percent).div_ceil(100);
        bumped.max(fee.saturating_add(1))
    }
}
