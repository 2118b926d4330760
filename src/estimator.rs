// src/estimator.rs
use ethers::types::U256;
use tracing::{debug, info};

use crate::error::PaymasterError;
use crate::network::SponsorNetwork;
use crate::types::{FeeQuote, SponsoredTransaction};

pub struct FeeEstimator {
    // Extra headroom on the simulated gas limit, in percent
    gas_limit_buffer: u64,
}

impl Default for FeeEstimator {
    fn default() -> Self {
        Self::new(0)
    }
}

impl FeeEstimator {
    pub fn new(gas_limit_buffer: u64) -> Self {
        Self { gas_limit_buffer }
    }

    /// Simulates `tx` (paymaster validation included) and prices the result.
    ///
    /// This is the preflight check: a paymaster that would reject, or a
    /// wrapped call that would revert, fails here before anything is spent.
    pub async fn estimate_fee<N>(
        &self,
        network: &N,
        tx: &SponsoredTransaction,
        gas_price: U256,
    ) -> Result<FeeQuote, PaymasterError>
    where
        N: SponsorNetwork + ?Sized,
    {
        tx.check_envelope()?;

        let simulated = network.estimate_gas(tx).await?;
        debug!(
            "Simulated {} gas for {} flow",
            simulated,
            tx.paymaster_params.mode_kind()
        );

        let quote = self.quote(simulated, gas_price)?;
        info!(
            "Transaction fee estimation is {} wei ({} gas at {} wei)",
            quote.max_fee, quote.gas_limit, quote.gas_price
        );
        Ok(quote)
    }

    /// `gas_limit * gas_price`, after applying the buffer.
    pub fn quote(&self, gas_limit: U256, gas_price: U256) -> Result<FeeQuote, PaymasterError> {
        let gas_limit = gas_limit
            .checked_mul(U256::from(100 + self.gas_limit_buffer))
            .and_then(|product| product.checked_div(U256::from(100)))
            .ok_or_else(|| PaymasterError::ValidationInput("Gas limit overflow".to_string()))?;

        let max_fee = gas_limit
            .checked_mul(gas_price)
            .ok_or_else(|| PaymasterError::ValidationInput("Max fee overflow".to_string()))?;

        Ok(FeeQuote {
            gas_limit,
            gas_price,
            max_fee,
        })
    }
}
