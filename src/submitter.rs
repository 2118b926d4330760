// src/submitter.rs
use std::time::Duration;

use ethers::types::H256;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::error::PaymasterError;
use crate::network::SponsorNetwork;
use crate::types::{SponsoredTransaction, TxReceipt};

/// Default bound on waiting for finality.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

pub struct Submitter {
    options: SubmitOptions,
}

impl Submitter {
    pub fn new(options: SubmitOptions) -> Self {
        Self { options }
    }

    /// Sends a quoted sponsored transaction and waits for its receipt.
    ///
    /// Dropping the returned future stops the wait but not the transaction:
    /// once sent it may still be included. After a `Timeout`, only resend
    /// when the original is known not to have landed.
    pub async fn submit<N>(
        &self,
        network: &N,
        tx: &SponsoredTransaction,
    ) -> Result<TxReceipt, PaymasterError>
    where
        N: SponsorNetwork + ?Sized,
    {
        if self.options.poll_interval.is_zero() {
            return Err(PaymasterError::ValidationInput(
                "receipt poll interval must be non-zero".to_string(),
            ));
        }
        tx.check_envelope()?;
        if tx.declared_max_fee().is_none() {
            return Err(PaymasterError::ValidationInput(
                "transaction must carry a gas limit and fee before submission".to_string(),
            ));
        }

        let tx_hash = network.send(tx).await.map_err(|e| {
            error!("Failed to submit sponsored transaction: {}", e);
            e
        })?;
        info!("Submitted sponsored transaction {:?}", tx_hash);

        let receipt = self.wait_for_receipt(network, tx_hash).await?;
        if !receipt.success {
            let reason = receipt
                .revert_reason
                .clone()
                .unwrap_or_else(|| "execution reverted".to_string());
            error!("Transaction {:?} reverted: {}", tx_hash, reason);
            return Err(PaymasterError::ExecutionReverted { tx_hash, reason });
        }

        info!(
            "Transaction {:?} settled, paymaster charged {} wei",
            tx_hash,
            receipt.fee_charged()
        );
        Ok(receipt)
    }

    async fn wait_for_receipt<N>(
        &self,
        network: &N,
        tx_hash: H256,
    ) -> Result<TxReceipt, PaymasterError>
    where
        N: SponsorNetwork + ?Sized,
    {
        let poll = async {
            let mut ticker = interval(self.options.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Some(receipt) = network.receipt(tx_hash).await? {
                    return Ok::<_, PaymasterError>(receipt);
                }
            }
        };

        match timeout(self.options.timeout, poll).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "No receipt for {:?} after {:?}; it may still be included",
                    tx_hash, self.options.timeout
                );
                Err(PaymasterError::Timeout {
                    tx_hash,
                    waited: self.options.timeout,
                })
            }
        }
    }
}

impl Default for Submitter {
    fn default() -> Self {
        Self::new(SubmitOptions::default())
    }
}
