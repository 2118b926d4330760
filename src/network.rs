// src/network.rs
use std::sync::Arc;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::RpcError;
use ethers::signers::{LocalWallet, Signer};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use tracing::{debug, info};

use crate::actions::erc20::MyERC20;
use crate::eip712::Eip712Transaction;
use crate::error::PaymasterError;
use crate::rpc::{ZkCallRequest, ZkEthApiClient};
use crate::types::{Asset, ModeKind, SponsoredTransaction, TxReceipt};

/// Everything the sponsorship core needs from the chain.
#[async_trait]
pub trait SponsorNetwork: Send + Sync {
    async fn balance(&self, owner: Address, asset: Asset) -> Result<U256, PaymasterError>;

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, PaymasterError>;

    async fn gas_price(&self) -> Result<U256, PaymasterError>;

    /// Simulates the transaction, paymaster validation included.
    async fn estimate_gas(&self, tx: &SponsoredTransaction) -> Result<U256, PaymasterError>;

    /// Signs and broadcasts. Returns once the network has taken the transaction.
    async fn send(&self, tx: &SponsoredTransaction) -> Result<H256, PaymasterError>;

    async fn receipt(&self, tx_hash: H256) -> Result<Option<TxReceipt>, PaymasterError>;
}

fn provider_error(e: impl std::fmt::Display) -> PaymasterError {
    PaymasterError::EthereumProviderError(e.to_string())
}

/// JSON-RPC error responses to `eth_sendRawTransaction` are node-side
/// rejections; anything else is a transport failure.
fn send_error(mode: ModeKind, e: ProviderError) -> PaymasterError {
    match RpcError::as_error_response(&e) {
        Some(response) => PaymasterError::SubmissionRejected {
            mode,
            reason: response.message.clone(),
        },
        None => provider_error(e),
    }
}

/// Live zkSync endpoint, signing as a single local wallet.
pub struct ZkSyncNetwork {
    client: Arc<Provider<Http>>,
    rpc: HttpClient,
    wallet: LocalWallet,
    chain_id: u64,
}

impl ZkSyncNetwork {
    pub async fn connect(rpc_url: &str, wallet: LocalWallet) -> Result<Self, PaymasterError> {
        let provider = Provider::<Http>::try_from(rpc_url).map_err(provider_error)?;
        let chain_id = provider.get_chainid().await.map_err(provider_error)?.as_u64();
        let rpc = HttpClientBuilder::default()
            .build(rpc_url)
            .map_err(provider_error)?;
        let wallet = wallet.with_chain_id(chain_id);

        info!(
            "Connected to chain {} as {:?}",
            chain_id,
            wallet.address()
        );

        Ok(Self {
            client: Arc::new(provider),
            rpc,
            wallet,
            chain_id,
        })
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

#[async_trait]
impl SponsorNetwork for ZkSyncNetwork {
    async fn balance(&self, owner: Address, asset: Asset) -> Result<U256, PaymasterError> {
        match asset {
            Asset::Native => self
                .client
                .get_balance(owner, None)
                .await
                .map_err(provider_error),
            Asset::Token(token) => MyERC20::new(token, self.client.clone())
                .balance_of(owner)
                .call()
                .await
                .map_err(provider_error),
        }
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, PaymasterError> {
        MyERC20::new(token, self.client.clone())
            .allowance(owner, spender)
            .call()
            .await
            .map_err(provider_error)
    }

    async fn gas_price(&self) -> Result<U256, PaymasterError> {
        self.client.get_gas_price().await.map_err(provider_error)
    }

    async fn estimate_gas(&self, tx: &SponsoredTransaction) -> Result<U256, PaymasterError> {
        let request = ZkCallRequest::from(tx);
        // The node answers a failing simulation with an RPC error.
        self.rpc
            .estimate_gas(request)
            .await
            .map_err(|e| PaymasterError::PreflightRejected {
                mode: tx.paymaster_params.mode_kind(),
                reason: e.to_string(),
            })
    }

    async fn send(&self, tx: &SponsoredTransaction) -> Result<H256, PaymasterError> {
        if tx.from != self.wallet.address() {
            return Err(PaymasterError::ValidationInput(format!(
                "no signing key loaded for {:?}",
                tx.from
            )));
        }

        let nonce = self
            .client
            .get_transaction_count(tx.from, Some(BlockNumber::Pending.into()))
            .await
            .map_err(provider_error)?;
        let envelope = Eip712Transaction::from_sponsored(tx, self.chain_id, nonce)?;
        let signature = self
            .wallet
            .sign_hash(envelope.signing_hash())
            .map_err(provider_error)?;
        let raw = envelope.rlp_signed(&signature);

        debug!("Sending sponsored transaction from {:?} with nonce {}", tx.from, nonce);
        let pending = self
            .client
            .send_raw_transaction(raw)
            .await
            .map_err(|e| send_error(tx.paymaster_params.mode_kind(), e))?;

        Ok(pending.tx_hash())
    }

    async fn receipt(&self, tx_hash: H256) -> Result<Option<TxReceipt>, PaymasterError> {
        let receipt = self
            .client
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(provider_error)?;

        Ok(receipt.map(|r| TxReceipt {
            tx_hash,
            block_number: r.block_number.map(|n| n.as_u64()),
            success: r.status == Some(U64::one()),
            gas_used: r.gas_used.unwrap_or_default(),
            effective_gas_price: r.effective_gas_price.unwrap_or_default(),
            revert_reason: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_not_rejections() {
        let err = send_error(
            ModeKind::General,
            ProviderError::CustomError("connection refused".to_string()),
        );
        match err {
            PaymasterError::EthereumProviderError(message) => {
                assert!(message.contains("connection refused"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
