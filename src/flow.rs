// src/flow.rs
use ethers::types::{Address, U256};
use serde::Serialize;
use tracing::{info, warn};

use crate::encoder::encode;
use crate::error::PaymasterError;
use crate::estimator::FeeEstimator;
use crate::network::SponsorNetwork;
use crate::submitter::{SubmitOptions, Submitter};
use crate::types::{
    Asset, EncodedPaymasterParams, FeeQuote, ModeKind, SponsoredTransaction, SponsorshipMode,
    SponsorshipRequest, TxReceipt, WrappedCall, DEFAULT_GAS_PER_PUBDATA_LIMIT,
};
use crate::verifier::{change_of, expect_delta, BalanceChange, BalanceDelta, BalanceWatch};

#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub sender: Address,
    pub submit: SubmitOptions,
    /// Refuse to start unless the sender holds no ETH, so that a successful
    /// run proves the paymaster paid.
    pub require_empty_wallet: bool,
    pub gas_limit_buffer: u64,
    pub gas_per_pubdata_limit: U256,
    /// Tokens whose sender and paymaster balances are reported.
    pub tracked_tokens: Vec<Address>,
}

impl FlowConfig {
    pub fn new(sender: Address) -> Self {
        Self {
            sender,
            submit: SubmitOptions::default(),
            require_empty_wallet: true,
            gas_limit_buffer: 0,
            gas_per_pubdata_limit: U256::from(DEFAULT_GAS_PER_PUBDATA_LIMIT),
            tracked_tokens: Vec::new(),
        }
    }

    pub fn track_token(mut self, token: Address) -> Self {
        if !self.tracked_tokens.contains(&token) {
            self.tracked_tokens.push(token);
        }
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowReport {
    pub mode: ModeKind,
    pub sender: Address,
    pub paymaster_params: EncodedPaymasterParams,
    pub call_to: Address,
    pub call_value: U256,
    pub quote: FeeQuote,
    pub receipt: TxReceipt,
    pub changes: Vec<BalanceChange>,
}

impl FlowReport {
    pub fn paymaster_delta(&self) -> Option<BalanceDelta> {
        change_of(&self.changes, self.paymaster_params.paymaster, Asset::Native)
    }

    pub fn sender_native_delta(&self) -> Option<BalanceDelta> {
        change_of(&self.changes, self.sender, Asset::Native)
    }

    pub fn token_delta(&self, owner: Address, token: Address) -> Option<BalanceDelta> {
        change_of(&self.changes, owner, Asset::Token(token))
    }

    /// Checks the sponsorship post-conditions: the paymaster paid exactly
    /// the fee charged, within the quote, and the sender paid no gas. The
    /// call's value counts where it lands on a tracked account.
    pub fn verify(&self) -> Result<(), PaymasterError> {
        let fee = self.receipt.fee_charged();
        if !self.quote.covers(fee) {
            return Err(PaymasterError::VerificationFailed(format!(
                "charged fee {} exceeds quoted maximum {}",
                fee, self.quote.max_fee
            )));
        }

        let paymaster = self.paymaster_delta().ok_or_else(|| {
            PaymasterError::VerificationFailed("paymaster balance was not tracked".to_string())
        })?;
        let paymaster_address = self.paymaster_params.paymaster;
        let paymaster_credit = self.value_received_by(paymaster_address);
        expect_delta("Paymaster ETH", paymaster, BalanceDelta::net(paymaster_credit, fee))?;

        let sender = self.sender_native_delta().ok_or_else(|| {
            PaymasterError::VerificationFailed("sender balance was not tracked".to_string())
        })?;
        expect_delta(
            "Sender ETH",
            sender,
            BalanceDelta::net(self.value_received_by(self.sender), self.call_value),
        )?;
        Ok(())
    }

    fn value_received_by(&self, address: Address) -> U256 {
        if self.call_to == address {
            self.call_value
        } else {
            U256::zero()
        }
    }
}

/// Encoder -> estimator -> submitter -> verifier, for one sponsored call.
pub struct SponsorshipFlow<'a, N: ?Sized> {
    network: &'a N,
    config: FlowConfig,
}

impl<'a, N> SponsorshipFlow<'a, N>
where
    N: SponsorNetwork + ?Sized,
{
    pub fn new(network: &'a N, config: FlowConfig) -> Self {
        Self { network, config }
    }

    pub async fn run(
        &self,
        request: &SponsorshipRequest,
        call: WrappedCall,
    ) -> Result<FlowReport, PaymasterError> {
        let sender = self.config.sender;
        let mode = request.mode.kind();

        // Local checks first: nothing below runs for a malformed request.
        let params = encode(request)?;
        let tx = SponsoredTransaction::new(sender, call, params.clone())
            .with_gas_per_pubdata_limit(self.config.gas_per_pubdata_limit);
        tx.check_envelope()?;

        if self.config.require_empty_wallet {
            let balance = self.network.balance(sender, Asset::Native).await?;
            if !balance.is_zero() {
                return Err(PaymasterError::ValidationInput(format!(
                    "wallet is not empty: {:?} holds {} wei",
                    sender, balance
                )));
            }
        }

        let mut watch = BalanceWatch::new()
            .track(params.paymaster, Asset::Native)
            .track(sender, Asset::Native);
        for token in &self.config.tracked_tokens {
            watch = watch
                .track(sender, Asset::Token(*token))
                .track(params.paymaster, Asset::Token(*token));
        }
        watch.record_before(self.network).await?;

        if let SponsorshipMode::ApprovalBased {
            token,
            minimal_allowance,
        } = &request.mode
        {
            let allowance = self
                .network
                .allowance(*token, sender, params.paymaster)
                .await?;
            if allowance < *minimal_allowance {
                warn!(
                    "Allowance {} is below the minimal allowance {}; the paymaster will likely reject",
                    allowance, minimal_allowance
                );
            }
        }

        let gas_price = self.network.gas_price().await?;
        let quote = FeeEstimator::new(self.config.gas_limit_buffer)
            .estimate_fee(self.network, &tx, gas_price)
            .await?;

        let funding = self.network.balance(params.paymaster, Asset::Native).await?;
        if funding < quote.max_fee {
            return Err(PaymasterError::InsufficientFunding {
                balance: funding,
                required: quote.max_fee,
            });
        }

        info!("Sending {} sponsored call for {:?} via paymaster {:?}", mode, sender, params.paymaster);
        let tx = tx.with_quote(&quote);
        let receipt = Submitter::new(self.config.submit)
            .submit(self.network, &tx)
            .await?;

        let changes = watch.changes(self.network).await?;
        for change in &changes {
            info!("{} balance of {:?}: {}", change.asset, change.address, change.delta);
        }

        let report = FlowReport {
            mode,
            sender,
            paymaster_params: params,
            call_to: tx.call.to,
            call_value: tx.call.value,
            quote,
            receipt,
            changes,
        };
        report.verify()?;
        Ok(report)
    }
}
