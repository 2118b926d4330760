// src/simulator.rs
//! In-process network that runs paymaster validation the way a zkSync node
//! does, against an in-memory ledger. Used to exercise sponsorship flows
//! without a live endpoint.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use ethers::abi::{encode, AbiDecode, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use tracing::{debug, info};

use crate::actions::{erc20, erc721};
use crate::error::PaymasterError;
use crate::network::SponsorNetwork;
use crate::types::{Asset, ModeKind, SponsoredTransaction, TxReceipt, WrappedCall};
use crate::validator::{
    LedgerView, RejectionCause, SponsorshipPolicy, SponsorshipValidator, ValidationPhase,
};

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    native: HashMap<Address, U256>,
    tokens: HashMap<(Address, Address), U256>,
    allowances: HashMap<(Address, Address, Address), U256>,
}

impl Ledger {
    pub fn set_native(&mut self, owner: Address, amount: U256) {
        self.native.insert(owner, amount);
    }

    pub fn transfer_native(&mut self, from: Address, to: Address, amount: U256) -> Result<(), String> {
        self.debit_native(from, amount)?;
        let balance = self.native.entry(to).or_default();
        *balance = balance.saturating_add(amount);
        Ok(())
    }

    fn debit_native(&mut self, owner: Address, amount: U256) -> Result<(), String> {
        let balance = self.native.entry(owner).or_default();
        *balance = balance
            .checked_sub(amount)
            .ok_or_else(|| format!("{:?} has insufficient ETH balance", owner))?;
        Ok(())
    }

    pub fn mint(&mut self, token: Address, to: Address, amount: U256) {
        let balance = self.tokens.entry((token, to)).or_default();
        *balance = balance.saturating_add(amount);
    }

    pub fn transfer_token(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), String> {
        let balance = self.tokens.entry((token, from)).or_default();
        *balance = balance
            .checked_sub(amount)
            .ok_or("ERC20: transfer amount exceeds balance")?;
        self.mint(token, to, amount);
        Ok(())
    }

    pub fn approve(&mut self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.allowances.insert((token, owner, spender), amount);
    }

    pub fn transfer_from(
        &mut self,
        token: Address,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), String> {
        let allowance = self.allowances.entry((token, from, spender)).or_default();
        *allowance = allowance
            .checked_sub(amount)
            .ok_or("ERC20: insufficient allowance")?;
        self.transfer_token(token, from, to, amount)
    }
}

impl LedgerView for Ledger {
    fn native_balance(&self, owner: Address) -> U256 {
        self.native.get(&owner).copied().unwrap_or_default()
    }

    fn token_balance(&self, token: Address, owner: Address) -> U256 {
        self.tokens.get(&(token, owner)).copied().unwrap_or_default()
    }

    fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default()
    }
}

/// Behaviour of a contract a wrapped call can target.
pub trait CallHandler: Send + Sync {
    /// Applies the call to `ledger` and returns the gas it used, or a revert reason.
    fn call(&self, ledger: &mut Ledger, sender: Address, call: &WrappedCall) -> Result<u64, String>;
}

impl<F> CallHandler for F
where
    F: Fn(&mut Ledger, Address, &WrappedCall) -> Result<u64, String> + Send + Sync,
{
    fn call(&self, ledger: &mut Ledger, sender: Address, call: &WrappedCall) -> Result<u64, String> {
        self(ledger, sender, call)
    }
}

/// ERC-20 with an open `mint(address,uint256)`.
pub struct Erc20Mint;

impl CallHandler for Erc20Mint {
    fn call(&self, ledger: &mut Ledger, _sender: Address, call: &WrappedCall) -> Result<u64, String> {
        let mint = erc20::MintCall::decode(&call.data).map_err(|e| e.to_string())?;
        ledger.mint(call.to, mint.to, mint.amount);
        Ok(48_000)
    }
}

/// ERC-721 with an open `mint(address,string)`; the holder count is kept as a token balance.
pub struct Erc721Mint;

impl CallHandler for Erc721Mint {
    fn call(&self, ledger: &mut Ledger, _sender: Address, call: &WrappedCall) -> Result<u64, String> {
        let mint = erc721::MintCall::decode(&call.data).map_err(|e| e.to_string())?;
        if mint.stone_name.is_empty() {
            return Err("empty token name".to_string());
        }
        ledger.mint(call.to, mint.to, U256::one());
        Ok(95_000)
    }
}

/// A contract whose every call reverts.
pub struct Reverting(pub String);

impl CallHandler for Reverting {
    fn call(&self, _ledger: &mut Ledger, _sender: Address, _call: &WrappedCall) -> Result<u64, String> {
        Err(self.0.clone())
    }
}

/// Gas charged by the simulator, per transaction component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasSchedule {
    pub intrinsic: u64,
    pub general_validation: u64,
    pub approval_validation: u64,
    pub token_pull: u64,
    pub value_transfer: u64,
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self {
            intrinsic: 150_000,
            general_validation: 20_000,
            approval_validation: 45_000,
            token_pull: 30_000,
            value_transfer: 9_000,
        }
    }
}

/// 0.25 gwei, the price of a local zkSync node.
pub const DEFAULT_GAS_PRICE: u64 = 250_000_000;

enum Outcome {
    Rejected(RejectionCause),
    Reverted(String),
    Settled { gas_used: u64, price: U256 },
}

struct SimState {
    ledger: Ledger,
    paymasters: HashMap<Address, SponsorshipPolicy>,
    handlers: HashMap<Address, Arc<dyn CallHandler>>,
    nonces: HashMap<Address, u64>,
    receipts: HashMap<H256, TxReceipt>,
    withheld: Vec<TxReceipt>,
    withhold_receipts: bool,
    block_number: u64,
    gas_price: U256,
    last_trace: Vec<ValidationPhase>,
}

pub struct LocalNetwork {
    state: Mutex<SimState>,
    schedule: GasSchedule,
}

impl Default for LocalNetwork {
    fn default() -> Self {
        Self::new(GasSchedule::default())
    }
}

impl LocalNetwork {
    pub fn new(schedule: GasSchedule) -> Self {
        Self {
            state: Mutex::new(SimState {
                ledger: Ledger::default(),
                paymasters: HashMap::new(),
                handlers: HashMap::new(),
                nonces: HashMap::new(),
                receipts: HashMap::new(),
                withheld: Vec::new(),
                withhold_receipts: false,
                block_number: 0,
                gas_price: U256::from(DEFAULT_GAS_PRICE),
                last_trace: Vec::new(),
            }),
            schedule,
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fund(&self, owner: Address, amount: U256) {
        self.state().ledger.set_native(owner, amount);
    }

    pub fn mint_token(&self, token: Address, owner: Address, amount: U256) {
        self.state().ledger.mint(token, owner, amount);
    }

    pub fn approve(&self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.state().ledger.approve(token, owner, spender, amount);
    }

    pub fn deploy_paymaster(&self, address: Address, policy: SponsorshipPolicy) {
        self.state().paymasters.insert(address, policy);
    }

    pub fn register_handler(&self, address: Address, handler: impl CallHandler + 'static) {
        self.state().handlers.insert(address, Arc::new(handler));
    }

    pub fn set_gas_price(&self, price: U256) {
        self.state().gas_price = price;
    }

    /// While set, included transactions produce no visible receipt.
    pub fn withhold_receipts(&self, withhold: bool) {
        self.state().withhold_receipts = withhold;
    }

    /// Makes every withheld receipt visible.
    pub fn release_receipts(&self) {
        let mut state = self.state();
        let withheld = std::mem::take(&mut state.withheld);
        for receipt in withheld {
            state.receipts.insert(receipt.tx_hash, receipt);
        }
    }

    pub fn ledger(&self) -> Ledger {
        self.state().ledger.clone()
    }

    pub fn nonce(&self, owner: Address) -> u64 {
        self.state().nonces.get(&owner).copied().unwrap_or_default()
    }

    /// Phases the validator went through on the most recent transaction.
    pub fn last_trace(&self) -> Vec<ValidationPhase> {
        self.state().last_trace.clone()
    }

    fn execute(&self, state: &mut SimState, tx: &SponsoredTransaction, commit: bool) -> Result<Outcome, PaymasterError> {
        let params = &tx.paymaster_params;
        let policy = match state.paymasters.get(&params.paymaster) {
            Some(policy) => policy.clone(),
            None => {
                state.last_trace.clear();
                return Ok(Outcome::Rejected(RejectionCause::Policy(format!(
                    "no paymaster deployed at {:?}",
                    params.paymaster
                ))));
            }
        };
        let price = tx.max_fee_per_gas.unwrap_or(state.gas_price);
        let required_fee = tx.declared_max_fee().unwrap_or_default();

        let mut validator = SponsorshipValidator::new(params.paymaster, &policy);
        let validation = validator.validate(&state.ledger, tx.from, &params.paymaster_input, required_fee)?;
        if !validation.decision.accepted {
            state.last_trace = validator.trace().to_vec();
            let cause = validation
                .rejection
                .unwrap_or_else(|| "rejected by paymaster".into());
            return Ok(Outcome::Rejected(cause));
        }

        let mut scratch = state.ledger.clone();
        let mut gas_used = self.schedule.intrinsic
            + match validation.mode {
                ModeKind::ApprovalBased => self.schedule.approval_validation,
                _ => self.schedule.general_validation,
            };

        validator.begin_execution()?;
        let executed = (|| -> Result<u64, String> {
            let mut gas = 0;
            if let Some(pull) = validation.token_pull {
                scratch.transfer_from(pull.token, params.paymaster, pull.from, params.paymaster, pull.amount)?;
                gas += self.schedule.token_pull;
            }
            if !tx.call.value.is_zero() {
                scratch.transfer_native(tx.from, tx.call.to, tx.call.value)?;
                gas += self.schedule.value_transfer;
            }
            if let Some(handler) = state.handlers.get(&tx.call.to) {
                gas += handler.call(&mut scratch, tx.from, &tx.call)?;
            }
            Ok(gas)
        })();

        let settled = executed.and_then(|gas| {
            gas_used += gas;
            match tx.gas_limit {
                Some(limit) if U256::from(gas_used) > limit => Err("out of gas".to_string()),
                _ => Ok(()),
            }?;
            if commit {
                let fee = U256::from(gas_used).saturating_mul(price);
                scratch.debit_native(params.paymaster, fee)?;
            }
            Ok(())
        });

        match settled {
            Ok(()) => {
                validator.settle()?;
                state.last_trace = validator.trace().to_vec();
                if commit {
                    state.ledger = scratch;
                }
                Ok(Outcome::Settled { gas_used, price })
            }
            Err(reason) => {
                validator.revert()?;
                state.last_trace = validator.trace().to_vec();
                Ok(Outcome::Reverted(reason))
            }
        }
    }
}

fn tx_hash(tx: &SponsoredTransaction, nonce: u64) -> H256 {
    H256::from(keccak256(encode(&[
        Token::Address(tx.from),
        Token::Uint(U256::from(nonce)),
        Token::Address(tx.call.to),
        Token::Bytes(tx.call.data.to_vec()),
        Token::Bytes(tx.paymaster_params.paymaster_input.to_vec()),
    ])))
}

#[async_trait]
impl SponsorNetwork for LocalNetwork {
    async fn balance(&self, owner: Address, asset: Asset) -> Result<U256, PaymasterError> {
        let state = self.state();
        Ok(match asset {
            Asset::Native => state.ledger.native_balance(owner),
            Asset::Token(token) => state.ledger.token_balance(token, owner),
        })
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, PaymasterError> {
        Ok(self.state().ledger.allowance(token, owner, spender))
    }

    async fn gas_price(&self) -> Result<U256, PaymasterError> {
        Ok(self.state().gas_price)
    }

    async fn estimate_gas(&self, tx: &SponsoredTransaction) -> Result<U256, PaymasterError> {
        let mode = tx.paymaster_params.mode_kind();
        let mut state = self.state();
        match self.execute(&mut state, tx, false)? {
            Outcome::Settled { gas_used, .. } => Ok(U256::from(gas_used)),
            Outcome::Rejected(cause) => {
                Err(cause.into_error(|reason| PaymasterError::PreflightRejected { mode, reason }))
            }
            Outcome::Reverted(reason) => Err(PaymasterError::EstimationReverted { mode, reason }),
        }
    }

    async fn send(&self, tx: &SponsoredTransaction) -> Result<H256, PaymasterError> {
        tx.check_envelope()?;
        let mode = tx.paymaster_params.mode_kind();
        let mut state = self.state();

        let outcome = self.execute(&mut state, tx, true)?;
        let receipt = match outcome {
            Outcome::Rejected(cause) => {
                info!("Local paymaster rejected {} flow: {}", mode, cause);
                return Err(cause.into_error(|reason| PaymasterError::SubmissionRejected { mode, reason }));
            }
            Outcome::Settled { gas_used, price } => (true, U256::from(gas_used), price, None),
            // A reverted transaction commits nothing, the gas payment included.
            Outcome::Reverted(reason) => (false, U256::zero(), tx.max_fee_per_gas.unwrap_or_default(), Some(reason)),
        };

        let nonce = state.nonces.entry(tx.from).or_default();
        let hash = tx_hash(tx, *nonce);
        *nonce += 1;
        state.block_number += 1;

        let (success, gas_used, effective_gas_price, revert_reason) = receipt;
        let receipt = TxReceipt {
            tx_hash: hash,
            block_number: Some(state.block_number),
            success,
            gas_used,
            effective_gas_price,
            revert_reason,
        };
        debug!("Local network included {:?} (success: {})", hash, success);

        if state.withhold_receipts {
            state.withheld.push(receipt);
        } else {
            state.receipts.insert(hash, receipt);
        }
        Ok(hash)
    }

    async fn receipt(&self, tx_hash: H256) -> Result<Option<TxReceipt>, PaymasterError> {
        Ok(self.state().receipts.get(&tx_hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::erc20_mint;
    use crate::encoder::encode as encode_params;
    use crate::types::{FeeQuote, SponsorshipRequest};
    use crate::validator::PullPolicy;

    const PAYMASTER: Address = Address::repeat_byte(0x10);
    const TOKEN: Address = Address::repeat_byte(0x20);
    const SENDER: Address = Address::repeat_byte(0x30);

    fn network() -> LocalNetwork {
        let network = LocalNetwork::default();
        network.fund(PAYMASTER, U256::exp10(17));
        network.mint_token(TOKEN, SENDER, 3.into());
        network.deploy_paymaster(PAYMASTER, SponsorshipPolicy::approval(TOKEN, PullPolicy::MinimalAllowance));
        network.register_handler(TOKEN, Erc20Mint);
        network
    }

    fn mint_tx() -> SponsoredTransaction {
        let params = encode_params(&SponsorshipRequest::approval_based(PAYMASTER, TOKEN, U256::one())).unwrap();
        SponsoredTransaction::new(SENDER, erc20_mint(TOKEN, SENDER, 5.into()), params)
    }

    fn quoted(tx: SponsoredTransaction, gas: U256) -> SponsoredTransaction {
        let price = U256::from(DEFAULT_GAS_PRICE);
        tx.with_quote(&FeeQuote {
            gas_limit: gas,
            gas_price: price,
            max_fee: gas * price,
        })
    }

    #[tokio::test]
    async fn estimation_includes_validation_cost() {
        let network = network();
        network.approve(TOKEN, SENDER, PAYMASTER, 1.into());
        let approval_gas = network.estimate_gas(&mint_tx()).await.unwrap();

        let schedule = GasSchedule::default();
        let expected = schedule.intrinsic + schedule.approval_validation + schedule.token_pull + 48_000;
        assert_eq!(approval_gas, U256::from(expected));
        // Estimation leaves state alone.
        assert_eq!(network.ledger().token_balance(TOKEN, SENDER), 3.into());
    }

    #[tokio::test]
    async fn send_commits_pull_mint_and_fee() {
        let network = network();
        network.approve(TOKEN, SENDER, PAYMASTER, 1.into());
        let gas = network.estimate_gas(&mint_tx()).await.unwrap();
        let hash = network.send(&quoted(mint_tx(), gas)).await.unwrap();

        let receipt = network.receipt(hash).await.unwrap().unwrap();
        assert!(receipt.success);
        let ledger = network.ledger();
        assert_eq!(ledger.token_balance(TOKEN, SENDER), 7.into());
        assert_eq!(ledger.token_balance(TOKEN, PAYMASTER), 1.into());
        assert_eq!(ledger.native_balance(PAYMASTER), U256::exp10(17) - receipt.fee_charged());
        assert_eq!(network.nonce(SENDER), 1);
        assert_eq!(network.last_trace().last(), Some(&ValidationPhase::Settled));
    }

    #[tokio::test]
    async fn too_small_gas_limit_reverts_without_effects() {
        let network = network();
        network.approve(TOKEN, SENDER, PAYMASTER, 1.into());
        let before = network.ledger();
        let hash = network.send(&quoted(mint_tx(), 1_000.into())).await.unwrap();

        let receipt = network.receipt(hash).await.unwrap().unwrap();
        assert!(!receipt.success);
        assert_eq!(receipt.revert_reason.as_deref(), Some("out of gas"));
        let after = network.ledger();
        assert_eq!(after.native_balance(PAYMASTER), before.native_balance(PAYMASTER));
        assert_eq!(after.token_balance(TOKEN, SENDER), before.token_balance(TOKEN, SENDER));
        assert_eq!(network.last_trace().last(), Some(&ValidationPhase::Reverted));
    }

    #[tokio::test]
    async fn unknown_paymaster_is_rejected() {
        let network = LocalNetwork::default();
        let err = network.estimate_gas(&mint_tx()).await.unwrap_err();
        assert!(matches!(err, PaymasterError::PreflightRejected { mode: ModeKind::ApprovalBased, .. }));
    }

    #[tokio::test]
    async fn withheld_receipts_appear_on_release() {
        let network = network();
        network.approve(TOKEN, SENDER, PAYMASTER, 1.into());
        network.withhold_receipts(true);
        let hash = network.send(&quoted(mint_tx(), 1_000_000.into())).await.unwrap();
        assert!(network.receipt(hash).await.unwrap().is_none());
        network.release_receipts();
        assert!(network.receipt(hash).await.unwrap().is_some());
    }

    #[test]
    fn transfer_from_consumes_allowance() {
        let mut ledger = Ledger::default();
        ledger.mint(TOKEN, SENDER, 5.into());
        ledger.approve(TOKEN, SENDER, PAYMASTER, 2.into());
        ledger.transfer_from(TOKEN, PAYMASTER, SENDER, PAYMASTER, 2.into()).unwrap();
        assert_eq!(ledger.allowance(TOKEN, SENDER, PAYMASTER), U256::zero());
        assert!(ledger.transfer_from(TOKEN, PAYMASTER, SENDER, PAYMASTER, 1.into()).is_err());
    }
}
