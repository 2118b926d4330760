// src/types.rs
use std::fmt;

use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};

use crate::error::PaymasterError;

/// Lowest `gasPerPubdataLimit` the network accepts.
pub const DEFAULT_GAS_PER_PUBDATA_LIMIT: u64 = 50_000;

/// Transaction type byte of zkSync EIP-712 transactions.
pub const EIP712_TX_TYPE: u8 = 0x71;

/// Sponsorship scheme requested from the paymaster, with its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SponsorshipMode {
    General,
    #[serde(rename_all = "camelCase")]
    ApprovalBased {
        token: Address,
        minimal_allowance: U256,
    },
}

impl SponsorshipMode {
    pub fn kind(&self) -> ModeKind {
        match self {
            Self::General => ModeKind::General,
            Self::ApprovalBased { .. } => ModeKind::ApprovalBased,
        }
    }
}

/// Parameter-free tag of a [`SponsorshipMode`], carried in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModeKind {
    General,
    ApprovalBased,
    /// Paymaster input that does not decode to a known flow.
    Unknown,
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::General => "General",
            Self::ApprovalBased => "ApprovalBased",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorshipRequest {
    pub paymaster: Address,
    pub mode: SponsorshipMode,
    /// Passed through untouched to the paymaster's custom validation logic.
    pub inner_input: Bytes,
}

impl SponsorshipRequest {
    pub fn general(paymaster: Address) -> Self {
        Self {
            paymaster,
            mode: SponsorshipMode::General,
            inner_input: Bytes::default(),
        }
    }

    pub fn approval_based(paymaster: Address, token: Address, minimal_allowance: U256) -> Self {
        Self {
            paymaster,
            mode: SponsorshipMode::ApprovalBased {
                token,
                minimal_allowance,
            },
            inner_input: Bytes::default(),
        }
    }

    pub fn with_inner_input(mut self, inner_input: impl Into<Bytes>) -> Self {
        self.inner_input = inner_input.into();
        self
    }
}

/// Wire form of a sponsorship, attached to the transaction's `customData`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedPaymasterParams {
    pub paymaster: Address,
    pub paymaster_input: Bytes,
}

impl fmt::Display for EncodedPaymasterParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}:0x{}",
            self.paymaster,
            hex::encode(&self.paymaster_input)
        )
    }
}

/// The user-intended call the paymaster sponsors. Opaque to this crate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedCall {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsoredTransaction {
    pub from: Address,
    pub call: WrappedCall,
    pub gas_per_pubdata_limit: U256,
    pub paymaster_params: EncodedPaymasterParams,
    /// Filled from a [`FeeQuote`] before submission.
    pub gas_limit: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
}

impl SponsoredTransaction {
    pub fn new(from: Address, call: WrappedCall, paymaster_params: EncodedPaymasterParams) -> Self {
        Self {
            from,
            call,
            gas_per_pubdata_limit: U256::from(DEFAULT_GAS_PER_PUBDATA_LIMIT),
            paymaster_params,
            gas_limit: None,
            max_fee_per_gas: None,
        }
    }

    pub fn with_gas_per_pubdata_limit(mut self, limit: U256) -> Self {
        self.gas_per_pubdata_limit = limit;
        self
    }

    pub fn with_quote(mut self, quote: &FeeQuote) -> Self {
        self.gas_limit = Some(quote.gas_limit);
        self.max_fee_per_gas = Some(quote.gas_price);
        self
    }

    /// Rejects envelopes the network would refuse before execution.
    pub fn check_envelope(&self) -> Result<(), PaymasterError> {
        let floor = U256::from(DEFAULT_GAS_PER_PUBDATA_LIMIT);
        if self.gas_per_pubdata_limit < floor {
            return Err(PaymasterError::ValidationInput(format!(
                "gasPerPubdataLimit {} is below the network floor {}",
                self.gas_per_pubdata_limit, floor
            )));
        }
        if self.call.to.is_zero() {
            return Err(PaymasterError::ValidationInput(
                "wrapped call has no target".to_string(),
            ));
        }
        Ok(())
    }

    /// Gas limit times max fee per gas, when both are set.
    pub fn declared_max_fee(&self) -> Option<U256> {
        self.gas_limit?.checked_mul(self.max_fee_per_gas?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeQuote {
    pub gas_limit: U256,
    pub gas_price: U256,
    pub max_fee: U256,
}

impl FeeQuote {
    /// Whether a fee charged at settlement stays within this quote.
    pub fn covers(&self, actual_fee: U256) -> bool {
        actual_fee <= self.max_fee
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
    pub success: bool,
    pub gas_used: U256,
    pub effective_gas_price: U256,
    pub revert_reason: Option<String>,
}

impl TxReceipt {
    /// Native-currency fee actually debited from the paymaster.
    pub fn fee_charged(&self) -> U256 {
        self.gas_used.saturating_mul(self.effective_gas_price)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    Native,
    Token(Address),
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => f.write_str("ETH"),
            Self::Token(token) => write!(f, "token {:?}", token),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub address: Address,
    pub asset: Asset,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorDecision {
    pub accepted: bool,
    pub reason: Option<String>,
}

impl ValidatorDecision {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx() -> SponsoredTransaction {
        SponsoredTransaction::new(
            Address::repeat_byte(1),
            WrappedCall {
                to: Address::repeat_byte(2),
                ..Default::default()
            },
            EncodedPaymasterParams {
                paymaster: Address::repeat_byte(3),
                paymaster_input: Bytes::default(),
            },
        )
    }

    #[test]
    fn pubdata_floor_is_enforced() {
        assert!(tx().check_envelope().is_ok());
        let low = tx().with_gas_per_pubdata_limit(U256::from(DEFAULT_GAS_PER_PUBDATA_LIMIT - 1));
        assert!(matches!(
            low.check_envelope(),
            Err(PaymasterError::ValidationInput(_))
        ));
    }

    #[test]
    fn mode_serializes_like_the_sdk() {
        let mode = SponsorshipMode::ApprovalBased {
            token: Address::repeat_byte(0xaa),
            minimal_allowance: U256::one(),
        };
        let json = serde_json::to_value(&mode).unwrap();
        assert_eq!(json["type"], "ApprovalBased");
        assert_eq!(json["minimalAllowance"], "0x1");
    }

    #[test]
    fn quote_bounds_settlement() {
        let quote = FeeQuote {
            gas_limit: 10.into(),
            gas_price: 5.into(),
            max_fee: 50.into(),
        };
        assert!(quote.covers(50.into()));
        assert!(!quote.covers(51.into()));
        let filled = tx().with_quote(&quote);
        assert_eq!(filled.declared_max_fee(), Some(50.into()));
    }
}
