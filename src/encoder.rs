// src/encoder.rs
use std::str::FromStr;

use ethers::abi::{AbiDecode, AbiEncode};
use ethers::prelude::*;

use crate::error::PaymasterError;
use crate::types::{EncodedPaymasterParams, ModeKind, SponsorshipMode, SponsorshipRequest};

abigen!(
    IPaymasterFlow,
    r#"[
        function general(bytes input) external
        function approvalBased(address token, uint256 minAllowance, bytes innerInput) external
    ]"#
);

/// A paymaster input as the validator recovers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymasterFlow {
    General {
        inner_input: Bytes,
    },
    ApprovalBased {
        token: Address,
        minimal_allowance: U256,
        inner_input: Bytes,
    },
}

impl PaymasterFlow {
    pub fn kind(&self) -> ModeKind {
        match self {
            Self::General { .. } => ModeKind::General,
            Self::ApprovalBased { .. } => ModeKind::ApprovalBased,
        }
    }
}

/// Parses a user-supplied address, rejecting the zero address.
pub fn parse_address(raw: &str) -> Result<Address, PaymasterError> {
    let address = Address::from_str(raw.trim())
        .map_err(|_| PaymasterError::InvalidAddress(raw.to_string()))?;
    ensure_account(address, "address")?;
    Ok(address)
}

fn ensure_account(address: Address, field: &str) -> Result<(), PaymasterError> {
    if address.is_zero() {
        return Err(PaymasterError::InvalidAddress(format!(
            "{} must not be the zero address",
            field
        )));
    }
    Ok(())
}

/// Encodes a sponsorship request into the paymaster params carried by the
/// transaction envelope. Pure: equal requests give byte-identical output.
pub fn encode(request: &SponsorshipRequest) -> Result<EncodedPaymasterParams, PaymasterError> {
    ensure_account(request.paymaster, "paymaster")?;

    let paymaster_input = match &request.mode {
        SponsorshipMode::General => GeneralCall {
            input: request.inner_input.clone(),
        }
        .encode(),
        SponsorshipMode::ApprovalBased {
            token,
            minimal_allowance,
        } => {
            ensure_account(*token, "token")?;
            if minimal_allowance.is_zero() {
                return Err(PaymasterError::InvalidAllowance(*minimal_allowance));
            }
            ApprovalBasedCall {
                token: *token,
                min_allowance: *minimal_allowance,
                inner_input: request.inner_input.clone(),
            }
            .encode()
        }
    };

    Ok(EncodedPaymasterParams {
        paymaster: request.paymaster,
        paymaster_input: paymaster_input.into(),
    })
}

/// Recovers the flow from a `paymasterInput`.
pub fn decode(paymaster_input: &[u8]) -> Result<PaymasterFlow, PaymasterError> {
    let call = IPaymasterFlowCalls::decode(paymaster_input).map_err(|e| {
        PaymasterError::ValidationInput(format!("unsupported paymaster flow: {}", e))
    })?;
    Ok(match call {
        IPaymasterFlowCalls::General(GeneralCall { input }) => PaymasterFlow::General {
            inner_input: input,
        },
        IPaymasterFlowCalls::ApprovalBased(ApprovalBasedCall {
            token,
            min_allowance,
            inner_input,
        }) => PaymasterFlow::ApprovalBased {
            token,
            minimal_allowance: min_allowance,
            inner_input,
        },
    })
}

impl EncodedPaymasterParams {
    pub fn mode_kind(&self) -> ModeKind {
        decode(&self.paymaster_input)
            .map(|flow| flow.kind())
            .unwrap_or(ModeKind::Unknown)
    }
}
