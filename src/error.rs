// src/error.rs
use std::time::Duration;

use ethers::types::{H256, U256};
use thiserror::Error;

use crate::types::ModeKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymasterError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid minimal allowance {0}: must be at least 1")]
    InvalidAllowance(U256),

    #[error("Invalid sponsorship input: {0}")]
    ValidationInput(String),

    #[error("Preflight rejected ({mode} flow): {reason}")]
    PreflightRejected { mode: ModeKind, reason: String },

    #[error("Estimation reverted ({mode} flow): {reason}")]
    EstimationReverted { mode: ModeKind, reason: String },

    #[error("Submission rejected ({mode} flow): {reason}")]
    SubmissionRejected { mode: ModeKind, reason: String },

    #[error("Transaction {tx_hash:?} reverted: {reason}")]
    ExecutionReverted { tx_hash: H256, reason: String },

    #[error("Transaction {tx_hash:?} not final after {waited:?}")]
    Timeout { tx_hash: H256, waited: Duration },

    #[error("Paymaster balance {balance} cannot cover fee {required}")]
    InsufficientFunding { balance: U256, required: U256 },

    #[error("Invalid validation transition: {0}")]
    InvalidTransition(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Ethereum provider error: {0}")]
    EthereumProviderError(String),
}

/// Coarse classes of [`PaymasterError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed request, caught before any network call.
    ValidationInput,
    PreflightRejected,
    SubmissionRejected,
    ExecutionReverted,
    Timeout,
    InsufficientFunding,
    /// Transport failures and failed post-condition checks.
    Operational,
}

impl PaymasterError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidAddress(_) | Self::InvalidAllowance(_) | Self::ValidationInput(_) => {
                ErrorClass::ValidationInput
            }
            Self::PreflightRejected { .. } | Self::EstimationReverted { .. } => {
                ErrorClass::PreflightRejected
            }
            Self::SubmissionRejected { .. } => ErrorClass::SubmissionRejected,
            Self::ExecutionReverted { .. } => ErrorClass::ExecutionReverted,
            Self::Timeout { .. } => ErrorClass::Timeout,
            Self::InsufficientFunding { .. } => ErrorClass::InsufficientFunding,
            Self::InvalidTransition(_)
            | Self::VerificationFailed(_)
            | Self::EthereumProviderError(_) => {
                ErrorClass::Operational
            }
        }
    }

    /// Whether the exact same request may be sent again.
    ///
    /// Only a timeout qualifies, and only once the caller has confirmed the
    /// original transaction was not included. Everything else needs a changed
    /// request or operator action (e.g. topping up the paymaster).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_are_local() {
        assert_eq!(
            PaymasterError::InvalidAllowance(U256::zero()).class(),
            ErrorClass::ValidationInput
        );
        assert_eq!(
            PaymasterError::InvalidAddress("0x".into()).class(),
            ErrorClass::ValidationInput
        );
    }

    #[test]
    fn only_timeouts_are_retryable() {
        let timeout = PaymasterError::Timeout {
            tx_hash: H256::zero(),
            waited: Duration::from_secs(1),
        };
        let reverted = PaymasterError::ExecutionReverted {
            tx_hash: H256::zero(),
            reason: "out of gas".into(),
        };
        assert!(timeout.is_retryable());
        assert!(!reverted.is_retryable());
    }

    #[test]
    fn rejection_message_names_mode() {
        let err = PaymasterError::SubmissionRejected {
            mode: ModeKind::General,
            reason: "sender not allowed".into(),
        };
        assert_eq!(
            err.to_string(),
            "Submission rejected (General flow): sender not allowed"
        );
    }
}
