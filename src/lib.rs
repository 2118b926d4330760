// src/lib.rs
//! Gas sponsorship through zkSync paymasters: encode the paymaster input,
//! estimate the fee with validation included, submit, and verify that the
//! paymaster, not the sender, paid.
pub mod actions;
pub mod config;
pub mod eip712;
pub mod encoder;
pub mod error;
pub mod estimator;
pub mod flow;
pub mod network;
pub mod rpc;
pub mod simulator;
pub mod submitter;
pub mod types;
pub mod validator;
pub mod verifier;

pub use crate::error::{ErrorClass, PaymasterError};
pub use crate::flow::{FlowConfig, FlowReport, SponsorshipFlow};
pub use crate::network::{SponsorNetwork, ZkSyncNetwork};
pub use crate::types::{
    Asset, BalanceSnapshot, EncodedPaymasterParams, FeeQuote, ModeKind, SponsoredTransaction,
    SponsorshipMode, SponsorshipRequest, TxReceipt, ValidatorDecision, WrappedCall,
};
