// src/validator.rs
//! Acceptance rules of a paymaster contract, expressed as the state machine
//! the network walks through for every sponsored transaction:
//!
//! `Received -> Validating -> {Accepted | Rejected}`, then for accepted
//! transactions `Accepted -> Executing -> {Settled | Reverted}`.
use std::collections::BTreeSet;
use std::fmt;

use ethers::types::{Address, U256};
use tracing::debug;

use crate::encoder::{decode, PaymasterFlow};
use crate::error::PaymasterError;
use crate::types::{ModeKind, ValidatorDecision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationPhase {
    Received,
    Validating,
    Accepted,
    Rejected,
    Executing,
    Settled,
    /// The wrapped call aborted after acceptance. Nothing is committed.
    Reverted,
}

impl ValidationPhase {
    pub fn can_advance_to(self, next: ValidationPhase) -> bool {
        use ValidationPhase::*;
        matches!(
            (self, next),
            (Received, Validating)
                | (Validating, Accepted)
                | (Validating, Rejected)
                | (Accepted, Executing)
                | (Executing, Settled)
                | (Executing, Reverted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Settled | Self::Reverted)
    }
}

impl fmt::Display for ValidationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Policy applied to `General` flow requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneralPolicy {
    /// Sponsor everything.
    Open,
    AllowList(BTreeSet<Address>),
    /// Sponsor any sender while the committed fee stays within the budget.
    PerCallBudget(U256),
    /// Sponsor holders of at least one token of the collection.
    TokenHolder(Address),
}

/// Tokens the paymaster pulls from the sender once it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullPolicy {
    None,
    MinimalAllowance,
    Fixed(U256),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalPolicy {
    pub token: Address,
    pub pull: PullPolicy,
}

/// Which flows a paymaster contract supports and on what terms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SponsorshipPolicy {
    pub general: Option<GeneralPolicy>,
    pub approval: Option<ApprovalPolicy>,
}

impl SponsorshipPolicy {
    pub fn general(policy: GeneralPolicy) -> Self {
        Self {
            general: Some(policy),
            approval: None,
        }
    }

    pub fn approval(token: Address, pull: PullPolicy) -> Self {
        Self {
            general: None,
            approval: Some(ApprovalPolicy { token, pull }),
        }
    }
}

/// Read access to chain state during validation.
pub trait LedgerView {
    fn native_balance(&self, owner: Address) -> U256;
    fn token_balance(&self, token: Address, owner: Address) -> U256;
    fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256;
}

/// The `ApprovalBased` acceptance predicate.
pub fn allowance_satisfied(allowance: U256, minimal_allowance: U256) -> bool {
    allowance >= minimal_allowance
}

/// Token movement the paymaster performs as the price of accepting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPull {
    pub token: Address,
    pub from: Address,
    pub amount: U256,
}

/// Why a paymaster turned a transaction down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionCause {
    /// The request violates the paymaster's policy.
    Policy(String),
    /// The paymaster cannot cover the fee it would commit to.
    Underfunded { balance: U256, required: U256 },
}

impl RejectionCause {
    /// The error a network reports for this rejection; policy rejections
    /// take the class of the stage that observed them.
    pub fn into_error(
        self,
        policy_error: impl FnOnce(String) -> PaymasterError,
    ) -> PaymasterError {
        match self {
            Self::Policy(reason) => policy_error(reason),
            Self::Underfunded { balance, required } => {
                PaymasterError::InsufficientFunding { balance, required }
            }
        }
    }
}

impl fmt::Display for RejectionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Policy(reason) => f.write_str(reason),
            Self::Underfunded { balance, required } => write!(
                f,
                "paymaster balance {} cannot cover fee {}",
                balance, required
            ),
        }
    }
}

impl From<String> for RejectionCause {
    fn from(reason: String) -> Self {
        Self::Policy(reason)
    }
}

impl From<&str> for RejectionCause {
    fn from(reason: &str) -> Self {
        Self::Policy(reason.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub mode: ModeKind,
    pub decision: ValidatorDecision,
    pub token_pull: Option<TokenPull>,
    /// Set exactly when the decision is a rejection.
    pub rejection: Option<RejectionCause>,
}

pub struct SponsorshipValidator<'a> {
    paymaster: Address,
    policy: &'a SponsorshipPolicy,
    phase: ValidationPhase,
    trace: Vec<ValidationPhase>,
}

impl<'a> SponsorshipValidator<'a> {
    pub fn new(paymaster: Address, policy: &'a SponsorshipPolicy) -> Self {
        Self {
            paymaster,
            policy,
            phase: ValidationPhase::Received,
            trace: vec![ValidationPhase::Received],
        }
    }

    pub fn phase(&self) -> ValidationPhase {
        self.phase
    }

    /// Every phase visited so far, in order.
    pub fn trace(&self) -> &[ValidationPhase] {
        &self.trace
    }

    fn advance(&mut self, next: ValidationPhase) -> Result<(), PaymasterError> {
        if !self.phase.can_advance_to(next) {
            return Err(PaymasterError::InvalidTransition(format!(
                "{} -> {}",
                self.phase, next
            )));
        }
        self.phase = next;
        self.trace.push(next);
        Ok(())
    }

    /// Decides whether the paymaster sponsors `sender`'s transaction.
    ///
    /// `required_fee` is the fee the paymaster commits to, `gas_limit *
    /// max_fee_per_gas` of the envelope. Nothing is written to the ledger:
    /// an accepted validation only reports the token pull to perform.
    pub fn validate(
        &mut self,
        view: &impl LedgerView,
        sender: Address,
        paymaster_input: &[u8],
        required_fee: U256,
    ) -> Result<Validation, PaymasterError> {
        self.advance(ValidationPhase::Validating)?;

        let (mode, outcome) = match decode(paymaster_input) {
            Ok(flow) => (flow.kind(), self.check_flow(view, sender, &flow, required_fee)),
            Err(e) => (ModeKind::Unknown, Err(RejectionCause::Policy(e.to_string()))),
        };

        let (decision, token_pull, rejection) = match outcome {
            Ok(token_pull) => {
                self.advance(ValidationPhase::Accepted)?;
                (ValidatorDecision::accept(), token_pull, None)
            }
            Err(cause) => {
                self.advance(ValidationPhase::Rejected)?;
                (ValidatorDecision::reject(cause.to_string()), None, Some(cause))
            }
        };
        debug!(
            "Paymaster {:?} {} {} flow for {:?}",
            self.paymaster,
            if decision.accepted { "accepted" } else { "rejected" },
            mode,
            sender
        );

        Ok(Validation {
            mode,
            decision,
            token_pull,
            rejection,
        })
    }

    pub fn begin_execution(&mut self) -> Result<(), PaymasterError> {
        self.advance(ValidationPhase::Executing)
    }

    pub fn settle(&mut self) -> Result<(), PaymasterError> {
        self.advance(ValidationPhase::Settled)
    }

    pub fn revert(&mut self) -> Result<(), PaymasterError> {
        self.advance(ValidationPhase::Reverted)
    }

    fn check_flow(
        &self,
        view: &impl LedgerView,
        sender: Address,
        flow: &PaymasterFlow,
        required_fee: U256,
    ) -> Result<Option<TokenPull>, RejectionCause> {
        let funding = view.native_balance(self.paymaster);
        if funding < required_fee {
            return Err(RejectionCause::Underfunded {
                balance: funding,
                required: required_fee,
            });
        }

        match flow {
            PaymasterFlow::General { .. } => {
                let policy = self
                    .policy
                    .general
                    .as_ref()
                    .ok_or("paymaster does not support the General flow")?;
                check_general(view, policy, sender, required_fee)?;
                Ok(None)
            }
            PaymasterFlow::ApprovalBased {
                token,
                minimal_allowance,
                ..
            } => {
                let policy = self
                    .policy
                    .approval
                    .as_ref()
                    .ok_or("paymaster does not support the ApprovalBased flow")?;
                if *token != policy.token {
                    return Err(format!("unsupported token {:?}", token).into());
                }

                let allowance = view.allowance(*token, sender, self.paymaster);
                if !allowance_satisfied(allowance, *minimal_allowance) {
                    return Err(format!(
                        "allowance {} is below the minimal allowance {}",
                        allowance, minimal_allowance
                    )
                    .into());
                }

                let amount = match policy.pull {
                    PullPolicy::None => return Ok(None),
                    PullPolicy::MinimalAllowance => *minimal_allowance,
                    PullPolicy::Fixed(amount) => amount,
                };
                if amount > allowance {
                    return Err(format!(
                        "allowance {} does not cover the price {}",
                        allowance, amount
                    )
                    .into());
                }
                if amount > view.token_balance(*token, sender) {
                    return Err(format!("sender cannot pay the price {}", amount).into());
                }
                Ok(Some(TokenPull {
                    token: *token,
                    from: sender,
                    amount,
                }))
            }
        }
    }
}

fn check_general(
    view: &impl LedgerView,
    policy: &GeneralPolicy,
    sender: Address,
    required_fee: U256,
) -> Result<(), String> {
    match policy {
        GeneralPolicy::Open => Ok(()),
        GeneralPolicy::AllowList(allowed) => {
            if allowed.contains(&sender) {
                Ok(())
            } else {
                Err(format!("sender {:?} is not allow-listed", sender))
            }
        }
        GeneralPolicy::PerCallBudget(budget) => {
            if required_fee <= *budget {
                Ok(())
            } else {
                Err(format!("fee {} exceeds per-call budget {}", required_fee, budget))
            }
        }
        GeneralPolicy::TokenHolder(collection) => {
            if view.token_balance(*collection, sender).is_zero() {
                Err(format!("sender {:?} holds no token of {:?}", sender, collection))
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::encoder::encode;
    use crate::types::SponsorshipRequest;

    const PAYMASTER: Address = Address::repeat_byte(0x10);
    const TOKEN: Address = Address::repeat_byte(0x20);
    const SENDER: Address = Address::repeat_byte(0x30);

    #[derive(Default)]
    struct View {
        native: HashMap<Address, U256>,
        tokens: HashMap<Address, U256>,
        allowance: U256,
    }

    impl LedgerView for View {
        fn native_balance(&self, owner: Address) -> U256 {
            self.native.get(&owner).copied().unwrap_or_default()
        }
        fn token_balance(&self, _token: Address, owner: Address) -> U256 {
            self.tokens.get(&owner).copied().unwrap_or_default()
        }
        fn allowance(&self, _token: Address, _owner: Address, _spender: Address) -> U256 {
            self.allowance
        }
    }

    fn funded(allowance: u64) -> View {
        let mut view = View {
            allowance: allowance.into(),
            ..Default::default()
        };
        view.native.insert(PAYMASTER, 1_000_000.into());
        view.tokens.insert(SENDER, 10.into());
        view
    }

    fn approval_input(min: u64) -> Vec<u8> {
        encode(&SponsorshipRequest::approval_based(PAYMASTER, TOKEN, min.into()))
            .unwrap()
            .paymaster_input
            .to_vec()
    }

    fn general_input() -> Vec<u8> {
        encode(&SponsorshipRequest::general(PAYMASTER))
            .unwrap()
            .paymaster_input
            .to_vec()
    }

    #[test]
    fn allowance_predicate_is_a_threshold() {
        for allowance in 0u64..6 {
            for min in 0u64..6 {
                assert_eq!(
                    allowance_satisfied(allowance.into(), min.into()),
                    allowance >= min
                );
            }
        }
    }

    #[test]
    fn approval_flow_accepts_iff_allowance_reaches_minimum() {
        let policy = SponsorshipPolicy::approval(TOKEN, PullPolicy::None);
        for allowance in 0u64..4 {
            for min in 1u64..4 {
                let mut validator = SponsorshipValidator::new(PAYMASTER, &policy);
                let validation = validator
                    .validate(&funded(allowance), SENDER, &approval_input(min), U256::zero())
                    .unwrap();
                assert_eq!(validation.decision.accepted, allowance >= min);
                assert_eq!(validation.mode, ModeKind::ApprovalBased);
            }
        }
    }

    #[test]
    fn accepted_approval_reports_pull() {
        let policy = SponsorshipPolicy::approval(TOKEN, PullPolicy::MinimalAllowance);
        let mut validator = SponsorshipValidator::new(PAYMASTER, &policy);
        let validation = validator
            .validate(&funded(1), SENDER, &approval_input(1), U256::zero())
            .unwrap();
        assert_eq!(
            validation.token_pull,
            Some(TokenPull {
                token: TOKEN,
                from: SENDER,
                amount: U256::one(),
            })
        );
        assert_eq!(validator.phase(), ValidationPhase::Accepted);
    }

    #[test]
    fn fixed_price_above_allowance_is_rejected() {
        let policy = SponsorshipPolicy::approval(TOKEN, PullPolicy::Fixed(5.into()));
        let mut validator = SponsorshipValidator::new(PAYMASTER, &policy);
        let validation = validator
            .validate(&funded(1), SENDER, &approval_input(1), U256::zero())
            .unwrap();
        assert!(!validation.decision.accepted);
    }

    #[test]
    fn other_tokens_are_rejected() {
        let policy = SponsorshipPolicy::approval(Address::repeat_byte(0x99), PullPolicy::None);
        let mut validator = SponsorshipValidator::new(PAYMASTER, &policy);
        let validation = validator
            .validate(&funded(5), SENDER, &approval_input(1), U256::zero())
            .unwrap();
        assert!(validation.decision.reason.unwrap().contains("unsupported token"));
    }

    #[test]
    fn allow_list_rejects_strangers() {
        let policy = SponsorshipPolicy::general(GeneralPolicy::AllowList(
            [Address::repeat_byte(0x77)].into_iter().collect(),
        ));
        let mut validator = SponsorshipValidator::new(PAYMASTER, &policy);
        let validation = validator
            .validate(&funded(0), SENDER, &general_input(), U256::zero())
            .unwrap();
        assert!(!validation.decision.accepted);
        assert_eq!(
            validator.trace(),
            &[
                ValidationPhase::Received,
                ValidationPhase::Validating,
                ValidationPhase::Rejected
            ]
        );
        assert!(validator.begin_execution().is_err());
    }

    #[test]
    fn budget_and_funding_bound_the_fee() {
        let policy = SponsorshipPolicy::general(GeneralPolicy::PerCallBudget(100.into()));
        let mut within = SponsorshipValidator::new(PAYMASTER, &policy);
        assert!(within
            .validate(&funded(0), SENDER, &general_input(), 100.into())
            .unwrap()
            .decision
            .accepted);

        let mut over = SponsorshipValidator::new(PAYMASTER, &policy);
        assert!(!over
            .validate(&funded(0), SENDER, &general_input(), 101.into())
            .unwrap()
            .decision
            .accepted);

        let open = SponsorshipPolicy::general(GeneralPolicy::Open);
        let mut broke = SponsorshipValidator::new(PAYMASTER, &open);
        let validation = broke
            .validate(&View::default(), SENDER, &general_input(), 1.into())
            .unwrap();
        assert!(!validation.decision.accepted);
        assert_eq!(
            validation.rejection,
            Some(RejectionCause::Underfunded {
                balance: U256::zero(),
                required: U256::one(),
            })
        );
    }

    #[test]
    fn funding_shortfall_maps_to_insufficient_funding() {
        let cause = RejectionCause::Underfunded {
            balance: 1.into(),
            required: 2.into(),
        };
        let err = cause.into_error(|reason| PaymasterError::SubmissionRejected {
            mode: ModeKind::General,
            reason,
        });
        assert_eq!(
            err,
            PaymasterError::InsufficientFunding {
                balance: 1.into(),
                required: 2.into(),
            }
        );
    }

    #[test]
    fn token_holder_policy_sponsors_holders_only() {
        let policy = SponsorshipPolicy::general(GeneralPolicy::TokenHolder(TOKEN));

        let mut stranger = SponsorshipValidator::new(PAYMASTER, &policy);
        let validation = stranger
            .validate(&funded(0), Address::repeat_byte(0x77), &general_input(), U256::zero())
            .unwrap();
        assert!(!validation.decision.accepted);
        assert!(matches!(validation.rejection, Some(RejectionCause::Policy(_))));

        let mut holder = SponsorshipValidator::new(PAYMASTER, &policy);
        let validation = holder
            .validate(&funded(0), SENDER, &general_input(), U256::zero())
            .unwrap();
        assert!(validation.decision.accepted);
        assert_eq!(validation.rejection, None);
    }

    #[test]
    fn unsupported_flow_and_garbage_input_are_rejected() {
        let policy = SponsorshipPolicy::general(GeneralPolicy::Open);
        let mut validator = SponsorshipValidator::new(PAYMASTER, &policy);
        assert!(!validator
            .validate(&funded(5), SENDER, &approval_input(1), U256::zero())
            .unwrap()
            .decision
            .accepted);

        let mut validator = SponsorshipValidator::new(PAYMASTER, &policy);
        let validation = validator
            .validate(&funded(5), SENDER, &[1, 2, 3], U256::zero())
            .unwrap();
        assert_eq!(validation.mode, ModeKind::Unknown);
        assert!(!validation.decision.accepted);
    }

    #[test]
    fn accepted_transactions_settle_or_revert_once() {
        let policy = SponsorshipPolicy::general(GeneralPolicy::Open);
        let mut validator = SponsorshipValidator::new(PAYMASTER, &policy);
        validator
            .validate(&funded(0), SENDER, &general_input(), U256::zero())
            .unwrap();
        validator.begin_execution().unwrap();
        validator.settle().unwrap();
        assert!(validator.phase().is_terminal());
        assert!(validator.revert().is_err());
    }
}
