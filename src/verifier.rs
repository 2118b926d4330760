// src/verifier.rs
use std::fmt;

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PaymasterError;
use crate::network::SponsorNetwork;
use crate::types::{Asset, BalanceSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceDelta {
    Unchanged,
    IncreasedBy(U256),
    DecreasedBy(U256),
}

impl BalanceDelta {
    /// The delta expected after a debit of `amount`.
    pub fn debit(amount: U256) -> Self {
        if amount.is_zero() {
            Self::Unchanged
        } else {
            Self::DecreasedBy(amount)
        }
    }
}

impl BalanceDelta {
    /// The delta expected after crediting `credit` and debiting `debit`.
    pub fn net(credit: U256, debit: U256) -> Self {
        match credit.cmp(&debit) {
            std::cmp::Ordering::Equal => Self::Unchanged,
            std::cmp::Ordering::Greater => Self::IncreasedBy(credit - debit),
            std::cmp::Ordering::Less => Self::DecreasedBy(debit - credit),
        }
    }
}

impl fmt::Display for BalanceDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchanged => f.write_str("unchanged"),
            Self::IncreasedBy(amount) => write!(f, "+{}", amount),
            Self::DecreasedBy(amount) => write!(f, "-{}", amount),
        }
    }
}

/// Compares two snapshots of the same balance.
pub fn diff(before: &BalanceSnapshot, after: &BalanceSnapshot) -> Result<BalanceDelta, PaymasterError> {
    if before.address != after.address || before.asset != after.asset {
        return Err(PaymasterError::VerificationFailed(format!(
            "cannot compare {} of {:?} with {} of {:?}",
            before.asset, before.address, after.asset, after.address
        )));
    }

    Ok(match before.amount.cmp(&after.amount) {
        std::cmp::Ordering::Equal => BalanceDelta::Unchanged,
        std::cmp::Ordering::Less => BalanceDelta::IncreasedBy(after.amount - before.amount),
        std::cmp::Ordering::Greater => BalanceDelta::DecreasedBy(before.amount - after.amount),
    })
}

pub async fn snapshot<N>(
    network: &N,
    address: Address,
    asset: Asset,
) -> Result<BalanceSnapshot, PaymasterError>
where
    N: SponsorNetwork + ?Sized,
{
    let amount = network.balance(address, asset).await?;
    debug!("{} balance of {:?} is {}", asset, address, amount);
    Ok(BalanceSnapshot {
        address,
        asset,
        amount,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub address: Address,
    pub asset: Asset,
    pub delta: BalanceDelta,
}

/// Balances watched across one sponsored transaction.
#[derive(Debug, Clone, Default)]
pub struct BalanceWatch {
    tracked: Vec<(Address, Asset)>,
    before: Vec<BalanceSnapshot>,
}

impl BalanceWatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(mut self, address: Address, asset: Asset) -> Self {
        if !self.tracked.contains(&(address, asset)) {
            self.tracked.push((address, asset));
        }
        self
    }

    pub async fn record_before<N>(&mut self, network: &N) -> Result<(), PaymasterError>
    where
        N: SponsorNetwork + ?Sized,
    {
        self.before = self.take(network).await?;
        Ok(())
    }

    pub async fn changes<N>(&self, network: &N) -> Result<Vec<BalanceChange>, PaymasterError>
    where
        N: SponsorNetwork + ?Sized,
    {
        let after = self.take(network).await?;
        if after.len() != self.before.len() {
            return Err(PaymasterError::VerificationFailed(
                "balances were not recorded before the transaction".to_string(),
            ));
        }
        self.before
            .iter()
            .zip(after.iter())
            .map(|(before, after)| {
                Ok(BalanceChange {
                    address: before.address,
                    asset: before.asset,
                    delta: diff(before, after)?,
                })
            })
            .collect()
    }

    async fn take<N>(&self, network: &N) -> Result<Vec<BalanceSnapshot>, PaymasterError>
    where
        N: SponsorNetwork + ?Sized,
    {
        let mut snapshots = Vec::with_capacity(self.tracked.len());
        for (address, asset) in &self.tracked {
            snapshots.push(snapshot(network, *address, *asset).await?);
        }
        Ok(snapshots)
    }
}

/// Finds the change recorded for `address`/`asset`.
pub fn change_of(changes: &[BalanceChange], address: Address, asset: Asset) -> Option<BalanceDelta> {
    changes
        .iter()
        .find(|change| change.address == address && change.asset == asset)
        .map(|change| change.delta)
}

pub fn expect_delta(
    label: &str,
    actual: BalanceDelta,
    expected: BalanceDelta,
) -> Result<(), PaymasterError> {
    if actual != expected {
        return Err(PaymasterError::VerificationFailed(format!(
            "{} balance changed by {}, expected {}",
            label, actual, expected
        )));
    }
    Ok(())
}
