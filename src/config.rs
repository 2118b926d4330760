// src/config.rs
use ethers::signers::LocalWallet;
use ethers::types::Address;

use crate::encoder::parse_address;
use crate::error::PaymasterError;

pub const PAYMASTER_ADDRESS: &str = "PAYMASTER_ADDRESS";
pub const ERC20_TOKEN_ADDRESS: &str = "ERC20_TOKEN_ADDRESS";
pub const TOKEN_ADDRESS: &str = "TOKEN_ADDRESS";
pub const ERC721_TOKEN_ADDRESS: &str = "ERC721_TOKEN_ADDRESS";
pub const LOOP_CONTRACT_ADDRESS: &str = "LOOP_CONTRACT_ADDRESS";
pub const EMPTY_WALLET_PRIVATE_KEY: &str = "EMPTY_WALLET_PRIVATE_KEY";

/// Addresses and the throwaway wallet key left behind by a paymaster
/// deployment. Read once when a flow starts; never written.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    pub paymaster: Option<Address>,
    pub erc20_token: Option<Address>,
    pub erc721_token: Option<Address>,
    pub loop_contract: Option<Address>,
    sender_key: Option<String>,
}

impl AddressBook {
    /// Reads the book from the process environment (after `dotenv`).
    pub fn from_env() -> Result<Self, PaymasterError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, PaymasterError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Unset and empty entries are the same thing.
        let entry = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let address = |key: &str| entry(key).map(|raw| parse_address(&raw)).transpose();

        Ok(Self {
            paymaster: address(PAYMASTER_ADDRESS)?,
            erc20_token: match address(ERC20_TOKEN_ADDRESS)? {
                Some(token) => Some(token),
                None => address(TOKEN_ADDRESS)?,
            },
            erc721_token: address(ERC721_TOKEN_ADDRESS)?,
            loop_contract: address(LOOP_CONTRACT_ADDRESS)?,
            sender_key: entry(EMPTY_WALLET_PRIVATE_KEY),
        })
    }

    pub fn require_paymaster(&self) -> Result<Address, PaymasterError> {
        required(self.paymaster, PAYMASTER_ADDRESS)
    }

    pub fn require_erc20_token(&self) -> Result<Address, PaymasterError> {
        required(self.erc20_token, ERC20_TOKEN_ADDRESS)
    }

    pub fn require_erc721_token(&self) -> Result<Address, PaymasterError> {
        required(self.erc721_token, ERC721_TOKEN_ADDRESS)
    }

    pub fn require_loop_contract(&self) -> Result<Address, PaymasterError> {
        required(self.loop_contract, LOOP_CONTRACT_ADDRESS)
    }

    pub fn sender_wallet(&self) -> Result<LocalWallet, PaymasterError> {
        let key = required(self.sender_key.as_deref(), EMPTY_WALLET_PRIVATE_KEY)?;
        key.parse::<LocalWallet>().map_err(|_| {
            PaymasterError::ValidationInput(format!(
                "{} is not a valid private key",
                EMPTY_WALLET_PRIVATE_KEY
            ))
        })
    }
}

fn required<T>(value: Option<T>, key: &str) -> Result<T, PaymasterError> {
    value.ok_or_else(|| PaymasterError::ValidationInput(format!("{} is not set", key)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn book(entries: &[(&str, &str)]) -> Result<AddressBook, PaymasterError> {
        let map: HashMap<String, String> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AddressBook::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn token_address_falls_back_to_deploy_key() {
        let book = book(&[(TOKEN_ADDRESS, "0x2222222222222222222222222222222222222222")]).unwrap();
        assert_eq!(book.require_erc20_token().unwrap(), Address::repeat_byte(0x22));
    }

    #[test]
    fn empty_entries_count_as_missing() {
        let book = book(&[(PAYMASTER_ADDRESS, "")]).unwrap();
        assert!(matches!(
            book.require_paymaster(),
            Err(PaymasterError::ValidationInput(_))
        ));
    }

    #[test]
    fn malformed_addresses_fail_at_load() {
        assert!(matches!(
            book(&[(PAYMASTER_ADDRESS, "not-an-address")]),
            Err(PaymasterError::InvalidAddress(_))
        ));
    }

    #[test]
    fn sender_key_parses_into_wallet() {
        let book = book(&[(
            EMPTY_WALLET_PRIVATE_KEY,
            "0x7726827caac94a7f9e1b160f7ea819f172f7b6f9d2a97f992c38edeab82d4110",
        )])
        .unwrap();
        assert!(book.sender_wallet().is_ok());
        assert!(AddressBook::default().sender_wallet().is_err());
    }
}
