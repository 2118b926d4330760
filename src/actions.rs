// src/actions.rs
//! Calldata for the sample calls a paymaster sponsors. The sponsorship
//! machinery never looks inside these.
use ethers::abi::AbiEncode;
use ethers::types::{Address, U256};

use crate::types::WrappedCall;

pub mod erc20 {
    ethers::contract::abigen!(
        MyERC20,
        r#"[
            function mint(address to, uint256 amount) external
            function balanceOf(address owner) external view returns (uint256)
            function allowance(address owner, address spender) external view returns (uint256)
            function approve(address spender, uint256 amount) external returns (bool)
        ]"#
    );
}

pub mod erc721 {
    ethers::contract::abigen!(
        InfinityStones,
        r#"[
            function mint(address to, string stoneName) external
            function balanceOf(address owner) external view returns (uint256)
        ]"#
    );
}

pub mod test_loop {
    ethers::contract::abigen!(
        TestLoop,
        r#"[
            function loop() external
        ]"#
    );
}

pub fn erc20_mint(token: Address, to: Address, amount: U256) -> WrappedCall {
    WrappedCall {
        to: token,
        data: erc20::MintCall { to, amount }.encode().into(),
        value: U256::zero(),
    }
}

pub fn erc721_mint(collection: Address, to: Address, name: &str) -> WrappedCall {
    WrappedCall {
        to: collection,
        data: erc721::MintCall {
            to,
            stone_name: name.to_string(),
        }
        .encode()
        .into(),
        value: U256::zero(),
    }
}

pub fn run_loop(contract: Address) -> WrappedCall {
    WrappedCall {
        to: contract,
        data: test_loop::LoopCall.encode().into(),
        value: U256::zero(),
    }
}

#[cfg(test)]
mod tests {
    use ethers::abi::AbiDecode;

    use super::*;

    #[test]
    fn erc20_mint_targets_token() {
        let token = Address::repeat_byte(0xaa);
        let owner = Address::repeat_byte(0xbb);
        let call = erc20_mint(token, owner, 5.into());
        assert_eq!(call.to, token);
        let decoded = erc20::MintCall::decode(&call.data).unwrap();
        assert_eq!(decoded.to, owner);
        assert_eq!(decoded.amount, 5.into());
    }

    #[test]
    fn loop_call_is_selector_only() {
        assert_eq!(run_loop(Address::repeat_byte(1)).data.len(), 4);
    }
}
