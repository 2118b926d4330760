// src/eip712.rs
//! zkSync type-0x71 transactions: EIP-712 signing hash and RLP envelope.
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, Signature, H256, U256};
use ethers::utils::keccak256;
use ethers::utils::rlp::RlpStream;

use crate::error::PaymasterError;
use crate::types::{SponsoredTransaction, EIP712_TX_TYPE};

const DOMAIN_TYPE: &str = "EIP712Domain(string name,string version,uint256 chainId)";
const DOMAIN_NAME: &str = "zkSync";
const DOMAIN_VERSION: &str = "2";
const TRANSACTION_TYPE: &str = "Transaction(uint256 txType,uint256 from,uint256 to,uint256 gasLimit,uint256 gasPerPubdataByteLimit,uint256 maxFeePerGas,uint256 maxPriorityFeePerGas,uint256 paymaster,uint256 nonce,uint256 value,bytes data,bytes32[] factoryDeps,bytes paymasterInput)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip712Transaction {
    pub chain_id: u64,
    pub nonce: U256,
    pub from: Address,
    pub to: Address,
    pub gas_limit: U256,
    pub gas_per_pubdata_limit: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub value: U256,
    pub data: Bytes,
    pub paymaster: Address,
    pub paymaster_input: Bytes,
}

impl Eip712Transaction {
    /// Builds the envelope for a quoted sponsored transaction.
    pub fn from_sponsored(
        tx: &SponsoredTransaction,
        chain_id: u64,
        nonce: U256,
    ) -> Result<Self, PaymasterError> {
        let (gas_limit, max_fee_per_gas) = match (tx.gas_limit, tx.max_fee_per_gas) {
            (Some(gas_limit), Some(max_fee)) => (gas_limit, max_fee),
            _ => {
                return Err(PaymasterError::ValidationInput(
                    "transaction must be quoted before signing".to_string(),
                ))
            }
        };
        Ok(Self {
            chain_id,
            nonce,
            from: tx.from,
            to: tx.call.to,
            gas_limit,
            gas_per_pubdata_limit: tx.gas_per_pubdata_limit,
            max_fee_per_gas,
            // zkSync does not use a priority fee.
            max_priority_fee_per_gas: U256::zero(),
            value: tx.call.value,
            data: tx.call.data.clone(),
            paymaster: tx.paymaster_params.paymaster,
            paymaster_input: tx.paymaster_params.paymaster_input.clone(),
        })
    }

    pub fn domain_separator(&self) -> [u8; 32] {
        keccak256(encode(&[
            Token::FixedBytes(keccak256(DOMAIN_TYPE).to_vec()),
            Token::FixedBytes(keccak256(DOMAIN_NAME).to_vec()),
            Token::FixedBytes(keccak256(DOMAIN_VERSION).to_vec()),
            Token::Uint(U256::from(self.chain_id)),
        ]))
    }

    pub fn struct_hash(&self) -> [u8; 32] {
        // No factory deps: the bytes32[] member hashes the empty array.
        let factory_deps_hash = keccak256(Vec::<u8>::new());
        keccak256(encode(&[
            Token::FixedBytes(keccak256(TRANSACTION_TYPE).to_vec()),
            Token::Uint(U256::from(EIP712_TX_TYPE)),
            Token::Address(self.from),
            Token::Address(self.to),
            Token::Uint(self.gas_limit),
            Token::Uint(self.gas_per_pubdata_limit),
            Token::Uint(self.max_fee_per_gas),
            Token::Uint(self.max_priority_fee_per_gas),
            Token::Address(self.paymaster),
            Token::Uint(self.nonce),
            Token::Uint(self.value),
            Token::FixedBytes(keccak256(&self.data).to_vec()),
            Token::FixedBytes(factory_deps_hash.to_vec()),
            Token::FixedBytes(keccak256(&self.paymaster_input).to_vec()),
        ]))
    }

    /// Digest the sender signs: `keccak256(0x1901 || domain || struct)`.
    pub fn signing_hash(&self) -> H256 {
        let mut message = Vec::with_capacity(66);
        message.extend_from_slice(&[0x19, 0x01]);
        message.extend_from_slice(&self.domain_separator());
        message.extend_from_slice(&self.struct_hash());
        H256::from(keccak256(message))
    }

    /// Raw bytes for `eth_sendRawTransaction`.
    pub fn rlp_signed(&self, signature: &Signature) -> Bytes {
        let mut stream = RlpStream::new_list(16);
        stream.append(&self.nonce);
        stream.append(&self.max_priority_fee_per_gas);
        stream.append(&self.max_fee_per_gas);
        stream.append(&self.gas_limit);
        stream.append(&self.to);
        stream.append(&self.value);
        stream.append(&self.data.to_vec());
        // The ECDSA slots stay empty; the signature travels as customSignature.
        stream.append(&self.chain_id);
        stream.append_empty_data();
        stream.append_empty_data();
        stream.append(&self.chain_id);
        stream.append(&self.from);
        stream.append(&self.gas_per_pubdata_limit);
        stream.begin_list(0);
        stream.append(&signature.to_vec());
        if self.paymaster.is_zero() {
            stream.begin_list(0);
        } else {
            stream.begin_list(2);
            stream.append(&self.paymaster);
            stream.append(&self.paymaster_input.to_vec());
        }

        let mut raw = vec![EIP712_TX_TYPE];
        raw.extend_from_slice(&stream.out());
        raw.into()
    }
}
