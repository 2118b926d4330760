// src/rpc.rs
use ethers::types::{Address, Bytes, U256, U64};
use jsonrpsee::proc_macros::rpc;
use serde::{Deserialize, Serialize};

use crate::types::{EncodedPaymasterParams, SponsoredTransaction, EIP712_TX_TYPE};

/// Call request carrying the zkSync `eip712Meta` extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZkCallRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    #[serde(rename = "type")]
    pub tx_type: U64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
    pub eip712_meta: Eip712Meta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip712Meta {
    pub gas_per_pubdata: U256,
    #[serde(default)]
    pub factory_deps: Vec<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_signature: Option<Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paymaster_params: Option<PaymasterParamsMeta>,
}

/// The node expects `paymasterInput` as a plain byte array, not hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterParamsMeta {
    pub paymaster: Address,
    pub paymaster_input: Vec<u8>,
}

impl From<&EncodedPaymasterParams> for PaymasterParamsMeta {
    fn from(params: &EncodedPaymasterParams) -> Self {
        Self {
            paymaster: params.paymaster,
            paymaster_input: params.paymaster_input.to_vec(),
        }
    }
}

impl From<&SponsoredTransaction> for ZkCallRequest {
    fn from(tx: &SponsoredTransaction) -> Self {
        Self {
            from: tx.from,
            to: tx.call.to,
            data: tx.call.data.clone(),
            value: tx.call.value,
            tx_type: U64::from(EIP712_TX_TYPE),
            gas_price: tx.max_fee_per_gas,
            eip712_meta: Eip712Meta {
                gas_per_pubdata: tx.gas_per_pubdata_limit,
                factory_deps: Vec::new(),
                custom_signature: None,
                paymaster_params: Some((&tx.paymaster_params).into()),
            },
        }
    }
}

// `eth_*` methods whose zkSync semantics depend on `eip712Meta`.
#[rpc(client, namespace = "eth")]
pub trait ZkEthApi {
    /// Estimates gas including paymaster validation.
    #[method(name = "estimateGas")]
    async fn estimate_gas(&self, request: ZkCallRequest) -> Result<U256, jsonrpsee::core::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WrappedCall;

    #[test]
    fn call_request_carries_paymaster_meta() {
        let tx = SponsoredTransaction::new(
            Address::repeat_byte(1),
            WrappedCall {
                to: Address::repeat_byte(2),
                data: vec![0xab].into(),
                value: U256::zero(),
            },
            EncodedPaymasterParams {
                paymaster: Address::repeat_byte(3),
                paymaster_input: vec![1u8, 2].into(),
            },
        );
        let json = serde_json::to_value(ZkCallRequest::from(&tx)).unwrap();
        assert_eq!(json["type"], "0x71");
        assert_eq!(json["eip712Meta"]["gasPerPubdata"], "0xc350");
        assert_eq!(
            json["eip712Meta"]["paymasterParams"]["paymasterInput"],
            serde_json::json!([1, 2])
        );
        assert!(json.get("gasPrice").is_none());
    }
}
