//! Wire-level chain types: hex quantities, call parameters, receipts.

use alloy::primitives::{Address, B256, hex};
use serde::{Deserialize, Serialize};

use super::error::RpcError;

/// Transaction hash.
pub type TxHash = B256;

/// Encode an integer as an Ethereum hex quantity (`0x0`, `0x5208`).
pub fn format_quantity(value: u128) -> String {
    format!("{value:#x}")
}

/// Decode an Ethereum hex quantity.
pub fn parse_quantity(value: &str) -> Result<u128, RpcError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| RpcError::malformed(format!("quantity '{value}' is not 0x-prefixed")))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|_| RpcError::malformed(format!("invalid hex quantity '{value}'")))
}

/// Decode a quantity that must fit in 64 bits (nonces, gas, chain ids).
pub fn parse_quantity_u64(value: &str) -> Result<u64, RpcError> {
    let wide = parse_quantity(value)?;
    u64::try_from(wide).map_err(|_| RpcError::malformed(format!("quantity '{value}' overflows u64")))
}

/// Encode bytes as `0x`-prefixed hex.
pub fn format_bytes(bytes: &[u8]) -> String {
    hex::encode_prefixed(bytes)
}

/// Decode `0x`-prefixed hex data.
pub fn parse_bytes(value: &str) -> Result<Vec<u8>, RpcError> {
    hex::decode(value).map_err(|_| RpcError::malformed(format!("invalid hex data '{value}'")))
}

pub fn parse_hash(value: &str) -> Result<TxHash, RpcError> {
    value
        .parse()
        .map_err(|_| RpcError::malformed(format!("invalid transaction hash '{value}'")))
}

/// Block selector for account state queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    /// Mined state only.
    Latest,
    /// Mined state plus the node's mempool.
    Pending,
}

impl BlockTag {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockTag::Latest => "latest",
            BlockTag::Pending => "pending",
        }
    }
}

/// Call object for `eth_call` and `eth_estimateGas`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Hex call data. Some clients send `input` instead.
    #[serde(default, alias = "input", skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl TxParams {
    pub fn call(from: Option<Address>, to: Address, data: &[u8]) -> Self {
        Self {
            from: from.map(|a| format!("{a:#x}")),
            to: Some(format!("{to:#x}")),
            data: Some(format_bytes(data)),
            value: None,
        }
    }
}

/// Receipt as it appears on the wire (all quantities hex strings).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: String,
    #[serde(default)]
    pub transaction_index: Option<String>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub gas_used: Option<String>,
    #[serde(default)]
    pub cumulative_gas_used: Option<String>,
    #[serde(default)]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub logs: Vec<serde_json::Value>,
    /// `0x1` success, `0x0` revert. Absent on pre-Byzantium chains.
    #[serde(default)]
    pub status: Option<String>,
}

/// Decoded transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: TxHash,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub success: bool,
}

impl TryFrom<RpcReceipt> for Receipt {
    type Error = RpcError;

    fn try_from(raw: RpcReceipt) -> Result<Self, Self::Error> {
        let status = raw
            .status
            .as_deref()
            .ok_or_else(|| RpcError::malformed("receipt has no status field"))?;
        Ok(Self {
            transaction_hash: parse_hash(&raw.transaction_hash)?,
            block_number: raw.block_number.as_deref().map(parse_quantity_u64).transpose()?,
            gas_used: raw.gas_used.as_deref().map(parse_quantity_u64).transpose()?,
            success: parse_quantity(status)? == 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quantity_round_trip_edges() {
        assert_eq!(format_quantity(0), "0x0");
        assert_eq!(format_quantity(21_000), "0x5208");
        assert_eq!(parse_quantity("0x5208").unwrap(), 21_000);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert!(parse_quantity("5208").is_err());
        assert!(parse_quantity("0xzz").is_err());
        assert!(parse_quantity_u64("0x1ffffffffffffffff").is_err());
    }

    #[test]
    fn receipt_from_wire() {
        let raw: RpcReceipt = serde_json::from_value(json!({
            "transactionHash": format!("0x{}", "a".repeat(64)),
            "blockNumber": "0x1",
            "gasUsed": "0x5208",
            "logs": [],
            "status": "0x1",
            "contractAddress": null
        }))
        .unwrap();
        let receipt = Receipt::try_from(raw).unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.block_number, Some(1));
        assert_eq!(receipt.gas_used, Some(21_000));
    }

    #[test]
    fn reverted_receipt_is_not_success() {
        let raw: RpcReceipt = serde_json::from_value(json!({
            "transactionHash": format!("0x{}", "b".repeat(64)),
            "status": "0x0"
        }))
        .unwrap();
        assert!(!Receipt::try_from(raw).unwrap().success);
    }

    #[test]
    fn call_params_accept_input_alias() {
        let params: TxParams =
            serde_json::from_value(json!({"to": "0x01", "input": "0xdead"})).unwrap();
        assert_eq!(params.data.as_deref(), Some("0xdead"));
    }
}
