//! Transaction parameters carried in a write job's payload.
//!
//! Recognised payload fields:
//! - `value`: wei, as a decimal string, `0x` hex string or JSON integer (default 0)
//! - `data`: `0x` hex calldata or init code (default empty)
//! - `gas_limit`: decimal string or JSON integer; estimated when absent

use alloy::network::TransactionBuilder;
use alloy::primitives::{hex, Address, Bytes, U256};
use alloy::rpc::types::TransactionRequest;
use serde_json::{Map, Value};

use crate::domain::{OperationKind, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxParams {
    pub value: U256,
    pub data: Bytes,
    pub gas_limit: Option<u64>,
}

impl TxParams {
    pub fn from_payload(kind: OperationKind, payload: &Map<String, Value>) -> Result<Self, ValidationError> {
        let params = Self {
            value: parse_value(payload.get("value"))?,
            data: parse_data(payload.get("data"))?,
            gas_limit: parse_gas_limit(payload.get("gas_limit"))?,
        };

        if kind == OperationKind::Deploy && params.data.is_empty() {
            return Err(ValidationError::InvalidPayload {
                field: "data",
                reason: "DEPLOY requires contract init code".to_string(),
            });
        }
        Ok(params)
    }

    /// Unsigned request without nonce, gas price or gas limit.
    pub fn to_request(&self, kind: OperationKind, from: Address, to: Address) -> TransactionRequest {
        let request = TransactionRequest::default()
            .with_from(from)
            .with_value(self.value);

        if kind == OperationKind::Deploy {
            request.with_deploy_code(self.data.clone())
        } else {
            request.with_to(to).with_input(self.data.clone())
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidPayload {
        field,
        reason: reason.into(),
    }
}

fn parse_value(raw: Option<&Value>) -> Result<U256, ValidationError> {
    match raw {
        None | Some(Value::Null) => Ok(U256::ZERO),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| invalid("value", "must be a non-negative integer")),
        Some(Value::String(s)) => {
            let s = s.trim();
            let parsed = match s.strip_prefix("0x") {
                Some(hex_digits) => U256::from_str_radix(hex_digits, 16),
                None => U256::from_str_radix(s, 10),
            };
            parsed.map_err(|e| invalid("value", e.to_string()))
        }
        Some(_) => Err(invalid("value", "must be a string or integer")),
    }
}

fn parse_data(raw: Option<&Value>) -> Result<Bytes, ValidationError> {
    match raw {
        None | Some(Value::Null) => Ok(Bytes::new()),
        Some(Value::String(s)) if s.is_empty() || s == "0x" => Ok(Bytes::new()),
        Some(Value::String(s)) => hex::decode(s)
            .map(Bytes::from)
            .map_err(|e| invalid("data", e.to_string())),
        Some(_) => Err(invalid("data", "must be a hex string")),
    }
}

fn parse_gas_limit(raw: Option<&Value>) -> Result<Option<u64>, ValidationError> {
    let limit = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        Some(_) => None,
    };
    match limit {
        Some(0) => Err(invalid("gas_limit", "must be greater than 0")),
        Some(limit) => Ok(Some(limit)),
        None => Err(invalid("gas_limit", "must be a positive integer")),
    }
}
