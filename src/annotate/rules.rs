//! Offline transaction classifier, used when no model can annotate.

use serde_json::json;

use super::AnnotationResult;
use crate::amount::Wei;
use crate::explorer::{rfc3339, ExplorerTransaction};
use crate::{Error, Result};

const RULE_CONFIDENCE: f64 = 0.7;

/// Classify `tx` from its value and contract address alone.
///
/// Fails when `value` is not a base-10 integer or `timeStamp` is not an
/// integer within the RFC 3339 range.
pub fn parse_transaction(tx: &ExplorerTransaction) -> Result<AnnotationResult> {
    let wei: Wei = tx.value.parse().map_err(|e: Error| Error::Item {
        hash: tx.hash.clone(),
        message: e.to_string(),
    })?;
    let time = rfc3339(tx.timestamp()?)?;

    let (action, token) = if tx.is_contract_creation() {
        ("contract_interaction", "Contract")
    } else if !wei.is_zero() {
        ("transfer", "ETH")
    } else {
        ("unknown", "ETH")
    };

    let amount = if wei.is_zero() {
        "0".to_string()
    } else {
        wei.to_ether()?.to_string()
    };

    let fields = json!({
        "action": action,
        "token": token,
        "amount": amount,
        "time": time,
        "confidence": RULE_CONFIDENCE,
        "description": format!("EN: {action} transaction | CN: {action} 交易"),
        "risk_level": "medium",
        "gas_used": tx.gas_used,
        "gas_price": tx.gas_price,
    });
    Ok(serde_json::from_value(fields)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(value: &str, contract: &str) -> ExplorerTransaction {
        ExplorerTransaction {
            hash: "0x1".into(),
            value: value.into(),
            contract_address: contract.into(),
            time_stamp: "1642234567".into(),
            gas_used: "21000".into(),
            gas_price: "20000000000".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_plain_transfer() {
        let result = parse_transaction(&tx("2000000000000000000", "")).unwrap();
        assert_eq!(result.get_str("action"), Some("transfer"));
        assert_eq!(result.get_str("token"), Some("ETH"));
        assert_eq!(result.get_str("amount"), Some("2.0"));
        assert_eq!(result.get_str("time"), Some("2022-01-15T08:16:07Z"));
        assert_eq!(result.get("confidence"), Some(&json!(0.7)));
        assert_eq!(result.get_str("gas_used"), Some("21000"));
        assert_eq!(
            result.get_str("description"),
            Some("EN: transfer transaction | CN: transfer 交易")
        );
    }

    #[test]
    fn test_contract_creation() {
        let result = parse_transaction(&tx("0", "0xcontract")).unwrap();
        assert_eq!(result.get_str("action"), Some("contract_interaction"));
        assert_eq!(result.get_str("token"), Some("Contract"));
        assert_eq!(result.get_str("amount"), Some("0"));
    }

    #[test]
    fn test_zero_value_call() {
        let result = parse_transaction(&tx("0", "")).unwrap();
        assert_eq!(result.get_str("action"), Some("unknown"));
        assert_eq!(result.get_str("token"), Some("ETH"));
    }

    #[test]
    fn test_invalid_value_is_item_error() {
        match parse_transaction(&tx("not-a-number", "")) {
            Err(Error::Item { hash, .. }) => assert_eq!(hash, "0x1"),
            other => panic!("expected item error, got {:?}", other),
        }
    }
}
