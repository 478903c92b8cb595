//! Defensive normalization of CardServ response bodies.
//!
//! The provider's response shapes are not stable: the state and redirect URL
//! fields move between top-level and nested locations depending on the
//! endpoint and transaction phase, and during 3-D-Secure the body is
//! sometimes redirect HTML rather than JSON. Everything here tolerates that:
//! an unparseable 2xx body normalizes to a PROCESSING state carrying the raw
//! text, never an error.

use crate::PaymentState;
use serde_json::{json, Value};

/// Parse a response body as JSON; on failure, wrap the raw text in a
/// synthetic PROCESSING envelope. The transport already returned success, so
/// the sale is assumed accepted and the sweep/webhook paths will settle it.
pub fn parse_body_fail_open(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v) => v,
        Err(_) => json!({ "orderState": "PROCESSING", "raw": raw }),
    }
}

/// Extract the order state. A missing state field is treated as PROCESSING
/// (fail-open, same reasoning as unparseable bodies).
pub fn extract_state(v: &Value) -> PaymentState {
    const CANDIDATES: &[&str] = &["/orderState", "/order/orderState", "/state"];
    for ptr in CANDIDATES {
        if let Some(s) = v.pointer(ptr).and_then(Value::as_str) {
            return PaymentState::parse(s);
        }
    }
    PaymentState::Processing
}

/// Extract the 3-D-Secure redirect URL from any of its known locations.
pub fn extract_redirect_url(v: &Value) -> Option<String> {
    const CANDIDATES: &[&str] = &[
        "/redirectUrl",
        "/redirect_url",
        "/order/redirectUrl",
        "/urls/redirectUrl",
        "/threeDSecure/redirectUrl",
    ];
    for ptr in CANDIDATES {
        if let Some(s) = v.pointer(ptr).and_then(Value::as_str) {
            if !s.trim().is_empty() {
                return Some(s.to_string());
            }
        }
    }
    None
}

/// Extract the gateway-assigned system reference. Webhook callbacks and
/// status responses disagree on where it lives.
pub fn extract_system_ref(v: &Value) -> Option<String> {
    const CANDIDATES: &[&str] = &["/order/orderSystemId", "/orderSystemId", "/orderId"];
    for ptr in CANDIDATES {
        if let Some(s) = v.pointer(ptr).and_then(Value::as_str) {
            let t = s.trim();
            if !t.is_empty() {
                return Some(t.to_string());
            }
        }
    }
    None
}

/// Extract the merchant reference echoed back by the provider, if any.
pub fn extract_merchant_ref(v: &Value) -> Option<String> {
    const CANDIDATES: &[&str] = &["/order/orderMerchantId", "/orderMerchantId"];
    for ptr in CANDIDATES {
        if let Some(s) = v.pointer(ptr).and_then(Value::as_str) {
            let t = s.trim();
            if !t.is_empty() {
                return Some(t.to_string());
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn html_body_fail_opens_to_processing() {
        let v = parse_body_fail_open("<html><body>3DS interstitial</body></html>");
        assert_eq!(extract_state(&v), PaymentState::Processing);
        assert!(v["raw"].as_str().unwrap().contains("interstitial"));
    }

    #[test]
    fn json_body_parses_normally() {
        let v = parse_body_fail_open(r#"{"orderState":"APPROVED"}"#);
        assert_eq!(extract_state(&v), PaymentState::Approved);
    }

    #[test]
    fn missing_state_defaults_to_processing() {
        assert_eq!(
            extract_state(&json!({"something":"else"})),
            PaymentState::Processing
        );
    }

    #[test]
    fn nested_state_is_found() {
        let v = json!({"order": {"orderState": "DECLINED"}});
        assert_eq!(extract_state(&v), PaymentState::Declined);
    }

    #[test]
    fn unknown_state_is_preserved_as_other() {
        let v = json!({"orderState": "CHARGEBACK"});
        assert_eq!(
            extract_state(&v),
            PaymentState::Other("CHARGEBACK".to_string())
        );
    }

    #[test]
    fn redirect_url_found_in_any_location() {
        let shapes = [
            json!({"redirectUrl": "https://3ds.example/a"}),
            json!({"redirect_url": "https://3ds.example/a"}),
            json!({"order": {"redirectUrl": "https://3ds.example/a"}}),
            json!({"urls": {"redirectUrl": "https://3ds.example/a"}}),
            json!({"threeDSecure": {"redirectUrl": "https://3ds.example/a"}}),
        ];
        for v in &shapes {
            assert_eq!(
                extract_redirect_url(v).as_deref(),
                Some("https://3ds.example/a"),
                "shape {v}"
            );
        }
        assert_eq!(extract_redirect_url(&json!({"redirectUrl": ""})), None);
        assert_eq!(extract_redirect_url(&json!({})), None);
    }

    #[test]
    fn system_ref_lookup_order() {
        // Nested order object wins over top-level.
        let v = json!({"order": {"orderSystemId": "sys-1"}, "orderSystemId": "sys-2"});
        assert_eq!(extract_system_ref(&v).as_deref(), Some("sys-1"));
        // Fallback chain.
        assert_eq!(
            extract_system_ref(&json!({"orderId": "sys-3"})).as_deref(),
            Some("sys-3")
        );
        assert_eq!(extract_system_ref(&json!({"orderSystemId": "  "})), None);
    }
}
