//! Wire message model for the EPOS protocol
//!
//! Requests come from the till, responses go back to it. Two response
//! families share one shape: terminal replies (the final answer to a
//! request) and callback prompts (interim messages emitted while a
//! transaction is in progress).

use serde::{Deserialize, Serialize};

// =============================================================================
// Requests
// =============================================================================

/// Operation requested by the EPOS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    Sale,
    Refund,
    Reversal,
    Status,
    Batch,
    Reconcile,
    Continue,
    Last,
    Test,
    Update,
    /// Answer to the currently outstanding callback prompt
    Response,
    #[serde(rename = "closeConnection")]
    CloseConnection,
}

/// One framed message from the EPOS
///
/// Parsed from a single frame, consumed once. `value` carries the reply
/// payload for `Response`-kind requests; money operations use `amount`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub kind: RequestKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(
        default,
        rename = "referenceTransactionId",
        skip_serializing_if = "Option::is_none"
    )]
    pub reference_transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Set by the till when this may be a resubmission after an uncertain
    /// outcome (dead socket, terminal timeout). Triggers the recovery check.
    #[serde(default)]
    pub retry: bool,
}

impl Request {
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            amount: None,
            reference_transaction_id: None,
            value: None,
            retry: false,
        }
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Gateway-originated message
///
/// `kind` is "success", "error" or a callback prompt name such as
/// "askForSignature". Field order is fixed so encoding is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(
        default,
        rename = "minLength",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_length: Option<usize>,
    #[serde(
        default,
        rename = "maxLength",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

impl Response {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            prompt: None,
            status: None,
            value: None,
            min_length: None,
            max_length: None,
            values: None,
        }
    }

    pub fn success() -> Self {
        Self::new("success")
    }

    /// Error response with a human-readable prompt
    pub fn error(prompt: impl Into<String>) -> Self {
        let mut resp = Self::new("error");
        resp.prompt = Some(prompt.into());
        resp
    }

    /// Error response carrying a machine-readable status code
    pub fn error_with_status(prompt: impl Into<String>, status: impl Into<String>) -> Self {
        let mut resp = Self::error(prompt);
        resp.status = Some(status.into());
        resp
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.kind == "success"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_kind_wire_names() {
        let sale: Request = serde_json::from_str(r#"{"type":"Sale","amount":"10.00"}"#).unwrap();
        assert_eq!(sale.kind, RequestKind::Sale);
        assert_eq!(sale.amount.as_deref(), Some("10.00"));
        assert!(!sale.retry);

        let close: Request = serde_json::from_str(r#"{"type":"closeConnection"}"#).unwrap();
        assert_eq!(close.kind, RequestKind::CloseConnection);
    }

    #[test]
    fn test_reversal_reference_field() {
        let req: Request = serde_json::from_str(
            r#"{"type":"Reversal","amount":"5.00","referenceTransactionId":"42"}"#,
        )
        .unwrap();
        assert_eq!(req.kind, RequestKind::Reversal);
        assert_eq!(req.reference_transaction_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_retry_flag_parsed() {
        let req: Request =
            serde_json::from_str(r#"{"type":"Sale","amount":"1.00","retry":true}"#).unwrap();
        assert!(req.retry);
    }

    #[test]
    fn test_response_skips_empty_fields() {
        let json = serde_json::to_string(&Response::success()).unwrap();
        assert_eq!(json, r#"{"type":"success"}"#);
    }

    #[test]
    fn test_response_field_order_is_stable() {
        let resp = Response::error_with_status("Declined.", "RESULT_TRANS_REFUSED");
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(
            json,
            r#"{"type":"error","prompt":"Declined.","status":"RESULT_TRANS_REFUSED"}"#
        );
    }

    #[test]
    fn test_prompt_response_constraints() {
        let mut resp = Response::new("getAuthorizationCode").with_prompt("Enter code");
        resp.min_length = Some(4);
        resp.max_length = Some(8);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""minLength":4"#));
        assert!(json.contains(r#""maxLength":8"#));
    }
}
