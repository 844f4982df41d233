//! Inbound provider callbacks: verification, parsing and the provider's own
//! acknowledgement envelope.

use reqwest::header::HeaderMap;
use serde_json::Value;

use checkout_types::{CallbackError, CallbackEvent};

/// How reconciliation treated a callback. Only `InvalidSignature` and
/// `Failed` are answered with an error; everything else is acknowledged so
/// the provider stops retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Applied,
    /// Order already in that state, or terminal.
    Duplicate,
    /// No order matches the reference.
    UnknownReference,
    /// Signal did not apply (still pending, or conflicting with a paid order).
    Ignored,
    InvalidSignature,
    /// Authentic but unparsable, or without an order reference.
    Malformed,
    /// Internal failure; the provider should retry.
    Failed,
}

impl Ack {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Ack::Applied | Ack::Duplicate | Ack::UnknownReference | Ack::Ignored | Ack::Malformed
        )
    }
}

impl From<&CallbackError> for Ack {
    fn from(err: &CallbackError) -> Self {
        match err {
            CallbackError::InvalidSignature => Ack::InvalidSignature,
            CallbackError::Malformed(_) | CallbackError::MissingReference => Ack::Malformed,
        }
    }
}

/// HTTP status and JSON body to send back to the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackReply {
    pub status: u16,
    pub body: Value,
}

impl CallbackReply {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }
}

/// A raw inbound callback request.
#[derive(Debug, Clone, Copy)]
pub struct InboundCallback<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
}

impl<'a> InboundCallback<'a> {
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn require_header(&self, name: &str) -> Result<&'a str, CallbackError> {
        self.header(name).ok_or(CallbackError::InvalidSignature)
    }

    /// Token from an `Authorization: Bearer ...` header.
    pub fn bearer_token(&self) -> Option<&'a str> {
        self.header("authorization")
            .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
            .map(str::trim)
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, CallbackError> {
        serde_json::from_slice(self.body).map_err(|e| CallbackError::Malformed(e.to_string()))
    }
}

/// Per-provider callback contract, registered alongside the gateway.
pub trait WebhookProtocol: Send + Sync + 'static {
    fn gateway(&self) -> &str;

    /// Verifies authenticity first, then parses. A signature failure never
    /// reveals which part mismatched.
    fn parse_callback(&self, callback: &InboundCallback<'_>) -> Result<CallbackEvent, CallbackError>;

    fn acknowledge(&self, ack: Ack) -> CallbackReply;
}

/// `{"status":"ok"}` style replies shared by several providers.
pub fn simple_reply(ack: Ack) -> CallbackReply {
    match ack {
        a if a.is_success() => CallbackReply::ok(serde_json::json!({ "status": "ok" })),
        Ack::InvalidSignature => {
            CallbackReply::new(401, serde_json::json!({ "status": "error", "message": "invalid signature" }))
        }
        _ => CallbackReply::new(500, serde_json::json!({ "status": "error", "message": "retry later" })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def"));
        let cb = InboundCallback {
            method: "POST",
            path: "/webhooks/BRI_DIRECT",
            headers: &headers,
            body: b"{}",
        };
        assert_eq!(cb.bearer_token(), Some("abc.def"));
        assert!(cb.require_header("x-signature").is_err());
    }

    #[test]
    fn test_simple_reply_codes() {
        assert_eq!(simple_reply(Ack::UnknownReference).status, 200);
        assert_eq!(simple_reply(Ack::Malformed).status, 200);
        assert_eq!(simple_reply(Ack::InvalidSignature).status, 401);
        assert_eq!(simple_reply(Ack::Failed).status, 500);
    }
}
