//! JSON-RPC request/response envelopes (C6).
//!
//! Both shapes are `{id, method, ...}`, but responses use `result` for every
//! method except `control/init`, which uses `params` for historical reasons
//! (it mirrors the shape of the request it answers).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An inbound JSON-RPC request.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(default = "default_params")]
    pub params: Value,
}

fn default_params() -> Value {
    Value::Object(serde_json::Map::new())
}

/// An outbound JSON-RPC response.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub id: u64,
    pub method: String,
    #[serde(flatten)]
    pub body: ResponseBody,
}

/// The two response-body shapes found on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    /// Every method except `control/init`.
    Result { result: Value },
    /// `control/init` alone.
    Params { params: Value },
}

impl Response {
    pub fn result(id: u64, method: impl Into<String>, result: Value) -> Self {
        Self {
            id,
            method: method.into(),
            body: ResponseBody::Result { result },
        }
    }

    pub fn params(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            body: ResponseBody::Params { params },
        }
    }

    /// A `control/error` response carrying a `reason` string.
    pub fn error(id: u64, reason: impl Into<String>) -> Self {
        Self::result(id, "control/error", serde_json::json!({ "reason": reason.into() }))
    }
}
