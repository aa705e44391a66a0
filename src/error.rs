//! Error types for the wallet bridge.
//!
//! Two families live here. `BridgeError` and its sub-errors are the
//! library's own taxonomy: they surface through `Result` and never cross
//! the wire. `RpcError` is the serialized error object delivered back to
//! a dApp inside the response envelope; its codes are stable and follow
//! the EIP-1193 / JSON-RPC conventions dApps already understand.

use serde::{Deserialize, Serialize};

/// Top-level error type for the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors from the durable storage adapter.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to serialize persisted state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors from cross-context message delivery.
///
/// `NotListening` is an expected condition (a UI panel that is simply
/// closed); callers broadcasting to the UI swallow it rather than
/// propagating.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Destination context is not listening")]
    NotListening,

    #[error("Destination tab {0} is gone")]
    TabGone(u32),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

/// Errors from ledger bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("No ledger entry for request {0}")]
    UnknownRequest(String),
}

/// Serialized error object delivered to the dApp through the response
/// envelope. Codes are stable; messages are advisory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    /// EIP-1193 4100: the requested account/method is not authorized.
    pub fn unauthorized() -> Self {
        Self {
            code: 4100,
            message: "The requested account and/or method has not been authorized by the user"
                .to_string(),
        }
    }

    /// EIP-1193 4200: the method is not supported, naming the method.
    pub fn unsupported_method(method: &str) -> Self {
        Self {
            code: 4200,
            message: format!("The wallet does not support the method '{method}'"),
        }
    }

    /// EIP-1193 4200 for a method that was once supported.
    pub fn deprecated_method(method: &str) -> Self {
        Self {
            code: 4200,
            message: format!("The method '{method}' is deprecated and no longer supported"),
        }
    }

    /// EIP-3326 4902: the requested chain is not recognized.
    pub fn unrecognized_chain(chain_id: &str) -> Self {
        Self {
            code: 4902,
            message: format!("The wallet does not support switching to chain '{chain_id}'"),
        }
    }

    /// JSON-RPC -32700: the request could not be parsed.
    pub fn parse_failure(detail: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: detail.into(),
        }
    }

    /// JSON-RPC -32601: method not found.
    pub fn method_not_found() -> Self {
        Self {
            code: -32601,
            message: "Method not found".to_string(),
        }
    }

    /// JSON-RPC -32603: internal error.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            code: -32603,
            message: detail.into(),
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for RpcError {}
