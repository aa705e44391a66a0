//! Wire protocol between the page context, the background context, and the
//! approval UI.
//!
//! Every envelope is a closed tagged union keyed by a `type` discriminator
//! and validated by serde at the boundary; a message that does not parse
//! into one of these shapes is rejected before any dispatch logic runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;

/// A typed request forwarded from the page context toward the background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DappRequest {
    pub request_id: String,
    /// Chain the request targets, when the page supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(flatten)]
    pub payload: DappRequestPayload,
}

impl DappRequest {
    /// Build a request with a fresh id, for callers originating requests
    /// themselves rather than relaying a page's.
    pub fn new(chain_id: Option<u64>, payload: DappRequestPayload) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            chain_id,
            payload,
        }
    }
}

/// The request kinds the bridge understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DappRequestPayload {
    GetAccount,
    GetChainId,
    RequestAccount,
    #[serde(rename_all = "camelCase")]
    SendTransaction { transaction: Value },
    #[serde(rename_all = "camelCase")]
    SignMessage { message_hex: String, address: String },
    #[serde(rename_all = "camelCase")]
    SignTypedData { typed_data: Value, address: String },
    #[serde(rename_all = "camelCase")]
    ChangeChain { chain_id: String },
    GetPermissions,
    #[serde(rename_all = "camelCase")]
    RequestPermissions { permissions: Value },
    #[serde(rename_all = "camelCase")]
    RevokePermissions { permissions: Value },
    #[serde(rename_all = "camelCase")]
    GetCapabilities { chain_ids: Vec<String> },
    OpenSidebar,
}

impl DappRequestPayload {
    /// Whether this request kind needs the approval surface on screen.
    pub fn is_interactive(&self) -> bool {
        matches!(
            self,
            Self::RequestAccount
                | Self::SendTransaction { .. }
                | Self::SignMessage { .. }
                | Self::SignTypedData { .. }
                | Self::RequestPermissions { .. }
                | Self::OpenSidebar
        )
    }

    /// Whether the background may answer this kind itself when no approval
    /// surface is connected.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            Self::ChangeChain { .. }
                | Self::RevokePermissions { .. }
                | Self::GetCapabilities { .. }
        )
    }

    /// The response kind a well-behaved responder produces for this request.
    pub fn expected_response(&self) -> ResponseKind {
        match self {
            Self::GetAccount | Self::RequestAccount => ResponseKind::Account,
            Self::GetChainId => ResponseKind::ChainId,
            Self::SendTransaction { .. } => ResponseKind::Transaction,
            Self::SignMessage { .. } => ResponseKind::SignedMessage,
            Self::SignTypedData { .. } => ResponseKind::SignedTypedData,
            Self::ChangeChain { .. } => ResponseKind::ChainChanged,
            Self::GetPermissions
            | Self::RequestPermissions { .. }
            | Self::RevokePermissions { .. } => ResponseKind::Permissions,
            Self::GetCapabilities { .. } => ResponseKind::Capabilities,
            Self::OpenSidebar => ResponseKind::SidebarOpened,
        }
    }
}

/// A typed response travelling back toward the originating page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DappResponse {
    pub request_id: String,
    #[serde(flatten)]
    pub payload: DappResponsePayload,
}

/// The response kinds, one success shape per request kind plus the shared
/// error envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DappResponsePayload {
    #[serde(rename_all = "camelCase")]
    Account { accounts: Vec<String> },
    #[serde(rename_all = "camelCase")]
    ChainId { chain_id: String },
    #[serde(rename_all = "camelCase")]
    Transaction { transaction_hash: String },
    #[serde(rename_all = "camelCase")]
    SignedMessage { signature: String },
    #[serde(rename_all = "camelCase")]
    SignedTypedData { signature: String },
    #[serde(rename_all = "camelCase")]
    ChainChanged {
        chain_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        provider_url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Permissions { permissions: Value },
    #[serde(rename_all = "camelCase")]
    Capabilities { capabilities: Value },
    SidebarOpened,
    /// Raw provider result for methods proxied straight to the node.
    #[serde(rename_all = "camelCase")]
    NodeResult { result: Value },
    #[serde(rename_all = "camelCase")]
    Error { error: RpcError },
}

impl DappResponsePayload {
    pub fn kind(&self) -> ResponseKind {
        match self {
            Self::Account { .. } => ResponseKind::Account,
            Self::ChainId { .. } => ResponseKind::ChainId,
            Self::Transaction { .. } => ResponseKind::Transaction,
            Self::SignedMessage { .. } => ResponseKind::SignedMessage,
            Self::SignedTypedData { .. } => ResponseKind::SignedTypedData,
            Self::ChainChanged { .. } => ResponseKind::ChainChanged,
            Self::Permissions { .. } => ResponseKind::Permissions,
            Self::Capabilities { .. } => ResponseKind::Capabilities,
            Self::SidebarOpened => ResponseKind::SidebarOpened,
            Self::NodeResult { .. } => ResponseKind::NodeResult,
            Self::Error { .. } => ResponseKind::Error,
        }
    }
}

/// Shape tag used to cross-check a response against the request it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Account,
    ChainId,
    Transaction,
    SignedMessage,
    SignedTypedData,
    ChainChanged,
    Permissions,
    Capabilities,
    SidebarOpened,
    NodeResult,
    Error,
}

/// Normalized record of the tab a request originated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderInfo {
    pub tab_id: u32,
    pub window_id: u32,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fav_icon_url: Option<String>,
}

/// Events the background pushes to connected UI contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UiEvent {
    /// The active tab or window changed; consumers re-query, no payload.
    ActiveContextChanged,
    /// Durable state has been migrated and loaded.
    StateReady,
    #[serde(rename_all = "camelCase")]
    DappRequestReceived {
        request: DappRequest,
        sender: SenderInfo,
        sidebar_was_closed: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_request_serializes_with_type_tag() {
        let request = DappRequest {
            request_id: "req-1".to_string(),
            chain_id: Some(1),
            payload: DappRequestPayload::SignMessage {
                message_hex: "0xdeadbeef".to_string(),
                address: "0xabc".to_string(),
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "requestId": "req-1",
                "chainId": 1,
                "type": "signMessage",
                "messageHex": "0xdeadbeef",
                "address": "0xabc",
            })
        );
    }

    #[test]
    fn test_unknown_type_tag_is_rejected() {
        let raw = json!({ "requestId": "req-1", "type": "mintCoins" });
        assert!(serde_json::from_value::<DappRequest>(raw).is_err());
    }

    #[test]
    fn test_error_response_round_trips() {
        let response = DappResponse {
            request_id: "req-2".to_string(),
            payload: DappResponsePayload::Error {
                error: RpcError::unauthorized(),
            },
        };
        let json = serde_json::to_string(&response).unwrap();
        let back: DappResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, response);
        assert_eq!(back.payload.kind(), ResponseKind::Error);
    }

    #[test]
    fn test_interactive_and_silent_sets_are_disjoint() {
        let payloads = [
            DappRequestPayload::GetAccount,
            DappRequestPayload::GetChainId,
            DappRequestPayload::RequestAccount,
            DappRequestPayload::SendTransaction {
                transaction: json!({}),
            },
            DappRequestPayload::SignMessage {
                message_hex: String::new(),
                address: String::new(),
            },
            DappRequestPayload::SignTypedData {
                typed_data: json!({}),
                address: String::new(),
            },
            DappRequestPayload::ChangeChain {
                chain_id: "0x1".to_string(),
            },
            DappRequestPayload::GetPermissions,
            DappRequestPayload::RequestPermissions {
                permissions: json!({}),
            },
            DappRequestPayload::RevokePermissions {
                permissions: json!({}),
            },
            DappRequestPayload::GetCapabilities { chain_ids: vec![] },
            DappRequestPayload::OpenSidebar,
        ];
        for payload in payloads {
            assert!(
                !(payload.is_interactive() && payload.is_silent()),
                "{payload:?} is both interactive and silent"
            );
        }
    }

    #[test]
    fn test_expected_response_matches_success_kind() {
        let payload = DappRequestPayload::SendTransaction {
            transaction: json!({ "to": "0xabc" }),
        };
        let success = DappResponsePayload::Transaction {
            transaction_hash: "0x123".to_string(),
        };
        assert_eq!(payload.expected_response(), success.kind());
    }
}
