//! Page-context method handler.
//!
//! This is the pump between the raw window messages a page posts and the
//! typed bridge protocol. Each inbound request is validated, classified,
//! and then either answered on the spot (provider-direct reads, local
//! state queries, rejections) or registered with the correlator and
//! forwarded toward the background for approval. Responses come back
//! through [`MethodHandler::deliver_response`], which resolves the
//! correlator exactly once and posts to the originating source.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bridge::correlator::Correlator;
use crate::error::{DeliveryError, RpcError};
use crate::messages::{
    DappRequest, DappRequestPayload, DappResponse, DappResponsePayload, ResponseKind,
};
use crate::rpc::{self, MethodCategory};

/// Raw request shape a page posts at the window boundary.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowRequest {
    pub request_id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC provider the page context proxies read-only methods to.
#[async_trait]
pub trait ProviderPort: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

/// Where responses for one originating source are posted (a frame port in
/// the real host, a recording sink in tests).
pub trait ResponseSink: Send + Sync {
    fn post(&self, response: DappResponse) -> Result<(), DeliveryError>;
}

/// The per-tab method handler.
pub struct MethodHandler {
    correlator: Correlator<Arc<dyn ResponseSink>>,
    provider: Arc<dyn ProviderPort>,
    /// Channel toward the background dispatcher.
    outbound: mpsc::Sender<DappRequest>,
    /// Accounts the page is currently connected to.
    accounts: Vec<String>,
    chain_id: u64,
}

impl MethodHandler {
    pub fn new(
        provider: Arc<dyn ProviderPort>,
        outbound: mpsc::Sender<DappRequest>,
        chain_id: u64,
    ) -> Self {
        Self {
            correlator: Correlator::new(),
            provider,
            outbound,
            accounts: Vec::new(),
            chain_id,
        }
    }

    /// Handle one raw window message.
    pub async fn handle(&mut self, raw: Value, source: Arc<dyn ResponseSink>) {
        let request = match serde_json::from_value::<WindowRequest>(raw.clone()) {
            Ok(request) if !request.method.is_empty() => request,
            Ok(request) => {
                self.post_error(
                    &source,
                    &request.request_id,
                    RpcError::parse_failure("'method' must be a non-empty string"),
                );
                return;
            }
            Err(e) => {
                // Without a request id there is nothing to address the
                // error to; try to salvage one from the raw value.
                match raw.get("requestId").and_then(Value::as_str) {
                    Some(request_id) => {
                        self.post_error(
                            &source,
                            request_id,
                            RpcError::parse_failure(format!("malformed request: {e}")),
                        );
                    }
                    None => warn!("dropping unaddressable window message: {e}"),
                }
                return;
            }
        };

        match rpc::classify(&request.method) {
            MethodCategory::ProviderDirect => self.proxy_to_provider(request, source).await,
            MethodCategory::Deprecated => {
                self.post_error(
                    &source,
                    &request.request_id,
                    RpcError::deprecated_method(&request.method),
                );
            }
            MethodCategory::Unsupported => {
                self.post_error(
                    &source,
                    &request.request_id,
                    RpcError::unsupported_method(&request.method),
                );
            }
            MethodCategory::WalletSpecific | MethodCategory::Standard => {
                self.handle_wallet_method(request, source).await;
            }
        }
    }

    /// Resolve a response coming back from the background and post it to
    /// the source that asked. Unknown or already-answered ids are dropped.
    pub fn deliver_response(&mut self, response: DappResponse) {
        let kind = response.payload.kind();
        let Some(info) = self.correlator.resolve(&response.request_id, kind) else {
            debug!(
                request_id = response.request_id,
                "ignoring response with no pending request"
            );
            return;
        };

        // Track connection state the page will ask about later.
        match &response.payload {
            DappResponsePayload::Account { accounts } => {
                self.accounts = accounts.clone();
            }
            DappResponsePayload::ChainChanged { chain_id, .. } => {
                if let Some(chain_id) = parse_hex_chain_id(chain_id) {
                    self.chain_id = chain_id;
                }
            }
            _ => {}
        }

        if let Err(e) = info.source.post(response) {
            warn!("failed to post response to originating source: {e}");
        }
    }

    /// Drop pending requests whose originating source the predicate
    /// rejects, e.g. after a frame navigated away.
    pub fn sweep_sources<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Arc<dyn ResponseSink>) -> bool,
    {
        self.correlator.sweep(|_, info| keep(&info.source));
    }

    pub fn pending_count(&self) -> usize {
        self.correlator.len()
    }

    async fn proxy_to_provider(&mut self, request: WindowRequest, source: Arc<dyn ResponseSink>) {
        let payload = match self.provider.request(&request.method, request.params).await {
            Ok(result) => DappResponsePayload::NodeResult { result },
            Err(error) => DappResponsePayload::Error { error },
        };
        self.post(
            &source,
            DappResponse {
                request_id: request.request_id,
                payload,
            },
        );
    }

    async fn handle_wallet_method(&mut self, request: WindowRequest, source: Arc<dyn ResponseSink>) {
        // Local state the page context can answer without the background.
        match request.method.as_str() {
            "eth_chainId" => {
                self.post(
                    &source,
                    DappResponse {
                        request_id: request.request_id,
                        payload: DappResponsePayload::ChainId {
                            chain_id: format!("0x{:x}", self.chain_id),
                        },
                    },
                );
                return;
            }
            "eth_accounts" => {
                self.post(
                    &source,
                    DappResponse {
                        request_id: request.request_id,
                        payload: DappResponsePayload::Account {
                            accounts: self.accounts.clone(),
                        },
                    },
                );
                return;
            }
            _ => {}
        }

        let payload = match payload_for(&request.method, &request.params) {
            Ok(payload) => payload,
            Err(error) => {
                self.post_error(&source, &request.request_id, error);
                return;
            }
        };

        if requires_connected_account(&request.method) && self.accounts.is_empty() {
            self.post_error(&source, &request.request_id, RpcError::unauthorized());
            return;
        }

        let expected = payload.expected_response();
        let forwarded = DappRequest {
            request_id: request.request_id.clone(),
            chain_id: Some(self.chain_id),
            payload,
        };
        self.correlator
            .register(request.request_id.clone(), source.clone(), expected);
        if let Err(e) = self.outbound.send(forwarded).await {
            // Take the registration back; nothing will ever answer it.
            self.correlator.resolve(&request.request_id, ResponseKind::Error);
            self.post_error(
                &source,
                &request.request_id,
                RpcError::internal(format!("background channel closed: {e}")),
            );
        }
    }

    fn post_error(&self, source: &Arc<dyn ResponseSink>, request_id: &str, error: RpcError) {
        self.post(
            source,
            DappResponse {
                request_id: request_id.to_string(),
                payload: DappResponsePayload::Error { error },
            },
        );
    }

    fn post(&self, source: &Arc<dyn ResponseSink>, response: DappResponse) {
        if let Err(e) = source.post(response) {
            warn!("failed to post to originating source: {e}");
        }
    }
}

/// Whether a method is only meaningful with a connected account.
fn requires_connected_account(method: &str) -> bool {
    matches!(
        method,
        "eth_sendTransaction" | "personal_sign" | "eth_signTypedData_v4"
    )
}

/// Map a supported method plus its positional params onto the typed
/// request payload. Unrecognized standard methods and malformed params
/// both come back as errors for the caller to post.
fn payload_for(method: &str, params: &Value) -> Result<DappRequestPayload, RpcError> {
    match method {
        "eth_requestAccounts" => Ok(DappRequestPayload::RequestAccount),
        "eth_sendTransaction" => Ok(DappRequestPayload::SendTransaction {
            transaction: param(params, 0, method)?.clone(),
        }),
        "personal_sign" => Ok(DappRequestPayload::SignMessage {
            message_hex: string_param(params, 0, method)?,
            address: string_param(params, 1, method)?,
        }),
        "eth_signTypedData_v4" => {
            let address = string_param(params, 0, method)?;
            let raw = string_param(params, 1, method)?;
            let typed_data = serde_json::from_str(&raw).map_err(|e| {
                RpcError::parse_failure(format!("typed data is not valid JSON: {e}"))
            })?;
            Ok(DappRequestPayload::SignTypedData {
                typed_data,
                address,
            })
        }
        "wallet_switchEthereumChain" => {
            let chain_id = param(params, 0, method)?
                .get("chainId")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    RpcError::parse_failure("wallet_switchEthereumChain needs a chainId string")
                })?;
            Ok(DappRequestPayload::ChangeChain {
                chain_id: chain_id.to_string(),
            })
        }
        "wallet_getPermissions" => Ok(DappRequestPayload::GetPermissions),
        "wallet_requestPermissions" => Ok(DappRequestPayload::RequestPermissions {
            permissions: param(params, 0, method)?.clone(),
        }),
        "wallet_revokePermissions" => Ok(DappRequestPayload::RevokePermissions {
            permissions: param(params, 0, method)?.clone(),
        }),
        "wallet_getCapabilities" => {
            let chain_ids = params
                .get(1)
                .and_then(Value::as_array)
                .map(|ids| {
                    ids.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            Ok(DappRequestPayload::GetCapabilities { chain_ids })
        }
        "wallet_openSidebar" => Ok(DappRequestPayload::OpenSidebar),
        other => Err(RpcError::unsupported_method(other)),
    }
}

fn param<'a>(params: &'a Value, index: usize, method: &str) -> Result<&'a Value, RpcError> {
    params.get(index).ok_or_else(|| {
        RpcError::parse_failure(format!("{method} needs a param at position {index}"))
    })
}

fn string_param(params: &Value, index: usize, method: &str) -> Result<String, RpcError> {
    param(params, index, method)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| {
            RpcError::parse_failure(format!("{method} param {index} must be a string"))
        })
}

/// Parse a `0x`-prefixed hex chain id.
pub fn parse_hex_chain_id(chain_id: &str) -> Option<u64> {
    let digits = chain_id.strip_prefix("0x")?;
    u64::from_str_radix(digits, 16).ok()
}
