//! Background dispatcher for inbound dApp requests.
//!
//! The approval surface is a per-window UI panel that connects and
//! disconnects as the user opens and closes it. Interactive requests that
//! arrive while the panel for their window is closed are queued and
//! flushed in arrival order on connect; silent request types are answered
//! by the background itself so closing the panel never blocks them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::bridge::handler::parse_hex_chain_id;
use crate::config::BridgeConfig;
use crate::error::RpcError;
use crate::ledger::DappRequestLedger;
use crate::messages::{
    DappRequest, DappRequestPayload, DappResponse, DappResponsePayload, SenderInfo, UiEvent,
};
use crate::platform::MessagingPort;

/// What the dispatcher did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered to a connected approval surface.
    Forwarded,
    /// No surface connected for the window; held for the next connect.
    Queued,
    /// Answered by the background without user interaction.
    AnsweredSilently,
}

/// Routes requests between tabs and per-window approval surfaces.
pub struct Dispatcher {
    messaging: Arc<dyn MessagingPort>,
    config: BridgeConfig,
    connected_windows: HashSet<u32>,
    queued: HashMap<u32, Vec<UiEvent>>,
}

impl Dispatcher {
    pub fn new(messaging: Arc<dyn MessagingPort>, config: BridgeConfig) -> Self {
        Self {
            messaging,
            config,
            connected_windows: HashSet::new(),
            queued: HashMap::new(),
        }
    }

    /// An approval surface connected for `window_id`: flush everything
    /// queued for that window, in arrival order.
    pub async fn on_ui_connected(&mut self, window_id: u32) {
        self.connected_windows.insert(window_id);
        let queued = self.queued.remove(&window_id).unwrap_or_default();
        debug!(window_id, flushed = queued.len(), "approval surface connected");
        for event in queued {
            if let Err(e) = self.messaging.send_to_ui(window_id, event).await {
                warn!(window_id, "failed to flush queued request: {e}");
            }
        }
    }

    pub fn on_ui_disconnected(&mut self, window_id: u32) {
        self.connected_windows.remove(&window_id);
    }

    pub fn is_connected(&self, window_id: u32) -> bool {
        self.connected_windows.contains(&window_id)
    }

    /// Number of requests held for a window with no connected surface.
    pub fn queued_count(&self, window_id: u32) -> usize {
        self.queued.get(&window_id).map_or(0, Vec::len)
    }

    /// Route one request from a tab.
    pub async fn dispatch(
        &mut self,
        request: DappRequest,
        sender: SenderInfo,
        ledger: &mut DappRequestLedger,
    ) -> DispatchOutcome {
        let surface_open = self.is_connected(sender.window_id);
        if request.payload.is_silent() && !surface_open {
            self.answer_silently(request, &sender).await;
            return DispatchOutcome::AnsweredSilently;
        }

        ledger.upsert(request.clone(), Some(sender.clone()));
        let window_id = sender.window_id;
        let event = UiEvent::DappRequestReceived {
            request,
            sender,
            sidebar_was_closed: !surface_open,
        };

        if surface_open {
            match self.messaging.send_to_ui(window_id, event.clone()).await {
                Ok(()) => DispatchOutcome::Forwarded,
                Err(e) => {
                    // The surface went away between connect and now; hold
                    // the event for the next connect.
                    debug!(window_id, "surface vanished, queueing request: {e}");
                    self.connected_windows.remove(&window_id);
                    self.queued.entry(window_id).or_default().push(event);
                    DispatchOutcome::Queued
                }
            }
        } else {
            self.queued.entry(window_id).or_default().push(event);
            DispatchOutcome::Queued
        }
    }

    /// Answer a silent request kind directly from the background.
    async fn answer_silently(&self, request: DappRequest, sender: &SenderInfo) {
        let payload = match &request.payload {
            DappRequestPayload::ChangeChain { chain_id } => match parse_hex_chain_id(chain_id) {
                Some(numeric) => DappResponsePayload::ChainChanged {
                    chain_id: chain_id.clone(),
                    provider_url: self.config.provider_urls.get(&numeric).cloned(),
                },
                None => DappResponsePayload::Error {
                    error: RpcError::unrecognized_chain(chain_id),
                },
            },
            DappRequestPayload::RevokePermissions { permissions } => {
                if permissions.get("eth_accounts").is_some() {
                    DappResponsePayload::Permissions {
                        permissions: json!([]),
                    }
                } else {
                    DappResponsePayload::Error {
                        error: RpcError::method_not_found(),
                    }
                }
            }
            DappRequestPayload::GetCapabilities { .. } => DappResponsePayload::Capabilities {
                capabilities: json!({}),
            },
            // Guarded by is_silent() in dispatch.
            other => {
                warn!(?other, "non-silent payload reached the silent path");
                DappResponsePayload::Error {
                    error: RpcError::internal("request cannot be answered silently"),
                }
            }
        };

        let response = DappResponse {
            request_id: request.request_id,
            payload,
        };
        if let Err(e) = self.messaging.send_to_tab(sender.tab_id, response).await {
            warn!(tab_id = sender.tab_id, "failed to answer silent request: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemoryBus;
    use pretty_assertions::assert_eq;

    fn sender(tab_id: u32, window_id: u32) -> SenderInfo {
        SenderInfo {
            tab_id,
            window_id,
            url: "https://app.example".to_string(),
            fav_icon_url: None,
        }
    }

    fn interactive(id: &str) -> DappRequest {
        DappRequest {
            request_id: id.to_string(),
            chain_id: Some(1),
            payload: DappRequestPayload::RequestAccount,
        }
    }

    fn change_chain(id: &str, chain_id: &str) -> DappRequest {
        DappRequest {
            request_id: id.to_string(),
            chain_id: Some(1),
            payload: DappRequestPayload::ChangeChain {
                chain_id: chain_id.to_string(),
            },
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<MemoryBus>) {
        let bus = Arc::new(MemoryBus::new());
        (
            Dispatcher::new(bus.clone(), BridgeConfig::default()),
            bus,
        )
    }

    #[tokio::test]
    async fn test_interactive_request_is_queued_until_connect() {
        let (mut dispatcher, bus) = dispatcher();
        let mut ledger = DappRequestLedger::new();

        let outcome = dispatcher
            .dispatch(interactive("req-1"), sender(4, 1), &mut ledger)
            .await;
        assert_eq!(outcome, DispatchOutcome::Queued);
        assert_eq!(dispatcher.queued_count(1), 1);
        assert!(ledger.get("req-1").is_some());
        assert!(bus.ui_events().await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_flushes_queue_in_arrival_order() {
        let (mut dispatcher, bus) = dispatcher();
        let mut ledger = DappRequestLedger::new();

        dispatcher
            .dispatch(interactive("req-1"), sender(4, 1), &mut ledger)
            .await;
        dispatcher
            .dispatch(interactive("req-2"), sender(4, 1), &mut ledger)
            .await;
        dispatcher.on_ui_connected(1).await;

        let events = bus.ui_events().await;
        let ids: Vec<String> = events
            .iter()
            .map(|(_, event)| match event {
                UiEvent::DappRequestReceived { request, .. } => request.request_id.clone(),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec!["req-1", "req-2"]);
        assert_eq!(dispatcher.queued_count(1), 0);
    }

    #[tokio::test]
    async fn test_connected_surface_gets_requests_directly() {
        let (mut dispatcher, bus) = dispatcher();
        let mut ledger = DappRequestLedger::new();
        dispatcher.on_ui_connected(1).await;

        let outcome = dispatcher
            .dispatch(interactive("req-1"), sender(4, 1), &mut ledger)
            .await;
        assert_eq!(outcome, DispatchOutcome::Forwarded);

        let events = bus.ui_events().await;
        assert_eq!(events.len(), 1);
        match &events[0].1 {
            UiEvent::DappRequestReceived {
                sidebar_was_closed, ..
            } => assert!(!sidebar_was_closed),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_vanished_surface_requeues_for_next_connect() {
        let (mut dispatcher, bus) = dispatcher();
        let mut ledger = DappRequestLedger::new();
        dispatcher.on_ui_connected(1).await;

        // The panel closed without a disconnect notification; the send
        // fails and the request is held instead of lost.
        bus.set_ui_listening(false);
        let outcome = dispatcher
            .dispatch(interactive("req-1"), sender(4, 1), &mut ledger)
            .await;
        assert_eq!(outcome, DispatchOutcome::Queued);
        assert!(!dispatcher.is_connected(1));
        assert_eq!(dispatcher.queued_count(1), 1);

        bus.set_ui_listening(true);
        dispatcher.on_ui_connected(1).await;
        assert_eq!(dispatcher.queued_count(1), 0);
        let events = bus.ui_events().await;
        assert_eq!(events.len(), 1);
        match &events[0].1 {
            UiEvent::DappRequestReceived { request, .. } => {
                assert_eq!(request.request_id, "req-1");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_windows_queue_independently() {
        let (mut dispatcher, _bus) = dispatcher();
        let mut ledger = DappRequestLedger::new();

        dispatcher
            .dispatch(interactive("req-1"), sender(4, 1), &mut ledger)
            .await;
        dispatcher
            .dispatch(interactive("req-2"), sender(9, 2), &mut ledger)
            .await;
        assert_eq!(dispatcher.queued_count(1), 1);
        assert_eq!(dispatcher.queued_count(2), 1);
    }

    #[tokio::test]
    async fn test_chain_change_is_answered_silently_when_surface_closed() {
        let (mut dispatcher, bus) = dispatcher();
        let mut ledger = DappRequestLedger::new();

        let outcome = dispatcher
            .dispatch(change_chain("req-1", "0x89"), sender(4, 1), &mut ledger)
            .await;
        assert_eq!(outcome, DispatchOutcome::AnsweredSilently);
        assert!(ledger.is_empty());

        let messages = bus.tab_messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, 4);
        assert_eq!(
            messages[0].1.payload,
            DappResponsePayload::ChainChanged {
                chain_id: "0x89".to_string(),
                provider_url: Some("https://polygon-rpc.com".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_chain_is_rejected_with_4902() {
        let (mut dispatcher, bus) = dispatcher();
        let mut ledger = DappRequestLedger::new();

        dispatcher
            .dispatch(change_chain("req-1", "bogus"), sender(4, 1), &mut ledger)
            .await;

        match &bus.tab_messages().await[0].1.payload {
            DappResponsePayload::Error { error } => assert_eq!(error.code, 4902),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_silent_request_goes_to_surface_when_open() {
        let (mut dispatcher, bus) = dispatcher();
        let mut ledger = DappRequestLedger::new();
        dispatcher.on_ui_connected(1).await;

        let outcome = dispatcher
            .dispatch(change_chain("req-1", "0x1"), sender(4, 1), &mut ledger)
            .await;
        assert_eq!(outcome, DispatchOutcome::Forwarded);
        assert!(bus.tab_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_capabilities_answered_silently() {
        let (mut dispatcher, bus) = dispatcher();
        let mut ledger = DappRequestLedger::new();

        let request = DappRequest {
            request_id: "req-1".to_string(),
            chain_id: Some(1),
            payload: DappRequestPayload::GetCapabilities { chain_ids: vec![] },
        };
        dispatcher.dispatch(request, sender(4, 1), &mut ledger).await;

        assert_eq!(
            bus.tab_messages().await[0].1.payload,
            DappResponsePayload::Capabilities {
                capabilities: json!({})
            }
        );
    }
}
