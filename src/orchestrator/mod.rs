//! Background-context orchestration.
//!
//! The background context is ephemeral: the host runtime tears it down
//! when idle and recreates it on the next trigger. Every activation runs
//! the same idempotent routine, so correctness never depends on which
//! trigger happened to come first or whether durable state has already
//! been migrated by a previous life.

pub mod dispatch;

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, LedgerError};
use crate::ledger::{DappRequestLedger, migrations};
use crate::messages::{DappRequest, DappResponse, SenderInfo, UiEvent};
use crate::platform::{MessagingPort, StoragePort, TabsPort};

pub use dispatch::{DispatchOutcome, Dispatcher};

/// Why the background woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationTrigger {
    Install,
    Update,
    Connection,
    ActionClick,
}

/// Tab lifecycle signals the host feeds in; each one means the active
/// context may have changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabSignal {
    Activated { tab_id: u32 },
    Updated { tab_id: u32 },
}

/// Tracks whether this background life has run its activation routine.
///
/// A value, not a module-level flag: each background life constructs its
/// own, so a torn-down-and-recreated context starts over cleanly.
#[derive(Debug, Default)]
pub struct InitState {
    initialized: bool,
}

impl InitState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true exactly once, on the first call.
    pub fn init(&mut self) -> bool {
        let first = !self.initialized;
        self.initialized = true;
        first
    }

    pub fn is_ready(&self) -> bool {
        self.initialized
    }
}

/// Owns the background side of the bridge for one background life.
pub struct Orchestrator {
    storage: Arc<dyn StoragePort>,
    messaging: Arc<dyn MessagingPort>,
    tabs: Arc<dyn TabsPort>,
    config: BridgeConfig,
    init: InitState,
    ledger: DappRequestLedger,
    dispatcher: Dispatcher,
}

impl Orchestrator {
    pub fn new(
        storage: Arc<dyn StoragePort>,
        messaging: Arc<dyn MessagingPort>,
        tabs: Arc<dyn TabsPort>,
        config: BridgeConfig,
    ) -> Self {
        let dispatcher = Dispatcher::new(messaging.clone(), config.clone());
        Self {
            storage,
            messaging,
            tabs,
            config,
            init: InitState::new(),
            ledger: DappRequestLedger::new(),
            dispatcher,
        }
    }

    /// The activation routine. Safe to call on every trigger: the first
    /// call migrates and rehydrates durable state, later calls only
    /// re-announce readiness to whatever UI just connected.
    pub async fn activate(&mut self, trigger: ActivationTrigger) -> Result<(), BridgeError> {
        let first = self.init.init();
        debug!(?trigger, first, "background activation");
        if !first {
            self.broadcast_state_ready().await;
            return Ok(());
        }

        let key = self.config.state_storage_key.clone();
        let envelope = self.storage.read(&key).await?.unwrap_or_else(|| json!({}));
        let migrated = migrations::run_all(envelope);
        self.storage.write(&key, migrated.clone()).await?;
        self.ledger = DappRequestLedger::hydrate(&migrated);
        info!(
            pending = self.ledger.len(),
            "durable state migrated and rehydrated"
        );

        let onboarding_complete = migrated
            .get("onboardingComplete")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if onboarding_complete {
            self.tabs.set_action_surface_enabled(true).await?;
        } else {
            self.tabs.set_action_surface_enabled(false).await?;
            self.tabs.focus_onboarding().await?;
        }

        self.broadcast_state_ready().await;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.init.is_ready()
    }

    pub fn ledger(&self) -> &DappRequestLedger {
        &self.ledger
    }

    /// Route one inbound request from a tab.
    pub async fn handle_request(
        &mut self,
        request: DappRequest,
        sender: SenderInfo,
    ) -> Result<DispatchOutcome, BridgeError> {
        let outcome = self
            .dispatcher
            .dispatch(request, sender, &mut self.ledger)
            .await;
        if outcome != DispatchOutcome::AnsweredSilently {
            self.persist_ledger().await?;
        }
        Ok(outcome)
    }

    pub async fn on_ui_connected(&mut self, window_id: u32) {
        self.dispatcher.on_ui_connected(window_id).await;
    }

    pub fn on_ui_disconnected(&mut self, window_id: u32) {
        self.dispatcher.on_ui_disconnected(window_id);
    }

    /// The user hit confirm. Idempotent: a second confirm for a request
    /// already mid-confirmation does nothing.
    pub async fn confirm_request(&mut self, request_id: &str) -> Result<(), BridgeError> {
        if self.ledger.is_confirming(request_id) {
            debug!(request_id, "confirm already in flight");
            return Ok(());
        }
        if self.ledger.get(request_id).is_none() {
            return Err(LedgerError::UnknownRequest(request_id.to_string()).into());
        }
        self.ledger.mark_confirming(request_id);
        self.persist_ledger().await?;
        Ok(())
    }

    /// Terminal outcome for a request, decided or rejected: remove the
    /// entry, persist, and deliver the response to the originating tab.
    pub async fn resolve_request(
        &mut self,
        request_id: &str,
        response: DappResponse,
    ) -> Result<(), BridgeError> {
        let Some(entry) = self.ledger.get(request_id) else {
            return Err(LedgerError::UnknownRequest(request_id.to_string()).into());
        };
        let tab_id = entry.sender.as_ref().map(|s| s.tab_id);
        self.ledger.remove(request_id);
        self.persist_ledger().await?;
        if let Some(tab_id) = tab_id {
            self.messaging.send_to_tab(tab_id, response).await?;
        }
        Ok(())
    }

    /// Drop ledger entries past the configured sweep age.
    pub async fn sweep_ledger(&mut self) -> Result<(), BridgeError> {
        self.ledger.sweep_older_than(self.config.ledger_sweep_age);
        self.persist_ledger().await?;
        Ok(())
    }

    async fn persist_ledger(&self) -> Result<(), BridgeError> {
        self.ledger
            .persist(self.storage.as_ref(), &self.config.state_storage_key)
            .await?;
        Ok(())
    }

    async fn broadcast_state_ready(&self) {
        // A closed UI is not an error; it will ask again when it opens.
        if let Err(e) = self.messaging.broadcast_to_ui(UiEvent::StateReady).await {
            debug!("state-ready broadcast not delivered: {e}");
        }
    }
}

/// Rebroadcast tab lifecycle signals to the UI as active-context changes.
/// The event carries no payload; consumers re-query what they need.
pub fn relay_tab_signals(
    messaging: Arc<dyn MessagingPort>,
    mut signals: mpsc::Receiver<TabSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(signal) = signals.recv().await {
            debug!(?signal, "active context changed");
            if let Err(e) = messaging.broadcast_to_ui(UiEvent::ActiveContextChanged).await {
                debug!("context-change broadcast not delivered: {e}");
            }
        }
    })
}

/// Pump inbound requests into the orchestrator until shutdown.
pub fn run_dispatch_loop(
    orchestrator: Arc<Mutex<Orchestrator>>,
    mut inbound: mpsc::Receiver<(DappRequest, SenderInfo)>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("dispatch loop shutting down");
                        break;
                    }
                }
                request = inbound.recv() => {
                    let Some((request, sender)) = request else {
                        break;
                    };
                    let mut orchestrator = orchestrator.lock().await;
                    if let Err(e) = orchestrator.handle_request(request, sender).await {
                        warn!("failed to dispatch request: {e}");
                    }
                }
            }
        }
    })
}
