//! Host-environment ports.
//!
//! The bridge never talks to a browser runtime directly; everything it needs
//! from the host is behind these three narrow traits, so the whole pipeline
//! runs unchanged against the in-memory implementations in tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{DeliveryError, StorageError};
use crate::messages::{DappResponse, UiEvent};

/// Durable key/value storage for the persisted-state envelope.
#[async_trait]
pub trait StoragePort: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Value>, StorageError>;
    async fn write(&self, key: &str, value: Value) -> Result<(), StorageError>;
}

/// Typed message delivery to other execution contexts. Delivery can fail
/// when the destination is gone or not listening; callers decide whether
/// that is an error or an expected condition.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_to_tab(&self, tab_id: u32, response: DappResponse) -> Result<(), DeliveryError>;
    async fn send_to_ui(&self, window_id: u32, event: UiEvent) -> Result<(), DeliveryError>;
    async fn broadcast_to_ui(&self, event: UiEvent) -> Result<(), DeliveryError>;
}

/// Browser-surface control: the onboarding view and the toolbar action.
#[async_trait]
pub trait TabsPort: Send + Sync {
    async fn focus_onboarding(&self) -> Result<(), DeliveryError>;
    async fn set_action_surface_enabled(&self, enabled: bool) -> Result<(), DeliveryError>;
}

/// In-memory storage backed by a map.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a key before handing the storage to the code under test.
    pub async fn seed(&self, key: &str, value: Value) {
        self.entries.lock().await.insert(key.to_string(), value);
    }
}

#[async_trait]
impl StoragePort for MemoryStorage {
    async fn read(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// Storage backed by one JSON file holding every key.
///
/// Reads are tolerant: a missing or unparseable file behaves like empty
/// storage (with a warning), so a corrupt file on disk degrades to a
/// fresh start instead of failing every activation.
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_root(&self) -> Value {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(root @ Value::Object(_)) => root,
                Ok(_) | Err(_) => {
                    warn!(path = %self.path.display(), "storage file unreadable, starting empty");
                    json!({})
                }
            },
            Err(_) => json!({}),
        }
    }
}

#[async_trait]
impl StoragePort for FileStorage {
    async fn read(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_root().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut root = self.read_root().await;
        if let Some(object) = root.as_object_mut() {
            object.insert(key.to_string(), value);
        }
        let bytes = serde_json::to_vec_pretty(&root)?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))
    }
}

/// In-memory message bus that records everything sent through it.
///
/// UI delivery honors a `ui_listening` flag so tests can exercise the
/// closed-panel path: when false, `send_to_ui` and `broadcast_to_ui` fail
/// with [`DeliveryError::NotListening`].
#[derive(Default)]
pub struct MemoryBus {
    ui_listening: AtomicBool,
    tab_messages: Mutex<Vec<(u32, DappResponse)>>,
    ui_events: Mutex<Vec<(Option<u32>, UiEvent)>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let bus = Self::default();
        bus.ui_listening.store(true, Ordering::SeqCst);
        bus
    }

    pub fn set_ui_listening(&self, listening: bool) {
        self.ui_listening.store(listening, Ordering::SeqCst);
    }

    pub async fn tab_messages(&self) -> Vec<(u32, DappResponse)> {
        self.tab_messages.lock().await.clone()
    }

    /// Events delivered to the UI, paired with the target window when the
    /// send was addressed rather than broadcast.
    pub async fn ui_events(&self) -> Vec<(Option<u32>, UiEvent)> {
        self.ui_events.lock().await.clone()
    }
}

#[async_trait]
impl MessagingPort for MemoryBus {
    async fn send_to_tab(&self, tab_id: u32, response: DappResponse) -> Result<(), DeliveryError> {
        self.tab_messages.lock().await.push((tab_id, response));
        Ok(())
    }

    async fn send_to_ui(&self, window_id: u32, event: UiEvent) -> Result<(), DeliveryError> {
        if !self.ui_listening.load(Ordering::SeqCst) {
            return Err(DeliveryError::NotListening);
        }
        self.ui_events.lock().await.push((Some(window_id), event));
        Ok(())
    }

    async fn broadcast_to_ui(&self, event: UiEvent) -> Result<(), DeliveryError> {
        if !self.ui_listening.load(Ordering::SeqCst) {
            return Err(DeliveryError::NotListening);
        }
        self.ui_events.lock().await.push((None, event));
        Ok(())
    }
}

/// In-memory tab control that records what the orchestrator asked for.
#[derive(Default)]
pub struct MemoryTabs {
    onboarding_focused: Mutex<u32>,
    action_surface_enabled: Mutex<Option<bool>>,
}

impl MemoryTabs {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn onboarding_focus_count(&self) -> u32 {
        *self.onboarding_focused.lock().await
    }

    pub async fn action_surface_enabled(&self) -> Option<bool> {
        *self.action_surface_enabled.lock().await
    }
}

#[async_trait]
impl TabsPort for MemoryTabs {
    async fn focus_onboarding(&self) -> Result<(), DeliveryError> {
        *self.onboarding_focused.lock().await += 1;
        Ok(())
    }

    async fn set_action_surface_enabled(&self, enabled: bool) -> Result<(), DeliveryError> {
        *self.action_surface_enabled.lock().await = Some(enabled);
        Ok(())
    }
}
