//! Durable record of dApp requests awaiting user approval.
//!
//! Each entry moves `Pending -> Confirming -> removed`; removal is the
//! terminal outcome for both approval and rejection, so nothing lingers
//! after the user decides. The ledger lives in the persisted-state
//! envelope and survives background-context restarts; hydration is
//! tolerant, so one corrupt entry can never brick startup.

pub mod migrations;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::messages::{DappRequest, SenderInfo};
use crate::platform::StoragePort;

/// Approval state of a ledger entry. There is no terminal variant on
/// purpose: confirmed and rejected requests are removed, not kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Confirming,
}

/// One persisted request record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub dapp_request: DappRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<SenderInfo>,
    pub status: RequestStatus,
    /// Epoch milliseconds.
    pub created_at: i64,
}

/// The in-memory ledger, keyed by request id.
#[derive(Debug, Default)]
pub struct DappRequestLedger {
    entries: HashMap<String, LedgerEntry>,
}

impl DappRequestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request as pending. An entry with the same id is replaced;
    /// the page resubmitted, so the older record is stale.
    pub fn upsert(&mut self, request: DappRequest, sender: Option<SenderInfo>) {
        let entry = LedgerEntry {
            sender,
            status: RequestStatus::Pending,
            created_at: chrono::Utc::now().timestamp_millis(),
            dapp_request: request,
        };
        self.entries.insert(entry.dapp_request.request_id.clone(), entry);
    }

    /// Move an entry to `Confirming`. A no-op for unknown ids; the entry
    /// may already have been removed by a concurrent decision.
    pub fn mark_confirming(&mut self, request_id: &str) {
        if let Some(entry) = self.entries.get_mut(request_id) {
            entry.status = RequestStatus::Confirming;
        }
    }

    /// Whether an entry is mid-confirmation. Callers use this to make the
    /// confirm action idempotent across double-clicks.
    pub fn is_confirming(&self, request_id: &str) -> bool {
        self.entries
            .get(request_id)
            .is_some_and(|e| e.status == RequestStatus::Confirming)
    }

    /// Terminal removal, for confirmed and rejected requests alike. A
    /// no-op for unknown ids.
    pub fn remove(&mut self, request_id: &str) {
        self.entries.remove(request_id);
    }

    pub fn get(&self, request_id: &str) -> Option<&LedgerEntry> {
        self.entries.get(request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending entries in arrival order.
    pub fn pending_in_order(&self) -> Vec<&LedgerEntry> {
        let mut pending: Vec<&LedgerEntry> = self
            .entries
            .values()
            .filter(|e| e.status == RequestStatus::Pending)
            .collect();
        pending.sort_by_key(|e| e.created_at);
        pending
    }

    /// Drop entries older than `age`. Bounds growth from tabs that went
    /// away without their requests ever being decided.
    pub fn sweep_older_than(&mut self, age: Duration) {
        let cutoff = chrono::Utc::now().timestamp_millis() - age.as_millis() as i64;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.created_at >= cutoff);
        let swept = before - self.entries.len();
        if swept > 0 {
            debug!(swept, "swept orphaned ledger entries");
        }
    }

    /// Build a ledger from a migrated persisted-state envelope. Entries
    /// that no longer parse are skipped with a warning rather than
    /// failing the whole load.
    pub fn hydrate(envelope: &Value) -> Self {
        let mut ledger = Self::new();
        let Some(requests) = envelope
            .get("dappRequests")
            .and_then(|d| d.get("requests"))
            .and_then(Value::as_object)
        else {
            return ledger;
        };
        for (request_id, raw) in requests {
            match serde_json::from_value::<LedgerEntry>(raw.clone()) {
                Ok(entry) => {
                    ledger.entries.insert(request_id.clone(), entry);
                }
                Err(e) => {
                    warn!(request_id, "skipping unreadable ledger entry: {e}");
                }
            }
        }
        ledger
    }

    /// Serialize the ledger back into `envelope` under
    /// `dappRequests.requests`, leaving unrelated state alone.
    pub fn snapshot_into(&self, envelope: &mut Value) -> Result<(), StorageError> {
        if !envelope.is_object() {
            *envelope = json!({});
        }
        let mut requests = Map::new();
        for (request_id, entry) in &self.entries {
            requests.insert(request_id.clone(), serde_json::to_value(entry)?);
        }
        let root = envelope
            .as_object_mut()
            .ok_or_else(|| StorageError::Unavailable("envelope is not an object".to_string()))?;
        let dapp_requests = root
            .entry("dappRequests".to_string())
            .or_insert_with(|| json!({}));
        if !dapp_requests.is_object() {
            *dapp_requests = json!({});
        }
        if let Some(dapp_requests) = dapp_requests.as_object_mut() {
            dapp_requests.insert("requests".to_string(), Value::Object(requests));
        }
        Ok(())
    }

    /// Write the ledger into the stored envelope under `key`, preserving
    /// whatever else the envelope holds.
    pub async fn persist(&self, storage: &dyn StoragePort, key: &str) -> Result<(), StorageError> {
        let mut envelope = storage.read(key).await?.unwrap_or_else(|| json!({}));
        self.snapshot_into(&mut envelope)?;
        storage.write(key, envelope).await
    }
}
