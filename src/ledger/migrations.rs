//! Schema migrations for the persisted-state envelope.
//!
//! Each migration is a pure `fn(Value) -> Value`: tolerant of anomalies
//! (anything unexpected returns the input unchanged), idempotent through
//! shape guards, and never panicking. `run_all` chains them in version
//! order and stamps the resulting envelope, so a stale envelope from any
//! prior release is brought forward in one pass and a current one passes
//! through untouched. A migration must never brick startup: the worst
//! outcome of bad stored data is that the bad part is left as-is.

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

/// Version stamped on an envelope after every registered migration ran.
pub const SCHEMA_VERSION: u64 = 2;

/// Registered migrations in order. The version is the schema the
/// migration produces.
const MIGRATIONS: &[(u64, fn(Value) -> Value)] = &[
    (1, migrate_dapp_request_ledger),
    (2, migrate_account_backups),
];

/// Bring a persisted envelope up to [`SCHEMA_VERSION`].
///
/// Contract difference from the individual migrations: they return
/// unrecognized input unchanged, while `run_all` additionally stamps
/// `version` onto every object envelope it sees, including a fresh empty
/// one, so later activations can skip the registry outright. Only
/// non-object input passes through completely untouched.
pub fn run_all(state: Value) -> Value {
    if !state.is_object() {
        // Nothing recognizable to migrate; hand it back untouched.
        return state;
    }
    let stored_version = state
        .get("version")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let mut state = state;
    for (version, migration) in MIGRATIONS {
        if stored_version < *version {
            debug!(version, "running persisted-state migration");
            state = migration(state);
        }
    }
    if let Some(object) = state.as_object_mut() {
        object.insert("version".to_string(), json!(SCHEMA_VERSION));
    }
    state
}

/// Rewrite the legacy pending-array ledger into the keyed-record map.
///
/// Legacy shape: `dappRequests.pending` is an array of `{ dappRequest,
/// sender? }` items and no `dappRequests.requests` map exists. Each item
/// with a well-formed `dappRequest.requestId` becomes a record keyed by
/// that id, with `status: "pending"` and a `createdAt` spaced one second
/// apart in array order so the original ordering survives the move to a
/// map. Items missing a usable id are dropped. Any other shape is
/// returned unchanged.
fn migrate_dapp_request_ledger(state: Value) -> Value {
    let Some(dapp_requests) = state.get("dappRequests").and_then(Value::as_object) else {
        return state;
    };
    if dapp_requests.contains_key("requests") {
        // Already keyed; nothing to do.
        return state;
    }
    let Some(pending) = dapp_requests.get("pending").and_then(Value::as_array) else {
        return state;
    };

    let base_time = chrono::Utc::now().timestamp_millis();
    let mut requests = Map::new();
    for (index, item) in pending.iter().enumerate() {
        let request_id = item
            .get("dappRequest")
            .and_then(|r| r.get("requestId"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty());
        let Some(request_id) = request_id else {
            warn!(index, "dropping legacy ledger item without a request id");
            continue;
        };
        let mut record = Map::new();
        if let Some(request) = item.get("dappRequest") {
            record.insert("dappRequest".to_string(), request.clone());
        }
        if let Some(sender) = item.get("sender") {
            record.insert("sender".to_string(), sender.clone());
        }
        record.insert("status".to_string(), json!("pending"));
        record.insert(
            "createdAt".to_string(),
            json!(base_time + index as i64 * 1000),
        );
        requests.insert(request_id.to_string(), Value::Object(record));
    }

    let mut state = state;
    if let Some(dapp_requests) = state
        .get_mut("dappRequests")
        .and_then(Value::as_object_mut)
    {
        dapp_requests.remove("pending");
        dapp_requests.insert("requests".to_string(), Value::Object(requests));
    }
    state
}

/// Mark accounts from before backup tracking as possibly backed up.
///
/// Accounts predating the `backups` field may have been manually backed
/// up; nothing recorded either way. Give every account without a
/// non-empty `backups` array the sentinel `["maybe-manual"]` so the UI
/// can prompt instead of assuming. Accounts that already carry backups
/// are untouched.
fn migrate_account_backups(state: Value) -> Value {
    let mut state = state;
    let Some(accounts) = state.get_mut("accounts").and_then(Value::as_object_mut) else {
        return state;
    };
    for account in accounts.values_mut() {
        let Some(account) = account.as_object_mut() else {
            continue;
        };
        let has_backups = account
            .get("backups")
            .and_then(Value::as_array)
            .is_some_and(|backups| !backups.is_empty());
        if !has_backups {
            account.insert("backups".to_string(), json!(["maybe-manual"]));
        }
    }
    state
}
