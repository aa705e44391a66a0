//! Request/response correlation.
//!
//! Each in-flight request id maps to the opaque source it came from plus
//! the response shape the request expects. Resolution is single-use: the
//! first response wins, later responses and unknown ids resolve to `None`
//! and the caller drops them.

use std::collections::HashMap;

use tracing::warn;

use crate::messages::ResponseKind;

/// What we remember about an in-flight request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingResponseInfo<S> {
    /// Opaque reference to the originating context (a frame port, a tab id,
    /// whatever the owner delivers responses through).
    pub source: S,
    /// Response shape the request expects.
    pub expected: ResponseKind,
}

/// In-memory correlation table, scoped to one execution context's lifetime.
#[derive(Debug, Default)]
pub struct Correlator<S> {
    pending: HashMap<String, PendingResponseInfo<S>>,
}

impl<S> Correlator<S> {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Record an in-flight request. A duplicate id silently replaces the
    /// previous entry; the page chose to reuse the id, so the old waiter
    /// can never be answered anyway.
    pub fn register(&mut self, request_id: impl Into<String>, source: S, expected: ResponseKind) {
        self.pending
            .insert(request_id.into(), PendingResponseInfo { source, expected });
    }

    /// Atomically take the entry for `request_id`. Returns `None` for ids
    /// that were never registered or were already resolved. A response
    /// whose kind differs from the registered expectation is logged and
    /// still delivered, unless it is the error kind, which matches any
    /// expectation.
    pub fn resolve(&mut self, request_id: &str, actual: ResponseKind) -> Option<PendingResponseInfo<S>> {
        let info = self.pending.remove(request_id)?;
        if actual != info.expected && actual != ResponseKind::Error {
            warn!(
                request_id,
                expected = ?info.expected,
                actual = ?actual,
                "response kind does not match the registered request"
            );
        }
        Some(info)
    }

    /// Number of requests still awaiting a response.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop entries the predicate rejects. The owner calls this when an
    /// originating context goes away so the table cannot grow without
    /// bound.
    pub fn sweep<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str, &PendingResponseInfo<S>) -> bool,
    {
        self.pending.retain(|id, info| keep(id, info));
    }
}
