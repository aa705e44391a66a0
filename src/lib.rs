//! dApp request bridge for a browser-extension wallet.
//!
//! A page script, a background context, and an approval UI run in
//! isolated execution contexts and only share typed messages. This crate
//! is the plumbing between them: it classifies every provider method a
//! page can send, correlates each forwarded request with exactly one
//! eventual response, keeps a durable ledger of requests awaiting user
//! approval across background restarts, and spaces dependent signing
//! operations on the same chain with a bounded safety delay.
//!
//! The host environment (storage, messaging, tab control) is abstracted
//! behind the traits in [`platform`], so everything here runs unchanged
//! under a real extension runtime or the in-memory test ports.

pub mod bridge;
pub mod config;
pub mod error;
pub mod ledger;
pub mod messages;
pub mod orchestrator;
pub mod platform;
pub mod rpc;

pub use bridge::{
    Clock, ConfirmationTracker, Correlator, MethodHandler, PendingResponseInfo, PreSignScheduler,
    ProviderPort, ResponseSink, SystemClock, WindowRequest,
};
pub use config::BridgeConfig;
pub use error::{BridgeError, ConfigError, RpcError};
pub use ledger::{DappRequestLedger, LedgerEntry, RequestStatus};
pub use messages::{
    DappRequest, DappRequestPayload, DappResponse, DappResponsePayload, ResponseKind, SenderInfo,
    UiEvent,
};
pub use orchestrator::{
    ActivationTrigger, DispatchOutcome, Dispatcher, InitState, Orchestrator, TabSignal,
};
pub use rpc::{MethodCategory, classify, is_supported_standard};

/// Install a default tracing subscriber reading `RUST_LOG`. Safe to call
/// more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init();
}
