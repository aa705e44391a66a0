//! Page-context plumbing: request/response correlation, the pre-sign
//! delay governor, and the method handler that ties them to the wire.

pub mod confirmation;
pub mod correlator;
pub mod handler;
pub mod scheduler;

pub use confirmation::{Clock, ConfirmationTracker, SystemClock};
pub use correlator::{Correlator, PendingResponseInfo};
pub use handler::{MethodHandler, ProviderPort, ResponseSink, WindowRequest};
pub use scheduler::PreSignScheduler;
