//! Service layer module
//!
//! Message composition, the upstream client with its retry policy, the
//! stream relay, entitlement checks and the in-memory collaborator stores

pub mod client;
pub mod composer;
pub mod entitlement;
pub mod identity;
pub mod relay;
pub mod sse;
pub mod store;

pub use client::{ChatProvider, DeltaSink, RetryPolicy, SinkClosed, UpstreamClient, UpstreamError};
pub use composer::MessageComposer;
pub use entitlement::{EntitlementError, EntitlementGate, StartOutcome};
pub use identity::{AuthError, IdentityVerifier, StaticTokenVerifier};
pub use relay::{ChannelSink, EventSink, RelayJob, RelayOutcome, StreamRelay};
pub use store::{InMemoryCreditStore, InMemoryDirectory};
