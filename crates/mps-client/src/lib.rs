//! mps-client
//!
//! Outbound side of the engine: a uniform client over six marketplace APIs.
//!
//! - [`adapter::MarketplaceAdapter`] is the wire-protocol seam, one impl per
//!   marketplace under [`adapters`].
//! - [`MarketplaceClient`] composes an adapter with the shared
//!   [`CredentialStore`], [`RateLimiter`] and [`RetryExecutor`], and emits
//!   one `SyncResult` per call to a [`ResultSink`].
//! - [`ClientRegistry`] builds the enabled set from configuration.

pub mod adapter;
pub mod adapters;
pub mod client;
pub mod credentials;
pub mod error;
pub mod http;
pub mod rate_limit;
pub mod registry;
pub mod retry;
pub mod sign;

pub use adapter::{AuthContext, IssuedToken, MarketplaceAdapter};
pub use client::{MarketplaceClient, NullSink, RecordingSink, ResultSink};
pub use credentials::{CredentialKey, CredentialStore};
pub use error::{CallError, Classification, Failure};
pub use rate_limit::{Admission, RateLimitStats, RateLimiter, WindowConfig};
pub use registry::ClientRegistry;
pub use retry::{Outcome, RetryExecutor, RetryPolicy};
