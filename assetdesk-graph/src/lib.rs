//! Assetdesk Graph - Resilient Upstream Access Layer
//!
//! Talks to a list-based document service over its REST gateway:
//! throttle-aware request execution, cursor paging, name→id resolution,
//! point-in-time state queries over revision history, and conditional
//! writes. [`AssetListClient`] is the entry point; the lower layers are
//! public for callers that need finer control.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use assetdesk_core::{AccessConfig, BearerToken, FieldMap};
//! use assetdesk_graph::{AssetListClient, CallContext, ListLocation};
//!
//! # async fn run() -> assetdesk_core::AssetdeskResult<()> {
//! let client = AssetListClient::with_reqwest(
//!     AccessConfig::from_env(),
//!     FieldMap::new().with("status", "Status"),
//! )?;
//! let location = ListLocation::new("contoso.sharepoint.com", "/sites/it", "Hardware");
//! let ctx = CallContext::new("list_items");
//! let items = client
//!     .list_items(&ctx, &BearerToken::new("token"), &location)
//!     .await?;
//! println!("{} items", items.len());
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod client;
pub mod credential;
pub mod executor;
pub mod metrics;
pub mod mock;
pub mod odata;
pub mod paging;
pub mod resolver;
pub mod telemetry;
pub mod transitions;
pub mod transport;
pub mod writes;

pub use client::AssetListClient;
pub use credential::{acquire_credential, CredentialExchange, StaticCredential};
pub use executor::Executor;
pub use metrics::{AggregatingSink, CallContext, CallOutcome, CallReport, MetricsSink, MetricsSnapshot};
pub use mock::ScriptedTransport;
pub use paging::{PageControl, PageWalker};
pub use resolver::{IdentifierResolver, ListLocation, ResolvedList};
pub use transitions::{StateQuery, TransitionResolver, TransitionSettings};
pub use transport::{HttpMethod, HttpTransport, ReqwestTransport, UpstreamRequest, UpstreamResponse};
pub use writes::WriteCoordinator;
