//! harvest-clients — the cloud APIs as capability interfaces.
//!
//! The scrape pipeline never talks to a transport directly. It asks a
//! [`ClientCache`] for per-(region, role) clients, wraps metrics clients in a
//! [`LimitedMetricsClient`] that enforces the active [`ConcurrencyPolicy`],
//! and races every call against the scrape's cancellation token.
//!
//! # Architecture
//!
//! ```text
//! ClientCache (refresh / clear once per scrape)
//!   ├── MetricsApiClient  → LimitedMetricsClient (ConcurrencyPolicy)
//!   ├── TaggingApiClient  (paged GetResources)
//!   └── AccountClient     (account id + alias)
//! ```
//!
//! [`fixture`] provides a file-backed implementation of every interface.

pub mod api;
pub mod concurrency;
pub mod error;
pub mod fixture;

pub use api::*;
pub use concurrency::{ConcurrencyConfig, ConcurrencyPolicy, LimitedMetricsClient, cancellable};
pub use error::{ClientError, ClientResult};
pub use fixture::{Fixture, FixtureCache};
