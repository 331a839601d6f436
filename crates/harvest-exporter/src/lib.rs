//! harvest-exporter — turns scrape results into a served registry.
//!
//! - Builds a fresh Prometheus registry from every completed scrape
//! - Publishes it through one atomic handle; readers never see a partial set
//! - Runs the scrape loop and restarts it on configuration reload
//!
//! # Architecture
//!
//! ```text
//! Supervisor (reload: parse → new cache → cancel old loop → spawn new loop)
//!   └── Scraper
//!         ├── gate (one scrape at a time, overlap is skipped)
//!         ├── ClientCache refresh … clear
//!         ├── Updater → ScrapeResult
//!         ├── build_registry() → prometheus::Registry
//!         └── ArcSwap<Registry> ← /metrics readers
//! ```

pub mod error;
pub mod registry;
pub mod reload;
pub mod scraper;

pub use error::{ExporterError, ExporterResult};
pub use registry::{RegistryOptions, build_registry};
pub use reload::{CacheFactory, Supervisor};
pub use scraper::{DEFAULT_SCRAPING_INTERVAL, ScrapeOutcome, Scraper};
