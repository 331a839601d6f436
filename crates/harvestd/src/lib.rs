//! harvestd — the cloudharvest daemon.
//!
//! Wires the CLI, the HTTP surface and signal handling around the exporter:
//!
//! ```text
//! harvestd run --config config.toml --fixture fixture.json
//!   ├── Supervisor ── Scraper loop (every --scraping-interval)
//!   ├── axum: /metrics /healthz POST /reload /
//!   ├── SIGHUP → reload
//!   └── Ctrl-C → cancel loop, drain HTTP, exit
//! ```

pub mod app;
pub mod cli;
pub mod telemetry;

pub use app::{AppState, build_router};
pub use cli::{Cli, Command, LogFormat, RunArgs};
