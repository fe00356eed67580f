//! Prometheus exporter for Heliotherm heat pumps.
//!
//! Polls the heat pump controller over its serial service interface (directly
//! or through a TCP-to-serial LAN gateway) and serves the decoded register
//! values in Prometheus exposition format:
//!
//! - [`config`] - Configuration loading (JSON5 format) and validation
//! - [`transport`] - Serial/TCP byte streams and framed request/reply exchange
//! - [`registers`] - Static table of registers to poll
//! - [`poller`] - Scrape-driven polling with snapshot caching
//! - [`collector`] - Exposition-format rendering
//! - [`http`] - The `/metrics` HTTP endpoint

pub mod collector;
pub mod config;
pub mod http;
pub mod poller;
pub mod registers;
pub mod transport;

pub use config::ExporterConfig;
pub use http::HttpServer;
pub use poller::{Poller, ScrapeOutcome, Snapshot};
pub use registers::{RegisterKind, RegisterSpec, RegisterTable, Unit};
pub use transport::{Connector, NetConnector};
