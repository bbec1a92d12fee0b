//! Infrastructure layer: configuration, logging, the browser session and
//! fetcher, the sqlite store, retry control and HTTP enrichment sources.

pub mod config;
pub mod db;
pub mod enrichment_http;
pub mod extractor;
pub mod fetcher;
pub mod logging;
pub mod retry;
pub mod session;
pub mod store;

pub use config::AppConfig;
pub use db::Database;
pub use fetcher::PageFetcher;
pub use retry::RetryPolicy;
pub use session::BrowserSession;
pub use store::{PartStore, PartUpsert, UpsertOutcome};
