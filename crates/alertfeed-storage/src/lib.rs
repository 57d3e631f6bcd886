//! HTTP retrieval and persistence for alert feed ingestion.

pub mod http;
pub mod pg;
pub mod rows;
pub mod store;

pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FeedFetcher, FetchError, FetchRequest,
    FetchedResponse, HttpClientConfig, HttpFetcher, RetryDisposition,
};
pub use pg::PgStore;
pub use rows::{SecurityAlertRow, TravelAnnouncementRow, WeatherAlertRow};
pub use store::{AlertStore, MemoryStore, RuleStore, SourceCatalog, StorageError};

pub const CRATE_NAME: &str = "alertfeed-storage";
