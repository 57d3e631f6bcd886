//! Feed formats to canonical alerts: fetch dispatch, tolerant parsing,
//! field mapping, and classification.

pub mod classify;
pub mod feed;
pub mod fetch;
pub mod normalize;
pub mod policy;
pub mod text;

pub use classify::{Classification, ClassificationRuleError, Classifier, RawSignals, RuleSet};
pub use feed::{json_items, parse_feed, FeedItem};
pub use fetch::{build_request, decode_body, fetch_feed, FeedError, FeedPayload, FetchedFeed, ParseError};
pub use normalize::{
    extract_coordinates, extract_path, parse_datetime, resolve_published, NormalizationError,
    NormalizedBatch, Normalizer,
};
pub use policy::{default_category, SourceTypePolicy};

pub const CRATE_NAME: &str = "alertfeed-adapters";
