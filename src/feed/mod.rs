//! Feed retrieval: turning a URL into a normalized, ordered entry sequence.
//!
//! - [`parser`] - RSS/Atom/JSON Feed parsing via `feed-rs`, identity derivation
//! - [`fetcher`] - HTTP retrieval with timeout, size cap and retry/backoff
//!
//! The engine only sees the [`FeedSource`] trait, so tests drive it with
//! scripted sources instead of a network.

mod fetcher;
mod parser;

use async_trait::async_trait;
use thiserror::Error;

pub use fetcher::{FetchError, HttpFeedSource};
pub use parser::{parse_feed, Entry, ParseError, ParsedFeed};

/// Why a feed could not be turned into entries.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Fetches and parses one feed URL.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Returns the feed's entries in document order.
    async fn fetch(&self, url: &str) -> Result<ParsedFeed, FeedError>;
}
