use chrono::{DateTime, Utc};
use feed_rs::parser;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// The feed body could not be understood as RSS, Atom or JSON Feed.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Empty feed body")]
    Empty,
    #[error("Unrecognized or malformed feed: {0}")]
    Malformed(#[from] parser::ParseFeedError),
}

/// One item of a feed, normalized across dialects.
///
/// Entries are never stored individually; only their identity (or their
/// timestamp, for watermark feeds) survives a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Explicit guid/id when the feed provides one, otherwise derived from
    /// the link, otherwise a hash of title and link.
    pub identity: String,
    pub title: String,
    pub link: Option<String>,
    /// `published`, falling back to `updated`.
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

/// A parsed feed document in source order.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<Entry>,
}

pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(ParseError::Empty);
    }

    // Missing ids stay empty so entry_identity can fall back to the link
    let feed = parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build()
        .parse(bytes)?;

    let title = feed
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty());

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry.links.first().map(|l| l.href.trim().to_string());
            let published_at = entry.published.or(entry.updated);
            let summary = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .filter(|s| !s.trim().is_empty());
            let title = entry
                .title
                .map(|t| t.content.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled".to_string());
            let identity = entry_identity(&entry.id, link.as_deref(), &title);

            Entry {
                identity,
                title,
                link,
                published_at,
                summary,
            }
        })
        .collect();

    Ok(ParsedFeed { title, entries })
}

fn entry_identity(explicit: &str, link: Option<&str>, title: &str) -> String {
    let explicit = explicit.trim();
    if !explicit.is_empty() {
        return explicit.to_string();
    }

    match link {
        Some(link) if !link.is_empty() => link.to_string(),
        _ => {
            let digest = Sha256::digest(format!("{}|{}", title, link.unwrap_or("")).as_bytes());
            format!("{:x}", digest)
        }
    }
}
