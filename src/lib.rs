//! feedrelay watches syndication feeds and relays new entries to a chat
//! webhook, one feed at a time, without posting the same entry twice.
//!
//! - [`engine`] - dedup decision, paced delivery and the run loop
//! - [`feed`] - fetching and parsing feeds
//! - [`storage`] - subscriptions and dedup state in SQLite
//! - [`notify`] - the chat channel
//! - [`manage`] - operator commands on the subscription list

pub mod config;
pub mod engine;
pub mod feed;
pub mod manage;
pub mod notify;
pub mod storage;
pub mod util;
