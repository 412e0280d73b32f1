//! Small helpers shared across the crate:
//!
//! - **URL validation** for subscriptions (scheme, credentials, private hosts)
//! - **Text shaping** for the `list` table and for chat card summaries

mod text;
mod url_validator;

pub use text::{display_width, pad_to_width, summary_to_plain, truncate_chars, truncate_to_width};
pub use url_validator::{validate_feed_url, UrlValidationError};
