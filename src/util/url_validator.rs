use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Reasons a feed URL is refused at subscription time.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    /// Credentials in the URL would end up in the store and in logs.
    #[error("URLs with embedded credentials are not allowed")]
    EmbeddedCredentials,
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    #[error("Localhost not allowed")]
    Localhost,
}

/// Validates and normalizes a feed URL before it is stored.
///
/// The fragment is dropped since it never reaches the server and would let
/// the same feed be subscribed twice under two spellings.
///
/// With `allow_private` unset, loopback and private-range hosts are refused
/// so that a subscription cannot be used to probe the local network.
///
/// ```
/// use feedrelay::util::validate_feed_url;
///
/// let url = validate_feed_url("https://example.com/feed.xml#top", false).unwrap();
/// assert_eq!(url.as_str(), "https://example.com/feed.xml");
///
/// assert!(validate_feed_url("http://localhost/feed", false).is_err());
/// assert!(validate_feed_url("http://localhost/feed", true).is_ok());
/// assert!(validate_feed_url("file:///etc/passwd", true).is_err());
/// ```
pub fn validate_feed_url(raw: &str, allow_private: bool) -> Result<Url, UrlValidationError> {
    let mut url = Url::parse(raw.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(UrlValidationError::EmbeddedCredentials);
    }

    let host = url.host_str().ok_or(UrlValidationError::MissingHost)?;
    if !allow_private {
        check_public_host(host)?;
    }

    url.set_fragment(None);
    Ok(url)
}

fn check_public_host(host: &str) -> Result<(), UrlValidationError> {
    if host.eq_ignore_ascii_case("localhost") {
        return Err(UrlValidationError::Localhost);
    }

    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    match bare.parse::<IpAddr>() {
        Ok(ip) if ip.is_loopback() => Err(UrlValidationError::Localhost),
        Ok(ip) if is_private_ip(&ip) => Err(UrlValidationError::PrivateIp(ip.to_string())),
        _ => Ok(()),
    }
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            // fc00::/7 unique local, fe80::/10 link local
            v6.is_unspecified() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_urls_accepted() {
        assert!(validate_feed_url("https://example.com/feed.xml", false).is_ok());
        assert!(validate_feed_url("http://news.example.org:8080/rss", false).is_ok());
    }

    #[test]
    fn test_surrounding_whitespace_trimmed() {
        let url = validate_feed_url("  https://example.com/atom  ", false).unwrap();
        assert_eq!(url.as_str(), "https://example.com/atom");
    }

    #[test]
    fn test_fragment_dropped() {
        let url = validate_feed_url("https://example.com/feed?x=1#frag", false).unwrap();
        assert_eq!(url.as_str(), "https://example.com/feed?x=1");
    }

    #[test]
    fn test_non_http_schemes_rejected() {
        assert!(matches!(
            validate_feed_url("ftp://example.com/feed", false),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(validate_feed_url("file:///etc/passwd", true).is_err());
    }

    #[test]
    fn test_credentials_rejected() {
        assert!(matches!(
            validate_feed_url("https://user:pw@example.com/feed", false),
            Err(UrlValidationError::EmbeddedCredentials)
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            validate_feed_url("not a url", false),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_local_hosts_rejected_unless_allowed() {
        for raw in [
            "http://localhost/feed",
            "http://127.0.0.1/feed",
            "http://[::1]/feed",
            "http://192.168.1.1/feed",
            "http://10.0.0.1:3000/feed",
            "http://169.254.1.1/feed",
            "http://[fe80::1]/feed",
            "http://0.0.0.0/feed",
        ] {
            assert!(validate_feed_url(raw, false).is_err(), "{raw} should be refused");
            assert!(validate_feed_url(raw, true).is_ok(), "{raw} should pass when allowed");
        }
    }
}
