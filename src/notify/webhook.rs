use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use super::{Card, Message, Notifier};
use crate::util::{summary_to_plain, truncate_chars};

// Embed field limits of the chat API
const MAX_TITLE_CHARS: usize = 256;
const MAX_DESCRIPTION_CHARS: usize = 400;
const MAX_AUTHOR_CHARS: usize = 256;
const MAX_CONTENT_CHARS: usize = 2000;

/// A post the channel did not accept.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Channel rejected message: status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("Channel did not answer within {0:?}")]
    Timeout(Duration),
}

/// Posts messages to an incoming-webhook URL (Discord-compatible JSON:
/// `content` for text, `embeds` for cards).
///
/// Alerts go to `alert_webhook` when configured, else to the main webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    webhook: SecretString,
    alert_webhook: Option<SecretString>,
    timeout: Duration,
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("webhook", &"[REDACTED]")
            .field("alert_webhook", &self.alert_webhook.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl WebhookNotifier {
    pub fn new(
        client: reqwest::Client,
        webhook: SecretString,
        alert_webhook: Option<SecretString>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            webhook,
            alert_webhook,
            timeout,
        }
    }

    /// Post one payload, mapping every failure to a [`DeliveryError`].
    pub async fn post(&self, url: &SecretString, payload: &Value) -> Result<(), DeliveryError> {
        let response = tokio::time::timeout(
            self.timeout,
            self.client.post(url.expose_secret()).json(payload).send(),
        )
        .await
        .map_err(|_| DeliveryError::Timeout(self.timeout))??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body: truncate_chars(body.trim(), 200).into_owned(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &Message) -> bool {
        match self.post(&self.webhook, &render(message)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to post message");
                false
            }
        }
    }

    async fn alert(&self, text: &str) -> bool {
        let target = self.alert_webhook.as_ref().unwrap_or(&self.webhook);
        let payload = render(&Message::Text(format!("⚠️ {text}")));
        match self.post(target, &payload).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to post alert");
                false
            }
        }
    }
}

/// Build the webhook JSON body for a message.
pub(crate) fn render(message: &Message) -> Value {
    match message {
        Message::Text(text) => json!({
            "content": truncate_chars(text, MAX_CONTENT_CHARS),
            "allowed_mentions": { "parse": [] },
        }),
        Message::Card(card) => json!({
            "embeds": [render_card(card)],
            "allowed_mentions": { "parse": [] },
        }),
    }
}

fn render_card(card: &Card) -> Value {
    let mut embed = json!({
        "title": truncate_chars(&card.title, MAX_TITLE_CHARS),
        "author": { "name": truncate_chars(&card.feed, MAX_AUTHOR_CHARS) },
    });

    if let Some(link) = &card.link {
        embed["url"] = json!(link);
    }
    if let Some(summary) = &card.summary {
        let plain = summary_to_plain(summary);
        if !plain.is_empty() {
            embed["description"] = json!(truncate_chars(&plain, MAX_DESCRIPTION_CHARS));
        }
    }
    if let Some(ts) = card.published_at {
        embed["timestamp"] = json!(ts.to_rfc3339());
    }
    embed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn card() -> Card {
        Card {
            feed: "Example Feed".into(),
            title: "Hello".into(),
            link: Some("https://example.com/hello".into()),
            summary: Some("<p>Some <b>bold</b> text</p>".into()),
            published_at: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
        }
    }

    fn notifier(server: &MockServer, alert: bool) -> WebhookNotifier {
        WebhookNotifier::new(
            reqwest::Client::new(),
            SecretString::from(format!("{}/hook", server.uri())),
            alert.then(|| SecretString::from(format!("{}/alerts", server.uri()))),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_render_card() {
        let payload = render(&Message::Card(card()));
        let embed = &payload["embeds"][0];
        assert_eq!(embed["title"], "Hello");
        assert_eq!(embed["url"], "https://example.com/hello");
        assert_eq!(embed["description"], "Some bold text");
        assert_eq!(embed["author"]["name"], "Example Feed");
        assert_eq!(embed["timestamp"], "2024-01-02T03:04:05+00:00");
        assert_eq!(payload["allowed_mentions"]["parse"], json!([]));
    }

    #[test]
    fn test_render_card_without_optionals() {
        let bare = Card {
            link: None,
            summary: Some("<br/>".into()),
            published_at: None,
            ..card()
        };
        let embed = &render(&Message::Card(bare))["embeds"][0];
        assert!(embed.get("url").is_none());
        assert!(embed.get("description").is_none());
        assert!(embed.get("timestamp").is_none());
    }

    #[test]
    fn test_render_text_truncates() {
        let long = "x".repeat(MAX_CONTENT_CHARS + 50);
        let payload = render(&Message::Text(long));
        assert_eq!(
            payload["content"].as_str().unwrap().chars().count(),
            MAX_CONTENT_CHARS
        );
    }

    #[test]
    fn test_debug_redacts_urls() {
        let n = WebhookNotifier::new(
            reqwest::Client::new(),
            SecretString::from("https://chat.example.com/hook/secret-token".to_string()),
            None,
            Duration::from_secs(1),
        );
        let out = format!("{n:?}");
        assert!(!out.contains("secret-token"));
        assert!(out.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_send_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        assert!(notifier(&server, false).send(&Message::Card(card())).await);

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["embeds"][0]["title"], "Hello");
    }

    #[tokio::test]
    async fn test_send_rejection_returns_false() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let n = notifier(&server, false);
        assert!(!n.send(&Message::Text("hi".into())).await);

        let err = n
            .post(&n.webhook, &render(&Message::Text("hi".into())))
            .await
            .unwrap_err();
        match err {
            DeliveryError::Rejected { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "slow down");
            }
            e => panic!("expected rejection, got {e:?}"),
        }
    }

    #[tokio::test]
    async fn test_alert_uses_alert_channel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/alerts"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        assert!(notifier(&server, true).alert("three feeds failed").await);
    }

    #[tokio::test]
    async fn test_alert_falls_back_to_main_channel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        assert!(notifier(&server, false).alert("three feeds failed").await);
    }
}
