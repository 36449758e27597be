use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Result, UpmuxError};
use crate::metadata::{keys, MetadataBag};

const COLOR_UPLOADED: u32 = 0x449900;
const COLOR_SYNC_FAILED: u32 = 0xFFCC00;
const COLOR_QUARANTINED: u32 = 0xFF0066;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeKind {
    Uploaded,
    SyncFailed(String),
    Quarantined(String),
}

/// One run outcome as reported to operators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub identifier: String,
    pub uploader: String,
    pub channel: String,
    pub properties: String,
    pub source: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, identifier: &str, bag: &MetadataBag) -> Self {
        let unknown = || "?".to_string();
        Self {
            kind,
            identifier: identifier.to_string(),
            uploader: bag.text(keys::UPLOADER).unwrap_or_else(unknown),
            channel: bag.text(keys::ARTIST).unwrap_or_else(unknown),
            properties: bag.properties_summary(),
            source: bag.text(keys::DOCUMENT_SOURCE).unwrap_or_else(unknown),
        }
    }

    pub fn title(&self) -> &'static str {
        match self.kind {
            NoticeKind::Uploaded => "Uploaded",
            NoticeKind::SyncFailed(_) => "Sync failed",
            NoticeKind::Quarantined(_) => "Quarantined",
        }
    }

    pub fn color(&self) -> u32 {
        match self.kind {
            NoticeKind::Uploaded => COLOR_UPLOADED,
            NoticeKind::SyncFailed(_) => COLOR_SYNC_FAILED,
            NoticeKind::Quarantined(_) => COLOR_QUARANTINED,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match &self.kind {
            NoticeKind::Uploaded => None,
            NoticeKind::SyncFailed(d) | NoticeKind::Quarantined(d) => Some(d),
        }
    }

    /// Webhook body carrying a single embed
    pub fn embed_payload(&self) -> Value {
        let field = |name: &str, value: &str| json!({"name": name, "value": value, "inline": true});

        let mut embed = json!({
            "title": self.title(),
            "color": self.color(),
            "fields": [
                field("Uploader", &self.uploader),
                field("Video ID", &self.identifier),
                field("Channel", &self.channel),
                field("Properties", &self.properties),
                field("Metadata source", &self.source),
            ],
        });
        if let Some(detail) = self.detail() {
            embed["description"] = Value::String(detail.to_string());
        }

        json!({ "embeds": [embed] })
    }
}

/// Delivers run outcomes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &Notice) -> Result<()>;
}

/// Posts notices to a chat webhook
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notice: &Notice) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&notice.embed_payload())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(UpmuxError::Notify(format!(
                "Webhook rejected notice with {}: {}",
                status, body
            )));
        }
        info!("Sent {} notice for {}", notice.title(), notice.identifier);
        Ok(())
    }
}

/// Used when no webhook is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &Notice) -> Result<()> {
        info!(
            "{} {}: uploader={} channel={} [{}] source={}{}",
            notice.title(),
            notice.identifier,
            notice.uploader,
            notice.channel,
            notice.properties,
            notice.source,
            notice.detail().map(|d| format!(" ({})", d)).unwrap_or_default()
        );
        Ok(())
    }
}

/// Notify, logging delivery failures instead of failing the run
pub async fn deliver(notifier: &dyn Notifier, notice: Notice) {
    if let Err(e) = notifier.notify(&notice).await {
        warn!("Could not deliver {} notice: {}", notice.title(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag() -> MetadataBag {
        let mut bag = MetadataBag::new();
        bag.set(keys::UPLOADER, "ip:abc");
        bag.set(keys::ARTIST, "Some Channel");
        bag.set(keys::DURATION, 212.4);
        bag.set(keys::RESOLUTION, "1920x1080");
        bag.set(keys::VIDEO_CODEC, "vp9");
        bag.set(keys::AUDIO_CODEC, "opus");
        bag.set(keys::DOCUMENT_SOURCE, "provided");
        bag
    }

    #[test]
    fn uploaded_embed_has_all_fields() {
        let payload = Notice::new(NoticeKind::Uploaded, "dQw4w9WgXcQ", &bag()).embed_payload();
        let embed = &payload["embeds"][0];
        assert_eq!(embed["title"], "Uploaded");
        assert_eq!(embed["color"], 0x449900);
        assert!(embed.get("description").is_none());

        let fields = embed["fields"].as_array().unwrap();
        let names: Vec<&str> = fields.iter().map(|f| f["name"].as_str().unwrap()).collect();
        assert_eq!(
            names,
            vec!["Uploader", "Video ID", "Channel", "Properties", "Metadata source"]
        );
        assert_eq!(fields[3]["value"], "212s, 1920x1080 vp9/opus");
        assert!(fields.iter().all(|f| f["inline"] == true));
    }

    #[test]
    fn failures_carry_their_reason() {
        let synced = Notice::new(
            NoticeKind::SyncFailed("ERROR 1: quota".to_string()),
            "dQw4w9WgXcQ",
            &bag(),
        );
        assert_eq!(synced.color(), 0xFFCC00);
        assert_eq!(synced.embed_payload()["embeds"][0]["description"], "ERROR 1: quota");

        let held = Notice::new(
            NoticeKind::Quarantined("bad".to_string()),
            "dQw4w9WgXcQ",
            &MetadataBag::new(),
        );
        assert_eq!(held.title(), "Quarantined");
        assert_eq!(held.color(), 0xFF0066);
        assert_eq!(held.uploader, "?");
    }

    #[tokio::test]
    async fn delivery_errors_are_swallowed() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .times(1)
            .returning(|_| Err(UpmuxError::Notify("down".to_string())));
        deliver(&notifier, Notice::new(NoticeKind::Uploaded, "dQw4w9WgXcQ", &bag())).await;
    }
}
