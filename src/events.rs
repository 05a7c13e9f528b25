//! Message bus surface.
//!
//! Topics are named channels carrying JSON events. Consumers register a
//! topic and receive an mpsc stream; publishers serialize into it. The unzip
//! pipeline registers exactly one consumer for its topic, which bounds
//! extraction to one concurrent job per process. Reply topics are registered
//! by whichever collaborator asked for the unzip.
//!
//! Publishing to a topic nobody has registered is not an error — the event
//! is logged and dropped, matching fire-and-forget bus semantics.

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{AppError, AppResult};

/// Topic consumed by the unzip pipeline worker.
pub const UNZIP_PIPELINE_TOPIC: &str = "fstore.unzip.pipeline";
/// Topic consumed by the image-compression collaborator.
pub const IMAGE_COMPRESS_TOPIC: &str = "fstore.image.compress.pipeline";
/// Topic consumed by the video-thumbnail collaborator.
pub const VIDEO_THUMBNAIL_TOPIC: &str = "fstore.video.thumbnail.pipeline";

// ─── Event types ──────────────────────────────────────────────────────────────

/// Internal trigger for the unzip worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnzipFileEvent {
    pub file_id: String,
    pub reply_to_event_bus: String,
    #[serde(default)]
    pub extra: String,
}

/// One stored entry in an unzip reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ZipEntry {
    pub file_id: String,
    pub md5: String,
    pub name: String,
    pub size: i64,
}

/// Reply published to the requester's bus once a zip is fully ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnzipFileReplyEvent {
    pub zip_file_id: String,
    pub zip_entries: Vec<ZipEntry>,
    #[serde(default)]
    pub extra: String,
}

/// Trigger for the external media pipelines (image compression, video
/// thumbnails). `identifier` is the collaborator's correlation handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MediaTriggerEvent {
    pub identifier: String,
    pub file_id: String,
    pub reply_to: String,
}

// ─── Bus ──────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct EventBus {
    topics: DashMap<String, mpsc::UnboundedSender<serde_json::Value>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the consumer for `topic`, replacing any previous one.
    pub fn register(&self, topic: &str) -> mpsc::UnboundedReceiver<serde_json::Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics.insert(topic.to_string(), tx);
        rx
    }

    /// Serializes `event` onto `topic`. Dropped with a warning when the topic
    /// has no live consumer.
    pub fn publish<T: Serialize>(&self, topic: &str, event: &T) -> AppResult<()> {
        let value = serde_json::to_value(event)
            .map_err(|e| AppError::Internal(format!("failed to serialize event: {e}")))?;
        match self.topics.get(topic) {
            Some(tx) => {
                if tx.send(value).is_err() {
                    tracing::warn!(topic, "consumer gone, event dropped");
                }
            }
            None => tracing::warn!(topic, "no consumer for topic, event dropped"),
        }
        Ok(())
    }

    /// Publishes an image-compression trigger for the external collaborator.
    pub fn trigger_image_compression(&self, evt: &MediaTriggerEvent) -> AppResult<()> {
        self.publish(IMAGE_COMPRESS_TOPIC, evt)
    }

    /// Publishes a video-thumbnail trigger for the external collaborator.
    pub fn trigger_video_thumbnail(&self, evt: &MediaTriggerEvent) -> AppResult<()> {
        self.publish(VIDEO_THUMBNAIL_TOPIC, evt)
    }
}

/// Deserializes a raw bus message into a typed event.
pub fn decode<T: DeserializeOwned>(value: serde_json::Value) -> AppResult<T> {
    serde_json::from_value(value)
        .map_err(|e| AppError::Internal(format!("failed to decode event: {e}")))
}
