//! Caption generation for freshly captured photos.
//!
//! The caption service is an external collaborator. Whatever it does, a
//! capture never waits on it for visibility and never fails because of it:
//! on any error the engine substitutes [`Caption::fallback`].

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use snapboard_shared::constants::{DATE_FORMAT, FALLBACK_CAPTION, MAX_CAPTION_WORDS};
use snapboard_shared::ImageFormat;

use crate::error::CaptionError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caption {
    pub caption: String,
    pub date: String,
}

impl Caption {
    pub fn fallback(taken_at: DateTime<Utc>) -> Self {
        Self {
            caption: FALLBACK_CAPTION.to_string(),
            date: taken_at.format(DATE_FORMAT).to_string(),
        }
    }
}

#[async_trait]
pub trait CaptionGenerator: Send + Sync {
    async fn describe(&self, image: &[u8], format: ImageFormat) -> Result<Caption, CaptionError>;
}

/// Used when no caption service is configured; every photo gets the
/// fallback caption.
pub struct OfflineCaptioner;

#[async_trait]
impl CaptionGenerator for OfflineCaptioner {
    async fn describe(&self, _image: &[u8], _format: ImageFormat) -> Result<Caption, CaptionError> {
        Err(CaptionError::Unavailable)
    }
}

/// Posts the image as base64 JSON and expects `{ "caption", "date" }` back.
pub struct HttpCaptioner {
    client: Client,
    url: String,
}

impl HttpCaptioner {
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> Result<Self, CaptionError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl CaptionGenerator for HttpCaptioner {
    async fn describe(&self, image: &[u8], format: ImageFormat) -> Result<Caption, CaptionError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&json!({
                "image": STANDARD.encode(image),
                "mime": format.mime(),
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(CaptionError::Status(resp.status().as_u16()));
        }

        let mut caption: Caption = resp.json().await?;
        caption.caption = clamp_words(&caption.caption, MAX_CAPTION_WORDS);
        if caption.caption.is_empty() {
            return Err(CaptionError::Empty);
        }
        Ok(caption)
    }
}

/// Keep at most `max` whitespace-separated words, trimming stray quotes.
pub fn clamp_words(text: &str, max: usize) -> String {
    text.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .split_whitespace()
        .take(max)
        .collect::<Vec<_>>()
        .join(" ")
}
