//! HTTP backend: a PostgREST table API plus a storage API, both under one
//! base URL and authorised with an anonymous API key.
//!
//! This transport has no push channel; the sync engine's polling covers
//! changes made by other clients.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::debug;

use snapboard_shared::constants::{DEFAULT_BUCKET, DEFAULT_SCOPE, PHOTOS_TABLE};
use snapboard_shared::{ImageFormat, PhotoId, PhotoPatch};

use crate::error::{RemoteError, RemoteErrorKind};
use crate::repository::{object_path, ChangeEvent, PhotoRepository};
use crate::row::{NewPhotoRow, PatchRow, PhotoRow};

/// Connection settings for [`RestRepository`].
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Project URL, e.g. `https://xyz.example.co`.
    pub base_url: String,
    /// Anonymous (public) API key.
    pub api_key: String,
    pub bucket: String,
    /// First path segment of every object key.
    pub scope: String,
    /// Per-request timeout; `None` keeps the client default.
    pub timeout: Option<Duration>,
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            bucket: DEFAULT_BUCKET.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            timeout: None,
        }
    }
}

pub struct RestRepository {
    client: Client,
    config: RestConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Surface {
    Table,
    Storage,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StorageObject {
    name: String,
}

/// Turn a failed response into a typed error.
fn classify(surface: Surface, status: u16, body: &str) -> RemoteError {
    let parsed: Option<ApiErrorBody> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|b| b.message.clone().or_else(|| b.error.clone()))
        .unwrap_or_else(|| format!("HTTP {}: {}", status, body));

    let kind = match surface {
        Surface::Table => parsed
            .as_ref()
            .and_then(|b| b.code.as_deref())
            .and_then(RemoteErrorKind::from_pg_code)
            .unwrap_or(match status {
                404 => RemoteErrorKind::TableNotFound,
                other => RemoteErrorKind::from_status(other),
            }),
        Surface::Storage => {
            let bucket_missing = status == 404
                || parsed.as_ref().is_some_and(|b| {
                    b.error.as_deref() == Some("Bucket not found")
                        || b.message.as_deref() == Some("Bucket not found")
                });
            if bucket_missing {
                RemoteErrorKind::StorageUnavailable
            } else {
                RemoteErrorKind::from_status(status)
            }
        }
    };

    RemoteError::new(kind, message)
}

async fn check(resp: Response, surface: Surface) -> Result<Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(classify(surface, status.as_u16(), &body))
}

impl RestRepository {
    pub fn new(config: RestConfig) -> Result<Self, RemoteError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self { client, config })
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base(), PHOTOS_TABLE)
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base(), self.config.bucket, key)
    }

    fn public_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base(),
            self.config.bucket,
            key
        )
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
    }
}

#[async_trait]
impl PhotoRepository for RestRepository {
    async fn insert(&self, row: &NewPhotoRow) -> Result<(), RemoteError> {
        debug!(id = %row.id, columns = row.columns().len(), "inserting photo row");
        let resp = self
            .authed(self.client.post(self.table_url()))
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await?;
        check(resp, Surface::Table).await?;
        Ok(())
    }

    async fn update(&self, id: PhotoId, patch: &PhotoPatch) -> Result<(), RemoteError> {
        let resp = self
            .authed(self.client.patch(self.table_url()))
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=minimal")
            .json(&PatchRow::from(patch))
            .send()
            .await?;
        check(resp, Surface::Table).await?;
        Ok(())
    }

    async fn delete(&self, id: PhotoId) -> Result<(), RemoteError> {
        let resp = self
            .authed(self.client.delete(self.table_url()))
            .query(&[("id", format!("eq.{}", id))])
            .send()
            .await?;
        check(resp, Surface::Table).await?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), RemoteError> {
        // PostgREST refuses an unfiltered DELETE
        let resp = self
            .authed(self.client.delete(self.table_url()))
            .query(&[("id", "not.is.null")])
            .send()
            .await?;
        check(resp, Surface::Table).await?;
        Ok(())
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<PhotoRow>, RemoteError> {
        let limit = limit.to_string();
        let resp = self
            .authed(self.client.get(self.table_url()))
            .query(&[
                ("select", "*"),
                ("order", "created_at.desc"),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;
        let rows = check(resp, Surface::Table)
            .await?
            .json::<Vec<PhotoRow>>()
            .await?;

        debug!(count = rows.len(), "fetched recent photos");
        Ok(rows)
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ChangeEvent>> {
        None
    }

    async fn upload_image(
        &self,
        id: PhotoId,
        bytes: &[u8],
        format: ImageFormat,
    ) -> Result<String, RemoteError> {
        let key = object_path(&self.config.scope, id, format);
        let resp = self
            .authed(self.client.post(self.object_url(&key)))
            .header("content-type", format.mime())
            .header("x-upsert", "true")
            .body(bytes.to_vec())
            .send()
            .await?;
        check(resp, Surface::Storage).await?;

        debug!(id = %id, key = %key, size = bytes.len(), "uploaded image");
        Ok(self.public_url(&key))
    }

    async fn delete_image(&self, id: PhotoId, format: ImageFormat) -> Result<(), RemoteError> {
        let key = object_path(&self.config.scope, id, format);
        let resp = self
            .authed(self.client.delete(self.object_url(&key)))
            .send()
            .await?;
        check(resp, Surface::Storage).await?;
        Ok(())
    }

    async fn delete_all_images(&self) -> Result<(), RemoteError> {
        let list_url = format!(
            "{}/storage/v1/object/list/{}",
            self.base(),
            self.config.bucket
        );
        let resp = self
            .authed(self.client.post(list_url))
            .json(&json!({ "prefix": self.config.scope, "limit": 1000, "offset": 0 }))
            .send()
            .await?;
        let objects = check(resp, Surface::Storage)
            .await?
            .json::<Vec<StorageObject>>()
            .await?;

        if objects.is_empty() {
            return Ok(());
        }

        let prefixes: Vec<String> = objects
            .iter()
            .map(|o| format!("{}/{}", self.config.scope, o.name))
            .collect();
        let bucket_url = format!("{}/storage/v1/object/{}", self.base(), self.config.bucket);
        let resp = self
            .authed(self.client.delete(bucket_url))
            .json(&json!({ "prefixes": prefixes }))
            .send()
            .await?;
        check(resp, Surface::Storage).await?;

        debug!(count = prefixes.len(), "deleted all images");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_table_codes() {
        let body = r#"{"code":"42P01","message":"relation \"public.photos\" does not exist"}"#;
        let e = classify(Surface::Table, 404, body);
        assert_eq!(e.kind, RemoteErrorKind::TableNotFound);
        assert_eq!(e.message, "relation \"public.photos\" does not exist");

        let body = r#"{"code":"PGRST205","message":"Could not find the table 'public.photos'"}"#;
        assert_eq!(classify(Surface::Table, 404, body).kind, RemoteErrorKind::TableNotFound);
    }

    #[test]
    fn schema_drift_codes() {
        let body = r#"{"code":"PGRST204","message":"Could not find the 'bio' column"}"#;
        assert_eq!(classify(Surface::Table, 400, body).kind, RemoteErrorKind::ColumnNotFound);

        let body = r#"{"code":"42703","message":"column \"bio\" does not exist"}"#;
        assert_eq!(classify(Surface::Table, 400, body).kind, RemoteErrorKind::ColumnNotFound);
    }

    #[test]
    fn policy_and_status_fallbacks() {
        let body = r#"{"code":"42501","message":"new row violates row-level security policy"}"#;
        assert_eq!(classify(Surface::Table, 403, body).kind, RemoteErrorKind::PermissionDenied);
        assert_eq!(classify(Surface::Table, 401, "").kind, RemoteErrorKind::PermissionDenied);
        assert_eq!(classify(Surface::Table, 502, "<html>").kind, RemoteErrorKind::Transient);
    }

    #[test]
    fn storage_bucket_missing() {
        let body = r#"{"statusCode":"404","error":"Bucket not found","message":"Bucket not found"}"#;
        assert_eq!(
            classify(Surface::Storage, 400, body).kind,
            RemoteErrorKind::StorageUnavailable
        );
        assert_eq!(classify(Surface::Storage, 404, "").kind, RemoteErrorKind::StorageUnavailable);
        assert_eq!(classify(Surface::Storage, 500, "").kind, RemoteErrorKind::Transient);
    }

    #[test]
    fn urls_are_built_from_config() {
        let mut config = RestConfig::new("https://board.example/", "anon");
        config.scope = "public".into();
        let repo = RestRepository::new(config).unwrap();
        let key = object_path("public", PhotoId(uuid::Uuid::nil()), ImageFormat::Png);

        assert_eq!(repo.table_url(), "https://board.example/rest/v1/photos");
        assert_eq!(
            repo.public_url(&key),
            "https://board.example/storage/v1/object/public/photos/public/00000000-0000-0000-0000-000000000000.png"
        );
    }

    #[test]
    fn no_push_channel() {
        let repo = RestRepository::new(RestConfig::new("http://localhost:1", "anon")).unwrap();
        assert!(repo.subscribe().is_none());
    }
}
