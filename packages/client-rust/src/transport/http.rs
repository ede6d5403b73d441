//! HTTP implementation of [`CatalogTransport`] over `reqwest`.
//!
//! Maps status codes onto the transport error taxonomy, including the
//! structured `404 version_too_old` and `410 events_pruned` bodies of the
//! sync endpoints.

use async_trait::async_trait;
use chorus_core::messages::catalog::{
    SkeletonDelta, SkeletonSnapshot, SkeletonVersion, VersionTooOldBody,
};
use chorus_core::messages::user_sync::{EventBatch, UserStateSnapshot};
use chorus_core::types::{Album, Artist, Track};
use http::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{CatalogTransport, TransportError, UserMutation};

/// REST client for the catalog server.
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport against `base_url` (trailing slash tolerated).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, TransportError> {
        debug!(path, "GET");
        self.client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let response = self.get(path).await?;
        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| TransportError::Malformed(e.to_string())),
            status => Err(Self::classify_status(status)),
        }
    }

    fn classify_status(status: StatusCode) -> TransportError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportError::Unauthorized,
            StatusCode::NOT_FOUND => TransportError::NotFound,
            status if status.is_server_error() => {
                TransportError::Network(format!("server error {status}"))
            }
            status => TransportError::Unexpected {
                status: status.as_u16(),
            },
        }
    }
}

#[async_trait]
impl CatalogTransport for HttpTransport {
    async fn fetch_artist(&self, id: &str) -> Result<Artist, TransportError> {
        self.get_json(&format!("/v1/content/artist/{id}")).await
    }

    async fn fetch_album(&self, id: &str) -> Result<Album, TransportError> {
        self.get_json(&format!("/v1/content/album/{id}")).await
    }

    async fn fetch_track(&self, id: &str) -> Result<Track, TransportError> {
        self.get_json(&format!("/v1/content/track/{id}")).await
    }

    async fn fetch_skeleton(&self) -> Result<SkeletonSnapshot, TransportError> {
        self.get_json("/v1/catalog/skeleton").await
    }

    async fn fetch_skeleton_version(&self) -> Result<SkeletonVersion, TransportError> {
        self.get_json("/v1/catalog/skeleton/version").await
    }

    async fn fetch_skeleton_delta(&self, since: u64) -> Result<SkeletonDelta, TransportError> {
        let response = self
            .get(&format!("/v1/catalog/skeleton/delta?since={since}"))
            .await?;
        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| TransportError::Malformed(e.to_string())),
            StatusCode::NOT_FOUND => {
                // A structured body distinguishes a pruned delta base from a
                // plain missing route.
                match response.json::<VersionTooOldBody>().await {
                    Ok(body) if body.error == "version_too_old" => {
                        Err(TransportError::VersionTooOld {
                            earliest_available: body.earliest_available,
                            current_version: body.current_version,
                        })
                    }
                    _ => Err(TransportError::NotFound),
                }
            }
            status => Err(Self::classify_status(status)),
        }
    }

    async fn fetch_user_state(&self) -> Result<UserStateSnapshot, TransportError> {
        self.get_json("/v1/sync/state").await
    }

    async fn fetch_user_events(&self, since: u64) -> Result<EventBatch, TransportError> {
        let response = self.get(&format!("/v1/sync/events?since={since}")).await?;
        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| TransportError::Malformed(e.to_string())),
            StatusCode::GONE => Err(TransportError::EventsPruned),
            status => Err(Self::classify_status(status)),
        }
    }

    async fn send_user_mutation(&self, mutation: &UserMutation) -> Result<(), TransportError> {
        let (path, body) = match mutation {
            UserMutation::SetLiked { .. } => ("/v1/user/likes".to_string(), Some(mutation)),
            UserMutation::SetSetting { .. } => ("/v1/user/settings".to_string(), Some(mutation)),
            UserMutation::CreatePlaylist { .. } => {
                ("/v1/user/playlists".to_string(), Some(mutation))
            }
            UserMutation::RenamePlaylist { id, .. } => {
                (format!("/v1/user/playlists/{id}/rename"), Some(mutation))
            }
            UserMutation::DeletePlaylist { id } => {
                (format!("/v1/user/playlists/{id}/delete"), None)
            }
            UserMutation::SetPlaylistTracks { id, .. } => {
                (format!("/v1/user/playlists/{id}/tracks"), Some(mutation))
            }
            UserMutation::MarkNotificationRead { id } => {
                (format!("/v1/user/notifications/{id}/read"), None)
            }
        };

        debug!(path, "POST");
        let mut request = self.client.post(self.url(&path));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Self::classify_status(status))
        }
    }
}
