use async_trait::async_trait;
use tokio::sync::broadcast;

use snapboard_shared::{ImageFormat, PhotoId, PhotoPatch};

use crate::error::RemoteError;
use crate::row::{NewPhotoRow, PhotoRow};

/// A change made to the remote table by any client.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Inserted(PhotoRow),
    Updated(PhotoRow),
    Deleted(PhotoId),
}

/// The remote side of the board: a `photos` table and an image bucket.
#[async_trait]
pub trait PhotoRepository: Send + Sync {
    async fn insert(&self, row: &NewPhotoRow) -> Result<(), RemoteError>;

    /// Write the columns present in `patch`; other columns are untouched.
    async fn update(&self, id: PhotoId, patch: &PhotoPatch) -> Result<(), RemoteError>;

    async fn delete(&self, id: PhotoId) -> Result<(), RemoteError>;

    async fn delete_all(&self) -> Result<(), RemoteError>;

    /// The newest `limit` rows, newest first by insert time.
    async fn list_recent(&self, limit: u32) -> Result<Vec<PhotoRow>, RemoteError>;

    /// Push channel of changes, or `None` when the transport has none.
    fn subscribe(&self) -> Option<broadcast::Receiver<ChangeEvent>>;

    /// Store an image and return its public URL.
    async fn upload_image(
        &self,
        id: PhotoId,
        bytes: &[u8],
        format: ImageFormat,
    ) -> Result<String, RemoteError>;

    async fn delete_image(&self, id: PhotoId, format: ImageFormat) -> Result<(), RemoteError>;

    /// Remove every image under this repository's scope.
    async fn delete_all_images(&self) -> Result<(), RemoteError>;
}

/// Object key of a photo's image: `<scope>/<id>.<ext>`.
pub fn object_path(scope: &str, id: PhotoId, format: ImageFormat) -> String {
    format!("{}/{}.{}", scope, id, format.extension())
}
