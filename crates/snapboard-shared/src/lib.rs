// Types shared by the local mirror, the remote repository and the sync engine.

pub mod constants;
pub mod error;
pub mod image;
pub mod types;

pub use error::FailureClass;
pub use image::ImageFormat;
pub use types::{newest_first, sort_newest_first, ImageLocation, PhotoId, PhotoPatch, PhotoRecord};
