//! Image format sniffing and inline (data URL) encoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    /// Detect the format from magic bytes. Anything that is not a JPEG is
    /// treated as PNG, which is what canvas captures produce.
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Self::Jpeg
        } else {
            Self::Png
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    /// Infer the format from the extension of a stored location.
    pub fn from_location(location: &str) -> Self {
        let lower = location.to_ascii_lowercase();
        if lower.ends_with(".jpg") || lower.ends_with(".jpeg") || lower.starts_with("data:image/jpeg")
        {
            Self::Jpeg
        } else {
            Self::Png
        }
    }
}

/// Encode raw image bytes as a `data:` URL.
pub fn to_data_url(bytes: &[u8], format: ImageFormat) -> String {
    format!("data:{};base64,{}", format.mime(), STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn sniff_detects_jpeg_and_defaults_to_png() {
        assert_eq!(ImageFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::sniff(PNG_MAGIC), ImageFormat::Png);
        assert_eq!(ImageFormat::sniff(b""), ImageFormat::Png);
    }

    #[test]
    fn data_url_carries_mime_and_payload() {
        let url = to_data_url(PNG_MAGIC, ImageFormat::Png);
        assert_eq!(url, format!("data:image/png;base64,{}", STANDARD.encode(PNG_MAGIC)));

        let jpeg = to_data_url(&[0xFF, 0xD8, 0xFF], ImageFormat::Jpeg);
        assert!(jpeg.starts_with("data:image/jpeg;base64,"));
        assert_eq!(ImageFormat::from_location(&jpeg), ImageFormat::Jpeg);
    }

    #[test]
    fn location_extension_picks_format() {
        assert_eq!(
            ImageFormat::from_location("https://x/public/abc.JPG"),
            ImageFormat::Jpeg
        );
        assert_eq!(ImageFormat::from_location("https://x/public/abc.png"), ImageFormat::Png);
    }
}
