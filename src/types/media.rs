//! Media attachment types (image, audio, video, file).

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Image attachment, inline (base64) or by URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Image {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Image {
    /// Encode raw bytes as an inline base64 image.
    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Self {
            data: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            url: None,
            mime_type: Some(mime_type.into()),
        }
    }

    /// Reference an image by URL.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            data: None,
            url: Some(url.into()),
            mime_type: None,
        }
    }
}

/// Audio attachment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Audio {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Video attachment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Video {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Generic file attachment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FileAttachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}
