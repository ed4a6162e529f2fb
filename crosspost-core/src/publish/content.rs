use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::error::{PublishError, PublishResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Audio,
    Image,
}

impl MediaKind {
    /// Fragment matched against a file input's `accept` attribute.
    pub fn accept_fragment(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Image => "image",
        }
    }
}

/// Reference to the media file a publication carries. Kind and MIME type
/// are inferred from the extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRef {
    pub path: PathBuf,
}

impl MediaRef {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.bin".to_string())
    }

    pub fn mime_type(&self) -> &'static str {
        match self.extension().as_deref() {
            Some("mp4") => "video/mp4",
            Some("avi") => "video/avi",
            Some("mov") => "video/quicktime",
            Some("wmv") => "video/x-ms-wmv",
            Some("webm") => "video/webm",
            Some("mp3") => "audio/mpeg",
            Some("wav") => "audio/wav",
            Some("m4a") => "audio/mp4",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("png") => "image/png",
            _ => "application/octet-stream",
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self.mime_type().split('/').next() {
            Some("video") => MediaKind::Video,
            Some("audio") => MediaKind::Audio,
            Some("image") => MediaKind::Image,
            _ => MediaKind::Video,
        }
    }
}

/// Loaded media, base64-encoded for injection through the bridge.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub file_name: String,
    pub mime_type: String,
    pub kind: MediaKind,
    pub data_base64: String,
    pub size_bytes: u64,
}

impl MediaPayload {
    pub async fn load(media: &MediaRef) -> PublishResult<Arc<Self>> {
        let bytes = tokio::fs::read(&media.path).await.map_err(|err| {
            PublishError::Validation(vec![format!(
                "media file {} is not readable: {err}",
                media.path.display()
            )])
        })?;
        Ok(Arc::new(Self::from_bytes(
            media.file_name(),
            media.mime_type().to_string(),
            media.kind(),
            &bytes,
        )))
    }

    pub fn from_bytes(file_name: String, mime_type: String, kind: MediaKind, bytes: &[u8]) -> Self {
        Self {
            file_name,
            mime_type,
            kind,
            data_base64: BASE64.encode(bytes),
            size_bytes: bytes.len() as u64,
        }
    }
}

/// Caller-supplied content. Read-only through the pipeline; adaptation
/// always produces a fresh [`AdaptedContent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub media: MediaRef,
}

impl ContentPayload {
    pub fn new<P: AsRef<Path>>(media_path: P) -> Self {
        Self {
            title: None,
            description: None,
            location: None,
            tags: Vec::new(),
            media: MediaRef::new(media_path.as_ref().to_path_buf()),
        }
    }
}

/// Platform-specific derived copy of a [`ContentPayload`].
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AdaptedContent {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_type_follows_extension() {
        let media = MediaRef::new("/videos/sample.MP4");
        assert_eq!(media.mime_type(), "video/mp4");
        assert_eq!(media.kind(), MediaKind::Video);
        assert_eq!(media.file_name(), "sample.MP4");
    }

    #[test]
    fn unknown_extension_falls_back_to_octet_stream() {
        let media = MediaRef::new("/videos/sample.xyz");
        assert_eq!(media.mime_type(), "application/octet-stream");
    }

    #[test]
    fn payload_encodes_base64() {
        let payload = MediaPayload::from_bytes(
            "clip.mp4".to_string(),
            "video/mp4".to_string(),
            MediaKind::Video,
            b"abc",
        );
        assert_eq!(payload.data_base64, "YWJj");
        assert_eq!(payload.size_bytes, 3);
    }
}
