use std::fmt;
use std::path::Path;

use anyhow::{anyhow, Context};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

pub const DEFAULT_IMAGE_MIME: &str = "image/png";

#[derive(Clone, PartialEq, Eq)]
pub struct MediaAsset {
    bytes: Vec<u8>,
    mime_type: String,
    source_name: String,
}

impl MediaAsset {
    pub fn new(
        bytes: impl Into<Vec<u8>>,
        mime_type: impl Into<String>,
        source_name: impl Into<String>,
    ) -> Self {
        let mime_type = mime_type.into();
        let mime_type = if mime_type.trim().is_empty() {
            DEFAULT_IMAGE_MIME.to_string()
        } else {
            mime_type.trim().to_ascii_lowercase()
        };
        Self {
            bytes: bytes.into(),
            mime_type,
            source_name: source_name.into(),
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("upload")
            .to_string();
        Ok(Self::new(bytes, guess_image_mime(&name), name))
    }

    /// Parses `data:<mime>;base64,<payload>`. A header without a mime type
    /// falls back to PNG.
    pub fn from_data_url(data_url: &str, source_name: impl Into<String>) -> anyhow::Result<Self> {
        let rest = data_url
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| anyhow!("not a data URL"))?;
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| anyhow!("data URL is missing its payload separator"))?;
        let Some(mime) = meta.strip_suffix(";base64") else {
            return Err(anyhow!("only base64 data URLs are supported"));
        };
        let bytes = BASE64
            .decode(payload.trim().as_bytes())
            .context("data URL base64 decode failed")?;
        Ok(Self::new(bytes, mime, source_name))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

impl fmt::Debug for MediaAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaAsset")
            .field("mime_type", &self.mime_type)
            .field("byte_len", &self.bytes.len())
            .field("source_name", &self.source_name)
            .finish()
    }
}

pub fn guess_image_mime(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "heic" | "heif" => "image/heic",
        "gif" => "image/gif",
        _ => DEFAULT_IMAGE_MIME,
    }
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    let lowered = mime.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    "png"
}

pub fn with_extension(name: &str, extension: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|value| value.to_str())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("image");
    format!("{stem}.{extension}")
}
