//! Hosting for uploaded pictures.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use mime_guess::from_path;
use spin_sdk::http::{Request, Response};
use tracing::info;

use crate::config::{media_key, MAX_IMAGE_BYTES};
use crate::core::db::DocumentStore;
use crate::core::errors::ApiError;
use crate::core::form::{multipart_boundary, parse_multipart};
use crate::core::helpers::{new_id, parse_json_body};

/// Raster formats only. Anything that can carry script is refused.
const ALLOWED_IMAGE_TYPES: [(&str, &str); 4] = [
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
];

/// Field names an image may arrive under.
const IMAGE_FIELDS: [&str; 2] = ["file", "image"];

/// Remote asset hosting. `upload` returns the public URL of the stored file.
pub trait MediaHost {
    fn upload(&self, bytes: &[u8], content_type: &str) -> anyhow::Result<String>;

    /// Returns the bytes and content type of a previously uploaded file.
    fn fetch(&self, file: &str) -> anyhow::Result<Option<(Vec<u8>, String)>>;
}

/// Keeps uploads in the document store, served back under `/media/{file}`.
#[derive(Clone)]
pub struct StoreMediaHost<S> {
    store: S,
    base_url: String,
}

impl<S: DocumentStore> StoreMediaHost<S> {
    pub fn new(store: S, base_url: impl Into<String>) -> Self {
        Self {
            store,
            base_url: base_url.into(),
        }
    }
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    ALLOWED_IMAGE_TYPES
        .iter()
        .find(|(mime, _)| *mime == content_type)
        .map(|(_, ext)| *ext)
}

impl<S: DocumentStore> MediaHost for StoreMediaHost<S> {
    fn upload(&self, bytes: &[u8], content_type: &str) -> anyhow::Result<String> {
        let ext = extension_for(content_type)
            .ok_or_else(|| anyhow::anyhow!("refusing to host {}", content_type))?;
        let file = format!("{}.{}", new_id(), ext);

        self.store.set(&media_key(&file), bytes)?;
        info!(file = %file, size = bytes.len(), "stored upload");

        Ok(format!("{}/media/{}", self.base_url, file))
    }

    fn fetch(&self, file: &str) -> anyhow::Result<Option<(Vec<u8>, String)>> {
        let Some(bytes) = self.store.get(&media_key(file))? else {
            return Ok(None);
        };
        let mime = from_path(file).first_or_octet_stream();
        Ok(Some((bytes, mime.to_string())))
    }
}

/// A validated image ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageUpload {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(content_type: &str, bytes: Vec<u8>) -> Result<Self, ApiError> {
        let mut content_type = content_type.trim().to_ascii_lowercase();
        if content_type == "image/jpg" {
            content_type = "image/jpeg".to_string();
        }
        if extension_for(&content_type).is_none() {
            return Err(ApiError::validation(
                "Only PNG, JPEG, GIF or WebP images are accepted",
            ));
        }
        if bytes.is_empty() {
            return Err(ApiError::validation("Image is empty"));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(ApiError::validation("Image too large"));
        }
        Ok(Self {
            content_type,
            bytes,
        })
    }
}

/// Decodes a `data:<type>;base64,<payload>` image.
pub fn parse_data_uri(uri: &str) -> Result<ImageUpload, ApiError> {
    let rest = uri
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| ApiError::validation("Image must be a data URI"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| ApiError::validation("Image must be a data URI"))?;
    let content_type = meta
        .strip_suffix(";base64")
        .ok_or_else(|| ApiError::validation("Image must be base64 encoded"))?;

    // Rough bound before decoding; base64 inflates by 4/3.
    if payload.len() > MAX_IMAGE_BYTES / 3 * 4 + 4 {
        return Err(ApiError::validation("Image too large"));
    }
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|_| ApiError::validation("Image is not valid base64"))?;

    ImageUpload::new(content_type, bytes)
}

/// Text fields and an optional image from an upload request.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub fields: HashMap<String, String>,
    pub image: Option<ImageUpload>,
}

/// Accepts either `multipart/form-data` with the image as a `file` part, or a
/// JSON object with the image as a data URI under `file` or `image`.
pub fn read_upload_form(req: &Request) -> Result<UploadForm, ApiError> {
    if let Some(boundary) = multipart_boundary(req) {
        let mut form = parse_multipart(req.body().to_vec(), boundary)?;
        let image = match form.take_file(&IMAGE_FIELDS) {
            // Browsers send an empty part when no file was picked.
            Some(part) if !part.bytes.is_empty() => {
                let content_type = part
                    .content_type
                    .or_else(|| {
                        part.file_name
                            .as_deref()
                            .and_then(|name| from_path(name).first())
                            .map(|mime| mime.essence_str().to_string())
                    })
                    .unwrap_or_default();
                Some(ImageUpload::new(&content_type, part.bytes)?)
            }
            _ => None,
        };
        return Ok(UploadForm {
            fields: form.fields,
            image,
        });
    }

    let body: HashMap<String, serde_json::Value> = parse_json_body(req)?;
    let mut fields: HashMap<String, String> = body
        .into_iter()
        .filter_map(|(key, value)| match value {
            serde_json::Value::String(text) => Some((key, text)),
            _ => None,
        })
        .collect();

    let data_uri = IMAGE_FIELDS
        .iter()
        .filter_map(|name| fields.remove(*name))
        .find(|uri| !uri.trim().is_empty());
    let image = data_uri.as_deref().map(parse_data_uri).transpose()?;

    Ok(UploadForm { fields, image })
}

/// Uploads the image if there is one; `Ok(None)` when none was sent.
pub fn upload_optional<M: MediaHost>(
    media: &M,
    image: Option<&ImageUpload>,
) -> Result<Option<String>, ApiError> {
    match image {
        Some(image) => Ok(Some(media.upload(&image.bytes, &image.content_type)?)),
        None => Ok(None),
    }
}

// === HTTP Handlers ===

pub fn serve_media<M: MediaHost>(media: &M, file: &str) -> Result<Response, ApiError> {
    if file.is_empty() || file.contains('/') || file.contains("..") {
        return Err(ApiError::not_found("File not found"));
    }

    let (bytes, content_type) = media
        .fetch(file)?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    Ok(Response::builder()
        .status(200)
        .header("Content-Type", content_type)
        .header("X-Content-Type-Options", "nosniff")
        .header("Content-Security-Policy", "default-src 'none'; sandbox")
        .header("Cache-Control", "public, max-age=31536000, immutable")
        .body(bytes)
        .build())
}
