//! `multipart/form-data` bodies.

use std::collections::HashMap;
use std::convert::Infallible;

use futures::executor::block_on;
use futures::stream;
use spin_sdk::http::Request;

use crate::core::errors::ApiError;

#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct MultipartForm {
    pub fields: HashMap<String, String>,
    pub files: Vec<FilePart>,
}

impl MultipartForm {
    /// First file part sent under one of `names`.
    pub fn take_file(&mut self, names: &[&str]) -> Option<FilePart> {
        let index = self.files.iter().position(|f| names.contains(&f.name.as_str()))?;
        Some(self.files.remove(index))
    }
}

/// The boundary, if the request declares a multipart body.
pub fn multipart_boundary(req: &Request) -> Option<String> {
    let content_type = req.header("Content-Type").and_then(|h| h.as_str())?;
    multer::parse_boundary(content_type).ok()
}

fn malformed(e: multer::Error) -> ApiError {
    ApiError::validation(format!("Malformed multipart body: {}", e))
}

/// Parts with a file name or a content type are files, the rest text fields.
pub fn parse_multipart(body: Vec<u8>, boundary: String) -> Result<MultipartForm, ApiError> {
    let chunks = stream::once(async move { Ok::<_, Infallible>(body) });
    let mut multipart = multer::Multipart::new(chunks, boundary);

    block_on(async move {
        let mut form = MultipartForm::default();
        while let Some(field) = multipart.next_field().await.map_err(malformed)? {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(|m| m.essence_str().to_string());

            if file_name.is_some() || content_type.is_some() {
                let bytes = field.bytes().await.map_err(malformed)?.to_vec();
                form.files.push(FilePart {
                    name,
                    file_name,
                    content_type,
                    bytes,
                });
            } else {
                let text = field.text().await.map_err(malformed)?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    })
}

#[cfg(test)]
pub(crate) fn multipart_body(boundary: &str, fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    if let Some((name, content_type, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"upload\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}
