//! Forward-only decoding of `multipart/form-data` bodies into scalar-field and
//! file-part events. File bytes are never buffered here: each part is handed
//! out as a [`FilePart`] that yields its chunks as they arrive.

use axum::extract::multipart::{Field, Multipart, MultipartError};
use bytes::Bytes;

use crate::{error::ApiError, models::upload::ObjectInfo};

#[derive(Debug, thiserror::Error)]
#[error("Malformed multipart body: {0}")]
pub struct DecodeError(String);

impl From<MultipartError> for DecodeError {
    fn from(err: MultipartError) -> Self {
        DecodeError(err.body_text())
    }
}

impl From<DecodeError> for ApiError {
    fn from(err: DecodeError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

pub enum DecodeEvent<'a> {
    Field { name: String, value: String },
    File(FilePart<'a>),
}

/// One file part. Must be drained before the decoder can move on.
pub struct FilePart<'a> {
    field: Field<'a>,
    info: ObjectInfo,
}

impl FilePart<'_> {
    pub fn info(&self) -> &ObjectInfo {
        &self.info
    }

    /// Next chunk of the part's bytes, `None` once the part is complete.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, DecodeError> {
        Ok(self.field.chunk().await?)
    }
}

pub struct MultipartDecoder {
    inner: Multipart,
    done: bool,
}

impl MultipartDecoder {
    pub fn new(inner: Multipart) -> Self {
        Self { inner, done: false }
    }

    /// Next event, or `None` at end of body. After the end or an error the
    /// decoder only returns `None`.
    pub async fn next_event(&mut self) -> Result<Option<DecodeEvent<'_>>, DecodeError> {
        if self.done {
            return Ok(None);
        }

        let field = match self.inner.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => {
                self.done = true;
                return Ok(None);
            }
            Err(e) => {
                self.done = true;
                return Err(e.into());
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        match field.file_name() {
            Some(file_name) => {
                let info = ObjectInfo {
                    field_name: name,
                    file_name: Some(file_name.to_string()),
                    content_type: field.content_type().map(str::to_string),
                };
                Ok(Some(DecodeEvent::File(FilePart { field, info })))
            }
            None => {
                let value = field.text().await?;
                Ok(Some(DecodeEvent::Field { name, value }))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use axum::{
        body::Body,
        extract::{FromRequest, Multipart, Request},
        http::header,
    };

    pub const BOUNDARY: &str = "vidtube-test-boundary";

    pub enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, &'a str, &'a str, &'a [u8]),
    }

    pub fn body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut out = Vec::new();
        for part in parts {
            out.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::Text(name, value) => {
                    out.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                            .as_bytes(),
                    );
                }
                Part::File(name, file_name, content_type, data) => {
                    out.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    out.extend_from_slice(data);
                    out.extend_from_slice(b"\r\n");
                }
            }
        }
        out.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        out
    }

    pub fn content_type() -> String {
        format!("multipart/form-data; boundary={BOUNDARY}")
    }

    pub async fn multipart(body: Vec<u8>) -> Multipart {
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, content_type())
            .body(Body::from(body))
            .unwrap();
        Multipart::from_request(req, &()).await.unwrap()
    }
}
