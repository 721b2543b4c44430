//! Incoming HTTP request type.

use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};

use crate::error::RejectError;
use crate::method::Method;

/// An incoming HTTP request with its body fully read.
pub struct Request {
    method: Method,
    path: String,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Request {
    pub fn new(
        method: Method,
        path: impl Into<String>,
        headers: Vec<(String, String)>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            headers,
            body: body.into(),
        }
    }

    /// Reads a hyper request into memory, refusing bodies over `limit` bytes.
    pub(crate) async fn read(
        req: hyper::Request<hyper::body::Incoming>,
        method: Method,
        limit: usize,
    ) -> Result<Self, RejectError> {
        let (parts, body) = req.into_parts();

        let headers = parts.headers.iter()
            .filter_map(|(k, v)| Some((k.as_str().to_owned(), v.to_str().ok()?.to_owned())))
            .collect();

        let body = match Limited::new(body, limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return Err(RejectError::BodyTooLarge { limit });
            }
            Err(e) => return Err(RejectError::Body(e.to_string())),
        };

        Ok(Self::new(method, parts.uri.path(), headers, body))
    }

    pub fn method(&self) -> Method { self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The media type of the body, lowercased and without parameters
    /// (`"application/json; charset=utf-8"` → `"application/json"`).
    pub fn media_type(&self) -> Option<String> {
        let raw = self.header("content-type")?;
        let essence = raw.split(';').next().unwrap_or(raw).trim();
        Some(essence.to_ascii_lowercase())
    }
}
