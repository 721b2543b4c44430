//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! A [`Response`] carries either a complete body or a channel of chunks. The
//! channel variant is what lets the process bridge forward worker output as
//! it arrives: every chunk sent on the channel becomes one body frame of the
//! same response, and the body ends when the sender is dropped. Sending a
//! [`StreamAbort`] instead makes the body fail, which aborts the connection
//! without the final chunk.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::error::StreamAbort;
use crate::status::Status;

/// The body type handed to hyper.
pub(crate) type ResponseBody = UnsyncBoxBody<Bytes, StreamAbort>;

/// One item of a streamed body.
pub type Chunk = Result<Bytes, StreamAbort>;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Content-type values used with [`ResponseBuilder::bytes`] and
/// [`ResponseBuilder::stream`].
#[derive(Clone, Copy, Debug)]
pub enum ContentType {
    Html, // text/html; charset=utf-8
    Text, // text/plain; charset=utf-8
}

impl ContentType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Html => "text/html; charset=utf-8",
            Self::Text => "text/plain; charset=utf-8",
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

enum Body {
    Full(Bytes),
    Stream(mpsc::Receiver<Chunk>),
}

/// An outgoing HTTP response.
///
/// ```rust
/// use sporeline::{ContentType, Response, Status};
///
/// Response::text("ok");
/// Response::status(Status::NotFound);
///
/// Response::builder()
///     .status(Status::BadRequest)
///     .text("field `red` must be an integer between 0 and 255\n");
///
/// let (tx, rx) = tokio::sync::mpsc::channel(8);
/// # drop(tx);
/// Response::builder().stream(ContentType::Text, rx);
/// ```
pub struct Response {
    body: Body,
    headers: Vec<(String, String)>,
    status: Status,
}

impl Response {
    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// `200 OK`, `text/html; charset=utf-8`.
    pub fn html(body: impl Into<Bytes>) -> Self {
        Self::builder().bytes(ContentType::Html, body)
    }

    /// Response with no body.
    pub fn status(code: Status) -> Self {
        Self::builder().status(code).no_body()
    }

    /// Builder for responses that need a custom status, extra headers or a
    /// streamed body.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: Vec::new(), status: Status::Ok }
    }

    pub fn status_code(&self) -> Status {
        self.status
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, Body::Stream(_))
    }

    pub(crate) fn into_inner(self) -> http::Response<ResponseBody> {
        let body = match self.body {
            Body::Full(bytes) => Full::new(bytes).map_err(|never| match never {}).boxed_unsync(),
            Body::Stream(rx) => {
                let frames = ReceiverStream::new(rx).map(|chunk| chunk.map(Frame::data));
                StreamBody::new(frames).boxed_unsync()
            }
        };

        let mut res = http::Response::new(body);
        *res.status_mut() = self.status.into();
        for (name, value) in self.headers {
            match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
                (Ok(name), Ok(value)) => {
                    res.headers_mut().append(name, value);
                }
                _ => warn!(header = %name, "dropping invalid response header"),
            }
        }
        res
    }

    /// Drains the body, waiting for a streamed body to finish.
    #[cfg(test)]
    pub(crate) async fn into_bytes(self) -> Bytes {
        self.drain().await.0
    }

    /// Drains the body, returning the data received and the error that cut
    /// it short, if any.
    #[cfg(test)]
    pub(crate) async fn drain(self) -> (Bytes, Option<StreamAbort>) {
        let mut body = self.into_inner().into_body();
        let mut data = bytes::BytesMut::new();
        while let Some(frame) = body.frame().await {
            match frame {
                Ok(frame) => {
                    if let Ok(chunk) = frame.into_data() {
                        data.extend_from_slice(&chunk);
                    }
                }
                Err(abort) => return (data.freeze(), Some(abort)),
            }
        }
        (data.freeze(), None)
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `Status::Ok` (200).
/// Terminated by a typed body method.
pub struct ResponseBuilder {
    headers: Vec<(String, String)>,
    status: Status,
}

impl ResponseBuilder {
    pub fn status(mut self, code: Status) -> Self {
        self.status = code;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        let body: String = body.into();
        self.bytes(ContentType::Text, body)
    }

    /// Terminate with a complete body of the given type.
    pub fn bytes(self, content_type: ContentType, body: impl Into<Bytes>) -> Response {
        self.finish(Some(content_type), Body::Full(body.into()))
    }

    /// Terminate with a body fed chunk by chunk from `rx`. The response ends
    /// when every sender is dropped, or fails at the first `Err` received.
    pub fn stream(self, content_type: ContentType, rx: mpsc::Receiver<Chunk>) -> Response {
        self.finish(Some(content_type), Body::Stream(rx))
    }

    /// Terminate with no body.
    pub fn no_body(self) -> Response {
        self.finish(None, Body::Full(Bytes::new()))
    }

    fn finish(self, content_type: Option<ContentType>, body: Body) -> Response {
        let mut headers = Vec::with_capacity(self.headers.len() + 1);
        if let Some(ct) = content_type {
            headers.push(("content-type".to_owned(), ct.as_str().to_owned()));
        }
        headers.extend(self.headers);
        Response { body, headers, status: self.status }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Handlers may return any type implementing it. The crate's per-request
/// error types implement it so a failure always maps to exactly one response.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a [`Status`] directly from a handler: `return Status::NotFound`
impl IntoResponse for Status {
    fn into_response(self) -> Response { Response::status(self) }
}

impl<T: IntoResponse, E: IntoResponse> IntoResponse for Result<T, E> {
    fn into_response(self) -> Response {
        match self {
            Ok(ok) => ok.into_response(),
            Err(err) => err.into_response(),
        }
    }
}
