//! Message data model shared with callbacks.
//!
//! One [`HttpMessageInfo`] is built per checkpoint. It carries everything a
//! callback may inspect about a request or response and the few fields it is
//! allowed to change. It performs no I/O.

use std::net::SocketAddr;

use bytes::Bytes;
use http::{Method, StatusCode};
use url::Url;

use crate::http::headers::HeaderCollection;

/// `Expires` value used to defeat caching of synthetic responses.
pub const UNIX_EPOCH_HTTP_DATE: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// Whether a message is a request or a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Request,
    Response,
}

/// Protocol the message travels over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageProtocol {
    #[default]
    Http,
    WebSocket,
}

/// Read/write state for one request or response crossing the callback boundary.
#[derive(Debug, Clone)]
pub struct HttpMessageInfo {
    url: Url,
    method: Method,
    status_code: StatusCode,
    headers: HeaderCollection,
    body_content_type: String,
    body: Vec<u8>,
    body_is_user_created: bool,
    protocol: MessageProtocol,
    is_encrypted: bool,
    message_type: MessageType,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
}

impl HttpMessageInfo {
    /// Create a request-phase message.
    pub fn request(url: Url, method: Method) -> Self {
        Self::new(url, method, StatusCode::OK, MessageType::Request)
    }

    /// Create a response-phase message.
    pub fn response(url: Url, status_code: StatusCode) -> Self {
        Self::new(url, Method::GET, status_code, MessageType::Response)
    }

    fn new(url: Url, method: Method, status_code: StatusCode, message_type: MessageType) -> Self {
        Self {
            url,
            method,
            status_code,
            headers: HeaderCollection::new(),
            body_content_type: String::new(),
            body: Vec::new(),
            body_is_user_created: false,
            protocol: MessageProtocol::Http,
            is_encrypted: false,
            message_type,
            local_addr: None,
            remote_addr: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderCollection) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_endpoints(mut self, local: Option<SocketAddr>, remote: Option<SocketAddr>) -> Self {
        self.local_addr = local;
        self.remote_addr = remote;
        self
    }

    pub fn with_encryption(mut self, is_encrypted: bool) -> Self {
        self.is_encrypted = is_encrypted;
        self
    }

    pub fn with_protocol(mut self, protocol: MessageProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Fresh message for the next checkpoint of the same phase.
    ///
    /// Identity, addressing and headers carry over; the body does not.
    pub(crate) fn next_checkpoint(&self) -> Self {
        Self {
            url: self.url.clone(),
            method: self.method.clone(),
            status_code: self.status_code,
            headers: self.headers.clone(),
            body_content_type: String::new(),
            body: Vec::new(),
            body_is_user_created: false,
            protocol: self.protocol,
            is_encrypted: self.is_encrypted,
            message_type: self.message_type,
            local_addr: self.local_addr,
            remote_addr: self.remote_addr,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn set_url(&mut self, url: Url) {
        self.url = url;
    }

    /// Request method. Meaningless for responses.
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// Status code. Only applies to responses and to messages a callback
    /// turns into the client's response.
    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn set_status_code(&mut self, status_code: StatusCode) {
        self.status_code = status_code;
    }

    pub fn headers(&self) -> &HeaderCollection {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderCollection {
        &mut self.headers
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn is_request(&self) -> bool {
        self.message_type == MessageType::Request
    }

    pub fn protocol(&self) -> MessageProtocol {
        self.protocol
    }

    pub fn is_encrypted(&self) -> bool {
        self.is_encrypted
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Content type written alongside a user-supplied body.
    pub fn body_content_type(&self) -> &str {
        &self.body_content_type
    }

    pub fn set_body_content_type(&mut self, content_type: impl Into<String>) {
        self.body_content_type = content_type.into();
    }

    /// Current body. Empty when unset.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Mutable view for in-place rewriting. Does not change provenance.
    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.body
    }

    /// Replace the body. Always marks it user-created.
    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
        self.body_is_user_created = true;
    }

    /// Store bytes captured from the wire without marking them user-created.
    pub(crate) fn set_body_internal(&mut self, body: Bytes) {
        self.body = Vec::from(body);
        self.body_is_user_created = false;
    }

    /// Move the body out, leaving it empty.
    pub(crate) fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }

    /// Whether the body was supplied by a callback rather than the wire.
    pub fn body_is_user_created(&self) -> bool {
        self.body_is_user_created
    }

    /// Take ownership of `data`, keep the `[offset, offset + count)` window
    /// (clamped to the buffer) as the new body, and record its content type.
    ///
    /// A previously held user-created buffer is zeroed before it is released.
    /// `None` results in an empty body.
    pub fn copy_and_set_body(
        &mut self,
        data: Option<Vec<u8>>,
        offset: usize,
        count: usize,
        content_type: &str,
    ) {
        self.scrub_user_body();
        self.body_content_type = content_type.to_string();

        let body = match data {
            Some(mut data) => {
                let start = offset.min(data.len());
                let end = start.saturating_add(count).min(data.len());
                data.truncate(end);
                data.drain(..start);
                data
            }
            None => Vec::new(),
        };
        self.set_body(body);
    }

    /// Turn this message into a bodiless, uncacheable response with `status`.
    pub fn make_response(&mut self, status: StatusCode) {
        self.status_code = status;
        self.message_type = MessageType::Response;
        self.headers.clear();
        self.body_content_type.clear();
        self.scrub_user_body();
        self.set_body(Vec::new());
        self.headers.set("Expires", UNIX_EPOCH_HTTP_DATE);
    }

    /// Turn this message into a `302 Found` pointing at `location`.
    pub fn make_temporary_redirect(&mut self, location: &str) {
        self.make_response(StatusCode::FOUND);
        self.headers.set("Location", location);
    }

    /// Turn this message into a `204 No Content`.
    pub fn make_no_content(&mut self) {
        self.make_response(StatusCode::NO_CONTENT);
    }

    fn scrub_user_body(&mut self) {
        if self.body_is_user_created && !self.body.is_empty() {
            self.body.fill(0);
            let _ = std::hint::black_box(&self.body);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> HttpMessageInfo {
        HttpMessageInfo::request(Url::parse("http://example.com/a").unwrap(), Method::GET)
    }

    #[test]
    fn test_defaults() {
        let info = request();
        assert!(info.body().is_empty());
        assert!(!info.body_is_user_created());
        assert!(info.headers().is_empty());
        assert_eq!(info.status_code(), StatusCode::OK);
        assert_eq!(info.message_type(), MessageType::Request);
        assert_eq!(info.protocol(), MessageProtocol::Http);
    }

    #[test]
    fn test_set_body_marks_user_created() {
        let mut info = request();
        info.set_body_internal(Bytes::from_static(b"wire"));
        assert_eq!(info.body(), b"wire");
        assert!(!info.body_is_user_created());

        info.set_body(b"mine".to_vec());
        assert!(info.body_is_user_created());
    }

    #[test]
    fn test_body_mut_keeps_provenance() {
        let mut info = request();
        info.set_body_internal(Bytes::from_static(b"abc"));
        info.body_mut()[0] = b'x';
        assert_eq!(info.body(), b"xbc");
        assert!(!info.body_is_user_created());
    }

    #[test]
    fn test_copy_and_set_body_window() {
        let mut info = request();
        info.copy_and_set_body(Some(b"0123456789".to_vec()), 2, 3, "text/plain");
        assert_eq!(info.body(), b"234");
        assert_eq!(info.body_content_type(), "text/plain");
        assert!(info.body_is_user_created());

        // Window past the end is clamped.
        info.copy_and_set_body(Some(b"abc".to_vec()), 1, 100, "");
        assert_eq!(info.body(), b"bc");
    }

    #[test]
    fn test_copy_and_set_body_none_is_empty() {
        let mut info = request();
        info.copy_and_set_body(Some(b"abc".to_vec()), 0, 3, "text/plain");
        info.copy_and_set_body(None, 0, 0, "application/json");
        assert!(info.body().is_empty());
        assert!(info.body_is_user_created());
        assert_eq!(info.body_content_type(), "application/json");
    }

    #[test]
    fn test_make_temporary_redirect_idempotent() {
        let mut info = request();
        info.headers_mut().append("Cookie", "a=b");
        info.set_body(b"secret".to_vec());

        info.make_temporary_redirect("https://blocked.example/");
        let once = format!("{:?}", info);
        info.make_temporary_redirect("https://blocked.example/");
        let twice = format!("{:?}", info);

        assert_eq!(once, twice);
        assert_eq!(info.status_code(), StatusCode::FOUND);
        assert_eq!(info.message_type(), MessageType::Response);
        assert!(info.body().is_empty());
        assert_eq!(info.headers().len(), 2);
        assert_eq!(info.headers().get("expires"), Some(UNIX_EPOCH_HTTP_DATE));
        assert_eq!(info.headers().get("location"), Some("https://blocked.example/"));
    }

    #[test]
    fn test_make_no_content_idempotent() {
        let mut info = request();
        info.headers_mut().append("X-A", "1");
        info.copy_and_set_body(Some(b"abc".to_vec()), 0, 3, "text/plain");

        info.make_no_content();
        let once = format!("{:?}", info);
        info.make_no_content();

        assert_eq!(once, format!("{:?}", info));
        assert_eq!(info.status_code(), StatusCode::NO_CONTENT);
        assert_eq!(info.headers().len(), 1);
        assert_eq!(info.headers().get("Expires"), Some(UNIX_EPOCH_HTTP_DATE));
        assert!(info.body().is_empty());
        assert!(info.body_content_type().is_empty());
    }

    #[test]
    fn test_next_checkpoint_drops_body() {
        let mut info = request().with_encryption(true);
        info.headers_mut().append("X-A", "1");
        info.set_body(b"abc".to_vec());

        let next = info.next_checkpoint();
        assert!(next.body().is_empty());
        assert!(!next.body_is_user_created());
        assert!(next.is_encrypted());
        assert_eq!(next.headers().get("x-a"), Some("1"));
    }
}
