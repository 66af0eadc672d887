//! Header reconciliation and client response shaping.
//!
//! # Responsibilities
//! - Copy callback-visible headers onto outgoing messages
//! - Keep hop-by-hop and proxy-private headers from crossing the proxy
//! - Turn an [`HttpMessageInfo`] into the client's response
//! - Framing helpers shared by every relay branch
//!
//! # Design Decisions
//! - Headers are placed in two passes: message-scoped first, content-scoped
//!   once it is known whether a body is attached
//! - `Content-Length` is always re-derived by the caller for fixed-length
//!   bodies; a copied value is never trusted after callbacks ran

use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, EXPIRES, TRANSFER_ENCODING};
use http::{HeaderMap, Response, StatusCode};

use crate::http::body::{self, BoxBody};
use crate::http::headers::HeaderCollection;
use crate::http::message::{HttpMessageInfo, MessageType, UNIX_EPOCH_HTTP_DATE};

/// Headers never copied in either direction.
pub const FORBIDDEN_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Headers that describe the body rather than the message.
const CONTENT_HEADERS: &[&str] = &[
    "allow",
    "content-disposition",
    "content-encoding",
    "content-language",
    "content-length",
    "content-location",
    "content-md5",
    "content-range",
    "content-type",
    "expires",
    "last-modified",
];

pub fn is_forbidden_header(name: &str) -> bool {
    FORBIDDEN_HEADERS
        .iter()
        .any(|forbidden| forbidden.eq_ignore_ascii_case(name))
}

pub fn is_content_header(name: &str) -> bool {
    CONTENT_HEADERS
        .iter()
        .any(|content| content.eq_ignore_ascii_case(name))
}

/// Which headers a population pass may place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderScope {
    /// Everything except content-scoped headers.
    Message,
    /// Only content-scoped headers.
    Content,
    All,
}

impl HeaderScope {
    fn admits(self, name: &str) -> bool {
        match self {
            HeaderScope::Message => !is_content_header(name),
            HeaderScope::Content => is_content_header(name),
            HeaderScope::All => true,
        }
    }
}

/// Append every header in `source` that `scope` admits onto `target`.
///
/// Forbidden headers are skipped silently. Headers outside `scope`, and
/// names or values that are not valid HTTP, are returned for a later pass.
pub fn populate_headers(
    target: &mut HeaderMap,
    source: &HeaderCollection,
    scope: HeaderScope,
) -> HeaderCollection {
    let mut failed = HeaderCollection::new();

    for (name, value) in source.iter() {
        if is_forbidden_header(name) {
            continue;
        }
        if !scope.admits(name) {
            failed.append(name, value);
            continue;
        }

        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                target.append(name, value);
            }
            _ => failed.append(name, value),
        }
    }

    failed
}

/// Debug-log headers that could not be placed.
pub fn log_failed_headers(failed: &HeaderCollection, direction: &'static str) {
    for (name, value) in failed.iter() {
        tracing::debug!(
            direction,
            header = %name,
            value = %value,
            "Failed to place HTTP header"
        );
    }
}

/// Statuses that never carry a body.
pub fn status_forbids_body(status: StatusCode) -> bool {
    status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

/// Replace any framing headers with an exact `Content-Length`.
pub fn set_content_length(headers: &mut HeaderMap, len: u64) {
    headers.remove(TRANSFER_ENCODING);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
}

/// Mark a response as having no body.
///
/// Writes `Content-Length: 0` unless the status forbids describing a body.
pub fn set_no_body(headers: &mut HeaderMap, status: StatusCode) {
    headers.remove(TRANSFER_ENCODING);
    if status_forbids_body(status) {
        headers.remove(CONTENT_LENGTH);
    } else {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(0u64));
    }
}

/// Strip declared framing so the body is streamed.
pub fn set_streamed(headers: &mut HeaderMap) {
    headers.remove(CONTENT_LENGTH);
    headers.remove(TRANSFER_ENCODING);
}

/// Build the client's response from a callback's message info.
///
/// Status always comes from the info. Headers only do when the info is a
/// response, so request headers are never echoed back. A user-created body is
/// sent with an exact length and cache-busting `Expires`.
pub fn apply_message_info(info: &HttpMessageInfo) -> Result<Response<BoxBody>, http::Error> {
    let status = info.status_code();
    let mut response = Response::builder().status(status).body(body::empty())?;
    let headers = response.headers_mut();

    if info.message_type() == MessageType::Response {
        let failed = populate_headers(headers, info.headers(), HeaderScope::All);
        log_failed_headers(&failed, "client_response");
    }

    let user_body = info.body();
    if info.body_is_user_created() && !user_body.is_empty() && !status_forbids_body(status) {
        if !info.body_content_type().is_empty() {
            match HeaderValue::from_str(info.body_content_type()) {
                Ok(value) => {
                    headers.insert(CONTENT_TYPE, value);
                }
                Err(_) => tracing::debug!(
                    content_type = %info.body_content_type(),
                    "Ignoring invalid body content type"
                ),
            }
        }
        headers.insert(EXPIRES, HeaderValue::from_static(UNIX_EPOCH_HTTP_DATE));
        set_content_length(headers, user_body.len() as u64);
        *response.body_mut() = body::full(user_body.to_vec());
    } else {
        set_no_body(headers, status);
    }

    Ok(response)
}
