//! Transaction orchestrator.
//!
//! # Responsibilities
//! - Drive one client request through every callback checkpoint
//! - Materialize, tap or pass through bodies as each checkpoint decides
//! - Dispatch upstream and relay the response with correct framing
//! - Guarantee a single diagnostics report per transaction
//!
//! # Design Decisions
//! - A checkpoint's decision is its callback's return value
//! - `DropConnection` ends the transaction with that checkpoint's message
//!   info as the client's response; nothing else is sent upstream
//! - `Err` means "no response": the front end aborts the client connection
//! - Whole-body buffers are capped and never truncated
//! - Length headers are re-derived after any callback that could touch a body

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode, Version};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::InspectionConfig;
use crate::config::schema::DEFAULT_MAX_IN_MEMORY_BODY;
use crate::diagnostics::{DiagnosticsCollector, SessionRecorder};
use crate::error::{TransactionError, UpstreamError, UpstreamFailureKind};
use crate::http::action::ProxyNextAction;
use crate::http::body::{self, BoxBody, ClientBody};
use crate::http::callbacks::FilterCallbacks;
use crate::http::headers::HeaderCollection;
use crate::http::message::HttpMessageInfo;
use crate::http::request::{declared_content_length, RequestContext};
use crate::http::response::{
    apply_message_info, log_failed_headers, populate_headers, set_content_length, set_no_body,
    set_streamed, status_forbids_body, HeaderScope,
};
use crate::observability::metrics;
use crate::upstream::UpstreamClient;

/// Tunables for body handling.
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    /// Cap for whole-body buffering, in bytes.
    pub max_in_memory_body: usize,
    /// Buffer uninspected fixed-length responses to re-derive their length.
    pub buffer_fixed_length_responses: bool,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            max_in_memory_body: DEFAULT_MAX_IN_MEMORY_BODY,
            buffer_fixed_length_responses: true,
        }
    }
}

impl From<&InspectionConfig> for HandlerOptions {
    fn from(config: &InspectionConfig) -> Self {
        Self {
            max_in_memory_body: config.max_in_memory_body,
            buffer_fixed_length_responses: config.buffer_fixed_length_responses,
        }
    }
}

/// Request body prepared for the upstream leg.
enum OutboundContent {
    /// No body object at all.
    None,
    /// Fully materialized; sent with an exact length.
    Fixed(Bytes),
    /// Streamed as it arrives.
    Streamed(BoxBody),
}

/// Outcome label recorded in metrics.
type Outcome = &'static str;

/// Drives HTTP transactions through the filtering callbacks.
pub struct FilterHttpResponseHandler {
    callbacks: Arc<dyn FilterCallbacks>,
    upstream: Arc<dyn UpstreamClient>,
    diagnostics: DiagnosticsCollector,
    options: HandlerOptions,
}

impl FilterHttpResponseHandler {
    pub fn new(
        callbacks: Arc<dyn FilterCallbacks>,
        upstream: Arc<dyn UpstreamClient>,
        diagnostics: DiagnosticsCollector,
        options: HandlerOptions,
    ) -> Self {
        Self {
            callbacks,
            upstream,
            diagnostics,
            options,
        }
    }

    pub fn options(&self) -> &HandlerOptions {
        &self.options
    }

    /// Handle one transaction.
    ///
    /// The returned body owns the diagnostics session and reports it once
    /// the client has received the last byte. On `Err` the session has
    /// already been reported.
    pub async fn handle(&self, ctx: RequestContext) -> Result<Response<ClientBody>, TransactionError> {
        let transaction_id = Uuid::new_v4();
        let started = Instant::now();
        let span = tracing::info_span!(
            "transaction",
            %transaction_id,
            method = %ctx.method,
            uri = %ctx.uri,
        );

        let cancel = ctx.cancel.clone();
        let mut recorder = self.diagnostics.begin();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransactionError::Cancelled),
            result = self.run(ctx, &mut recorder).instrument(span.clone()) => result,
        };

        match result {
            Ok((response, outcome)) => {
                span.in_scope(|| {
                    tracing::debug!(
                        status = response.status().as_u16(),
                        outcome,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Transaction response ready"
                    );
                });
                metrics::record_transaction(outcome, started);
                Ok(response.map(|body| ClientBody::new(body).with_recorder(recorder)))
            }
            Err(e) => {
                span.in_scope(|| {
                    if e.is_cancellation() {
                        tracing::debug!(error = %e, "Transaction cancelled");
                    } else {
                        tracing::error!(error = %e, kind = e.kind(), "Transaction failed");
                    }
                });
                metrics::record_transaction(e.kind(), started);
                recorder.finish();
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        ctx: RequestContext,
        recorder: &mut SessionRecorder,
    ) -> Result<(Response<BoxBody>, Outcome), TransactionError> {
        recorder.record(|s| {
            s.client_request_uri = Some(ctx.uri.to_string());
            s.client_request_headers = Some(HeaderCollection::from_header_map(&ctx.headers).to_string());
        });

        let url = ctx.full_url()?;
        let is_http10 = ctx.is_http10();
        let is_head = ctx.method == Method::HEAD;
        let body_known_empty = ctx.body_is_known_empty();
        let client_declared_zero = ctx.declared_content_length() == Some(0);

        // Request-begin checkpoint.
        let mut request_info = HttpMessageInfo::request(url, ctx.method.clone())
            .with_headers(HeaderCollection::from_header_map(&ctx.headers))
            .with_encryption(ctx.is_encrypted)
            .with_endpoints(ctx.local_addr, ctx.remote_addr);

        let request_action = self.callbacks.on_new_message(&mut request_info).await;
        tracing::debug!(action = %request_action, url = %request_info.url(), "Request checkpoint");

        if request_action.is_drop() {
            tracing::info!(url = %request_info.url(), "Request dropped by callback");
            return Ok((apply_message_info(&request_info)?, "dropped"));
        }

        // Request body.
        let empty_content = || {
            if client_declared_zero {
                OutboundContent::Fixed(Bytes::new())
            } else {
                OutboundContent::None
            }
        };

        let mut outbound_info = request_info;
        let content = match request_action {
            ProxyNextAction::AllowButRequestContentInspection => {
                let captured = body::read_body_capped(ctx.body, self.options.max_in_memory_body).await?;
                metrics::record_buffered_body("request", captured.len());
                recorder.record(|s| s.client_request_body = Some(captured.to_vec()));

                if captured.is_empty() {
                    empty_content()
                } else {
                    let mut whole = outbound_info.next_checkpoint();
                    whole.set_body_internal(captured);

                    if self.callbacks.on_whole_body(&mut whole).await.is_drop() {
                        tracing::info!(url = %whole.url(), "Request body dropped by callback");
                        return Ok((apply_message_info(&whole)?, "dropped"));
                    }

                    let body = Bytes::from(whole.take_body());
                    outbound_info = whole;
                    OutboundContent::Fixed(body)
                }
            }
            ProxyNextAction::AllowButRequestStreamedContentInspection if !body_known_empty => {
                OutboundContent::Streamed(body::inspect_body(
                    ctx.body,
                    Arc::new(outbound_info.clone()),
                    Arc::clone(&self.callbacks),
                ))
            }
            _ if body_known_empty => empty_content(),
            _ => OutboundContent::Streamed(ctx.body),
        };

        let request = build_outbound_request(&outbound_info, content, is_http10, recorder)?;

        // Upstream dispatch.
        let response = match self.upstream.send(request).await {
            Ok(response) => response,
            Err(e) => return self.upstream_failed(e, &outbound_info).await,
        };

        // Response-begin checkpoint.
        let (parts, upstream_body) = response.into_parts();
        let declared_len = declared_content_length(&parts.headers);
        let declared_fixed = declared_len.is_some();
        let declared_zero = declared_len == Some(0);
        let response_headers = HeaderCollection::from_header_map(&parts.headers);

        recorder.record(|s| {
            s.status_code = Some(parts.status.as_u16());
            s.server_response_headers = Some(response_headers.to_string());
        });

        let mut response_info = HttpMessageInfo::response(outbound_info.url().clone(), parts.status)
            .with_headers(response_headers)
            .with_encryption(outbound_info.is_encrypted())
            .with_endpoints(outbound_info.local_addr(), outbound_info.remote_addr());
        response_info.set_method(outbound_info.method().clone());

        let response_action = if request_action == ProxyNextAction::AllowAndIgnoreContentAndResponse {
            ProxyNextAction::AllowAndIgnoreContentAndResponse
        } else {
            self.callbacks.on_new_message(&mut response_info).await
        };
        tracing::debug!(
            action = %response_action,
            status = parts.status.as_u16(),
            declared_len,
            "Response checkpoint"
        );

        if response_action.is_drop() {
            tracing::info!(url = %response_info.url(), "Response dropped by callback");
            return Ok((apply_message_info(&response_info)?, "dropped"));
        }

        let status = response_info.status_code();
        let is_whole_body = response_action == ProxyNextAction::AllowButRequestContentInspection;

        // Bodiless responses.
        if is_head || (status_forbids_body(status) && !is_whole_body) {
            drop(upstream_body);
            let mut response = response_head(&response_info)?;
            if !is_head {
                set_no_body(response.headers_mut(), status);
            }
            return Ok((response, "bodiless"));
        }

        // Response body relay.
        match response_action {
            ProxyNextAction::AllowButRequestContentInspection => {
                let captured = body::read_body_capped(upstream_body, self.options.max_in_memory_body).await?;
                metrics::record_buffered_body("response", captured.len());
                recorder.record(|s| s.server_response_body = Some(captured.to_vec()));

                let mut whole = response_info.next_checkpoint();
                whole.set_body_internal(captured);

                if self.callbacks.on_whole_body(&mut whole).await.is_drop() {
                    tracing::info!(url = %whole.url(), "Response body dropped by callback");
                    return Ok((apply_message_info(&whole)?, "dropped"));
                }

                let final_status = whole.status_code();
                let mut response = response_head(&whole)?;
                let final_body = whole.take_body();

                if !final_body.is_empty()
                    && final_status != StatusCode::NO_CONTENT
                    && !status_forbids_body(final_status)
                    && !declared_zero
                {
                    set_content_length(response.headers_mut(), final_body.len() as u64);
                    *response.body_mut() = body::full(final_body);
                } else {
                    set_no_body(response.headers_mut(), final_status);
                }
                Ok((response, "inspected"))
            }
            ProxyNextAction::AllowButRequestStreamedContentInspection => {
                let mut response = response_head(&response_info)?;
                if declared_zero {
                    set_no_body(response.headers_mut(), status);
                    return Ok((response, "streamed"));
                }

                let inspected = body::inspect_body(
                    upstream_body,
                    Arc::new(response_info),
                    Arc::clone(&self.callbacks),
                );
                if is_http10 && !declared_fixed {
                    // 1.0 clients need an explicit length; taps still run chunk by chunk.
                    let buffered = body::read_body_capped(inspected, self.options.max_in_memory_body).await?;
                    metrics::record_buffered_body("response", buffered.len());
                    set_content_length(response.headers_mut(), buffered.len() as u64);
                    if !buffered.is_empty() {
                        *response.body_mut() = body::full(buffered);
                    }
                    return Ok((response, "buffered"));
                }

                if !declared_fixed {
                    set_streamed(response.headers_mut());
                }
                *response.body_mut() = inspected;
                Ok((response, "streamed"))
            }
            _ => {
                let mut response = response_head(&response_info)?;
                if declared_zero {
                    set_no_body(response.headers_mut(), status);
                    Ok((response, "passthrough"))
                } else if is_http10 || (declared_fixed && self.options.buffer_fixed_length_responses) {
                    let buffered = body::read_body_capped(upstream_body, self.options.max_in_memory_body).await?;
                    metrics::record_buffered_body("response", buffered.len());
                    set_content_length(response.headers_mut(), buffered.len() as u64);
                    if !buffered.is_empty() {
                        *response.body_mut() = body::full(buffered);
                    }
                    Ok((response, "buffered"))
                } else {
                    if !declared_fixed {
                        set_streamed(response.headers_mut());
                    }
                    *response.body_mut() = upstream_body;
                    Ok((response, "passthrough"))
                }
            }
        }
    }

    /// Route an upstream failure. Certificate failures get a chance to
    /// become a client-visible response.
    async fn upstream_failed(
        &self,
        error: UpstreamError,
        outbound_info: &HttpMessageInfo,
    ) -> Result<(Response<BoxBody>, Outcome), TransactionError> {
        metrics::record_upstream_failure(error.kind());

        if error.is_certificate_error() {
            tracing::warn!(url = %outbound_info.url(), error = %error, "Upstream certificate rejected");

            let mut info = outbound_info.next_checkpoint();
            if self.callbacks.on_bad_certificate(&mut info).await.is_drop() {
                return Ok((apply_message_info(&info)?, "bad_certificate"));
            }
        }

        if error.kind() == UpstreamFailureKind::StreamDropped {
            return Err(TransactionError::StreamDropped);
        }
        Err(TransactionError::Upstream(error))
    }
}

/// Rebuild the upstream request from the final request-phase info.
fn build_outbound_request(
    info: &HttpMessageInfo,
    content: OutboundContent,
    is_http10: bool,
    recorder: &mut SessionRecorder,
) -> Result<Request<BoxBody>, TransactionError> {
    let version = if is_http10 {
        Version::HTTP_10
    } else {
        Version::HTTP_11
    };

    let (outbound_body, fixed, has_content) = match content {
        OutboundContent::None => (body::empty(), None, false),
        OutboundContent::Fixed(bytes) => (body::full(bytes.clone()), Some(bytes), true),
        OutboundContent::Streamed(stream) => (stream, None, true),
    };

    let mut request = Request::builder()
        .method(info.method().clone())
        .uri(info.url().as_str())
        .version(version)
        .body(outbound_body)?;

    let headers = request.headers_mut();
    let leftovers = populate_headers(headers, info.headers(), HeaderScope::Message);

    // Content-scoped headers only make sense once a body is attached.
    let failed = if has_content {
        let failed = populate_headers(headers, &leftovers, HeaderScope::Content);
        if let Some(bytes) = &fixed {
            set_content_length(headers, bytes.len() as u64);
        }
        failed
    } else {
        leftovers
    };
    log_failed_headers(&failed, "upstream_request");

    recorder.record(|s| {
        s.server_request_uri = Some(info.url().to_string());
        s.server_request_headers = Some(HeaderCollection::from_header_map(request.headers()).to_string());
        s.server_request_body = fixed.as_ref().map(|bytes| bytes.to_vec());
    });

    Ok(request)
}

/// Client response head carrying the info's status and headers.
fn response_head(info: &HttpMessageInfo) -> Result<Response<BoxBody>, TransactionError> {
    let mut response = Response::builder()
        .status(info.status_code())
        .body(body::empty())?;
    let failed = populate_headers(response.headers_mut(), info.headers(), HeaderScope::All);
    log_failed_headers(&failed, "client_response");
    Ok(response)
}
