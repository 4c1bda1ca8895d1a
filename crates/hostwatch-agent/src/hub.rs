// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hub mode listener: store-and-forward for other agents.
//!
//! `POST /v1/ingest` buffers a batch into the hub's own outbox, tagging every envelope with the
//! caller's credential so the hub's flush delivers it under that credential. `GET
//! /v1/agent/config` proxies the caller's config request to the backend.

use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap};
use hyper::http;
use hyper::service::service_fn;
use hyper::{Method, Request, StatusCode};
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::config_sync::AGENT_CONFIG_PATH;
use crate::envelope::{Envelope, META_VIA};
use crate::error::AgentError;
use crate::http_utils::{
    build_client, create_passthrough_response, log_and_create_http_response, serve_http1,
    verify_request_content_length, HttpResponse,
};
use crate::outbox::OutboxRepo;
use crate::transport::INGEST_PATH;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, PartialEq, Eq)]
pub enum IngestRejection {
    TooLarge,
    UnsupportedEncoding(String),
    Invalid(String),
}

pub struct HubRelay {
    outbox: Arc<dyn OutboxRepo>,
    client: reqwest::Client,
    config_endpoint: String,
    max_content_length: usize,
}

impl HubRelay {
    pub fn new(config: &Config, outbox: Arc<dyn OutboxRepo>) -> Result<Self, AgentError> {
        let client = build_client(config.proxy_url.as_deref(), UPSTREAM_TIMEOUT)?;
        Ok(HubRelay {
            outbox,
            client,
            config_endpoint: config.api_endpoint(AGENT_CONFIG_PATH),
            max_content_length: config.max_request_content_length,
        })
    }

    /// Serves relay agents on `listener` until `cancel` fires.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), AgentError> {
        let hub = self;
        let service = service_fn(move |req| {
            let hub = hub.clone();
            async move { hub.handle(req).await }
        });
        serve_http1(listener, service, cancel).await
    }

    async fn handle(&self, req: Request<Incoming>) -> http::Result<HttpResponse> {
        match (req.method(), req.uri().path()) {
            (&Method::POST, INGEST_PATH) => self.handle_ingest(req).await,
            (&Method::GET, AGENT_CONFIG_PATH) => self.proxy_config(req.headers()).await,
            (_, INGEST_PATH | AGENT_CONFIG_PATH) => log_and_create_http_response(
                &format!("Method {} not allowed", req.method()),
                StatusCode::METHOD_NOT_ALLOWED,
            ),
            (_, path) => log_and_create_http_response(
                &format!("Hub received request on unknown path {path}"),
                StatusCode::NOT_FOUND,
            ),
        }
    }

    async fn handle_ingest(&self, req: Request<Incoming>) -> http::Result<HttpResponse> {
        let Some(auth) = authorization(req.headers()) else {
            return log_and_create_http_response(
                "Hub ingest: Missing Authorization header",
                StatusCode::UNAUTHORIZED,
            );
        };
        if let Some(response) = verify_request_content_length(
            req.headers(),
            self.max_content_length,
            "Hub ingest",
        ) {
            return response;
        }
        let encoding = req
            .headers()
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = match Limited::new(req.into_body(), self.max_content_length)
            .collect()
            .await
        {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<http_body_util::LengthLimitError>() => {
                return log_and_create_http_response(
                    "Hub ingest: Payload too large",
                    StatusCode::PAYLOAD_TOO_LARGE,
                );
            }
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Hub ingest: Error reading request body: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        let batch = match decode_batch(&body, encoding.as_deref(), self.max_content_length) {
            Ok(batch) => batch,
            Err(IngestRejection::TooLarge) => {
                return log_and_create_http_response(
                    "Hub ingest: Payload too large",
                    StatusCode::PAYLOAD_TOO_LARGE,
                );
            }
            Err(IngestRejection::UnsupportedEncoding(encoding)) => {
                return log_and_create_http_response(
                    &format!("Hub ingest: Unsupported Content-Encoding {encoding}"),
                    StatusCode::UNSUPPORTED_MEDIA_TYPE,
                );
            }
            Err(IngestRejection::Invalid(reason)) => {
                return log_and_create_http_response(
                    &format!("Hub ingest: Invalid payload: {reason}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        let count = batch.len();
        for envelope in stamp_relayed(batch, &auth) {
            if let Err(e) = self.outbox.append(envelope) {
                return log_and_create_http_response(
                    &format!("Hub ingest: Unable to buffer batch: {e}"),
                    StatusCode::INTERNAL_SERVER_ERROR,
                );
            }
        }
        info!("Hub ingest buffered {count} envelopes");
        log_and_create_http_response(
            &format!("Buffered {count} envelopes"),
            StatusCode::ACCEPTED,
        )
    }

    async fn proxy_config(&self, headers: &HeaderMap) -> http::Result<HttpResponse> {
        let Some(auth) = authorization(headers) else {
            return log_and_create_http_response(
                "Hub config proxy: Missing Authorization header",
                StatusCode::UNAUTHORIZED,
            );
        };
        let upstream = match self
            .client
            .get(&self.config_endpoint)
            .header(reqwest::header::AUTHORIZATION, auth)
            .send()
            .await
        {
            Ok(upstream) => upstream,
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Hub config proxy: Upstream error: {e}"),
                    StatusCode::BAD_GATEWAY,
                );
            }
        };

        let status = StatusCode::from_u16(upstream.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let content_type = upstream
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = match upstream.bytes().await {
            Ok(body) => body,
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Hub config proxy: Error reading upstream body: {e}"),
                    StatusCode::BAD_GATEWAY,
                );
            }
        };
        debug!(status = status.as_u16(), "Hub config proxy answered");
        create_passthrough_response(status, content_type.as_deref(), body)
    }
}

fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Decodes a whole batch before anything is buffered, so a bad request leaves the outbox
/// untouched.
pub fn decode_batch(
    body: &[u8],
    content_encoding: Option<&str>,
    max_decoded_len: usize,
) -> Result<Vec<Envelope>, IngestRejection> {
    let decoded: Vec<u8> = match content_encoding.map(str::trim) {
        None | Some("") | Some("identity") => body.to_vec(),
        Some(enc) if enc.eq_ignore_ascii_case("zstd") => {
            let decoder = zstd::stream::read::Decoder::new(body)
                .map_err(|e| IngestRejection::Invalid(e.to_string()))?;
            let mut decoded = Vec::new();
            decoder
                .take(max_decoded_len as u64 + 1)
                .read_to_end(&mut decoded)
                .map_err(|e: io::Error| IngestRejection::Invalid(e.to_string()))?;
            if decoded.len() > max_decoded_len {
                return Err(IngestRejection::TooLarge);
            }
            decoded
        }
        Some(other) => return Err(IngestRejection::UnsupportedEncoding(other.to_string())),
    };
    serde_json::from_slice(&decoded).map_err(|e| IngestRejection::Invalid(e.to_string()))
}

/// Marks envelopes as relayed and binds them to the credential they arrived with.
pub fn stamp_relayed(batch: Vec<Envelope>, auth_header: &str) -> Vec<Envelope> {
    batch
        .into_iter()
        .map(|mut envelope| {
            envelope.meta.insert(META_VIA.to_string(), "hub".to_string());
            envelope.auth_header = Some(auth_header.to_string());
            envelope
        })
        .collect()
}
