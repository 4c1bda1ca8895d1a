// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::http;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::http_utils::{log_and_create_http_response, serve_http1, HttpResponse};

pub const HEALTH_PATH: &str = "/health";

/// Answers liveness probes on `listener` until `cancel` fires.
pub async fn serve(listener: TcpListener, cancel: CancellationToken) -> Result<(), AgentError> {
    let service = service_fn(|req: Request<Incoming>| async move { health_handler(&req) });
    serve_http1(listener, service, cancel).await
}

fn health_handler<B>(req: &Request<B>) -> http::Result<HttpResponse> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, HEALTH_PATH) => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from_static(b"ok"))),
        (_, path) => log_and_create_http_response(
            &format!("Health endpoint received request on unknown path {path}"),
            StatusCode::NOT_FOUND,
        ),
    }
}
