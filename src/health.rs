// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Liveness and readiness probes.

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Readiness flag shared between the probe server and startup.
#[derive(Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

fn route(method: &Method, path: &str, ready: bool) -> (StatusCode, &'static str) {
    if *method != Method::GET {
        return (StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }
    match path {
        "/healthz" => (StatusCode::OK, "ok"),
        "/readyz" if ready => (StatusCode::OK, "ok"),
        "/readyz" => (StatusCode::SERVICE_UNAVAILABLE, "not ready"),
        _ => (StatusCode::NOT_FOUND, "not found"),
    }
}

async fn handle(
    req: Request<Incoming>,
    readiness: Readiness,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (status, body) = route(req.method(), req.uri().path(), readiness.is_ready());
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    Ok(response)
}

/// Serve `/healthz` and `/readyz` on `addr` until the process exits.
pub async fn serve(addr: SocketAddr, readiness: Readiness) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Health probes listening on {}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        let readiness = readiness.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| handle(req, readiness.clone()));
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("Probe connection from {} failed: {}", peer, e);
            }
        });
    }
}
