//! Streamgate Admin Surface
//!
//! Read-only HTTP endpoints exposing the policy engine's statistics snapshot, live
//! backend load and the latest counters reported by each switch.

use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use streamgate_core::{
    CounterBook, PolicyEngine, SwitchCounters, SwitchId, SwitchRegistry, SwitchState,
};

/// Shared handles the admin endpoints read from.
#[derive(Debug, Clone)]
pub struct AdminState {
    /// Backend registry and statistics.
    pub policy: Arc<PolicyEngine>,
    /// Known switches.
    pub switches: Arc<SwitchRegistry>,
    /// Latest per-switch counters.
    pub counters: Arc<CounterBook>,
}

#[derive(Debug, Serialize)]
struct SwitchEntry {
    id: String,
    datapath: SwitchId,
    state: Option<SwitchState>,
    counters: Option<SwitchCounters>,
}

/// Serves the admin endpoints on `addr` until the listener fails.
pub async fn serve(
    addr: SocketAddr,
    state: AdminState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Admin surface listening");
    serve_listener(listener, state).await
}

/// Serves the admin endpoints on an already bound listener.
pub async fn serve_listener(
    listener: TcpListener,
    state: AdminState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let state = state.clone();
                async move { Ok::<_, hyper::Error>(route(req.method(), req.uri().path(), &state)) }
            });
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(%peer, ?err, "Error serving admin connection");
            }
        });
    }
}

/// Resolves one admin request to its JSON response.
pub fn route(method: &Method, path: &str, state: &AdminState) -> Response<Full<Bytes>> {
    debug!(%method, path, "Admin request");

    if method != Method::GET {
        return plain(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }

    match path {
        "/stats" => json(&state.policy.snapshot()),
        "/backends" => json(&state.policy.backends()),
        "/switches" => json(&switch_entries(state)),
        _ => plain(StatusCode::NOT_FOUND, "not found"),
    }
}

fn switch_entries(state: &AdminState) -> Vec<SwitchEntry> {
    state
        .switches
        .ids()
        .into_iter()
        .map(|id| SwitchEntry {
            id: id.to_string(),
            datapath: id,
            state: state.switches.state(id),
            counters: state.counters.get(id),
        })
        .collect()
}

fn json<T: Serialize>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(Full::new(Bytes::from(body)));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(err) => {
            warn!(%err, "Failed to encode admin response");
            plain(StatusCode::INTERNAL_SERVER_ERROR, "encoding failed")
        }
    }
}

fn plain(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(message.as_bytes())));
    *response.status_mut() = status;
    response
}
