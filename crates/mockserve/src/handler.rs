//! Request dispatch for the mock server.
//!
//! Every inbound request is read in full, captured, then matched against the
//! active mode. A match is optionally delayed and answered with the configured
//! status, headers and body. Anything else gets an empty 404.

use crate::capture::CaptureSender;
use crate::server::ServerState;
use crate::types::{Headers, RequestData, ResponseData};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Handle one request to the mock server
pub(crate) async fn handle_request(
    req: Request<Incoming>,
    state: Arc<ServerState>,
    captures: CaptureSender,
    client_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().to_string();
    let uri = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let headers = Headers::from_header_map(req.headers());

    let body = match req.into_body().collect().await {
        Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
        Err(e) => {
            warn!(
                "Failed to read body of {} {} from {}: {}",
                method, uri, client_addr, e
            );
            String::new()
        }
    };

    let captured = RequestData {
        uri: uri.clone(),
        method: method.clone(),
        body,
        headers,
        host: state.host.clone(),
        port: state.port,
    };
    captures.push(captured).await;

    let (mode, stub) = state.registry.lookup(&method, &uri);
    let Some(stub) = stub else {
        debug!(
            "No stub for {} {} in mode '{}' (from {}), replying 404",
            method, uri, mode, client_addr
        );
        return Ok(build_response(StatusCode::NOT_FOUND, Bytes::new()));
    };

    if !stub.wait.is_zero() {
        debug!("Holding {} {} for {:?}", method, uri, stub.wait);
        tokio::time::sleep(stub.wait).await;
    }

    debug!(
        "Replying {} to {} {} in mode '{}'",
        stub.status, method, uri, mode
    );
    Ok(build_stub_response(&stub))
}

/// Write a configured stub verbatim.
fn build_stub_response(stub: &ResponseData) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(stub.status);
    for (name, values) in stub.headers.iter() {
        for value in values {
            builder = builder.header(name, value.as_str());
        }
    }

    builder
        .body(Full::new(Bytes::from(stub.body.clone())))
        .unwrap_or_else(|e| {
            error!(
                "Invalid stub response for {} {}: {}",
                stub.method, stub.uri, e
            );
            build_response(StatusCode::INTERNAL_SERVER_ERROR, "Response build error")
        })
}

fn build_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}
