//! Request helper for exercising a mock server like a real client would.

use crate::types::{display_addr, ClientError, Headers, RequestData, ResponseData};
use reqwest::header::{HeaderName, HeaderValue};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// Shared HTTP client for request helpers
static HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

fn get_http_client() -> &'static reqwest::Client {
    HTTP_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .no_proxy()
            .pool_max_idle_per_host(0) // Disable connection pooling to avoid stale connections
            .build()
            .expect("Failed to create HTTP client")
    })
}

/// Send `request` to `host:port` and return what came back.
///
/// The result carries the response status, body and headers, the request
/// method, and the host/port the request was sent to. Any status, including
/// 404, is a successful round trip; only transport failures are errors.
pub async fn do_request(
    host: &str,
    port: u16,
    request: &RequestData,
) -> Result<ResponseData, ClientError> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .map_err(|_| ClientError::InvalidMethod(request.method.clone()))?;

    let addr = display_addr(host, port);
    let url = format!("http://{}{}", addr, request.uri);
    let mut builder = get_http_client().request(method, &url);

    for (name, values) in request.headers.iter() {
        // Computed by the client for this request
        if name == "host" || name == "content-length" {
            continue;
        }
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ClientError::InvalidHeader(name.to_string()))?;
        for value in values {
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| ClientError::InvalidHeader(format!("{name}: {value}")))?;
            builder = builder.header(header_name.clone(), header_value);
        }
    }

    if !request.body.is_empty() {
        builder = builder.body(request.body.clone());
    }

    debug!("Sending {} {}", request.method, url);
    let response = builder
        .send()
        .await
        .map_err(|source| ClientError::Transport {
            addr: addr.clone(),
            source,
        })?;

    let status = response.status().as_u16();
    let headers = Headers::from_header_map(response.headers());
    let body = response
        .text()
        .await
        .map_err(|source| ClientError::Transport { addr, source })?;

    Ok(ResponseData {
        uri: request.uri.clone(),
        method: request.method.clone(),
        body,
        headers,
        host: host.to_string(),
        port,
        status,
        wait: Duration::ZERO,
    })
}
