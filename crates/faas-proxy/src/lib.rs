//! The Edge Proxy: forwards a client request to a chosen upstream
//! instance, rewriting the path to `/invoke` regardless of the inbound
//! path, since function containers expose a single handler there.

use bytes::Bytes;
use faas_common::{FaasError, Result};
use http::{HeaderMap, Method, StatusCode};
use tracing::error;

/// The inbound request, reduced to what the proxy actually forwards.
/// The inbound *path* is intentionally not part of this struct; it is
/// always discarded and replaced with `/invoke`.
pub struct ProxyRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Reverse proxy to a function container's fixed `/invoke` handler.
pub struct EdgeProxy {
    client: reqwest::Client,
}

impl EdgeProxy {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Forwards `request` to `target_address`, rewriting the path to
    /// `/invoke` and the Host header to `target_address`. A transport
    /// error (refused/reset/timeout) becomes `FaasError::ProxyTransport`
    /// The instance is not evicted here; a single proxy failure is
    /// not treated as proof the container is dead.
    pub async fn forward(&self, target_address: &str, request: ProxyRequest) -> Result<ProxyResponse> {
        let url = format!("http://{target_address}/invoke");

        let mut builder = self
            .client
            .request(request.method, &url)
            .body(request.body);

        for (name, value) in request.headers.iter() {
            if name == http::header::HOST {
                continue;
            }
            builder = builder.header(name, value);
        }
        builder = builder.header(http::header::HOST, target_address);

        let response = builder.send().await.map_err(|e| {
            error!(target_address, error = %e, "proxy transport error");
            FaasError::ProxyTransport(e.to_string())
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| FaasError::ProxyTransport(e.to_string()))?;

        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }
}

impl Default for EdgeProxy {
    fn default() -> Self {
        Self::new()
    }
}
