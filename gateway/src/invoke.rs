//! The public invocation surface: `POST /function/:name`.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use faas_proxy::ProxyRequest;
use tracing::instrument;

use crate::error::ApiError;
use crate::state::AppState;

#[instrument(skip(state, headers, body), fields(function = %name))]
pub async fn invoke(
    State(state): State<AppState>,
    Path(name): Path<String>,
    method: axum::http::Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let address = state.coordinator.resolve(&name).await?;

    let response = state
        .proxy
        .forward(
            &address,
            ProxyRequest {
                method,
                headers,
                body,
            },
        )
        .await?;

    let mut builder = axum::http::Response::builder().status(response.status);
    for (name, value) in response.headers.iter() {
        builder = builder.header(name, value);
    }
    Ok(builder
        .body(axum::body::Body::from(response.body))
        .expect("upstream response maps to a valid http response")
        .into_response())
}
