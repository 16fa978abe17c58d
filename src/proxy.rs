// src/proxy.rs
//
// Progress proxy. Browser clients cannot add the tunnel-bypass header to a
// plain navigation, so progress lookups go through this route:
//
//   GET /api/progress?nickname=<n>  ->  GET {backend}/progress?nickname=<n>
//
// Backend errors are relayed with the backend's status code; transport or
// decode failures become a 500.

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

struct ProxyState {
    http_client: reqwest::Client,
    backend_url: String,
}

/// Router serving `/api/progress`. `http_client` should carry the shared
/// API headers (see `api::http_client`).
pub fn router(backend_url: &str, http_client: reqwest::Client) -> Router {
    let state = Arc::new(ProxyState {
        http_client,
        backend_url: backend_url.trim_end_matches('/').to_string(),
    });

    Router::new()
        .route("/api/progress", get(progress))
        .with_state(state)
}

/// Bind and serve until the listener fails.
pub async fn serve(bind: &str, app: Router) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid proxy bind address: {}", bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("🔀 Progress proxy listening on http://{}", addr);

    axum::serve(listener, app).await.context("Proxy server error")
}

async fn progress(
    State(state): State<Arc<ProxyState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    // Repeated keys: only the first nickname is forwarded; empty means absent
    let nickname = params
        .iter()
        .find(|(key, _)| key == "nickname")
        .map(|(_, value)| value.as_str())
        .filter(|value| !value.is_empty());
    let url = format!("{}/progress", state.backend_url);

    let mut request = state.http_client.get(&url);
    if let Some(nickname) = nickname {
        request = request.query(&[("nickname", nickname)]);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            error!("🔀 Proxy request to {} failed: {}", url, e);
            return proxy_failure(e.to_string());
        }
    };

    let status = response.status();
    let relayed = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    if !status.is_success() {
        let reason = status.canonical_reason().unwrap_or("");
        warn!("🔀 Backend answered {} for nickname={:?}", status, nickname);
        let text = response.text().await.unwrap_or_default();
        let details = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        return (
            relayed,
            Json(json!({
                "message": format!("Error from backend: {}", reason),
                "details": details,
            })),
        )
            .into_response();
    }

    match response.json::<Value>().await {
        Ok(body) => (relayed, Json(body)).into_response(),
        Err(e) => {
            error!("🔀 Backend body from {} was not JSON: {}", url, e);
            proxy_failure(e.to_string())
        }
    }
}

fn proxy_failure(error: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "message": "Error proxying to backend",
            "error": error,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{local_config, serve as serve_app};
    use crate::api::{http_client, TUNNEL_BYPASS_HEADER};
    use axum::extract::RawQuery;
    use axum::http::HeaderMap;
    use std::collections::HashMap;

    async fn backend_progress(
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        let nickname = params.get("nickname").cloned().unwrap_or_default();
        match nickname.as_str() {
            "ghost" => (StatusCode::NOT_FOUND, Json(json!({"detail": "unknown user"}))).into_response(),
            "broken" => (StatusCode::BAD_GATEWAY, "upstream exploded").into_response(),
            _ => Json(json!({
                "nickname": nickname,
                "completed": 4,
                "tunnel_header": headers.get(TUNNEL_BYPASS_HEADER).is_some(),
            }))
            .into_response(),
        }
    }

    async fn echo_query(RawQuery(query): RawQuery) -> (StatusCode, Json<Value>) {
        (StatusCode::ACCEPTED, Json(json!({ "raw_query": query })))
    }

    async fn proxy_for(backend: SocketAddr) -> SocketAddr {
        let client = http_client(&local_config(backend)).unwrap();
        serve_app(router(&format!("http://{}/", backend), client)).await
    }

    fn test_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    async fn backend() -> SocketAddr {
        serve_app(Router::new().route("/progress", get(backend_progress))).await
    }

    #[tokio::test]
    async fn test_forwards_first_nickname_with_tunnel_header() {
        let proxy = proxy_for(backend().await).await;

        let response = test_client()
            .get(format!("http://{}/api/progress?nickname=ana&nickname=bob", proxy))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["nickname"], "ana");
        assert_eq!(body["completed"], 4);
        assert_eq!(body["tunnel_header"], true);
    }

    #[tokio::test]
    async fn test_relays_backend_error_status() {
        let proxy = proxy_for(backend().await).await;

        let response = test_client()
            .get(format!("http://{}/api/progress?nickname=ghost", proxy))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["message"], "Error from backend: Not Found");
        assert_eq!(body["details"], json!({"detail": "unknown user"}));

        let response = test_client()
            .get(format!("http://{}/api/progress?nickname=broken", proxy))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 502);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["details"], "upstream exploded");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_500() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap();
        drop(listener);
        let proxy = proxy_for(dead).await;

        let response = test_client()
            .get(format!("http://{}/api/progress?nickname=ana", proxy))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 500);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["message"], "Error proxying to backend");
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_other_methods_are_rejected() {
        let proxy = proxy_for(backend().await).await;

        let response = test_client()
            .post(format!("http://{}/api/progress", proxy))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 405);
        let allow = response.headers().get("allow").unwrap().to_str().unwrap();
        assert!(allow.contains("GET"));
    }

    #[tokio::test]
    async fn test_missing_or_empty_nickname_is_not_forwarded() {
        let backend = serve_app(Router::new().route("/progress", get(echo_query))).await;
        let proxy = proxy_for(backend).await;

        for path in ["/api/progress", "/api/progress?nickname="] {
            let response = test_client()
                .get(format!("http://{}{}", proxy, path))
                .send()
                .await
                .unwrap();
            let body: Value = response.json().await.unwrap();
            assert_eq!(body["raw_query"], Value::Null, "for {}", path);
        }

        let response = test_client()
            .get(format!("http://{}/api/progress?nickname=ana", proxy))
            .send()
            .await
            .unwrap();
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["raw_query"], "nickname=ana");
    }

    #[tokio::test]
    async fn test_success_status_is_relayed() {
        let backend = serve_app(Router::new().route("/progress", get(echo_query))).await;
        let proxy = proxy_for(backend).await;

        let response = test_client()
            .get(format!("http://{}/api/progress?nickname=ana", proxy))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 202);
    }
}
