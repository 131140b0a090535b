use std::{sync::OnceLock, time::Duration};

use reqwest::{Client, header};

pub(crate) fn default_http_client_builder() -> reqwest::ClientBuilder {
    let mut headers = header::HeaderMap::new();
    headers.insert(header::CONNECTION, header::HeaderValue::from_static("keep-alive"));

    Client::builder()
        .timeout(Duration::from_secs(300))
        // Hyper's pool has no connection TTL, so DNS changes are only picked
        // up when idle connections age out. A short idle timeout keeps
        // record changes visible without hurting streaming requests, which
        // hold their connection open anyway.
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .default_headers(headers)
}

/// Common HTTP client to re-use as much as possible the same connections.
///
/// Gateway-token providers bypass this and build a fresh client per request.
pub(crate) fn http_client() -> Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            default_http_client_builder()
                .build()
                .expect("Failed to build default HTTP client")
        })
        .clone()
}

/// Uncached client for gateway-token mode, rebuilt on every call so stale
/// transport state never outlives a short-lived credential.
pub(crate) fn fresh_http_client() -> Client {
    default_http_client_builder()
        .build()
        .expect("Failed to build HTTP client")
}
