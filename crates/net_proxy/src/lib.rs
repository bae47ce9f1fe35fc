//! The host-mediated network surface exposed to guests.
//!
//! Guests cannot open sockets; the only way out is [`VirtualNetClient`],
//! which sanitizes headers, consults the egress filter before any
//! connection, and returns flattened responses. The same filter also vets
//! every DNS resolution on the underlying client, so redirects cannot
//! escape it either.

mod dns;

pub use dns::FilteredDnsResolver;

use std::sync::Arc;

use anyhow::Context;
use egress::EgressFilter;
use errors::ErrorMetadata;
use indexmap::IndexMap;
use url::Url;

/// Header names never forwarded on behalf of a guest (case-insensitive).
const RESTRICTED_HEADERS: &[&str] = &["host", "content-length", "connection", "transfer-encoding"];

/// A flattened HTTP response: multi-valued headers collapse to their first
/// value, keyed by lowercased name.
#[derive(Clone, Debug)]
pub struct NetResponse {
    pub status: u16,
    pub headers: IndexMap<String, String>,
    pub body: String,
}

/// Build a reqwest client whose every outbound connection is subject to the
/// egress filter: name resolution goes through [`FilteredDnsResolver`] and
/// literal-IP redirect hops are re-checked by the redirect policy. All host
/// HTTP egress is expected to go through clients built here.
pub fn filtered_client(filter: Arc<EgressFilter>) -> anyhow::Result<reqwest::Client> {
    let redirect_filter = filter.clone();
    reqwest::Client::builder()
        .connect_timeout(*common::knobs::NET_CONNECT_TIMEOUT)
        .timeout(*common::knobs::NET_REQUEST_TIMEOUT)
        .dns_resolver(Arc::new(FilteredDnsResolver::new(filter)))
        .redirect(reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > 10 {
                return attempt.error(std::io::Error::other("too many redirects"));
            }
            if let Err(e) = redirect_filter.enforce_literal(attempt.url()) {
                return attempt.error(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    e.to_string(),
                ));
            }
            attempt.follow()
        }))
        .build()
        .context("failed to build filtered HTTP client")
}

/// The `net` binding installed into guest contexts when a request enables
/// networking. One method, `http`, covers the whole surface; the guest-side
/// shims layer `get`/`post`/`fetch` sugar on top of it.
pub struct VirtualNetClient {
    client: reqwest::Client,
    filter: Arc<EgressFilter>,
    handle: tokio::runtime::Handle,
}

impl VirtualNetClient {
    pub fn new(filter: Arc<EgressFilter>) -> anyhow::Result<Arc<Self>> {
        let client = filtered_client(filter.clone())?;
        let handle = tokio::runtime::Handle::try_current()
            .context("VirtualNetClient must be constructed on a tokio runtime")?;
        Ok(Arc::new(Self {
            client,
            filter,
            handle,
        }))
    }

    /// Issue an HTTP request on behalf of a guest. The method is uppercased,
    /// restricted headers are dropped, and the URL is enforced against the
    /// egress filter before any connection is attempted. GET/HEAD send no
    /// body; other methods send the UTF-8 body text.
    pub async fn http(
        &self,
        method: &str,
        url: &str,
        body: Option<String>,
        headers: &IndexMap<String, String>,
    ) -> anyhow::Result<NetResponse> {
        let method = method.to_ascii_uppercase();
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| ErrorMetadata::execution_failed("InvalidMethod", format!("invalid HTTP method: {method}")))?;
        let url: Url = url
            .parse()
            .map_err(|e| ErrorMetadata::egress_denied(format!("invalid URL {url}: {e}")))?;
        self.filter.enforce_url(&url).await?;

        let mut request = self.client.request(method.clone(), url.clone());
        for (name, v) in sanitize_headers(headers) {
            request = request.header(name, v);
        }
        if method != reqwest::Method::GET && method != reqwest::Method::HEAD {
            if let Some(body) = body {
                request = request.body(body);
            }
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        let status = response.status().as_u16();
        let mut flat = IndexMap::new();
        for (name, v) in response.headers() {
            let name = name.as_str().to_ascii_lowercase();
            if !flat.contains_key(&name) {
                if let Ok(v) = v.to_str() {
                    flat.insert(name, v.to_string());
                }
            }
        }
        let body = response.text().await.unwrap_or_default();
        Ok(NetResponse {
            status,
            headers: flat,
            body,
        })
    }

    /// Blocking wrapper for invocation workers, which run on plain threads
    /// outside the async runtime.
    pub fn http_blocking(
        &self,
        method: &str,
        url: &str,
        body: Option<String>,
        headers: &IndexMap<String, String>,
    ) -> anyhow::Result<NetResponse> {
        self.handle.block_on(self.http(method, url, body, headers))
    }
}

fn sanitize_headers(headers: &IndexMap<String, String>) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| {
            !RESTRICTED_HEADERS
                .iter()
                .any(|restricted| name.eq_ignore_ascii_case(restricted))
        })
        .map(|(name, v)| (name.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::routing::{
        get,
        post,
    };
    use egress::{
        BlocklistBuilder,
        EgressFilter,
    };
    use errors::ErrorMetadataAnyhowExt;
    use indexmap::IndexMap;

    use super::{
        sanitize_headers,
        VirtualNetClient,
    };

    fn headers(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn restricted_headers_are_dropped_case_insensitively() {
        let sanitized = sanitize_headers(&headers(&[
            ("Host", "evil.example"),
            ("CONTENT-LENGTH", "9999"),
            ("Connection", "keep-alive"),
            ("Transfer-Encoding", "chunked"),
            ("X-Custom", "kept"),
            ("accept", "application/json"),
        ]));
        assert_eq!(
            sanitized,
            vec![
                ("X-Custom".to_string(), "kept".to_string()),
                ("accept".to_string(), "application/json".to_string()),
            ],
        );
    }

    #[tokio::test]
    async fn blocked_literal_ip_is_denied_before_connect() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("blocklist.bin");
        let mut b = BlocklistBuilder::new();
        b.add_line("203.0.113.7/32");
        b.write_trie(&path)?;
        let filter = EgressFilter::new(&path);
        filter.ensure_loaded();

        let net = VirtualNetClient::new(filter)?;
        // 203.0.113.0/24 is TEST-NET-3: nothing listens there, so reaching
        // the error proves no connection was attempted.
        let err = net
            .http("GET", "http://203.0.113.7/", None, &IndexMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.short_msg(), "EgressDenied");
        Ok(())
    }

    #[tokio::test]
    async fn missing_blocklist_fails_closed() -> anyhow::Result<()> {
        let filter = EgressFilter::new("/nonexistent/blocklist.bin");
        filter.ensure_loaded();
        let net = VirtualNetClient::new(filter)?;
        let err = net
            .http("GET", "http://192.0.2.10/", None, &IndexMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.short_msg(), "EgressDenied");
        Ok(())
    }

    #[tokio::test]
    async fn invalid_url_is_denied() -> anyhow::Result<()> {
        let filter = EgressFilter::new("/nonexistent/blocklist.bin");
        let net = VirtualNetClient::new(filter)?;
        let err = net
            .http("GET", "not a url", None, &IndexMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.short_msg(), "EgressDenied");
        Ok(())
    }

    #[tokio::test]
    async fn proxies_to_loopback_and_flattens_headers() -> anyhow::Result<()> {
        // Loopback is never egress, so even a missing blocklist lets this
        // through; everything else in this test's world is blocked.
        let filter = EgressFilter::new("/nonexistent/blocklist.bin");
        filter.ensure_loaded();

        let app = axum::Router::new()
            .route("/hello", get(|| async { "hi" }))
            .route(
                "/echo",
                post(|body: String| async move {
                    (
                        [("x-echo", "first"), ("content-type", "text/plain")],
                        body.to_uppercase(),
                    )
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let net = VirtualNetClient::new(filter)?;
        let response = net
            .http(
                // Lowercased methods are normalized before dispatch.
                "post",
                &format!("http://127.0.0.1:{port}/echo"),
                Some("marco".to_string()),
                &headers(&[("Host", "should-be-dropped"), ("x-guest", "1")]),
            )
            .await?;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "MARCO");
        assert_eq!(response.headers.get("x-echo").map(String::as_str), Some("first"));

        let response = net
            .http(
                "GET",
                &format!("http://127.0.0.1:{port}/hello"),
                // GET sends no body even when one is supplied.
                Some("ignored".to_string()),
                &IndexMap::new(),
            )
            .await?;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "hi");
        Ok(())
    }
}
