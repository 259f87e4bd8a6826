use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;

use super::util::{has_header, host_header_value};
use super::{Error, HttpRequest, HttpResponse, Result};

/// Pooled HTTP/1 client shared by every virtual user of a run.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        // OS connect timeouts run to tens of seconds against unreachable hosts.
        Self::new(Some(Duration::from_secs(3)))
    }
}

impl HttpClient {
    #[must_use]
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(connect_timeout);
        http_connector.set_nodelay(true);

        let https_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let inner = Client::builder(TokioExecutor::new()).build(https_connector);

        Self { inner }
    }

    /// Sends the request and reads the full body. The per-request timeout covers both.
    pub async fn request(&self, req: HttpRequest) -> Result<HttpResponse> {
        match req.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.request_inner(req)).await {
                Ok(res) => res,
                Err(_) => Err(Error::Timeout(timeout)),
            },
            None => self.request_inner(req).await,
        }
    }

    async fn request_inner(&self, req: HttpRequest) -> Result<HttpResponse> {
        let req = into_hyper_request(req)?;
        let (parts, body) = self.inner.request(req).await?.into_parts();
        let body = body.collect().await?.to_bytes();

        Ok(HttpResponse {
            status: parts.status.as_u16(),
            body,
            headers: flatten_headers(&parts.headers),
        })
    }
}

fn into_hyper_request(req: HttpRequest) -> Result<Request<Full<Bytes>>> {
    let HttpRequest {
        method,
        url,
        headers,
        body,
        ..
    } = req;

    let parsed = url::Url::parse(&url).map_err(|_| Error::InvalidUrl(url.clone()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::UnsupportedScheme(url));
    }
    let uri: hyper::Uri = url.parse().map_err(|_| Error::InvalidUrl(url.clone()))?;

    let mut builder = Request::builder().method(method).uri(uri);
    if !has_header(&headers, "host")
        && let Some(host) = host_header_value(&parsed)
    {
        builder = builder.header(http::header::HOST, host);
    }
    if !body.is_empty() && !has_header(&headers, "content-length") {
        builder = builder.header(http::header::CONTENT_LENGTH, body.len());
    }
    for (name, value) in &headers {
        builder = builder.header(
            HeaderName::from_bytes(name.as_bytes())?,
            HeaderValue::from_str(value)?,
        );
    }

    Ok(builder.body(Full::new(body))?)
}

/// One entry per header name, sorted; repeated values are joined with `", "`.
fn flatten_headers(map: &HeaderMap) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = map
        .keys()
        .map(|name| {
            let joined = map
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()))
                .collect::<Vec<_>>()
                .join(", ");
            (name.as_str().to_string(), joined)
        })
        .collect();
    out.sort_unstable();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn unreachable_host_fails_fast_with_connect_timeout() {
        let client = HttpClient::new(Some(Duration::from_millis(200)));
        let req = HttpRequest::get("http://192.0.2.1:81/");

        let started = Instant::now();
        let res = client.request(req).await;
        let elapsed = started.elapsed();

        assert!(res.is_err(), "expected failure, got {res:?}");
        assert!(
            elapsed < Duration::from_secs(2),
            "expected fast failure, elapsed={elapsed:?}"
        );
    }

    #[tokio::test]
    async fn request_timeout_is_reported_as_timeout() {
        // Accepts connections at the socket level but never answers.
        let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => l,
            Err(err) => panic!("bind failed: {err}"),
        };
        let addr = match listener.local_addr() {
            Ok(a) => a,
            Err(err) => panic!("local_addr failed: {err}"),
        };

        let client = HttpClient::new(Some(Duration::from_secs(5)));
        let req = HttpRequest::get(format!("http://{addr}/"))
            .with_timeout(Some(Duration::from_millis(100)));

        match client.request(req).await {
            Err(err) => assert!(err.is_timeout(), "expected timeout, got {err}"),
            Ok(res) => panic!("expected timeout, got {res:?}"),
        }
    }

    #[test]
    fn repeated_headers_are_joined() {
        let mut map = HeaderMap::new();
        map.append("set-cookie", HeaderValue::from_static("a=1"));
        map.append("set-cookie", HeaderValue::from_static("b=2"));
        map.insert("content-type", HeaderValue::from_static("application/json"));

        assert_eq!(
            flatten_headers(&map),
            vec![
                ("content-type".to_string(), "application/json".to_string()),
                ("set-cookie".to_string(), "a=1, b=2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        let client = HttpClient::default();
        match client.request(HttpRequest::get("ftp://example.com/")).await {
            Err(err) => assert_eq!(
                err.failure(),
                crate::TransportFailure::InvalidRequest
            ),
            Ok(res) => panic!("expected error, got {res:?}"),
        }
    }
}
