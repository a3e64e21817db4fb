//! InfluxDB v2 HTTP client.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use http_body_util::{BodyExt, Collected, Full};
use hyper::{
    body::{Bytes, Incoming},
    header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Method, Request, Response, Uri,
};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client as HyperClient},
    rt::TokioExecutor,
};
use rustls::{ClientConfig, RootCertStore};
use serde::Deserialize;
use tracing::warn;
use url::Url;

use super::{Client, ClientError, Connect};
use crate::point::{encode_batch, Point};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct ReadyResponse {
    status: String,
}

/// Builds [`HttpClient`]s.
#[derive(Clone)]
pub struct HttpConnect {
    https: HttpsConnector<HttpConnector>,
    request_timeout: Duration,
}

impl HttpConnect {
    /// Creates a connector whose clients give up on requests after `request_timeout`.
    ///
    /// Native root certificates are used to verify HTTPS backends. If none can be loaded, only plain HTTP backends
    /// will be reachable.
    pub fn new(request_timeout: Duration) -> Self {
        let builder = match HttpsConnectorBuilder::new().with_native_roots() {
            Ok(builder) => builder,
            Err(e) => {
                warn!(error = %e, "Failed to load native root certificates; HTTPS backends will be unreachable.");
                let tls = ClientConfig::builder().with_root_certificates(RootCertStore::empty()).with_no_client_auth();
                HttpsConnectorBuilder::new().with_tls_config(tls)
            }
        };

        HttpConnect { https: builder.https_or_http().enable_http1().build(), request_timeout }
    }
}

impl Default for HttpConnect {
    fn default() -> Self {
        HttpConnect::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl Connect for HttpConnect {
    type Client = HttpClient;

    fn connect(&self, url: &Url, token: &str) -> HttpClient {
        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build(self.https.clone());

        HttpClient { client, base: base_url(url), auth: token_auth(token), request_timeout: self.request_timeout }
    }
}

/// A client for the InfluxDB v2 HTTP API.
///
/// Points are written to `/api/v2/write` as line protocol with nanosecond precision, and readiness is checked with
/// `/ready`.
pub struct HttpClient {
    client: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    base: Url,
    auth: Option<HeaderValue>,
    request_timeout: Duration,
}

impl HttpClient {
    fn write_url(&self, organization: &str, bucket: &str) -> Result<Url, ClientError> {
        let mut url = self.base.join("api/v2/write").map_err(|e| ClientError::Request(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("org", organization)
            .append_pair("bucket", bucket)
            .append_pair("precision", "ns");
        Ok(url)
    }

    fn ready_url(&self) -> Result<Url, ClientError> {
        self.base.join("ready").map_err(|e| ClientError::Request(e.to_string()))
    }

    fn request(&self, method: Method, url: &Url, body: Vec<u8>) -> Result<Request<Full<Bytes>>, ClientError> {
        let uri = url.as_str().parse::<Uri>().map_err(|e| ClientError::Request(e.to_string()))?;

        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(auth) = &self.auth {
            builder = builder.header(AUTHORIZATION, auth.clone());
        }
        if !body.is_empty() {
            builder = builder.header(CONTENT_TYPE, "text/plain; charset=utf-8");
        }

        builder.body(Full::from(body)).map_err(|e| ClientError::Request(e.to_string()))
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> Result<(u16, Bytes), ClientError> {
        let exchange = async {
            let response: Response<Incoming> =
                self.client.request(request).await.map_err(|e| ClientError::Request(e.to_string()))?;
            let status = response.status().as_u16();
            let body = response
                .into_body()
                .collect()
                .await
                .map(Collected::to_bytes)
                .map_err(|e| ClientError::Request(e.to_string()))?;
            Ok::<_, ClientError>((status, body))
        };

        with_timeout(self.request_timeout, exchange).await
    }
}

#[async_trait]
impl Client for HttpClient {
    async fn write_points(&self, organization: &str, bucket: &str, points: &[Point]) -> Result<(), ClientError> {
        let body = encode_batch(points);
        if body.is_empty() {
            return Err(ClientError::Encode(format!("none of the {} points could be encoded", points.len())));
        }

        let url = self.write_url(organization, bucket)?;
        let request = self.request(Method::POST, &url, body)?;
        let (status, body) = self.send(request).await?;
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(status_error(status, &body))
        }
    }

    async fn ready(&self) -> Result<bool, ClientError> {
        let url = self.ready_url()?;
        let request = self.request(Method::GET, &url, Vec::new())?;
        let (status, body) = self.send(request).await?;
        if !(200..300).contains(&status) {
            return Err(status_error(status, &body));
        }

        let ready: ReadyResponse = serde_json::from_slice(&body)
            .map_err(|e| ClientError::Request(format!("invalid readiness response: {e}")))?;
        Ok(ready.status == "ready")
    }
}

async fn with_timeout<F, T>(timeout: Duration, fut: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    tokio::time::timeout(timeout, fut).await.map_err(|_| ClientError::Timeout(timeout))?
}

fn status_error(status: u16, body: &Bytes) -> ClientError {
    let body = String::from_utf8(body.to_vec()).unwrap_or_else(|_| String::from("<failed to read response body>"));
    ClientError::Status { status, body }
}

// Relative joins replace the last path segment unless the base ends with a slash, which would drop any path prefix
// the backend is served under.
fn base_url(url: &Url) -> Url {
    let mut base = url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.set_query(None);
    base.set_fragment(None);
    base
}

fn token_auth(token: &str) -> Option<HeaderValue> {
    if token.is_empty() {
        return None;
    }

    match HeaderValue::from_str(&format!("Token {token}")) {
        Ok(mut header) => {
            header.set_sensitive(true);
            Some(header)
        }
        Err(e) => {
            warn!(error = %e, "Access token is not a valid header value; requests will be unauthenticated.");
            None
        }
    }
}
