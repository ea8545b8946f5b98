//! Delivery of payloads over HTTP.

use std::net::IpAddr;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header::CONTENT_TYPE, HeaderValue, Request, StatusCode, Uri};
use http_body_util::{BodyExt as _, Full};
use tower::BoxError;

mod conn;
pub use self::conn::{AddressOverride, HttpsCapableConnector, HttpsCapableConnectorBuilder, OverridableResolver};

mod http_client;
pub use self::http_client::{HttpClient, HttpClientBuilder};

mod tls;
pub use self::tls::build_client_tls_config;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Where a payload should be sent.
#[derive(Clone, Debug)]
pub struct WriteTarget {
    uri: Uri,
    addr: Option<IpAddr>,
}

impl WriteTarget {
    /// Creates a target that connects to the endpoint's host as given.
    pub fn direct(uri: Uri) -> Self {
        Self { uri, addr: None }
    }

    /// Creates a target that connects to `addr` instead of resolving the endpoint's host.
    ///
    /// The URI is kept as is, so the `Host` header and the TLS server name still carry the original host.
    pub fn resolved(uri: Uri, addr: IpAddr) -> Self {
        Self { uri, addr: Some(addr) }
    }

    /// Returns the endpoint URI.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Returns the address to connect to, if the endpoint's host was resolved ahead of time.
    pub fn addr(&self) -> Option<IpAddr> {
        self.addr
    }
}

/// The parts of a response the sender cares about.
#[derive(Clone, Debug)]
pub struct TransportResponse {
    /// Response status.
    pub status: StatusCode,

    /// Response body.
    pub body: Bytes,
}

/// Sends payloads to the delivery endpoint.
#[async_trait]
pub trait Transport: Send {
    /// Posts `payload` to the given target, returning the response.
    ///
    /// # Errors
    ///
    /// If the request could not be sent, or the response could not be read, an error is returned. A response with a
    /// non-success status is not an error at this level.
    async fn write(&mut self, target: &WriteTarget, payload: Bytes) -> Result<TransportResponse, BoxError>;
}

#[async_trait]
impl Transport for HttpClient<Full<Bytes>> {
    async fn write(&mut self, target: &WriteTarget, payload: Bytes) -> Result<TransportResponse, BoxError> {
        let request = Request::post(target.uri().clone())
            .header(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE))
            .body(Full::new(payload))?;

        let response = self.send_to(request, target.addr()).await?;
        let status = response.status();

        // Always drain the body so the connection can go back into the pool.
        let body = response.into_body().collect().await?.to_bytes();

        Ok(TransportResponse { status, body })
    }
}
