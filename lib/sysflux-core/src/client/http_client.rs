use std::{net::IpAddr, time::Duration};

use http::{Request, Response};
use hyper::body::{Body, Incoming};
use hyper_util::{
    client::legacy::Builder,
    rt::{TokioExecutor, TokioTimer},
};
use tower::{timeout::TimeoutLayer, util::BoxCloneService, BoxError, Service as _, ServiceBuilder, ServiceExt as _};

use super::{
    conn::{AddressOverride, HttpsCapableConnectorBuilder},
    tls::build_client_tls_config,
};

/// An HTTP client.
#[derive(Clone)]
pub struct HttpClient<B> {
    inner: BoxCloneService<Request<B>, Response<Incoming>, BoxError>,
    addr_override: AddressOverride,
}

impl HttpClient<()> {
    /// Creates a new builder for configuring an HTTP client.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }
}

impl<B> HttpClient<B>
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    /// Sends a request to the server, and waits for a response.
    ///
    /// # Errors
    ///
    /// If there was an error sending the request, or the request timed out, an error will be returned.
    pub async fn send(&mut self, req: Request<B>) -> Result<Response<Incoming>, BoxError> {
        self.inner.ready().await?.call(req).await
    }

    /// Sends a request to the server, connecting to `addr` instead of resolving the request's host, and waits for a
    /// response.
    ///
    /// The request URI is sent unchanged, so the `Host` header and the TLS server name still use the original host.
    /// Without `addr`, this is the same as [`send`][Self::send]. A pooled connection is reused if one is available,
    /// regardless of the address it was made to, unless the client was built
    /// [without connection reuse][HttpClientBuilder::without_connection_reuse].
    ///
    /// # Errors
    ///
    /// If there was an error sending the request, or the request timed out, an error will be returned.
    pub async fn send_to(&mut self, req: Request<B>, addr: Option<IpAddr>) -> Result<Response<Incoming>, BoxError> {
        self.addr_override.set(addr);
        self.send(req).await
    }
}

/// An HTTP client builder.
///
/// # Defaults
///
/// - support for both HTTP and HTTPS (uses the platform's root certificates for server certificate validation)
/// - HTTP/1.1
/// - 30 second connect timeout, 20 second per-request timeout
/// - connection pool for reusing connections (45 second idle connection timeout, at most 1 idle connection per host)
#[derive(Clone)]
pub struct HttpClientBuilder {
    connector_builder: HttpsCapableConnectorBuilder,
    hyper_builder: Builder,
    request_timeout: Duration,
}

impl HttpClientBuilder {
    /// Sets the timeout when connecting to the remote host.
    ///
    /// Defaults to 30 seconds.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connector_builder = self.connector_builder.with_connect_timeout(timeout);
        self
    }

    /// Sets the per-request timeout.
    ///
    /// Defaults to 20 seconds.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Opens a new connection for every request.
    ///
    /// Needed when requests are sent to a different address each time with [`HttpClient::send_to`].
    pub fn without_connection_reuse(mut self) -> Self {
        self.hyper_builder.pool_max_idle_per_host(0);
        self
    }

    /// Builds the `HttpClient`.
    ///
    /// # Errors
    ///
    /// If there was an error building the TLS configuration for the client, an error will be returned.
    pub fn build<B>(self) -> Result<HttpClient<B>, anyhow::Error>
    where
        B: Body + Clone + Unpin + Send + 'static,
        B::Data: Send,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        let tls_config = build_client_tls_config()?;
        let addr_override = AddressOverride::default();
        let connector = self.connector_builder.build(tls_config, addr_override.clone());
        let client = self.hyper_builder.build(connector);

        let inner = ServiceBuilder::new()
            .layer(TimeoutLayer::new(self.request_timeout))
            .service(client.map_err(BoxError::from))
            .boxed_clone();

        Ok(HttpClient { inner, addr_override })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        let mut hyper_builder = Builder::new(TokioExecutor::new());
        hyper_builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(1)
            .pool_idle_timeout(Duration::from_secs(45));

        Self {
            connector_builder: HttpsCapableConnectorBuilder::default(),
            hyper_builder,
            request_timeout: Duration::from_secs(20),
        }
    }
}
