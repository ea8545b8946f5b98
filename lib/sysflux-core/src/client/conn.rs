use std::{
    io,
    net::{IpAddr, SocketAddr},
    sync::{Arc, Mutex, PoisonError},
    task::{Context, Poll},
    time::Duration,
};

use futures::future::BoxFuture;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::{
    dns::{GaiResolver, Name},
    HttpConnector,
};
use rustls::ClientConfig;
use tower::Service;

/// A connector that supports both HTTP and HTTPS.
pub type HttpsCapableConnector = HttpsConnector<HttpConnector<OverridableResolver>>;

/// An address to connect to in place of resolving the request's host.
///
/// Clones share the same slot. While an address is set, every new connection dials it, on the port from the request
/// URI. The request URI itself is left alone, so the `Host` header and the TLS server name still carry the original
/// host.
#[derive(Clone, Debug, Default)]
pub struct AddressOverride(Arc<Mutex<Option<IpAddr>>>);

impl AddressOverride {
    /// Sets the address to dial, or clears it.
    pub fn set(&self, addr: Option<IpAddr>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = addr;
    }

    /// Returns the address to dial, if one is set.
    pub fn get(&self) -> Option<IpAddr> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Connector resolver that prefers an [`AddressOverride`], falling back to the system resolver.
#[derive(Clone)]
pub struct OverridableResolver {
    addr_override: AddressOverride,
    system: GaiResolver,
}

impl OverridableResolver {
    fn new(addr_override: AddressOverride) -> Self {
        Self {
            addr_override,
            system: GaiResolver::new(),
        }
    }
}

impl Service<Name> for OverridableResolver {
    type Response = std::vec::IntoIter<SocketAddr>;
    type Error = io::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, name: Name) -> Self::Future {
        // Port zero is replaced with the port from the request URI by the connector.
        if let Some(addr) = self.addr_override.get() {
            return Box::pin(async move { Ok(vec![SocketAddr::new(addr, 0)].into_iter()) });
        }

        let lookup = self.system.call(name);
        Box::pin(async move { Ok(lookup.await?.collect::<Vec<_>>().into_iter()) })
    }
}

/// A builder for [`HttpsCapableConnector`].
#[derive(Clone, Default)]
pub struct HttpsCapableConnectorBuilder {
    connect_timeout: Option<Duration>,
}

impl HttpsCapableConnectorBuilder {
    /// Sets the timeout when connecting to the remote host.
    ///
    /// Defaults to 30 seconds.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Builds the connector from the given TLS configuration.
    ///
    /// Connections dial the address held by `addr_override` whenever one is set.
    pub fn build(self, tls_config: ClientConfig, addr_override: AddressOverride) -> HttpsCapableConnector {
        let connect_timeout = self.connect_timeout.unwrap_or(Duration::from_secs(30));

        // Don't enforce _only_ HTTP, since that would break wrapping this in an HTTPS connector.
        let mut http_connector = HttpConnector::new_with_resolver(OverridableResolver::new(addr_override));
        http_connector.set_connect_timeout(Some(connect_timeout));
        http_connector.enforce_http(false);

        HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector)
    }
}
