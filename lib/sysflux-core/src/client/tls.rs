use std::sync::Arc;

use anyhow::Context as _;
use rustls::{ClientConfig, RootCertStore};
use tracing::{debug, warn};

/// Builds the TLS client configuration used for HTTPS endpoints.
///
/// Uses AWS-LC as the cryptography provider and trusts the platform's native root certificates. Failing to load any
/// root certificate is not an error, since plain HTTP endpoints do not need them, but it is logged.
///
/// # Errors
///
/// If the cryptography provider does not support the default protocol versions, an error is returned.
pub fn build_client_tls_config() -> Result<ClientConfig, anyhow::Error> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let root_cert_store = load_platform_root_certificates();

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("Failed to configure TLS protocol versions.")?
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();

    Ok(config)
}

/// Loads root certificates from the platform's native certificate store.
///
/// `SSL_CERT_FILE` and `SSL_CERT_DIR` are honored: if either is set, certificates are only loaded from there.
fn load_platform_root_certificates() -> RootCertStore {
    let mut root_cert_store = RootCertStore::empty();

    let result = rustls_native_certs::load_native_certs();
    if !result.errors.is_empty() {
        let joined_errors = result
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        warn!(
            "Errors while loading certificates from the platform's native certificate store: {}",
            joined_errors
        );
    }

    let (added, failed) = root_cert_store.add_parsable_certificates(result.certs);
    match (added, failed) {
        (0, _) => warn!("No root certificates loaded. HTTPS endpoints will fail certificate validation."),
        (added, 0) => debug!("Added {} certificates to the root certificate store.", added),
        (added, failed) => debug!(
            "Added {} certificates to the root certificate store, but failed to add {} certificates.",
            added, failed
        ),
    }

    root_cert_store
}
