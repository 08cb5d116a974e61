//! TLS interception: a per-process root CA, a per-host leaf cache driving a
//! dynamic certificate issuer, and the combined CA bundle file that package
//! managers are pointed at via `SSL_CERT_FILE`/`REQUESTS_CA_BUNDLE`/`PIP_CERT`.

pub mod leaf;
pub mod root;

use std::path::Path;
use std::sync::Arc;

use rama::{
    error::{ErrorContext as _, OpaqueError},
    net::tls::server::{ServerAuth, ServerCertIssuerData, ServerCertIssuerKind, ServerConfig},
    tls::boring::server::{TlsAcceptorData, TlsAcceptorLayer},
};

use leaf::LeafIssuer;
use root::RootCa;

const CA_BUNDLE_FILE: &str = "ca-bundle.pem";

/// Everything TLS-interception-related a running proxy needs: the acceptor
/// layer to put in front of the MITM server, and the path to the combined CA
/// bundle published in the proxy state record.
pub struct TlsInterception {
    pub acceptor_layer: TlsAcceptorLayer,
    pub ca_bundle_path: std::path::PathBuf,
}

/// Loads or creates the root CA, builds the leaf issuer and TLS acceptor,
/// and writes the combined CA bundle (this CA's cert plus the host's
/// trusted system roots) so pip-family clients that read `PIP_CERT` /
/// `REQUESTS_CA_BUNDLE` instead of the OS trust store still work.
pub fn load_or_create(data_dir: &Path) -> Result<TlsInterception, OpaqueError> {
    let root = Arc::new(RootCa::load_or_create(data_dir)?);
    let ca_bundle_path = write_combined_ca_bundle(data_dir, root.cert_pem())?;

    let issuer = LeafIssuer::new(root);
    let tls_server_config = ServerConfig::new(ServerAuth::CertIssuer(ServerCertIssuerData {
        kind: ServerCertIssuerKind::from_dynamic_issuer(issuer),
        max_cache_size: 0,
        disable_cache_for_dynamic_issuer: true,
        ..Default::default()
    }));

    let acceptor_data = TlsAcceptorData::try_from(tls_server_config)
        .context("build TLS acceptor data from dynamic cert issuer config")?;
    let acceptor_layer = TlsAcceptorLayer::new(acceptor_data).with_store_client_hello(true);

    Ok(TlsInterception {
        acceptor_layer,
        ca_bundle_path,
    })
}

/// Writes `{this CA's cert}\n{the host's trusted system roots}` so a client
/// configured to trust only this bundle still trusts ordinary
/// (non-intercepted) hosts it tunnels to.
fn write_combined_ca_bundle(
    data_dir: &Path,
    root_ca_pem: &str,
) -> Result<std::path::PathBuf, OpaqueError> {
    let mut bundle = String::with_capacity(root_ca_pem.len() + 256 * 1024);
    bundle.push_str(root_ca_pem);
    if !bundle.ends_with('\n') {
        bundle.push('\n');
    }

    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        rama::telemetry::tracing::warn!("skipping unreadable system root certificate: {err}");
    }
    for cert in native.certs {
        let block = pem::Pem::new("CERTIFICATE".to_owned(), cert.as_ref().to_vec());
        bundle.push_str(&pem::encode(&block));
    }

    let path = data_dir.join(CA_BUNDLE_FILE);
    std::fs::write(&path, bundle.as_bytes())
        .with_context(|| format!("write combined CA bundle '{}'", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test::unique_empty_temp_dir;

    #[test]
    fn test_combined_bundle_contains_root_ca() {
        let dir = unique_empty_temp_dir("test_tls_bundle").unwrap();
        let root = RootCa::load_or_create(&dir).unwrap();
        let cert_pem = root.cert_pem().to_owned();

        let bundle_path = write_combined_ca_bundle(&dir, &cert_pem).unwrap();
        let bundle = std::fs::read_to_string(&bundle_path).unwrap();

        assert!(bundle.starts_with(&cert_pem));
        assert!(bundle.matches("BEGIN CERTIFICATE").count() >= 1);
    }
}
