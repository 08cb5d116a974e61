//! Per-host leaf certificate minting: on demand for a hostname `h`,
//! signed by the root CA, SAN = `{h}`, validity clamped to <= 398 days,
//! cached by `h` for the process lifetime with at-most-one-mint-per-host
//! coalescing.

use std::net::IpAddr;
use std::sync::Arc;

use moka::future::Cache;
use rama::{
    error::{ErrorContext as _, OpaqueError},
    net::tls::{
        DataEncoding,
        client::ClientHello,
        server::{DynamicCertIssuer, ServerAuthData},
    },
    net::address::Host,
};
use rcgen::{
    CertificateParams, ExtendedKeyUsagePurpose, KeyPair, KeyUsagePurpose, PKCS_ECDSA_P256_SHA256,
    SanType,
};

use super::root::RootCa;

/// Leaves are valid for at most 398 days (the CA/Browser Forum ceiling for
/// publicly-trusted leaf certs; clamped to the same bound here even though
/// this CA is privately trusted).
const LEAF_MAX_VALIDITY_DAYS: i64 = 398;

/// Mints and caches per-host leaf certificates, coalescing concurrent
/// requests for the same host into a single mint (moka's `get_with` gives
/// "at-most-one-in-flight-computation-per-key").
pub struct LeafIssuer {
    root: Arc<RootCa>,
    cache: Cache<String, ServerAuthData>,
}

impl LeafIssuer {
    pub fn new(root: Arc<RootCa>) -> Self {
        Self {
            root,
            cache: Cache::builder().max_capacity(10_000).build(),
        }
    }

    pub async fn issue_for_host(&self, host: &str) -> Result<ServerAuthData, OpaqueError> {
        let root = self.root.clone();
        let host = host.to_owned();
        self.cache
            .try_get_with(host.clone(), async move { mint_leaf(&root, &host) })
            .await
            .map_err(|err: Arc<OpaqueError>| {
                OpaqueError::from_display(format!("mint leaf certificate: {err}"))
            })
    }
}

impl std::fmt::Debug for LeafIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafIssuer")
            .field("cached_hosts", &self.cache.entry_count())
            .finish()
    }
}

impl DynamicCertIssuer for LeafIssuer {
    async fn issue_cert(
        &self,
        client_hello: ClientHello,
        server_name: Option<Host>,
    ) -> Result<ServerAuthData, OpaqueError> {
        let host = match client_hello.ext_server_name() {
            Some(host) => host.to_string(),
            None => server_name
                .ok_or_else(|| OpaqueError::from_display("no SNI and no fallback host"))?
                .to_string(),
        };
        self.issue_for_host(&host).await
    }
}

fn mint_leaf(root: &RootCa, host: &str) -> Result<ServerAuthData, OpaqueError> {
    let mut params = if let Ok(ip) = host.parse::<IpAddr>() {
        let mut params = CertificateParams::new(Vec::new()).context("create cert params")?;
        params.subject_alt_names.push(SanType::IpAddress(ip));
        params
    } else {
        CertificateParams::new(vec![host.to_owned()]).context("create cert params for host")?
    };

    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];

    let not_before = time::OffsetDateTime::now_utc();
    params.not_before = not_before;
    params.not_after = not_before + time::Duration::days(LEAF_MAX_VALIDITY_DAYS);

    let key_pair =
        KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).context("generate leaf key pair")?;
    let cert = params
        .signed_by(&key_pair, root.issuer())
        .with_context(|| format!("sign leaf certificate for host '{host}'"))?;

    let cert_pem = cert.pem();
    let key_pem = key_pair.serialize_pem();

    Ok(ServerAuthData {
        private_key: DataEncoding::Pem(
            key_pem
                .try_into()
                .context("leaf key PEM as non-empty string")?,
        ),
        cert_chain: DataEncoding::Pem(
            cert_pem
                .try_into()
                .context("leaf cert PEM as non-empty string")?,
        ),
        ocsp: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test::unique_empty_temp_dir;

    #[tokio::test]
    async fn test_issue_for_host_is_cached_per_host() {
        let dir = unique_empty_temp_dir("test_leaf_issuer").unwrap();
        let root = Arc::new(RootCa::load_or_create(&dir).unwrap());
        let issuer = LeafIssuer::new(root);

        let first = issuer.issue_for_host("registry.npmjs.org").await.unwrap();
        let second = issuer.issue_for_host("registry.npmjs.org").await.unwrap();
        // same cached ServerAuthData instance (by PEM equality) for the same host
        assert_eq!(
            format!("{:?}", first.cert_chain),
            format!("{:?}", second.cert_chain)
        );

        let other = issuer.issue_for_host("pypi.org").await.unwrap();
        assert_ne!(
            format!("{:?}", first.cert_chain),
            format!("{:?}", other.cert_chain)
        );
    }

    #[tokio::test]
    async fn test_concurrent_issue_for_same_host_coalesces() {
        let dir = unique_empty_temp_dir("test_leaf_issuer_coalesce").unwrap();
        let root = Arc::new(RootCa::load_or_create(&dir).unwrap());
        let issuer = Arc::new(LeafIssuer::new(root));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let issuer = issuer.clone();
            handles.push(tokio::spawn(async move {
                issuer.issue_for_host("registry.npmjs.org").await.unwrap()
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        let first = format!("{:?}", results[0].cert_chain);
        for result in &results[1..] {
            assert_eq!(first, format!("{:?}", result.cert_chain));
        }
    }
}
