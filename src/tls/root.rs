//! Root CA: generated on first start, persisted with owner-only permissions,
//! loaded on subsequent starts.

use std::path::{Path, PathBuf};

use rama::error::{ErrorContext as _, OpaqueError};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, Issuer, IsCa, KeyPair,
    KeyUsagePurpose, PKCS_ECDSA_P256_SHA256,
};

const ROOT_CA_COMMON_NAME: &str = "Safe-Chain Proxy CA";
const ROOT_CA_CERT_FILE: &str = "ca.pem";
const ROOT_CA_KEY_FILE: &str = "ca.key";
const ROOT_CA_VALIDITY_YEARS: i64 = 20;

/// The long-lived root CA key pair and self-signed certificate, plus the
/// `rcgen` issuer derived from them used to sign per-host leaves.
pub struct RootCa {
    issuer: Issuer<'static, KeyPair>,
    cert_pem: String,
    cert_path: PathBuf,
}

impl RootCa {
    /// Loads the root CA from `data_dir` if present, otherwise generates and
    /// persists a new one.
    pub fn load_or_create(data_dir: &Path) -> Result<Self, OpaqueError> {
        let cert_path = data_dir.join(ROOT_CA_CERT_FILE);
        let key_path = data_dir.join(ROOT_CA_KEY_FILE);

        let (cert_pem, key_pem) = match (cert_path.exists(), key_path.exists()) {
            (true, true) => {
                let cert_pem = std::fs::read_to_string(&cert_path)
                    .with_context(|| format!("read root CA cert '{}'", cert_path.display()))?;
                let key_pem = std::fs::read_to_string(&key_path)
                    .with_context(|| format!("read root CA key '{}'", key_path.display()))?;
                (cert_pem, key_pem)
            }
            (false, false) => {
                let (cert_pem, key_pem) = generate_root_ca()?;
                crate::storage::write_owner_only_file(&key_path, key_pem.as_bytes())
                    .with_context(|| format!("persist root CA key '{}'", key_path.display()))?;
                // the cert is not secret; readable by the client-facing
                // combined CA bundle, so a plain write is fine here.
                std::fs::write(&cert_path, cert_pem.as_bytes())
                    .with_context(|| format!("persist root CA cert '{}'", cert_path.display()))?;
                (cert_pem, key_pem)
            }
            _ => {
                return Err(OpaqueError::from_display(format!(
                    "root CA cert/key are out of sync: cert '{}' present={}, key '{}' present={}",
                    cert_path.display(),
                    cert_path.exists(),
                    key_path.display(),
                    key_path.exists(),
                )));
            }
        };

        let key_pair = KeyPair::from_pem(&key_pem).context("parse root CA key PEM")?;
        let issuer = Issuer::from_ca_cert_pem(&cert_pem, key_pair)
            .context("parse root CA cert PEM as issuer")?;

        Ok(Self {
            issuer,
            cert_pem,
            cert_path,
        })
    }

    pub fn issuer(&self) -> &Issuer<'static, KeyPair> {
        &self.issuer
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }
}

fn generate_root_ca() -> Result<(String, String), OpaqueError> {
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, ROOT_CA_COMMON_NAME);
    params.distinguished_name = dn;

    let not_before = time::OffsetDateTime::now_utc();
    params.not_before = not_before;
    params.not_after = not_before + time::Duration::days(365 * ROOT_CA_VALIDITY_YEARS);

    let key_pair =
        KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).context("generate root CA key pair")?;
    let cert = params
        .self_signed(&key_pair)
        .context("self-sign root CA certificate")?;

    Ok((cert.pem(), key_pair.serialize_pem()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test::unique_empty_temp_dir;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_load_or_create_persists_and_reloads() {
        let dir = unique_empty_temp_dir("test_root_ca").unwrap();

        let first = RootCa::load_or_create(&dir).unwrap();
        assert!(first.cert_pem().contains("BEGIN CERTIFICATE"));
        assert!(dir.join(ROOT_CA_CERT_FILE).exists());
        assert!(dir.join(ROOT_CA_KEY_FILE).exists());

        let second = RootCa::load_or_create(&dir).unwrap();
        assert_eq!(first.cert_pem(), second.cert_pem());
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt as _;

        let dir = unique_empty_temp_dir("test_root_ca_perms").unwrap();
        RootCa::load_or_create(&dir).unwrap();

        let meta = std::fs::metadata(dir.join(ROOT_CA_KEY_FILE)).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }
}
