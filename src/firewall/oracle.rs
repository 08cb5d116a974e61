//! The malware oracle: queries a remote service about a single
//! package coordinate, coalesces concurrent queries for the same coordinate
//! into one in-flight request, caches the answer for the process lifetime,
//! and fails open (treats the package as clean) on timeout or transport
//! error so a degraded oracle never blocks installs outright.

use std::time::Duration;

use moka::future::Cache;
use rama::{
    Service,
    error::{ErrorContext as _, OpaqueError},
    http::{BodyExtractExt as _, Request, Response, StatusCode, Uri},
    telemetry::tracing,
};
use serde::Deserialize;

use super::coordinate::PackageCoordinate;

const ORACLE_BASE_URL: &str = "https://malware-oracle.aikido.dev/v1/check";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    Malicious,
}

#[derive(Debug, Deserialize)]
struct OracleResponse {
    malicious: bool,
}

pub struct MalwareOracle<C> {
    client: C,
    scan_timeout: Duration,
    cache: Cache<String, Verdict>,
}

impl<C> MalwareOracle<C>
where
    C: Service<Request, Output = Response, Error = OpaqueError>,
{
    pub fn new(client: C, scan_timeout: Duration) -> Self {
        Self {
            client,
            scan_timeout,
            cache: Cache::builder().max_capacity(100_000).build(),
        }
    }

    /// Consults the oracle for `coordinate`, coalescing concurrent callers
    /// for the same coordinate. Never returns an error: a failed or slow
    /// query resolves to [`Verdict::Clean`] (fail-open).
    pub async fn check(&self, coordinate: &PackageCoordinate) -> Verdict {
        let key = coordinate.cache_key();
        self.cache
            .get_with(key, self.query(coordinate))
            .await
    }

    async fn query(&self, coordinate: &PackageCoordinate) -> Verdict {
        match tokio::time::timeout(self.scan_timeout, self.query_inner(coordinate)).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(err)) => {
                tracing::warn!(
                    coordinate = %coordinate,
                    "malware oracle query failed, failing open: {err}"
                );
                Verdict::Clean
            }
            Err(_) => {
                tracing::warn!(
                    coordinate = %coordinate,
                    "malware oracle query timed out after {:?}, failing open",
                    self.scan_timeout
                );
                Verdict::Clean
            }
        }
    }

    async fn query_inner(&self, coordinate: &PackageCoordinate) -> Result<Verdict, OpaqueError> {
        let uri: Uri = format!(
            "{ORACLE_BASE_URL}?ecosystem={}&name={}&version={}",
            coordinate.ecosystem,
            percent_encoding::utf8_percent_encode(
                &coordinate.name,
                percent_encoding::NON_ALPHANUMERIC
            ),
            percent_encoding::utf8_percent_encode(
                &coordinate.version.to_string(),
                percent_encoding::NON_ALPHANUMERIC
            ),
        )
        .parse()
        .context("build malware oracle query URI")?;

        let req = Request::get(uri)
            .body(rama::http::Body::empty())
            .context("build malware oracle request")?;

        let resp = self
            .client
            .serve(req)
            .await
            .context("send malware oracle request")?;

        if resp.status() != StatusCode::OK {
            return Err(OpaqueError::from_display(format!(
                "malware oracle returned status {}",
                resp.status()
            )));
        }

        let parsed: OracleResponse = resp
            .try_into_json()
            .await
            .context("parse malware oracle response")?;

        Ok(if parsed.malicious {
            Verdict::Malicious
        } else {
            Verdict::Clean
        })
    }
}

impl<C> std::fmt::Debug for MalwareOracle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MalwareOracle")
            .field("scan_timeout", &self.scan_timeout)
            .field("cached_entries", &self.cache.entry_count())
            .finish()
    }
}
