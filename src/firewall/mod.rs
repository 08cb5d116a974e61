//! The firewall: classifies which hosts get decrypted and inspected, and
//! decides, per decrypted request/response pair, whether to allow or block.

pub mod coordinate;
pub mod events;
pub mod npm;
pub mod notifier;
pub mod oracle;
pub mod pypi;
pub mod registries;
pub mod response;

use std::time::Duration;

use rama::{
    Service,
    error::OpaqueError,
    http::{Request, Response},
    net::address::{Domain, Host},
    telemetry::tracing,
};

use crate::config::Config;

use coordinate::{Ecosystem, PackageCoordinate};
use events::{BlockedArtifact, BlockedEventInfo, BlockedEvent};
use notifier::EventNotifier;
use oracle::{MalwareOracle, Verdict};
use registries::RegistryClassifier;

/// Everything the egress client needs to remember between forwarding a
/// request and inspecting the response that comes back for it.
#[derive(Debug, Clone)]
pub struct PendingInspection {
    ecosystem: Ecosystem,
    npm_metadata_package: Option<String>,
}

impl PendingInspection {
    fn passthrough(ecosystem: Ecosystem) -> Self {
        Self {
            ecosystem,
            npm_metadata_package: None,
        }
    }
}

pub enum RequestOutcome {
    Allow(Request, PendingInspection),
    Block(Response),
}

/// Classifies hosts, rewrites/filters ecosystem traffic, and consults the
/// malware oracle to decide whether a package install is allowed.
pub struct Firewall<C> {
    classifier: RegistryClassifier,
    oracle: MalwareOracle<C>,
    notifier: EventNotifier,
    min_package_age: Option<npm::MinPackageAge>,
}

impl<C> Firewall<C>
where
    C: Service<Request, Output = Response, Error = OpaqueError>,
{
    pub fn new(config: &Config, oracle_client: C, notifier: EventNotifier) -> Self {
        let min_package_age = config.minimum_package_age_hours.map(|hours| {
            npm::MinPackageAge::new(
                Duration::from_secs(hours.saturating_mul(3600)),
                &config.minimum_package_age_exclusions,
            )
        });

        Self {
            classifier: RegistryClassifier::new(config),
            oracle: MalwareOracle::new(oracle_client, Duration::from_millis(config.scan_timeout_ms)),
            notifier,
            min_package_age,
        }
    }

    /// Whether `domain` is a registry this firewall inspects, and if so,
    /// which ecosystem it belongs to. A tunnel-candidate (non-registry) host
    /// returns `None` and is never decrypted.
    pub fn classify_domain(&self, domain: &Domain) -> Option<Ecosystem> {
        self.classifier.classify(domain)
    }

    /// As [`Self::classify_domain`], but for a [`Host`] that might be a bare
    /// IP address (never a registry: npm/PyPI are always named hosts).
    pub fn classify_host(&self, host: &Host) -> Option<Ecosystem> {
        match host {
            Host::Name(domain) => self.classify_domain(domain),
            Host::Address(_) => None,
        }
    }

    /// Inspects a decrypted request bound for a registry host already
    /// identified as belonging to `ecosystem`.
    pub async fn inspect_request(
        &self,
        ecosystem: Ecosystem,
        req: Request,
    ) -> Result<RequestOutcome, OpaqueError> {
        match ecosystem {
            Ecosystem::Npm => self.inspect_npm_request(req).await,
            Ecosystem::Pip => self.inspect_pip_request(req).await,
        }
    }

    /// Inspects the response to a previously-allowed request. A no-op unless
    /// the pending inspection names an npm metadata package under an active
    /// minimum-package-age policy.
    pub async fn inspect_response(
        &self,
        pending: PendingInspection,
        resp: Response,
    ) -> Result<Response, OpaqueError> {
        let (Some(min_age), Some(package_name)) =
            (&self.min_package_age, pending.npm_metadata_package)
        else {
            return Ok(resp);
        };
        min_age.filter_metadata_response(&package_name, resp).await
    }

    async fn inspect_npm_request(&self, mut req: Request) -> Result<RequestOutcome, OpaqueError> {
        let path = req.uri().path().to_owned();

        if !npm::is_tarball_download(&path) {
            npm::widen_accept_header(&mut req);
            let pending = PendingInspection {
                ecosystem: Ecosystem::Npm,
                npm_metadata_package: npm::metadata_package_name(&path),
            };
            return Ok(RequestOutcome::Allow(req, pending));
        }

        let Some(coordinate) = npm::parse_tarball_coordinate(&path) else {
            tracing::debug!("npm url '{path}' is not a recognized tarball download: passthrough");
            return Ok(RequestOutcome::Allow(
                req,
                PendingInspection::passthrough(Ecosystem::Npm),
            ));
        };

        if let Some(min_age) = &self.min_package_age
            && min_age.is_too_young(&coordinate)
        {
            tracing::info!(coordinate = %coordinate, "blocked npm package: published too recently");
            return Ok(RequestOutcome::Block(self.block(coordinate)));
        }

        if self.oracle.check(&coordinate).await == Verdict::Malicious {
            tracing::warn!(coordinate = %coordinate, "blocked npm package: malware oracle verdict");
            return Ok(RequestOutcome::Block(self.block(coordinate)));
        }

        Ok(RequestOutcome::Allow(
            req,
            PendingInspection::passthrough(Ecosystem::Npm),
        ))
    }

    async fn inspect_pip_request(&self, req: Request) -> Result<RequestOutcome, OpaqueError> {
        let path = req.uri().path();
        let Some(coordinate) = pypi::extract_coordinate(path) else {
            tracing::trace!("pip url '{path}' not recognized: passthrough");
            return Ok(RequestOutcome::Allow(
                req,
                PendingInspection::passthrough(Ecosystem::Pip),
            ));
        };

        if pypi::is_metadata_request(&coordinate) {
            tracing::trace!(package = %coordinate.name, "allowing pip metadata request");
            return Ok(RequestOutcome::Allow(
                req,
                PendingInspection::passthrough(Ecosystem::Pip),
            ));
        }

        if self.oracle.check(&coordinate).await == Verdict::Malicious {
            tracing::warn!(coordinate = %coordinate, "blocked pip package: malware oracle verdict");
            return Ok(RequestOutcome::Block(self.block(coordinate)));
        }

        Ok(RequestOutcome::Allow(
            req,
            PendingInspection::passthrough(Ecosystem::Pip),
        ))
    }

    fn block(&self, coordinate: PackageCoordinate) -> Response {
        let version = (!coordinate.version.is_none()).then_some(coordinate.version);
        self.notifier.notify(BlockedEvent::from_info(BlockedEventInfo {
            artifact: BlockedArtifact {
                product: coordinate.ecosystem.to_string().into(),
                identifier: coordinate.name.into(),
                version,
            },
        }));
        response::blocked_response()
    }
}

impl<C> std::fmt::Debug for Firewall<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Firewall")
            .field("oracle", &self.oracle)
            .field("min_package_age", &self.min_package_age)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rama::http::Body;
    use rama::service::service_fn;

    fn firewall(config: &Config) -> Firewall<impl Service<Request, Output = Response, Error = OpaqueError> + Clone> {
        let client = service_fn(async |_req: Request| -> Result<Response, OpaqueError> {
            Ok(Response::new(r#"{"malicious":false}"#.into()))
        });
        Firewall::new(config, client, EventNotifier::noop())
    }

    #[test]
    fn test_classify_domain_matches_registries() {
        let fw = firewall(&Config::default());
        assert_eq!(
            fw.classify_domain(&"registry.npmjs.org".parse().unwrap()),
            Some(Ecosystem::Npm)
        );
        assert_eq!(
            fw.classify_domain(&"files.pythonhosted.org".parse().unwrap()),
            Some(Ecosystem::Pip)
        );
        assert_eq!(fw.classify_domain(&"example.com".parse().unwrap()), None);
    }

    #[tokio::test]
    async fn test_inspect_npm_request_widens_accept_header() {
        let fw = firewall(&Config::default());
        let req = Request::builder()
            .uri("https://registry.npmjs.org/left-pad")
            .header("accept", "application/vnd.npm.install-v1+json")
            .body(Body::empty())
            .unwrap();

        match fw.inspect_request(Ecosystem::Npm, req).await.unwrap() {
            RequestOutcome::Allow(req, pending) => {
                assert_eq!(req.headers().get("accept").unwrap(), "application/json");
                assert_eq!(pending.npm_metadata_package.as_deref(), Some("left-pad"));
            }
            RequestOutcome::Block(_) => panic!("expected allow"),
        }
    }

    #[tokio::test]
    async fn test_inspect_pip_metadata_request_always_allowed() {
        let fw = firewall(&Config::default());
        let req = Request::builder()
            .uri("https://pypi.org/pypi/left-pad/json")
            .body(Body::empty())
            .unwrap();

        match fw.inspect_request(Ecosystem::Pip, req).await.unwrap() {
            RequestOutcome::Allow(_, _) => {}
            RequestOutcome::Block(_) => panic!("metadata requests must never be blocked"),
        }
    }

    #[tokio::test]
    async fn test_inspect_npm_tarball_blocked_when_too_young() {
        let mut config = Config::default();
        config.minimum_package_age_hours = Some(24);
        let fw = firewall(&config);

        let req = Request::builder()
            .uri("https://registry.npmjs.org/demo-pkg/-/demo-pkg-2.0.0.tgz")
            .body(Body::empty())
            .unwrap();

        // Seed the recently-filtered cache as if a metadata response had
        // already flagged 2.0.0 as too new.
        let resp = Response::builder()
            .header(rama::http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::to_vec(&serde_json::json!({
                    "dist-tags": { "latest": "2.0.0" },
                    "versions": { "2.0.0": {} },
                    "time": { "2.0.0": humantime::format_rfc3339(std::time::SystemTime::now()).to_string() },
                }))
                .unwrap(),
            ))
            .unwrap();
        fw.min_package_age
            .as_ref()
            .unwrap()
            .filter_metadata_response("demo-pkg", resp)
            .await
            .unwrap();

        match fw.inspect_request(Ecosystem::Npm, req).await.unwrap() {
            RequestOutcome::Block(resp) => {
                assert_eq!(resp.status(), rama::http::StatusCode::FORBIDDEN);
            }
            RequestOutcome::Allow(_, _) => panic!("expected block for too-young package"),
        }
    }
}
