//! The egress HTTP client: used both to forward a MITM'd, decrypted registry
//! request and to forward a plain HTTP absolute-URI request (§4.1 case 2).
//! Runs the firewall (§4.4) against the resolved target host before ever
//! dialing upstream, and filters the response through it afterwards.

use std::sync::Arc;

use rama::{
    Layer as _, Service,
    error::{ErrorContext as _, OpaqueError},
    extensions::ExtensionsRef as _,
    http::{
        Body, Request, Response, StatusCode,
        client::EasyHttpWebClient,
        layer::{
            decompression::DecompressionLayer,
            map_response_body::MapResponseBodyLayer,
            remove_header::{RemoveRequestHeaderLayer, RemoveResponseHeaderLayer},
        },
        service::web::response::IntoResponse as _,
    },
    net::{address::Host, proxy::ProxyTarget},
    telemetry::tracing,
};

use crate::firewall::{Firewall, RequestOutcome};

/// Builds the shared HTTP(S) web client used for every egress connection
/// this proxy makes: the malware oracle's own queries go through
/// [`new_oracle_client`] instead (no firewall wrapping needed there — the
/// oracle can't recursively firewall itself).
pub(super) fn new_oracle_client()
-> Result<impl Service<Request, Output = Response, Error = OpaqueError> + Clone, OpaqueError> {
    build_base_client()
}

#[derive(Clone)]
pub(super) struct HttpClient<S, C> {
    inner: S,
    firewall: Arc<Firewall<C>>,
}

/// Builds the egress client used for both the plain-HTTP absolute-URI path
/// and (wrapped again with a TLS acceptor/server in `server.rs`) the
/// decrypted MITM path: hop-by-hop header stripping, decompression, then
/// the firewall's registry classification/inspection, then the real
/// upstream connection.
pub(super) fn new_https_client<C>(
    firewall: Arc<Firewall<C>>,
) -> Result<HttpClient<impl Service<Request, Output = Response, Error = OpaqueError>, C>, OpaqueError>
where
    C: Service<Request, Output = Response, Error = OpaqueError> + Clone + Send + Sync + 'static,
{
    let inner = (
        RemoveResponseHeaderLayer::hop_by_hop(),
        RemoveRequestHeaderLayer::hop_by_hop(),
        MapResponseBodyLayer::new(Body::new),
        DecompressionLayer::new(),
    )
        .into_layer(build_base_client()?);

    Ok(HttpClient { inner, firewall })
}

fn build_base_client()
-> Result<impl Service<Request, Output = Response, Error = OpaqueError> + Clone, OpaqueError> {
    Ok(EasyHttpWebClient::connector_builder()
        .with_default_transport_connector()
        .without_tls_proxy_support()
        .without_proxy_support()
        .with_tls_support_using_boringssl(None)
        .with_default_http_connector()
        .try_with_default_connection_pool()
        .context("create connection pool for proxy egress client")?
        .build_client())
}

/// The host this request is bound for: the `ProxyTarget` set on a
/// CONNECT'd-then-decrypted MITM request, or the absolute-URI's own host for
/// a plain-HTTP proxy request that never went through a CONNECT at all.
fn target_host(req: &Request) -> Option<Host> {
    if let Some(ProxyTarget(target)) = req.extensions().get() {
        return Some(target.host.clone());
    }
    req.uri().host()?.parse().ok()
}

impl<S, C> Service<Request> for HttpClient<S, C>
where
    S: Service<Request, Output = Response, Error = OpaqueError>,
    C: Service<Request, Output = Response, Error = OpaqueError> + Clone + Send + Sync + 'static,
{
    type Output = Response;
    type Error = std::convert::Infallible;

    async fn serve(&self, req: Request) -> Result<Self::Output, Self::Error> {
        let uri = req.uri().clone();

        let Some(host) = target_host(&req) else {
            tracing::debug!(uri = %uri, "no resolvable target host, forwarding unexamined");
            return Ok(self.forward(req).await);
        };

        let Some(ecosystem) = self.firewall.classify_host(&host) else {
            return Ok(self.forward(req).await);
        };

        match self.firewall.inspect_request(ecosystem, req).await {
            Ok(RequestOutcome::Block(resp)) => Ok(resp),
            Ok(RequestOutcome::Allow(req, pending)) => {
                let resp = self.forward(req).await;
                match self.firewall.inspect_response(pending, resp).await {
                    Ok(resp) => Ok(resp),
                    Err(err) => {
                        tracing::warn!(
                            uri = %uri,
                            "error inspecting registry response, failing the request: {err}"
                        );
                        Ok(StatusCode::BAD_GATEWAY.into_response())
                    }
                }
            }
            Err(err) => {
                tracing::warn!(uri = %uri, "error inspecting registry request: {err}");
                Ok(StatusCode::BAD_GATEWAY.into_response())
            }
        }
    }
}

impl<S, C> HttpClient<S, C>
where
    S: Service<Request, Output = Response, Error = OpaqueError>,
{
    async fn forward(&self, req: Request) -> Response {
        let uri = req.uri().clone();
        match self.inner.serve(req).await {
            Ok(resp) => resp,
            Err(err) => {
                tracing::error!(uri = %uri, "error forwarding request upstream: {err:?}");
                StatusCode::BAD_GATEWAY.into_response()
            }
        }
    }
}
