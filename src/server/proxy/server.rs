//! Per-connection dispatch: after a CONNECT has been accepted (§4.1), route
//! the raw, post-upgrade stream to either the MITM TLS-terminating server
//! (registry hosts) or a transparent tunnel (everything else), based on the
//! [`RouteDecision`] `http_connect_accept` left on the stream's extensions.

use std::convert::Infallible;
use std::sync::Arc;

use rama::{
    Layer as _, Service,
    error::{BoxError, OpaqueError},
    extensions::{ExtensionsMut, ExtensionsRef},
    graceful::ShutdownGuard,
    http::{
        Body, Request, Response,
        layer::{compression::CompressionLayer, map_response_body::MapResponseBodyLayer, trace::TraceLayer},
        server::HttpServer,
    },
    layer::ConsumeErrLayer,
    rt::Executor,
    stream::Stream,
    telemetry::tracing::{self, Level},
    tls::boring::server::TlsAcceptorLayer,
};

use crate::firewall::Firewall;

use super::PreDialedUpstream;

/// Left on the accepted CONNECT's extensions (and, via the upgrade, on the
/// raw stream handed to [`Dispatcher`]) to record which path `Dispatcher`
/// should take — the decision itself was already made, and in the tunnel
/// case already acted on (connected), back in `http_connect_accept`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RouteDecision {
    Mitm,
    Tunnel,
}

#[derive(Clone)]
pub(super) struct Dispatcher<M> {
    mitm: M,
}

pub(super) fn new_dispatcher<S, C>(
    guard: ShutdownGuard,
    tls_acceptor: TlsAcceptorLayer,
    firewall: Arc<Firewall<C>>,
) -> Result<Dispatcher<impl Service<S, Output = (), Error = BoxError> + Clone>, OpaqueError>
where
    S: Stream + ExtensionsMut + Unpin,
    C: Service<Request, Output = Response, Error = OpaqueError> + Clone + Send + Sync + 'static,
{
    let https_svc = (
        TraceLayer::new_for_http(),
        ConsumeErrLayer::trace(Level::DEBUG),
        MapResponseBodyLayer::new(Body::new),
        CompressionLayer::new(),
    )
        .into_layer(super::client::new_https_client(firewall)?);

    let mitm =
        tls_acceptor.into_layer(HttpServer::auto(Executor::graceful(guard)).service(https_svc));

    Ok(Dispatcher { mitm })
}

impl<M, S> Service<S> for Dispatcher<M>
where
    M: Service<S, Output = (), Error = BoxError>,
    S: Unpin + Stream + ExtensionsMut,
{
    type Output = ();
    type Error = Infallible;

    async fn serve(&self, mut stream: S) -> Result<Self::Output, Self::Error> {
        match stream.extensions().get::<RouteDecision>().copied() {
            Some(RouteDecision::Mitm) => {
                if let Err(err) = self.mitm.serve(stream).await {
                    tracing::debug!("mitm connection finished with an error: {err}");
                }
            }
            Some(RouteDecision::Tunnel) => run_tunnel(&mut stream).await,
            None => {
                tracing::warn!(
                    "accepted CONNECT stream carries no route decision, dropping connection"
                );
            }
        }

        Ok(())
    }
}

/// Pipes bytes in both directions between the client and the upstream
/// connection `http_connect_accept` already dialed (subject to the §4.6
/// connect-timeout policy) before answering 200 to the CONNECT. No TLS
/// interception happens on this path: the client sees the destination's
/// real certificate chain end-to-end.
async fn run_tunnel<S>(stream: &mut S)
where
    S: Unpin + Stream + ExtensionsRef,
{
    let Some(PreDialedUpstream(upstream)) = stream.extensions().get::<PreDialedUpstream>().cloned()
    else {
        tracing::warn!("tunnel stream is missing its pre-dialed upstream connection");
        return;
    };

    let Some(mut upstream) = upstream.lock().await.take() else {
        tracing::warn!("tunnel upstream connection was already consumed");
        return;
    };

    match tokio::io::copy_bidirectional(stream, &mut upstream).await {
        Ok((to_upstream, to_client)) => {
            tracing::debug!(bytes_to_upstream = to_upstream, bytes_to_client = to_client, "tunnel closed");
        }
        Err(err) => {
            tracing::debug!("tunnel closed with an error: {err}");
        }
    }
}
