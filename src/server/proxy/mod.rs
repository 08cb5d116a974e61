//! The proxy server: one TCP listener speaking plain HTTP to the client,
//! branching a CONNECT request either into the MITM path (decrypt, classify,
//! inspect, forward) or a plain tunnel (dial upstream, relay bytes), and a
//! plain (non-CONNECT) absolute-URI request straight into the firewalled
//! egress client.

mod client;
mod server;

use std::sync::Arc;

use rama::{
    Layer as _,
    error::{ErrorContext as _, OpaqueError},
    extensions::ExtensionsMut as _,
    graceful::ShutdownGuard,
    http::{
        Body, Request, Response, StatusCode,
        layer::{
            compression::CompressionLayer, map_response_body::MapResponseBodyLayer,
            trace::TraceLayer, upgrade::UpgradeLayer,
        },
        matcher::MethodMatcher,
        server::HttpServer,
        service::web::response::IntoResponse as _,
    },
    layer::ConsumeErrLayer,
    net::{address::Host, http::RequestContext, proxy::ProxyTarget, stream::layer::http::BodyLimitLayer},
    rt::Executor,
    service::service_fn,
    tcp::server::TcpListener,
    telemetry::tracing::{self, Level},
};
use tokio::sync::Mutex as AsyncMutex;

use crate::config::Config;
use crate::firewall::{Firewall, coordinate::Ecosystem, notifier::EventNotifier};
use crate::net::ConnectGuard;
use crate::storage::state::ProxyState;
use crate::{Args, storage, tls};

use server::{Dispatcher, RouteDecision};

/// Maximum allowed body size for proxied requests and responses, protecting
/// against memory exhaustion from a deliberately oversized registry payload.
const MAX_BODY_SIZE: usize = 500 * 1024 * 1024;

/// The upstream `TcpStream` dialed at CONNECT-accept time, before the client
/// was answered 200 — stashed in the connection's extensions so the tunnel
/// path can pick it up without dialing twice. Consumed exactly once.
#[derive(Clone)]
struct PreDialedUpstream(Arc<AsyncMutex<Option<tokio::net::TcpStream>>>);

pub async fn run_proxy_server(
    args: Args,
    data_dir: std::path::PathBuf,
    config: Config,
    guard: ShutdownGuard,
) -> Result<(), OpaqueError> {
    let tcp_service = TcpListener::build()
        .bind(args.bind)
        .await
        .map_err(OpaqueError::from_boxed)
        .context("bind TCP network interface for proxy")?;

    let proxy_addr = tcp_service
        .local_addr()
        .context("fetch local addr of bound TCP port for proxy")?;

    let tls = tls::load_or_create(&data_dir).context("load or create TLS interception material")?;

    let oracle_client = self::client::new_oracle_client()?;
    let firewall = Arc::new(Firewall::new(&config, oracle_client, EventNotifier::noop()));
    let connect_guard = Arc::new(ConnectGuard::new());

    let https_client = self::client::new_https_client(firewall.clone())?;

    let dispatcher = server::new_dispatcher(guard.clone(), tls.acceptor_layer, firewall.clone())?;

    let exec = Executor::graceful(guard.clone());
    let http_service = HttpServer::auto(exec).service(
        (
            TraceLayer::new_for_http(),
            ConsumeErrLayer::trace(Level::DEBUG),
            UpgradeLayer::new(
                MethodMatcher::CONNECT,
                service_fn({
                    let firewall = firewall.clone();
                    let connect_guard = connect_guard.clone();
                    move |req| http_connect_accept(req, firewall.clone(), connect_guard.clone())
                }),
                dispatcher,
            ),
            MapResponseBodyLayer::new(Body::new),
            CompressionLayer::new(),
        )
            .into_layer(https_client),
    );

    storage::state::write(
        &data_dir,
        &ProxyState {
            port: proxy_addr.port(),
            url: format!("http://{proxy_addr}"),
            pid: std::process::id(),
            ecosystem: ecosystem_names(&config),
            cert_path: tls.ca_bundle_path.display().to_string(),
        },
    )
    .context("write proxy state record")?;

    tracing::info!(proxy.address = %proxy_addr, "local HTTP(S) proxy ready");

    tcp_service
        .serve_graceful(guard, BodyLimitLayer::symmetric(MAX_BODY_SIZE).into_layer(http_service))
        .await;

    Ok(())
}

fn ecosystem_names(config: &Config) -> Vec<String> {
    let mut names = vec![Ecosystem::Npm.to_string(), Ecosystem::Pip.to_string()];
    names.extend(config.npm_custom_registries.iter().cloned());
    names.extend(config.pip_custom_registries.iter().cloned());
    names
}

/// Accepts (or rejects) a CONNECT. Registry hosts are routed into the MITM
/// path without dialing anything here — the egress client dials them lazily
/// once a decrypted request names the real resource. Every other host is
/// dialed right here, under the connect-timeout policy, *before* answering
/// 200: a client that never gets a 200 knows immediately that the tunnel
/// could not be established, rather than discovering it mid-tunnel.
async fn http_connect_accept<C>(
    mut req: Request,
    firewall: Arc<Firewall<C>>,
    connect_guard: Arc<ConnectGuard>,
) -> Result<(Response, Request), Response>
where
    C: rama::Service<Request, Output = Response, Error = OpaqueError> + Clone + Send + Sync + 'static,
{
    let authority = match RequestContext::try_from(&req).map(|ctx| ctx.host_with_port()) {
        Ok(authority) => authority,
        Err(err) => {
            tracing::error!(uri = %req.uri(), "error extracting authority from CONNECT: {err:?}");
            return Err(StatusCode::BAD_REQUEST.into_response());
        }
    };

    let host: Host = authority.host.clone();

    if firewall.classify_host(&host).is_some() {
        tracing::info!(server.address = %authority.host, server.port = authority.port, "accept CONNECT: mitm");
        req.extensions_mut().insert(ProxyTarget(authority));
        req.extensions_mut().insert(RouteDecision::Mitm);
        return Ok((StatusCode::OK.into_response(), req));
    }

    tracing::info!(server.address = %authority.host, server.port = authority.port, "accept CONNECT: tunnel");
    match crate::net::dial_with_connect_policy(&connect_guard, &host, authority.port).await {
        Ok(upstream) => {
            req.extensions_mut().insert(ProxyTarget(authority));
            req.extensions_mut().insert(RouteDecision::Tunnel);
            req.extensions_mut()
                .insert(PreDialedUpstream(Arc::new(AsyncMutex::new(Some(upstream)))));
            Ok((StatusCode::OK.into_response(), req))
        }
        Err(err) => {
            tracing::warn!(server.address = %authority.host, server.port = authority.port, "failed to dial tunnel target: {err}");
            Err(StatusCode::BAD_GATEWAY.into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecosystem_names_includes_custom_registries() {
        let config = Config {
            npm_custom_registries: vec!["npm.internal.example.com".to_owned()],
            pip_custom_registries: vec!["pip.internal.example.com".to_owned()],
            ..Config::default()
        };
        let names = ecosystem_names(&config);
        assert_eq!(
            names,
            vec!["npm", "pip", "npm.internal.example.com", "pip.internal.example.com"]
        );
    }
}
