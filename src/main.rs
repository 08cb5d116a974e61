use std::time::Duration;

use rama::{
    error::{BoxError, ErrorContext, OpaqueError},
    graceful,
    telemetry::tracing::{self, Instrument as _},
};

use clap::Parser;

use safechain_proxy::{Args, config::Config, storage, utils};

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    utils::telemetry::init_tracing(&args);
    utils::os::raise_nofile(65536);

    let data_dir = storage::resolve_data_dir(args.data.as_deref())
        .context("resolve safe-chain data directory")?;
    let config = Config::load(args.config.as_deref(), &data_dir)
        .context("load safe-chain configuration")?;

    let graceful_timeout = (args.graceful > 0.).then(|| Duration::from_secs_f64(args.graceful));

    let (etx, mut erx) = tokio::sync::mpsc::channel::<OpaqueError>(1);
    let graceful = graceful::Shutdown::new(async move {
        let mut signal = Box::pin(graceful::default_signal());
        tokio::select! {
            _ = signal.as_mut() => {
                tracing::debug!("default signal triggered: init graceful shutdown");
            }
            err = erx.recv() => {
                if let Some(err) = err {
                    tracing::error!("fatal err received: {err}; abort");
                } else {
                    signal.await;
                    tracing::debug!("default signal triggered: init graceful shutdown");
                }
            }
        }
    });

    graceful.spawn_task_fn({
        let args = args.clone();
        let data_dir = data_dir.clone();
        let config = config.clone();
        let etx = etx.clone();

        async move |guard| {
            tracing::info!("spawning safe-chain proxy server...");
            if let Err(err) =
                safechain_proxy::server::proxy::run_proxy_server(args, data_dir, config, guard)
                    .instrument(tracing::debug_span!(
                        "proxy server lifetime",
                        server.service.name = utils::env::project_name(),
                        otel.kind = "server",
                        network.protocol.name = "tcp",
                    ))
                    .await
            {
                tracing::error!("proxy server exited with an error: {err}");
                let _ = etx.send(err).await;
            }
        }
    });

    let delay = match graceful_timeout {
        Some(duration) => graceful.shutdown_with_limit(duration).await?,
        None => graceful.shutdown().await,
    };

    storage::state::remove(&data_dir);

    tracing::info!("gracefully shutdown with a delay of: {delay:?}");
    Ok(())
}
