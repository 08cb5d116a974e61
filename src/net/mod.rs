//! Connect-timeout policy: IMDS-aware dialing for tunnel-candidate hosts
//! (registry hosts are MITM'd and never dialed directly here — the egress
//! HTTP client dials them itself when forwarding a decrypted request).

pub mod imds;

use rama::{
    error::{ErrorContext as _, OpaqueError},
    net::address::Host,
};
use tokio::net::TcpStream;

pub use imds::ConnectGuard;

/// Dials `host:port`, applying the IMDS connect-timeout policy: a short
/// timeout for IMDS hosts (failing fast on repeat attempts against a host
/// that already timed out once), the regular timeout otherwise.
pub async fn dial_with_connect_policy(
    guard: &ConnectGuard,
    host: &Host,
    port: u16,
) -> Result<TcpStream, OpaqueError> {
    if guard.already_timed_out(host) {
        return Err(OpaqueError::from_display(format!(
            "refusing to redial previously-timed-out IMDS host '{host}'"
        )));
    }

    let timeout = guard.timeout_for(host);
    let addr = format!("{host}:{port}");

    match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(err)) => Err(err).with_context(|| format!("connect to '{addr}'")),
        Err(_) => {
            guard.record_timeout(host);
            Err(OpaqueError::from_display(format!(
                "connect to '{addr}' timed out after {timeout:?}"
            )))
        }
    }
}
