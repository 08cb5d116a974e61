//! Cloud instance-metadata (IMDS) connect-timeout defense: IMDS endpoints are
//! link-local and unrouted outside the host's own cloud instance, so a proxy
//! running somewhere IMDS is unreachable must not let an install hang
//! forever waiting on a TCP handshake that will never complete. IMDS-bound
//! connects get a short timeout; everything else keeps the regular one. Only
//! IMDS-classified hosts that have already timed out are cached negatively —
//! ordinary hosts get no such caching, since a transient failure to an
//! ordinary host should not poison future attempts.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use parking_lot::Mutex;
use rama::net::address::Host;

/// AWS/Azure/Alibaba/DigitalOcean et al. all serve IMDS from this address.
const IMDS_LINK_LOCAL_IP: Ipv4Addr = Ipv4Addr::new(169, 254, 169, 254);
/// GCP resolves its metadata server through either of these host names.
const IMDS_DOMAINS: &[&str] = &["metadata.google.internal", "metadata.goog"];

const IMDS_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether `host` names a cloud instance-metadata endpoint: the well-known
/// per-provider address, any other address in the 169.254.0.0/16 link-local
/// range IMDS is served from (some providers and test harnesses use other
/// addresses in that block), or one of the named GCP metadata domains.
pub fn is_imds_host(host: &Host) -> bool {
    match host {
        Host::Address(IpAddr::V4(addr)) => addr.is_link_local(),
        Host::Address(IpAddr::V6(_)) => false,
        Host::Name(domain) => IMDS_DOMAINS
            .iter()
            .any(|imds| domain.as_str().eq_ignore_ascii_case(imds)),
    }
}

/// Tracks IMDS hosts that have already failed to connect within the IMDS
/// timeout budget, so repeated attempts in the same process fail fast
/// instead of re-paying the timeout.
#[derive(Debug, Default)]
pub struct ConnectGuard {
    timed_out_imds_hosts: Mutex<HashSet<String>>,
}

impl ConnectGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// The timeout to apply when dialing `host`: short for IMDS, the regular
    /// connect timeout for everything else.
    pub fn timeout_for(&self, host: &Host) -> Duration {
        if is_imds_host(host) {
            IMDS_CONNECT_TIMEOUT
        } else {
            DEFAULT_CONNECT_TIMEOUT
        }
    }

    /// `true` if `host` is IMDS and has already timed out once this process
    /// lifetime — callers should fail the dial immediately without retrying.
    pub fn already_timed_out(&self, host: &Host) -> bool {
        is_imds_host(host) && self.timed_out_imds_hosts.lock().contains(&host.to_string())
    }

    /// Records that dialing `host` timed out. A no-op for non-IMDS hosts.
    pub fn record_timeout(&self, host: &Host) {
        if is_imds_host(host) {
            self.timed_out_imds_hosts.lock().insert(host.to_string());
        }
    }
}
