//! Core library for the safe-chain interception proxy.
//!
//! This crate is the on-host HTTPS MITM proxy that terminates client TLS,
//! mints per-host leaf certificates from a local root CA, classifies upstream
//! hosts, runs ecosystem interceptors (npm, pip) against a malware oracle, and
//! tunnels everything else while defending against IMDS connect hangs.

#![cfg_attr(
    not(test),
    warn(clippy::print_stdout, clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

pub mod config;
pub mod firewall;
pub mod net;
pub mod server;
pub mod storage;
pub mod tls;
pub mod utils;

use clap::Parser;
use rama::net::socket::Interface;

/// CLI arguments for configuring proxy behavior.
#[derive(Debug, Clone, Parser)]
#[command(name = "safe-chain-proxy")]
#[command(bin_name = "safe-chain-proxy")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// network interface to bind the proxy to
    #[arg(
        short = 'b',
        long,
        value_name = "INTERFACE",
        default_value = "127.0.0.1:0"
    )]
    pub bind: Interface,

    /// directory for CA material, the combined CA bundle, and the proxy state
    /// record; defaults to `~/.safe-chain`
    #[arg(long, value_name = "DIR")]
    pub data: Option<std::path::PathBuf>,

    /// path to a JSON configuration file (see [`crate::config::Config`])
    #[arg(long, value_name = "PATH")]
    pub config: Option<std::path::PathBuf>,

    /// debug logging as default instead of Info; use RUST_LOG env for more options
    #[arg(short = 'v', long, default_value_t = false)]
    pub verbose: bool,

    /// enable pretty logging (format for humans)
    #[arg(long, default_value_t = false)]
    pub pretty: bool,

    #[arg(long, value_name = "SECONDS", default_value_t = 1.)]
    /// the graceful shutdown timeout (<= 0.0 = no timeout)
    pub graceful: f64,
}
