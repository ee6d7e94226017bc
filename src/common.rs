//! Shared helpers for relay address handling and TLS selection.

use crate::cli::{PickArgs, DEFAULT_RELAY_PORT};
use crate::error::{Error, Result};
use crate::tls::{
    build_client_config_ca, build_client_config_fingerprint, build_client_config_insecure,
    parse_fingerprint,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Buffer size for reading handshake data from QUIC streams.
pub const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Relay address scheme prefix.
pub const RELAY_SCHEME: &str = "rel://";

/// Security mode for TLS verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityMode {
    /// CA certificate validation (default or custom CA).
    Ca,
    /// Public key fingerprint validation.
    Fingerprint,
    /// No verification (insecure, development only).
    None,
}

impl SecurityMode {
    /// Determines the security mode from pick arguments.
    pub fn from_args(args: &PickArgs) -> Self {
        if args.insecure_skip_verify {
            SecurityMode::None
        } else if args.fingerprint.is_some() {
            SecurityMode::Fingerprint
        } else {
            SecurityMode::Ca
        }
    }
}

/// Builds the TLS client configuration for the selected security mode.
pub fn build_tls_config(args: &PickArgs) -> Result<rustls::ClientConfig> {
    match SecurityMode::from_args(args) {
        SecurityMode::None => {
            build_client_config_insecure(&args.alpn).map_err(|e| Error::Tls(e.to_string()))
        }
        SecurityMode::Fingerprint => {
            // from_args only returns Fingerprint when the argument is present
            let fp_str = args.fingerprint.as_deref().unwrap();
            let fingerprint = parse_fingerprint(fp_str).map_err(|e| Error::Tls(e.to_string()))?;
            build_client_config_fingerprint(&fingerprint, &args.alpn)
                .map_err(|e| Error::Tls(e.to_string()))
        }
        SecurityMode::Ca => build_client_config_ca(args.ca.as_deref(), &args.alpn)
            .map_err(|e| Error::Tls(e.to_string())),
    }
}

/// Parses a `rel://host[:port]` candidate address into host and port.
///
/// IPv6 hosts use brackets: `rel://[::1]:4433`. A missing port means
/// [`DEFAULT_RELAY_PORT`].
pub fn parse_relay_address(address: &str) -> Result<(String, u16)> {
    let rest = address.strip_prefix(RELAY_SCHEME).ok_or_else(|| {
        Error::Config(format!(
            "relay address must use the {} scheme: '{}'",
            RELAY_SCHEME, address
        ))
    })?;

    if rest.is_empty() {
        return Err(Error::Config(format!(
            "relay address has no host: '{}'",
            address
        )));
    }

    // Bracketed IPv6 host, optionally followed by :port
    if let Some(v6_rest) = rest.strip_prefix('[') {
        let close = v6_rest.find(']').ok_or_else(|| {
            Error::Config(format!("unterminated IPv6 host in '{}'", address))
        })?;
        let host = &v6_rest[..close];
        let after = &v6_rest[close + 1..];

        let port = if after.is_empty() {
            DEFAULT_RELAY_PORT
        } else {
            let port_part = after.strip_prefix(':').ok_or_else(|| {
                Error::Config(format!("invalid characters after IPv6 host in '{}'", address))
            })?;
            port_part
                .parse()
                .map_err(|_| Error::Config(format!("invalid port in address '{}'", address)))?
        };

        if host.is_empty() {
            return Err(Error::Config(format!(
                "relay address has no host: '{}'",
                address
            )));
        }

        return Ok((host.to_string(), port));
    }

    // host[:port]
    let (host, port) = match rest.rfind(':') {
        Some(colon_pos) => {
            let port: u16 = rest[colon_pos + 1..]
                .parse()
                .map_err(|_| Error::Config(format!("invalid port in address '{}'", address)))?;
            (&rest[..colon_pos], port)
        }
        None => (rest, DEFAULT_RELAY_PORT),
    };

    if host.is_empty() {
        return Err(Error::Config(format!(
            "relay address has no host: '{}'",
            address
        )));
    }

    Ok((host.to_string(), port))
}

/// Parses and resolves a candidate address, returning the socket address
/// to dial and the hostname to present for SNI.
pub async fn resolve_relay_address(
    address: &str,
    sni: Option<&str>,
    resolver: &DnsResolver,
) -> Result<(SocketAddr, String)> {
    let (host, port) = parse_relay_address(address)?;

    let addr = resolver.resolve(&host, port).await?;

    let sni_host = sni.map(|s| s.to_string()).unwrap_or(host);

    Ok((addr, sni_host))
}

/// Shared DNS resolver wrapper, reused across all candidate probes.
pub struct DnsResolver {
    resolver: Arc<
        Mutex<
            Option<
                hickory_resolver::Resolver<
                    hickory_resolver::name_server::TokioConnectionProvider,
                >,
            >,
        >,
    >,
}

impl DnsResolver {
    /// Creates a new DNS resolver.
    pub fn new() -> Self {
        Self {
            resolver: Arc::new(Mutex::new(None)),
        }
    }

    /// Resolves a hostname to a SocketAddr asynchronously using hickory-resolver.
    ///
    /// The resolver is lazily initialized and reused for subsequent resolutions.
    pub async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr> {
        // First try parsing as IP address
        if let Ok(ip) = host.parse::<std::net::IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }

        // Lazily initialize the resolver
        let mut resolver_guard = self.resolver.lock().await;
        if resolver_guard.is_none() {
            let resolver = hickory_resolver::Resolver::builder_tokio()
                .map_err(|e| Error::Config(format!("failed to create DNS resolver: {}", e)))?
                .build();
            *resolver_guard = Some(resolver);
        }

        let resolver = resolver_guard.as_ref().unwrap();

        let response = resolver
            .lookup_ip(host)
            .await
            .map_err(|e| Error::Config(format!("failed to resolve '{}': {}", host, e)))?;

        response
            .iter()
            .next()
            .map(|ip| SocketAddr::new(ip, port))
            .ok_or_else(|| Error::Config(format!("no addresses found for '{}'", host)))
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats a duration in a human-readable format similar to Go's duration format.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let nanos = d.subsec_nanos();

    if secs == 0 && nanos == 0 {
        return "0s".to_string();
    }

    let mut result = String::new();

    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs_remainder = secs % 60;

    if hours > 0 {
        result.push_str(&format!("{}h", hours));
    }
    if mins > 0 {
        result.push_str(&format!("{}m", mins));
    }
    if secs_remainder > 0 || (hours == 0 && mins == 0 && nanos == 0) {
        result.push_str(&format!("{}s", secs_remainder));
    } else if nanos > 0 && hours == 0 && mins == 0 && secs_remainder == 0 {
        let ms = nanos / 1_000_000;
        if ms > 0 {
            result.push_str(&format!("{}ms", ms));
        }
    }

    if result.is_empty() {
        "0s".to_string()
    } else {
        result
    }
}
