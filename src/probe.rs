//! Candidate prober: one connection-and-authorization attempt against a
//! single relay server.

use bytes::BytesMut;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::common::{parse_relay_address, DnsResolver};
use crate::conn::RelayConn;
use crate::protocol::{read_frame, write_frame, Frame};
use crate::token::{AuthToken, TokenStore};

/// Result of probing a single candidate.
#[derive(Debug)]
pub enum ProbeOutcome {
    /// The relay accepted the bind; the handle is live and authorized.
    Connected(RelayConn),
    /// Transport-level failure: malformed address, resolution failure,
    /// dial failure, or the stream died mid-handshake.
    Unreachable(String),
    /// The relay answered but rejected the bind.
    Unauthorized(String),
    /// The probe was told to abandon before it resolved.
    Cancelled,
}

impl ProbeOutcome {
    /// Short outcome name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeOutcome::Connected(_) => "connected",
            ProbeOutcome::Unreachable(_) => "unreachable",
            ProbeOutcome::Unauthorized(_) => "unauthorized",
            ProbeOutcome::Cancelled => "cancelled",
        }
    }
}

/// Read-only inputs shared by every probe of one pick call.
pub(crate) struct ProbeContext {
    pub peer_id: String,
    pub token_store: Arc<dyn TokenStore>,
    pub endpoint: quinn::Endpoint,
    pub resolver: Arc<DnsResolver>,
    pub sni_override: Option<String>,
}

/// Probes one candidate: token lookup, resolve, QUIC dial, bind handshake.
///
/// Every blocking step is raced against `cancel`; once it fires the probe
/// returns [`ProbeOutcome::Cancelled`] promptly, closing anything it
/// already established.
pub(crate) async fn probe(
    address: &str,
    ctx: &ProbeContext,
    cancel: &CancellationToken,
) -> ProbeOutcome {
    // Token lookup; a miss degrades to an empty token and the relay
    // decides whether to accept an anonymous bind.
    let token = ctx
        .token_store
        .lookup(&ctx.peer_id)
        .unwrap_or_else(AuthToken::empty);

    let (host, port) = match parse_relay_address(address) {
        Ok(parsed) => parsed,
        Err(e) => return ProbeOutcome::Unreachable(e.to_string()),
    };

    let resolved = tokio::select! {
        biased;
        _ = cancel.cancelled() => return ProbeOutcome::Cancelled,
        resolved = ctx.resolver.resolve(&host, port) => resolved,
    };
    let remote = match resolved {
        Ok(addr) => addr,
        Err(e) => return ProbeOutcome::Unreachable(e.to_string()),
    };

    let sni = ctx.sni_override.as_deref().unwrap_or(&host);
    tracing::debug!(%address, %remote, sni, "dialing relay candidate");

    let connecting = match ctx.endpoint.connect(remote, sni) {
        Ok(connecting) => connecting,
        Err(e) => return ProbeOutcome::Unreachable(format!("dial failed: {}", e)),
    };

    let connection = tokio::select! {
        biased;
        _ = cancel.cancelled() => return ProbeOutcome::Cancelled,
        connected = connecting => match connected {
            Ok(connection) => connection,
            Err(e) => return ProbeOutcome::Unreachable(format!("dial failed: {}", e)),
        },
    };

    // Transport is up; run the bind handshake.
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            connection.close(0u32.into(), b"probe cancelled");
            return ProbeOutcome::Cancelled;
        }
        opened = connection.open_bi() => opened,
    };
    let (mut send, mut recv) = match opened {
        Ok(streams) => streams,
        Err(e) => {
            return ProbeOutcome::Unreachable(format!("failed to open bind stream: {}", e));
        }
    };

    let bind_req = Frame::BindReq {
        peer_id: ctx.peer_id.clone(),
        token: token.into_bytes(),
    };
    let written = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            connection.close(0u32.into(), b"probe cancelled");
            return ProbeOutcome::Cancelled;
        }
        written = write_frame(&mut send, &bind_req) => written,
    };
    if let Err(e) = written {
        connection.close(0u32.into(), b"bind send failed");
        return ProbeOutcome::Unreachable(format!("failed to send bind request: {}", e));
    }

    let mut buffer = BytesMut::new();
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            connection.close(0u32.into(), b"probe cancelled");
            return ProbeOutcome::Cancelled;
        }
        response = read_frame(&mut recv, &mut buffer) => response,
    };

    match response {
        Ok(Some(Frame::BindOk)) => {
            tracing::debug!(%address, "bind accepted");
            ProbeOutcome::Connected(RelayConn::new(
                ctx.endpoint.clone(),
                connection,
                send,
                recv,
                address.to_string(),
            ))
        }
        Ok(Some(Frame::BindReject { reason })) => {
            tracing::debug!(%address, reason, "bind rejected");
            connection.close(0u32.into(), b"bind rejected");
            ProbeOutcome::Unauthorized(reason)
        }
        Ok(Some(frame)) => {
            connection.close(0u32.into(), b"protocol error");
            ProbeOutcome::Unreachable(format!("unexpected bind response: {:?}", frame))
        }
        Ok(None) => {
            connection.close(0u32.into(), b"stream closed");
            ProbeOutcome::Unreachable("stream closed during bind".to_string())
        }
        Err(e) => {
            connection.close(0u32.into(), b"protocol error");
            ProbeOutcome::Unreachable(format!("bind handshake failed: {}", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::NoopTokenStore;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn init_crypto() {
        INIT.call_once(|| {
            let _ = rustls::crypto::ring::default_provider().install_default();
        });
    }

    fn test_context() -> ProbeContext {
        init_crypto();
        let tls = crate::tls::build_client_config_insecure("relaypick/1").unwrap();
        let mut endpoint =
            quinn::Endpoint::client(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).unwrap();
        let quic_tls = quinn::crypto::rustls::QuicClientConfig::try_from(tls).unwrap();
        endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(quic_tls)));

        ProbeContext {
            peer_id: "peerA".to_string(),
            token_store: Arc::new(NoopTokenStore),
            endpoint,
            resolver: Arc::new(DnsResolver::new()),
            sni_override: None,
        }
    }

    #[tokio::test]
    async fn malformed_address_is_unreachable_without_io() {
        let ctx = test_context();
        let cancel = CancellationToken::new();

        let outcome = probe("not-a-relay-address", &ctx, &cancel).await;
        assert!(matches!(outcome, ProbeOutcome::Unreachable(_)));
    }

    #[tokio::test]
    async fn pre_cancelled_probe_returns_cancelled() {
        let ctx = test_context();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = probe("rel://127.0.0.1:1", &ctx, &cancel).await;
        assert!(matches!(outcome, ProbeOutcome::Cancelled));
    }
}
