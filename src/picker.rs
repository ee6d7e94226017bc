//! Server picker: concurrent candidate probing with first-success-wins
//! semantics.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cli::{default_config_dir, PickArgs, TOKENS_FILENAME};
use crate::common::{build_tls_config, format_duration, DnsResolver, SecurityMode};
use crate::conn::RelayConn;
use crate::error::{AggregateError, Error, ProbeFailure, Result};
use crate::probe::{probe, ProbeContext, ProbeOutcome};
use crate::token::{FileTokenStore, MemoryTokenStore, NoopTokenStore, TokenStore};

/// Configuration for one [`ServerPicker`].
pub struct PickerConfig {
    /// Overall deadline for a `pick_server` call.
    pub pick_timeout: Duration,
    /// QUIC idle timeout; bounds how long a dial to a dead candidate can
    /// take, so keep it well below `pick_timeout`.
    pub idle_timeout: Duration,
    /// QUIC keep-alive interval (zero disables keep-alives).
    pub keep_alive: Duration,
    /// TLS client configuration (ALPN already applied).
    pub tls: rustls::ClientConfig,
    /// SNI hostname override; default is each candidate's host.
    pub sni_override: Option<String>,
}

/// Picks one reachable, authorized relay server from a candidate list.
///
/// Every candidate is probed concurrently and exactly once per call; the
/// first probe to complete its bind handshake wins and all others are
/// told to abandon. Retrying, with the same or a refreshed candidate
/// list, is the caller's responsibility, as is bounding the candidate
/// list size: each candidate costs one outbound dial.
pub struct ServerPicker {
    peer_id: String,
    token_store: Arc<dyn TokenStore>,
    config: PickerConfig,
}

impl ServerPicker {
    /// Creates a picker for `peer_id`.
    ///
    /// `token_store` may be `None`; probing then proceeds with an empty
    /// token, which relays requiring auth reject.
    pub fn new(
        peer_id: impl Into<String>,
        token_store: Option<Arc<dyn TokenStore>>,
        config: PickerConfig,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            token_store: token_store.unwrap_or_else(|| Arc::new(NoopTokenStore)),
            config,
        }
    }

    /// Selects one relay server from `candidates`.
    ///
    /// Returns the first candidate whose bind handshake succeeds. When
    /// two probes succeed near-simultaneously the winner is whichever
    /// outcome is delivered first; the other connection is closed.
    ///
    /// Errors:
    /// - [`Error::NoCandidates`] for an empty list, immediately and
    ///   without any network activity.
    /// - [`Error::AllUnavailable`] once every probe has failed, with one
    ///   cause per candidate in input order.
    /// - [`Error::Cancelled`] / [`Error::DeadlineExceeded`] as soon as
    ///   `cancel` fires or `pick_timeout` elapses; in-flight probes are
    ///   told to abandon and are not waited for.
    pub async fn pick_server(
        &self,
        candidates: &[String],
        cancel: &CancellationToken,
    ) -> Result<RelayConn> {
        if candidates.is_empty() {
            return Err(Error::NoCandidates);
        }

        let endpoint = self.build_endpoint()?;
        let ctx = Arc::new(ProbeContext {
            peer_id: self.peer_id.clone(),
            token_store: Arc::clone(&self.token_store),
            endpoint,
            resolver: Arc::new(DnsResolver::new()),
            sni_override: self.config.sni_override.clone(),
        });

        // Buffered to the candidate count so a straggler's send never
        // blocks, even after the picker has stopped reading.
        let (outcome_tx, mut outcome_rx) = mpsc::channel(candidates.len());
        let probe_cancel = cancel.child_token();

        for (index, address) in candidates.iter().enumerate() {
            let ctx = Arc::clone(&ctx);
            let address = address.clone();
            let cancel = probe_cancel.clone();
            let tx = outcome_tx.clone();
            tokio::spawn(async move {
                let outcome = probe(&address, &ctx, &cancel).await;
                tracing::debug!(%address, outcome = outcome.kind(), "probe finished");
                if let Err(mpsc::error::SendError((_, outcome))) = tx.send((index, outcome)).await {
                    // The pick is already decided; release anything this
                    // probe established.
                    if let ProbeOutcome::Connected(conn) = outcome {
                        conn.close("not selected");
                    }
                }
            });
        }
        drop(outcome_tx);

        let mut failures: Vec<Option<ProbeFailure>> = candidates.iter().map(|_| None).collect();
        let mut pending = candidates.len();

        let deadline = tokio::time::sleep(self.config.pick_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                // Cancellation takes precedence over further outcomes.
                biased;
                _ = cancel.cancelled() => {
                    probe_cancel.cancel();
                    Self::abandon(&mut outcome_rx);
                    return Err(Error::Cancelled);
                }
                _ = &mut deadline => {
                    probe_cancel.cancel();
                    Self::abandon(&mut outcome_rx);
                    return Err(Error::DeadlineExceeded);
                }
                received = outcome_rx.recv() => match received {
                    Some((_, ProbeOutcome::Connected(conn))) => {
                        tracing::info!(address = conn.address(), "relay selected");
                        probe_cancel.cancel();
                        Self::abandon(&mut outcome_rx);
                        return Ok(conn);
                    }
                    Some((index, outcome)) => {
                        failures[index] = Some(match outcome {
                            ProbeOutcome::Unreachable(cause) => ProbeFailure::Unreachable(cause),
                            ProbeOutcome::Unauthorized(cause) => ProbeFailure::Unauthorized(cause),
                            ProbeOutcome::Cancelled => ProbeFailure::Cancelled,
                            ProbeOutcome::Connected(_) => unreachable!("handled above"),
                        });
                        pending -= 1;
                        if pending == 0 {
                            return Err(Error::AllUnavailable(Self::aggregate(
                                candidates, failures,
                            )));
                        }
                    }
                    // Every task sends exactly once; the channel only
                    // drains early if a probe task died.
                    None => {
                        return Err(Error::AllUnavailable(Self::aggregate(
                            candidates, failures,
                        )));
                    }
                },
            }
        }
    }

    /// Stops reading outcomes and releases any connection already
    /// buffered; probes still running self-close once their send fails.
    fn abandon(outcome_rx: &mut mpsc::Receiver<(usize, ProbeOutcome)>) {
        outcome_rx.close();
        while let Ok((_, outcome)) = outcome_rx.try_recv() {
            if let ProbeOutcome::Connected(conn) = outcome {
                conn.close("not selected");
            }
        }
    }

    fn aggregate(candidates: &[String], failures: Vec<Option<ProbeFailure>>) -> AggregateError {
        AggregateError::new(
            candidates
                .iter()
                .zip(failures)
                .map(|(address, failure)| {
                    (
                        address.clone(),
                        failure.unwrap_or_else(|| {
                            ProbeFailure::Unreachable("probe aborted".to_string())
                        }),
                    )
                })
                .collect(),
        )
    }

    /// Builds the shared QUIC client endpoint for one pick call.
    fn build_endpoint(&self) -> Result<quinn::Endpoint> {
        let mut endpoint =
            quinn::Endpoint::client(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))?;

        let quic_tls = quinn::crypto::rustls::QuicClientConfig::try_from(self.config.tls.clone())
            .map_err(|e| Error::Tls(format!("failed to create QUIC config: {}", e)))?;
        let mut client_config = quinn::ClientConfig::new(Arc::new(quic_tls));

        let mut transport_config = quinn::TransportConfig::default();
        transport_config.max_idle_timeout(Some(
            self.config
                .idle_timeout
                .try_into()
                .map_err(|_| Error::Config("idle timeout too large".to_string()))?,
        ));
        if !self.config.keep_alive.is_zero() {
            transport_config.keep_alive_interval(Some(self.config.keep_alive));
        }
        client_config.transport_config(Arc::new(transport_config));

        endpoint.set_default_client_config(client_config);

        Ok(endpoint)
    }
}

/// Runs the pick subcommand.
pub async fn run_pick(args: &PickArgs) -> Result<()> {
    let tls = build_tls_config(args)?;
    let token_store = load_token_store(args)?;

    print_startup_message(args, token_store.is_some());

    let picker = ServerPicker::new(
        &args.peer,
        token_store,
        PickerConfig {
            pick_timeout: args.timeout,
            idle_timeout: args.idle_timeout,
            keep_alive: args.keep_alive,
            tls,
            sni_override: args.sni.clone(),
        },
    );

    // Ctrl-C cancels the pick
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received SIGINT, cancelling pick");
            signal_cancel.cancel();
        }
    });

    let started = Instant::now();
    let conn = picker.pick_server(&args.relays, &cancel).await?;

    tracing::info!(
        address = conn.address(),
        remote = %conn.remote_address(),
        elapsed = format_duration(started.elapsed()),
        "pick complete"
    );
    println!("{}", conn.address());

    conn.close("pick complete");
    conn.wait_idle().await;

    Ok(())
}

/// Resolves the token store for the pick subcommand.
///
/// Precedence: `--token` (single in-memory entry for `--peer`), then
/// `--token-file`, then `<config-dir>/tokens` when that file exists.
fn load_token_store(args: &PickArgs) -> Result<Option<Arc<dyn TokenStore>>> {
    if let Some(token) = &args.token {
        return Ok(Some(Arc::new(MemoryTokenStore::with_token(
            &args.peer,
            token.as_str().into(),
        ))));
    }

    if let Some(path) = &args.token_file {
        return Ok(Some(Arc::new(FileTokenStore::load(path)?)));
    }

    let default_path = args
        .config_dir
        .clone()
        .unwrap_or_else(default_config_dir)
        .join(TOKENS_FILENAME);
    if default_path.exists() {
        return Ok(Some(Arc::new(FileTokenStore::load(&default_path)?)));
    }

    Ok(None)
}

/// Prints the startup message.
fn print_startup_message(args: &PickArgs, has_token_store: bool) {
    eprintln!("Starting pick...");
    eprintln!("  Peer: {}", args.peer);
    eprintln!("  Candidates: {}", args.relays.len());
    for relay in &args.relays {
        eprintln!("    {}", relay);
    }
    eprintln!("  Timeout: {}", format_duration(args.timeout));
    eprintln!("  ALPN: {}", args.alpn);
    eprintln!("  Security: {:?}", SecurityMode::from_args(args));
    eprintln!(
        "  Token store: {}",
        if has_token_store { "configured" } else { "none" }
    );
}
