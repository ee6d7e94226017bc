//! End-to-end tests for the relay server picker.
//!
//! These tests run the picker against in-process QUIC relay stubs that
//! speak the bind handshake.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Once;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relaypick::{
    build_server_config, generate_self_signed_cert, read_frame, write_frame, AuthToken, Error,
    Frame, MemoryTokenStore, PickerConfig, ProbeFailure, ServerPicker, TokenStore,
};

static INIT: Once = Once::new();

/// Initialize the crypto provider for tests.
fn init_crypto() {
    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// How a relay stub answers bind requests.
#[derive(Clone)]
enum StubBehavior {
    /// Accept every bind.
    AcceptAll,
    /// Accept binds presenting exactly this token, reject others.
    RequireToken(Bytes),
    /// Accept the transport but never answer the bind.
    Silent,
}

/// Events a stub reports to the test.
#[derive(Debug, PartialEq, Eq)]
enum StubEvent {
    BindAccepted,
    BindRejected,
    ConnectionClosed,
}

/// Starts an in-process QUIC relay stub.
///
/// Returns the candidate address string for the picker and an event
/// stream for assertions.
fn start_relay_stub(behavior: StubBehavior) -> (String, SocketAddr, mpsc::UnboundedReceiver<StubEvent>) {
    init_crypto();

    let cert_key = generate_self_signed_cert(vec!["localhost".to_string()]).unwrap();
    let tls = build_server_config(&cert_key, "relaypick/1").unwrap();

    let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(tls).unwrap(),
    ));
    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(Duration::from_secs(10).try_into().unwrap()));
    server_config.transport_config(Arc::new(transport));

    let endpoint = quinn::Endpoint::server(server_config, "127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = endpoint.local_addr().unwrap();

    let (event_tx, event_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(incoming) = endpoint.accept().await {
            let behavior = behavior.clone();
            let event_tx = event_tx.clone();
            tokio::spawn(async move {
                // Every exit past this point reports ConnectionClosed so
                // tests can assert that abandoned probes were released,
                // no matter how far the handshake got.
                let connection = match incoming.await {
                    Ok(connection) => connection,
                    Err(_) => {
                        let _ = event_tx.send(StubEvent::ConnectionClosed);
                        return;
                    }
                };
                let (mut send, mut recv) = match connection.accept_bi().await {
                    Ok(streams) => streams,
                    Err(_) => {
                        let _ = event_tx.send(StubEvent::ConnectionClosed);
                        return;
                    }
                };

                let mut buffer = BytesMut::new();
                let frame = match read_frame(&mut recv, &mut buffer).await {
                    Ok(Some(frame)) => frame,
                    _ => {
                        let _ = event_tx.send(StubEvent::ConnectionClosed);
                        return;
                    }
                };
                let token = match frame {
                    Frame::BindReq { token, .. } => token,
                    _ => {
                        let _ = event_tx.send(StubEvent::ConnectionClosed);
                        return;
                    }
                };

                match behavior {
                    StubBehavior::Silent => {
                        // Hold the stream open without answering
                        tokio::time::sleep(Duration::from_secs(600)).await;
                        return;
                    }
                    StubBehavior::AcceptAll => {
                        let _ = write_frame(&mut send, &Frame::BindOk).await;
                        let _ = event_tx.send(StubEvent::BindAccepted);
                    }
                    StubBehavior::RequireToken(expected) => {
                        if token == expected {
                            let _ = write_frame(&mut send, &Frame::BindOk).await;
                            let _ = event_tx.send(StubEvent::BindAccepted);
                        } else {
                            let _ = write_frame(
                                &mut send,
                                &Frame::BindReject {
                                    reason: "token missing or rejected".to_string(),
                                },
                            )
                            .await;
                            let _ = event_tx.send(StubEvent::BindRejected);
                        }
                    }
                }

                // Keep the bound connection open until the peer closes it
                let mut scratch = [0u8; 1024];
                loop {
                    match recv.read(&mut scratch).await {
                        Ok(Some(_)) => continue,
                        Ok(None) | Err(_) => break,
                    }
                }
                let _ = event_tx.send(StubEvent::ConnectionClosed);
            });
        }
    });

    (format!("rel://127.0.0.1:{}", addr.port()), addr, event_rx)
}

/// Reserves a loopback UDP port with no listener behind it.
fn dead_candidate() -> String {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = socket.local_addr().unwrap().port();
    drop(socket);
    format!("rel://127.0.0.1:{}", port)
}

fn make_picker(
    token_store: Option<Arc<dyn TokenStore>>,
    pick_timeout: Duration,
) -> ServerPicker {
    init_crypto();
    let tls = relaypick::build_client_config_insecure("relaypick/1").unwrap();
    ServerPicker::new(
        "peerA",
        token_store,
        PickerConfig {
            pick_timeout,
            idle_timeout: Duration::from_secs(1),
            keep_alive: Duration::ZERO,
            tls,
            sni_override: None,
        },
    )
}

/// Both candidates dead, no token store, 10 second deadline. The pick
/// must resolve well before the deadline.
#[tokio::test]
async fn unavailable_relays_fail_before_deadline() {
    let picker = make_picker(None, Duration::from_secs(10));
    let cancel = CancellationToken::new();
    let candidates = vec![dead_candidate(), dead_candidate()];

    let started = Instant::now();
    let result = picker.pick_server(&candidates, &cancel).await;
    let elapsed = started.elapsed();

    match result {
        Err(Error::AllUnavailable(agg)) => {
            assert_eq!(agg.len(), 2);
            assert_eq!(agg.failures()[0].0, candidates[0]);
            assert_eq!(agg.failures()[1].0, candidates[1]);
        }
        other => panic!("expected AllUnavailable, got {:?}", other.map(|c| c.address().to_string())),
    }
    assert!(
        elapsed < Duration::from_secs(5),
        "pick took too long to fail: {:?}",
        elapsed
    );
}

#[tokio::test]
async fn picks_the_only_live_relay() {
    let (live, live_addr, mut events) = start_relay_stub(StubBehavior::AcceptAll);
    let picker = make_picker(None, Duration::from_secs(10));
    let cancel = CancellationToken::new();
    let candidates = vec![dead_candidate(), live.clone()];

    let conn = picker.pick_server(&candidates, &cancel).await.unwrap();

    assert_eq!(conn.address(), live);
    assert_eq!(conn.remote_address().port(), live_addr.port());
    assert_eq!(events.recv().await, Some(StubEvent::BindAccepted));

    conn.close("test done");
}

#[tokio::test]
async fn single_winner_and_loser_released() {
    let (first, _, mut first_events) = start_relay_stub(StubBehavior::AcceptAll);
    let (second, _, mut second_events) = start_relay_stub(StubBehavior::AcceptAll);
    let picker = make_picker(None, Duration::from_secs(10));
    let cancel = CancellationToken::new();
    let candidates = vec![first.clone(), second.clone()];

    let conn = picker.pick_server(&candidates, &cancel).await.unwrap();

    assert!(
        conn.address() == first || conn.address() == second,
        "winner must be one of the candidates"
    );

    // The losing relay, if it got as far as accepting a bind, must see
    // its connection closed while the winner stays open.
    let loser_events = if conn.address() == first {
        &mut second_events
    } else {
        &mut first_events
    };
    let released = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match loser_events.recv().await {
                Some(StubEvent::ConnectionClosed) | None => break,
                Some(_) => continue,
            }
        }
    })
    .await;
    assert!(released.is_ok(), "losing probe's connection was not released");

    conn.close("test done");
}

#[tokio::test]
async fn unauthorized_relay_recorded_in_aggregate() {
    let (candidate, _, mut events) =
        start_relay_stub(StubBehavior::RequireToken(Bytes::from_static(b"sekrit")));
    // Absent token store: the probe binds with an empty token.
    let picker = make_picker(None, Duration::from_secs(10));
    let cancel = CancellationToken::new();

    let result = picker.pick_server(&[candidate.clone()], &cancel).await;

    match result {
        Err(Error::AllUnavailable(agg)) => {
            assert_eq!(agg.len(), 1);
            match &agg.failures()[0] {
                (address, ProbeFailure::Unauthorized(reason)) => {
                    assert_eq!(address, &candidate);
                    assert!(reason.contains("token"));
                }
                other => panic!("expected Unauthorized, got {:?}", other),
            }
        }
        other => panic!("expected AllUnavailable, got {:?}", other.map(|c| c.address().to_string())),
    }
    assert_eq!(events.recv().await, Some(StubEvent::BindRejected));
}

#[tokio::test]
async fn token_store_authorizes_bind() {
    let (candidate, _, mut events) =
        start_relay_stub(StubBehavior::RequireToken(Bytes::from_static(b"sekrit")));
    let store = MemoryTokenStore::with_token("peerA", AuthToken::from("sekrit"));
    let picker = make_picker(Some(Arc::new(store)), Duration::from_secs(10));
    let cancel = CancellationToken::new();

    let conn = picker.pick_server(&[candidate.clone()], &cancel).await.unwrap();

    assert_eq!(conn.address(), candidate);
    assert_eq!(events.recv().await, Some(StubEvent::BindAccepted));

    conn.close("test done");
}

#[tokio::test]
async fn wrong_peer_token_is_rejected() {
    let (candidate, _, _events) =
        start_relay_stub(StubBehavior::RequireToken(Bytes::from_static(b"sekrit")));
    // Store holds a token for a different peer; peerA's lookup misses.
    let store = MemoryTokenStore::with_token("peerB", AuthToken::from("sekrit"));
    let picker = make_picker(Some(Arc::new(store)), Duration::from_secs(10));
    let cancel = CancellationToken::new();

    let result = picker.pick_server(&[candidate], &cancel).await;

    match result {
        Err(Error::AllUnavailable(agg)) => {
            assert!(matches!(agg.failures()[0].1, ProbeFailure::Unauthorized(_)));
        }
        other => panic!("expected AllUnavailable, got {:?}", other.map(|c| c.address().to_string())),
    }
}

#[tokio::test]
async fn cancellation_returns_promptly() {
    let (candidate, _, _events) = start_relay_stub(StubBehavior::Silent);
    let picker = make_picker(None, Duration::from_secs(10));
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let result = picker.pick_server(&[candidate], &cancel).await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(
        elapsed < Duration::from_secs(3),
        "cancellation was not prompt: {:?}",
        elapsed
    );
}

#[tokio::test]
async fn deadline_exceeded_on_silent_relay() {
    let (candidate, _, _events) = start_relay_stub(StubBehavior::Silent);
    let picker = make_picker(None, Duration::from_millis(300));
    let cancel = CancellationToken::new();

    let started = Instant::now();
    let result = picker.pick_server(&[candidate], &cancel).await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(Error::DeadlineExceeded)));
    assert!(
        elapsed < Duration::from_secs(3),
        "deadline was not honored promptly: {:?}",
        elapsed
    );
}

#[tokio::test]
async fn no_candidates_is_immediate() {
    let picker = make_picker(None, Duration::from_secs(10));
    let cancel = CancellationToken::new();

    let started = Instant::now();
    let result = picker.pick_server(&[], &cancel).await;

    assert!(matches!(result, Err(Error::NoCandidates)));
    assert!(started.elapsed() < Duration::from_millis(100));
}
