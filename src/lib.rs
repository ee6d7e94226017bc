//! relaypick - Relay server picker for relay-based peer-to-peer clients.
//!
//! This crate probes a set of `rel://` relay candidates concurrently over
//! QUIC, performs an authorization bind handshake against each, and
//! returns the first reachable, authorized connection under a
//! caller-supplied deadline.

pub mod cli;
pub mod common;
pub mod conn;
pub mod error;
pub mod picker;
pub mod probe;
pub mod protocol;
pub mod tls;
pub mod token;

pub use cli::{
    default_config_dir, BuildInfo, Cli, Command, PickArgs, DEFAULT_ALPN, DEFAULT_RELAY_PORT,
};
pub use common::{
    build_tls_config, format_duration, parse_relay_address, resolve_relay_address, DnsResolver,
    SecurityMode, READ_BUFFER_SIZE,
};
pub use conn::RelayConn;
pub use error::{AggregateError, Error, ExitCode, ProbeFailure, Result};
pub use picker::{run_pick, PickerConfig, ServerPicker};
pub use probe::ProbeOutcome;
pub use protocol::{
    decode_varint, encode_varint, read_frame, write_frame, Frame, ProtocolError, ProtocolResult,
    MAX_FRAME_PAYLOAD,
};
pub use tls::{
    build_client_config_ca, build_client_config_fingerprint, build_client_config_insecure,
    build_server_config, compute_fingerprint, format_fingerprint, generate_self_signed_cert,
    parse_fingerprint, CertKeyPair, TlsError, TlsResult,
};
pub use token::{AuthToken, FileTokenStore, MemoryTokenStore, NoopTokenStore, TokenStore};
