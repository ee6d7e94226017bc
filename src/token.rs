//! Token store: per-peer authentication credentials.
//!
//! The picker never requires a configured store. An absent store is
//! represented by [`NoopTokenStore`], which always misses, so probing
//! proceeds with an empty token and relays that require auth reject the
//! bind.

use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

/// Credential material presented during the bind handshake.
///
/// May be empty; an empty token is sent as a zero-length field and the
/// relay decides whether anonymous binds are acceptable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken(Bytes);

impl AuthToken {
    /// Creates a token from raw bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Returns the empty token.
    pub fn empty() -> Self {
        Self(Bytes::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the token bytes for the wire.
    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    /// Consumes the token, returning its bytes.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<&str> for AuthToken {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

/// Source of per-peer authentication tokens.
///
/// Implementations must be safe for concurrent lookups; every candidate
/// probe may call `lookup` at the same time.
pub trait TokenStore: Send + Sync {
    /// Returns the token for `peer_id`, or `None` if the store has no
    /// credential for that peer.
    fn lookup(&self, peer_id: &str) -> Option<AuthToken>;
}

/// Token store that never has a token.
///
/// Stands in for an unconfigured store, so callers never special-case
/// absence.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTokenStore;

impl TokenStore for NoopTokenStore {
    fn lookup(&self, _peer_id: &str) -> Option<AuthToken> {
        None
    }
}

/// In-memory token store.
#[derive(Debug, Default, Clone)]
pub struct MemoryTokenStore {
    tokens: HashMap<String, AuthToken>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding a single peer's token.
    pub fn with_token(peer_id: impl Into<String>, token: AuthToken) -> Self {
        let mut store = Self::new();
        store.insert(peer_id, token);
        store
    }

    pub fn insert(&mut self, peer_id: impl Into<String>, token: AuthToken) {
        self.tokens.insert(peer_id.into(), token);
    }
}

impl TokenStore for MemoryTokenStore {
    fn lookup(&self, peer_id: &str) -> Option<AuthToken> {
        self.tokens.get(peer_id).cloned()
    }
}

/// Token store backed by a token file.
///
/// The file holds one `peer-id token` pair per line, whitespace
/// separated. Blank lines and lines starting with `#` are ignored. The
/// file is read once at load time; lookups never touch the filesystem.
#[derive(Debug)]
pub struct FileTokenStore {
    tokens: HashMap<String, AuthToken>,
}

impl FileTokenStore {
    /// Loads a token file from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;

        let mut tokens = HashMap::new();
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split_whitespace();
            let peer_id = fields.next();
            let token = fields.next();
            match (peer_id, token, fields.next()) {
                (Some(peer_id), Some(token), None) => {
                    tokens.insert(peer_id.to_string(), AuthToken::from(token));
                }
                _ => {
                    return Err(Error::Config(format!(
                        "malformed token file line {} in {}: expected 'peer-id token'",
                        lineno + 1,
                        path.display()
                    )));
                }
            }
        }

        Ok(Self { tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl TokenStore for FileTokenStore {
    fn lookup(&self, peer_id: &str) -> Option<AuthToken> {
        self.tokens.get(peer_id).cloned()
    }
}
