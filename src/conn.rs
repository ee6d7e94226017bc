//! Connection handle returned by a successful pick.

use std::net::SocketAddr;

/// A live, authorized connection to the winning relay server.
///
/// Handed to the relay protocol layer once the pick completes. The handle
/// owns the QUIC connection, the bind stream pair, and a clone of the
/// client endpoint so the connection outlives the pick call.
pub struct RelayConn {
    endpoint: quinn::Endpoint,
    connection: quinn::Connection,
    send: quinn::SendStream,
    recv: quinn::RecvStream,
    address: String,
}

impl std::fmt::Debug for RelayConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConn")
            .field("address", &self.address)
            .field("remote", &self.connection.remote_address())
            .finish()
    }
}

impl RelayConn {
    pub(crate) fn new(
        endpoint: quinn::Endpoint,
        connection: quinn::Connection,
        send: quinn::SendStream,
        recv: quinn::RecvStream,
        address: String,
    ) -> Self {
        Self {
            endpoint,
            connection,
            send,
            recv,
            address,
        }
    }

    /// The candidate address this connection was established to, exactly
    /// as supplied to the picker.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The resolved remote socket address.
    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// The underlying QUIC connection.
    pub fn connection(&self) -> &quinn::Connection {
        &self.connection
    }

    /// The bind stream pair, for the relay protocol layer to continue on.
    pub fn streams_mut(&mut self) -> (&mut quinn::SendStream, &mut quinn::RecvStream) {
        (&mut self.send, &mut self.recv)
    }

    /// Closes the connection with the given reason.
    ///
    /// Dropping the handle also releases the connection; an explicit close
    /// conveys the reason to the relay.
    pub fn close(&self, reason: &str) {
        self.connection.close(0u32.into(), reason.as_bytes());
    }

    /// Waits for the endpoint to flush outstanding close packets.
    pub async fn wait_idle(&self) {
        self.endpoint.wait_idle().await;
    }
}
