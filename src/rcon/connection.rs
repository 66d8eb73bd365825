//! One authenticated TCP connection to the server.

use super::{
    config::ClientConfig,
    packet::{PacketType, Payload, Response, RESPONSE_VALUE},
    DIAL_TIMEOUT,
};
use crate::{
    errors::RconError,
    socket::{ReadFrame, WriteFrame},
};
use async_trait::async_trait;
use std::{
    io::{self, ErrorKind},
    sync::Arc,
};
use tokio::{
    io::AsyncWriteExt,
    net::{lookup_host, tcp::OwnedReadHalf, tcp::OwnedWriteHalf, TcpSocket, TcpStream},
    sync::Mutex,
    time::timeout,
};

/// Hands out request IDs. Never yields -1, which servers reserve for
/// authentication failures.
#[derive(Debug)]
pub(crate) struct RequestIds {
    next: i32,
}

impl RequestIds {
    pub(crate) fn new() -> Self {
        Self { next: 1 }
    }

    pub(crate) fn next(&mut self) -> i32 {
        let id = self.next;
        self.next = if id == i32::MAX { 1 } else { id + 1 };
        id
    }
}

#[derive(Debug)]
pub(crate) struct Connection {
    stream: TcpStream,
    ids: RequestIds,
}

impl Connection {
    /// Dial the configured server and log in.
    pub(crate) async fn establish(config: &ClientConfig) -> Result<Self, RconError> {
        let address = config.address();
        debug_log!(config.debug, "dialing {address}");

        let stream = timeout(DIAL_TIMEOUT, dial(&address))
            .await
            .unwrap_or_else(|_| Err(io::Error::new(ErrorKind::TimedOut, "dial timed out")))
            .map_err(|source| RconError::Dial {
                address: address.clone(),
                source,
            })?;

        debug_log!(config.debug, "connected to {address}, authenticating");

        let mut conn = Self {
            stream,
            ids: RequestIds::new(),
        };
        conn.authenticate(&config.password).await?;

        debug_log!(config.debug, "authenticated with {address}");
        Ok(conn)
    }

    /// Send the password. A reply carrying request ID -1 means it was wrong.
    async fn authenticate(&mut self, password: &str) -> Result<(), RconError> {
        let payload = Payload::new(PacketType::Auth, password.to_owned())?;
        let id = self.ids.next();
        self.stream.write_frame(id, &payload).await?;

        let mut reply = self.stream.read_frame().await?;

        // Source servers mirror an empty response value before the real auth reply
        if reply.packet_type == RESPONSE_VALUE && reply.body.is_empty() && reply.request_id == id {
            reply = self.stream.read_frame().await?;
        }

        if reply.request_id == -1 {
            return Err(RconError::AuthFailed);
        }

        Ok(())
    }

    /// Run one command and wait for its reply.
    pub(crate) async fn exec(&mut self, command: &str) -> Result<Option<Response>, RconError> {
        let payload = Payload::new(PacketType::ExecCommand, command.to_owned())?;
        let id = self.ids.next();
        self.stream.write_frame(id, &payload).await?;

        let reply = self.stream.read_frame().await?;
        if reply.request_id == -1 {
            return Err(RconError::AuthFailed);
        }

        Ok(Response::from_frame(reply))
    }

    /// Split into a read half for the broadcast loop and a shared write half
    /// for everything that only writes.
    pub(crate) fn into_split(self) -> (OwnedReadHalf, SharedWriter) {
        let (reader, writer) = self.stream.into_split();
        let writer = SharedWriter {
            inner: Arc::new(Mutex::new(WriterState {
                half: writer,
                ids: self.ids,
            })),
        };
        (reader, writer)
    }

    pub(crate) async fn close(mut self) -> Result<(), RconError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[derive(Debug)]
struct WriterState {
    half: OwnedWriteHalf,
    ids: RequestIds,
}

/// Write half of a split connection. Each packet is written whole while the
/// lock is held, so concurrent writers never interleave on the wire.
#[derive(Debug, Clone)]
pub(crate) struct SharedWriter {
    inner: Arc<Mutex<WriterState>>,
}

impl SharedWriter {
    pub(crate) async fn send(&self, payload: &Payload) -> Result<(), RconError> {
        let mut state = self.inner.lock().await;
        let id = state.ids.next();
        state.half.write_frame(id, payload).await
    }

    pub(crate) async fn close(&self) -> Result<(), RconError> {
        self.inner.lock().await.half.shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl super::heartbeat::Beat for SharedWriter {
    async fn beat(&self, command: &str) -> Result<(), RconError> {
        let payload = Payload::new(PacketType::ExecCommand, command.to_owned())?;
        self.send(&payload).await
    }
}

/// Connect to the first address `address` resolves to that accepts, with
/// TCP keep-alive turned on.
async fn dial(address: &str) -> io::Result<TcpStream> {
    let mut last_err = None;

    for addr in lookup_host(address).await? {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_keepalive(true)?;

        match socket.connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(ErrorKind::AddrNotAvailable, "host resolved to no addresses")
    }))
}

#[cfg(test)]
mod tests {
    use super::{Connection, RequestIds};
    use crate::{
        errors::RconError,
        rcon::{
            mock::{MockOptions, MockServer},
            ClientConfig,
        },
    };

    #[test]
    fn test_request_ids_skip_negative() {
        let mut ids = RequestIds { next: i32::MAX };
        assert_eq!(ids.next(), i32::MAX);
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
    }

    #[tokio::test]
    async fn test_establish() -> Result<(), RconError> {
        let server = MockServer::start(MockOptions::new("pw")).await;
        let mut conn = Connection::establish(&server.config()).await?;

        let reply = conn.exec("status").await?.unwrap();
        assert_eq!(reply.trimmed_text(), "status");

        conn.close().await
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let server = MockServer::start(MockOptions::new("pw")).await;
        let config = ClientConfig {
            password: "nope".to_string(),
            ..server.config()
        };

        let err = Connection::establish(&config).await.unwrap_err();
        assert!(matches!(err, RconError::AuthFailed));
    }

    #[tokio::test]
    async fn test_source_style_auth_preamble() -> Result<(), RconError> {
        let server = MockServer::start(MockOptions {
            source_auth: true,
            ..MockOptions::new("pw")
        })
        .await;

        let mut conn = Connection::establish(&server.config()).await?;
        let reply = conn.exec("ListPlayers").await?.unwrap();
        assert_eq!(reply.text(), "ListPlayers");

        Ok(())
    }

    #[tokio::test]
    async fn test_source_style_auth_failure() {
        let server = MockServer::start(MockOptions {
            source_auth: true,
            ..MockOptions::new("pw")
        })
        .await;
        let config = ClientConfig {
            password: "wrong".to_string(),
            ..server.config()
        };

        assert!(matches!(
            Connection::establish(&config).await,
            Err(RconError::AuthFailed)
        ));
    }

    #[tokio::test]
    async fn test_dial_failure() {
        // bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = ClientConfig::new("127.0.0.1", port, "pw");
        let err = Connection::establish(&config).await.unwrap_err();
        assert!(matches!(err, RconError::Dial { .. }), "got {err:?}");
    }
}
