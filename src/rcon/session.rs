//! The main connection, used for running commands.
//!
//! A session is a task that owns its [`Connection`]. Callers and the heartbeat
//! talk to it through a [`SessionHandle`]; requests are queued and handled one
//! at a time, so two exchanges never overlap on the socket.

use super::{
    config::{ClientConfig, SharedSettings},
    connection::Connection,
    heartbeat::{self, Beat},
};
use crate::errors::RconError;
use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

const REQUEST_QUEUE_CAPACITY: usize = 32;

#[derive(Debug)]
enum Request {
    Exec {
        command: String,
        reply: oneshot::Sender<Result<String, RconError>>,
    },
    Disconnect {
        reply: oneshot::Sender<Result<(), RconError>>,
    },
}

/// Cheap, cloneable way to reach a running session.
#[derive(Debug, Clone)]
pub(crate) struct SessionHandle {
    tx: mpsc::Sender<Request>,
    /// Set while the task holds an authenticated connection.
    live: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Dial, authenticate and start the session task.
    ///
    /// The task stops when `parent` is cancelled or [`disconnect`](Self::disconnect) is called.
    pub(crate) async fn connect(
        config: Arc<ClientConfig>,
        settings: SharedSettings,
        parent: &CancellationToken,
    ) -> Result<Self, RconError> {
        let conn = Connection::establish(&config).await?;

        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let handle = Self {
            tx,
            live: Arc::new(AtomicBool::new(false)),
        };

        let mut session = Session {
            conn: None,
            config,
            settings,
            rx,
            handle: handle.clone(),
            cancel: parent.child_token(),
            heartbeat: None,
        };
        session.install(conn);
        tokio::spawn(session.run());

        Ok(handle)
    }

    /// Run `command` and return the trimmed reply.
    pub(crate) async fn exec(&self, command: &str) -> Result<String, RconError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Exec {
                command: command.to_owned(),
                reply,
            })
            .await
            .map_err(|_| RconError::Shutdown)?;

        rx.await.map_err(|_| RconError::Shutdown)?
    }

    /// Close the connection once every queued request has been answered.
    /// Disconnecting a session that already stopped is a no-op.
    pub(crate) async fn disconnect(&self) -> Result<(), RconError> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Request::Disconnect { reply }).await.is_err() {
            return Ok(());
        }

        rx.await.unwrap_or(Ok(()))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Whether the task is running and its connection has not been lost.
    pub(crate) fn is_connected(&self) -> bool {
        !self.is_closed() && self.live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Beat for SessionHandle {
    async fn beat(&self, command: &str) -> Result<(), RconError> {
        self.exec(command).await.map(|_| ())
    }
}

struct Session {
    conn: Option<Connection>,
    config: Arc<ClientConfig>,
    settings: SharedSettings,
    rx: mpsc::Receiver<Request>,
    /// Handed to the heartbeat so its commands queue up behind callers'.
    handle: SessionHandle,
    cancel: CancellationToken,
    heartbeat: Option<CancellationToken>,
}

impl Session {
    async fn run(mut self) {
        loop {
            let request = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                request = self.rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            match request {
                Request::Exec { command, reply } => {
                    let result = self.exec(&command).await;
                    let _ = reply.send(result);
                }
                Request::Disconnect { reply } => {
                    let _ = reply.send(self.close().await);
                    break;
                }
            }
        }

        self.stop_heartbeat();
        debug_log!(self.config.debug, "main session stopped");
    }

    async fn exec(&mut self, command: &str) -> Result<String, RconError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(RconError::NotConnected);
        };

        debug_log!(self.config.debug, "executing command: {command}");

        match conn.exec(command).await {
            Ok(reply) => Ok(reply.map(|r| r.trimmed_text()).unwrap_or_default()),
            Err(err) if err.is_connection_closed() => {
                self.conn = None;
                self.handle.live.store(false, Ordering::SeqCst);
                tracing::warn!("main connection closed while executing {command:?}");
                self.settings.notify_disconnect(Some(&err), false);

                // without reconnect the heartbeat runs into the closed
                // connection itself and reports it
                if !self.config.attempt_reconnect {
                    return Err(err);
                }

                self.stop_heartbeat();
                self.reconnect().await?;
                Ok(String::new())
            }
            Err(err) => Err(err),
        }
    }

    async fn reconnect(&mut self) -> Result<(), RconError> {
        debug_log!(self.config.debug, "reconnecting main connection");

        let config = Arc::clone(&self.config);
        let config = config.as_ref();
        let conn = config
            .reconnect
            .retry(move || Connection::establish(config))
            .await
            .map_err(|err| {
                tracing::warn!("main connection could not be re-established: {err}");
                err
            })?;

        tracing::info!("main connection re-established to {}", config.address());
        self.install(conn);
        Ok(())
    }

    /// Take ownership of a fresh connection and start its heartbeat.
    fn install(&mut self, conn: Connection) {
        self.conn = Some(conn);
        self.handle.live.store(true, Ordering::SeqCst);

        if let Some(interval) = self.settings.heartbeat() {
            let token = self.cancel.child_token();
            heartbeat::spawn(
                self.handle.clone(),
                interval,
                token.clone(),
                self.settings.error_sender(),
                self.config.debug,
            );
            self.heartbeat = Some(token);
            debug_log!(self.config.debug, "main heartbeat started every {interval:?}");
        }
    }

    fn stop_heartbeat(&mut self) {
        if let Some(token) = self.heartbeat.take() {
            token.cancel();
        }
    }

    async fn close(&mut self) -> Result<(), RconError> {
        self.stop_heartbeat();
        self.handle.live.store(false, Ordering::SeqCst);

        match self.conn.take() {
            Some(conn) => {
                debug_log!(self.config.debug, "closing main connection");
                conn.close().await
            }
            None => Ok(()),
        }
    }
}
