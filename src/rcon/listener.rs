//! The broadcast connection.
//!
//! A second, independent connection that only exists to recieve frames the
//! server pushes on its own. After logging in it runs the subscription
//! commands, then a read loop hands every frame that passes the
//! [`BroadcastFilter`](super::BroadcastFilter) to the broadcast handler.
//!
//! No read on this connection has a timeout: broadcasts arrive whenever the
//! server feels like it.

use super::{
    config::{ClientConfig, SharedSettings},
    connection::{Connection, SharedWriter},
    heartbeat,
    packet::Response,
};
use crate::{
    errors::{ErrorSender, RconError},
    socket::ReadFrame,
};
use std::sync::Arc;
use tokio::{net::tcp::OwnedReadHalf, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// A running broadcast listener.
#[derive(Debug)]
pub(crate) struct ListenerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Open the broadcast connection and start the read loop.
    ///
    /// Everything up to the read loop happens before this returns, so a bad
    /// password or a failing subscription command is returned here.
    pub(crate) async fn start(
        config: Arc<ClientConfig>,
        settings: SharedSettings,
        subscriptions: Vec<String>,
        errors: ErrorSender,
        parent: &CancellationToken,
    ) -> Result<Self, RconError> {
        let cancel = parent.child_token();
        let link = Link::establish(&config, &settings, &subscriptions, &errors, &cancel).await?;

        let listener = Listener {
            link,
            config,
            settings,
            subscriptions,
            errors,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(listener.run());

        Ok(Self { cancel, task })
    }

    /// Stop the read loop and its heartbeat and close the connection.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            tracing::warn!("broadcast listener task ended abnormally: {err}");
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// One generation of the broadcast connection. Replaced wholesale on reconnect.
struct Link {
    reader: OwnedReadHalf,
    writer: SharedWriter,
    heartbeat: Option<CancellationToken>,
}

impl Link {
    async fn establish(
        config: &ClientConfig,
        settings: &SharedSettings,
        subscriptions: &[String],
        errors: &ErrorSender,
        cancel: &CancellationToken,
    ) -> Result<Self, RconError> {
        debug_log!(config.debug, "opening broadcast connection");
        let mut conn = Connection::establish(config).await?;

        for command in subscriptions {
            debug_log!(config.debug, "running subscription command: {command}");
            conn.exec(command)
                .await
                .map_err(|source| RconError::Subscription {
                    command: command.clone(),
                    source: Box::new(source),
                })?;
        }

        let (reader, writer) = conn.into_split();

        let heartbeat = settings.heartbeat().map(|interval| {
            let token = cancel.child_token();
            heartbeat::spawn(
                writer.clone(),
                interval,
                token.clone(),
                Some(errors.clone()),
                config.debug,
            );
            debug_log!(config.debug, "broadcast heartbeat started every {interval:?}");
            token
        });

        Ok(Self {
            reader,
            writer,
            heartbeat,
        })
    }

    async fn close(self) {
        if let Some(token) = self.heartbeat {
            token.cancel();
        }
        // the peer may already be gone, nothing to report
        let _ = self.writer.close().await;
    }
}

struct Listener {
    link: Link,
    config: Arc<ClientConfig>,
    settings: SharedSettings,
    subscriptions: Vec<String>,
    errors: ErrorSender,
    cancel: CancellationToken,
}

impl Listener {
    async fn run(mut self) {
        loop {
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                result = self.link.reader.read_response() => result,
            };

            match result {
                Ok(Some(response)) => self.dispatch(&response),
                Ok(None) => {}
                Err(err) if err.is_connection_closed() => {
                    tracing::warn!("broadcast connection closed");
                    if let Some(token) = self.link.heartbeat.take() {
                        token.cancel();
                    }
                    self.settings.notify_disconnect(Some(&err), false);

                    if !self.config.attempt_reconnect || !self.reconnect().await {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!("error reading broadcast: {err}");
                    let _ = self.errors.send(err);
                }
            }
        }

        self.link.close().await;
        debug_log!(self.config.debug, "broadcast listener stopped");
    }

    fn dispatch(&self, response: &Response) {
        if !response.is_broadcast(&self.settings.filter()) {
            return;
        }

        if let Some(handler) = self.settings.broadcast_handler() {
            handler(response.text());
        }
    }

    /// Replace the link with a fresh one. Returns `false` if that failed or
    /// the listener was cancelled meanwhile.
    async fn reconnect(&mut self) -> bool {
        debug_log!(self.config.debug, "reconnecting broadcast connection");

        let config = self.config.as_ref();
        let settings = &self.settings;
        let subscriptions = self.subscriptions.as_slice();
        let errors = &self.errors;
        let cancel = &self.cancel;

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return false,
            result = config.reconnect.retry(move || {
                Link::establish(config, settings, subscriptions, errors, cancel)
            }) => result,
        };

        match result {
            Ok(link) => {
                tracing::info!("broadcast connection re-established to {}", config.address());
                let old = std::mem::replace(&mut self.link, link);
                old.close().await;
                true
            }
            Err(err) => {
                tracing::warn!("broadcast connection could not be re-established: {err}");
                let _ = self.errors.send(err);
                false
            }
        }
    }
}
