//! The public RCON client.

use super::{
    config::{ClientConfig, SharedSettings},
    listener::ListenerHandle,
    session::SessionHandle,
};
use crate::errors::{ErrorSender, RconError};
use parking_lot::Mutex;
use regex::Regex;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

/// Struct that stores the connections and other state of an RCON client.
///
/// A client owns up to two connections to the server: the main connection,
/// opened by [`connect`](Self::connect) and used by [`exec_command`](Self::exec_command),
/// and an optional broadcast connection opened by
/// [`listen_for_broadcasts`](Self::listen_for_broadcasts) that only recieves
/// frames the server pushes.
///
/// # Examples
///
/// ```no_run
/// use rcon_broadcast::{errors::RconError, rcon::{Client, ClientConfig}};
/// use tokio::sync::mpsc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), RconError> {
///     let config = ClientConfig::new("game.example.com", 27015, "password")
///         .with_broadcasts(true)
///         .with_non_broadcast_pattern("^Alive$");
///     let client = Client::new(config)?;
///     client.set_broadcast_handler(|body| println!("broadcast: {body}"));
///
///     client.connect().await?;
///     let output = client.exec_command("ListPlayers").await?;
///     println!("{output}");
///
///     let (errors, mut rx) = mpsc::unbounded_channel();
///     client.listen_for_broadcasts(["ListenToBroadcasts"], errors).await?;
///     while let Some(err) = rx.recv().await {
///         eprintln!("broadcast error: {err}");
///     }
///
///     client.disconnect().await
/// }
/// ```
#[allow(clippy::module_name_repetitions)]
pub struct Client {
    config: Arc<ClientConfig>,
    settings: SharedSettings,
    cancel: CancellationToken,
    session: Mutex<Option<SessionHandle>>,
    listener: Mutex<Option<ListenerHandle>>,
}

impl Client {
    /// Construct a [`Client`] from `config`. Nothing is dialed until
    /// [`connect`](Self::connect) is called.
    ///
    /// # Errors
    /// Returns [`RconError::InvalidPattern`] if a non-broadcast pattern does
    /// not compile.
    pub fn new(config: ClientConfig) -> Result<Self, RconError> {
        let settings = SharedSettings::from_config(&config)?;

        Ok(Self {
            config: Arc::new(config),
            settings,
            cancel: CancellationToken::new(),
            session: Mutex::new(None),
            listener: Mutex::new(None),
        })
    }

    /// The configuration this client was built from.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open and authenticate the main connection, and start its heartbeat
    /// if heartbeats are enabled. An existing main connection is replaced.
    ///
    /// A connection whose password was rejected is closed before this
    /// returns. It never becomes the main connection, so a following
    /// [`disconnect`](Self::disconnect) has nothing to close and does not
    /// call the disconnect handler.
    ///
    /// # Errors
    /// Returns [`RconError::Dial`] if the server could not be reached within
    /// ten seconds and [`RconError::AuthFailed`] if the password was rejected.
    pub async fn connect(&self) -> Result<(), RconError> {
        let session =
            SessionHandle::connect(Arc::clone(&self.config), self.settings.clone(), &self.cancel)
                .await?;

        let previous = self.session.lock().replace(session);
        if let Some(previous) = previous {
            debug_log!(self.config.debug, "replacing existing main connection");
            previous.disconnect().await?;
        }

        Ok(())
    }

    /// Whether the main connection is up. Turns `false` as soon as a command
    /// finds the connection closed and it was not re-established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(SessionHandle::is_connected)
    }

    /// Whether a broadcast listener is running.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .is_some_and(ListenerHandle::is_running)
    }

    /// Close both connections and stop their heartbeats, then call the
    /// disconnect handler with `(None, true)`. Does nothing if neither
    /// connection is open.
    ///
    /// # Errors
    /// Returns `Err` if closing the main connection failed.
    pub async fn disconnect(&self) -> Result<(), RconError> {
        let session = self.session.lock().take();
        let listener = self.listener.lock().take();

        if session.is_none() && listener.is_none() {
            return Ok(());
        }

        debug_log!(self.config.debug, "disconnecting");

        let result = match session {
            Some(session) => session.disconnect().await,
            None => Ok(()),
        };
        if let Some(listener) = listener {
            listener.stop().await;
        }

        debug_log!(self.config.debug, "calling disconnect handler");
        self.settings.notify_disconnect(None, true);

        result
    }

    /// Run `command` over the main connection and return the reply with
    /// surrounding whitespace removed.
    ///
    /// If the server dropped the connection and reconnection is enabled, the
    /// client reconnects and returns an empty string. Without reconnection
    /// the [`RconError::ConnectionClosed`] is returned.
    ///
    /// # Errors
    /// Returns [`RconError::NotConnected`] before [`connect`](Self::connect),
    /// [`RconError::Encoding`] for commands longer than 4086 bytes, and
    /// any network or reconnection failure.
    pub async fn exec_command(&self, command: &str) -> Result<String, RconError> {
        debug_log!(self.config.debug, "executing command: {command}");

        let session = self.session.lock().clone().ok_or(RconError::NotConnected)?;
        session.exec(command).await
    }

    /// Open the broadcast connection, run `subscription_commands` on it and
    /// start handing broadcasts to the broadcast handler. Returns once the
    /// listener is running; does nothing if broadcasts are not enabled.
    ///
    /// Errors that happen after this returns (read errors, failed
    /// reconnects, heartbeat failures) are sent on `errors`. A listener that
    /// is already running is replaced.
    ///
    /// # Errors
    /// Returns `Err` if the connection could not be opened or authenticated,
    /// or [`RconError::Subscription`] if a subscription command failed.
    pub async fn listen_for_broadcasts<I, S>(
        &self,
        subscription_commands: I,
        errors: ErrorSender,
    ) -> Result<(), RconError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !self.config.enable_broadcasts {
            debug_log!(self.config.debug, "broadcasts are disabled, not listening");
            return Ok(());
        }

        let subscriptions = subscription_commands.into_iter().map(Into::into).collect();
        let listener = ListenerHandle::start(
            Arc::clone(&self.config),
            self.settings.clone(),
            subscriptions,
            errors,
            &self.cancel,
        )
        .await?;

        let previous = self.listener.lock().replace(listener);
        if let Some(previous) = previous {
            debug_log!(self.config.debug, "replacing existing broadcast listener");
            previous.stop().await;
        }

        Ok(())
    }

    /// Set the function that recieves broadcasts.
    ///
    /// Not everything the server pushes is a broadcast. Add non-broadcast
    /// patterns for anything the handler should not see.
    pub fn set_broadcast_handler<F>(&self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        debug_log!(self.config.debug, "broadcast handler set");
        self.settings.set_broadcast_handler(Arc::new(handler));
    }

    /// Set the function called when a connection goes away.
    pub fn set_disconnect_handler<F>(&self, handler: F)
    where
        F: Fn(Option<&RconError>, bool) + Send + Sync + 'static,
    {
        debug_log!(self.config.debug, "disconnect handler set");
        self.settings.set_disconnect_handler(Arc::new(handler));
    }

    /// Turn the heartbeat on or off. Takes effect for connections opened
    /// after the call.
    pub fn set_send_heartbeat_command(&self, enabled: bool) {
        debug_log!(self.config.debug, "heartbeat command set to {enabled}");
        self.settings.set_send_heartbeat_command(enabled);
    }

    /// Change the heartbeat interval. Takes effect for connections opened
    /// after the call. A zero interval means the default of 30 seconds.
    pub fn set_heartbeat_interval(&self, interval: Duration) {
        debug_log!(self.config.debug, "heartbeat interval set to {interval:?}");
        self.settings.set_heartbeat_interval(interval);
    }

    /// Suppress broadcasts matching `pattern`, starting with the next frame.
    pub fn add_non_broadcast_pattern(&self, pattern: Regex) {
        debug_log!(self.config.debug, "non broadcast pattern added: {pattern}");
        self.settings.add_non_broadcast_pattern(pattern);
    }

    /// Where failures of the main connection's heartbeat are reported.
    /// Without one they are only logged.
    pub fn set_error_channel(&self, errors: ErrorSender) {
        self.settings.set_error_sender(errors);
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
