//! Client configuration.
//!
//! [`ClientConfig`] is the immutable snapshot a [`Client`](super::Client) is
//! built from. The handful of values that may change after construction live
//! in a lock shared between the client and its background tasks.

use super::{filter::BroadcastFilter, reconnect::ReconnectPolicy, DEFAULT_HEARTBEAT_INTERVAL};
use crate::errors::{ErrorSender, RconError};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};

/// Called with the text of every broadcast that passes the filter.
pub type BroadcastHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Called whenever a connection goes away. The flag is `true` when the
/// disconnect was asked for with [`Client::disconnect`](super::Client::disconnect).
pub type DisconnectHandler = Arc<dyn Fn(Option<&RconError>, bool) + Send + Sync>;

/// Everything needed to reach and log into an RCON server.
///
/// # Examples
///
/// ```
/// use rcon_broadcast::rcon::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new("game.example.com", 27015, "hunter2")
///     .with_heartbeat(Duration::from_secs(15))
///     .with_reconnect(true)
///     .with_broadcasts(true)
///     .with_non_broadcast_pattern("^Alive$");
///
/// assert_eq!(config.address(), "game.example.com:27015");
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Hostname or IP address of the server.
    pub host: String,
    /// RCON port.
    pub port: u16,
    /// RCON password.
    pub password: String,
    /// Send a keep-alive command on every connection at `heartbeat_interval`.
    pub send_heartbeat_command: bool,
    /// How often to send the keep-alive command.
    #[serde(with = "millis")]
    pub heartbeat_interval: Duration,
    /// Reconnect when the server drops a connection.
    pub attempt_reconnect: bool,
    /// How reconnection is attempted when `attempt_reconnect` is set.
    pub reconnect: ReconnectPolicy,
    /// Allow [`Client::listen_for_broadcasts`](super::Client::listen_for_broadcasts) to open
    /// the broadcast connection.
    pub enable_broadcasts: bool,
    /// Bodies matching any of these patterns never reach the broadcast handler.
    pub non_broadcast_patterns: Vec<String>,
    /// Log every lifecycle step at debug level.
    pub debug: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            password: String::new(),
            send_heartbeat_command: false,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            attempt_reconnect: false,
            reconnect: ReconnectPolicy::default(),
            enable_broadcasts: false,
            non_broadcast_patterns: Vec::new(),
            debug: false,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .field("send_heartbeat_command", &self.send_heartbeat_command)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("attempt_reconnect", &self.attempt_reconnect)
            .field("reconnect", &self.reconnect)
            .field("enable_broadcasts", &self.enable_broadcasts)
            .field("non_broadcast_patterns", &self.non_broadcast_patterns)
            .field("debug", &self.debug)
            .finish()
    }
}

impl ClientConfig {
    /// Configuration with every optional value at its default.
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON. Missing optional fields take their
    /// defaults; durations are whole milliseconds.
    ///
    /// # Errors
    /// Returns `Err` if `json` is not a valid configuration document.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Enable the heartbeat command with the given interval.
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.send_heartbeat_command = true;
        self.heartbeat_interval = interval;
        self
    }

    /// Enable or disable reconnection.
    #[must_use]
    pub fn with_reconnect(mut self, enabled: bool) -> Self {
        self.attempt_reconnect = enabled;
        self
    }

    /// Replace the reconnection policy.
    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Enable or disable the broadcast connection.
    #[must_use]
    pub fn with_broadcasts(mut self, enabled: bool) -> Self {
        self.enable_broadcasts = enabled;
        self
    }

    /// Add a non-broadcast pattern.
    #[must_use]
    pub fn with_non_broadcast_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.non_broadcast_patterns.push(pattern.into());
        self
    }

    /// Enable debug logging.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// `host:port`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The runtime-adjustable part of the configuration.
#[derive(Default)]
pub(crate) struct Settings {
    pub broadcast_handler: Option<BroadcastHandler>,
    pub disconnect_handler: Option<DisconnectHandler>,
    pub error_sender: Option<ErrorSender>,
    pub send_heartbeat_command: bool,
    pub heartbeat_interval: Duration,
    pub filter: Arc<BroadcastFilter>,
}

/// [`Settings`] shared between a client and its tasks. Readers take a cheap
/// snapshot; writers swap values under the lock.
#[derive(Clone)]
pub(crate) struct SharedSettings {
    inner: Arc<RwLock<Settings>>,
}

impl SharedSettings {
    pub(crate) fn from_config(config: &ClientConfig) -> Result<Self, RconError> {
        let filter = BroadcastFilter::compile(&config.non_broadcast_patterns)?;

        Ok(Self {
            inner: Arc::new(RwLock::new(Settings {
                send_heartbeat_command: config.send_heartbeat_command,
                heartbeat_interval: config.heartbeat_interval,
                filter: Arc::new(filter),
                ..Settings::default()
            })),
        })
    }

    /// The heartbeat interval if heartbeats are enabled. A zero interval
    /// means the default one.
    pub(crate) fn heartbeat(&self) -> Option<Duration> {
        let settings = self.inner.read();
        settings
            .send_heartbeat_command
            .then_some(settings.heartbeat_interval)
            .map(or_default_interval)
    }

    pub(crate) fn filter(&self) -> Arc<BroadcastFilter> {
        Arc::clone(&self.inner.read().filter)
    }

    pub(crate) fn broadcast_handler(&self) -> Option<BroadcastHandler> {
        self.inner.read().broadcast_handler.clone()
    }

    pub(crate) fn error_sender(&self) -> Option<ErrorSender> {
        self.inner.read().error_sender.clone()
    }

    /// Call the disconnect handler, if any, outside the lock.
    pub(crate) fn notify_disconnect(&self, err: Option<&RconError>, expected: bool) {
        let handler = self.inner.read().disconnect_handler.clone();
        if let Some(handler) = handler {
            handler(err, expected);
        }
    }

    pub(crate) fn set_broadcast_handler(&self, handler: BroadcastHandler) {
        self.inner.write().broadcast_handler = Some(handler);
    }

    pub(crate) fn set_disconnect_handler(&self, handler: DisconnectHandler) {
        self.inner.write().disconnect_handler = Some(handler);
    }

    pub(crate) fn set_error_sender(&self, sender: ErrorSender) {
        self.inner.write().error_sender = Some(sender);
    }

    pub(crate) fn set_send_heartbeat_command(&self, enabled: bool) {
        self.inner.write().send_heartbeat_command = enabled;
    }

    pub(crate) fn set_heartbeat_interval(&self, interval: Duration) {
        self.inner.write().heartbeat_interval = interval;
    }

    pub(crate) fn add_non_broadcast_pattern(&self, pattern: Regex) {
        let mut settings = self.inner.write();
        let mut filter = BroadcastFilter::clone(&settings.filter);
        filter.push(pattern);
        settings.filter = Arc::new(filter);
    }
}

pub(crate) fn or_default_interval(interval: Duration) -> Duration {
    if interval.is_zero() {
        DEFAULT_HEARTBEAT_INTERVAL
    } else {
        interval
    }
}

/// (De)serialize a [`Duration`] as whole milliseconds.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("localhost", 21114, "pw");

        assert!(!config.send_heartbeat_command);
        assert!(!config.attempt_reconnect);
        assert!(!config.enable_broadcasts);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.address(), "localhost:21114");
    }

    #[test]
    fn test_from_json() {
        let config = ClientConfig::from_json(
            r#"{
                "host": "game.example.com",
                "port": 27015,
                "password": "hunter2",
                "send_heartbeat_command": true,
                "heartbeat_interval": 5000,
                "non_broadcast_patterns": ["^Alive$"],
                "reconnect": { "max_attempts": 10 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.host, "game.example.com");
        assert_eq!(config.port, 27015);
        assert!(config.send_heartbeat_command);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.non_broadcast_patterns, vec!["^Alive$".to_string()]);
        assert_eq!(config.reconnect.max_attempts, 10);
        assert_eq!(
            config.reconnect.initial_backoff,
            ReconnectPolicy::default().initial_backoff
        );
        assert!(!config.attempt_reconnect);
    }

    #[test]
    fn test_debug_hides_password() {
        let config = ClientConfig::new("localhost", 1, "very-secret");
        assert!(!format!("{config:?}").contains("very-secret"));
    }

    #[test]
    fn test_invalid_pattern() {
        let config = ClientConfig::new("localhost", 1, "pw").with_non_broadcast_pattern("([");
        assert!(matches!(
            SharedSettings::from_config(&config),
            Err(RconError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_pattern_added_after_snapshot() {
        let config = ClientConfig::new("localhost", 1, "pw");
        let settings = SharedSettings::from_config(&config).unwrap();

        let before = settings.filter();
        settings.add_non_broadcast_pattern(Regex::new("^Alive$").unwrap());

        assert!(!before.is_suppressed("Alive"));
        assert!(settings.filter().is_suppressed("Alive"));
    }

    #[test]
    fn test_heartbeat_toggle() {
        let config = ClientConfig::new("localhost", 1, "pw");
        let settings = SharedSettings::from_config(&config).unwrap();
        assert_eq!(settings.heartbeat(), None);

        settings.set_send_heartbeat_command(true);
        settings.set_heartbeat_interval(Duration::from_secs(2));
        assert_eq!(settings.heartbeat(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_zero_heartbeat_interval_means_default() {
        let config = ClientConfig::from_json(
            r#"{ "send_heartbeat_command": true, "heartbeat_interval": 0 }"#,
        )
        .unwrap();
        let settings = SharedSettings::from_config(&config).unwrap();
        assert_eq!(settings.heartbeat(), Some(DEFAULT_HEARTBEAT_INTERVAL));

        settings.set_heartbeat_interval(Duration::ZERO);
        assert_eq!(settings.heartbeat(), Some(DEFAULT_HEARTBEAT_INTERVAL));
    }
}
