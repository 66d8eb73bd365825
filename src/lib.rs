//! An async client for the [Source RCON](https://developer.valvesoftware.com/wiki/Source_RCON_Protocol)
//! protocol with a second, long-lived connection for server broadcasts.
//!
//! The main connection runs commands; the broadcast connection recieves the
//! frames game servers push on their own (chat, player joins, admin
//! messages). Both can send a periodic heartbeat command so the server does
//! not drop them as idle, and both can reconnect by themselves.
//! See [`rcon::Client`] to get started.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]

/// Emit a `tracing` debug event, but only when the client was configured
/// with `debug` turned on.
macro_rules! debug_log {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            ::tracing::debug!($($arg)+);
        }
    };
}

pub mod errors;
pub mod rcon;
pub mod socket;

pub use rcon::{Client, ClientConfig};
