//! RCON client with a dedicated broadcast connection.
//! See the documentation for [`Client`] for more information.

mod client;
mod config;
mod connection;
pub mod filter;
mod heartbeat;
mod listener;
#[cfg(test)]
mod mock;
pub mod packet;
mod reconnect;
mod session;

use std::time::Duration;

pub use client::Client;
pub use config::{BroadcastHandler, ClientConfig, DisconnectHandler};
pub use filter::BroadcastFilter;
pub use packet::{Frame, PacketType, Payload, Response};
pub use reconnect::ReconnectPolicy;

/// Largest body a client may send; keeps `length` within 4096.
const MAX_BODY_SERVERBOUND: usize = 4096 - packet::EMPTY_PACKET_LEN;
/// Largest body accepted from a server.
const MAX_BODY_CLIENTBOUND: usize = 1024 * 1024 - packet::EMPTY_PACKET_LEN;

/// Command sent by the heartbeat.
pub const HEARTBEAT_COMMAND: &str = "Alive";
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
