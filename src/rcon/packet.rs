//! The RCON packet format.

use super::{filter::BroadcastFilter, MAX_BODY_CLIENTBOUND, MAX_BODY_SERVERBOUND};
use crate::errors::RconProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::mem::size_of;

/// Size of the request ID and type fields plus the two terminating null bytes.
pub(crate) const EMPTY_PACKET_LEN: usize = size_of::<i32>() * 2 + 2;

/// The kinds of packet a client sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// `SERVERDATA_AUTH`, carries the password.
    Auth,
    /// `SERVERDATA_EXECCOMMAND`, carries a console command.
    ExecCommand,
}

impl From<PacketType> for i32 {
    fn from(packet_type: PacketType) -> Self {
        match packet_type {
            PacketType::ExecCommand => 2,
            PacketType::Auth => 3,
        }
    }
}

/// `SERVERDATA_RESPONSE_VALUE`. Some servers send an empty one of these
/// ahead of the auth reply.
pub(crate) const RESPONSE_VALUE: i32 = 0;

/// An outbound logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// What kind of request this is.
    pub packet_type: PacketType,
    /// Raw body bytes, sent without escaping.
    pub body: Bytes,
}

impl Payload {
    /// Build a payload, rejecting bodies that cannot fit in one packet.
    ///
    /// # Errors
    /// Returns [`RconProtocolError::PayloadTooLong`] if `body` is longer than
    /// 4086 bytes.
    pub fn new(packet_type: PacketType, body: impl Into<Bytes>) -> Result<Self, RconProtocolError> {
        let body = body.into();

        if body.len() > MAX_BODY_SERVERBOUND {
            return Err(RconProtocolError::PayloadTooLong {
                len: body.len(),
                max: MAX_BODY_SERVERBOUND,
            });
        }

        Ok(Self { packet_type, body })
    }
}

/// Encode `payload` into a complete wire packet.
///
/// Layout (all integers little-endian):
/// `i32 length | i32 request id | i32 type | body | 0x00 | 0x00`
///
/// # Errors
/// Returns [`RconProtocolError::PayloadTooLong`] if the body does not fit.
pub fn encode(request_id: i32, payload: &Payload) -> Result<Bytes, RconProtocolError> {
    if payload.body.len() > MAX_BODY_SERVERBOUND {
        return Err(RconProtocolError::PayloadTooLong {
            len: payload.body.len(),
            max: MAX_BODY_SERVERBOUND,
        });
    }

    let len = get_remaining_length(payload.body.len());
    let mut bytes = BytesMut::with_capacity(size_of::<i32>() + len as usize);

    bytes.put_i32_le(len);
    bytes.put_i32_le(request_id);
    bytes.put_i32_le(payload.packet_type.into());
    bytes.put(payload.body.as_ref());
    bytes.put_u16(0x00_00);

    Ok(bytes.freeze())
}

/// One packet as recieved from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Request ID echoed by the server, `-1` on an authentication failure.
    pub request_id: i32,
    /// Raw packet type. Servers push broadcasts with types a client never
    /// sends, so this is not narrowed to [`PacketType`].
    pub packet_type: i32,
    /// Body with the two terminating null bytes removed.
    pub body: Bytes,
}

impl Frame {
    /// Parse everything that follows the length prefix.
    ///
    /// # Errors
    /// Returns an error if the packet is shorter than an empty packet or is
    /// not terminated by two null bytes.
    pub fn decode(mut bytes: Bytes) -> Result<Self, RconProtocolError> {
        if bytes.len() < EMPTY_PACKET_LEN {
            return Err(RconProtocolError::InvalidLength(bytes.len() as i32));
        }

        let request_id = bytes.get_i32_le();
        let packet_type = bytes.get_i32_le();

        let body_len = bytes.len() - 2;
        if bytes[body_len..] != [0, 0] {
            return Err(RconProtocolError::MissingTerminator);
        }
        let body = bytes.split_to(body_len);

        Ok(Self {
            request_id,
            packet_type,
            body,
        })
    }
}

/// Check a length prefix read off the wire and turn it into a byte count.
pub(crate) fn checked_length(len: i32) -> Result<usize, RconProtocolError> {
    match usize::try_from(len) {
        Ok(n) if (EMPTY_PACKET_LEN..=EMPTY_PACKET_LEN + MAX_BODY_CLIENTBOUND).contains(&n) => Ok(n),
        _ => Err(RconProtocolError::InvalidLength(len)),
    }
}

/// A decoded frame that carries something worth looking at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Request ID echoed by the server.
    pub request_id: i32,
    /// Raw packet type.
    pub packet_type: i32,
    /// Body bytes.
    pub body: Bytes,
}

impl Response {
    /// Frames with an empty body (keep-alive acks, auth preambles) carry no
    /// actionable payload and yield `None`.
    #[must_use]
    pub fn from_frame(frame: Frame) -> Option<Self> {
        if frame.body.is_empty() {
            return None;
        }

        Some(Self {
            request_id: frame.request_id,
            packet_type: frame.packet_type,
            body: frame.body,
        })
    }

    /// Body as text. Invalid UTF-8 is replaced rather than rejected, since
    /// game servers are not consistent about encodings.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body as text with surrounding whitespace and stray null bytes removed.
    #[must_use]
    pub fn trimmed_text(&self) -> String {
        trim_body(&self.text()).to_string()
    }

    /// Whether this frame should reach the broadcast handler.
    #[must_use]
    pub fn is_broadcast(&self, filter: &BroadcastFilter) -> bool {
        !filter.is_suppressed(&self.text())
    }
}

pub(crate) fn trim_body(body: &str) -> &str {
    body.trim_matches(|c: char| c.is_whitespace() || c == '\0')
}

/// Get the *remaining length* of the packet given the length of its body.
///
/// Remaining length here refers to the length of the packet in bytes excluding
/// the first four bytes which communicate this value. So it refers to the
/// length of the packet *after* the length field.
///
/// As the remainder of the packet is composed of two [i32]s (request ID and type),
/// the body, and **TWO** 0 bytes, it is the size of two [i32]s + the length of the body + 2.
fn get_remaining_length(body_len: usize) -> i32 {
    (body_len + EMPTY_PACKET_LEN) as i32
}
