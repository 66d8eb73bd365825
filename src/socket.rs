//! Reading and writing whole RCON packets on any async byte stream.

use crate::{
    errors::RconError,
    rcon::packet::{checked_length, encode, Frame, Payload, Response},
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Trait to allow for reading RCON packets from a socket.
///
/// End of stream before a whole packet arrived is reported as
/// [`RconError::ConnectionClosed`], any other I/O failure as
/// [`RconError::Connection`].
#[async_trait]
pub trait ReadFrame: Send {
    /// Read one complete packet.
    async fn read_frame(&mut self) -> Result<Frame, RconError>;

    /// Read one packet and drop it if it carries nothing (empty body).
    async fn read_response(&mut self) -> Result<Option<Response>, RconError> {
        let frame = self.read_frame().await?;
        Ok(Response::from_frame(frame))
    }
}

/// Trait to allow for writing RCON packets to a socket.
#[async_trait]
pub trait WriteFrame: Send {
    /// Encode `payload` with `request_id` and write the whole packet.
    async fn write_frame(&mut self, request_id: i32, payload: &Payload) -> Result<(), RconError>;
}

#[async_trait]
impl<T> ReadFrame for T
where
    T: AsyncRead + Unpin + Send,
{
    async fn read_frame(&mut self) -> Result<Frame, RconError> {
        let len = checked_length(self.read_i32_le().await?)?;

        let mut bytes = BytesMut::zeroed(len);
        self.read_exact(&mut bytes).await?;

        Ok(Frame::decode(bytes.freeze())?)
    }
}

#[async_trait]
impl<T> WriteFrame for T
where
    T: AsyncWrite + Unpin + Send,
{
    async fn write_frame(&mut self, request_id: i32, payload: &Payload) -> Result<(), RconError> {
        let bytes: Bytes = encode(request_id, payload)?;

        self.write_all(&bytes).await?;
        self.flush().await?;

        Ok(())
    }
}
