//! 4-byte big-endian length-prefixed framing over any `AsyncRead`/`AsyncWrite`
//! stream, with messages decoded through the `Schema` boundary.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::protocol::error::ProtocolError;
use crate::protocol::message::{Message, MAX_PACKET_SIZE};
use crate::protocol::schema::{Deserialize, Json, Schema, Serialize};

/// A framed duplex over one connection. Read and write halves are driven
/// independently by the owning server/client connection task; this wraps a
/// single `Framed` stream rather than splitting it, since each side already
/// funnels through its own task in this crate's concurrency model.
pub struct MessageFramed<IO> {
    inner: Framed<IO, LengthDelimitedCodec>,
}

impl<IO> MessageFramed<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: IO) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_PACKET_SIZE)
            .length_field_length(4)
            .big_endian()
            .new_codec();
        Self {
            inner: Framed::new(io, codec),
        }
    }

    /// Reads one frame and decodes it as a `Message`. `Ok(None)` means the
    /// peer closed the connection cleanly between frames.
    pub async fn read_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        match self.inner.next().await {
            None => Ok(None),
            Some(Err(err)) => Err(frame_error(err)),
            Some(Ok(frame)) => {
                let message = <Message as Deserialize<Json>>::deserialize(&frame)?;
                Ok(Some(message))
            }
        }
    }

    pub async fn write_message(&mut self, message: &Message) -> Result<(), ProtocolError> {
        let bytes = <Message as Serialize<Json>>::serialize(message);
        if bytes.len() > MAX_PACKET_SIZE {
            return Err(ProtocolError::OversizePacket {
                declared: bytes.len(),
                max: MAX_PACKET_SIZE,
            });
        }
        self.inner
            .send(bytes.into())
            .await
            .map_err(frame_error)
    }
}

fn frame_error(err: std::io::Error) -> ProtocolError {
    if err.kind() == std::io::ErrorKind::InvalidData {
        // tokio_util reports an over-length frame this way.
        return ProtocolError::OversizePacket {
            declared: 0,
            max: MAX_PACKET_SIZE,
        };
    }
    ProtocolError::Io(err)
}

const _: fn() = || {
    fn assert_schema<S: Schema>() {}
    assert_schema::<Json>();
};

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trips_a_message_over_a_duplex_stream() {
        let (client_io, server_io) = duplex(4096);
        let mut client = MessageFramed::new(client_io);
        let mut server = MessageFramed::new(server_io);

        let msg = Message::Chat {
            plid: 1,
            txt: "gg".to_string(),
        };
        client.write_message(&msg).await.unwrap();
        let received = server.read_message().await.unwrap().unwrap();
        assert_eq!(received, msg);
    }

    #[tokio::test]
    async fn peer_close_reads_as_none() {
        let (client_io, server_io) = duplex(4096);
        let mut server = MessageFramed::new(server_io);
        drop(client_io);
        assert!(server.read_message().await.unwrap().is_none());
    }
}
