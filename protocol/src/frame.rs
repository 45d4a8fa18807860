//! Length-delimited JSON framing.
//!
//! Every message on a unit channel is a u32 big-endian byte length
//! followed by a JSON body. The prefix keeps field ordering and
//! message boundaries explicit on a plain byte stream.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::channel::ChannelError;

/// Upper bound on a single frame. A timeline with a few hundred
/// segments is well under this; anything larger is a corrupt stream.
const MAX_FRAME_LEN: u32 = 1 << 20;

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), ChannelError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    let len = u32::try_from(body.len()).map_err(|_| ChannelError::FrameTooLarge(body.len()))?;
    if len > MAX_FRAME_LEN {
        return Err(ChannelError::FrameTooLarge(body.len()));
    }
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. A clean EOF before the length prefix maps to
/// `ConnectionClosed`, which is how a terminated unit shows up on the
/// controller side.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, ChannelError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ChannelError::ConnectionClosed);
        }
        Err(e) => return Err(ChannelError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(ChannelError::FrameTooLarge(len as usize));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{UnitReply, UnitRequest};

    #[tokio::test]
    async fn frames_survive_the_stream() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        write_frame(&mut client, &UnitRequest::ReadStatus).await.unwrap();
        let req: UnitRequest = read_frame(&mut server).await.unwrap();
        assert!(matches!(req, UnitRequest::ReadStatus));

        write_frame(&mut server, &UnitReply::Reading { temperature: 27.5 }).await.unwrap();
        let reply: UnitReply = read_frame(&mut client).await.unwrap();
        match reply {
            UnitReply::Reading { temperature } => assert_eq!(temperature, 27.5),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn eof_is_connection_closed() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let err = read_frame::<_, UnitRequest>(&mut server).await.unwrap_err();
        assert!(matches!(err, ChannelError::ConnectionClosed));
    }
}
