use anyhow::Result;
use tokio::net::{TcpListener, TcpStream};

use evostim_protocol::frame::{read_frame, write_frame};
use evostim_protocol::{Actuator, ChannelError, UnitRequest};

use crate::session::{Outcome, Session};

/// Accept controller connections one at a time (the protocol has a
/// single controller) and answer requests until Terminate.
pub async fn serve<A: Actuator>(listener: &TcpListener, session: &mut Session<A>) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::info!(%peer, "Controller connected");
        session.reset();
        if serve_connection(stream, session).await? {
            return Ok(());
        }
        tracing::info!(%peer, "Controller disconnected");
    }
}

/// Returns true when the session terminated and the daemon should exit.
async fn serve_connection<A: Actuator>(
    stream: TcpStream,
    session: &mut Session<A>,
) -> Result<bool> {
    let mut stream = tokio::io::BufStream::new(stream);
    loop {
        let request: UnitRequest = match read_frame(&mut stream).await {
            Ok(request) => request,
            Err(ChannelError::ConnectionClosed) => return Ok(false),
            Err(e) => {
                // Framing cannot be resynchronized after a malformed
                // request, so drop the connection and wait for the next.
                tracing::warn!(error = %e, "Dropping connection on malformed request");
                return Ok(false);
            }
        };
        tracing::debug!(command = request.name(), "Request received");
        match session.handle(request).await {
            Outcome::Continue(reply) => write_frame(&mut stream, &reply).await?,
            Outcome::Shutdown(reply) => {
                write_frame(&mut stream, &reply).await?;
                return Ok(true);
            }
        }
    }
}
