//! Controller-side channel to one unit daemon.

use std::time::Duration;

use thiserror::Error;
use tokio::io::BufStream;
use tokio::net::TcpStream;

use crate::frame::{read_frame, write_frame};
use crate::types::{UnitId, UnitReply, UnitRequest};

/// Failures on a unit channel.
///
/// A missing reply within the command timeout is fatal to the current
/// trial: a stimulus run cannot be safely repeated on the same subject
/// group, so the channel never retries on its own.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("unit closed the connection")]
    ConnectionClosed,
    #[error("no reply to {command} within {timeout:?}")]
    Timeout { command: &'static str, timeout: Duration },
    #[error("frame of {0} bytes exceeds the protocol limit")]
    FrameTooLarge(usize),
    #[error("i/o error on unit channel")]
    Io(#[from] std::io::Error),
    #[error("malformed frame")]
    Codec(#[from] serde_json::Error),
}

/// One reliable point-to-point request/reply channel to a unit.
///
/// Owns the stream, so at most one request can be in flight: the
/// protocol has no pipelining by construction.
pub struct UnitChannel {
    unit_id: UnitId,
    stream: BufStream<TcpStream>,
}

impl UnitChannel {
    pub async fn connect(unit_id: UnitId, addr: &str) -> Result<Self, ChannelError> {
        tracing::info!(unit_id, addr, "Connecting to unit");
        let stream = TcpStream::connect(addr).await?;
        Ok(Self { unit_id, stream: BufStream::new(stream) })
    }

    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    /// Send one request and wait for its reply, bounded by `timeout`.
    pub async fn request(
        &mut self,
        request: &UnitRequest,
        timeout: Duration,
    ) -> Result<UnitReply, ChannelError> {
        let command = request.name();
        self.send(request).await?;
        self.receive(command, timeout).await
    }

    /// Fire a request without waiting for its reply. Used by the
    /// fan-out phase of a trial: every unit in an arena gets its run
    /// command before any reply is collected, so playback starts in
    /// lockstep across the arena.
    pub async fn send(&mut self, request: &UnitRequest) -> Result<(), ChannelError> {
        tracing::debug!(unit_id = self.unit_id, command = request.name(), "Sending request");
        write_frame(&mut self.stream, request).await
    }

    /// Collect the reply to a previously sent request, bounded by
    /// `timeout`. `command` labels the timeout error.
    pub async fn receive(
        &mut self,
        command: &'static str,
        timeout: Duration,
    ) -> Result<UnitReply, ChannelError> {
        match tokio::time::timeout(timeout, read_frame::<_, UnitReply>(&mut self.stream)).await {
            Ok(reply) => reply,
            Err(_) => Err(ChannelError::Timeout { command, timeout }),
        }
    }
}

/// Per-command reply deadlines.
///
/// Short control commands get a fixed allowance; commands that replay
/// the timeline or run airflow get their wall-clock duration plus a
/// margin, since the unit only replies once playback finishes.
#[derive(Debug, Clone, Copy)]
pub struct CommandTimeouts {
    /// Allowance for Initialise/ReadStatus/Standby/Terminate.
    pub control: Duration,
    /// Slack added on top of a command's known running time.
    pub margin: Duration,
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self { control: Duration::from_secs(10), margin: Duration::from_secs(15) }
    }
}

impl CommandTimeouts {
    /// Deadline for `request`, given the wall-clock length of a full
    /// timeline replay (including blip pulses).
    pub fn for_request(&self, request: &UnitRequest, timeline_duration: Duration) -> Duration {
        match request {
            UnitRequest::RunActive { .. } | UnitRequest::RunPassive => {
                timeline_duration + self.margin
            }
            UnitRequest::SpreadSubjects { duration } => {
                Duration::from_secs_f64(duration.max(0.0)) + self.margin
            }
            _ => self.control,
        }
    }
}
