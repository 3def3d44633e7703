//! Drives one accepted connection: read, decode, dispatch, reply, drain.

use crate::dispatch::Dispatcher;
use crate::transport::Endpoint;
use btrfsd_protocol::{MAX_MESSAGE_SIZE, Reply, Request};
use std::fmt;
use std::io;
use thiserror::Error;

/// Stage of the exchange in which a transport fault happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Read,
    Write,
    Drain,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Drain => "drain",
        })
    }
}

/// Reasons a connection is abandoned.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The endpoint failed mid-exchange. Nothing is retried.
    #[error("transport fault at {phase} time: {source}")]
    Transport {
        phase: Phase,
        #[source]
        source: io::Error,
    },
}

impl ConnectionError {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Transport { phase, .. } => *phase,
        }
    }
}

fn fault(phase: Phase) -> impl FnOnce(io::Error) -> ConnectionError {
    move |source| ConnectionError::Transport { phase, source }
}

/// How a connection ended when no fault occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A reply was written and drained.
    Replied,
    /// The request exceeded [`MAX_MESSAGE_SIZE`] and was dropped unanswered.
    Discarded,
}

/// Handles one request/reply exchange per call.
pub struct ConnectionHandler {
    dispatcher: Dispatcher,
    buffer: Vec<u8>,
}

impl ConnectionHandler {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            buffer: vec![0u8; MAX_MESSAGE_SIZE],
        }
    }

    /// Serve the client currently attached to `endpoint`.
    ///
    /// The caller disconnects the client afterwards, whatever the result.
    pub async fn handle<E: Endpoint>(
        &mut self,
        endpoint: &mut E,
    ) -> Result<Outcome, ConnectionError> {
        let chunk = endpoint
            .read_chunk(&mut self.buffer)
            .await
            .map_err(fault(Phase::Read))?;

        if !chunk.complete {
            tracing::warn!(
                limit = MAX_MESSAGE_SIZE,
                "A message larger than 100K arrived; discarding"
            );
            return Ok(Outcome::Discarded);
        }

        let reply = self.reply_for(&self.buffer[..chunk.len]);
        let bytes = reply.encode();

        endpoint
            .write_reply(&bytes)
            .await
            .map_err(fault(Phase::Write))?;
        // Disconnecting before the client has read the reply can truncate it
        endpoint.drain().await.map_err(fault(Phase::Drain))?;

        Ok(Outcome::Replied)
    }

    fn reply_for(&self, payload: &[u8]) -> Reply {
        match Request::decode(payload) {
            Ok(request) => {
                tracing::debug!(
                    command = %request.command(),
                    args = request.args().len(),
                    bytes = payload.len(),
                    "Got a request"
                );
                self.dispatcher.dispatch(&request)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable request");
                Reply::bad_message_type()
            }
        }
    }
}
