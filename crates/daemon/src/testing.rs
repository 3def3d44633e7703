//! Scripted in-memory endpoint for exercising the connection and listener
//! state machines without a real pipe or socket.

use crate::transport::{Chunk, Endpoint};
use btrfsd_protocol::wide::encode_utf16le;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Something the endpoint observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Accepted,
    Read,
    Wrote(Vec<u8>),
    Drained,
    Disconnected,
    /// Disconnect after a failed accept
    Released,
}

/// Shared view of the events an endpoint recorded.
#[derive(Clone, Default)]
pub struct Transcript {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Transcript {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    fn push(&self, event: Event) {
        self.events.lock().push(event);
    }
}

/// One client's behavior.
pub struct ScriptedClient {
    read: io::Result<Vec<u8>>,
    write_fault: Option<io::ErrorKind>,
    drain_fault: Option<io::ErrorKind>,
    on_read: Option<Box<dyn FnOnce() + Send>>,
}

impl ScriptedClient {
    /// A client sending `text` as one UTF-16 message.
    pub fn message(text: &str) -> Self {
        Self::raw(encode_utf16le(text))
    }

    pub fn raw(payload: Vec<u8>) -> Self {
        Self {
            read: Ok(payload),
            write_fault: None,
            drain_fault: None,
            on_read: None,
        }
    }

    pub fn read_fault(kind: io::ErrorKind) -> Self {
        Self {
            read: Err(kind.into()),
            ..Self::raw(Vec::new())
        }
    }

    pub fn with_write_fault(mut self, kind: io::ErrorKind) -> Self {
        self.write_fault = Some(kind);
        self
    }

    pub fn with_drain_fault(mut self, kind: io::ErrorKind) -> Self {
        self.drain_fault = Some(kind);
        self
    }

    /// Run `hook` when the service reads this client's message.
    pub fn on_read(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_read = Some(Box::new(hook));
        self
    }
}

/// Endpoint that hands out scripted clients in order, then waits forever.
pub struct ScriptedEndpoint {
    queue: VecDeque<ScriptedClient>,
    current: Option<ScriptedClient>,
    transcript: Transcript,
    idle: Option<oneshot::Sender<()>>,
    accept_faults: usize,
    /// A failed accept left the endpoint attached; accepts fail until released
    stale: bool,
}

impl ScriptedEndpoint {
    pub fn new(clients: impl IntoIterator<Item = ScriptedClient>) -> (Self, Transcript) {
        let transcript = Transcript::default();
        let endpoint = Self {
            queue: clients.into_iter().collect(),
            current: None,
            transcript: transcript.clone(),
            idle: None,
            accept_faults: 0,
            stale: false,
        };
        (endpoint, transcript)
    }

    /// Signal fired the first time `accept` finds no client left.
    pub fn idle_signal(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.idle = Some(tx);
        rx
    }

    /// Make the next `count` accepts fail.
    pub fn fail_accepts(&mut self, count: usize) {
        self.accept_faults = count;
    }

    fn current(&mut self) -> io::Result<&mut ScriptedClient> {
        self.current
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

impl Endpoint for ScriptedEndpoint {
    async fn accept(&mut self) -> io::Result<()> {
        assert!(self.current.is_none(), "accept while a client is attached");

        if self.stale {
            return Err(io::ErrorKind::BrokenPipe.into());
        }

        if self.accept_faults > 0 {
            self.accept_faults -= 1;
            self.stale = true;
            return Err(io::ErrorKind::ConnectionAborted.into());
        }

        if let Some(client) = self.queue.pop_front() {
            self.current = Some(client);
            self.transcript.push(Event::Accepted);
            return Ok(());
        }

        if let Some(idle) = self.idle.take() {
            let _ = idle.send(());
        }
        std::future::pending().await
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<Chunk> {
        let client = self.current()?;
        let payload = std::mem::replace(&mut client.read, Ok(Vec::new()))?;
        if let Some(hook) = client.on_read.take() {
            hook();
        }

        let len = payload.len().min(buf.len());
        buf[..len].copy_from_slice(&payload[..len]);
        self.transcript.push(Event::Read);
        Ok(Chunk {
            len,
            complete: payload.len() <= buf.len(),
        })
    }

    async fn write_reply(&mut self, bytes: &[u8]) -> io::Result<()> {
        if let Some(kind) = self.current()?.write_fault {
            return Err(kind.into());
        }
        self.transcript.push(Event::Wrote(bytes.to_vec()));
        Ok(())
    }

    async fn drain(&mut self) -> io::Result<()> {
        if let Some(kind) = self.current()?.drain_fault {
            return Err(kind.into());
        }
        self.transcript.push(Event::Drained);
        Ok(())
    }

    fn disconnect(&mut self) -> io::Result<()> {
        if std::mem::take(&mut self.stale) {
            self.transcript.push(Event::Released);
            return Ok(());
        }
        self.current
            .take()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        self.transcript.push(Event::Disconnected);
        Ok(())
    }
}

/// Wraps a real endpoint and records what it does into a [`Transcript`].
pub struct RecordingEndpoint<E> {
    inner: E,
    transcript: Transcript,
}

impl<E: Endpoint> RecordingEndpoint<E> {
    pub fn new(inner: E) -> (Self, Transcript) {
        let transcript = Transcript::default();
        let endpoint = Self {
            inner,
            transcript: transcript.clone(),
        };
        (endpoint, transcript)
    }
}

impl<E: Endpoint> Endpoint for RecordingEndpoint<E> {
    async fn accept(&mut self) -> io::Result<()> {
        self.inner.accept().await?;
        self.transcript.push(Event::Accepted);
        Ok(())
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<Chunk> {
        let chunk = self.inner.read_chunk(buf).await?;
        self.transcript.push(Event::Read);
        Ok(chunk)
    }

    async fn write_reply(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_reply(bytes).await?;
        self.transcript.push(Event::Wrote(bytes.to_vec()));
        Ok(())
    }

    async fn drain(&mut self) -> io::Result<()> {
        self.inner.drain().await?;
        self.transcript.push(Event::Drained);
        Ok(())
    }

    fn disconnect(&mut self) -> io::Result<()> {
        self.inner.disconnect()?;
        self.transcript.push(Event::Disconnected);
        Ok(())
    }
}
