//! The service endpoint: one reusable, message-framed channel with room for
//! a single client at a time.
//!
//! On Windows this is a message-mode named pipe with one instance. On Unix it
//! is a listening socket where a request is everything the client writes
//! before half-closing its side.
//!
//! Drain differs between the two. The pipe blocks until the client has read
//! the whole reply. The socket only flushes and half-closes, which ends the
//! reply for the client but does not wait for it to be read.

use std::future::Future;
use std::io;

/// Result of reading one request chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Bytes placed at the front of the read buffer.
    pub len: usize,
    /// Whether those bytes are the whole message.
    pub complete: bool,
}

/// A reusable endpoint serving one client at a time.
///
/// `accept` must be cancel-safe: dropping the future before it resolves
/// leaves the endpoint ready for the next call.
pub trait Endpoint: Send {
    /// Wait until a client attaches.
    fn accept(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    /// Read one message chunk into `buf`.
    fn read_chunk(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<Chunk>> + Send;

    /// Write a complete reply.
    fn write_reply(&mut self, bytes: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Block until the client has received everything written so far.
    fn drain(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    /// Detach the current client so another one can attach.
    ///
    /// Fails with [`io::ErrorKind::NotConnected`] when nothing is attached.
    fn disconnect(&mut self) -> io::Result<()>;
}

/// A channel that delivers one message in one or more parts.
#[cfg(any(windows, test))]
pub trait MessageRead {
    /// Read the next part of the current message. `Ok(0)` means the peer is
    /// gone.
    fn read_part(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Whether the current message has been read to its end.
    fn message_done(&mut self) -> io::Result<bool>;
}

/// Collect one message into `buf`, part by part.
///
/// The chunk is incomplete when the message is still going once `buf` is
/// full. `len` is always the number of bytes actually read.
#[cfg(any(windows, test))]
pub async fn read_message<M>(source: &mut M, buf: &mut [u8]) -> io::Result<Chunk>
where
    M: MessageRead + ?Sized,
{
    let mut len = 0;
    while len < buf.len() {
        let n = source.read_part(&mut buf[len..]).await?;
        len += n;
        if n == 0 || source.message_done()? {
            return Ok(Chunk {
                len,
                complete: true,
            });
        }
    }

    Ok(Chunk {
        len,
        complete: source.message_done()?,
    })
}

#[cfg(unix)]
pub use unix::SocketEndpoint as PlatformEndpoint;
#[cfg(windows)]
pub use windows::PipeEndpoint as PlatformEndpoint;

#[cfg(unix)]
mod unix {
    use super::{Chunk, Endpoint};
    use std::io;
    use std::path::{Path, PathBuf};
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
    use tokio::net::{UnixListener, UnixStream};

    fn not_connected() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "no client attached")
    }

    /// Unix socket endpoint. Removes its socket file when dropped.
    pub struct SocketEndpoint {
        path: PathBuf,
        listener: UnixListener,
        stream: Option<UnixStream>,
    }

    impl SocketEndpoint {
        /// Bind the socket, replacing a stale socket file if present.
        pub fn bind(path: &Path) -> io::Result<Self> {
            if path.exists() {
                std::fs::remove_file(path)?;
            }

            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let listener = UnixListener::bind(path)?;

            // Allow all local users to reach the service
            {
                use std::os::unix::fs::PermissionsExt;
                let permissions = std::fs::Permissions::from_mode(0o666);
                std::fs::set_permissions(path, permissions)?;
            }

            Ok(Self {
                path: path.to_path_buf(),
                listener,
                stream: None,
            })
        }

        fn stream(&mut self) -> io::Result<&mut UnixStream> {
            self.stream.as_mut().ok_or_else(not_connected)
        }
    }

    impl Endpoint for SocketEndpoint {
        async fn accept(&mut self) -> io::Result<()> {
            let (stream, _addr) = self.listener.accept().await?;
            self.stream = Some(stream);
            Ok(())
        }

        async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<Chunk> {
            read_until_eof(self.stream()?, buf).await
        }

        async fn write_reply(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.stream()?.write_all(bytes).await
        }

        /// Flush and half-close so the client sees the end of the reply.
        ///
        /// Returns once the reply is handed to the kernel, not once the
        /// client has read it.
        async fn drain(&mut self) -> io::Result<()> {
            self.stream()?.shutdown().await
        }

        fn disconnect(&mut self) -> io::Result<()> {
            self.stream.take().map(drop).ok_or_else(not_connected)
        }
    }

    impl Drop for SocketEndpoint {
        fn drop(&mut self) {
            if self.path.exists() {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    /// Read a message terminated by end-of-stream.
    ///
    /// The chunk is incomplete when the peer sends more than fits in `buf`.
    pub async fn read_until_eof<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<Chunk>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut len = 0;
        while len < buf.len() {
            let n = reader.read(&mut buf[len..]).await?;
            if n == 0 {
                return Ok(Chunk {
                    len,
                    complete: true,
                });
            }
            len += n;
        }

        let mut probe = [0u8; 1];
        let extra = reader.read(&mut probe).await?;
        Ok(Chunk {
            len,
            complete: extra == 0,
        })
    }
}

#[cfg(windows)]
mod windows {
    use super::{Chunk, Endpoint, MessageRead, read_message};
    use std::io;
    use std::os::windows::io::AsRawHandle;
    use std::path::Path;
    use std::ptr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::windows::named_pipe::{NamedPipeServer, PipeMode, ServerOptions};
    use windows_sys::Win32::Foundation::{ERROR_MORE_DATA, ERROR_PIPE_NOT_CONNECTED};
    use windows_sys::Win32::Storage::FileSystem::FlushFileBuffers;
    use windows_sys::Win32::System::Pipes::PeekNamedPipe;

    /// Single-instance, message-mode named pipe.
    pub struct PipeEndpoint {
        pipe: NamedPipeServer,
        /// Byte taken off the pipe while checking for the end of a message
        carry: Option<u8>,
    }

    impl PipeEndpoint {
        /// Create the pipe. Fails if another server already owns the name.
        pub fn bind(name: &Path) -> io::Result<Self> {
            let pipe = ServerOptions::new()
                .first_pipe_instance(true)
                .pipe_mode(PipeMode::Message)
                .max_instances(1)
                .access_inbound(true)
                .access_outbound(true)
                .create(name)?;
            Ok(Self { pipe, carry: None })
        }

        /// Bytes still waiting in the pipe itself.
        fn bytes_available(&self) -> io::Result<u32> {
            let mut available = 0u32;
            // SAFETY: the handle belongs to `self.pipe`; a null buffer of size
            // zero only queries the counters.
            let ok = unsafe {
                PeekNamedPipe(
                    self.pipe.as_raw_handle(),
                    ptr::null_mut(),
                    0,
                    ptr::null_mut(),
                    &mut available,
                    ptr::null_mut(),
                )
            };
            if ok == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(available)
        }
    }

    impl MessageRead for PipeEndpoint {
        async fn read_part(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some(byte) = self.carry.take() {
                buf[0] = byte;
                return Ok(1);
            }
            loop {
                match self.pipe.read(buf).await {
                    // The message goes on; the next read picks it up
                    Err(e) if e.raw_os_error() == Some(ERROR_MORE_DATA as i32) => continue,
                    result => return result,
                }
            }
        }

        fn message_done(&mut self) -> io::Result<bool> {
            if self.carry.is_some() || self.bytes_available()? > 0 {
                return Ok(false);
            }

            // The runtime may already hold bytes it read ahead of us
            let mut probe = [0u8; 1];
            match self.pipe.try_read(&mut probe) {
                Ok(0) => Ok(true),
                Ok(_) => {
                    self.carry = Some(probe[0]);
                    Ok(false)
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(true),
                Err(e) => Err(e),
            }
        }
    }

    impl Endpoint for PipeEndpoint {
        async fn accept(&mut self) -> io::Result<()> {
            self.pipe.connect().await
        }

        async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<Chunk> {
            read_message(self, buf).await
        }

        async fn write_reply(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.pipe.write_all(bytes).await
        }

        async fn drain(&mut self) -> io::Result<()> {
            self.pipe.flush().await?;
            let handle = self.pipe.as_raw_handle();
            // Blocks until the client has read everything in the pipe
            let flushed = tokio::task::block_in_place(|| {
                // SAFETY: the handle belongs to `self.pipe`, which outlives this call.
                unsafe { FlushFileBuffers(handle) }
            });
            if flushed == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        fn disconnect(&mut self) -> io::Result<()> {
            self.carry = None;
            match self.pipe.disconnect() {
                Err(e) if e.raw_os_error() == Some(ERROR_PIPE_NOT_CONNECTED as i32) => {
                    Err(io::Error::new(io::ErrorKind::NotConnected, e))
                }
                result => result,
            }
        }
    }
}
