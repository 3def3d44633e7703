//! Client side of the control channel, used by the CLI subcommands.

use btrfsd_protocol::{Reply, Request};
use color_eyre::eyre::{Result, bail};
use std::path::Path;

/// Send one request and wait for its reply.
pub async fn send_request(endpoint: &Path, request: &Request) -> Result<Reply> {
    let bytes = exchange(endpoint, &request.encode()).await?;
    if bytes.is_empty() {
        bail!("The service closed the connection without replying");
    }
    Ok(Reply::decode(&bytes)?)
}

#[cfg(unix)]
async fn exchange(endpoint: &Path, request: &[u8]) -> Result<Vec<u8>> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    let mut stream = UnixStream::connect(endpoint).await?;
    stream.write_all(request).await?;
    // End of our half marks the end of the request message
    stream.shutdown().await?;

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await?;
    Ok(reply)
}

#[cfg(windows)]
async fn exchange(endpoint: &Path, request: &[u8]) -> Result<Vec<u8>> {
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::windows::named_pipe::{ClientOptions, PipeMode};
    use windows_sys::Win32::Foundation::ERROR_PIPE_BUSY;

    /// Largest reply read in one message.
    const REPLY_BUFFER: usize = 1024 * 1024;
    const BUSY_RETRY: Duration = Duration::from_millis(50);
    const BUSY_ATTEMPTS: usize = 100;

    let mut attempts = 0;
    let mut pipe = loop {
        match ClientOptions::new().pipe_mode(PipeMode::Message).open(endpoint) {
            Ok(pipe) => break pipe,
            // Another client is being served
            Err(e)
                if e.raw_os_error() == Some(ERROR_PIPE_BUSY as i32) && attempts < BUSY_ATTEMPTS =>
            {
                attempts += 1;
                tokio::time::sleep(BUSY_RETRY).await;
            }
            Err(e) => return Err(e.into()),
        }
    };

    pipe.write_all(request).await?;

    let mut reply = vec![0u8; REPLY_BUFFER];
    let len = pipe.read(&mut reply).await?;
    reply.truncate(len);
    Ok(reply)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::server::Server;
    use crate::state::{VolumeRegistry, VolumeTable};
    use crate::testing::{Event, RecordingEndpoint};
    use crate::transport::PlatformEndpoint;
    use btrfsd_protocol::{MountData, VolumeEntry, list_reply, parse_list_reply};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::broadcast;

    /// Table whose List handling is slow and counts overlapping calls.
    struct SlowTable {
        table: VolumeTable,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl VolumeRegistry for SlowTable {
        fn mount(&self, request: &[String]) -> String {
            self.table.mount(request)
        }

        fn snapshot(&self) -> Vec<VolumeEntry> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.table.snapshot()
        }
    }

    #[tokio::test]
    async fn test_connect_to_missing_endpoint_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = send_request(&dir.path().join("absent.sock"), &Request::new("List")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_round_trip_over_unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("btrfsd.sock");

        let table = Arc::new(VolumeTable::with_entries([VolumeEntry::new(
            "abc-1",
            MountData {
                mount_point: "/mnt/data".to_owned(),
                devices: vec!["/dev/sda1".to_owned(), "/dev/sdb1".to_owned()],
                ..MountData::default()
            },
        )]));
        let endpoint = PlatformEndpoint::bind(&path).unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let server = Server::new(
            endpoint,
            Dispatcher::new(table.clone()),
            shutdown_rx,
            Duration::from_millis(10),
        );
        let task = tokio::spawn(server.run());

        let reply = send_request(&path, &Request::new("List")).await.unwrap();
        let entries = parse_list_reply(&reply).unwrap();
        assert_eq!(entries, table.snapshot());

        // The endpoint is reusable for the next client
        let reply = send_request(&path, &Request::new("Eject")).await.unwrap();
        assert_eq!(reply.to_text(), "Error\nBad message type.");

        // Oversized requests are dropped without any reply
        let oversized = Request::new("List").with_arg("x".repeat(60 * 1024));
        assert!(send_request(&path, &oversized).await.is_err());

        // ...and the service keeps answering afterwards
        let reply = send_request(&path, &Request::new("List")).await.unwrap();
        assert_eq!(parse_list_reply(&reply).unwrap().len(), 1);

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(!path.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_clients_are_served_in_turn() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("btrfsd.sock");

        let entries = vec![VolumeEntry::new(
            "abc-1",
            MountData {
                mount_point: "/mnt/data".to_owned(),
                devices: vec!["/dev/sda1".to_owned()],
                ..MountData::default()
            },
        )];
        let registry = Arc::new(SlowTable {
            table: VolumeTable::with_entries(entries.clone()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let (endpoint, transcript) = RecordingEndpoint::new(PlatformEndpoint::bind(&path).unwrap());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let server = Server::new(
            endpoint,
            Dispatcher::new(registry.clone()),
            shutdown_rx,
            Duration::from_millis(10),
        );
        let task = tokio::spawn(server.run());

        let first = tokio::spawn({
            let path = path.clone();
            async move { send_request(&path, &Request::new("List")).await }
        });
        let second = tokio::spawn({
            let path = path.clone();
            async move { send_request(&path, &Request::new("List")).await }
        });

        let expected = list_reply(&entries);
        for client in [first, second] {
            let reply = tokio::time::timeout(Duration::from_secs(5), client)
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            assert_eq!(reply, expected);
        }

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(registry.peak.load(Ordering::SeqCst), 1);
        let cycle = [
            Event::Accepted,
            Event::Read,
            Event::Wrote(expected.encode()),
            Event::Drained,
            Event::Disconnected,
        ];
        // The second exchange starts only after the first client is detached
        let serial: Vec<Event> = cycle.iter().chain(cycle.iter()).cloned().collect();
        assert_eq!(transcript.events(), serial);
    }
}
