//! Accept loop for the service endpoint.
//!
//! One client is served at a time: the loop waits for a client or the
//! shutdown signal, runs the exchange to completion, disconnects the client
//! and waits again. Shutdown is only observed while waiting, so a request in
//! progress always finishes.

use crate::connection::{ConnectionHandler, Outcome};
use crate::dispatch::Dispatcher;
use crate::transport::Endpoint;
use std::io;
use std::time::Duration;
use tokio::sync::broadcast;

/// Listener owning the service endpoint
pub struct Server<E> {
    /// The endpoint clients attach to
    endpoint: E,
    /// Per-connection request handler
    handler: ConnectionHandler,
    /// Shutdown signal receiver
    shutdown_rx: broadcast::Receiver<()>,
    /// Pause after a failed accept
    accept_backoff: Duration,
}

impl<E: Endpoint> Server<E> {
    /// Create a new server
    pub fn new(
        endpoint: E,
        dispatcher: Dispatcher,
        shutdown_rx: broadcast::Receiver<()>,
        accept_backoff: Duration,
    ) -> Self {
        Self {
            endpoint,
            handler: ConnectionHandler::new(dispatcher),
            shutdown_rx,
            accept_backoff,
        }
    }

    /// Run until the shutdown signal fires or its sender is dropped.
    pub async fn run(mut self) {
        tracing::info!("Listener waiting for connections");

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    tracing::info!("Listener shutting down");
                    break;
                }
                result = self.endpoint.accept() => result,
            };

            if let Err(e) = accepted {
                tracing::warn!(error = %e, "Accept error");
                // A client that left mid-accept can keep the endpoint attached
                match self.endpoint.disconnect() {
                    Ok(()) => tracing::debug!("Released endpoint after failed accept"),
                    Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
                    Err(e) => tracing::warn!(error = %e, "Disconnect failed"),
                }
                tokio::select! {
                    biased;
                    _ = self.shutdown_rx.recv() => {
                        tracing::info!("Listener shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(self.accept_backoff) => continue,
                }
            }

            tracing::debug!("Got a connection");
            match self.handler.handle(&mut self.endpoint).await {
                Ok(Outcome::Replied) => tracing::debug!("Reply delivered"),
                Ok(Outcome::Discarded) => {}
                Err(e) => {
                    tracing::warn!(phase = %e.phase(), error = %e, "Connection abandoned");
                }
            }

            if let Err(e) = self.endpoint.disconnect() {
                tracing::warn!(error = %e, "Disconnect failed");
            }
        }
    }
}
