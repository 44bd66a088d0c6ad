//! The lookup socket: accept loop, session tasks, cache janitor.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures_util::future::join_all;
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{debug, error};

use crate::{Signal, internal, router::Router, session::Session};

pub struct Server {
    listener: TcpListener,
    router: Arc<Router>,
    client_timeout: Option<Duration>,
    gc_interval: Duration,
}

impl Server {
    /// Bind the lookup socket.
    ///
    /// Binding is separate from serving so callers learn the actual
    /// address before the accept loop starts (the tests bind port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub async fn bind(
        listen: SocketAddr,
        router: Arc<Router>,
        client_timeout: Option<Duration>,
        gc_interval: Duration,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(listen).await?;

        Ok(Self {
            listener,
            router,
            client_timeout,
            gc_interval,
        })
    }

    /// The address the socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be determined.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until a shutdown signal arrives, then drain
    /// in-flight sessions.
    ///
    /// # Errors
    ///
    /// Returns an error only on listener failure; per-connection errors
    /// are logged and confined to their session.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> anyhow::Result<()> {
        internal!(
            level = INFO,
            "Lookup server listening on {}",
            self.local_addr()?
        );

        let mut sessions = Vec::new();
        let mut janitor = tokio::time::interval(self.gc_interval.max(Duration::from_secs(1)));
        // The first tick completes immediately; skip it.
        janitor.tick().await;

        loop {
            // Sessions watch the same broadcast so shutdown never waits
            // out an idle connection's timeout.
            let session_shutdown = shutdown.resubscribe();

            tokio::select! {
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Closed) => {
                            internal!(level = INFO, "Received shutdown signal, finishing sessions ...");
                            join_all(sessions).await;
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                    }
                }

                connection = self.listener.accept() => {
                    match connection {
                        Ok((stream, peer)) => {
                            debug!("Connection received from {peer}");
                            let session = Session::new(
                                peer,
                                Arc::clone(&self.router),
                                self.client_timeout,
                                session_shutdown,
                            );
                            sessions.push(tokio::spawn(async move {
                                if let Err(err) = session.run(stream).await {
                                    internal!(level = ERROR, "Connection {peer} failed: {err}");
                                }
                            }));
                        }
                        Err(err) => error!("Error accepting connection: {err}"),
                    }
                }

                _ = janitor.tick() => {
                    sessions.retain(|handle| !handle.is_finished());
                    let removed = self.router.resolver().purge_expired();
                    if removed > 0 {
                        internal!(
                            level = DEBUG,
                            "Cache sweep removed {removed} expired entries, {} remain",
                            self.router.resolver().cached()
                        );
                    }
                    debug!(
                        "Cache entries: {}, active connections: {}",
                        self.router.resolver().cached(),
                        sessions.len()
                    );
                }
            }
        }

        Ok(())
    }
}
