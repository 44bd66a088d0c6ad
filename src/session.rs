//! One accepted connection: read request lines, answer them.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{TcpStream, tcp::OwnedReadHalf},
    sync::broadcast,
};

use crate::{
    Signal,
    error::SessionError,
    incoming, internal, outgoing,
    protocol::{Request, Response},
    router::Router,
};

enum Received {
    Line(String),
    /// Peer closed the connection.
    Closed,
    /// The inactivity timeout elapsed.
    TimedOut,
}

/// A connection carries any number of sequential requests; it closes on
/// peer close, idle timeout, transport error, or server shutdown.
pub struct Session {
    peer: SocketAddr,
    router: Arc<Router>,
    /// Inactivity timeout between request lines. `None` disables it.
    timeout: Option<Duration>,
    shutdown: broadcast::Receiver<Signal>,
}

impl Session {
    #[must_use]
    pub const fn new(
        peer: SocketAddr,
        router: Arc<Router>,
        timeout: Option<Duration>,
        shutdown: broadcast::Receiver<Signal>,
    ) -> Self {
        Self {
            peer,
            router,
            timeout,
            shutdown,
        }
    }

    /// Drive the connection until it closes.
    ///
    /// Malformed request lines are answered with a `400` and the
    /// connection stays open; only transport failures end it early. A
    /// request being dispatched always completes; the shutdown signal is
    /// only observed between requests.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` on socket failure.
    pub async fn run(mut self, stream: TcpStream) -> Result<(), SessionError> {
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        loop {
            let received = tokio::select! {
                sig = self.shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Closed) => {
                            internal!(level = DEBUG, "Closing {} for shutdown", self.peer);
                            return Ok(());
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }

                received = Self::receive(&mut lines, self.timeout) => received?,
            };

            let line = match received {
                Received::Line(line) => line,
                Received::Closed => {
                    internal!(level = DEBUG, "Connection closed by client: {}", self.peer);
                    return Ok(());
                }
                Received::TimedOut => {
                    internal!(level = DEBUG, "Connection {} timed out", self.peer);
                    return Ok(());
                }
            };

            let response = match Request::parse(&line) {
                Ok(request) => {
                    incoming!("{} {request}", self.peer);
                    self.router.lookup(&request).await
                }
                Err(err) => {
                    incoming!(level = INFO, "{} sent a bad request: {err}", self.peer);
                    Response::from(err)
                }
            };

            outgoing!("{} {response}", self.peer);
            write.write_all(format!("{response}\n").as_bytes()).await?;
            write.flush().await?;
        }
    }

    async fn receive(
        lines: &mut Lines<BufReader<OwnedReadHalf>>,
        timeout: Option<Duration>,
    ) -> Result<Received, SessionError> {
        let line = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, lines.next_line()).await {
                Ok(result) => result?,
                Err(_) => return Ok(Received::TimedOut),
            },
            None => lines.next_line().await?,
        };

        Ok(line.map_or(Received::Closed, Received::Line))
    }
}
