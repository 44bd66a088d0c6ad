//! In-process test harness: a running lookup server on a random port,
//! backed by a scripted MX zone table instead of real DNS.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::broadcast,
    task::JoinHandle,
};

use mxroute::{
    Signal,
    config::Config,
    dns::{DnsError, MxLookup},
    router::Router,
    server::Server,
};

/// A fixed zone table that counts how many times it is queried.
pub struct CountingZones {
    zones: HashMap<String, Vec<String>>,
    calls: AtomicUsize,
}

impl CountingZones {
    #[must_use]
    pub fn new(zones: &[(&str, &[&str])]) -> Arc<Self> {
        Arc::new(Self {
            zones: zones
                .iter()
                .map(|(domain, hosts)| {
                    (
                        (*domain).to_string(),
                        hosts.iter().map(ToString::to_string).collect(),
                    )
                })
                .collect(),
            calls: AtomicUsize::new(0),
        })
    }

    /// Total number of `mx_hosts` calls seen.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MxLookup for CountingZones {
    async fn mx_hosts(&self, domain: &str) -> Result<Vec<String>, DnsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.zones.get(domain).cloned().unwrap_or_default())
    }
}

/// A running server plus the pieces tests assert against.
pub struct Harness {
    addr: SocketAddr,
    shutdown: broadcast::Sender<Signal>,
    serve: JoinHandle<anyhow::Result<()>>,
    pub router: Arc<Router>,
}

impl Harness {
    /// Build the router from `config`, bind a random port, and serve.
    pub async fn start(config: &Config, lookup: Arc<dyn MxLookup>) -> Self {
        let router = Arc::new(Router::from_config(config, lookup).expect("valid test config"));

        let client_timeout = (config.client_timeout_secs > 0)
            .then(|| Duration::from_secs(config.client_timeout_secs));
        let server = Server::bind(
            "127.0.0.1:0".parse().expect("loopback socket address"),
            Arc::clone(&router),
            client_timeout,
            Duration::from_secs(config.gc_interval_secs),
        )
        .await
        .expect("bind test server");

        let addr = server.local_addr().expect("bound address");
        let (shutdown, _) = broadcast::channel(4);
        let receiver = shutdown.subscribe();
        let serve = tokio::spawn(async move { server.serve(receiver).await });

        Self {
            addr,
            shutdown,
            serve,
            router,
        }
    }

    /// Open a client connection to the server.
    pub async fn connect(&self) -> Client {
        let stream = TcpStream::connect(self.addr).await.expect("connect");
        let (read, write) = stream.into_split();

        Client {
            lines: BufReader::new(read).lines(),
            write,
        }
    }

    /// Signal shutdown and wait for the accept loop to drain.
    pub async fn shutdown(self) {
        self.shutdown
            .send(Signal::Shutdown)
            .expect("server still listening");
        self.serve
            .await
            .expect("serve task")
            .expect("clean shutdown");
    }
}

/// One protocol connection; requests are lines, responses are lines.
pub struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl Client {
    /// Send one request line and read the response line.
    pub async fn request(&mut self, line: &str) -> String {
        self.write
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("write request");
        self.lines
            .next_line()
            .await
            .expect("read response")
            .expect("server closed the connection")
    }
}
