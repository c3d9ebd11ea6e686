use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use crate::cluster::message::{decode_frame, ClusterMessage};
use crate::core::error::{Error, ErrorKind, Result};
use crate::parallel::worker_pool::WorkerPool;

const SCRATCH_SIZE: usize = 8 * 1024;

/// Receiver of decoded inbound messages. Runs on the worker pool.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: ClusterMessage) -> Result<()>;

    /// Messages with equal keys are handled one at a time, in arrival order.
    fn ordering_key(&self, message: &ClusterMessage) -> String {
        message.entity_type().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Init,
    Listening,
    Closed,
}

#[derive(Debug, Default)]
pub struct ServerStats {
    pub accepted: AtomicU64,
    pub dispatched: AtomicU64,
    pub overloaded: AtomicU64,
    pub protocol_violations: AtomicU64,
    pub connection_errors: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub max_message_size: usize,
    pub read_timeout: Duration,
}

/// Inbound side of the replication protocol.
///
/// One dedicated thread runs a current-thread runtime that accepts
/// connections and reads them; each connection carries exactly one message,
/// which is handed to the worker pool before the connection is closed.
pub struct ClusterServer {
    local_addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    stats: Arc<ServerStats>,
    shutdown_tx: watch::Sender<bool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ClusterServer {
    pub fn start(config: ServerConfig, handler: Arc<dyn MessageHandler>, pool: Arc<WorkerPool>) -> Result<Self> {
        let state = Arc::new(Mutex::new(ServerState::Init));

        // Bound here so address errors reach the caller
        let listener = StdTcpListener::bind(&config.bind_address)
            .map_err(|e| Error::new(ErrorKind::Io, format!("bind {} failed: {}", config.bind_address, e)))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(ServerStats::default());

        let thread_state = state.clone();
        let thread_stats = stats.clone();
        let thread = thread::Builder::new()
            .name("chunkdex-cluster".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            tracing::error!(error = %e, "cluster listener could not be registered");
                            *thread_state.lock() = ServerState::Closed;
                            return;
                        }
                    };
                    *thread_state.lock() = ServerState::Listening;
                    tracing::info!(address = %local_addr, "cluster server listening");

                    accept_loop(listener, config, handler, pool, thread_stats, shutdown_rx).await;

                    *thread_state.lock() = ServerState::Closed;
                    tracing::info!(address = %local_addr, "cluster server closed");
                });
            })?;

        Ok(ClusterServer {
            local_addr,
            state,
            stats,
            shutdown_tx,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Closes the listener and stops the loop. Already-dispatched messages
    /// still run on the pool.
    pub fn shutdown(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        let _ = self.shutdown_tx.send(true);
        if thread.join().is_err() {
            tracing::warn!("cluster server thread panicked");
        }
        *self.state.lock() = ServerState::Closed;
    }
}

impl Drop for ClusterServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: ServerConfig,
    handler: Arc<dyn MessageHandler>,
    pool: Arc<WorkerPool>,
    stats: Arc<ServerStats>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }
            accepted = listener.accept() => {
                let (mut stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        stats.connection_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                stats.accepted.fetch_add(1, Ordering::Relaxed);

                let config = config.clone();
                let handler = handler.clone();
                let pool = pool.clone();
                let stats = stats.clone();
                tokio::spawn(async move {
                    let read = tokio::time::timeout(
                        config.read_timeout,
                        read_message(&mut stream, config.max_message_size),
                    ).await;

                    let message = match read {
                        Ok(Ok(Some(message))) => message,
                        // Closed before sending anything
                        Ok(Ok(None)) => return,
                        Ok(Err(e)) if e.kind == ErrorKind::ProtocolViolation => {
                            stats.protocol_violations.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(peer = %peer, error = %e, "protocol violation, dropping connection");
                            return;
                        }
                        Ok(Err(e)) => {
                            stats.connection_errors.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(peer = %peer, error = %e, "cluster connection failed");
                            return;
                        }
                        Err(_) => {
                            stats.connection_errors.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(peer = %peer, timeout_ms = config.read_timeout.as_millis() as u64, "cluster connection timed out");
                            return;
                        }
                    };

                    dispatch(message, &handler, &pool, &stats, peer);
                    drop(stream);
                });
            }
        }
    }
}

/// Reads until one complete frame is buffered.
async fn read_message(stream: &mut TcpStream, max_message_size: usize) -> Result<Option<ClusterMessage>> {
    let mut scratch = [0u8; SCRATCH_SIZE];
    let mut buffer = BytesMut::new();

    loop {
        let n = stream.read(&mut scratch).await?;
        if n == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            return Err(Error::protocol(format!("connection closed after {} bytes of a partial message", buffer.len())));
        }
        buffer.extend_from_slice(&scratch[..n]);

        if let Some((message, used)) = decode_frame(&buffer, max_message_size)? {
            if used != buffer.len() {
                return Err(Error::protocol(format!("{} bytes after the message", buffer.len() - used)));
            }
            return Ok(Some(message));
        }
    }
}

fn dispatch(message: ClusterMessage, handler: &Arc<dyn MessageHandler>, pool: &WorkerPool, stats: &ServerStats, peer: SocketAddr) {
    let kind = message.kind();
    let key = handler.ordering_key(&message);
    let handler = handler.clone();
    // Runs on the accept loop thread, so never wait for queue space
    let submitted = pool.try_submit_keyed(&key, move || {
        let entity_type = message.entity_type().to_string();
        let id = message.id().to_string();
        handler.handle(message).inspect_err(|e| {
            tracing::error!(kind, entity_type = %entity_type, id = %id, error = %e, "failed to apply cluster message");
        })
    });

    match submitted {
        Ok(_) => {
            stats.dispatched.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(peer = %peer, kind, "dispatched cluster message");
        }
        Err(e) => {
            if e.kind == ErrorKind::Overloaded {
                stats.overloaded.fetch_add(1, Ordering::Relaxed);
            }
            tracing::warn!(peer = %peer, kind, error = %e, "dropped cluster message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream as StdTcpStream;
    use crossbeam::channel::{unbounded, Sender};
    use crate::parallel::worker_pool::BackpressurePolicy;

    struct Collect(Mutex<Sender<ClusterMessage>>);

    impl MessageHandler for Collect {
        fn handle(&self, message: ClusterMessage) -> Result<()> {
            let _ = self.0.lock().send(message);
            Ok(())
        }
    }

    fn start(max_message_size: usize) -> (ClusterServer, crossbeam::channel::Receiver<ClusterMessage>) {
        let (tx, rx) = unbounded();
        let pool = Arc::new(WorkerPool::new("server-test", 2, 16, BackpressurePolicy::Block).unwrap());
        let config = ServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_message_size,
            read_timeout: Duration::from_secs(2),
        };
        let server = ClusterServer::start(config, Arc::new(Collect(Mutex::new(tx))), pool).unwrap();
        (server, rx)
    }

    #[test]
    fn one_message_per_connection_is_dispatched() {
        let (server, rx) = start(1024);
        let message = ClusterMessage::RefByInvalidate { entity_type: "Author".into(), id: "7".into() };

        let mut stream = StdTcpStream::connect(server.local_addr()).unwrap();
        stream.write_all(&message.encode().unwrap()).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), message);
        // Server closes once the message is read
        let mut rest = Vec::new();
        assert_eq!(stream.read_to_end(&mut rest).unwrap_or(0), 0);

        server.shutdown();
        assert_eq!(server.state(), ServerState::Closed);
    }

    #[test]
    fn oversized_message_is_rejected() {
        let (server, rx) = start(64);
        let mut stream = StdTcpStream::connect(server.local_addr()).unwrap();
        stream.write_all(&1_000u32.to_be_bytes()).unwrap();
        let _ = stream.write_all(&[1u8; 60]);

        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(server.stats().protocol_violations.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn bad_connection_does_not_stop_the_loop() {
        let (server, rx) = start(1024);
        {
            let mut garbage = StdTcpStream::connect(server.local_addr()).unwrap();
            garbage.write_all(&[0, 0, 0, 1, 99]).unwrap();
        }

        let message = ClusterMessage::Remove { entity_type: "Article".into(), id: "1".into() };
        let mut stream = StdTcpStream::connect(server.local_addr()).unwrap();
        stream.write_all(&message.encode().unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), message);
    }

    struct Gate {
        started: Sender<ClusterMessage>,
        release: crossbeam::channel::Receiver<()>,
    }

    impl MessageHandler for Gate {
        fn handle(&self, message: ClusterMessage) -> Result<()> {
            let _ = self.started.send(message);
            let _ = self.release.recv();
            Ok(())
        }
    }

    #[test]
    fn full_pool_drops_messages_without_stalling_accepts() {
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = unbounded::<()>();
        let pool = Arc::new(WorkerPool::new("server-test", 1, 1, BackpressurePolicy::Block).unwrap());
        let config = ServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_message_size: 1024,
            read_timeout: Duration::from_secs(2),
        };
        let handler = Gate { started: started_tx, release: release_rx };
        let server = ClusterServer::start(config, Arc::new(handler), pool).unwrap();

        let send = |id: &str| {
            let message = ClusterMessage::Remove { entity_type: "Article".into(), id: id.into() };
            let mut stream = StdTcpStream::connect(server.local_addr()).unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            stream.write_all(&message.encode().unwrap()).unwrap();
            // Returns once the server has dispatched and closed the connection
            let mut rest = Vec::new();
            stream.read_to_end(&mut rest).unwrap();
        };

        send("1");
        assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)).unwrap().id(), "1");
        send("2");
        send("3");
        send("4");
        assert_eq!(server.stats().accepted.load(Ordering::Relaxed), 4);
        assert_eq!(server.stats().overloaded.load(Ordering::Relaxed), 2);

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)).unwrap().id(), "2");
        assert!(started_rx.recv_timeout(Duration::from_millis(200)).is_err());
        server.shutdown();
    }
}
