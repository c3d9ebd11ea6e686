use std::io::{self, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use bytes::Bytes;
use crate::cluster::message::ClusterMessage;
use crate::cluster::node::ClusterNode;
use crate::core::error::{Error, ErrorKind, Result};
use crate::parallel::worker_pool::{Completion, WorkerPool};

#[derive(Debug, Default)]
pub struct TransportStats {
    pub sent: AtomicU64,
    pub failed: AtomicU64,
}

/// Client side of the replication protocol: one short-lived connection per
/// message, no retries.
pub struct ClusterTransport {
    connect_timeout: Duration,
    stats: TransportStats,
}

impl ClusterTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        ClusterTransport {
            connect_timeout,
            stats: TransportStats::default(),
        }
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    pub fn send(&self, node: &ClusterNode, message: &ClusterMessage) -> Result<()> {
        let frame = message.encode()?;
        self.send_frame(node, &frame)
    }

    fn send_frame(&self, node: &ClusterNode, frame: &[u8]) -> Result<()> {
        let result = self.deliver(node, frame);
        match &result {
            Ok(()) => self.stats.sent.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.stats.failed.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    fn deliver(&self, node: &ClusterNode, frame: &[u8]) -> Result<()> {
        let addresses = (node.host.as_str(), node.port)
            .to_socket_addrs()
            .map_err(|e| Error::new(ErrorKind::SendFailure, format!("cannot resolve {}: {}", node, e)))?;

        let mut last_error = Error::new(ErrorKind::SendFailure, format!("{} resolved to no address", node));
        for address in addresses {
            match TcpStream::connect_timeout(&address, self.connect_timeout) {
                Ok(mut stream) => {
                    stream.set_write_timeout(Some(self.connect_timeout))?;
                    stream.write_all(frame)
                        .and_then(|_| stream.flush())
                        .map_err(|e| Error::new(ErrorKind::SendFailure, format!("write to {} failed: {}", node, e)))?;
                    // Peer may already have closed after reading the frame
                    let _ = stream.shutdown(Shutdown::Both);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {
                    last_error = Error::new(
                        ErrorKind::ConnectTimeout,
                        format!("connect to {} timed out after {:?}", node, self.connect_timeout),
                    );
                }
                Err(e) => {
                    last_error = Error::new(ErrorKind::SendFailure, format!("connect to {} failed: {}", node, e));
                }
            }
        }
        Err(last_error)
    }

    /// Queues one send per peer. Failed deliveries are logged and dropped.
    pub fn broadcast(self: &Arc<Self>, peers: &[ClusterNode], message: &ClusterMessage, pool: &WorkerPool) -> Vec<Completion> {
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(kind = message.kind(), error = %e, "could not encode cluster message");
                return Vec::new();
            }
        };

        let mut completions = Vec::with_capacity(peers.len());
        for peer in peers {
            let transport = self.clone();
            let target = peer.clone();
            let frame: Bytes = frame.clone();
            let kind = message.kind();
            let submitted = pool.submit(move || {
                match transport.send_frame(&target, &frame) {
                    Ok(()) => {
                        tracing::debug!(peer = %target, kind, "delivered cluster message");
                        Ok(())
                    }
                    Err(e) => {
                        tracing::warn!(peer = %target, kind, error = %e, "dropped cluster message");
                        Err(e)
                    }
                }
            });
            match submitted {
                Ok(completion) => completions.push(completion),
                Err(e) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(peer = %peer, kind = message.kind(), error = %e, "dropped cluster message");
                }
            }
        }
        completions
    }
}
