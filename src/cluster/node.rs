use std::fmt;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::str::FromStr;
use parking_lot::RwLock;
use crate::core::error::{Error, ErrorKind, Result};

/// Address of a cooperating node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterNode {
    pub host: String,
    pub port: u16,
}

impl ClusterNode {
    pub fn new(host: &str, port: u16) -> Self {
        ClusterNode {
            host: host.to_string(),
            port,
        }
    }

    pub fn address(&self) -> String {
        self.to_string()
    }

    /// Every IP the host name resolves to; empty when it does not resolve.
    pub fn resolve(&self) -> Vec<IpAddr> {
        match (self.host.as_str(), self.port).to_socket_addrs() {
            Ok(addrs) => addrs.map(|addr| addr.ip()).collect(),
            Err(e) => {
                tracing::debug!(node = %self, error = %e, "could not resolve cluster node");
                Vec::new()
            }
        }
    }
}

/// Binding only succeeds for addresses assigned to this machine.
fn is_interface_address(ip: IpAddr) -> bool {
    ip.is_loopback() || UdpSocket::bind(SocketAddr::new(ip, 0)).is_ok()
}

impl fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ClusterNode {
    type Err = Error;

    /// `host:port`, with IPv6 hosts in brackets.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::new(ErrorKind::InvalidArgument, format!("invalid node address '{}'", s));

        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        let host = host.strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(ClusterNode::new(host, port))
    }
}

/// This node's identity and the peers it fans changes out to.
pub struct ClusterConfig {
    local: ClusterNode,
    peers: RwLock<Vec<ClusterNode>>,
}

impl ClusterConfig {
    pub fn new(local: ClusterNode, peers: Vec<ClusterNode>) -> Self {
        let config = ClusterConfig {
            local,
            peers: RwLock::new(Vec::new()),
        };
        for peer in peers {
            config.add_peer(peer);
        }
        config
    }

    pub fn local(&self) -> &ClusterNode {
        &self.local
    }

    pub fn peers(&self) -> Vec<ClusterNode> {
        self.peers.read().clone()
    }

    /// True when `peer` names this node's own listener, either literally or
    /// through an address of this machine when listening on a wildcard host.
    pub fn is_self(&self, peer: &ClusterNode) -> bool {
        if *peer == self.local {
            return true;
        }
        if peer.port != self.local.port {
            return false;
        }
        let local_ips = self.local.resolve();
        let wildcard = local_ips.iter().any(|ip| ip.is_unspecified());
        peer.resolve()
            .into_iter()
            .any(|ip| local_ips.contains(&ip) || (wildcard && is_interface_address(ip)))
    }

    /// False when the peer is already known or is this node.
    pub fn add_peer(&self, peer: ClusterNode) -> bool {
        if self.is_self(&peer) {
            tracing::debug!(peer = %peer, "skipped peer address of this node");
            return false;
        }
        let mut peers = self.peers.write();
        if peers.contains(&peer) {
            return false;
        }
        tracing::info!(peer = %peer, "added cluster peer");
        peers.push(peer);
        true
    }

    pub fn remove_peer(&self, peer: &ClusterNode) -> bool {
        let mut peers = self.peers.write();
        let before = peers.len();
        peers.retain(|p| p != peer);
        peers.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_prints_addresses() {
        let node: ClusterNode = "search-2:7070".parse().unwrap();
        assert_eq!(node, ClusterNode::new("search-2", 7070));
        assert_eq!(node.to_string(), "search-2:7070");

        let v6: ClusterNode = "[::1]:7071".parse().unwrap();
        assert_eq!(v6.host, "::1");
        assert_eq!(v6.to_string(), "[::1]:7071");

        for bad in ["no-port", ":7070", "host:port", "host:70000"] {
            assert_eq!(bad.parse::<ClusterNode>().unwrap_err().kind, ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn peer_set_skips_self_and_duplicates() {
        let local = ClusterNode::new("a", 1);
        let config = ClusterConfig::new(local.clone(), vec![ClusterNode::new("b", 2), ClusterNode::new("b", 2)]);
        assert_eq!(config.peers().len(), 1);
        assert!(!config.add_peer(local));
        assert!(config.add_peer(ClusterNode::new("c", 2)));
        assert!(config.remove_peer(&ClusterNode::new("b", 2)));
        assert_eq!(config.peers(), vec![ClusterNode::new("c", 2)]);
    }

    #[test]
    fn own_addresses_are_not_peers() {
        let wildcard = ClusterConfig::new(ClusterNode::new("0.0.0.0", 7070), Vec::new());
        assert!(wildcard.is_self(&ClusterNode::new("127.0.0.1", 7070)));
        assert!(wildcard.is_self(&ClusterNode::new("localhost", 7070)));
        assert!(!wildcard.is_self(&ClusterNode::new("127.0.0.1", 7071)));
        assert!(!wildcard.is_self(&ClusterNode::new("192.0.2.10", 7070)));
        assert!(!wildcard.add_peer(ClusterNode::new("127.0.0.1", 7070)));
        assert!(wildcard.peers().is_empty());

        let loopback = ClusterConfig::new(ClusterNode::new("127.0.0.1", 7070), Vec::new());
        assert!(loopback.is_self(&ClusterNode::new("localhost", 7070)));
        assert!(!loopback.is_self(&ClusterNode::new("127.0.0.1", 7071)));
    }
}
