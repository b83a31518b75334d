//! Four connection strategies behind one `open` call, returning a plain
//! [`tokio::net::TcpStream`] in every case (SOCKS5 and SAM streams are
//! unwrapped to their inner socket once negotiation completes, following
//! the pattern in the Tor-transport reference this adapter is grounded
//! on).
//!
//! A plain enum with one match-dispatched method, not a `dyn Trait` —
//! this crate favors concrete enums (`PeerState`, `SyncState`,
//! `RejectCode`) over trait objects for closed sets like this one, and
//! there is no `async-trait` dependency anywhere in it to reach for.

use std::net::Ipv6Addr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tokio_socks::tcp::Socks5Stream;

use crate::address::{is_cjdns_range, Address, AddressKind};
use crate::error::TransportError;

use super::sam::SamSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TimeoutTriple {
    pub connect: Duration,
    pub message: Duration,
    pub getaddr: Duration,
}

#[derive(Clone)]
pub struct TransportConfig {
    pub ip: TimeoutTriple,
    pub tor: TimeoutTriple,
    pub i2p: TimeoutTriple,
    pub cjdns: TimeoutTriple,
    pub tor_proxy_host: String,
    pub tor_proxy_port: u16,
    pub i2p_sam_host: String,
    pub i2p_sam_port: u16,
}

impl TransportConfig {
    pub fn timeouts_for(&self, kind: AddressKind) -> TimeoutTriple {
        match kind {
            AddressKind::Ipv4 | AddressKind::Ipv6 => self.ip,
            AddressKind::OnionV3 => self.tor,
            AddressKind::I2p => self.i2p,
            AddressKind::Cjdns => self.cjdns,
        }
    }
}

/// Dispatches to one of the four adapters based on an [`Address`]'s kind.
/// The I2P variant lazily establishes the one shared SAM session on the
/// first I2P address it's asked to open, rather than requiring the
/// controller to know up front whether the crawl will ever touch I2P —
/// bootstrap addresses are IP-only as often as not, but I2P destinations
/// surface constantly via `addr`/`addrv2` gossip from reachable nodes.
pub struct Transport {
    config: TransportConfig,
    sam: OnceCell<SamSession>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Transport {
        Transport {
            config,
            sam: OnceCell::new(),
        }
    }

    pub fn timeouts_for(&self, kind: AddressKind) -> TimeoutTriple {
        self.config.timeouts_for(kind)
    }

    pub async fn open(&self, address: &Address) -> Result<TcpStream, TransportError> {
        let triple = self.config.timeouts_for(address.kind());
        match address.kind() {
            AddressKind::Ipv4 | AddressKind::Ipv6 => open_direct(address, triple.connect).await,
            AddressKind::Cjdns => open_cjdns(address, triple.connect).await,
            AddressKind::OnionV3 => {
                open_tor(
                    address,
                    &self.config.tor_proxy_host,
                    self.config.tor_proxy_port,
                    triple.connect,
                )
                .await
            }
            AddressKind::I2p => {
                let sam = self
                    .sam
                    .get_or_try_init(|| {
                        SamSession::create(&self.config.i2p_sam_host, self.config.i2p_sam_port, triple.connect)
                    })
                    .await?;
                let destination = format!("{}.b32.i2p", strip_suffix(&address.host_string(), ".b32.i2p"));
                sam.connect_stream(&destination, triple.connect).await
            }
        }
    }
}

fn strip_suffix<'a>(s: &'a str, suffix: &str) -> &'a str {
    s.strip_suffix(suffix).unwrap_or(s)
}

async fn open_direct(address: &Address, connect_timeout: Duration) -> Result<TcpStream, TransportError> {
    let target = address.to_socket_string();
    timeout(connect_timeout, TcpStream::connect(target))
        .await
        .map_err(|_| TransportError::ConnectTimeout(connect_timeout))?
        .map_err(TransportError::Connect)
}

async fn open_cjdns(address: &Address, connect_timeout: Duration) -> Result<TcpStream, TransportError> {
    let ip = address.as_ipv6().unwrap_or(Ipv6Addr::UNSPECIFIED);
    if !is_cjdns_range(&ip) {
        return Err(TransportError::NotCjdns(ip));
    }
    open_direct(address, connect_timeout).await
}

/// Dials through Tor's SOCKS5 proxy, passing the `.onion` hostname through
/// unresolved so Tor performs resolution.
async fn open_tor(
    address: &Address,
    proxy_host: &str,
    proxy_port: u16,
    connect_timeout: Duration,
) -> Result<TcpStream, TransportError> {
    let dest = format!("{}.onion:{}", address.host_string().trim_end_matches(".onion"), address.port());
    let proxy_addr = (proxy_host, proxy_port);
    let stream = timeout(connect_timeout, Socks5Stream::connect(proxy_addr, dest))
        .await
        .map_err(|_| TransportError::ConnectTimeout(connect_timeout))??;
    Ok(stream.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn direct_connect_to_closed_port_fails() {
        let addr = Address::ipv4(std::net::Ipv4Addr::LOCALHOST, 1);
        let result = open_direct(&addr, Duration::from_millis(200)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn open_cjdns_rejects_an_address_outside_fc00_8() {
        // `from_bip155` is the only way to force a non-cjdns-range Ipv6Addr
        // into `Address::cjdns`-shaped data without going through the
        // constructor that already validates the range.
        let outside: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let addr = Address::ipv6(outside, 8333);
        let result = open_cjdns(&addr, Duration::from_millis(200)).await;
        assert!(matches!(result, Err(TransportError::NotCjdns(ip)) if ip == outside));
    }

    #[tokio::test]
    async fn open_cjdns_accepts_an_address_inside_fc00_8_and_attempts_to_connect() {
        let inside: Ipv6Addr = "fc00::1".parse().unwrap();
        let addr = Address::cjdns(inside, 1).unwrap();
        let result = open_cjdns(&addr, Duration::from_millis(200)).await;
        // Port 1 on localhost-equivalent fc00::1 is not listening, so this
        // still errs, but it must be a connect failure, not `NotCjdns` —
        // proof the range check passed and dispatch reached `open_direct`.
        assert!(!matches!(result, Err(TransportError::NotCjdns(_))));
    }
}
