//! Per-address session state machine: connect → handshake (with retries)
//! → optional `getaddr` collection window (with its own retries) → close.
//!
//! Grounded on the original `net/peer.rs`'s connection/handshake/timing
//! field set (its inventory, sync, and rate-limit fields have no
//! counterpart here and are dropped) and `net/connection.rs`'s
//! `RetryInfo` for the retry-bookkeeping shape.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::RngCore;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;

use crate::address::{Address, AddressKind};
use crate::net::codec::{read_frame, write_frame};
use crate::net::message::{
    decode_addr, decode_addrv2, AddrEntry, PingPongPayload, VersionPayload, CMD_ADDR, CMD_ADDRV2,
    CMD_GETADDR, CMD_PING, CMD_PONG, CMD_SENDADDRV2, CMD_VERACK, CMD_VERSION,
};
use crate::net::transport::{TimeoutTriple, Transport};

fn network_label(kind: AddressKind) -> &'static str {
    match kind {
        AddressKind::Ipv4 => "ipv4",
        AddressKind::Ipv6 => "ipv6",
        AddressKind::OnionV3 => "onion_v3",
        AddressKind::I2p => "i2p",
        AddressKind::Cjdns => "cjdns",
    }
}

/// Configuration a single session needs, plain data the controller hands
/// down per attempt.
#[derive(Clone)]
pub struct SessionConfig {
    pub magic: [u8; 4],
    pub protocol_version: i32,
    pub user_agent: String,
    pub handshake_attempts: u32,
    pub getaddr_retries: u32,
}

/// One reachable-nodes sink row.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReachableNodeRecord {
    pub timestamp: i64,
    pub address: String,
    pub port: u16,
    pub network: &'static str,
    pub handshake_successful: bool,
    pub protocol_version: Option<i32>,
    pub user_agent: Option<String>,
    pub services: Option<u64>,
    pub start_height: Option<i32>,
    pub latency_connect: Option<f64>,
    pub latency_version_handshake: Option<f64>,
    pub latency_verack_handshake: Option<f64>,
    pub num_addr_messages: u32,
    pub num_addresses: u32,
    pub time_first_addr: Option<i64>,
    pub time_last_addr: Option<i64>,
}

/// One advertised-addresses sink row, produced only when
/// the node was sampled for recording.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AdvertisedAddressRecord {
    pub source_address: String,
    pub source_port: u16,
    pub source_network: &'static str,
    pub advertised_timestamp: u32,
    pub advertised_services: u64,
    pub advertised_address: String,
    pub advertised_port: u16,
    pub advertised_network: &'static str,
}

/// Outcome of one full node session: the reachable-node record, and every
/// address the node advertised (the frontier always grows from these,
/// regardless of whether the caller ends up sampling this node for the
/// advertised-addresses sink).
pub struct SessionOutcome {
    pub record: ReachableNodeRecord,
    pub discovered: Vec<AddrEntry>,
}

struct HandshakeInfo {
    version_latency: Duration,
    verack_latency: Duration,
    peer_version: VersionPayload,
}

pub async fn run_session(
    address: &Address,
    transport: &Transport,
    timeouts: TimeoutTriple,
    cfg: &SessionConfig,
) -> SessionOutcome {
    let mut handshake_attempts_remaining = cfg.handshake_attempts.max(1);
    let mut any_connect_latency: Option<Duration> = None;
    let mut handshake_info: Option<HandshakeInfo> = None;

    let mut num_addr_messages = 0u32;
    let mut discovered: Vec<AddrEntry> = Vec::new();
    let mut time_first_addr: Option<i64> = None;
    let mut time_last_addr: Option<i64> = None;

    let total_windows = cfg.getaddr_retries.max(1);

    'windows: for window_idx in 1..=total_windows {
        let ready = loop {
            if handshake_attempts_remaining == 0 {
                break None;
            }
            handshake_attempts_remaining -= 1;

            let connect_t0 = Instant::now();
            let mut stream = match transport.open(address).await {
                Ok(s) => s,
                Err(_) => {
                    if handshake_attempts_remaining == 0 {
                        break None;
                    }
                    continue;
                }
            };
            let connect_latency = connect_t0.elapsed();
            any_connect_latency = Some(connect_latency);

            match do_handshake(&mut stream, cfg, timeouts.message).await {
                Ok(info) => break Some((stream, connect_latency, info)),
                Err(()) => {
                    drop(stream);
                    if handshake_attempts_remaining == 0 {
                        break None;
                    }
                    continue;
                }
            }
        };

        let Some((mut stream, connect_latency, info)) = ready else {
            break 'windows;
        };
        any_connect_latency = Some(connect_latency);
        handshake_info = Some(info);

        let (count, entries, first, last) = collect_once(&mut stream, cfg.magic, timeouts.getaddr).await;
        drop(stream);

        if count > 0 {
            num_addr_messages = count;
            discovered = entries;
            time_first_addr = first;
            time_last_addr = last;
            break 'windows;
        }

        if window_idx == total_windows {
            break 'windows;
        }
    }

    let handshake_successful = handshake_info.is_some();
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let record = ReachableNodeRecord {
        timestamp: now,
        address: address.host_string(),
        port: address.port(),
        network: network_label(address.kind()),
        handshake_successful,
        protocol_version: handshake_info.as_ref().map(|h| h.peer_version.version),
        user_agent: handshake_info.as_ref().map(|h| h.peer_version.user_agent.clone()),
        services: handshake_info.as_ref().map(|h| h.peer_version.services),
        start_height: handshake_info.as_ref().map(|h| h.peer_version.start_height),
        latency_connect: any_connect_latency.map(|d| d.as_secs_f64()),
        latency_version_handshake: handshake_info.as_ref().map(|h| h.version_latency.as_secs_f64()),
        latency_verack_handshake: handshake_info.as_ref().map(|h| h.verack_latency.as_secs_f64()),
        num_addr_messages,
        num_addresses: discovered.len() as u32,
        time_first_addr,
        time_last_addr,
    };

    SessionOutcome { record, discovered }
}

pub fn to_advertised_records(source: &Address, entries: &[AddrEntry]) -> Vec<AdvertisedAddressRecord> {
    entries
        .iter()
        .map(|entry| AdvertisedAddressRecord {
            source_address: source.host_string(),
            source_port: source.port(),
            source_network: network_label(source.kind()),
            advertised_timestamp: entry.timestamp,
            advertised_services: entry.services,
            advertised_address: entry.address.host_string(),
            advertised_port: entry.address.port(),
            advertised_network: network_label(entry.address.kind()),
        })
        .collect()
}

async fn do_handshake<S>(
    stream: &mut S,
    cfg: &SessionConfig,
    message_timeout: Duration,
) -> Result<HandshakeInfo, ()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let start = Instant::now();

    let our_version = VersionPayload {
        version: cfg.protocol_version,
        services: 0,
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64,
        user_agent: cfg.user_agent.clone(),
        start_height: 0,
        relay: false,
        nonce: random_nonzero_nonce(),
    };
    write_frame(stream, cfg.magic, CMD_VERSION, &our_version.encode())
        .await
        .map_err(|_| ())?;

    let peer_version = loop {
        let (command, payload) = timeout(message_timeout, read_frame(stream, cfg.magic))
            .await
            .map_err(|_| ())?
            .map_err(|_| ())?;
        match command.as_str() {
            CMD_VERSION => break VersionPayload::decode(&payload).map_err(|_| ())?,
            CMD_PING => answer_ping(stream, &payload, cfg.magic).await?,
            _ => continue,
        }
    };
    let version_latency = start.elapsed();

    write_frame(stream, cfg.magic, CMD_SENDADDRV2, &[]).await.map_err(|_| ())?;
    write_frame(stream, cfg.magic, CMD_VERACK, &[]).await.map_err(|_| ())?;

    loop {
        let (command, payload) = timeout(message_timeout, read_frame(stream, cfg.magic))
            .await
            .map_err(|_| ())?
            .map_err(|_| ())?;
        match command.as_str() {
            CMD_VERACK => break,
            CMD_PING => answer_ping(stream, &payload, cfg.magic).await?,
            _ => continue,
        }
    }
    let verack_latency = start.elapsed();

    Ok(HandshakeInfo {
        version_latency,
        verack_latency,
        peer_version,
    })
}

async fn answer_ping<S>(stream: &mut S, payload: &[u8], magic: [u8; 4]) -> Result<(), ()>
where
    S: AsyncWrite + Unpin,
{
    let ping = PingPongPayload::decode(payload).map_err(|_| ())?;
    write_frame(stream, magic, CMD_PONG, &ping.encode())
        .await
        .map_err(|_| ())
}

/// One `getaddr` window: send `getaddr`, then for up to `getaddr_timeout`
/// wall-clock time read messages, accumulating every `addr`/`addrv2`
/// record, answering pings, ignoring everything else. Ends on timeout, not
/// a sentinel.
async fn collect_once<S>(
    stream: &mut S,
    magic: [u8; 4],
    getaddr_timeout: Duration,
) -> (u32, Vec<AddrEntry>, Option<i64>, Option<i64>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if write_frame(stream, magic, CMD_GETADDR, &[]).await.is_err() {
        return (0, Vec::new(), None, None);
    }

    let deadline = Instant::now() + getaddr_timeout;
    let mut count = 0u32;
    let mut entries = Vec::new();
    let mut first: Option<i64> = None;
    let mut last: Option<i64> = None;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let frame = match timeout(remaining, read_frame(stream, magic)).await {
            Err(_) => break,
            Ok(Err(_)) => break,
            Ok(Ok(frame)) => frame,
        };
        let (command, payload) = frame;
        match command.as_str() {
            CMD_ADDR => {
                if let Ok(decoded) = decode_addr(&payload) {
                    count += 1;
                    let now = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs() as i64;
                    first.get_or_insert(now);
                    last = Some(now);
                    entries.extend(decoded);
                }
            }
            CMD_ADDRV2 => {
                if let Ok(decoded) = decode_addrv2(&payload) {
                    count += 1;
                    let now = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs() as i64;
                    first.get_or_insert(now);
                    last = Some(now);
                    entries.extend(decoded);
                }
            }
            CMD_PING => {
                if answer_ping(stream, &payload, magic).await.is_err() {
                    break;
                }
            }
            _ => {}
        }
    }

    (count, entries, first, last)
}

fn random_nonzero_nonce() -> u64 {
    loop {
        let n = rand::thread_rng().next_u64();
        if n != 0 {
            return n;
        }
    }
}
