//! The message set a minimal crawler needs: `version`, `verack`, `ping`,
//! `pong`, `getaddr`, `sendaddrv2` to encode; the same plus `addr` and
//! `addrv2` to decode.

use std::net::Ipv6Addr;

use crate::address::{Address, AddressKind};
use crate::error::CodecError;

use super::codec::{encode_var_string, encode_varint, Reader};

pub const CMD_VERSION: &str = "version";
pub const CMD_VERACK: &str = "verack";
pub const CMD_PING: &str = "ping";
pub const CMD_PONG: &str = "pong";
pub const CMD_GETADDR: &str = "getaddr";
pub const CMD_SENDADDRV2: &str = "sendaddrv2";
pub const CMD_ADDR: &str = "addr";
pub const CMD_ADDRV2: &str = "addrv2";

/// Hard cap from an `addr`/`addrv2` message declaring more
/// than this many entries is rejected outright.
pub const MAX_ADDR_ENTRIES: u64 = 1000;

#[derive(Debug, Clone)]
pub struct VersionPayload {
    pub version: i32,
    pub services: u64,
    pub timestamp: i64,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
    pub nonce: u64,
}

impl VersionPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.services.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        encode_net_addr(&mut out, 0, Ipv6Addr::UNSPECIFIED, 0);
        encode_net_addr(&mut out, 0, Ipv6Addr::UNSPECIFIED, 0);
        out.extend_from_slice(&self.nonce.to_le_bytes());
        encode_var_string(&self.user_agent, &mut out);
        out.extend_from_slice(&self.start_height.to_le_bytes());
        out.push(self.relay as u8);
        out
    }

    pub fn decode(payload: &[u8]) -> Result<VersionPayload, CodecError> {
        let mut r = Reader::new(payload);
        let version = r.read_i32_le()?;
        let services = r.read_u64_le()?;
        let timestamp = r.read_i64_le()?;
        let _addr_recv = r.read_bytes(26)?;
        let _addr_from = r.read_bytes(26)?;
        let nonce = r.read_u64_le()?;
        let user_agent = r.read_var_string()?;
        let start_height = r.read_i32_le()?;
        let relay = if r.remaining() > 0 {
            r.read_u8()? != 0
        } else {
            false
        };
        Ok(VersionPayload {
            version,
            services,
            timestamp,
            user_agent,
            start_height,
            relay,
            nonce,
        })
    }
}

fn encode_net_addr(out: &mut Vec<u8>, services: u64, ip: Ipv6Addr, port: u16) {
    out.extend_from_slice(&services.to_le_bytes());
    out.extend_from_slice(&ip.octets());
    out.extend_from_slice(&port.to_be_bytes());
}

#[derive(Debug, Clone)]
pub struct PingPongPayload {
    pub nonce: u64,
}

impl PingPongPayload {
    pub fn encode(&self) -> Vec<u8> {
        self.nonce.to_le_bytes().to_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<PingPongPayload, CodecError> {
        let mut r = Reader::new(payload);
        Ok(PingPongPayload {
            nonce: r.read_u64_le()?,
        })
    }
}

/// One entry of an `addr`/`addrv2` message, already resolved to an
/// [`Address`].
#[derive(Debug, Clone)]
pub struct AddrEntry {
    pub timestamp: u32,
    pub services: u64,
    pub address: Address,
}

/// Decode a pre-BIP155 `addr` message: var-int count, then count ×
/// (uint32 timestamp, uint64 services, 16-byte IPv6-mapped address,
/// big-endian uint16 port).
pub fn decode_addr(payload: &[u8]) -> Result<Vec<AddrEntry>, CodecError> {
    let mut r = Reader::new(payload);
    let count = r.read_varint()?;
    if count > MAX_ADDR_ENTRIES {
        return Err(CodecError::TooManyAddresses(count));
    }
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let timestamp = r.read_u32_le()?;
        let services = r.read_u64_le()?;
        let ip_bytes: [u8; 16] = r.read_bytes(16)?.try_into().unwrap();
        let port = r.read_u16_be()?;
        let ip = Ipv6Addr::from(ip_bytes);
        let address = match ip.to_ipv4_mapped() {
            Some(v4) => Address::ipv4(v4, port),
            None => Address::ipv6(ip, port),
        };
        entries.push(AddrEntry {
            timestamp,
            services,
            address,
        });
    }
    Ok(entries)
}

/// Encode a pre-BIP155 `addr` message. Only IPv4/IPv6 entries are
/// representable; callers filter before calling this (the crawler only
/// emits `addrv2`, but decoding `addr` from peers must be supported).
pub fn encode_addr(entries: &[AddrEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_varint(entries.len() as u64, &mut out);
    for entry in entries {
        out.extend_from_slice(&entry.timestamp.to_le_bytes());
        out.extend_from_slice(&entry.services.to_le_bytes());
        let ip_bytes = match entry.address.kind() {
            AddressKind::Ipv4 => {
                let s = entry.address.host_string();
                let v4: std::net::Ipv4Addr = s.parse().expect("ipv4 host string");
                v4.to_ipv6_mapped().octets()
            }
            _ => Ipv6Addr::UNSPECIFIED.octets(),
        };
        out.extend_from_slice(&ip_bytes);
        out.extend_from_slice(&entry.address.port().to_be_bytes());
    }
    out
}

/// Decode a BIP155 `addrv2` message: var-int count, then count ×
/// (uint32 timestamp, var-int services, uint8 network-id, var-bytes
/// address, big-endian uint16 port). TORv2 (network-id 3) entries are
/// silently skipped.
pub fn decode_addrv2(payload: &[u8]) -> Result<Vec<AddrEntry>, CodecError> {
    let mut r = Reader::new(payload);
    let count = r.read_varint()?;
    if count > MAX_ADDR_ENTRIES {
        return Err(CodecError::TooManyAddresses(count));
    }
    let mut entries = Vec::new();
    for _ in 0..count {
        let timestamp = r.read_u32_le()?;
        let services = r.read_varint()?;
        let network_id = r.read_u8()?;
        let addr_len = r.read_varint()? as usize;
        let addr_bytes = r.read_bytes(addr_len)?;
        let port = r.read_u16_be()?;

        if network_id == crate::address::NET_ID_TORV2 {
            continue;
        }

        let address = Address::from_bip155(network_id, addr_bytes, port).map_err(|_| {
            CodecError::WrongAddressLength {
                network_id,
                got: addr_len,
            }
        })?;
        entries.push(AddrEntry {
            timestamp,
            services,
            address,
        });
    }
    Ok(entries)
}

pub fn encode_addrv2(entries: &[AddrEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_varint(entries.len() as u64, &mut out);
    for entry in entries {
        out.extend_from_slice(&entry.timestamp.to_le_bytes());
        encode_varint(entry.services, &mut out);
        out.push(entry.address.kind().network_id());
        let addr_bytes = entry.address.to_bip155_bytes();
        encode_varint(addr_bytes.len() as u64, &mut out);
        out.extend_from_slice(&addr_bytes);
        out.extend_from_slice(&entry.address.port().to_be_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn version_payload_roundtrips() {
        let payload = VersionPayload {
            version: 70016,
            services: 0,
            timestamp: 1_700_000_000,
            user_agent: "/bitcrawl:0.1/".to_string(),
            start_height: 0,
            relay: false,
            nonce: 0xdead_beef,
        };
        let encoded = payload.encode();
        let decoded = VersionPayload::decode(&encoded).unwrap();
        assert_eq!(decoded.version, 70016);
        assert_eq!(decoded.user_agent, "/bitcrawl:0.1/");
        assert_eq!(decoded.nonce, 0xdead_beef);
        assert!(!decoded.relay);
    }

    #[test]
    fn addrv2_roundtrips_mixed_kinds() {
        let entries = vec![
            AddrEntry {
                timestamp: 1,
                services: 1,
                address: Address::ipv4(Ipv4Addr::new(1, 2, 3, 4), 8333),
            },
            AddrEntry {
                timestamp: 2,
                services: 1,
                address: Address::ipv6("2001:db8::1".parse().unwrap(), 8333),
            },
        ];
        let encoded = encode_addrv2(&entries);
        let decoded = decode_addrv2(&encoded).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].address, entries[0].address);
        assert_eq!(decoded[1].address, entries[1].address);
    }

    #[test]
    fn addrv2_skips_torv2_entries() {
        let mut out = Vec::new();
        encode_varint(1, &mut out);
        out.extend_from_slice(&0u32.to_le_bytes());
        encode_varint(0, &mut out);
        out.push(crate::address::NET_ID_TORV2);
        encode_varint(10, &mut out);
        out.extend_from_slice(&[0u8; 10]);
        out.extend_from_slice(&0u16.to_be_bytes());

        let decoded = decode_addrv2(&out).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn addrv2_rejects_too_many_entries() {
        let mut out = Vec::new();
        encode_varint(MAX_ADDR_ENTRIES + 1, &mut out);
        let err = decode_addrv2(&out).unwrap_err();
        assert!(matches!(err, CodecError::TooManyAddresses(_)));
    }

    #[test]
    fn addr_roundtrips_ipv4() {
        let entries = vec![AddrEntry {
            timestamp: 5,
            services: 1,
            address: Address::ipv4(Ipv4Addr::new(8, 8, 8, 8), 8333),
        }];
        let encoded = encode_addr(&entries);
        let decoded = decode_addr(&encoded).unwrap();
        assert_eq!(decoded[0].address, entries[0].address);
    }
}
