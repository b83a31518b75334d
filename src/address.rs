//! Tagged-union address model over the five families the crawler dials:
//! IPv4, IPv6, Onion-v3, I2P, CJDNS.
//!
//! Kind is authoritative once known; it is never re-derived from the byte
//! pattern once an address carries a BIP155 network-id. The heuristics in
//! [`Address::parse`] only apply to text with no declared kind, e.g. a
//! bootstrap-file line.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use data_encoding::BASE32_NOPAD;
use sha3::{Digest, Sha3_256};

use crate::error::AddressError;

pub const NET_ID_IPV4: u8 = 1;
pub const NET_ID_IPV6: u8 = 2;
pub const NET_ID_TORV2: u8 = 3;
pub const NET_ID_TORV3: u8 = 4;
pub const NET_ID_I2P: u8 = 5;
pub const NET_ID_CJDNS: u8 = 6;

const ONION_V3_PUBKEY_LEN: usize = 32;
const ONION_V3_CHECKSUM_LEN: usize = 2;
const ONION_V3_VERSION: u8 = 0x03;
const ONION_V3_ADDR_LEN: usize = 56;
const I2P_HASH_LEN: usize = 32;
const I2P_ADDR_LEN: usize = 52;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    Ipv4,
    Ipv6,
    OnionV3,
    I2p,
    Cjdns,
}

impl AddressKind {
    pub fn network_id(self) -> u8 {
        match self {
            AddressKind::Ipv4 => NET_ID_IPV4,
            AddressKind::Ipv6 => NET_ID_IPV6,
            AddressKind::OnionV3 => NET_ID_TORV3,
            AddressKind::I2p => NET_ID_I2P,
            AddressKind::Cjdns => NET_ID_CJDNS,
        }
    }

    pub fn expected_bip155_len(self) -> usize {
        match self {
            AddressKind::Ipv4 => 4,
            AddressKind::Ipv6 | AddressKind::Cjdns => 16,
            AddressKind::OnionV3 | AddressKind::I2p => 32,
        }
    }
}

/// Internal canonical representation. IPv6 and CJDNS both hold an
/// [`Ipv6Addr`]; they are kept distinct only by the enclosing [`Address`]'s
/// `kind` field, exactly as the BIP155-identity rule requires.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Repr {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
    /// Lower-case, no `.onion` suffix, 56 characters.
    Onion(String),
    /// Lower-case, no `.b32.i2p` suffix, 52 characters.
    I2p(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    kind: AddressKind,
    repr: Repr,
    port: u16,
}

impl Address {
    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn with_port(&self, port: u16) -> Address {
        Address {
            kind: self.kind,
            repr: self.repr.clone(),
            port,
        }
    }

    pub fn ipv4(ip: Ipv4Addr, port: u16) -> Address {
        Address {
            kind: AddressKind::Ipv4,
            repr: Repr::V4(ip),
            port,
        }
    }

    pub fn ipv6(ip: Ipv6Addr, port: u16) -> Address {
        Address {
            kind: AddressKind::Ipv6,
            repr: Repr::V6(ip),
            port,
        }
    }

    pub fn cjdns(ip: Ipv6Addr, port: u16) -> Result<Address, AddressError> {
        if !is_cjdns_range(&ip) {
            return Err(AddressError::NotCjdns(ip.to_string()));
        }
        Ok(Address {
            kind: AddressKind::Cjdns,
            repr: Repr::V6(ip),
            port,
        })
    }

    /// `text` is the 56-character onion-v3 address, no suffix, any case.
    pub fn onion_v3(text: &str, port: u16) -> Result<Address, AddressError> {
        let lower = text.to_lowercase();
        validate_onion_v3(&lower)?;
        Ok(Address {
            kind: AddressKind::OnionV3,
            repr: Repr::Onion(lower),
            port,
        })
    }

    /// `text` is the 52-character I2P base32 destination hash, no suffix.
    pub fn i2p(text: &str, port: u16) -> Result<Address, AddressError> {
        let lower = text.to_lowercase();
        if lower.len() != I2P_ADDR_LEN || !lower.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AddressError::InvalidI2p(text.to_string()));
        }
        BASE32_NOPAD
            .decode(lower.to_uppercase().as_bytes())
            .map_err(|_| AddressError::InvalidI2p(text.to_string()))?;
        Ok(Address {
            kind: AddressKind::I2p,
            repr: Repr::I2p(lower),
            port,
        })
    }

    /// Parse a `host:port` string with no declared kind, inferring kind
    /// from suffix or (for bare IP literals) from the `fc00::/8` prefix.
    /// Refuses mixed forms: an IPv6 literal inside what
    /// looks like an onion/i2p field, or vice versa, is rejected rather
    /// than silently reinterpreted.
    pub fn parse(text: &str) -> Result<Address, AddressError> {
        let (host, port) = split_host_port(text)?;

        if let Some(stem) = host.strip_suffix(".onion") {
            return Address::onion_v3(stem, port);
        }
        if let Some(stem) = host.strip_suffix(".b32.i2p") {
            return Address::i2p(stem, port);
        }

        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(match ip {
                IpAddr::V4(v4) => Address::ipv4(v4, port),
                IpAddr::V6(v6) => {
                    if let Some(v4) = v6.to_ipv4_mapped() {
                        Address::ipv4(v4, port)
                    } else if is_cjdns_range(&v6) {
                        Address::cjdns(v6, port)?
                    } else {
                        Address::ipv6(v6, port)
                    }
                }
            });
        }

        Err(AddressError::UnrecognizedFormat(text.to_string()))
    }

    /// Canonical textual form, without port.
    pub fn host_string(&self) -> String {
        match &self.repr {
            Repr::V4(ip) => ip.to_string(),
            Repr::V6(ip) => ip.to_string(),
            Repr::Onion(s) => format!("{s}.onion"),
            Repr::I2p(s) => format!("{s}.b32.i2p"),
        }
    }

    /// Raw IPv6 octets, for the two kinds backed by one (`Ipv6`/`Cjdns`).
    /// `None` for onion/i2p/ipv4.
    pub fn as_ipv6(&self) -> Option<Ipv6Addr> {
        match &self.repr {
            Repr::V6(ip) => Some(*ip),
            _ => None,
        }
    }

    pub fn to_socket_string(&self) -> String {
        match &self.repr {
            Repr::V6(ip) => format!("[{ip}]:{}", self.port),
            _ => format!("{}:{}", self.host_string(), self.port),
        }
    }

    /// Build an [`Address`] from a BIP155 network-id and raw address bytes.
    /// Kind is taken directly from `network_id`, never re-derived — this
    /// is the authoritative path used when decoding `addrv2`.
    pub fn from_bip155(network_id: u8, bytes: &[u8], port: u16) -> Result<Address, AddressError> {
        match network_id {
            NET_ID_IPV4 => {
                if bytes.len() != 4 {
                    return Err(AddressError::WrongBip155Length {
                        network_id,
                        got: bytes.len(),
                    });
                }
                let octets: [u8; 4] = bytes.try_into().unwrap();
                Ok(Address::ipv4(Ipv4Addr::from(octets), port))
            }
            NET_ID_IPV6 => {
                if bytes.len() != 16 {
                    return Err(AddressError::WrongBip155Length {
                        network_id,
                        got: bytes.len(),
                    });
                }
                let octets: [u8; 16] = bytes.try_into().unwrap();
                Ok(Address::ipv6(Ipv6Addr::from(octets), port))
            }
            NET_ID_CJDNS => {
                if bytes.len() != 16 {
                    return Err(AddressError::WrongBip155Length {
                        network_id,
                        got: bytes.len(),
                    });
                }
                let octets: [u8; 16] = bytes.try_into().unwrap();
                let ip = Ipv6Addr::from(octets);
                Ok(Address {
                    kind: AddressKind::Cjdns,
                    repr: Repr::V6(ip),
                    port,
                })
            }
            NET_ID_TORV3 => {
                if bytes.len() != ONION_V3_PUBKEY_LEN {
                    return Err(AddressError::WrongBip155Length {
                        network_id,
                        got: bytes.len(),
                    });
                }
                let pubkey: [u8; ONION_V3_PUBKEY_LEN] = bytes.try_into().unwrap();
                let text = onion_v3_address_from_pubkey(&pubkey);
                Ok(Address {
                    kind: AddressKind::OnionV3,
                    repr: Repr::Onion(text),
                    port,
                })
            }
            NET_ID_I2P => {
                if bytes.len() != I2P_HASH_LEN {
                    return Err(AddressError::WrongBip155Length {
                        network_id,
                        got: bytes.len(),
                    });
                }
                let text = BASE32_NOPAD.encode(bytes).to_lowercase();
                Ok(Address {
                    kind: AddressKind::I2p,
                    repr: Repr::I2p(text),
                    port,
                })
            }
            other => Err(AddressError::UnknownNetworkId(other)),
        }
    }

    /// BIP155 binary form: the raw address bytes only (no network-id, no
    /// port, no services — those are framed by the caller at message
    /// level). For onion-v3 this is the 32-byte public key; for I2P the
    /// 32-byte destination hash.
    pub fn to_bip155_bytes(&self) -> Vec<u8> {
        match &self.repr {
            Repr::V4(ip) => ip.octets().to_vec(),
            Repr::V6(ip) => ip.octets().to_vec(),
            Repr::Onion(text) => {
                let decoded = BASE32_NOPAD
                    .decode(text.to_uppercase().as_bytes())
                    .expect("validated onion-v3 address decodes");
                decoded[..ONION_V3_PUBKEY_LEN].to_vec()
            }
            Repr::I2p(text) => BASE32_NOPAD
                .decode(text.to_uppercase().as_bytes())
                .expect("validated i2p address decodes"),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_socket_string())
    }
}

fn split_host_port(text: &str) -> Result<(String, u16), AddressError> {
    if let Some(rest) = text.strip_prefix('[') {
        let close = rest
            .find(']')
            .ok_or_else(|| AddressError::UnrecognizedFormat(text.to_string()))?;
        let host = &rest[..close];
        let after = &rest[close + 1..];
        let port_str = after
            .strip_prefix(':')
            .ok_or_else(|| AddressError::UnrecognizedFormat(text.to_string()))?;
        let port: u16 = port_str
            .parse()
            .map_err(|_| AddressError::InvalidPort(port_str.to_string()))?;
        return Ok((host.to_string(), port));
    }

    let idx = text
        .rfind(':')
        .ok_or_else(|| AddressError::UnrecognizedFormat(text.to_string()))?;
    let (host, port_str) = (&text[..idx], &text[idx + 1..]);
    let port: u16 = port_str
        .parse()
        .map_err(|_| AddressError::InvalidPort(port_str.to_string()))?;
    Ok((host.to_string(), port))
}

pub fn is_cjdns_range(ip: &Ipv6Addr) -> bool {
    ip.octets()[0] == 0xfc
}

fn validate_onion_v3(lower: &str) -> Result<(), AddressError> {
    if lower.len() != ONION_V3_ADDR_LEN || !lower.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AddressError::InvalidOnion(lower.to_string()));
    }
    let decoded = BASE32_NOPAD
        .decode(lower.to_uppercase().as_bytes())
        .map_err(|_| AddressError::InvalidOnion(lower.to_string()))?;
    if decoded.len() != ONION_V3_PUBKEY_LEN + ONION_V3_CHECKSUM_LEN + 1 {
        return Err(AddressError::InvalidOnion(lower.to_string()));
    }
    let pubkey = &decoded[..ONION_V3_PUBKEY_LEN];
    let checksum = &decoded[ONION_V3_PUBKEY_LEN..ONION_V3_PUBKEY_LEN + ONION_V3_CHECKSUM_LEN];
    let version = decoded[ONION_V3_PUBKEY_LEN + ONION_V3_CHECKSUM_LEN];
    if version != ONION_V3_VERSION {
        return Err(AddressError::InvalidOnion(lower.to_string()));
    }
    let expected = onion_v3_checksum(pubkey, version);
    if checksum != expected {
        return Err(AddressError::InvalidOnion(lower.to_string()));
    }
    Ok(())
}

/// `checksum = H(".onion checksum" || pubkey || version)[..2]`, per the Tor
/// v3 onion-service address spec.
fn onion_v3_checksum(pubkey: &[u8], version: u8) -> [u8; ONION_V3_CHECKSUM_LEN] {
    let mut hasher = Sha3_256::new();
    hasher.update(b".onion checksum");
    hasher.update(pubkey);
    hasher.update([version]);
    let digest = hasher.finalize();
    [digest[0], digest[1]]
}

fn onion_v3_address_from_pubkey(pubkey: &[u8; ONION_V3_PUBKEY_LEN]) -> String {
    let checksum = onion_v3_checksum(pubkey, ONION_V3_VERSION);
    let mut buf = Vec::with_capacity(ONION_V3_PUBKEY_LEN + ONION_V3_CHECKSUM_LEN + 1);
    buf.extend_from_slice(pubkey);
    buf.extend_from_slice(&checksum);
    buf.push(ONION_V3_VERSION);
    BASE32_NOPAD.encode(&buf).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4() {
        let a = Address::parse("1.2.3.4:8333").unwrap();
        assert_eq!(a.kind(), AddressKind::Ipv4);
        assert_eq!(a.to_socket_string(), "1.2.3.4:8333");
    }

    #[test]
    fn parses_ipv6() {
        let a = Address::parse("[2001:db8::1]:8333").unwrap();
        assert_eq!(a.kind(), AddressKind::Ipv6);
        assert_eq!(a.port(), 8333);
    }

    #[test]
    fn parses_cjdns_range_as_cjdns() {
        let a = Address::parse("[fc00::1]:8333").unwrap();
        assert_eq!(a.kind(), AddressKind::Cjdns);
    }

    #[test]
    fn onion_v3_roundtrips_through_bip155() {
        let pubkey = [7u8; ONION_V3_PUBKEY_LEN];
        let text = onion_v3_address_from_pubkey(&pubkey);
        let a = Address::onion_v3(&text, 8333).unwrap();
        assert_eq!(a.kind(), AddressKind::OnionV3);
        let bytes = a.to_bip155_bytes();
        assert_eq!(bytes, pubkey.to_vec());
        let back = Address::from_bip155(NET_ID_TORV3, &bytes, 8333).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn i2p_roundtrips_through_bip155() {
        let hash = [9u8; I2P_HASH_LEN];
        let a = Address::from_bip155(NET_ID_I2P, &hash, 0).unwrap();
        assert_eq!(a.kind(), AddressKind::I2p);
        let bytes = a.to_bip155_bytes();
        assert_eq!(bytes, hash.to_vec());
        let reparsed = Address::i2p(&a.host_string().trim_end_matches(".b32.i2p"), 0).unwrap();
        assert_eq!(reparsed, a);
    }

    #[test]
    fn same_bytes_different_network_id_are_distinct() {
        let ip: Ipv6Addr = "fc00::1".parse().unwrap();
        let as_ipv6 = Address::ipv6(ip, 1);
        let as_cjdns = Address::from_bip155(NET_ID_CJDNS, &ip.octets(), 1).unwrap();
        assert_ne!(as_ipv6, as_cjdns);
    }

    #[test]
    fn ipv4_mapped_ipv6_downcasts() {
        let a = Address::parse("[::ffff:1.2.3.4]:8333").unwrap();
        assert_eq!(a.kind(), AddressKind::Ipv4);
        assert_eq!(a.host_string(), "1.2.3.4");
    }

    #[test]
    fn rejects_unrecognized_form() {
        assert!(Address::parse("not an address").is_err());
    }

    #[test]
    fn addrv2_rejects_wrong_length() {
        let err = Address::from_bip155(NET_ID_IPV4, &[1, 2, 3], 0).unwrap_err();
        assert!(matches!(err, AddressError::WrongBip155Length { .. }));
    }

    #[test]
    fn addrv2_rejects_unknown_network_id() {
        let err = Address::from_bip155(200, &[0; 16], 0).unwrap_err();
        assert!(matches!(err, AddressError::UnknownNetworkId(200)));
    }
}
