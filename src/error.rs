use thiserror::Error;

/// Failures while parsing or canonicalizing an [`crate::address::Address`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("unrecognized address format: {0}")]
    UnrecognizedFormat(String),
    #[error("mixed address form: {0}")]
    MixedForm(String),
    #[error("invalid onion-v3 address: {0}")]
    InvalidOnion(String),
    #[error("invalid i2p b32 address: {0}")]
    InvalidI2p(String),
    #[error("address outside fc00::/8: {0}")]
    NotCjdns(String),
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("wrong length ({got}) for network-id {network_id}")]
    WrongBip155Length { network_id: u8, got: usize },
    #[error("unknown bip155 network-id: {0}")]
    UnknownNetworkId(u8),
}

/// Failures opening or using a transport stream. Terminal for the node being dialed.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),
    #[error("connect refused or failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("socks5 negotiation failed: {0}")]
    Socks5(#[from] tokio_socks::Error),
    #[error("sam session error: {0}")]
    Sam(String),
    #[error("cjdns destination not in fc00::/8: {0}")]
    NotCjdns(std::net::Ipv6Addr),
    #[error("stream io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("operation cancelled")]
    Cancelled,
}

/// Bitcoin wire-codec failures. Terminal for the session; the node is
/// recorded using whatever was learned so far.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("bad magic bytes")]
    BadMagic,
    #[error("bad checksum")]
    BadChecksum,
    #[error("declared payload length {0} exceeds cap {1}")]
    PayloadTooLarge(u32, u32),
    #[error("command contains non-ascii bytes")]
    BadCommand,
    #[error("malformed var-int")]
    BadVarInt,
    #[error("malformed var-string")]
    BadVarString,
    #[error("addr/addrv2 count {0} exceeds cap 1000")]
    TooManyAddresses(u64),
    #[error("unknown bip155 network-id {0}")]
    UnknownNetworkId(u8),
    #[error("address length {got} does not match network-id {network_id}")]
    WrongAddressLength { network_id: u8, got: usize },
    #[error("payload truncated")]
    Truncated,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a single node session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("handshake timed out or connection closed before verack")]
    HandshakeFailed,
    #[error("operation cancelled")]
    Cancelled,
}

/// Result-sink failures. Fatal to the crawl; the controller cancels all
/// workers on this.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to create result directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("csv write error: {0}")]
    Csv(#[from] csv::Error),
    #[error("flush error: {0}")]
    Flush(#[source] std::io::Error),
    #[error("sink channel closed")]
    ChannelClosed,
}

/// Top-level failure of a whole crawl run: sink setup or IO failed. A SAM
/// session failing to establish is not one of these — it's a per-session
/// transport failure like any other, recorded on the node it was opened
/// for rather than aborting the crawl.
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error(transparent)]
    Sink(#[from] SinkError),
}
