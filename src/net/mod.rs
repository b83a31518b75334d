//! P2P networking layer: wire codec, per-family transports, node sessions,
//! the frontier, the worker pool, and the crawl controller that wires them
//! together.

pub mod codec;
pub mod controller;
pub mod frontier;
pub mod message;
pub mod sam;
pub mod sampler;
pub mod session;
pub mod transport;
pub mod worker;

pub use controller::{run_crawl, MAINNET_MAGIC, PROTOCOL_VERSION, USER_AGENT};
pub use frontier::Frontier;
pub use message::{AddrEntry, PingPongPayload, VersionPayload};
pub use sam::SamSession;
pub use sampler::Sampler;
pub use session::{
    run_session, to_advertised_records, AdvertisedAddressRecord, ReachableNodeRecord,
    SessionConfig,
};
pub use transport::{TimeoutTriple, Transport, TransportConfig};
pub use worker::{run_worker, WorkerContext};
