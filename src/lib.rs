pub mod address;
pub mod config;
pub mod error;
pub mod net;
pub mod sink;

pub use address::{Address, AddressKind};
pub use config::CrawlConfig;
pub use error::{AddressError, CodecError, CrawlError, SessionError, SinkError, TransportError};
pub use net::run_crawl;
