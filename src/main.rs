//! bitcrawl — Bitcoin peer-to-peer network crawler.
//!
//! Dials every reachable node across IPv4, IPv6, Tor onion-v3, I2P, and
//! CJDNS, records handshake and `getaddr` results to CSV, and follows
//! discovered addresses until the frontier is exhausted.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Sender};
use std::thread;
use std::time::Duration;

use bitcrawl::address::Address;
use bitcrawl::config::CrawlConfig;
use bitcrawl::net::transport::TimeoutTriple;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// A `tracing_subscriber` writer that hands formatted log lines off to a
/// dedicated OS thread over a channel, so a slow disk never blocks a
/// worker's tracing events. No `tracing-appender` dependency: this crate
/// already reaches for a channel-plus-writer-thread shape in `sink.rs`, and
/// this is the same idea applied to one file instead of per-record CSV rows.
#[derive(Clone)]
struct DebugLogWriter {
    tx: Sender<Vec<u8>>,
}

impl DebugLogWriter {
    fn open(path: impl AsRef<Path>) -> io::Result<DebugLogWriter> {
        let mut file = std::fs::File::create(path)?;
        let (tx, rx) = channel::<Vec<u8>>();
        thread::spawn(move || {
            while let Ok(buf) = rx.recv() {
                if file.write_all(&buf).is_err() {
                    break;
                }
            }
        });
        Ok(DebugLogWriter { tx })
    }
}

impl Write for DebugLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.tx.send(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for DebugLogWriter {
    type Writer = DebugLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Installs the stderr `fmt` layer every run gets, plus, when
/// `store_debug_log` is set, a second non-ansi `fmt` layer writing to
/// `debug.log` under the run's result directory.
fn init_tracing(config: &CrawlConfig) {
    let filter = EnvFilter::from_default_env().add_directive("bitcrawl=info".parse().unwrap());
    let stderr_layer = tracing_subscriber::fmt::layer();

    let debug_dir = config.result_path.join(config.timestamp.to_string());
    let file_layer = if config.store_debug_log {
        match std::fs::create_dir_all(&debug_dir).and_then(|_| DebugLogWriter::open(debug_dir.join("debug.log"))) {
            Ok(writer) => Some(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer)),
            Err(e) => {
                eprintln!("failed to open debug.log: {e}");
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

#[derive(Parser)]
#[command(name = "bitcrawl", version, about = "Bitcoin P2P network crawler")]
struct CliArgs {
    /// One bootstrap address, `host:port`. May be repeated.
    #[arg(long = "bootstrap")]
    bootstrap: Vec<String>,

    /// File of bootstrap addresses, one `host:port` per line.
    #[arg(long)]
    bootstrap_file: Option<PathBuf>,

    #[arg(long, default_value_t = 64)]
    num_workers: usize,

    /// Fraction of reachable nodes whose advertised addresses are persisted.
    #[arg(long, default_value_t = 1.0)]
    node_share: f64,

    /// Seconds to wait before dialing, letting local transports warm up.
    #[arg(long, default_value_t = 0)]
    delay_start: u64,

    #[arg(long, default_value_t = 3)]
    handshake_attempts: u32,

    #[arg(long, default_value_t = 2)]
    getaddr_retries: u32,

    /// Disable persisting advertised addresses entirely, regardless of `node-share`.
    #[arg(long)]
    no_record_addr_data: bool,

    #[arg(long, default_value_t = 5)]
    ip_connect_timeout: u64,
    #[arg(long, default_value_t = 10)]
    ip_message_timeout: u64,
    #[arg(long, default_value_t = 30)]
    ip_getaddr_timeout: u64,

    #[arg(long, default_value_t = 30)]
    tor_connect_timeout: u64,
    #[arg(long, default_value_t = 30)]
    tor_message_timeout: u64,
    #[arg(long, default_value_t = 60)]
    tor_getaddr_timeout: u64,

    #[arg(long, default_value_t = 30)]
    i2p_connect_timeout: u64,
    #[arg(long, default_value_t = 30)]
    i2p_message_timeout: u64,
    #[arg(long, default_value_t = 60)]
    i2p_getaddr_timeout: u64,

    #[arg(long, default_value_t = 10)]
    cjdns_connect_timeout: u64,
    #[arg(long, default_value_t = 15)]
    cjdns_message_timeout: u64,
    #[arg(long, default_value_t = 30)]
    cjdns_getaddr_timeout: u64,

    #[arg(long, default_value = "127.0.0.1")]
    tor_proxy_host: String,
    #[arg(long, default_value_t = 9050)]
    tor_proxy_port: u16,

    #[arg(long, default_value = "127.0.0.1")]
    i2p_sam_host: String,
    #[arg(long, default_value_t = 7656)]
    i2p_sam_port: u16,

    #[arg(long, default_value = "./results")]
    result_path: PathBuf,

    /// Write `debug.log` (full tracing output) and `config.json` (the
    /// resolved configuration) alongside the result CSVs.
    #[arg(long)]
    store_debug_log: bool,

    /// Seed for the node-share sampling RNG. Defaults to the run timestamp.
    #[arg(long)]
    seed: Option<u64>,
}

fn timeout_triple(connect: u64, message: u64, getaddr: u64) -> TimeoutTriple {
    TimeoutTriple {
        connect: Duration::from_secs(connect),
        message: Duration::from_secs(message),
        getaddr: Duration::from_secs(getaddr),
    }
}

fn load_bootstrap(args: &CliArgs) -> Result<Vec<Address>, String> {
    let mut lines: Vec<String> = args.bootstrap.clone();

    if let Some(path) = &args.bootstrap_file {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read bootstrap file {}: {e}", path.display()))?;
        lines.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string),
        );
    }

    lines
        .iter()
        .map(|l| Address::parse(l).map_err(|e| format!("bad bootstrap address {l:?}: {e}")))
        .collect()
}

fn build_config(args: &CliArgs) -> CrawlConfig {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    CrawlConfig {
        num_workers: args.num_workers,
        node_share: args.node_share,
        delay_start: Duration::from_secs(args.delay_start),
        handshake_attempts: args.handshake_attempts,
        getaddr_retries: args.getaddr_retries,
        record_addr_data: !args.no_record_addr_data,
        ip_timeouts: timeout_triple(args.ip_connect_timeout, args.ip_message_timeout, args.ip_getaddr_timeout),
        tor_timeouts: timeout_triple(args.tor_connect_timeout, args.tor_message_timeout, args.tor_getaddr_timeout),
        i2p_timeouts: timeout_triple(args.i2p_connect_timeout, args.i2p_message_timeout, args.i2p_getaddr_timeout),
        cjdns_timeouts: timeout_triple(
            args.cjdns_connect_timeout,
            args.cjdns_message_timeout,
            args.cjdns_getaddr_timeout,
        ),
        tor_proxy_host: args.tor_proxy_host.clone(),
        tor_proxy_port: args.tor_proxy_port,
        i2p_sam_host: args.i2p_sam_host.clone(),
        i2p_sam_port: args.i2p_sam_port,
        result_path: args.result_path.clone(),
        store_debug_log: args.store_debug_log,
        timestamp: now,
        seed: args.seed.unwrap_or(now as u64),
    }
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    let config = build_config(&args);
    init_tracing(&config);

    let bootstrap = match load_bootstrap(&args) {
        Ok(addrs) if !addrs.is_empty() => addrs,
        Ok(_) => {
            error!("no bootstrap addresses given; pass --bootstrap or --bootstrap-file");
            return;
        }
        Err(e) => {
            error!("{e}");
            return;
        }
    };

    info!(
        num_workers = config.num_workers,
        node_share = config.node_share,
        bootstrap_count = bootstrap.len(),
        "starting crawl"
    );

    if config.store_debug_log {
        let debug_dir = config.result_path.join(config.timestamp.to_string());
        if let Err(e) = std::fs::create_dir_all(&debug_dir) {
            error!("failed to create result directory: {e}");
            return;
        }
        if let Ok(json) = serde_json::to_string_pretty(&config) {
            let _ = std::fs::write(debug_dir.join("config.json"), json);
        }
    }

    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, draining in-flight sessions");
            let _ = cancel_tx.send(true);
        }
    });

    if let Err(e) = bitcrawl::net::run_crawl(config, bootstrap, cancel_rx).await {
        error!("crawl failed: {e}");
    }
}
