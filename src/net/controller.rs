//! Owns every shared resource for one crawl: the frontier, the transport
//! (which lazily owns the SAM session, if one ends up needed), both sinks,
//! the sampler, and the worker pool. Runs the collapsed single-phase design
//! end to end and returns once the frontier is quiesced, cancelled, or a
//! sink has failed, and every writer task has flushed.
//!
//! Grounded on this crate's `main.rs` event-loop-plus-status-printer shape
//! (a periodic `tokio::time::interval` tick, used here for the quiescence
//! poll instead of a status print).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::address::Address;
use crate::config::CrawlConfig;
use crate::error::{CrawlError, SinkError};
use crate::net::frontier::{Frontier, DEFAULT_MAX_ADDRESS_AGE};
use crate::net::sampler::Sampler;
use crate::net::session::{AdvertisedAddressRecord, ReachableNodeRecord, SessionConfig};
use crate::net::transport::Transport;
use crate::net::worker::{run_worker, wait_for_cancel, WorkerContext};
use crate::sink::spawn_csv_sink;

/// Bitcoin mainnet magic bytes. The crawler only ever dials mainnet peers;
/// there is no config option for network selection in the option list this
/// expands.
pub const MAINNET_MAGIC: [u8; 4] = [0xf9, 0xbe, 0xb4, 0xd9];
pub const PROTOCOL_VERSION: i32 = 70016;
pub const USER_AGENT: &str = "/bitcrawl:0.1.0/";

const QUIESCENCE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Runs one crawl to completion. Shuts down on the first of three signals:
/// the frontier quiesces naturally, the caller-supplied `cancel` fires
/// (e.g. ctrl-c), or one of the two sink writer tasks exits early — a sink
/// write failure is fatal to the whole crawl, not just the worker that
/// happened to be writing when it occurred, so it cancels every other
/// worker too rather than letting them run until their own next write
/// happens to fail. Either way, workers are awaited and both sinks are
/// flushed before returning, so a cancelled run still leaves every record
/// collected up to that point on disk.
#[instrument(skip(config, bootstrap, cancel), fields(num_workers = config.num_workers, node_share = config.node_share))]
pub async fn run_crawl(
    config: CrawlConfig,
    bootstrap: Vec<Address>,
    cancel: watch::Receiver<bool>,
) -> Result<(), CrawlError> {
    if !config.delay_start.is_zero() {
        info!(delay_secs = config.delay_start.as_secs(), "waiting for transports to warm up");
        tokio::time::sleep(config.delay_start).await;
    }

    let result_dir = config.result_path.join(config.timestamp.to_string());

    let transport = Arc::new(Transport::new(config.transport_config()));
    let frontier = Arc::new(Frontier::new(DEFAULT_MAX_ADDRESS_AGE));
    let sampler = Arc::new(Sampler::new(config.node_share, config.seed));

    for addr in bootstrap {
        frontier.offer(addr).await;
    }

    let (reachable_sink, mut reachable_handle) =
        spawn_csv_sink::<ReachableNodeRecord>(result_dir.join("reachable_nodes.csv"))?;
    let (advertised_sink, mut advertised_handle) =
        spawn_csv_sink::<AdvertisedAddressRecord>(result_dir.join("advertised_addresses.csv"))?;

    let session_config = SessionConfig {
        magic: MAINNET_MAGIC,
        protocol_version: PROTOCOL_VERSION,
        user_agent: USER_AGENT.to_string(),
        handshake_attempts: config.handshake_attempts,
        getaddr_retries: config.getaddr_retries,
    };

    // Every worker watches `internal_rx`, not `cancel` directly — it is
    // the single signal that both the caller's `cancel` and a sink
    // failure detected below feed into.
    let (internal_tx, internal_rx) = watch::channel(false);
    let forward_tx = internal_tx.clone();
    let mut external_cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for_cancel(&mut external_cancel).await;
        let _ = forward_tx.send(true);
    });

    let ctx = WorkerContext {
        frontier: frontier.clone(),
        transport,
        session_config,
        sampler,
        record_addr_data: config.record_addr_data,
        reachable_sink,
        advertised_sink,
        cancel: internal_rx.clone(),
    };

    let mut workers = Vec::with_capacity(config.num_workers);
    for worker_id in 0..config.num_workers {
        workers.push(tokio::spawn(run_worker(worker_id, ctx.clone())));
    }

    let mut reachable_early: Option<Result<(), SinkError>> = None;
    let mut advertised_early: Option<Result<(), SinkError>> = None;
    let mut cancel_for_shutdown = internal_rx.clone();
    loop {
        tokio::select! {
            _ = wait_for_quiescence(&frontier) => break,
            _ = wait_for_cancel(&mut cancel_for_shutdown) => {
                info!("cancellation received, draining in-flight workers");
                break;
            }
            res = &mut reachable_handle, if reachable_early.is_none() => {
                warn!("reachable-nodes sink exited early, cancelling the rest of the crawl");
                reachable_early = Some(res.map_err(|_| SinkError::ChannelClosed).and_then(|r| r));
                let _ = internal_tx.send(true);
                break;
            }
            res = &mut advertised_handle, if advertised_early.is_none() => {
                warn!("advertised-addresses sink exited early, cancelling the rest of the crawl");
                advertised_early = Some(res.map_err(|_| SinkError::ChannelClosed).and_then(|r| r));
                let _ = internal_tx.send(true);
                break;
            }
        }
    }
    frontier.close().await;

    for worker in workers {
        let _ = worker.await;
    }

    drop(ctx);
    let reachable_result = match reachable_early {
        Some(r) => r,
        None => reachable_handle.await.map_err(|_| SinkError::ChannelClosed)?,
    };
    let advertised_result = match advertised_early {
        Some(r) => r,
        None => advertised_handle.await.map_err(|_| SinkError::ChannelClosed)?,
    };
    reachable_result?;
    advertised_result?;

    info!("crawl complete");
    Ok(())
}

async fn wait_for_quiescence(frontier: &Frontier) {
    let mut interval = tokio::time::interval(QUIESCENCE_POLL_INTERVAL);
    loop {
        interval.tick().await;
        if frontier.is_quiescent().await {
            return;
        }
    }
}
