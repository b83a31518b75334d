//! Fixed-N worker pool: drains the frontier, runs one session per address,
//! feeds both result sinks, and re-offers every address the session
//! discovered. Workers share no mutable state beyond the frontier and the
//! two sinks.
//!
//! Grounded on the connection-manager loop shape this crate's networking
//! module uses elsewhere (a `tokio::sync::Mutex`-guarded shared map plus an
//! `AtomicUsize` counter), adapted here to a pull-based frontier instead of
//! a push-based connection table.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::net::frontier::Frontier;
use crate::net::sampler::Sampler;
use crate::net::session::{
    run_session, to_advertised_records, AdvertisedAddressRecord, ReachableNodeRecord, SessionConfig,
};
use crate::net::transport::Transport;
use crate::sink::{ChannelSink, ResultSink};

/// Every shared dependency a worker needs; cheap to clone, since
/// everything inside is already `Arc`-wrapped or `Copy`.
#[derive(Clone)]
pub struct WorkerContext {
    pub frontier: Arc<Frontier>,
    pub transport: Arc<Transport>,
    pub session_config: SessionConfig,
    pub sampler: Arc<Sampler>,
    pub record_addr_data: bool,
    pub reachable_sink: ChannelSink<ReachableNodeRecord>,
    pub advertised_sink: ChannelSink<AdvertisedAddressRecord>,
    pub cancel: watch::Receiver<bool>,
}

/// Resolves once `cancel`'s value becomes `true`. Checks the current value
/// first, so a receiver that subscribed after cancellation already fired
/// still resolves immediately rather than waiting for a change that already
/// happened. Never resolves if the sender is dropped without cancelling.
pub(crate) async fn wait_for_cancel(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Runs until the frontier closes and `take()` returns `None`, or
/// cancellation fires. Every blocking point — the `take()` wait and the
/// session itself — races against the shared cancellation signal, so a
/// worker stuck mid-handshake against an unresponsive peer aborts instead
/// of riding out its full timeout.
#[instrument(skip(ctx), fields(worker_id = worker_id))]
pub async fn run_worker(worker_id: usize, ctx: WorkerContext) {
    let mut cancel = ctx.cancel.clone();
    loop {
        let address = tokio::select! {
            addr = ctx.frontier.take() => addr,
            _ = wait_for_cancel(&mut cancel) => {
                ctx.frontier.close().await;
                None
            }
        };
        let Some(address) = address else {
            break;
        };

        let should_sample = ctx.sampler.sample().await;
        let timeouts = ctx.transport.timeouts_for(address.kind());
        let outcome = tokio::select! {
            outcome = run_session(&address, &ctx.transport, timeouts, &ctx.session_config) => outcome,
            _ = wait_for_cancel(&mut cancel) => {
                debug!(address = %address, "session cancelled mid-flight, dropping its record");
                ctx.frontier.mark_done().await;
                break;
            }
        };

        debug!(
            address = %address,
            handshake_successful = outcome.record.handshake_successful,
            num_addresses = outcome.record.num_addresses,
            "session finished"
        );

        for entry in &outcome.discovered {
            ctx.frontier
                .offer_with_age(entry.address.clone(), entry.timestamp)
                .await;
        }

        if ctx.record_addr_data && should_sample && !outcome.discovered.is_empty() {
            for record in to_advertised_records(&address, &outcome.discovered) {
                if ctx.advertised_sink.send(record).await.is_err() {
                    warn!(address = %address, "advertised-address sink closed, dropping worker");
                    ctx.frontier.mark_done().await;
                    return;
                }
            }
        }

        if ctx.reachable_sink.send(outcome.record).await.is_err() {
            warn!(address = %address, "reachable-nodes sink closed, dropping worker");
            ctx.frontier.mark_done().await;
            return;
        }

        ctx.frontier.mark_done().await;
    }
    info!(worker_id, "worker exiting, frontier closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::net::transport::{TimeoutTriple, TransportConfig};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn timeout_triple() -> TimeoutTriple {
        TimeoutTriple {
            connect: Duration::from_millis(500),
            message: Duration::from_millis(500),
            getaddr: Duration::from_millis(300),
        }
    }

    #[tokio::test]
    async fn worker_drains_frontier_and_records_unreachable_node() {
        let frontier = Arc::new(Frontier::new(crate::net::frontier::DEFAULT_MAX_ADDRESS_AGE));
        let addr = Address::ipv4(Ipv4Addr::LOCALHOST, 1);
        frontier.offer(addr.clone()).await;
        frontier.close().await;

        let triple = timeout_triple();
        let transport_config = TransportConfig {
            ip: triple,
            tor: triple,
            i2p: triple,
            cjdns: triple,
            tor_proxy_host: "127.0.0.1".to_string(),
            tor_proxy_port: 1,
            i2p_sam_host: "127.0.0.1".to_string(),
            i2p_sam_port: 1,
        };
        let transport = Arc::new(Transport::new(transport_config));
        let session_config = SessionConfig {
            magic: [0xf9, 0xbe, 0xb4, 0xd9],
            protocol_version: 70016,
            user_agent: "/bitcrawl:test/".to_string(),
            handshake_attempts: 1,
            getaddr_retries: 1,
        };
        let sampler = Arc::new(Sampler::new(1.0, 1));

        let (reachable_sink, reachable_handle) =
            crate::sink::spawn_csv_sink(std::env::temp_dir().join(format!(
                "bitcrawl-worker-test-{}-reachable.csv",
                std::process::id()
            )))
            .unwrap();
        let (advertised_sink, advertised_handle) =
            crate::sink::spawn_csv_sink(std::env::temp_dir().join(format!(
                "bitcrawl-worker-test-{}-advertised.csv",
                std::process::id()
            )))
            .unwrap();

        let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
        let ctx = WorkerContext {
            frontier: frontier.clone(),
            transport,
            session_config,
            sampler,
            record_addr_data: true,
            reachable_sink,
            advertised_sink,
            cancel: cancel_rx,
        };

        run_worker(0, ctx.clone()).await;

        drop(ctx);
        reachable_handle.await.unwrap().unwrap();
        advertised_handle.await.unwrap().unwrap();

        assert!(frontier.is_quiescent().await);
    }

    #[tokio::test]
    async fn cancellation_stops_a_worker_blocked_waiting_for_work() {
        let frontier = Arc::new(Frontier::new(crate::net::frontier::DEFAULT_MAX_ADDRESS_AGE));

        let triple = timeout_triple();
        let transport_config = TransportConfig {
            ip: triple,
            tor: triple,
            i2p: triple,
            cjdns: triple,
            tor_proxy_host: "127.0.0.1".to_string(),
            tor_proxy_port: 1,
            i2p_sam_host: "127.0.0.1".to_string(),
            i2p_sam_port: 1,
        };
        let transport = Arc::new(Transport::new(transport_config));
        let session_config = SessionConfig {
            magic: [0xf9, 0xbe, 0xb4, 0xd9],
            protocol_version: 70016,
            user_agent: "/bitcrawl:test/".to_string(),
            handshake_attempts: 1,
            getaddr_retries: 1,
        };
        let sampler = Arc::new(Sampler::new(1.0, 1));

        let (reachable_sink, reachable_handle) =
            crate::sink::spawn_csv_sink(std::env::temp_dir().join(format!(
                "bitcrawl-worker-test-cancel-{}-reachable.csv",
                std::process::id()
            )))
            .unwrap();
        let (advertised_sink, advertised_handle) =
            crate::sink::spawn_csv_sink(std::env::temp_dir().join(format!(
                "bitcrawl-worker-test-cancel-{}-advertised.csv",
                std::process::id()
            )))
            .unwrap();

        let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
        let ctx = WorkerContext {
            frontier: frontier.clone(),
            transport,
            session_config,
            sampler,
            record_addr_data: true,
            reachable_sink,
            advertised_sink,
            cancel: cancel_rx,
        };

        // The frontier is never offered anything and never closed, so
        // without cancellation this worker would block forever in `take()`.
        cancel_tx.send(true).unwrap();
        let handle = tokio::spawn(run_worker(0, ctx.clone()));
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker should exit promptly on cancellation")
            .unwrap();

        drop(ctx);
        reachable_handle.await.unwrap().unwrap();
        advertised_handle.await.unwrap().unwrap();
    }
}
