//! Append-only result sinks: a thin trait the core depends on, backed by
//! `tokio::sync::mpsc` channels drained by one `csv`-writing task per sink.
//!
//! Grounded on the `csv` crate's writer API (reader-side idiom seen in
//! `other_examples/65e5e9cb_prospectorengine-prospector-btc__apps-census-taker-src-pipeline.rs.rs`,
//! inverted here for writing) and this crate's `tokio::sync::mpsc`-channel
//! pattern used elsewhere for event plumbing.

use std::future::Future;
use std::path::Path;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SinkError;

/// What a worker depends on to persist one record type. Nothing in
/// `net/worker.rs` or `net/controller.rs` depends on `ChannelSink`
/// directly — only on this trait — so a differently-backed sink can stand
/// in without touching the crawl logic.
pub trait ResultSink<T>: Send + Sync {
    fn send(&self, record: T) -> impl Future<Output = Result<(), SinkError>> + Send;
    fn close(&self) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// A channel-backed handle satisfies [`ResultSink`] without the worker
/// ever touching a file handle.
#[derive(Clone)]
pub struct ChannelSink<T> {
    tx: mpsc::Sender<T>,
}

impl<T: Send + 'static> ResultSink<T> for ChannelSink<T> {
    async fn send(&self, record: T) -> Result<(), SinkError> {
        self.tx.send(record).await.map_err(|_| SinkError::ChannelClosed)
    }

    /// A no-op here: the writer task drains until every clone of this
    /// sink is dropped, and the controller already waits on that
    /// `JoinHandle` to flush. Kept on the trait for a future sink backed
    /// by something that doesn't shut down on `Drop` alone.
    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Spawns the writer task and returns the sending half plus its join
/// handle, so the controller can await every writer's flush on shutdown.
pub fn spawn_csv_sink<T>(path: impl AsRef<Path>) -> Result<(ChannelSink<T>, JoinHandle<Result<(), SinkError>>), SinkError>
where
    T: Serialize + Send + 'static,
{
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(SinkError::CreateDir)?;
    }
    let (tx, mut rx) = mpsc::channel::<T>(1024);

    let handle = tokio::spawn(async move {
        let mut writer = csv::Writer::from_path(&path)?;
        while let Some(record) = rx.recv().await {
            writer.serialize(&record)?;
        }
        writer.flush().map_err(SinkError::Flush)?;
        Ok(())
    });

    Ok((ChannelSink { tx }, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Row {
        a: u32,
        b: String,
    }

    #[tokio::test]
    async fn writes_records_to_csv() {
        let dir = std::env::temp_dir().join(format!("bitcrawl-sink-test-{}", std::process::id()));
        let path = dir.join("rows.csv");

        let (sink, handle) = spawn_csv_sink::<Row>(&path).unwrap();
        sink.send(Row { a: 1, b: "x".to_string() }).await.unwrap();
        sink.send(Row { a: 2, b: "y".to_string() }).await.unwrap();
        drop(sink);
        handle.await.unwrap().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("a,b"));
        assert!(contents.contains("1,x"));
        assert!(contents.contains("2,y"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
