//! A minimal SAM v3 client: HELLO, SESSION CREATE, STREAM CONNECT. No
//! published crate for this protocol exists (see `DESIGN.md`), so this is
//! a hand-rolled line-oriented client over `tokio::net::TcpStream`, in the
//! same direct-socket style this crate uses throughout its connection
//! handling.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::TransportError;

const SAM_MIN_VERSION: &str = "3.0";
const SAM_MAX_VERSION: &str = "3.3";

/// One long-lived SAM session, shared by every I2P stream in the crawl.
/// Opening one session per stream is a known historical socket leak; this
/// type exists specifically so the controller can open it exactly once.
pub struct SamSession {
    host: String,
    port: u16,
    session_id: String,
    /// Guards the whole STREAM CONNECT sequence: SAM commands that are
    /// themselves serial must be protected by a mutex around the SAM
    /// control channel. The original HELLO/SESSION CREATE socket is kept
    /// alive here too; dropping it would end the session.
    control: Mutex<TcpStream>,
}

impl SamSession {
    pub async fn create(host: &str, port: u16, connect_timeout: Duration) -> Result<SamSession, TransportError> {
        let mut control = timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TransportError::ConnectTimeout(connect_timeout))?
            .map_err(TransportError::Connect)?;

        send_line(
            &mut control,
            &format!("HELLO VERSION MIN={SAM_MIN_VERSION} MAX={SAM_MAX_VERSION}\n"),
        )
        .await?;
        let reply = read_line(&mut control).await?;
        if !reply.contains("RESULT=OK") {
            return Err(TransportError::Sam(format!("HELLO failed: {reply}")));
        }

        let session_id = format!("bitcrawl-{}", std::process::id());
        send_line(
            &mut control,
            &format!("SESSION CREATE STYLE=STREAM ID={session_id} DESTINATION=TRANSIENT\n"),
        )
        .await?;
        let reply = read_line(&mut control).await?;
        if !reply.contains("RESULT=OK") {
            return Err(TransportError::Sam(format!("SESSION CREATE failed: {reply}")));
        }

        Ok(SamSession {
            host: host.to_string(),
            port,
            session_id,
            control: Mutex::new(control),
        })
    }

    /// Open one logical I2P stream to `destination` (a `.b32.i2p`
    /// hostname) via `STREAM CONNECT`. Opens a fresh TCP socket to the SAM
    /// bridge for the data path, as SAM v3 requires, while serializing the
    /// command exchange itself against the shared session.
    pub async fn connect_stream(
        &self,
        destination: &str,
        connect_timeout: Duration,
    ) -> Result<TcpStream, TransportError> {
        let _guard = self.control.lock().await;

        let mut stream = timeout(connect_timeout, TcpStream::connect((self.host.as_str(), self.port)))
            .await
            .map_err(|_| TransportError::ConnectTimeout(connect_timeout))?
            .map_err(TransportError::Connect)?;

        let cmd = format!(
            "STREAM CONNECT ID={} DESTINATION={} SILENT=false\n",
            self.session_id, destination
        );
        timeout(connect_timeout, send_line(&mut stream, &cmd))
            .await
            .map_err(|_| TransportError::ConnectTimeout(connect_timeout))??;

        let reply = timeout(connect_timeout, read_line(&mut stream))
            .await
            .map_err(|_| TransportError::ConnectTimeout(connect_timeout))??;
        if !reply.contains("RESULT=OK") {
            return Err(TransportError::Sam(format!("STREAM CONNECT failed: {reply}")));
        }

        Ok(stream)
    }
}

async fn send_line(stream: &mut TcpStream, line: &str) -> Result<(), TransportError> {
    stream.write_all(line.as_bytes()).await?;
    Ok(())
}

/// Reads one `\n`-terminated line byte-by-byte, so no data the peer sent
/// immediately after the reply (the start of the Bitcoin handshake, once a
/// `STREAM CONNECT` succeeds) is swallowed into a buffer we then discard.
async fn read_line(stream: &mut TcpStream) -> Result<String, TransportError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            break;
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&line).trim().to_string())
}
