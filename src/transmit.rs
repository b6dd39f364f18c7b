//! Pump the local file into the first host of the chain

use std::io;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::RelayError;

/// Chunk size that gives a smooth progress bar on small files.
pub const REFERENCE_CHUNK: usize = 100;

pub trait ProgressSink: Send + Sync {
    fn advance(&self, bytes: u64);
    /// `elapsed` covers the copy loop only, not connection setup.
    fn finish(&self, _bytes: u64, _elapsed: Duration) {}
    fn fail(&self, _msg: &str) {}
    fn interrupted(&self) {}
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn advance(&self, _bytes: u64) {}
}

/// Source plus counters for one connection's lifetime.
pub struct TransferSession<R> {
    source: R,
    total_bytes: u64,
    bytes_sent: u64,
}

impl<R> TransferSession<R> {
    pub fn new(source: R, total_bytes: u64) -> Self {
        Self {
            source,
            total_bytes,
            bytes_sent: 0,
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferResult {
    pub bytes_sent: u64,
    pub total_bytes: u64,
    pub elapsed: Duration,
}

pub struct Transmitter {
    chunk_size: usize,
}

impl Transmitter {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Connect to `host:port` and stream `source` into it. No retries.
    pub async fn transmit<R>(
        &self,
        source: R,
        total_bytes: u64,
        host: &str,
        port: u16,
        progress: &dyn ProgressSink,
    ) -> Result<TransferResult, RelayError>
    where
        R: AsyncRead + Unpin,
    {
        let stream = connect(host, port).await?;
        self.pump(TransferSession::new(source, total_bytes), stream, progress)
            .await
    }

    /// Copy the session's source into `sink` chunk by chunk.
    ///
    /// An empty read ends the stream normally. Both ends are closed on
    /// return, success or not.
    pub async fn pump<R, W>(
        &self,
        mut session: TransferSession<R>,
        mut sink: W,
        progress: &dyn ProgressSink,
    ) -> Result<TransferResult, RelayError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let start = Instant::now();
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            let n = match session.source.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if retryable(&e) => {
                    tokio::task::yield_now().await;
                    continue;
                }
                Err(e) => return Err(transfer_error(&session, e)),
            };
            if let Err(e) = sink.write_all(&buf[..n]).await {
                return Err(transfer_error(&session, e));
            }
            session.bytes_sent += n as u64;
            progress.advance(n as u64);
        }

        sink.flush()
            .await
            .map_err(|e| transfer_error(&session, e))?;
        sink.shutdown()
            .await
            .map_err(|e| transfer_error(&session, e))?;
        let elapsed = start.elapsed();
        progress.finish(session.bytes_sent, elapsed);

        Ok(TransferResult {
            bytes_sent: session.bytes_sent,
            total_bytes: session.total_bytes,
            elapsed,
        })
    }
}

pub async fn connect(host: &str, port: u16) -> Result<TcpStream, RelayError> {
    let connect_error = |source| RelayError::Connect {
        host: host.to_string(),
        port,
        source,
    };
    let stream = TcpStream::connect((host, port)).await.map_err(connect_error)?;
    stream.set_nodelay(true).map_err(connect_error)?;
    Ok(stream)
}

fn retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn transfer_error<R>(session: &TransferSession<R>, source: io::Error) -> RelayError {
    RelayError::Transfer {
        sent: session.bytes_sent,
        source,
    }
}
