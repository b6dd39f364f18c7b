//! One complete distribution run
//!
//! Build the chain, connect, stream, then tear down. Teardown order depends
//! on whether the first relay ever got a connection: once it has, closing
//! our end drains the chain and the relays are joined before cleanup.
//! Without one, the listeners would wait forever, so cleanup goes first.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::AsyncRead;

use crate::chain::ChainBuilder;
use crate::config::{ChainSpec, TransferConfig};
use crate::error::RelayError;
use crate::executor::RemoteExecutor;
use crate::journal::{HostEntry, RunEntry, RunStatus};
use crate::lifecycle::{HostReport, LifecycleCoordinator};
use crate::transmit::{self, ProgressSink, TransferSession, Transmitter};

/// The local file being distributed.
#[derive(Debug)]
pub struct SourceFile<R> {
    pub path: PathBuf,
    pub reader: R,
    pub len: u64,
}

pub async fn open_source(path: &Path) -> Result<SourceFile<tokio::fs::File>, RelayError> {
    let startup = |e: std::io::Error| {
        RelayError::Startup(format!("failed to open input file {}: {}", path.display(), e))
    };
    let reader = tokio::fs::File::open(path).await.map_err(startup)?;
    let meta = reader.metadata().await.map_err(startup)?;
    if !meta.is_file() {
        return Err(RelayError::Startup(format!(
            "input {} is not a regular file",
            path.display()
        )));
    }
    Ok(SourceFile {
        path: path.to_path_buf(),
        reader,
        len: meta.len(),
    })
}

#[derive(Debug)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub bytes_sent: u64,
    pub error: Option<RelayError>,
    pub reports: Vec<HostReport>,
}

impl RunOutcome {
    fn failed(error: RelayError, bytes_sent: u64, reports: Vec<HostReport>) -> Self {
        Self {
            status: RunStatus::Failed,
            bytes_sent,
            error: Some(error),
            reports,
        }
    }

    pub fn journal_entry(&self, source: &Path, chain: &ChainSpec, config: &TransferConfig) -> RunEntry {
        let mut entry = RunEntry::now(
            source,
            chain.hosts(),
            config.listen_port,
            &config.output_filename,
            self.status,
        );
        entry.bytes_sent = self.bytes_sent;
        entry.error = self.error.as_ref().map(ToString::to_string);
        entry.reports = self.reports.iter().map(HostEntry::from).collect();
        entry
    }

    /// Process result: any error fails the run, and so does an interrupt.
    pub fn into_result(self) -> anyhow::Result<()> {
        match (self.status, self.error) {
            (_, Some(e)) => Err(e.into()),
            (RunStatus::Interrupted, None) => anyhow::bail!("transfer interrupted"),
            _ => Ok(()),
        }
    }
}

/// Counts what reached the socket, for runs that end without a result.
struct Tally<'a> {
    inner: &'a dyn ProgressSink,
    sent: AtomicU64,
}

impl<'a> Tally<'a> {
    fn new(inner: &'a dyn ProgressSink) -> Self {
        Self {
            inner,
            sent: AtomicU64::new(0),
        }
    }

    fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

impl ProgressSink for Tally<'_> {
    fn advance(&self, bytes: u64) {
        self.sent.fetch_add(bytes, Ordering::Relaxed);
        self.inner.advance(bytes);
    }

    fn finish(&self, bytes: u64, elapsed: Duration) {
        self.inner.finish(bytes, elapsed);
    }

    fn fail(&self, msg: &str) {
        self.inner.fail(msg);
    }

    fn interrupted(&self) {
        self.inner.interrupted();
    }
}

/// Distribute `source` along `chain` and report on every host.
///
/// `make_progress` is only called once the first relay has accepted the
/// connection. Every path through here runs `finalize` on every host and
/// joins every relay that was launched.
pub async fn run_chain<R, P>(
    coordinator: &LifecycleCoordinator,
    executor: &dyn RemoteExecutor,
    chain: &ChainSpec,
    config: &TransferConfig,
    source: SourceFile<R>,
    make_progress: P,
) -> RunOutcome
where
    R: AsyncRead + Unpin,
    P: FnOnce(u64) -> Box<dyn ProgressSink>,
{
    let logger = coordinator.logger();

    // lay some pipe
    let built = ChainBuilder::new(executor, config, logger)
        .with_cancel(coordinator.cancel_token())
        .build(chain)
        .await;
    let handles = match built {
        Ok(h) => h,
        Err(partial) => {
            let reports = coordinator
                .finalize_then_join(executor, chain, config, partial.dispatched)
                .await;
            return RunOutcome::failed(partial.error, 0, reports);
        }
    };

    let connected = coordinator
        .guard(async {
            tokio::time::sleep(config.startup_wait).await;
            transmit::connect(chain.first(), config.listen_port).await
        })
        .await;
    let stream = match connected {
        Some(Ok(stream)) => stream,
        Some(Err(e)) => {
            logger.error("connect", &e.to_string());
            let reports = coordinator
                .finalize_then_join(executor, chain, config, handles)
                .await;
            return RunOutcome::failed(e, 0, reports);
        }
        None => {
            let reports = coordinator
                .finalize_then_join(executor, chain, config, handles)
                .await;
            return RunOutcome {
                status: RunStatus::Interrupted,
                bytes_sent: 0,
                error: None,
                reports,
            };
        }
    };

    logger.transfer_start(&source.path, chain.first(), source.len);
    let progress = make_progress(source.len);
    let tally = Tally::new(progress.as_ref());
    let transmitter = Transmitter::new(config.chunk_size);
    let sent = coordinator
        .guard(transmitter.pump(TransferSession::new(source.reader, source.len), stream, &tally))
        .await;

    let (status, bytes_sent, error) = match sent {
        Some(Ok(res)) => {
            logger.transfer_done(res.bytes_sent, res.elapsed.as_secs_f64());
            (RunStatus::Completed, res.bytes_sent, None)
        }
        Some(Err(e)) => {
            tally.fail(&e.to_string());
            logger.error("transmit", &e.to_string());
            (RunStatus::Failed, tally.sent(), Some(e))
        }
        None => {
            tally.interrupted();
            (RunStatus::Interrupted, tally.sent(), None)
        }
    };

    let reports = coordinator
        .join_then_finalize(executor, chain, config, handles)
        .await;
    RunOutcome {
        status,
        bytes_sent,
        error,
        reports,
    }
}
