//! Joining relays and the final cleanup pass
//!
//! Remote relays are never killed from here; the `finalize` pass is what
//! clears stale listeners and fifos. A relay that never saw a connection
//! only exits once `finalize` has run on its host.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{ChainSpec, TransferConfig};
use crate::error::RelayError;
use crate::executor::{DispatchHandle, RemoteExecutor};
use crate::logger::Logger;
use crate::relay;

/// Outcome of verifying one host.
#[derive(Debug)]
pub struct HostReport {
    pub host: String,
    pub outcome: Result<String, RelayError>,
}

impl HostReport {
    /// `host: <ls -l output>` or `host: <error>`.
    pub fn line(&self) -> String {
        match &self.outcome {
            Ok(out) => format!("{}: {}", self.host, out.trim_end()),
            Err(e) => format!("{}: {}", self.host, e),
        }
    }
}

pub struct LifecycleCoordinator {
    cancel: CancellationToken,
    logger: Arc<dyn Logger>,
}

impl LifecycleCoordinator {
    pub fn new(cancel: CancellationToken, logger: Arc<dyn Logger>) -> Self {
        Self { cancel, logger }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn logger(&self) -> &dyn Logger {
        self.logger.as_ref()
    }

    /// Route Ctrl-C into the cancellation token. Can only be installed once
    /// per process.
    pub fn install_interrupt_handler(&self) -> Result<(), ctrlc::Error> {
        let token = self.cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nInterrupted, waiting for remote relays to exit...");
            token.cancel();
        })
    }

    /// Run `fut` unless cancelled first. `None` means it was cut short.
    pub async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Wait for every dispatched relay to exit. Exit codes are logged, not
    /// acted upon. Returns how many were joined.
    pub async fn await_all(&self, handles: Vec<DispatchHandle>) -> usize {
        let mut joined = 0;
        for handle in handles {
            let host = handle.host().to_string();
            let outcome = handle.join().await;
            self.logger.relay_exit(&host, &outcome);
            joined += 1;
        }
        joined
    }

    /// Clean up and report on every host, one at a time. A failing host
    /// does not stop the pass.
    pub async fn finalize(
        &self,
        executor: &dyn RemoteExecutor,
        chain: &ChainSpec,
        config: &TransferConfig,
    ) -> Vec<HostReport> {
        let script = relay::verify_script(config).render();
        let mut reports = Vec::with_capacity(chain.len());

        for host in chain.hosts() {
            let outcome = executor
                .run(host, &script)
                .await
                .map_err(|source| RelayError::Verification {
                    host: host.clone(),
                    source,
                });
            let report = HostReport {
                host: host.clone(),
                outcome,
            };
            self.logger.report(host, &report.line());
            reports.push(report);
        }
        reports
    }

    /// Cleanup for relays that will never receive data: `finalize` kills
    /// the listeners, and only then can their ssh sessions be joined.
    pub async fn finalize_then_join(
        &self,
        executor: &dyn RemoteExecutor,
        chain: &ChainSpec,
        config: &TransferConfig,
        handles: Vec<DispatchHandle>,
    ) -> Vec<HostReport> {
        let reports = self.finalize(executor, chain, config).await;
        self.await_all(handles).await;
        reports
    }

    /// Normal teardown: let the relays drain, then clean up.
    pub async fn join_then_finalize(
        &self,
        executor: &dyn RemoteExecutor,
        chain: &ChainSpec,
        config: &TransferConfig,
        handles: Vec<DispatchHandle>,
    ) -> Vec<HostReport> {
        println!("waiting for child ssh processes to exit");
        self.await_all(handles).await;
        self.finalize(executor, chain, config).await
    }
}
