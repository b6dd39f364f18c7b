//! Chain setup
//!
//! Relays are dispatched from the last host to the first so every listener
//! is (probably) bound before its upstream neighbour tries to connect.
//! "Probably" because readiness is a fixed pause, not a confirmation; a
//! late bind shows up as a failed connection further up the chain.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{ChainSpec, TransferConfig};
use crate::error::{PartialChain, RelayError};
use crate::executor::{DispatchHandle, RemoteExecutor};
use crate::logger::Logger;
use crate::relay::{self, RelayRole};

pub struct ChainBuilder<'a> {
    executor: &'a dyn RemoteExecutor,
    config: &'a TransferConfig,
    logger: &'a dyn Logger,
    settle: Duration,
    cancel: Option<CancellationToken>,
}

impl<'a> ChainBuilder<'a> {
    pub fn new(
        executor: &'a dyn RemoteExecutor,
        config: &'a TransferConfig,
        logger: &'a dyn Logger,
    ) -> Self {
        Self {
            executor,
            config,
            logger,
            settle: config.settle,
            cancel: None,
        }
    }

    /// Stop dispatching once `token` fires. Relays already launched are
    /// still returned; the caller sees the cancellation on the token itself.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    async fn pause(&self) {
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(self.settle) => {}
                }
            }
            None => tokio::time::sleep(self.settle).await,
        }
    }

    /// Dispatch one relay per host, last host first.
    ///
    /// Handles come back in dispatch order. On failure nothing already
    /// dispatched is torn down; those handles travel in the error.
    pub async fn build(&self, chain: &ChainSpec) -> Result<Vec<DispatchHandle>, PartialChain> {
        let mut dispatched = Vec::with_capacity(chain.len());

        for index in (0..chain.len()).rev() {
            if self.cancelled() {
                break;
            }
            let host = &chain.hosts()[index];
            let role = RelayRole::for_position(chain, index, self.config);
            let command = relay::generate(&role, self.config);

            match chain.next_after(index) {
                Some(next) => println!("setting up: {} -> {}", host, next),
                None => println!("setting up: {}", host),
            }
            self.logger.dispatch(host, &role);

            let handle = match self.executor.dispatch(host, &command) {
                Ok(h) => h,
                Err(source) => return Err(self.abort(host, source, dispatched)),
            };

            self.pause().await;

            match handle.check_early_exit().await {
                Ok(h) => dispatched.push(h),
                Err(source) => return Err(self.abort(host, source, dispatched)),
            }
        }

        Ok(dispatched)
    }

    fn abort(
        &self,
        host: &str,
        source: crate::error::ExecError,
        dispatched: Vec<DispatchHandle>,
    ) -> PartialChain {
        let error = RelayError::Dispatch {
            host: host.to_string(),
            source,
        };
        self.logger.error("dispatch", &error.to_string());
        PartialChain { error, dispatched }
    }
}
