//! Chaincast - one upload, many copies
//!
//! Stands up a netcat relay on every host (last host first), streams the
//! file into the first one, waits for the relays to drain, then cleans up
//! and prints the resulting file size on each host.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use chaincast::config::{load_file_config, ChainSpec, TransferConfig};
use chaincast::executor::SshExecutor;
use chaincast::journal::RunJournal;
use chaincast::lifecycle::LifecycleCoordinator;
use chaincast::logger::{Logger, NoopLogger, TextLogger};
use chaincast::progress::TransferProgress;
use chaincast::run::{open_source, run_chain};
use chaincast::transmit::ProgressSink;
use chaincast::Args;

fn main() -> Result<()> {
    let args = Args::parse();

    let file_cfg = load_file_config(args.config.as_deref())?;
    let config = TransferConfig::resolve(&args, &file_cfg)?;
    let chain = ChainSpec::new(args.hosts.clone())?;

    let logger: Arc<dyn Logger> = if let Some(ref p) = args.log_file {
        match TextLogger::new(p) {
            Ok(l) => Arc::new(l),
            Err(_) => Arc::new(NoopLogger),
        }
    } else {
        Arc::new(NoopLogger)
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(run(&args, &config, &chain, logger))
}

async fn run(
    args: &Args,
    config: &TransferConfig,
    chain: &ChainSpec,
    logger: Arc<dyn Logger>,
) -> Result<()> {
    let source = open_source(&args.filename).await?;

    let executor = SshExecutor::from_config(config);
    let coordinator = LifecycleCoordinator::new(CancellationToken::new(), logger);
    coordinator
        .install_interrupt_handler()
        .context("Error setting Ctrl-C handler")?;

    let quiet = args.quiet;
    let outcome = run_chain(&coordinator, &executor, chain, config, source, |total| {
        let bar = if quiet {
            TransferProgress::hidden(total)
        } else {
            TransferProgress::new(total)
        };
        Box::new(bar) as Box<dyn ProgressSink>
    })
    .await;

    for report in &outcome.reports {
        println!("{}", report.line());
    }
    if let Some(path) = args.journal.as_deref() {
        let entry = outcome.journal_entry(&args.filename, chain, config);
        if let Err(e) = RunJournal::new(path).add_entry(&entry) {
            eprintln!("warning: could not write run journal: {e:#}");
        }
    }
    outcome.into_result()
}
