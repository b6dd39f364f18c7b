//! Error taxonomy for a chain run

use std::io;

use crate::executor::DispatchHandle;

/// Transport-level failure reported by a [`RemoteExecutor`](crate::executor::RemoteExecutor).
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to launch remote shell: {0}")]
    Spawn(#[from] io::Error),

    #[error("remote command exited with {}: {}", code_label(.code), trimmed(.output))]
    Exit { code: Option<i32>, output: String },

    #[error("remote task aborted: {0}")]
    Join(String),

    #[error("{0}")]
    Other(String),
}

fn code_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "signal".to_string(),
    }
}

fn trimmed(output: &str) -> &str {
    output.trim()
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Bad arguments or unreadable input; nothing remote has happened yet.
    #[error("{0}")]
    Startup(String),

    #[error("cannot connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("transfer failed after {sent} bytes: {source}")]
    Transfer {
        sent: u64,
        #[source]
        source: io::Error,
    },

    #[error("dispatch to {host} failed: {source}")]
    Dispatch {
        host: String,
        #[source]
        source: ExecError,
    },

    #[error("verification on {host} failed: {source}")]
    Verification {
        host: String,
        #[source]
        source: ExecError,
    },
}

/// A chain build that stopped part way.
///
/// Relays listed in `dispatched` are still running on their hosts; the
/// caller owns them and is expected to finalize every host before joining.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct PartialChain {
    #[source]
    pub error: RelayError,
    pub dispatched: Vec<DispatchHandle>,
}
