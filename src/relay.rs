//! Relay unit commands
//!
//! Each host in the chain runs one generated shell script. Forwarding hosts
//! listen, tee into a fifo that a second netcat drains towards the next
//! host, and keep a copy in the output file. The terminal host only listens
//! and writes.
//!
//! Host, port and path values are interpolated verbatim. Callers must treat
//! them as trusted operator input: a hostile value can inject remote shell
//! commands.

use std::fmt;

use crate::config::{ChainSpec, TransferConfig};

/// What a host does in the chain, derived from its position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayRole {
    Forwarding {
        listen_port: u16,
        next_host: String,
        pipe: String,
    },
    Terminal {
        listen_port: u16,
        output: String,
    },
}

impl RelayRole {
    /// Role of `chain.hosts()[index]`. The last position is terminal.
    pub fn for_position(chain: &ChainSpec, index: usize, config: &TransferConfig) -> Self {
        match chain.next_after(index) {
            Some(next) => RelayRole::Forwarding {
                listen_port: config.listen_port,
                next_host: next.to_string(),
                pipe: config.fifo_path.clone(),
            },
            None => RelayRole::Terminal {
                listen_port: config.listen_port,
                output: config.output_filename.clone(),
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayRole::Terminal { .. })
    }
}

/// One line of a remote script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Absence is not an error.
    RemovePipe { path: String },
    MakePipe { path: String },
    /// Matched by command line and port, not by pid.
    KillListener { netcat: String, port: u16 },
    /// Backgrounded: drain the fifo into the next host.
    ForwardPipe { netcat: String, pipe: String, next_host: String, port: u16 },
    ListenTee { netcat: String, port: u16, pipe: String, output: String },
    ListenToFile { netcat: String, port: u16, output: String },
    ListFile { path: String },
}

impl Step {
    fn background(&self) -> bool {
        matches!(self, Step::ForwardPipe { .. })
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::RemovePipe { path } => write!(f, "rm -f {path}"),
            Step::MakePipe { path } => write!(f, "mkfifo {path}"),
            Step::KillListener { netcat, port } => write!(f, "pkill -f '^{netcat}.*{port}'"),
            Step::ForwardPipe { netcat, pipe, next_host, port } => {
                write!(f, "{netcat} {next_host} {port} < {pipe}")
            }
            Step::ListenTee { netcat, port, pipe, output } => {
                write!(f, "{netcat} -l {port} | tee {pipe}>{output}")
            }
            Step::ListenToFile { netcat, port, output } => {
                write!(f, "{netcat} -l {port} > {output}")
            }
            Step::ListFile { path } => write!(f, "ls -l {path}"),
        }
    }
}

/// Ordered steps rendered into a single command string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayScript {
    steps: Vec<Step>,
}

impl RelayScript {
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn render(&self) -> String {
        let last = self.steps.len().saturating_sub(1);
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                if step.background() {
                    format!("{step} &")
                } else if i < last {
                    format!("{step};")
                } else {
                    step.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for RelayScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Script that stands up the relay for `role`.
pub fn relay_script(role: &RelayRole, config: &TransferConfig) -> RelayScript {
    let netcat = config.netcat.clone();
    let steps = match role {
        RelayRole::Forwarding { listen_port, next_host, pipe } => vec![
            Step::RemovePipe { path: pipe.clone() },
            Step::MakePipe { path: pipe.clone() },
            Step::KillListener { netcat: netcat.clone(), port: *listen_port },
            Step::ForwardPipe {
                netcat: netcat.clone(),
                pipe: pipe.clone(),
                next_host: next_host.clone(),
                port: *listen_port,
            },
            Step::ListenTee {
                netcat,
                port: *listen_port,
                pipe: pipe.clone(),
                output: config.output_filename.clone(),
            },
        ],
        RelayRole::Terminal { listen_port, output } => vec![
            Step::KillListener { netcat: netcat.clone(), port: *listen_port },
            Step::ListenToFile { netcat, port: *listen_port, output: output.clone() },
        ],
    };
    RelayScript { steps }
}

/// Command text for `role`.
pub fn generate(role: &RelayRole, config: &TransferConfig) -> String {
    relay_script(role, config).render()
}

/// Post-transfer cleanup that also reports the output file.
pub fn verify_script(config: &TransferConfig) -> RelayScript {
    RelayScript {
        steps: vec![
            Step::RemovePipe { path: config.fifo_path.clone() },
            Step::KillListener { netcat: config.netcat.clone(), port: config.listen_port },
            Step::ListFile { path: config.output_filename.clone() },
        ],
    }
}
