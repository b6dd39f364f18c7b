//! Remote command execution
//!
//! `RemoteExecutor` is the seam between chain orchestration and whatever
//! transport reaches the hosts. `SshExecutor` is the production
//! implementation; it shells out to `ssh` (or a configured replacement).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::process::{Output, Stdio};

use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::config::TransferConfig;
use crate::error::ExecError;

pub type ExecFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ExecError>> + Send + 'a>>;

pub trait RemoteExecutor: Send + Sync {
    /// Run `command` on `host` to completion and return its combined output.
    fn run<'a>(&'a self, host: &'a str, command: &'a str) -> ExecFuture<'a>;

    /// Launch a long-lived `command` on `host` without waiting for it.
    ///
    /// An error here means the command could not be launched at all.
    /// Must be called from within a Tokio runtime.
    fn dispatch(&self, host: &str, command: &str) -> Result<DispatchHandle, ExecError>;
}

enum HandleState {
    Running(JoinHandle<Result<String, ExecError>>),
    Exited(Result<String, ExecError>),
}

/// A relay launched in the background. Joined exactly once.
pub struct DispatchHandle {
    host: String,
    state: HandleState,
}

impl DispatchHandle {
    pub fn spawn<F>(host: impl Into<String>, task: F) -> Self
    where
        F: Future<Output = Result<String, ExecError>> + Send + 'static,
    {
        Self {
            host: host.into(),
            state: HandleState::Running(tokio::spawn(task)),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            HandleState::Running(h) => h.is_finished(),
            HandleState::Exited(_) => true,
        }
    }

    /// Fails if the remote command has already exited unsuccessfully,
    /// which usually means the host was never reached.
    pub async fn check_early_exit(mut self) -> Result<Self, ExecError> {
        if let HandleState::Running(h) = &mut self.state {
            if h.is_finished() {
                let res = flatten(h.await);
                self.state = HandleState::Exited(res);
            }
        }
        match self.state {
            HandleState::Exited(Err(e)) => Err(e),
            state => Ok(Self { host: self.host, state }),
        }
    }

    /// Wait for the remote command to exit.
    pub async fn join(self) -> Result<String, ExecError> {
        match self.state {
            HandleState::Running(h) => flatten(h.await),
            HandleState::Exited(res) => res,
        }
    }
}

impl fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchHandle")
            .field("host", &self.host)
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn flatten(
    joined: Result<Result<String, ExecError>, tokio::task::JoinError>,
) -> Result<String, ExecError> {
    joined.unwrap_or_else(|e| Err(ExecError::Join(e.to_string())))
}

/// Runs commands through `ssh [-l login] <host> <command>`.
#[derive(Clone, Debug)]
pub struct SshExecutor {
    program: String,
    leading_args: Vec<String>,
    login: Option<String>,
}

impl SshExecutor {
    /// `ssh` may carry extra arguments, e.g. `"ssh -p 2222"`.
    pub fn new(ssh: &str, login: Option<String>) -> Self {
        let mut parts = ssh.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_else(|| "ssh".to_string());
        Self {
            program,
            leading_args: parts.collect(),
            login,
        }
    }

    pub fn from_config(config: &TransferConfig) -> Self {
        Self::new(&config.ssh, config.login.clone())
    }

    fn command(&self, host: &str, script: &str) -> Command {
        let (program, args) = self.argv(host, script);
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdin(Stdio::null()).kill_on_drop(false);
        // Keep relays out of our process group so a terminal Ctrl-C only
        // reaches this process.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Program and arguments for running `script` on `host`.
    fn argv<'s>(&'s self, host: &'s str, script: &'s str) -> (&'s str, Vec<&'s str>) {
        let mut args: Vec<&str> = self.leading_args.iter().map(String::as_str).collect();
        if let Some(login) = &self.login {
            args.push("-l");
            args.push(login.as_str());
        }
        args.push(host);
        args.push(script);
        (self.program.as_str(), args)
    }
}

impl RemoteExecutor for SshExecutor {
    fn run<'a>(&'a self, host: &'a str, command: &'a str) -> ExecFuture<'a> {
        Box::pin(async move {
            let out = self.command(host, command).output().await?;
            collect(out)
        })
    }

    fn dispatch(&self, host: &str, command: &str) -> Result<DispatchHandle, ExecError> {
        let child = self
            .command(host, command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        Ok(DispatchHandle::spawn(host, async move {
            let out = child.wait_with_output().await?;
            collect(out)
        }))
    }
}

fn collect(out: Output) -> Result<String, ExecError> {
    let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&out.stderr));
    if out.status.success() {
        Ok(text)
    } else {
        Err(ExecError::Exit {
            code: out.status.code(),
            output: text,
        })
    }
}

/// Recording executor for tests.
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Mode {
        Run,
        Dispatch,
    }

    #[derive(Clone, Debug)]
    pub struct Call {
        pub host: String,
        pub command: String,
        pub mode: Mode,
    }

    #[derive(Default)]
    pub struct MockExecutor {
        calls: Mutex<Vec<Call>>,
        refuse_dispatch: HashSet<String>,
        exit_early: HashSet<String>,
        fail_run: HashSet<String>,
        hold: bool,
        listening: Mutex<HashMap<String, CancellationToken>>,
    }

    impl MockExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        /// `dispatch` returns an error for this host.
        pub fn refuse_dispatch(mut self, host: &str) -> Self {
            self.refuse_dispatch.insert(host.to_string());
            self
        }

        /// The background task for this host fails immediately.
        pub fn exit_early(mut self, host: &str) -> Self {
            self.exit_early.insert(host.to_string());
            self
        }

        pub fn fail_run(mut self, host: &str) -> Self {
            self.fail_run.insert(host.to_string());
            self
        }

        /// Relays keep running until `run` is called for their host, the
        /// way a listening `nc` only goes away when cleanup kills it.
        pub fn hold_until_verified(mut self) -> Self {
            self.hold = true;
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn hosts(&self, mode: Mode) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter(|c| c.mode == mode)
                .map(|c| c.host)
                .collect()
        }

        fn record(&self, host: &str, command: &str, mode: Mode) {
            self.calls.lock().unwrap().push(Call {
                host: host.to_string(),
                command: command.to_string(),
                mode,
            });
        }
    }

    impl RemoteExecutor for MockExecutor {
        fn run<'a>(&'a self, host: &'a str, command: &'a str) -> ExecFuture<'a> {
            self.record(host, command, Mode::Run);
            if let Some(relay) = self.listening.lock().unwrap().get(host) {
                relay.cancel();
            }
            let fail = self.fail_run.contains(host);
            Box::pin(async move {
                if fail {
                    Err(ExecError::Exit {
                        code: Some(255),
                        output: format!("ssh: connect to host {host}: No route to host"),
                    })
                } else {
                    Ok(format!("-rw-r--r-- 1 user user 4096 {host}\n"))
                }
            })
        }

        fn dispatch(&self, host: &str, command: &str) -> Result<DispatchHandle, ExecError> {
            if self.refuse_dispatch.contains(host) {
                return Err(ExecError::Other(format!("{host} unreachable")));
            }
            self.record(host, command, Mode::Dispatch);
            let early = self.exit_early.contains(host);
            let killed = CancellationToken::new();
            if self.hold {
                self.listening
                    .lock()
                    .unwrap()
                    .insert(host.to_string(), killed.clone());
            } else {
                killed.cancel();
            }
            Ok(DispatchHandle::spawn(host, async move {
                killed.cancelled().await;
                if early {
                    Err(ExecError::Exit {
                        code: Some(255),
                        output: "ssh: Could not resolve hostname".into(),
                    })
                } else {
                    Ok(String::new())
                }
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawned_argv(ex: &SshExecutor, host: &str, script: &str) -> Vec<String> {
        let cmd = ex.command(host, script);
        let inner = cmd.as_std();
        std::iter::once(inner.get_program())
            .chain(inner.get_args())
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn ssh_command_with_login_and_extra_args() {
        let ex = SshExecutor::new("ssh -p 2222", Some("deploy".into()));
        assert_eq!(
            spawned_argv(&ex, "h1", "ls"),
            vec!["ssh", "-p", "2222", "-l", "deploy", "h1", "ls"]
        );
    }

    #[test]
    fn ssh_command_plain() {
        let ex = SshExecutor::new("ssh", None);
        assert_eq!(spawned_argv(&ex, "h1", "rm -f x"), vec!["ssh", "h1", "rm -f x"]);
    }

    #[test]
    fn blank_ssh_falls_back_to_ssh() {
        let ex = SshExecutor::new("  ", None);
        assert_eq!(spawned_argv(&ex, "h1", "ls"), vec!["ssh", "h1", "ls"]);
    }

    #[tokio::test]
    async fn join_returns_task_output() {
        let h = DispatchHandle::spawn("a", async { Ok("done".to_string()) });
        assert_eq!(h.host(), "a");
        assert_eq!(h.join().await.unwrap(), "done");
    }

    #[tokio::test]
    async fn early_exit_failure_is_reported() {
        let h = DispatchHandle::spawn("a", async { Err(ExecError::Other("boom".into())) });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(h.check_early_exit().await.is_err());
    }

    #[tokio::test]
    async fn running_handle_passes_early_check() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let h = DispatchHandle::spawn("a", async move {
            let _ = rx.await;
            Ok(String::new())
        });
        let h = h.check_early_exit().await.unwrap();
        assert!(!h.is_finished());
        tx.send(()).unwrap();
        assert!(h.join().await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn collects_combined_output_and_status() {
        // `sh -c` stands in for ssh: the "host" argument becomes $0.
        let ex = SshExecutor::new("sh -c", None);
        let out = ex.run("echo out; echo err 1>&2", "host").await.unwrap();
        assert!(out.contains("out"));
        assert!(out.contains("err"));

        let err = ex.run("echo nope; exit 3", "host").await.unwrap_err();
        match err {
            ExecError::Exit { code, output } => {
                assert_eq!(code, Some(3));
                assert!(output.contains("nope"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
