//! Spawning a server child connected over pipes or a socketpair.

use std::ffi::OsString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Once};

use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::pipe::{pipe, set_cloexec};
use crate::traits::Channel;

/// Names the control descriptor handed to a socketpair child.
pub const CONNECTION_FD_ENV: &str = "_ctlwire_connection_fd";
/// Carries the spawning process's pid into the child.
pub const PIPE_CONNECT_PID_ENV: &str = "_ctlwire_pipe_connect_pid";

type PreExecHook = Arc<dyn Fn() -> std::io::Result<()> + Send + Sync>;

/// How to start a server child.
#[derive(Clone, Default)]
pub struct SpawnConfig {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Extra descriptors the child keeps open across exec.
    pub inherit_fds: Vec<RawFd>,
    pre_exec: Option<PreExecHook>,
}

impl SpawnConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn with_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_inherited_fd(mut self, fd: RawFd) -> Self {
        self.inherit_fds.push(fd);
        self
    }

    /// Run `hook` in the child between fork and exec. It must restrict
    /// itself to async-signal-safe operations.
    pub fn with_pre_exec<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> std::io::Result<()> + Send + Sync + 'static,
    {
        self.pre_exec = Some(Arc::new(hook));
        self
    }

    fn command(&self, extra_inherit: Option<RawFd>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(PIPE_CONNECT_PID_ENV, std::process::id().to_string())
            .env_remove(CONNECTION_FD_ENV);

        let mut inherit = self.inherit_fds.clone();
        inherit.extend(extra_inherit);
        let hook = self.pre_exec.clone();
        // SAFETY: the closure only calls fcntl and the caller's hook, which is
        // documented to be async-signal-safe.
        unsafe {
            cmd.pre_exec(move || {
                for fd in &inherit {
                    set_cloexec(*fd, false)?;
                }
                if let Some(hook) = &hook {
                    hook()?;
                }
                Ok(())
            });
        }
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> TransportError {
        TransportError::Spawn {
            program: self.program.display().to_string(),
            source,
        }
    }
}

impl std::fmt::Debug for SpawnConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnConfig")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("inherit_fds", &self.inherit_fds)
            .field("pre_exec", &self.pre_exec.is_some())
            .finish()
    }
}

/// A child process started by one of the spawn paths.
#[derive(Debug)]
pub enum ChildProcess {
    Spawned(Child),
    Forked(libc::pid_t),
}

impl ChildProcess {
    pub fn id(&self) -> u32 {
        match self {
            Self::Spawned(child) => child.id(),
            Self::Forked(pid) => *pid as u32,
        }
    }

    /// Wait for the child to exit.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        match self {
            Self::Spawned(child) => Ok(child.wait()?),
            Self::Forked(pid) => {
                let mut status: libc::c_int = 0;
                loop {
                    // SAFETY: `status` is a valid out-pointer; `pid` is our child.
                    let rc = unsafe { libc::waitpid(*pid, &mut status, 0) };
                    if rc == *pid {
                        return Ok(ExitStatus::from_raw(status));
                    }
                    let err = std::io::Error::last_os_error();
                    if err.kind() != std::io::ErrorKind::Interrupted {
                        return Err(err.into());
                    }
                }
            }
        }
    }
}

/// Result of forking without exec.
#[derive(Debug)]
pub enum Fork {
    /// Running in the parent process.
    Parent { channel: Channel, child: ChildProcess },
    /// Running in the new process. The caller acts as the server and must
    /// leave with `std::process::exit`.
    Child { channel: Channel },
}

/// Ignore `SIGPIPE` once per process if it is still at its default action,
/// so a vanished server yields `EPIPE` instead of killing the client.
pub fn fix_signals() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        // SAFETY: sigaction with a null new action only queries; the second
        // call installs SIG_IGN, which has no handler code to run.
        unsafe {
            let mut current: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(libc::SIGPIPE, std::ptr::null(), &mut current) == 0
                && current.sa_sigaction == libc::SIG_DFL
            {
                let mut ignore: libc::sigaction = std::mem::zeroed();
                ignore.sa_sigaction = libc::SIG_IGN;
                libc::sigemptyset(&mut ignore.sa_mask);
                if libc::sigaction(libc::SIGPIPE, &ignore, std::ptr::null_mut()) == 0 {
                    debug!("SIGPIPE set to ignore");
                }
            }
        }
    });
}

/// Start `config.program` with its stdin/stdout connected to a pipe channel.
pub fn spawn_pipe(config: &SpawnConfig) -> Result<(Channel, ChildProcess)> {
    let mut cmd = config.command(None);
    cmd.stdin(Stdio::piped()).stdout(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| config.spawn_error(e))?;

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        let _ = child.kill();
        return Err(config.spawn_error(std::io::Error::other("child stdio not captured")));
    };
    debug!(program = ?config.program, pid = child.id(), "spawned pipe server");
    Ok((
        Channel::pipe(OwnedFd::from(stdout), OwnedFd::from(stdin)),
        ChildProcess::Spawned(child),
    ))
}

/// Start `config.program` with one end of a socketpair. The child learns the
/// descriptor number from [`CONNECTION_FD_ENV`]; the returned channel passes
/// descriptors.
pub fn spawn_socketpair(config: &SpawnConfig) -> Result<(Channel, ChildProcess)> {
    let (ours, theirs) = UnixStream::pair()?;
    let child_fd = theirs.as_raw_fd();

    let mut cmd = config.command(Some(child_fd));
    cmd.env(CONNECTION_FD_ENV, child_fd.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null());
    let child = cmd.spawn().map_err(|e| config.spawn_error(e))?;
    // The child owns its copy now.
    drop(theirs);

    debug!(program = ?config.program, pid = child.id(), child_fd, "spawned socketpair server");
    Ok((Channel::fd_passing(ours), ChildProcess::Spawned(child)))
}

/// Fork without exec, connecting parent and child with two pipes.
///
/// Only sound in a process that has no other threads running.
pub fn fork_pipe() -> Result<Fork> {
    let (parent_read, child_write) = pipe()?;
    let (child_read, parent_write) = pipe()?;
    match do_fork()? {
        0 => {
            drop(parent_read);
            drop(parent_write);
            Ok(Fork::Child {
                channel: Channel::pipe(child_read, child_write),
            })
        }
        pid => {
            drop(child_read);
            drop(child_write);
            Ok(Fork::Parent {
                channel: Channel::pipe(parent_read, parent_write),
                child: ChildProcess::Forked(pid),
            })
        }
    }
}

/// Fork without exec over a descriptor-passing socketpair.
pub fn fork_socketpair() -> Result<Fork> {
    let (ours, theirs) = UnixStream::pair()?;
    match do_fork()? {
        0 => {
            drop(ours);
            Ok(Fork::Child {
                channel: Channel::fd_passing(theirs),
            })
        }
        pid => {
            drop(theirs);
            Ok(Fork::Parent {
                channel: Channel::fd_passing(ours),
                child: ChildProcess::Forked(pid),
            })
        }
    }
}

fn do_fork() -> Result<libc::pid_t> {
    // SAFETY: fork has no memory-safety preconditions; the documented
    // single-thread requirement is on the caller.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        let err = std::io::Error::last_os_error();
        warn!("fork failed: {err}");
        return Err(TransportError::Spawn {
            program: "<fork>".to_string(),
            source: err,
        });
    }
    Ok(pid)
}

/// The control channel inherited from a spawning client: the socket named in
/// [`CONNECTION_FD_ENV`] if it is valid, else stdin/stdout.
pub fn inherited_channel() -> Result<Channel> {
    if let Some(fd) = std::env::var(CONNECTION_FD_ENV)
        .ok()
        .and_then(|v| v.parse::<RawFd>().ok())
        .filter(|fd| *fd >= 0)
    {
        // SAFETY: the descriptor was handed to us by the spawning process
        // and nothing else in this process claims it.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        if crate::pipe::is_socket(std::os::fd::AsFd::as_fd(&owned)) {
            set_cloexec(fd, true)?;
            debug!(fd, "using inherited socket as control channel");
            return Ok(Channel::fd_passing(UnixStream::from(owned)));
        }
        // Not ours to close.
        std::mem::forget(owned);
        warn!(fd, "{CONNECTION_FD_ENV} does not name a socket; using stdio");
    }
    Channel::stdio()
}

/// Pid of the spawning process from [`PIPE_CONNECT_PID_ENV`], if set.
pub fn spawner_pid() -> Option<u32> {
    std::env::var(PIPE_CONNECT_PID_ENV)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|pid| *pid > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};

    #[test]
    fn test_spawn_pipe_talks_to_child() {
        let config = SpawnConfig::new("/bin/sh")
            .with_args(["-c", "echo \"OK pid=$_ctlwire_pipe_connect_pid\"; read line; echo \"D $line\""]);
        let (channel, mut child) = spawn_pipe(&config).unwrap();
        let mut reader = BufReader::new(channel);

        let mut first = String::new();
        reader.read_line(&mut first).unwrap();
        assert_eq!(first.trim_end(), format!("OK pid={}", std::process::id()));

        reader.get_mut().write_all(b"hello\n").unwrap();
        let mut second = String::new();
        reader.read_line(&mut second).unwrap();
        assert_eq!(second, "D hello\n");

        assert!(child.wait().unwrap().success());
    }

    #[test]
    fn test_spawn_reports_missing_program() {
        let config = SpawnConfig::new("/nonexistent/ctlwire-server");
        let err = spawn_pipe(&config).unwrap_err();
        assert!(matches!(err, TransportError::Spawn { .. }));
    }

    #[test]
    fn test_spawn_socketpair_passes_descriptor_number() {
        let config = SpawnConfig::new("/bin/sh")
            .with_args(["-c", "echo \"fd=$_ctlwire_connection_fd\" >&$_ctlwire_connection_fd"]);
        let (mut channel, mut child) = spawn_socketpair(&config).unwrap();

        let mut out = String::new();
        channel.read_to_string(&mut out).unwrap();
        assert!(out.starts_with("fd="), "unexpected output {out:?}");
        assert!(child.wait().unwrap().success());
    }

    #[test]
    fn test_pre_exec_hook_runs_in_child() {
        let config = SpawnConfig::new("/bin/sh")
            .with_args(["-c", "exit 0"])
            .with_pre_exec(|| Err(std::io::Error::from_raw_os_error(libc::EPERM)));
        assert!(spawn_pipe(&config).is_err());
    }

    #[test]
    fn test_fix_signals_is_idempotent() {
        fix_signals();
        fix_signals();
    }

    #[test]
    fn test_spawner_pid_parsing() {
        // Only inspects the variable; never set in the test process.
        if std::env::var_os(PIPE_CONNECT_PID_ENV).is_none() {
            assert_eq!(spawner_pid(), None);
        }
    }
}
