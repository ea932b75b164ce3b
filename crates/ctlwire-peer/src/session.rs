use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::Arc;

use ctlwire_line::{first_line, write_line, DataWriter, Direction, LineError, LineObserver, LineReader};
use ctlwire_transport::{ChildProcess, PeerCredentials, Transport};
use tracing::{debug, warn};

use crate::command::{CommandTable, Handler, NotifyHook, OptionHandler, PostCommandHook};
use crate::config::{LogCategory, LogConfig, ServerConfig};
use crate::error::{ErrorKind, PeerError, Result};
use crate::inquire::InquireState;
use crate::log::ControlLog;
use crate::server::AcceptSource;

pub(crate) type BoxedTransport = Box<dyn Transport + Send>;

/// Which end of the protocol a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// A descriptor bound with `INPUT` or `OUTPUT`.
#[derive(Debug)]
pub enum BoundFd {
    /// A descriptor number named by the peer (`FD=n`); not owned by the
    /// session and never closed by it.
    Number(RawFd),
    /// A descriptor received over the control socket; closed on drop.
    Received(OwnedFd),
}

impl AsRawFd for BoundFd {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Self::Number(fd) => *fd,
            Self::Received(fd) => fd.as_raw_fd(),
        }
    }
}

/// Channel plus the line-level state layered on it.
pub(crate) struct SessionIo {
    transport: Option<BoxedTransport>,
    pub(crate) reader: LineReader,
    pub(crate) data: DataWriter,
    pub(crate) log: ControlLog,
}

fn closed() -> LineError {
    LineError::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "session channel is closed",
    ))
}

impl SessionIo {
    fn new(transport: Option<BoxedTransport>, log: Arc<LogConfig>) -> Self {
        Self {
            transport,
            reader: LineReader::new(),
            data: DataWriter::new(),
            log: ControlLog::new(log),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Swap the channel, dropping line and data state tied to the old one.
    pub(crate) fn replace_transport(&mut self, transport: Option<BoxedTransport>) {
        self.transport = transport;
        self.reader.reset();
        self.data.reset();
    }

    pub(crate) fn transport(&self) -> Option<&BoxedTransport> {
        self.transport.as_ref()
    }

    pub(crate) fn transport_mut(&mut self) -> Option<&mut BoxedTransport> {
        self.transport.as_mut()
    }

    /// Read one line; a closed session reads as end of file.
    pub(crate) fn read_line(&mut self) -> std::result::Result<(), LineError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(LineError::Eof);
        };
        self.reader.read_line(&mut **transport, &mut self.log)?;
        Ok(())
    }

    pub(crate) fn read_line_retry(&mut self) -> std::result::Result<(), LineError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(LineError::Eof);
        };
        self.reader.read_line_retry(&mut **transport, &mut self.log)?;
        Ok(())
    }

    pub(crate) fn line(&self) -> &[u8] {
        self.reader.line()
    }

    pub(crate) fn write_line(
        &mut self,
        prefix: Option<&[u8]>,
        line: &[u8],
    ) -> std::result::Result<(), LineError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(closed());
        };
        write_line(&mut **transport, prefix, line, &mut self.log)?;
        Ok(())
    }

    pub(crate) fn data_write(&mut self, data: &[u8]) -> std::result::Result<(), LineError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(closed());
        };
        self.data.write(&mut **transport, data, &mut self.log)
    }

    pub(crate) fn data_flush(&mut self) -> std::result::Result<bool, LineError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(closed());
        };
        self.data.flush(&mut **transport, &mut self.log)
    }
}

/// Notification hooks a server may register.
pub(crate) struct Hooks<S> {
    pub(crate) reset: Option<NotifyHook<S>>,
    pub(crate) cancel: Option<NotifyHook<S>>,
    pub(crate) bye: Option<NotifyHook<S>>,
    pub(crate) input: Option<NotifyHook<S>>,
    pub(crate) output: Option<NotifyHook<S>>,
    pub(crate) post_command: Option<PostCommandHook<S>>,
    pub(crate) option: Option<OptionHandler<S>>,
}

impl<S> Default for Hooks<S> {
    fn default() -> Self {
        Self {
            reset: None,
            cancel: None,
            bye: None,
            input: None,
            output: None,
            post_command: None,
            option: None,
        }
    }
}

/// One protocol connection, client or server side.
///
/// `S` is caller context reachable from every handler through
/// [`context`](Self::context) and [`context_mut`](Self::context_mut).
pub struct Session<S = ()> {
    pub(crate) io: SessionIo,
    pub(crate) role: Role,
    pub(crate) in_command: bool,
    pub(crate) process_complete: bool,
    pub(crate) inquire: InquireState<S>,
    pub(crate) commands: CommandTable<S>,
    pub(crate) hooks: Hooks<S>,
    pub(crate) config: ServerConfig,
    pub(crate) hello_line: Option<String>,
    pub(crate) okay_line: Option<String>,
    pub(crate) current_command: Option<String>,
    pub(crate) peer_pid: Option<u32>,
    pub(crate) peer_credentials: Option<PeerCredentials>,
    pub(crate) input_fd: Option<BoundFd>,
    pub(crate) output_fd: Option<BoundFd>,
    pub(crate) accept: AcceptSource,
    pub(crate) child: Option<ChildProcess>,
    pub(crate) no_waitpid: bool,
    context: S,
}

impl<S> Session<S> {
    pub(crate) fn new(
        role: Role,
        transport: Option<BoxedTransport>,
        config: ServerConfig,
        log: Arc<LogConfig>,
        context: S,
    ) -> Self {
        if log.enabled(LogCategory::Ctx) {
            debug!(?role, connected = transport.is_some(), "session created");
        }
        let peer_credentials = transport.as_ref().and_then(|t| t.peer_credentials());
        Self {
            io: SessionIo::new(transport, log),
            role,
            in_command: false,
            process_complete: false,
            inquire: InquireState::Idle,
            commands: CommandTable::new(),
            hooks: Hooks::default(),
            config,
            hello_line: None,
            okay_line: None,
            current_command: None,
            peer_pid: peer_credentials.map(|c| c.pid),
            peer_credentials,
            input_fd: None,
            output_fd: None,
            accept: AcceptSource::default(),
            child: None,
            no_waitpid: false,
            context,
        }
    }

    pub(crate) fn log_config(&self) -> &LogConfig {
        &self.io.log.config
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    pub fn context(&self) -> &S {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut S {
        &mut self.context
    }

    /// Name of the command whose handler is running.
    pub fn command_name(&self) -> Option<&str> {
        self.current_command.as_deref()
    }

    /// Pid of the peer process, when known.
    pub fn peer_pid(&self) -> Option<u32> {
        self.peer_pid
    }

    pub fn peer_credentials(&self) -> Option<PeerCredentials> {
        self.peer_credentials
    }

    /// True when a complete line is already buffered, so the next read
    /// does not touch the channel.
    pub fn pending_line(&self) -> bool {
        self.io.reader.pending()
    }

    /// True once the peer said goodbye or closed the channel.
    pub fn is_complete(&self) -> bool {
        self.process_complete
    }

    /// The descriptor the session reads from (`Inbound`) or writes to
    /// (`Outbound`), for callers driving their own event loop.
    pub fn active_fds(&self, direction: Direction) -> Option<RawFd> {
        let transport = self.io.transport()?;
        match direction {
            Direction::Inbound => transport.inbound_fd(),
            Direction::Outbound => transport.outbound_fd(),
        }
    }

    /// Greeting sent on accept. A single line is prefixed with `OK `; a
    /// multi-line greeting is sent as comments followed by an `OK` line.
    pub fn set_hello_line(&mut self, line: Option<&str>) {
        self.hello_line = line.map(str::to_string);
    }

    /// Text for the `OK` line of the command currently running.
    pub fn set_okay_line(&mut self, line: Option<&str>) {
        self.okay_line = line.map(|l| match l.strip_prefix("OK ") {
            Some(_) => l.to_string(),
            None => format!("OK {l}"),
        });
    }

    /// Hide line payloads from logs until the current command completes.
    pub fn begin_confidential(&mut self) {
        self.io.log.confidential = true;
    }

    pub fn end_confidential(&mut self) {
        self.io.log.confidential = false;
    }

    pub fn is_confidential(&self) -> bool {
        self.io.log.confidential
    }

    /// Install an observer that sees every line and may suppress it.
    pub fn set_monitor<O>(&mut self, monitor: O)
    where
        O: LineObserver + Send + 'static,
    {
        self.io.log.monitor = Some(Box::new(monitor));
    }

    /// Send one raw protocol line. Anything after an embedded newline is
    /// dropped.
    pub fn write_line(&mut self, line: impl AsRef<[u8]>) -> Result<()> {
        let line = first_line(line.as_ref());
        self.io.write_line(None, line).map_err(PeerError::Write)
    }

    /// Send a status line: `S <keyword>[ <text>]`.
    pub fn write_status(&mut self, keyword: &str, text: &str) -> Result<()> {
        let line = if text.is_empty() {
            keyword.to_string()
        } else {
            format!("{keyword} {text}")
        };
        let line = first_line(line.as_bytes());
        self.io.write_line(Some(b"S "), line).map_err(PeerError::Write)
    }

    /// Queue payload bytes as `D ` lines.
    pub fn send_data(&mut self, data: &[u8]) -> Result<()> {
        self.io.data_write(data).map_err(PeerError::Write)
    }

    /// Send any partial data line. A client also ends its inquire reply
    /// with `END`.
    pub fn flush_data(&mut self) -> Result<()> {
        self.finish_data("END")
    }

    /// Like [`flush_data`](Self::flush_data), but a client cancels its
    /// inquire reply with `CAN`.
    pub fn cancel_data(&mut self) -> Result<()> {
        self.finish_data("CAN")
    }

    fn finish_data(&mut self, terminator: &str) -> Result<()> {
        self.io.data_flush().map_err(PeerError::Write)?;
        if self.role == Role::Client {
            self.io
                .write_line(None, terminator.as_bytes())
                .map_err(PeerError::Write)?;
        }
        Ok(())
    }

    /// A `Write` adapter over the outbound data lines.
    pub fn data_writer(&mut self) -> DataStream<'_> {
        DataStream { io: &mut self.io }
    }

    /// Pass a descriptor to the peer.
    pub fn send_fd(&mut self, fd: BorrowedFd<'_>) -> Result<()> {
        let transport = self
            .io
            .transport_mut()
            .ok_or_else(|| PeerError::Write(closed()))?;
        Ok(transport.send_fd(fd)?)
    }

    /// Claim the oldest descriptor received from the peer.
    pub fn receive_fd(&mut self) -> Result<OwnedFd> {
        let transport = self
            .io
            .transport_mut()
            .ok_or_else(|| PeerError::Read(closed()))?;
        Ok(transport.receive_fd()?)
    }

    pub fn input_fd(&self) -> Option<RawFd> {
        self.input_fd.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn output_fd(&self) -> Option<RawFd> {
        self.output_fd.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Take ownership of the `INPUT` binding.
    pub fn take_input_fd(&mut self) -> Option<BoundFd> {
        self.input_fd.take()
    }

    pub fn take_output_fd(&mut self) -> Option<BoundFd> {
        self.output_fd.take()
    }

    pub fn close_input_fd(&mut self) {
        self.input_fd = None;
    }

    pub fn close_output_fd(&mut self) {
        self.output_fd = None;
    }

    pub(crate) fn close_pending_fds(&mut self) {
        if let Some(transport) = self.io.transport_mut() {
            transport.close_pending_fds();
        }
    }

    /// Register `handler` for `name`.
    pub fn register_command<F>(&mut self, name: &str, handler: F, help: Option<&str>) -> Result<()>
    where
        F: Fn(&mut Session<S>, &str) -> Result<()> + Send + Sync + 'static,
    {
        let handler: Handler<S> = Arc::new(handler);
        self.commands.insert(name, handler, help)
    }

    pub fn set_reset_notify<F>(&mut self, hook: F)
    where
        F: Fn(&mut Session<S>, &str) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.reset = Some(Arc::new(hook));
    }

    pub fn set_cancel_notify<F>(&mut self, hook: F)
    where
        F: Fn(&mut Session<S>, &str) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.cancel = Some(Arc::new(hook));
    }

    pub fn set_bye_notify<F>(&mut self, hook: F)
    where
        F: Fn(&mut Session<S>, &str) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.bye = Some(Arc::new(hook));
    }

    /// Called after `INPUT` binds a descriptor; an error restores the
    /// previous binding.
    pub fn set_input_notify<F>(&mut self, hook: F)
    where
        F: Fn(&mut Session<S>, &str) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.input = Some(Arc::new(hook));
    }

    pub fn set_output_notify<F>(&mut self, hook: F)
    where
        F: Fn(&mut Session<S>, &str) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.output = Some(Arc::new(hook));
    }

    pub fn set_post_command_notify<F>(&mut self, hook: F)
    where
        F: Fn(&mut Session<S>, &Result<()>) + Send + Sync + 'static,
    {
        self.hooks.post_command = Some(Arc::new(hook));
    }

    /// Receives every well-formed `OPTION` as `(name, value)`.
    pub fn set_option_handler<F>(&mut self, handler: F)
    where
        F: Fn(&mut Session<S>, &str, &str) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.option = Some(Arc::new(handler));
    }

    /// Close the channel, drop descriptor bindings and reap a spawned
    /// child unless the caller reaps it.
    pub(crate) fn finish(&mut self) {
        self.input_fd = None;
        self.output_fd = None;
        self.release_inquire();
        self.io.replace_transport(None);
        if let Some(mut child) = self.child.take() {
            if self.no_waitpid {
                return;
            }
            match child.wait() {
                Ok(status) => debug!(pid = child.id(), %status, "peer process exited"),
                Err(e) => warn!(pid = child.id(), error = %e, "failed to reap peer process"),
            }
        }
    }

    /// Tear the session down. A client says `BYE` first.
    pub fn release(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if !self.io.is_open() && self.child.is_none() {
            return;
        }
        if self.role == Role::Client && self.io.is_open() {
            let _ = self.io.write_line(None, b"BYE");
        }
        if self.log_config().enabled(LogCategory::Ctx) {
            debug!(role = ?self.role, "session released");
        }
        self.finish();
    }

    /// Fail unless this is a server session.
    pub(crate) fn require_server(&self) -> Result<()> {
        match self.role {
            Role::Server => Ok(()),
            Role::Client => Err(PeerError::new(ErrorKind::NotAServer)),
        }
    }
}

impl<S> Drop for Session<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<S> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("open", &self.io.is_open())
            .field("in_command", &self.in_command)
            .field("in_inquire", &self.inquire.is_active())
            .field("complete", &self.process_complete)
            .field("commands", &self.commands.len())
            .field("peer_pid", &self.peer_pid)
            .finish()
    }
}

/// `Write` adapter that sends everything as `D ` lines.
pub struct DataStream<'a> {
    io: &'a mut SessionIo,
}

impl DataStream<'_> {
    pub(crate) fn new(io: &mut SessionIo) -> DataStream<'_> {
        DataStream { io }
    }
}

fn into_io(err: LineError) -> io::Error {
    match err {
        LineError::Io(e) => e,
        other => io::Error::other(other),
    }
}

impl io::Write for DataStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.io.data_write(buf).map_err(into_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.io.data_flush().map(|_| ()).map_err(into_io)
    }
}
