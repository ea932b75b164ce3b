//! Server setup: pipe servers, pre-connected channels and listening
//! sockets, plus the accept step that greets each client.

use ctlwire_transport::spawn::{inherited_channel, spawner_pid};
use ctlwire_transport::{Channel, Listener, Transport};
use tracing::{debug, info, warn};

use crate::config::{LogCategory, ServerConfig};
use crate::error::{ErrorKind, PeerError, Result};
use crate::session::{Role, Session};

const DEFAULT_HELLO: &str = "OK Pleased to meet you";

/// Where a server's connections come from.
#[derive(Debug, Default)]
pub(crate) struct AcceptSource {
    /// Listening socket for servers that accept repeatedly.
    listener: Option<Listener>,
    /// Accepts left for a server bound to a single channel.
    remaining: Option<u32>,
}

/// Result of [`Session::accept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// A client is connected and has been greeted.
    Accepted,
    /// A single-connection server has already served its client.
    Finished,
}

impl<S: 'static> Session<S> {
    /// A server on an already connected channel. It accepts exactly once.
    pub fn server(channel: Channel, config: ServerConfig, context: S) -> Result<Self> {
        let log = config.log_config();
        let mut session = Session::new(
            Role::Server,
            Some(Box::new(channel)),
            config,
            log,
            context,
        );
        session.accept.remaining = Some(1);
        session.register_builtins()?;
        if session.log_config().enabled(LogCategory::Init) {
            debug!(peer_pid = ?session.peer_pid, "server initialised on connected channel");
        }
        Ok(session)
    }

    /// A server started by a pipe client: talks over stdin/stdout, or over
    /// the socket named in the environment when the client passed one.
    pub fn pipe_server(config: ServerConfig, context: S) -> Result<Self> {
        let channel = inherited_channel()?;
        let mut session = Self::server(channel, config, context)?;
        session.peer_pid = spawner_pid().or(session.peer_pid);
        Ok(session)
    }

    /// A server accepting any number of clients from `listener`.
    pub fn listening_server(listener: Listener, config: ServerConfig, context: S) -> Result<Self> {
        let log = config.log_config();
        if log.enabled(LogCategory::Init) {
            debug!(path = ?listener.path(), emulated = listener.is_emulated(), "server listening");
        }
        let mut session = Session::new(Role::Server, None, config, log, context);
        session.accept.listener = Some(listener);
        session.register_builtins()?;
        Ok(session)
    }
}

impl<S> Session<S> {
    /// Wait for the next client and send it the greeting.
    ///
    /// A listening server closes the previous connection first. A server
    /// bound to a single channel returns [`AcceptOutcome::Finished`] on
    /// every call after the first.
    pub fn accept(&mut self) -> Result<AcceptOutcome> {
        self.require_server()?;
        if self.accept.listener.is_none() && self.accept.remaining.is_none() {
            return Err(PeerError::with_detail(
                ErrorKind::General,
                "session has no connection to accept",
            ));
        }
        if let Some(remaining) = self.accept.remaining.as_mut() {
            if *remaining == 0 {
                return Ok(AcceptOutcome::Finished);
            }
            *remaining -= 1;
        }

        if self.accept.listener.is_some() {
            self.finish();
        }
        if let Some(listener) = &self.accept.listener {
            let channel = listener.accept()?;
            self.attach(channel);
        }

        self.send_hello()?;
        Ok(AcceptOutcome::Accepted)
    }

    fn attach(&mut self, channel: Channel) {
        let credentials = channel.peer_credentials();
        self.io.replace_transport(Some(Box::new(channel)));
        self.in_command = false;
        self.process_complete = false;
        self.peer_credentials = credentials;
        self.peer_pid = credentials.map(|c| c.pid);
        info!(peer_pid = ?self.peer_pid, "client connected");
    }

    fn send_hello(&mut self) -> Result<()> {
        let written = match self.hello_line.clone() {
            Some(hello) => match hello.rsplit_once('\n') {
                Some((comments, last)) => {
                    for line in comments.split('\n') {
                        self.io
                            .write_line(Some(b"# "), line.as_bytes())
                            .map_err(PeerError::Write)?;
                    }
                    self.io.write_line(Some(b"OK "), last.as_bytes())
                }
                None => self.io.write_line(Some(b"OK "), hello.as_bytes()),
            },
            None => {
                let hello = match self.peer_pid {
                    Some(pid) => format!("{DEFAULT_HELLO}, process {pid}"),
                    None => DEFAULT_HELLO.to_string(),
                };
                self.io.write_line(None, hello.as_bytes())
            }
        };
        written.map_err(PeerError::Write)
    }

    /// Accept and serve clients until a single-connection server is done.
    ///
    /// Failed accepts and failed connections are logged and skipped; other
    /// errors end the loop.
    pub fn serve(&mut self) -> Result<()> {
        loop {
            match self.accept() {
                Ok(AcceptOutcome::Finished) => return Ok(()),
                Ok(AcceptOutcome::Accepted) => {}
                Err(e) if e.kind() == ErrorKind::AcceptFailed => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
                Err(e) => return Err(e),
            }
            if let Err(e) = self.process() {
                warn!(error = %e, "connection ended with error");
            }
        }
    }
}
