use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::address::Address;
use crate::error::{Result, TransportError};
use crate::nonce::{check_nonce, read_nonce_file, send_nonce, Nonce, NonceFile};
use crate::traits::Channel;
use crate::uds::UnixDomainSocket;

/// A listening endpoint for local servers.
///
/// Either a real Unix-domain socket, or a loopback TCP port whose number and
/// nonce are published in a file at the requested path.
#[derive(Debug)]
pub struct Listener {
    inner: ListenerInner,
    fd_passing: bool,
}

#[derive(Debug)]
enum ListenerInner {
    Unix(UnixDomainSocket),
    Emulated {
        listener: TcpListener,
        nonce: Nonce,
        file: NonceFile,
    },
}

impl Listener {
    /// Listen on a Unix-domain socket at `path`.
    pub fn bind_unix(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            inner: ListenerInner::Unix(UnixDomainSocket::bind(path)?),
            fd_passing: false,
        })
    }

    /// Listen on an ephemeral loopback port and publish it with a fresh
    /// nonce in a file at `path`.
    pub fn bind_emulated(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(|e| {
            TransportError::Bind {
                path: path.clone(),
                source: e,
            }
        })?;
        let port = listener.local_addr()?.port();
        let nonce = Nonce::generate()?;
        let file = NonceFile::create(path, port, &nonce)?;
        info!(path = ?file.path(), port, "listening on emulated local socket");
        Ok(Self {
            inner: ListenerInner::Emulated {
                listener,
                nonce,
                file,
            },
            fd_passing: false,
        })
    }

    /// Accepted Unix connections carry descriptors.
    pub fn with_fd_passing(mut self, enabled: bool) -> Self {
        self.fd_passing = enabled;
        self
    }

    /// Accept one connection. On the emulated listener the peer must present
    /// the nonce first; a mismatch closes the connection and returns
    /// [`TransportError::NonceMismatch`].
    pub fn accept(&self) -> Result<Channel> {
        match &self.inner {
            ListenerInner::Unix(socket) => {
                let stream = socket.accept()?;
                Ok(if self.fd_passing {
                    Channel::fd_passing(stream)
                } else {
                    Channel::from_unix(stream)
                })
            }
            ListenerInner::Emulated {
                listener, nonce, ..
            } => {
                let (mut stream, peer) = listener.accept().map_err(TransportError::Accept)?;
                if let Err(e) = check_nonce(&mut stream, nonce) {
                    warn!(%peer, "rejecting connection: {e}");
                    let _ = stream.shutdown(std::net::Shutdown::Both);
                    return Err(e);
                }
                debug!(%peer, "accepted authenticated loopback connection");
                Ok(Channel::from_tcp(stream))
            }
        }
    }

    /// The filesystem path this listener is published at.
    pub fn path(&self) -> &Path {
        match &self.inner {
            ListenerInner::Unix(socket) => socket.path(),
            ListenerInner::Emulated { file, .. } => file.path(),
        }
    }

    pub fn is_emulated(&self) -> bool {
        matches!(self.inner, ListenerInner::Emulated { .. })
    }

    pub fn as_fd(&self) -> BorrowedFd<'_> {
        match &self.inner {
            ListenerInner::Unix(socket) => socket.as_fd(),
            ListenerInner::Emulated { listener, .. } => listener.as_fd(),
        }
    }
}

/// Connect to `address`.
///
/// A local path that is a regular file is treated as a nonce file: the
/// loopback port it names is dialled and the nonce sent before returning.
pub fn connect(address: &Address) -> Result<Channel> {
    match address {
        Address::Local(path) => {
            let is_nonce_file = std::fs::metadata(path)
                .map(|m| m.file_type().is_file() && !m.file_type().is_socket())
                .unwrap_or(false);
            if is_nonce_file {
                let (port, nonce) = read_nonce_file(path)?;
                let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).map_err(|e| {
                    TransportError::Connect {
                        address: address.to_string(),
                        source: e,
                    }
                })?;
                send_nonce(&mut stream, &nonce)?;
                debug!(?path, port, "connected to emulated local socket");
                Ok(Channel::from_tcp(stream))
            } else {
                Ok(Channel::from_unix(UnixDomainSocket::connect(path)?))
            }
        }
        Address::Tcp(addr) => {
            let stream = TcpStream::connect(addr).map_err(|e| TransportError::Connect {
                address: address.to_string(),
                source: e,
            })?;
            debug!(%addr, "connected over tcp");
            Ok(Channel::from_tcp(stream))
        }
    }
}
