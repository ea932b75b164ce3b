use std::fs::File;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use crate::error::{Result, TransportError};
use crate::fdqueue::DescriptorQueue;

/// Credentials of the process on the other end of a local socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
}

/// The closed set of channel kinds a session can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Two unidirectional pipes.
    Pipe,
    /// A connected Unix-domain stream socket.
    Unix,
    /// A TCP stream (loopback emulation of a local socket).
    Tcp,
    /// A Unix-domain stream socket that also carries descriptors.
    FdPassing,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pipe => "pipe",
            Self::Unix => "unix",
            Self::Tcp => "tcp",
            Self::FdPassing => "unix+fd",
        }
    }
}

/// Byte transport underneath a protocol session.
///
/// Reads and writes come from `Read`/`Write`; the remaining operations have
/// defaults for transports that cannot pass descriptors or report peers.
pub trait Transport: Read + Write {
    fn kind(&self) -> TransportKind;

    /// Send a descriptor to the peer.
    fn send_fd(&mut self, _fd: BorrowedFd<'_>) -> Result<()> {
        Err(TransportError::Unsupported("descriptor passing"))
    }

    /// Claim the oldest descriptor received from the peer.
    fn receive_fd(&mut self) -> Result<OwnedFd> {
        Err(TransportError::Unsupported("descriptor passing"))
    }

    /// Close every received but unclaimed descriptor.
    fn close_pending_fds(&mut self) {}

    fn peer_credentials(&self) -> Option<PeerCredentials> {
        None
    }

    /// Descriptor the session reads from, for callers driving an event loop.
    fn inbound_fd(&self) -> Option<RawFd> {
        None
    }

    /// Descriptor the session writes to.
    fn outbound_fd(&self) -> Option<RawFd> {
        None
    }
}

/// A connected channel: pipes, a stream socket, or a descriptor-passing
/// socket. Implements [`Transport`].
///
/// Dropping the channel closes its descriptors along with any received
/// descriptors that were never claimed.
pub struct Channel {
    inner: ChannelInner,
}

enum ChannelInner {
    Pipe { input: File, output: File },
    Unix(UnixStream),
    Tcp(TcpStream),
    FdPassing {
        stream: UnixStream,
        pending: DescriptorQueue,
    },
}

impl Channel {
    /// Wrap a pair of pipe ends: `input` is read, `output` is written.
    pub fn pipe(input: OwnedFd, output: OwnedFd) -> Self {
        Self {
            inner: ChannelInner::Pipe {
                input: File::from(input),
                output: File::from(output),
            },
        }
    }

    /// Duplicate the process's stdin/stdout into a pipe channel.
    pub fn stdio() -> Result<Self> {
        let input = std::io::stdin().as_fd().try_clone_to_owned()?;
        let output = std::io::stdout().as_fd().try_clone_to_owned()?;
        Ok(Self::pipe(input, output))
    }

    pub fn from_unix(stream: UnixStream) -> Self {
        Self {
            inner: ChannelInner::Unix(stream),
        }
    }

    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: ChannelInner::Tcp(stream),
        }
    }

    /// Wrap a Unix stream socket with descriptor passing enabled.
    pub fn fd_passing(stream: UnixStream) -> Self {
        Self {
            inner: ChannelInner::FdPassing {
                stream,
                pending: DescriptorQueue::new(),
            },
        }
    }

    /// Enable descriptor passing on a Unix socket channel. Other kinds are
    /// returned unchanged.
    pub fn into_fd_passing(self) -> Self {
        match self.inner {
            ChannelInner::Unix(stream) => Self::fd_passing(stream),
            inner => Self { inner },
        }
    }

    /// Put every descriptor of the channel in (non-)blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        match &self.inner {
            ChannelInner::Pipe { input, output } => {
                crate::pipe::set_nonblocking(input.as_raw_fd(), nonblocking)?;
                crate::pipe::set_nonblocking(output.as_raw_fd(), nonblocking)?;
            }
            ChannelInner::Unix(stream) | ChannelInner::FdPassing { stream, .. } => {
                stream.set_nonblocking(nonblocking)?
            }
            ChannelInner::Tcp(stream) => stream.set_nonblocking(nonblocking)?,
        }
        Ok(())
    }

    /// Number of received descriptors waiting to be claimed.
    pub fn pending_fds(&self) -> usize {
        match &self.inner {
            ChannelInner::FdPassing { pending, .. } => pending.len(),
            _ => 0,
        }
    }
}

impl Read for Channel {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            ChannelInner::Pipe { input, .. } => input.read(buf),
            ChannelInner::Unix(stream) => stream.read(buf),
            ChannelInner::Tcp(stream) => stream.read(buf),
            ChannelInner::FdPassing { stream, pending } => {
                crate::uds::recv_with_fds(stream.as_fd(), buf, pending)
            }
        }
    }
}

impl Write for Channel {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            ChannelInner::Pipe { output, .. } => output.write(buf),
            ChannelInner::Unix(stream) | ChannelInner::FdPassing { stream, .. } => {
                stream.write(buf)
            }
            ChannelInner::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            ChannelInner::Pipe { output, .. } => output.flush(),
            ChannelInner::Unix(stream) | ChannelInner::FdPassing { stream, .. } => {
                stream.flush()
            }
            ChannelInner::Tcp(stream) => stream.flush(),
        }
    }
}

impl Transport for Channel {
    fn kind(&self) -> TransportKind {
        match &self.inner {
            ChannelInner::Pipe { .. } => TransportKind::Pipe,
            ChannelInner::Unix(_) => TransportKind::Unix,
            ChannelInner::Tcp(_) => TransportKind::Tcp,
            ChannelInner::FdPassing { .. } => TransportKind::FdPassing,
        }
    }

    fn send_fd(&mut self, fd: BorrowedFd<'_>) -> Result<()> {
        match &mut self.inner {
            ChannelInner::FdPassing { stream, .. } => {
                crate::uds::send_with_fd(stream.as_fd(), fd).map_err(Into::into)
            }
            _ => Err(TransportError::Unsupported("descriptor passing")),
        }
    }

    fn receive_fd(&mut self) -> Result<OwnedFd> {
        match &mut self.inner {
            ChannelInner::FdPassing { pending, .. } => {
                pending.pop().ok_or(TransportError::NoPendingDescriptor)
            }
            _ => Err(TransportError::Unsupported("descriptor passing")),
        }
    }

    fn close_pending_fds(&mut self) {
        if let ChannelInner::FdPassing { pending, .. } = &mut self.inner {
            pending.clear();
        }
    }

    fn peer_credentials(&self) -> Option<PeerCredentials> {
        match &self.inner {
            ChannelInner::Unix(stream) | ChannelInner::FdPassing { stream, .. } => {
                crate::uds::peer_credentials(stream.as_fd())
            }
            _ => None,
        }
    }

    fn inbound_fd(&self) -> Option<RawFd> {
        Some(match &self.inner {
            ChannelInner::Pipe { input, .. } => input.as_raw_fd(),
            ChannelInner::Unix(stream) | ChannelInner::FdPassing { stream, .. } => {
                stream.as_raw_fd()
            }
            ChannelInner::Tcp(stream) => stream.as_raw_fd(),
        })
    }

    fn outbound_fd(&self) -> Option<RawFd> {
        Some(match &self.inner {
            ChannelInner::Pipe { output, .. } => output.as_raw_fd(),
            ChannelInner::Unix(stream) | ChannelInner::FdPassing { stream, .. } => {
                stream.as_raw_fd()
            }
            ChannelInner::Tcp(stream) => stream.as_raw_fd(),
        })
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut d = f.debug_struct("Channel");
        d.field("kind", &self.kind().as_str());
        d.field("inbound_fd", &self.inbound_fd());
        d.field("outbound_fd", &self.outbound_fd());
        if let ChannelInner::FdPassing { pending, .. } = &self.inner {
            d.field("pending_fds", &pending.len());
        }
        d.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_channel_reports_both_descriptors() {
        let (r1, w1) = crate::pipe::pipe().unwrap();
        let (r2, w2) = crate::pipe::pipe().unwrap();
        let raw_in = r1.as_raw_fd();
        let raw_out = w2.as_raw_fd();

        let mut near = Channel::pipe(r1, w2);
        let mut far = Channel::pipe(r2, w1);
        assert_eq!(near.kind(), TransportKind::Pipe);
        assert_eq!(near.inbound_fd(), Some(raw_in));
        assert_eq!(near.outbound_fd(), Some(raw_out));

        near.write_all(b"OK\n").unwrap();
        let mut buf = [0u8; 3];
        far.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"OK\n");
    }

    #[test]
    fn test_plain_channels_reject_descriptor_passing() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut channel = Channel::from_unix(a);
        assert!(matches!(
            channel.receive_fd(),
            Err(TransportError::Unsupported(_))
        ));

        let devnull = File::open("/dev/null").unwrap();
        assert!(matches!(
            channel.send_fd(devnull.as_fd()),
            Err(TransportError::Unsupported(_))
        ));
    }

    #[test]
    fn test_into_fd_passing_upgrades_unix_only() {
        let (a, _b) = UnixStream::pair().unwrap();
        let channel = Channel::from_unix(a).into_fd_passing();
        assert_eq!(channel.kind(), TransportKind::FdPassing);

        let (r, w) = crate::pipe::pipe().unwrap();
        let channel = Channel::pipe(r, w).into_fd_passing();
        assert_eq!(channel.kind(), TransportKind::Pipe);
    }

    #[test]
    fn test_unix_pair_same_fd_both_directions() {
        let (a, _b) = UnixStream::pair().unwrap();
        let raw = a.as_raw_fd();
        let channel = Channel::from_unix(a);
        assert_eq!(channel.inbound_fd(), Some(raw));
        assert_eq!(channel.outbound_fd(), Some(raw));
    }
}
