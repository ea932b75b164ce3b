//! OS-level channels for the ctlwire line protocol.
//!
//! Provides the byte transports a protocol session runs over:
//! - pipe pairs to and from a spawned child,
//! - Unix-domain stream sockets, optionally passing descriptors,
//! - loopback TCP with nonce authentication, standing in for a local socket.
//!
//! This is the lowest layer of ctlwire. Everything else builds on the
//! [`Transport`] trait and the [`Channel`] type provided here.

pub mod address;
pub mod error;
pub mod fdqueue;
pub mod listener;
pub mod nonce;
pub mod pipe;
pub mod spawn;
pub mod traits;
pub mod uds;

pub use address::Address;
pub use error::{Result, TransportError};
pub use fdqueue::{DescriptorQueue, MAX_PENDING_FDS};
pub use listener::{connect, Listener};
pub use nonce::{Nonce, NONCE_LEN};
pub use spawn::{ChildProcess, Fork, SpawnConfig, CONNECTION_FD_ENV, PIPE_CONNECT_PID_ENV};
pub use traits::{Channel, PeerCredentials, Transport, TransportKind};
pub use uds::UnixDomainSocket;
