//! Sessions for the ctlwire control protocol.
//!
//! A [`Session`] is one end of a connection. Servers register command
//! handlers and run [`Session::process`] (or [`Session::process_next`] on a
//! non-blocking channel); clients send commands with [`Session::transact`].
//!
//! ```text
//! client                     server
//!   |  <- OK Pleased to meet you
//!   |  -> GETINFO version
//!   |  <- D 1.0.0
//!   |  <- OK
//!   |  -> BYE
//!   |  <- OK closing connection
//! ```
//!
//! While handling a command a server may ask the client for data with
//! [`Session::inquire`]; the client answers through its
//! [`TransactHandler`].

pub mod builtin;
pub mod client;
pub mod command;
pub mod config;
pub mod connector;
pub mod dispatch;
pub mod error;
pub mod inquire;
pub mod log;
pub mod membuf;
pub mod server;
pub mod session;

pub use builtin::parse_option;
pub use client::{parse_response, Response, TransactHandler, Transcript};
pub use command::{split_command, CommandEntry, CommandTable, Handler};
pub use config::{ConnectConfig, LogCategory, LogConfig, ServerConfig, DEBUG_ENV, FULL_LOGGING_ENV};
pub use connector::{connect_channel, fork_connect, pipe_connect, socket_connect, Forked};
pub use error::{ErrorKind, PeerError, Result};
pub use inquire::Continuation;
pub use membuf::{Membuf, MembufState};
pub use server::AcceptOutcome;
pub use session::{BoundFd, DataStream, Role, Session};
