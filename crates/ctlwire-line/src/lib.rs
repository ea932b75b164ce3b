//! Line framing for the ctlwire control protocol.
//!
//! Every protocol message is one line of at most [`LINE_LENGTH`] bytes,
//! terminated by `\n` (a preceding `\r` is tolerated). Binary payloads travel
//! in `D ` lines with `%`, CR and LF escaped as `%XX`.
//!
//! - [`LineReader`] reassembles lines, carrying over bytes read past a
//!   terminator.
//! - [`write_line`] frames and truncates outbound lines.
//! - [`DataWriter`] chunks and escapes outbound data lines.

pub mod codec;
pub mod data;
pub mod error;
pub mod monitor;
pub mod reader;
pub mod writer;

pub use codec::{escape, unescape, unescape_into, DATA_LINE_LIMIT, DATA_PREFIX, LINE_LENGTH};
pub use data::DataWriter;
pub use error::{LineError, Result};
pub use monitor::{Direction, LineObserver, MonitorFlags, Unobserved};
pub use reader::{LineReader, WOULD_BLOCK_BACKOFF};
pub use writer::{first_line, write_all, write_line};
