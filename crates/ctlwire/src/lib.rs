//! Line-oriented control protocol for talking to helper processes.
//!
//! ctlwire connects a client to a server over pipes, Unix sockets or a
//! nonce-guarded loopback socket and exchanges newline-terminated
//! commands, status lines, data lines and inquiries.
//!
//! # Crate Structure
//!
//! - [`transport`]: channels, listeners, spawning and descriptor passing
//! - [`line`]: line framing and the data-line codec
//! - [`peer`]: sessions, command dispatch and transactions (behind the
//!   `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use ctlwire_transport::*;
}

/// Re-export line framing types.
pub mod line {
    pub use ctlwire_line::*;
}

/// Re-export session types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use ctlwire_peer::*;
}
