//! Minimal echo server: accepts clients one after another and answers
//! `ECHO <text>` with the text as data.
//!
//! Run with:
//!   cargo run --example echo-server --features peer
//!
//! In another terminal:
//!   cargo run --features cli -- transact /tmp/ctlwire-echo-<pid>/echo.sock ECHO hello

use std::fs;

use ctlwire::peer::{ServerConfig, Session};
use ctlwire::transport::Listener;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_dir = std::env::temp_dir().join(format!("ctlwire-echo-{}", std::process::id()));
    fs::create_dir_all(&sock_dir)?;
    let sock_path = sock_dir.join("echo.sock");

    // Ensure no stale socket
    let _ = fs::remove_file(&sock_path);

    let listener = Listener::bind_unix(&sock_path)?;
    eprintln!("Listening on {}", sock_path.display());

    let mut server = Session::listening_server(listener, ServerConfig::default(), ())?;
    server.register_command(
        "ECHO",
        |session, args| session.send_data(args.as_bytes()),
        Some("ECHO <text>\n\nSend <text> back as data."),
    )?;
    server.serve()?;
    Ok(())
}
