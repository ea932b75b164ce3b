//! Client connections: spawning a pipe server, forking one, or dialing a
//! listening socket.

use ctlwire_transport::spawn::{
    fix_signals, fork_pipe, fork_socketpair, spawn_pipe, spawn_socketpair,
};
use ctlwire_transport::{connect, Address, Channel, Fork, SpawnConfig, Transport};
use tracing::{debug, info};

use crate::config::{ConnectConfig, LogCategory, ServerConfig};
use crate::error::Result;
use crate::session::{Role, Session};

/// Outcome of [`fork_connect`].
#[derive(Debug)]
pub enum Forked<S> {
    /// The parent process, connected to the child.
    Client(Session<S>),
    /// The child process. It should build a server on the channel with
    /// [`Session::server`] and exit when done.
    Server(Channel),
}

fn client_session<S>(channel: Channel, config: &ConnectConfig, context: S) -> Session<S> {
    let log = config.log_config();
    if log.enabled(LogCategory::Ctx) {
        debug!(kind = ?channel.kind(), "client channel opened");
    }
    let mut session = Session::new(
        Role::Client,
        Some(Box::new(channel)),
        ServerConfig::default(),
        log,
        context,
    );
    session.no_waitpid = config.no_waitpid;
    session
}

/// Start `spawn` as a pipe server and wait for its greeting.
///
/// With `fd_passing` the child gets a socket pair instead of two pipes
/// and learns its descriptor from the environment.
pub fn pipe_connect<S>(spawn: &SpawnConfig, config: &ConnectConfig, context: S) -> Result<Session<S>> {
    if !config.no_fix_signals {
        fix_signals();
    }
    let (channel, child) = if config.fd_passing {
        spawn_socketpair(spawn)?
    } else {
        spawn_pipe(spawn)?
    };
    let pid = child.id();
    info!(program = %spawn.program.display(), pid, "spawned server");

    let mut session = client_session(channel, config, context);
    session.peer_pid = Some(pid);
    session.child = Some(child);
    session.initial_handshake()?;
    Ok(session)
}

/// Fork without exec; the child becomes the server.
pub fn fork_connect<S>(config: &ConnectConfig, context: S) -> Result<Forked<S>> {
    if !config.no_fix_signals {
        fix_signals();
    }
    let forked = if config.fd_passing {
        fork_socketpair()?
    } else {
        fork_pipe()?
    };
    match forked {
        Fork::Child { channel } => Ok(Forked::Server(channel)),
        Fork::Parent { channel, child } => {
            let mut session = client_session(channel, config, context);
            session.peer_pid = Some(child.id());
            session.child = Some(child);
            session.initial_handshake()?;
            Ok(Forked::Client(session))
        }
    }
}

/// Connect to the server at `address` (a socket path, nonce file,
/// `file://` URL or TCP address) and wait for its greeting.
pub fn socket_connect<S>(address: &str, config: &ConnectConfig, context: S) -> Result<Session<S>> {
    if !config.no_fix_signals {
        fix_signals();
    }
    let address = Address::parse(address)?;
    let mut channel = connect(&address)?;
    if config.fd_passing {
        channel = channel.into_fd_passing();
    }
    info!(?address, "connected to socket server");
    connect_channel(channel, config, context)
}

/// Use an already connected channel as a client.
pub fn connect_channel<S>(channel: Channel, config: &ConnectConfig, context: S) -> Result<Session<S>> {
    let mut session = client_session(channel, config, context);
    session.initial_handshake()?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread;

    use ctlwire_transport::Listener;

    use super::*;
    use crate::client::Transcript;
    use crate::config::LogConfig;
    use crate::error::{ErrorKind, PeerError};

    fn quiet() -> ConnectConfig {
        ConnectConfig::default().with_log(Arc::new(LogConfig::quiet()))
    }

    fn shell(script: &str) -> SpawnConfig {
        SpawnConfig::new("/bin/sh").with_args(["-c", script])
    }

    fn make_path(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "ctlwire-connect-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("server.sock")
    }

    #[test]
    fn pipe_connect_talks_to_spawned_server() {
        let script = r#"
            printf 'OK scripted server\n'
            read cmd
            printf 'S GOT %s\nD 50%%25 done\nOK\n' "$cmd"
            read bye
            printf 'OK closing connection\n'
        "#;
        let mut session = pipe_connect(&shell(script), &quiet(), ()).expect("server should start");
        assert!(session.peer_pid().is_some());

        let mut transcript = Transcript::new();
        session.transact("GETDATA", &mut transcript).unwrap();
        assert_eq!(transcript.status, vec!["GOT GETDATA"]);
        assert_eq!(transcript.data, b"50% done");
        session.release();
    }

    #[test]
    fn pipe_connect_rejects_bad_greeting() {
        let err = pipe_connect(&shell("printf 'ERR 257 nope\\n'"), &quiet(), ()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectFailed);
    }

    #[test]
    fn pipe_connect_reports_silent_server() {
        let err = pipe_connect(&shell("exit 0"), &quiet(), ()).unwrap_err();
        assert!(err.is_eof(), "{err:?}");
    }

    #[test]
    fn pipe_connect_fails_for_missing_program() {
        let err = pipe_connect(
            &SpawnConfig::new("/nonexistent/ctlwire-server"),
            &quiet(),
            (),
        )
        .unwrap_err();
        assert!(matches!(err, PeerError::Transport(_)), "{err:?}");
    }

    #[test]
    fn socket_connect_reaches_listening_server() {
        let path = make_path("uds");
        let listener = Listener::bind_unix(&path).expect("listener should bind");
        let server = thread::spawn(move || {
            let mut session = Session::listening_server(
                listener,
                ServerConfig::default().with_log(Arc::new(LogConfig::quiet())),
                (),
            )
            .unwrap();
            session.set_hello_line(Some("uds ready"));
            session
                .register_command("PING", |s, _| s.write_status("PONG", ""), None)
                .unwrap();
            session.accept().unwrap();
            session.process().unwrap();
        });

        let mut session =
            socket_connect(path.to_str().unwrap(), &quiet(), ()).expect("client should connect");
        let mut transcript = Transcript::new();
        session.transact("PING", &mut transcript).unwrap();
        assert_eq!(transcript.status, vec!["PONG"]);
        session.release();
        server.join().unwrap();
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn socket_connect_rejects_bad_address() {
        let err = socket_connect("bogus://", &quiet(), ()).unwrap_err();
        assert!(matches!(err, PeerError::Transport(_)), "{err:?}");
    }
}
