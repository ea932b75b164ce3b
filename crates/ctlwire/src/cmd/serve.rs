use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ctlwire_peer::{AcceptOutcome, ErrorKind, PeerError, ServerConfig, Session};
use ctlwire_transport::{connect, Address, Listener};

use crate::cmd::ServeArgs;
use crate::exit::{peer_error, transport_error, CliError, CliResult, SUCCESS, USAGE};

/// Per-server state shared by the demonstration commands.
#[derive(Debug, Default)]
struct DemoState {
    options: BTreeMap<String, String>,
    max_data: usize,
}

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let config = ServerConfig::default().with_strict_options(args.strict_options);
    let state = DemoState {
        max_data: args.max_data,
        ..DemoState::default()
    };

    let running = Arc::new(AtomicBool::new(true));
    if let Some(path) = args.path.as_ref().filter(|_| !args.stdio) {
        install_ctrlc_handler(running.clone(), Address::Local(path.clone()))?;
    }

    let mut session = if args.stdio {
        Session::pipe_server(config, state).map_err(|err| peer_error("pipe server failed", err))?
    } else {
        let path = args
            .path
            .as_ref()
            .ok_or_else(|| CliError::new(USAGE, "a socket path is required without --stdio"))?;
        let listener = if args.nonce {
            Listener::bind_emulated(path)
        } else {
            Listener::bind_unix(path)
        }
        .map_err(|err| transport_error("bind failed", err))?;
        tracing::info!(path = %path.display(), emulated = args.nonce, "listening");
        Session::listening_server(listener, config, state)
            .map_err(|err| peer_error("server setup failed", err))?
    };

    if let Some(hello) = &args.hello {
        session.set_hello_line(Some(hello));
    }
    register_commands(&mut session).map_err(|err| peer_error("command setup failed", err))?;

    let mut served = 0usize;
    while running.load(Ordering::SeqCst) {
        if args.count.is_some_and(|count| served >= count) {
            break;
        }
        let accepted = session.accept();
        if !running.load(Ordering::SeqCst) {
            tracing::info!("interrupted; shutting down");
            break;
        }
        match accepted {
            Ok(AcceptOutcome::Finished) => break,
            Ok(AcceptOutcome::Accepted) => {}
            Err(err) if err.kind() == ErrorKind::AcceptFailed => {
                tracing::warn!(error = %err, "rejected connection");
                continue;
            }
            Err(err) => return Err(peer_error("accept failed", err)),
        }
        served += 1;
        tracing::info!(peer_pid = ?session.peer_pid(), "client connected");
        if let Err(err) = session.process() {
            tracing::warn!(error = %err, "connection ended with error");
        }
    }

    Ok(SUCCESS)
}

fn register_commands(session: &mut Session<DemoState>) -> ctlwire_peer::Result<()> {
    session.register_command(
        "ECHO",
        |s, args| s.send_data(args.as_bytes()),
        Some("ECHO <text>\n\nSend <text> back as data."),
    )?;
    session.register_command(
        "GETINFO",
        getinfo,
        Some("GETINFO version|pid|peer|options\n\nReport server details as data."),
    )?;
    session.register_command(
        "GETDATA",
        getdata,
        Some("GETDATA\n\nInquire DATA from the client and send it back."),
    )?;
    session.set_option_handler(|s, name, value| {
        tracing::debug!(name, value, "option set");
        s.context_mut()
            .options
            .insert(name.to_string(), value.to_string());
        Ok(())
    });
    Ok(())
}

fn getinfo(session: &mut Session<DemoState>, args: &str) -> ctlwire_peer::Result<()> {
    let reply = match args.trim() {
        "version" => env!("CARGO_PKG_VERSION").to_string(),
        "pid" => std::process::id().to_string(),
        "peer" => match session.peer_pid() {
            Some(pid) => pid.to_string(),
            None => return Err(PeerError::with_detail(ErrorKind::NotFound, "peer pid unknown")),
        },
        "options" => session
            .context()
            .options
            .iter()
            .map(|(name, value)| format!("{name}={value}\n"))
            .collect(),
        "" => return Err(PeerError::parameter("missing GETINFO item")),
        other => return Err(PeerError::parameter(format!("unknown GETINFO item '{other}'"))),
    };
    session.send_data(reply.as_bytes())
}

fn getdata(session: &mut Session<DemoState>, _args: &str) -> ctlwire_peer::Result<()> {
    let max_data = session.context().max_data;
    let data = session.inquire("DATA", max_data)?;
    session.write_status("RECEIVED", &data.len().to_string())?;
    session.send_data(&data)
}

/// Clear `running` on SIGINT and dial `listener` once so a blocked
/// accept returns.
fn install_ctrlc_handler(running: Arc<AtomicBool>, listener: Address) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
        let _ = connect(&listener);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
