//! Fork a server without exec and talk to it over a pipe pair.
//!
//! Run with:
//!   cargo run --example fork-client --features peer

use ctlwire::peer::{fork_connect, ConnectConfig, Forked, ServerConfig, Session, Transcript};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match fork_connect(&ConnectConfig::default(), ())? {
        Forked::Server(channel) => {
            let mut server = Session::server(channel, ServerConfig::default(), 0u32)?;
            server.register_command(
                "COUNT",
                |session, _| {
                    *session.context_mut() += 1;
                    let count = session.context().to_string();
                    session.send_data(count.as_bytes())
                },
                None,
            )?;
            let code = match server.serve() {
                Ok(()) => 0,
                Err(err) => {
                    eprintln!("server failed: {err}");
                    1
                }
            };
            drop(server);
            std::process::exit(code);
        }
        Forked::Client(mut client) => {
            for _ in 0..3 {
                let mut transcript = Transcript::new();
                client.transact("COUNT", &mut transcript)?;
                println!("count = {}", String::from_utf8_lossy(&transcript.data));
            }
            client.release();
        }
    }
    Ok(())
}
