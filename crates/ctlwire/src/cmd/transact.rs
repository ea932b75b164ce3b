use std::fs;

use ctlwire_peer::{pipe_connect, socket_connect, ConnectConfig, PeerError, Session, Transcript};
use ctlwire_transport::SpawnConfig;

use crate::cmd::TransactArgs;
use crate::exit::{io_error, peer_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_transact, OutputFormat, TransactOutput};

pub fn run(args: TransactArgs, format: OutputFormat) -> CliResult<i32> {
    let command = args.command.join(" ");
    let mut transcript = build_transcript(&args)?;
    let config = ConnectConfig::default().with_fd_passing(args.fd_passing);

    let mut session = connect(&args, &config)?;
    let outcome = session.transact(&command, &mut transcript);
    session.release();

    match outcome {
        Ok(()) => {
            print_transact(&TransactOutput::new(&command, transcript, None), format);
            Ok(SUCCESS)
        }
        Err(err @ PeerError::Remote { .. }) => {
            print_transact(&TransactOutput::new(&command, transcript, Some(&err)), format);
            Err(peer_error("command failed", err))
        }
        Err(err) => Err(peer_error("transact failed", err)),
    }
}

fn connect(args: &TransactArgs, config: &ConnectConfig) -> CliResult<Session> {
    if args.spawn {
        let spawn = SpawnConfig::new(&args.address).with_args(&args.args);
        pipe_connect(&spawn, config, ()).map_err(|err| peer_error("spawn failed", err))
    } else {
        socket_connect(&args.address, config, ()).map_err(|err| peer_error("connect failed", err))
    }
}

fn build_transcript(args: &TransactArgs) -> CliResult<Transcript> {
    let mut transcript = Transcript::new();
    for answer in &args.answers {
        let (keyword, value) = split_answer(answer)?;
        transcript = transcript.with_answer(keyword, value.as_bytes());
    }
    for answer in &args.answer_files {
        let (keyword, path) = split_answer(answer)?;
        let data = fs::read(path).map_err(|err| io_error(&format!("failed reading {path}"), err))?;
        transcript = transcript.with_answer(keyword, data);
    }
    Ok(transcript)
}

fn split_answer(input: &str) -> CliResult<(&str, &str)> {
    match input.split_once('=') {
        Some((keyword, value)) if !keyword.is_empty() => Ok((keyword, value)),
        _ => Err(CliError::new(
            USAGE,
            format!("answer must look like KEYWORD=VALUE: {input}"),
        )),
    }
}
