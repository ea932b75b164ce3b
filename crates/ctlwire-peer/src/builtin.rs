//! Session-control commands every server understands.

use std::sync::Arc;

use crate::command::{CommandEntry, Handler};
use crate::error::{ErrorKind, PeerError, Result};
use crate::session::{BoundFd, Session};

type BuiltinFn<S> = fn(&mut Session<S>, &str) -> Result<()>;

struct Builtin<S> {
    name: &'static str,
    handler: BuiltinFn<S>,
    /// Registered on every server without being asked for.
    always: bool,
    help: &'static str,
}

fn builtins<S>() -> [Builtin<S>; 10] {
    [
        Builtin {
            name: "NOP",
            handler: nop,
            always: true,
            help: "NOP\n\nNo operation.  Returns OK without any action.",
        },
        Builtin {
            name: "CANCEL",
            handler: cancel,
            always: true,
            help: "CANCEL\n\nNotify the server of a cancellation request.",
        },
        Builtin {
            name: "OPTION",
            handler: option,
            always: true,
            help: "OPTION <name>[ [=] <value>]\n\n\
                   Set an option for the current session.\n\
                   A leading \"--\" on the name is ignored.",
        },
        Builtin {
            name: "BYE",
            handler: bye,
            always: true,
            help: "BYE\n\nClose the connection.\nThe server responds with \"OK\".",
        },
        Builtin {
            name: "AUTH",
            handler: not_implemented,
            always: true,
            help: "AUTH\n\nReserved for future use.",
        },
        Builtin {
            name: "RESET",
            handler: reset,
            always: true,
            help: "RESET\n\n\
                   Reset the connection but not any existing authentication.\n\
                   The server responds with \"OK\".",
        },
        Builtin {
            name: "END",
            handler: not_implemented,
            always: true,
            help: "END\n\nUsed by a client to mark the end of raw data.",
        },
        Builtin {
            name: "HELP",
            handler: help,
            always: true,
            help: "HELP [<command>]\n\n\
                   List all commands, or show the help text of <command>.",
        },
        Builtin {
            name: "INPUT",
            handler: input,
            always: false,
            help: "INPUT FD[=<n>]\n\n\
                   Use descriptor <n>, or one passed over the socket, as\n\
                   input for the following command.",
        },
        Builtin {
            name: "OUTPUT",
            handler: output,
            always: false,
            help: "OUTPUT FD[=<n>]\n\n\
                   Use descriptor <n>, or one passed over the socket, as\n\
                   output for the following command.",
        },
    ]
}

impl<S: 'static> Session<S> {
    /// Register `name` without a handler of its own: a built-in command of
    /// that name if there is one, else a stub answering "server fault".
    pub fn register_default(&mut self, name: &str, help: Option<&str>) -> Result<()> {
        let table = builtins::<S>();
        let builtin = table
            .iter()
            .find(|b| b.name == name)
            .or_else(|| table.iter().find(|b| b.name.eq_ignore_ascii_case(name)));
        let handler: Handler<S> = match builtin {
            Some(b) => Arc::new(b.handler),
            None => Arc::new(no_handler::<S>),
        };
        let help = help.or(builtin.map(|b| b.help));
        self.commands.insert(name, handler, help)
    }

    pub(crate) fn register_builtins(&mut self) -> Result<()> {
        for builtin in builtins::<S>().iter().filter(|b| b.always) {
            self.commands
                .insert(builtin.name, Arc::new(builtin.handler), Some(builtin.help))?;
        }
        Ok(())
    }
}

fn no_handler<S>(_: &mut Session<S>, _: &str) -> Result<()> {
    Err(PeerError::with_detail(
        ErrorKind::ServerFault,
        "no handler registered",
    ))
}

fn nop<S>(_: &mut Session<S>, _: &str) -> Result<()> {
    Ok(())
}

fn not_implemented<S>(_: &mut Session<S>, _: &str) -> Result<()> {
    Err(PeerError::new(ErrorKind::NotImplemented))
}

fn cancel<S>(session: &mut Session<S>, args: &str) -> Result<()> {
    if let Some(hook) = session.hooks.cancel.clone() {
        let _ = hook(session, args);
    }
    Err(PeerError::new(ErrorKind::NotImplemented))
}

fn bye<S>(session: &mut Session<S>, args: &str) -> Result<()> {
    if let Some(hook) = session.hooks.bye.clone() {
        let _ = hook(session, args);
    }
    session.close_input_fd();
    session.close_output_fd();
    session.process_complete = true;
    Ok(())
}

fn reset<S>(session: &mut Session<S>, args: &str) -> Result<()> {
    let rc = match session.hooks.reset.clone() {
        Some(hook) => hook(session, args),
        None => Ok(()),
    };
    if rc.is_ok() {
        session.close_input_fd();
        session.close_output_fd();
        session.close_pending_fds();
    }
    rc
}

const BLANKS: [char; 2] = [' ', '\t'];

/// Split an `OPTION` argument into name and value.
///
/// Accepts `name`, `name value`, `name=value` and `name = value`. A
/// leading `--` on the name is dropped; a single leading `-` is an error.
pub fn parse_option(args: &str) -> Result<(&str, &str)> {
    let line = args.trim_start_matches(BLANKS);
    if line.is_empty() {
        return Err(PeerError::syntax("argument required"));
    }
    if line.starts_with('=') {
        return Err(PeerError::syntax("no option name given"));
    }

    let end = line.find([' ', '\t', '=']).unwrap_or(line.len());
    let (mut key, rest) = line.split_at(end);
    let mut value = rest.trim_start_matches(BLANKS);
    if let Some(after) = value.strip_prefix('=') {
        value = after.trim_start_matches(BLANKS);
        if value.is_empty() {
            return Err(PeerError::syntax("option argument expected"));
        }
    }
    let value = value.trim_end_matches(BLANKS);

    if key.len() > 2 && key.starts_with("--") {
        key = &key[2..];
    }
    if key.starts_with('-') {
        return Err(PeerError::syntax("option should not begin with one dash"));
    }
    Ok((key, value))
}

fn option<S>(session: &mut Session<S>, args: &str) -> Result<()> {
    let (key, value) = parse_option(args)?;
    match session.hooks.option.clone() {
        Some(handler) => handler(session, key, value),
        None if session.config.strict_options => Err(PeerError::with_detail(
            ErrorKind::NotImplemented,
            "options are not supported",
        )),
        None => Ok(()),
    }
}

fn help_summary<S>(entry: &CommandEntry<S>) -> String {
    let name = entry.name();
    if let Some(help) = entry.help() {
        let follows = help.as_bytes().get(name.len());
        if help.starts_with(name) && matches!(follows, None | Some(b'\n') | Some(b' ')) {
            return help.lines().next().unwrap_or(name).to_string();
        }
    }
    name.to_string()
}

fn help<S>(session: &mut Session<S>, args: &str) -> Result<()> {
    let lines: Vec<String> = match args.split([' ', '\t']).next().filter(|n| !n.is_empty()) {
        None => session.commands.iter().map(help_summary).collect(),
        Some(name) => {
            let entry = session
                .commands
                .lookup_ignore_case(name)
                .ok_or_else(|| PeerError::new(ErrorKind::UnknownCommand))?;
            let help = entry
                .help()
                .ok_or_else(|| PeerError::with_detail(ErrorKind::NotFound, "no help available"))?;
            help.lines().map(str::to_string).collect()
        }
    };
    for line in lines {
        session
            .io
            .write_line(Some(b"# "), line.as_bytes())
            .map_err(PeerError::Write)?;
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum Binding {
    Input,
    Output,
}

impl<S> Session<S> {
    /// Parse an `FD[=<n>]` argument. Without a number the descriptor is
    /// taken from those received over the socket. Returns the binding and
    /// the rest of the argument string.
    pub fn parse_fd_arg<'a>(&mut self, args: &'a str) -> Result<(BoundFd, &'a str)> {
        let bytes = args.as_bytes();
        let marker = bytes.len() >= 2 && (&bytes[..2] == b"FD" || &bytes[..2] == b"fd");
        let terminated = matches!(bytes.get(2), None | Some(b'=') | Some(b' ') | Some(b'\t'));
        if !marker || !terminated {
            return Err(PeerError::syntax("FD[=<n>] expected"));
        }

        let rest = &args[2..];
        let Some(number) = rest.strip_prefix('=') else {
            let fd = self.receive_fd()?;
            return Ok((BoundFd::Received(fd), rest.trim_start_matches(BLANKS)));
        };

        let end = number
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(number.len());
        let fd = number[..end]
            .parse::<i32>()
            .map_err(|_| PeerError::syntax("number required"))?;

        if let Some(transport) = self.io.transport() {
            if transport.inbound_fd() == Some(fd) {
                return Err(PeerError::parameter("fd same as inbound fd"));
            }
            if transport.outbound_fd() == Some(fd) {
                return Err(PeerError::parameter("fd same as outbound fd"));
            }
        }
        Ok((BoundFd::Number(fd), number[end..].trim_start_matches(BLANKS)))
    }

    fn bind_fd(&mut self, which: Binding, args: &str) -> Result<()> {
        let (fd, rest) = self.parse_fd_arg(args)?;
        let hook = match which {
            Binding::Input => self.hooks.input.clone(),
            Binding::Output => self.hooks.output.clone(),
        };

        let previous = self.binding_slot(which).replace(fd);
        let Some(hook) = hook else {
            return Ok(());
        };
        if let Err(e) = hook(self, rest) {
            *self.binding_slot(which) = previous;
            return Err(e);
        }
        Ok(())
    }

    fn binding_slot(&mut self, which: Binding) -> &mut Option<BoundFd> {
        match which {
            Binding::Input => &mut self.input_fd,
            Binding::Output => &mut self.output_fd,
        }
    }
}

fn input<S>(session: &mut Session<S>, args: &str) -> Result<()> {
    session.bind_fd(Binding::Input, args)
}

fn output<S>(session: &mut Session<S>, args: &str) -> Result<()> {
    session.bind_fd(Binding::Output, args)
}
