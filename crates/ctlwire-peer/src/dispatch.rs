//! Command dispatch and the two server driver loops.

use ctlwire_line::{LineError, DATA_PREFIX};
use tracing::debug;

use crate::command::split_command;
use crate::config::LogCategory;
use crate::error::{ErrorKind, PeerError, Result};
use crate::session::Session;

impl<S> Session<S> {
    /// Run the handler for one command line.
    pub(crate) fn dispatch(&mut self, line: &[u8]) -> Result<()> {
        if line.starts_with(DATA_PREFIX) {
            return Err(PeerError::with_detail(
                ErrorKind::NotImplemented,
                "data line outside of an inquire",
            ));
        }
        let line = std::str::from_utf8(line)
            .map_err(|_| PeerError::syntax("command line is not valid UTF-8"))?;
        let (name, args) = split_command(line)?;
        let Some(entry) = self.commands.lookup(name) else {
            return Err(PeerError::new(ErrorKind::UnknownCommand));
        };
        let handler = entry.handler();
        let name = entry.name().to_string();

        if self.log_config().enabled(LogCategory::Engine) {
            debug!(command = %name, "dispatching");
        }
        self.current_command = Some(name);
        let rc = handler(self, args);
        self.current_command = None;
        rc
    }

    /// Route one non-comment line by session state.
    fn handle_line(&mut self, line: &[u8]) -> Result<()> {
        if !self.in_command {
            self.in_command = true;
            self.io.data.reset();
            let rc = self.dispatch(line);
            if !self.in_command {
                // The handler completed the command itself.
                return Ok(());
            }
            if rc.is_ok() && self.inquire.is_awaiting() {
                return Ok(());
            }
            if rc.is_err() {
                self.release_inquire();
            }
            self.process_done(rc)
        } else if self.inquire.is_awaiting() {
            self.feed_inquire(line)
        } else {
            debug!("unexpected client data while a command is in progress");
            Ok(())
        }
    }

    /// Complete the running command: flush pending data and answer `OK`
    /// or `ERR`.
    ///
    /// After a `BYE` the answer is `OK closing connection` and the channel
    /// is closed. The post-command hook then runs with the final result,
    /// and the confidential flag and custom `OK` text are cleared.
    /// Both drivers call this; call it directly only when a handler
    /// finishes a command outside of them.
    pub fn process_done(&mut self, rc: Result<()>) -> Result<()> {
        if !self.in_command {
            return Err(PeerError::with_detail(
                ErrorKind::General,
                "no command in progress",
            ));
        }
        self.in_command = false;

        let flushed = self.io.data_flush();
        let mut rc = rc;
        if rc.is_ok() {
            if let Err(err) = flushed {
                rc = Err(PeerError::Write(err));
            }
        }

        let written = match &rc {
            Ok(()) if self.process_complete => {
                let _ = self.io.write_line(None, b"OK closing connection");
                self.finish();
                Ok(())
            }
            Ok(()) => {
                let line = self.okay_line.take().unwrap_or_else(|| "OK".to_string());
                self.io.write_line(None, line.as_bytes())
            }
            Err(err) => {
                if self.log_config().enabled(LogCategory::Engine) {
                    debug!(code = err.code(), error = %err, "command failed");
                }
                self.io.write_line(None, err.err_line().as_bytes())
            }
        };

        if let Some(hook) = self.hooks.post_command.clone() {
            hook(self, &rc);
        }
        self.io.log.confidential = false;
        self.okay_line = None;
        written.map_err(PeerError::Write)
    }

    /// Serve the current connection until the peer says `BYE` or closes
    /// the channel. Blocks on every read.
    pub fn process(&mut self) -> Result<()> {
        if self.inquire.is_active() {
            return Err(PeerError::new(ErrorKind::NestedCommands));
        }
        while !self.process_complete {
            match self.io.read_line_retry() {
                Ok(()) => {}
                Err(LineError::Eof) => {
                    self.process_complete = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }
            let line = self.io.line().to_vec();
            if line.is_empty() || line[0] == b'#' {
                continue;
            }
            self.handle_line(&line)?;
        }
        Ok(())
    }

    /// Handle whatever input is available without blocking and report
    /// whether the connection is finished.
    ///
    /// Returns `Ok(false)` when the channel would block; poll the inbound
    /// descriptor and call again. Lines already buffered are handled in
    /// the same call.
    pub fn process_next(&mut self) -> Result<bool> {
        loop {
            match self.io.read_line() {
                Ok(()) => {}
                Err(e) if e.is_would_block() => return Ok(false),
                Err(LineError::Eof) => {
                    self.process_complete = true;
                    return Ok(true);
                }
                Err(e) => return Err(e.into()),
            }
            let line = self.io.line().to_vec();
            if !line.is_empty() && line[0] != b'#' {
                self.handle_line(&line)?;
            }
            if self.process_complete || !self.io.reader.pending() {
                break;
            }
        }
        Ok(self.process_complete)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufReader, Read, Write};
    use std::net::Shutdown;
    use std::os::unix::net::UnixStream;
    use std::sync::{Arc, Mutex};

    use ctlwire_transport::Channel;

    use super::*;
    use crate::config::{LogConfig, ServerConfig};
    use crate::session::tests::{read_reply, server_pair};

    /// Feed `input` to a fresh server, run it to completion and return
    /// every reply line.
    fn run_script<S: 'static>(
        session: &mut Session<S>,
        mut peer: UnixStream,
        input: &[u8],
    ) -> Vec<String> {
        peer.write_all(input).unwrap();
        peer.shutdown(Shutdown::Write).unwrap();
        session.process().unwrap();
        session.finish();
        let mut out = String::new();
        peer.read_to_string(&mut out).unwrap();
        out.lines().map(str::to_string).collect()
    }

    #[test]
    fn command_gets_ok() {
        let (mut session, peer) = server_pair(Vec::<String>::new());
        session
            .register_command(
                "FOO",
                |s, args| {
                    s.context_mut().push(args.to_string());
                    Ok(())
                },
                None,
            )
            .unwrap();

        let replies = run_script(&mut session, peer, b"FOO bar\n");
        assert_eq!(replies, vec!["OK"]);
        assert_eq!(session.context(), &vec!["bar".to_string()]);
        assert!(session.is_complete());
    }

    #[test]
    fn unknown_command_gets_err() {
        let (mut session, peer) = server_pair(());
        let replies = run_script(&mut session, peer, b"UNKNOWNCMD\n");
        assert_eq!(replies.len(), 1);
        assert!(replies[0].starts_with("ERR 275 "), "{}", replies[0]);
    }

    #[test]
    fn leading_whitespace_is_syntax_error() {
        let (mut session, peer) = server_pair(());
        let replies = run_script(&mut session, peer, b"   NOP\n");
        assert_eq!(
            replies,
            vec!["ERR 276 IPC syntax error <ctlwire> - leading white-space"]
        );
    }

    #[test]
    fn non_utf8_arguments_are_rejected() {
        let (mut session, peer) = server_pair(Vec::<String>::new());
        session
            .register_command(
                "FOO",
                |s, args| {
                    s.context_mut().push(args.to_string());
                    Ok(())
                },
                None,
            )
            .unwrap();

        let replies = run_script(&mut session, peer, b"FOO \xff\xfe\nFOO ok\n");
        assert_eq!(
            replies,
            vec![
                "ERR 276 IPC syntax error <ctlwire> - command line is not valid UTF-8",
                "OK"
            ]
        );
        assert_eq!(session.context(), &vec!["ok".to_string()]);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let (mut session, peer) = server_pair(());
        let replies = run_script(&mut session, peer, b"# hello\n\r\n\nNOP\n");
        assert_eq!(replies, vec!["OK"]);
    }

    #[test]
    fn names_match_case_insensitively() {
        let (mut session, peer) = server_pair(0u32);
        session
            .register_command(
                "GETINFO",
                |s, _| {
                    *s.context_mut() += 1;
                    Ok(())
                },
                None,
            )
            .unwrap();
        let replies = run_script(&mut session, peer, b"getinfo\nGetInfo version\n");
        assert_eq!(replies, vec!["OK", "OK"]);
        assert_eq!(*session.context(), 2);
    }

    #[test]
    fn data_line_outside_inquire_is_rejected() {
        let (mut session, peer) = server_pair(());
        let replies = run_script(&mut session, peer, b"D stray\n");
        assert!(replies[0].starts_with("ERR 69 "), "{}", replies[0]);
    }

    #[test]
    fn handler_error_carries_detail() {
        let (mut session, peer) = server_pair(());
        session
            .register_command(
                "CHECK",
                |_, _| Err(PeerError::handler(1001, "Bad passphrase").detailed("retry")),
                None,
            )
            .unwrap();
        let replies = run_script(&mut session, peer, b"CHECK\n");
        assert_eq!(replies, vec!["ERR 1001 Bad passphrase <user> - retry"]);
    }

    #[test]
    fn data_is_flushed_before_status() {
        let (mut session, peer) = server_pair(());
        session
            .register_command(
                "GETDATA",
                |s, _| {
                    s.write_status("PROGRESS", "1")?;
                    s.send_data(b"abc\n")
                },
                None,
            )
            .unwrap();
        let replies = run_script(&mut session, peer, b"GETDATA\n");
        assert_eq!(replies, vec!["S PROGRESS 1", "D abc%0A", "OK"]);
    }

    #[test]
    fn okay_line_applies_to_one_command() {
        let (mut session, peer) = server_pair(());
        session
            .register_command(
                "VERSION",
                |s, _| {
                    s.set_okay_line(Some("1.2.3"));
                    Ok(())
                },
                None,
            )
            .unwrap();
        let replies = run_script(&mut session, peer, b"VERSION\nNOP\n");
        assert_eq!(replies, vec!["OK 1.2.3", "OK"]);
    }

    #[test]
    fn post_command_hook_sees_every_result() {
        let (mut session, peer) = server_pair(());
        let codes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&codes);
        session.set_post_command_notify(move |_, rc| {
            sink.lock().unwrap().push(rc.as_ref().err().map(PeerError::code));
        });
        run_script(&mut session, peer, b"NOP\nBOGUS\n");
        assert_eq!(*codes.lock().unwrap(), vec![None, Some(275)]);
    }

    #[test]
    fn confidential_cleared_after_command() {
        let (mut session, peer) = server_pair(());
        session
            .register_command(
                "SECRET",
                |s, _| {
                    s.begin_confidential();
                    Ok(())
                },
                None,
            )
            .unwrap();
        run_script(&mut session, peer, b"SECRET\n");
        assert!(!session.is_confidential());
    }

    #[test]
    fn command_name_set_while_running() {
        let (mut session, peer) = server_pair(None::<String>);
        session
            .register_command(
                "Whoami",
                |s, _| {
                    let name = s.command_name().map(str::to_string);
                    *s.context_mut() = name;
                    Ok(())
                },
                None,
            )
            .unwrap();
        run_script(&mut session, peer, b"WHOAMI\n");
        assert_eq!(session.context().as_deref(), Some("Whoami"));
        assert!(session.command_name().is_none());
    }

    #[test]
    fn inquire_during_command() {
        let (mut session, peer) = server_pair(Vec::new());
        session
            .register_command(
                "BAR",
                |s, _| {
                    let data = s.inquire("DATA", 0)?;
                    *s.context_mut() = data;
                    Ok(())
                },
                None,
            )
            .unwrap();
        let replies = run_script(&mut session, peer, b"BAR\nD hello%0A\nEND\n");
        assert_eq!(replies, vec!["INQUIRE DATA", "OK"]);
        assert_eq!(session.context(), b"hello\n");
    }

    #[test]
    fn cancelled_inquire_fails_command() {
        let (mut session, peer) = server_pair(());
        session
            .register_command("BAR", |s, _| s.inquire("DATA", 0).map(|_| ()), None)
            .unwrap();
        let replies = run_script(&mut session, peer, b"BAR\nCAN\nNOP\n");
        assert_eq!(replies[0], "INQUIRE DATA");
        assert!(replies[1].starts_with("ERR 277 "), "{}", replies[1]);
        assert_eq!(replies[2], "OK");
    }

    #[test]
    fn process_done_requires_command() {
        let (mut session, _peer) = server_pair(());
        let err = session.process_done(Ok(())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::General);
    }

    fn nonblocking_server() -> (Session<Vec<u8>>, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let channel = Channel::from_unix(ours);
        channel.set_nonblocking(true).unwrap();
        let session = Session::server(
            channel,
            ServerConfig::default().with_log(Arc::new(LogConfig::quiet())),
            Vec::new(),
        )
        .unwrap();
        (session, theirs)
    }

    #[test]
    fn process_next_returns_on_would_block() {
        let (mut session, mut peer) = nonblocking_server();
        assert!(!session.process_next().unwrap());

        peer.write_all(b"NOP\nNO").unwrap();
        assert!(!session.process_next().unwrap());
        peer.write_all(b"P\n").unwrap();
        assert!(!session.process_next().unwrap());

        let mut reader = BufReader::new(peer.try_clone().unwrap());
        assert_eq!(read_reply(&mut reader), "OK");
        assert_eq!(read_reply(&mut reader), "OK");

        peer.shutdown(Shutdown::Write).unwrap();
        assert!(session.process_next().unwrap());
    }

    #[test]
    fn process_next_drives_continuation_inquire() {
        let (mut session, mut peer) = nonblocking_server();
        session
            .register_command(
                "GETDATA",
                |s, _| {
                    s.inquire_ext("DATA", 0, |s, result| {
                        *s.context_mut() = result?;
                        s.set_okay_line(Some("got it"));
                        Ok(())
                    })
                },
                None,
            )
            .unwrap();

        peer.write_all(b"GETDATA\n").unwrap();
        assert!(!session.process_next().unwrap());
        assert_eq!(session.pending_inquire(), Some("DATA"));

        peer.write_all(b"D xy\nD z\nEND\n").unwrap();
        assert!(!session.process_next().unwrap());
        assert_eq!(session.context(), b"xyz");
        assert!(session.pending_inquire().is_none());

        let mut reader = BufReader::new(peer);
        assert_eq!(read_reply(&mut reader), "INQUIRE DATA");
        assert_eq!(read_reply(&mut reader), "OK got it");
    }
}
