//! Client side: reading server responses and running transactions.

use std::collections::HashMap;
use std::io::Write;

use ctlwire_line::{unescape, DATA_PREFIX};
use tracing::debug;

use crate::error::{ErrorKind, PeerError, Result};
use crate::session::{DataStream, Role, Session};

/// Kinds of line a server sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// `D <data>`
    Data,
    /// `S <keyword> [text]`
    Status,
    /// `OK [text]`
    Ok,
    /// `ERR <code> <description>`
    Err,
    /// `INQUIRE <keyword>`
    Inquire,
    /// `END`
    End,
    /// `# comment`
    Comment,
}

fn keyword_offset(line: &[u8], keyword: &[u8]) -> Option<usize> {
    if !line.starts_with(keyword) {
        return None;
    }
    match line.get(keyword.len()) {
        None | Some(b' ') => {
            let skipped = line[keyword.len()..]
                .iter()
                .take_while(|&&b| b == b' ')
                .count();
            Some(keyword.len() + skipped)
        }
        Some(_) => None,
    }
}

/// Classify a response line and return the offset of its payload.
pub fn parse_response(line: &[u8]) -> Result<(Response, usize)> {
    if line.starts_with(DATA_PREFIX) {
        return Ok((Response::Data, 2));
    }
    if line.starts_with(b"#") {
        return Ok((Response::Comment, 1));
    }
    if line.starts_with(b"END") && matches!(line.get(3), None | Some(b' ')) {
        return Ok((Response::End, 3));
    }
    let keywords: [(&[u8], Response); 4] = [
        (b"S", Response::Status),
        (b"OK", Response::Ok),
        (b"ERR", Response::Err),
        (b"INQUIRE", Response::Inquire),
    ];
    for (keyword, response) in keywords {
        if let Some(offset) = keyword_offset(line, keyword) {
            return Ok((response, offset));
        }
    }
    Err(PeerError::with_detail(
        ErrorKind::InvalidResponse,
        String::from_utf8_lossy(&line[..line.len().min(40)]).into_owned(),
    ))
}

/// Receives the output of [`Session::transact`].
///
/// Data and inquiries are refused unless the matching method is
/// implemented; status lines are ignored by default.
pub trait TransactHandler {
    fn on_data(&mut self, _data: &[u8]) -> Result<()> {
        Err(PeerError::new(ErrorKind::NoDataCallback))
    }

    /// The server sent `END` after its data.
    fn on_data_end(&mut self) -> Result<()> {
        Err(PeerError::new(ErrorKind::NoDataCallback))
    }

    /// Answer `INQUIRE <keyword>` by writing to `reply`; `END` is sent
    /// afterwards.
    fn on_inquire(&mut self, _keyword: &str, _reply: &mut DataStream<'_>) -> Result<()> {
        Err(PeerError::new(ErrorKind::NoInquireCallback))
    }

    fn on_status(&mut self, _line: &str) -> Result<()> {
        Ok(())
    }
}

/// A handler that records everything and answers inquiries from a table.
#[derive(Debug, Default)]
pub struct Transcript {
    pub data: Vec<u8>,
    pub status: Vec<String>,
    pub inquiries: Vec<String>,
    pub ended: bool,
    answers: HashMap<String, Vec<u8>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply `data` when the server inquires `keyword`. Unknown keywords
    /// get an empty reply.
    pub fn with_answer(mut self, keyword: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.answers.insert(keyword.into(), data.into());
        self
    }
}

impl TransactHandler for Transcript {
    fn on_data(&mut self, data: &[u8]) -> Result<()> {
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn on_data_end(&mut self) -> Result<()> {
        self.ended = true;
        Ok(())
    }

    fn on_inquire(&mut self, keyword: &str, reply: &mut DataStream<'_>) -> Result<()> {
        self.inquiries.push(keyword.to_string());
        let name = keyword.split(' ').next().unwrap_or(keyword);
        if let Some(answer) = self.answers.get(name) {
            reply
                .write_all(answer)
                .map_err(|e| PeerError::Write(e.into()))?;
        }
        Ok(())
    }

    fn on_status(&mut self, line: &str) -> Result<()> {
        self.status.push(line.to_string());
        Ok(())
    }
}

impl<S> Session<S> {
    /// Read the next non-blank line and classify it. Data lines come back
    /// unescaped; other payloads start after the keyword.
    pub fn read_response(&mut self) -> Result<(Response, Vec<u8>)> {
        loop {
            self.io.read_line_retry()?;
            if !self.io.line().is_empty() {
                break;
            }
        }
        let line = self.io.line();
        let (response, offset) = parse_response(line)?;
        let payload = match response {
            Response::Data => unescape(&line[offset..])?,
            _ => line[offset..].to_vec(),
        };
        Ok((response, payload))
    }

    /// Like [`read_response`](Self::read_response), skipping comments.
    pub fn read_from_server(&mut self) -> Result<(Response, Vec<u8>)> {
        loop {
            let (response, payload) = self.read_response()?;
            if response != Response::Comment {
                return Ok((response, payload));
            }
        }
    }

    /// Expect the server's greeting.
    pub(crate) fn initial_handshake(&mut self) -> Result<()> {
        let (response, payload) = self.read_from_server()?;
        if response != Response::Ok {
            return Err(PeerError::with_detail(
                ErrorKind::ConnectFailed,
                format!(
                    "can't connect server: {}",
                    String::from_utf8_lossy(&payload)
                ),
            ));
        }
        debug!(greeting = %String::from_utf8_lossy(&payload), "connected to server");
        Ok(())
    }

    /// Send `command` and feed the server's output to `handler` until the
    /// final `OK` or `ERR`.
    ///
    /// An `ERR` answer becomes [`PeerError::Remote`]. Empty commands and
    /// comments are sent without waiting for an answer.
    pub fn transact<H>(&mut self, command: &str, handler: &mut H) -> Result<()>
    where
        H: TransactHandler + ?Sized,
    {
        if self.role != Role::Client {
            return Err(PeerError::new(ErrorKind::NotAClient));
        }
        self.write_line(command)?;
        if command.is_empty() || command.starts_with('#') {
            return Ok(());
        }

        loop {
            let (response, payload) = self.read_from_server()?;
            match response {
                Response::Ok => return Ok(()),
                Response::Err => return Err(remote_error(&payload)),
                Response::Data => handler.on_data(&payload)?,
                Response::End => handler.on_data_end()?,
                Response::Status => handler.on_status(&String::from_utf8_lossy(&payload))?,
                Response::Inquire => {
                    let keyword = String::from_utf8_lossy(&payload).into_owned();
                    let rc = {
                        let mut reply = DataStream::new(&mut self.io);
                        handler.on_inquire(&keyword, &mut reply)
                    };
                    match rc {
                        Ok(()) => self.flush_data()?,
                        Err(e) if e.kind() == ErrorKind::NoInquireCallback => {
                            self.write_line("END")?;
                            let _ = self.read_from_server();
                            return Err(e);
                        }
                        Err(e) => return Err(e),
                    }
                }
                Response::Comment => {}
            }
        }
    }
}

fn remote_error(payload: &[u8]) -> PeerError {
    let text = String::from_utf8_lossy(payload).into_owned();
    let digits = text.bytes().take_while(u8::is_ascii_digit).count();
    let code = text[..digits]
        .parse::<u32>()
        .ok()
        .filter(|code| *code != 0)
        .unwrap_or(ErrorKind::General.code());
    PeerError::Remote { code, text }
}

#[cfg(test)]
mod tests {
    use std::io::{BufReader, Write};
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;
    use std::thread;

    use ctlwire_transport::Channel;

    use super::*;
    use crate::config::{ConnectConfig, LogConfig, ServerConfig};
    use crate::connector::connect_channel;
    use crate::session::tests::read_reply;

    #[test]
    fn parse_response_kinds() {
        assert_eq!(parse_response(b"D abc").unwrap(), (Response::Data, 2));
        assert_eq!(parse_response(b"S  PROGRESS 1").unwrap(), (Response::Status, 3));
        assert_eq!(parse_response(b"OK").unwrap(), (Response::Ok, 2));
        assert_eq!(parse_response(b"OK  fine").unwrap(), (Response::Ok, 4));
        assert_eq!(parse_response(b"ERR 275 x").unwrap(), (Response::Err, 4));
        assert_eq!(parse_response(b"INQUIRE PIN").unwrap(), (Response::Inquire, 8));
        assert_eq!(parse_response(b"END").unwrap(), (Response::End, 3));
        assert_eq!(parse_response(b"# hi").unwrap(), (Response::Comment, 1));
    }

    #[test]
    fn parse_response_rejects_lookalikes() {
        for line in [&b"OKAY"[..], b"ERROR", b"SX", b"ENDING", b"BYE", b"d x"] {
            let err = parse_response(line).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidResponse);
        }
    }

    #[test]
    fn remote_error_code_parsed() {
        match remote_error(b"275 Unknown IPC command <ctlwire>") {
            PeerError::Remote { code, text } => {
                assert_eq!(code, 275);
                assert!(text.ends_with("<ctlwire>"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(remote_error(b"oops").code(), 257);
    }

    fn quiet_server(channel: Channel) -> Session<()> {
        let mut server = Session::server(
            channel,
            ServerConfig::default().with_log(Arc::new(LogConfig::quiet())),
            (),
        )
        .unwrap();
        server
            .register_command(
                "GETDATA",
                |s, _| {
                    s.write_status("PROGRESS", "50")?;
                    s.send_data(b"line one\nline two")
                },
                None,
            )
            .unwrap();
        server
            .register_command(
                "ECHOBACK",
                |s, _| {
                    let data = s.inquire("DATA", 0)?;
                    s.send_data(&data)
                },
                None,
            )
            .unwrap();
        server
    }

    fn pair() -> (Session<()>, thread::JoinHandle<()>) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let server = thread::spawn(move || {
            let mut server = quiet_server(Channel::from_unix(theirs));
            server.serve().unwrap();
        });
        let client = connect_channel(
            Channel::from_unix(ours),
            &ConnectConfig::default().with_log(Arc::new(LogConfig::quiet())),
            (),
        )
        .unwrap();
        (client, server)
    }

    #[test]
    fn transact_collects_data_and_status() {
        let (mut client, server) = pair();
        let mut transcript = Transcript::new();
        client.transact("GETDATA", &mut transcript).unwrap();
        assert_eq!(transcript.data, b"line one\nline two");
        assert_eq!(transcript.status, vec!["PROGRESS 50"]);
        client.release();
        server.join().unwrap();
    }

    #[test]
    fn transact_answers_inquire() {
        let (mut client, server) = pair();
        let mut transcript = Transcript::new().with_answer("DATA", b"100%\r\n".to_vec());
        client.transact("ECHOBACK", &mut transcript).unwrap();
        assert_eq!(transcript.inquiries, vec!["DATA"]);
        assert_eq!(transcript.data, b"100%\r\n");
        client.release();
        server.join().unwrap();
    }

    #[test]
    fn transact_reports_remote_error() {
        let (mut client, server) = pair();
        let err = client.transact("NOSUCH", &mut Transcript::new()).unwrap_err();
        assert!(matches!(err, PeerError::Remote { code: 275, .. }));
        assert_eq!(err.code(), 275);

        client.transact("NOP", &mut Transcript::new()).unwrap();
        client.release();
        server.join().unwrap();
    }

    struct Ignorant;
    impl TransactHandler for Ignorant {}

    #[test]
    fn missing_callbacks_are_reported() {
        let (mut client, server) = pair();
        let err = client.transact("GETDATA", &mut Ignorant).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoDataCallback);
        drop(client);
        server.join().unwrap();

        let (mut client, server) = pair();
        let err = client.transact("ECHOBACK", &mut Ignorant).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoInquireCallback);
        client.transact("NOP", &mut Ignorant).unwrap();
        client.release();
        server.join().unwrap();
    }

    #[test]
    fn comments_are_not_answered() {
        let (mut client, server) = pair();
        client.transact("# just a note", &mut Ignorant).unwrap();
        client.transact("NOP", &mut Ignorant).unwrap();
        client.release();
        server.join().unwrap();
    }

    #[test]
    fn handshake_requires_ok() {
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        theirs.write_all(b"# banner\nERR 258 go away\n").unwrap();
        let err = connect_channel(
            Channel::from_unix(ours),
            &ConnectConfig::default().with_log(Arc::new(LogConfig::quiet())),
            (),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectFailed);
    }

    #[test]
    fn release_says_bye() {
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        theirs.write_all(b"OK hello\n").unwrap();
        let client = connect_channel(
            Channel::from_unix(ours),
            &ConnectConfig::default().with_log(Arc::new(LogConfig::quiet())),
            (),
        )
        .unwrap();
        client.release();
        let mut reader = BufReader::new(theirs);
        assert_eq!(read_reply(&mut reader), "BYE");
    }

    #[test]
    fn client_cannot_inquire_and_server_cannot_transact() {
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        theirs.write_all(b"OK\n").unwrap();
        let mut client = connect_channel(
            Channel::from_unix(ours),
            &ConnectConfig::default().with_log(Arc::new(LogConfig::quiet())),
            (),
        )
        .unwrap();
        assert_eq!(client.inquire("X", 0).unwrap_err().kind(), ErrorKind::NotAServer);

        let mut server = crate::session::tests::detached_server(());
        let err = server.transact("NOP", &mut Ignorant).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAClient);
    }
}
