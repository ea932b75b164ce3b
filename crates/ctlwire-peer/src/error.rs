use std::fmt;

use ctlwire_line::LineError;
use ctlwire_transport::TransportError;

/// Protocol error kinds with their stable wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    General,
    AcceptFailed,
    ConnectFailed,
    InvalidResponse,
    InvalidValue,
    IncompleteLine,
    LineTooLong,
    NestedCommands,
    NoDataCallback,
    NoInquireCallback,
    NotAServer,
    NotAClient,
    ServerStart,
    ReadError,
    WriteError,
    TooMuchData,
    UnexpectedCommand,
    UnknownCommand,
    Syntax,
    Canceled,
    Parameter,
    NotFound,
    NotImplemented,
    ServerFault,
    Eof,
}

impl ErrorKind {
    /// Numeric code sent in `ERR` lines.
    pub fn code(self) -> u32 {
        match self {
            Self::General => 257,
            Self::AcceptFailed => 258,
            Self::ConnectFailed => 259,
            Self::InvalidResponse => 260,
            Self::InvalidValue => 261,
            Self::IncompleteLine => 262,
            Self::LineTooLong => 263,
            Self::NestedCommands => 264,
            Self::NoDataCallback => 265,
            Self::NoInquireCallback => 266,
            Self::NotAServer => 267,
            Self::NotAClient => 268,
            Self::ServerStart => 269,
            Self::ReadError => 270,
            Self::WriteError => 271,
            Self::TooMuchData => 273,
            Self::UnexpectedCommand => 274,
            Self::UnknownCommand => 275,
            Self::Syntax => 276,
            Self::Canceled => 277,
            Self::Parameter => 280,
            Self::NotFound => 27,
            Self::NotImplemented => 69,
            Self::ServerFault => 80,
            Self::Eof => 16383,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::General => "General IPC error",
            Self::AcceptFailed => "IPC accept call failed",
            Self::ConnectFailed => "IPC connect call failed",
            Self::InvalidResponse => "Invalid response",
            Self::InvalidValue => "Invalid value passed to IPC",
            Self::IncompleteLine => "Incomplete line passed to IPC",
            Self::LineTooLong => "Line passed to IPC too long",
            Self::NestedCommands => "Nested IPC commands",
            Self::NoDataCallback => "No data callback in IPC",
            Self::NoInquireCallback => "No inquire callback in IPC",
            Self::NotAServer => "Not an IPC server",
            Self::NotAClient => "Not an IPC client",
            Self::ServerStart => "Problem starting IPC server",
            Self::ReadError => "IPC read error",
            Self::WriteError => "IPC write error",
            Self::TooMuchData => "Too much data for IPC layer",
            Self::UnexpectedCommand => "Unexpected IPC command",
            Self::UnknownCommand => "Unknown IPC command",
            Self::Syntax => "IPC syntax error",
            Self::Canceled => "IPC call has been cancelled",
            Self::Parameter => "IPC parameter error",
            Self::NotFound => "Not found",
            Self::NotImplemented => "Not implemented",
            Self::ServerFault => "Server fault",
            Self::Eof => "End of file",
        }
    }

    /// Look a kind up by its wire code.
    pub fn from_code(code: u32) -> Option<Self> {
        const ALL: [ErrorKind; 25] = [
            ErrorKind::General,
            ErrorKind::AcceptFailed,
            ErrorKind::ConnectFailed,
            ErrorKind::InvalidResponse,
            ErrorKind::InvalidValue,
            ErrorKind::IncompleteLine,
            ErrorKind::LineTooLong,
            ErrorKind::NestedCommands,
            ErrorKind::NoDataCallback,
            ErrorKind::NoInquireCallback,
            ErrorKind::NotAServer,
            ErrorKind::NotAClient,
            ErrorKind::ServerStart,
            ErrorKind::ReadError,
            ErrorKind::WriteError,
            ErrorKind::TooMuchData,
            ErrorKind::UnexpectedCommand,
            ErrorKind::UnknownCommand,
            ErrorKind::Syntax,
            ErrorKind::Canceled,
            ErrorKind::Parameter,
            ErrorKind::NotFound,
            ErrorKind::NotImplemented,
            ErrorKind::ServerFault,
            ErrorKind::Eof,
        ];
        ALL.into_iter().find(|kind| kind.code() == code)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Errors produced by sessions, handlers and clients.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// A protocol-level failure.
    #[error("{kind}{}", DetailSuffix(.detail))]
    Protocol {
        kind: ErrorKind,
        detail: Option<String>,
    },

    /// An application failure returned by a command handler.
    #[error("{description} ({code}){}", DetailSuffix(.detail))]
    Handler {
        code: u32,
        description: String,
        detail: Option<String>,
    },

    /// The server answered `ERR`.
    #[error("server error {code}: {text}")]
    Remote { code: u32, text: String },

    /// Channel setup or descriptor handling failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Reading a line failed.
    #[error("read error: {0}")]
    Read(#[from] LineError),

    /// Writing a line failed.
    #[error("write error: {0}")]
    Write(#[source] LineError),
}

struct DetailSuffix<'a>(&'a Option<String>);

impl fmt::Display for DetailSuffix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(detail) => write!(f, " - {detail}"),
            None => Ok(()),
        }
    }
}

impl PeerError {
    pub fn new(kind: ErrorKind) -> Self {
        Self::Protocol { kind, detail: None }
    }

    pub fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self::Protocol {
            kind,
            detail: Some(detail.into()),
        }
    }

    /// An application error to report to the peer.
    pub fn handler(code: u32, description: impl Into<String>) -> Self {
        Self::Handler {
            code,
            description: description.into(),
            detail: None,
        }
    }

    pub fn syntax(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Syntax, detail)
    }

    pub fn parameter(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Parameter, detail)
    }

    /// The protocol kind this error maps to. Handler and remote errors
    /// report [`ErrorKind::General`] unless their code is a known one.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Protocol { kind, .. } => *kind,
            Self::Handler { code, .. } | Self::Remote { code, .. } => {
                ErrorKind::from_code(*code).unwrap_or(ErrorKind::General)
            }
            Self::Transport(err) => match err {
                TransportError::Accept(_) | TransportError::NonceMismatch => {
                    ErrorKind::AcceptFailed
                }
                TransportError::Connect { .. }
                | TransportError::BadNonceFile { .. }
                | TransportError::Spawn { .. } => ErrorKind::ConnectFailed,
                TransportError::Bind { .. } | TransportError::PathTooLong { .. } => {
                    ErrorKind::ServerStart
                }
                TransportError::BadAddress { .. } => ErrorKind::InvalidValue,
                TransportError::NoPendingDescriptor => ErrorKind::Parameter,
                TransportError::Unsupported(_) => ErrorKind::NotImplemented,
                TransportError::Io(_) => ErrorKind::General,
            },
            Self::Read(err) => match err {
                LineError::Eof => ErrorKind::Eof,
                LineError::LineTooLong { .. } => ErrorKind::LineTooLong,
                LineError::IncompleteLine => ErrorKind::IncompleteLine,
                LineError::MalformedEscape { .. } => ErrorKind::Syntax,
                LineError::Io(_) => ErrorKind::ReadError,
            },
            Self::Write(_) => ErrorKind::WriteError,
        }
    }

    /// Numeric code for the `ERR` line.
    pub fn code(&self) -> u32 {
        match self {
            Self::Handler { code, .. } | Self::Remote { code, .. } => *code,
            other => other.kind().code(),
        }
    }

    /// Short description for the `ERR` line.
    pub fn description(&self) -> &str {
        match self {
            Self::Handler { description, .. } => description,
            Self::Remote { text, .. } => text,
            other => other.kind().description(),
        }
    }

    /// Which subsystem the error originated in.
    pub fn source_tag(&self) -> &'static str {
        match self {
            Self::Protocol { .. } | Self::Read(_) | Self::Write(_) => "ctlwire",
            Self::Handler { .. } => "user",
            Self::Remote { .. } => "server",
            Self::Transport(err) => {
                if err.io_error().is_some() {
                    "os"
                } else {
                    "ctlwire"
                }
            }
        }
    }

    /// Free-text detail appended to the `ERR` line.
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Protocol { detail, .. } | Self::Handler { detail, .. } => detail.clone(),
            Self::Transport(err) => err.io_error().map(ToString::to_string),
            Self::Read(LineError::Io(e)) | Self::Write(LineError::Io(e)) => Some(e.to_string()),
            _ => None,
        }
    }

    /// Attach or replace the free-text detail.
    pub fn detailed(self, text: impl Into<String>) -> Self {
        match self {
            Self::Protocol { kind, .. } => Self::Protocol {
                kind,
                detail: Some(text.into()),
            },
            Self::Handler {
                code, description, ..
            } => Self::Handler {
                code,
                description,
                detail: Some(text.into()),
            },
            other => Self::Protocol {
                kind: other.kind(),
                detail: Some(text.into()),
            },
        }
    }

    /// True for the EOF condition that ends a connection.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Read(LineError::Eof))
            || matches!(self, Self::Protocol { kind: ErrorKind::Eof, .. })
    }

    /// Render the `ERR` status line for this error.
    pub fn err_line(&self) -> String {
        let description: String = self.description().chars().take(50).collect();
        let source: String = self.source_tag().chars().take(30).collect();
        match self.detail() {
            Some(detail) => {
                let detail: String = detail.chars().take(100).collect();
                format!("ERR {} {description} <{source}> - {detail}", self.code())
            }
            None => format!("ERR {} {description} <{source}>", self.code()),
        }
    }
}

impl From<ErrorKind> for PeerError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
