use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use ctlwire_peer::{PeerError, Transcript};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Result of one command sent with `ctlwire transact`.
#[derive(Serialize, Debug)]
pub struct TransactOutput {
    pub command: String,
    pub ok: bool,
    pub data_size: usize,
    pub data: String,
    pub status: Vec<String>,
    pub inquiries: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorOutput>,
    pub timestamp: String,
    #[serde(skip)]
    raw: Vec<u8>,
}

#[derive(Serialize, Debug)]
pub struct ErrorOutput {
    pub code: u32,
    pub message: String,
}

impl TransactOutput {
    pub fn new(command: &str, transcript: Transcript, outcome: Option<&PeerError>) -> Self {
        Self {
            command: command.to_string(),
            ok: outcome.is_none(),
            data_size: transcript.data.len(),
            data: payload_preview(&transcript.data),
            status: transcript.status,
            inquiries: transcript.inquiries,
            error: outcome.map(|err| ErrorOutput {
                code: err.code(),
                message: err.description().to_string(),
            }),
            timestamp: now_unix_seconds(),
            raw: transcript.data,
        }
    }
}

pub fn print_transact(out: &TransactOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COMMAND", "RESULT", "SIZE", "STATUS", "DATA"])
                .add_row(vec![
                    out.command.clone(),
                    result_label(out),
                    out.data_size.to_string(),
                    out.status.join("\n"),
                    out.data.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for line in &out.status {
                println!("status: {line}");
            }
            for keyword in &out.inquiries {
                println!("inquire: {keyword}");
            }
            println!(
                "command={} result={} size={} data={}",
                out.command,
                result_label(out),
                out.data_size,
                out.data
            );
        }
        OutputFormat::Raw => print_raw(&out.raw),
    }
}

fn result_label(out: &TransactOutput) -> String {
    match &out.error {
        None => "OK".to_string(),
        Some(err) => format!("ERR {} {}", err.code, err.message),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctlwire_peer::ErrorKind;

    #[test]
    fn json_output_omits_missing_error() {
        let mut transcript = Transcript::new();
        transcript.data.extend_from_slice(b"hello");
        transcript.status.push("PROGRESS 1".to_string());
        let out = TransactOutput::new("ECHO hello", transcript, None);

        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(value["data"], "hello");
        assert_eq!(value["data_size"], 5);
        assert!(value.get("error").is_none());
        assert!(value.get("raw").is_none());
    }

    #[test]
    fn binary_data_is_summarised() {
        let mut transcript = Transcript::new();
        transcript.data.extend_from_slice(&[0xff, 0xfe, 0x00]);
        let err = PeerError::new(ErrorKind::Canceled);
        let out = TransactOutput::new("GETDATA", transcript, Some(&err));
        assert_eq!(out.data, "<binary 3 bytes>");
        assert!(!out.ok);
        assert_eq!(out.error.as_ref().unwrap().code, 277);
        assert_eq!(result_label(&out), format!("ERR 277 {}", err.description()));
    }
}
