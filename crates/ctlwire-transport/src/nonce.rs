//! Nonce authentication for loopback-emulated local sockets.
//!
//! The server binds to a loopback TCP port and writes `<port>\n<nonce>` to
//! the path a local socket would have used. Clients read that file, connect
//! to the port and send the 16 nonce bytes before anything else.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand_core::{OsRng, RngCore};
use tracing::{debug, warn};

use crate::address::parse_port;
use crate::error::{Result, TransportError};

/// Size of the shared secret in bytes.
pub const NONCE_LEN: usize = 16;

/// Longest nonce file accepted: up to five port digits, newline, nonce.
const MAX_NONCE_FILE_LEN: usize = 5 + 1 + NONCE_LEN;

/// A 16-byte shared secret. `Debug` never shows the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    /// Draw a fresh nonce from the operating system's random source.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))?;
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }

    /// Compare without short-circuiting on the first differing byte.
    pub fn matches(&self, other: &[u8; NONCE_LEN]) -> bool {
        self.0
            .iter()
            .zip(other.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Nonce([REDACTED])")
    }
}

/// Write a nonce file. Fails if `path` already exists.
pub fn write_nonce_file(path: &Path, port: u16, nonce: &Nonce) -> Result<()> {
    let mut contents = format!("{port}\n").into_bytes();
    contents.extend_from_slice(nonce.as_bytes());

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| TransportError::Bind {
            path: path.to_path_buf(),
            source: e,
        })?;
    file.write_all(&contents)?;
    debug!(?path, port, "wrote nonce file");
    Ok(())
}

/// Read a nonce file, returning the loopback port and the nonce.
pub fn read_nonce_file(path: &Path) -> Result<(u16, Nonce)> {
    let bad = |reason| TransportError::BadNonceFile {
        path: path.to_path_buf(),
        reason,
    };

    let mut contents = Vec::with_capacity(MAX_NONCE_FILE_LEN + 1);
    std::fs::File::open(path)
        .map_err(|e| TransportError::Connect {
            address: path.display().to_string(),
            source: e,
        })?
        .take(MAX_NONCE_FILE_LEN as u64 + 1)
        .read_to_end(&mut contents)?;

    let newline = contents
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| bad("missing port terminator"))?;
    let port = std::str::from_utf8(&contents[..newline]).map_err(|_| bad("port is not text"))?;
    let port = parse_port(port).map_err(bad)?;

    let secret: [u8; NONCE_LEN] = contents[newline + 1..]
        .try_into()
        .map_err(|_| bad("nonce has wrong length"))?;
    Ok((port, Nonce(secret)))
}

/// Send the nonce as the first bytes on a fresh connection.
pub fn send_nonce<W: Write + ?Sized>(stream: &mut W, nonce: &Nonce) -> Result<()> {
    stream.write_all(nonce.as_bytes())?;
    stream.flush()?;
    Ok(())
}

/// Read exactly 16 bytes from a newly accepted connection and compare them
/// against `expected`. Would-block is retried after a short sleep.
pub fn check_nonce<R: Read + ?Sized>(stream: &mut R, expected: &Nonce) -> Result<()> {
    let mut received = [0u8; NONCE_LEN];
    let mut filled = 0;
    while filled < NONCE_LEN {
        match stream.read(&mut received[filled..]) {
            Ok(0) => {
                warn!(filled, "peer closed before sending nonce");
                return Err(TransportError::NonceMismatch);
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => return Err(e.into()),
        }
    }

    if expected.matches(&received) {
        Ok(())
    } else {
        warn!("nonce mismatch on accepted connection");
        Err(TransportError::NonceMismatch)
    }
}

/// Owned nonce file that is removed on drop.
#[derive(Debug)]
pub struct NonceFile {
    path: PathBuf,
}

impl NonceFile {
    pub fn create(path: impl Into<PathBuf>, port: u16, nonce: &Nonce) -> Result<Self> {
        let path = path.into();
        write_nonce_file(&path, port, nonce)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for NonceFile {
    fn drop(&mut self) {
        debug!(path = ?self.path, "removing nonce file");
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn temp_path(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "ctlwire-nonce-{tag}-{}-{nanos}",
            std::process::id()
        ))
    }

    #[test]
    fn test_nonce_file_layout() {
        let path = temp_path("layout");
        let nonce = Nonce::from_bytes([7u8; NONCE_LEN]);
        let file = NonceFile::create(&path, 4711, &nonce).unwrap();

        let raw = std::fs::read(file.path()).unwrap();
        assert_eq!(&raw[..5], b"4711\n");
        assert_eq!(&raw[5..], &[7u8; NONCE_LEN]);

        let (port, parsed) = read_nonce_file(&path).unwrap();
        assert_eq!(port, 4711);
        assert_eq!(parsed, nonce);

        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn test_write_refuses_existing_file() {
        let path = temp_path("exists");
        std::fs::write(&path, b"occupied").unwrap();
        let nonce = Nonce::from_bytes([1u8; NONCE_LEN]);
        assert!(write_nonce_file(&path, 1, &nonce).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_read_rejects_malformed_files() {
        let cases: [&[u8]; 4] = [
            b"1234",                      // no newline
            b"0\n0123456789abcdef",       // port out of range
            b"99999\n0123456789abcdef",   // port out of range
            b"1234\n0123456789abcde",     // short nonce
        ];
        for (i, contents) in cases.iter().enumerate() {
            let path = temp_path(&format!("bad{i}"));
            std::fs::write(&path, contents).unwrap();
            assert!(
                matches!(read_nonce_file(&path), Err(TransportError::BadNonceFile { .. })),
                "case {i} should be rejected"
            );
            let _ = std::fs::remove_file(&path);
        }

        let path = temp_path("long");
        std::fs::write(&path, b"1234\n0123456789abcdefXX").unwrap();
        assert!(read_nonce_file(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_check_nonce() {
        let nonce = Nonce::from_bytes(*b"0123456789abcdef");
        let mut good = Cursor::new(b"0123456789abcdef".to_vec());
        assert!(check_nonce(&mut good, &nonce).is_ok());

        let mut wrong = Cursor::new(b"0123456789abcdeX".to_vec());
        assert!(matches!(
            check_nonce(&mut wrong, &nonce),
            Err(TransportError::NonceMismatch)
        ));

        let mut short = Cursor::new(b"0123".to_vec());
        assert!(matches!(
            check_nonce(&mut short, &nonce),
            Err(TransportError::NonceMismatch)
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let nonce = Nonce::from_bytes(*b"supersecretbytes");
        let rendered = format!("{nonce:?}");
        assert!(!rendered.contains("supersecret"));
    }

    #[test]
    fn test_generate_differs() {
        let a = Nonce::generate().unwrap();
        let b = Nonce::generate().unwrap();
        assert_ne!(a, b);
    }
}
