use bytes::{BufMut, BytesMut};

use crate::error::{LineError, Result};

/// Maximum length of a protocol line, terminator included.
pub const LINE_LENGTH: usize = 1002;

/// A data line is sent once its buffered length reaches this many bytes;
/// one escape (3 bytes) past it still leaves room for the terminator.
pub const DATA_LINE_LIMIT: usize = LINE_LENGTH - 4;

/// Marker opening a data line.
pub const DATA_PREFIX: &[u8] = b"D ";

const ESCAPE: u8 = b'%';
const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Whether `byte` must be escaped inside a data line.
pub fn needs_escape(byte: u8) -> bool {
    matches!(byte, b'%' | b'\r' | b'\n')
}

/// Append one byte to `dst`, escaped if necessary.
pub fn escape_byte(byte: u8, dst: &mut BytesMut) {
    if needs_escape(byte) {
        dst.put_u8(ESCAPE);
        dst.put_u8(HEX_UPPER[(byte >> 4) as usize]);
        dst.put_u8(HEX_UPPER[(byte & 0x0f) as usize]);
    } else {
        dst.put_u8(byte);
    }
}

/// Escape `src` for transmission in a data line.
pub fn escape(src: &[u8]) -> BytesMut {
    let mut dst = BytesMut::with_capacity(src.len());
    for &b in src {
        escape_byte(b, &mut dst);
    }
    dst
}

/// Decode `%XX` escapes in `src` and append the result to `dst`.
///
/// Either hex case is accepted. An escape that is cut short or carries a
/// non-hex digit is an error.
pub fn unescape_into(src: &[u8], dst: &mut Vec<u8>) -> Result<()> {
    let mut i = 0;
    while i < src.len() {
        match src[i..].iter().position(|&b| b == ESCAPE) {
            None => {
                dst.extend_from_slice(&src[i..]);
                break;
            }
            Some(run) => {
                dst.extend_from_slice(&src[i..i + run]);
                let at = i + run;
                let (Some(hi), Some(lo)) = (
                    src.get(at + 1).copied().and_then(hex_value),
                    src.get(at + 2).copied().and_then(hex_value),
                ) else {
                    return Err(LineError::MalformedEscape { offset: at });
                };
                dst.push((hi << 4) | lo);
                i = at + 3;
            }
        }
    }
    Ok(())
}

/// Decode `%XX` escapes in `src`.
pub fn unescape(src: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(src.len());
    unescape_into(src, &mut out)?;
    Ok(out)
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_specials_uppercase() {
        assert_eq!(&escape(b"a%b\rc\nd")[..], b"a%25b%0Dc%0Ad");
    }

    #[test]
    fn test_plain_bytes_untouched() {
        let all_plain: Vec<u8> = (0u8..=255).filter(|b| !needs_escape(*b)).collect();
        assert_eq!(&escape(&all_plain)[..], all_plain.as_slice());
    }

    #[test]
    fn test_unescape_accepts_lowercase() {
        assert_eq!(unescape(b"hello%0a").unwrap(), b"hello\n");
        assert_eq!(unescape(b"%25%0d%0A").unwrap(), b"%\r\n");
    }

    #[test]
    fn test_unescape_decodes_any_byte() {
        assert_eq!(unescape(b"%00%FF%41").unwrap(), [0x00, 0xff, b'A']);
    }

    #[test]
    fn test_roundtrip_mixed_specials() {
        let input: Vec<u8> = b"%\r\n%%\n\r\r% plain \x00\xff".to_vec();
        assert_eq!(unescape(&escape(&input)).unwrap(), input);
    }

    #[test]
    fn test_truncated_escape_rejected() {
        assert!(matches!(
            unescape(b"abc%4"),
            Err(LineError::MalformedEscape { offset: 3 })
        ));
        assert!(matches!(
            unescape(b"%"),
            Err(LineError::MalformedEscape { offset: 0 })
        ));
        assert!(matches!(
            unescape(b"%zz"),
            Err(LineError::MalformedEscape { offset: 0 })
        ));
    }
}
