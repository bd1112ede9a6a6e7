//! Text encodings for subprocess I/O.
//!
//! Output arrives in arbitrary byte chunks, so decoding is incremental: a
//! multi-byte sequence split across two reads is held back until the rest
//! of it shows up. Undecodable bytes become U+FFFD.

use std::fmt;
use std::str::FromStr;

use crate::error::TaskrunError;
use crate::Result;

const REPLACEMENT: char = '\u{FFFD}';

/// A supported text encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
    Ascii,
}

impl Encoding {
    /// The encoding named by the locale environment, or UTF-8.
    ///
    /// Looks at `LC_ALL`, `LC_CTYPE` and `LANG` in that order; the first
    /// non-empty one decides.
    pub fn preferred() -> Self {
        ["LC_ALL", "LC_CTYPE", "LANG"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .find(|value| !value.is_empty())
            .map(|locale| Self::from_locale(&locale))
            .unwrap_or_default()
    }

    fn from_locale(locale: &str) -> Self {
        if locale == "C" || locale == "POSIX" {
            return Encoding::Ascii;
        }
        locale
            .split('.')
            .nth(1)
            .map(|codeset| codeset.split('@').next().unwrap_or(codeset))
            .and_then(|codeset| codeset.parse().ok())
            .unwrap_or_default()
    }

    /// Canonical label.
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Latin1 => "latin-1",
            Encoding::Ascii => "ascii",
        }
    }

    /// Encode `text`, substituting `?` for characters this encoding lacks.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Encoding::Utf8 => text.as_bytes().to_vec(),
            Encoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
            Encoding::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
        }
    }

    /// A fresh streaming decoder.
    pub fn decoder(&self) -> IncrementalDecoder {
        IncrementalDecoder {
            encoding: *self,
            pending: Vec::new(),
        }
    }
}

impl FromStr for Encoding {
    type Err = TaskrunError;

    fn from_str(label: &str) -> Result<Self> {
        let normalized: String = label
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "utf8" => Ok(Encoding::Utf8),
            "latin1" | "iso88591" | "l1" | "cp819" => Ok(Encoding::Latin1),
            "ascii" | "usascii" | "ansix3.41968" | "646" => Ok(Encoding::Ascii),
            _ => Err(TaskrunError::InvalidOptions(format!(
                "unknown encoding: {label:?}"
            ))),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Streaming decoder holding back incomplete trailing sequences.
#[derive(Debug)]
pub struct IncrementalDecoder {
    encoding: Encoding,
    pending: Vec<u8>,
}

impl IncrementalDecoder {
    /// Decode the next chunk.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        match self.encoding {
            Encoding::Utf8 => self.decode_utf8(chunk),
            Encoding::Latin1 => chunk.iter().map(|&b| char::from(b)).collect(),
            Encoding::Ascii => chunk
                .iter()
                .map(|&b| if b.is_ascii() { char::from(b) } else { REPLACEMENT })
                .collect(),
        }
    }

    /// Flush whatever is still held back.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }

    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(len) => {
                            out.push(REPLACEMENT);
                            rest = &after[len..];
                        }
                        // Truncated sequence at the end: wait for more bytes.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        self.pending = rest.to_vec();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!("UTF-8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("utf8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("latin-1".parse::<Encoding>().unwrap(), Encoding::Latin1);
        assert_eq!("ISO-8859-1".parse::<Encoding>().unwrap(), Encoding::Latin1);
        assert_eq!("US-ASCII".parse::<Encoding>().unwrap(), Encoding::Ascii);
        assert!("ebcdic".parse::<Encoding>().is_err());
    }

    #[test]
    fn test_locale_codeset() {
        assert_eq!(Encoding::from_locale("en_US.UTF-8"), Encoding::Utf8);
        assert_eq!(Encoding::from_locale("de_DE.ISO-8859-1@euro"), Encoding::Latin1);
        assert_eq!(Encoding::from_locale("C"), Encoding::Ascii);
        assert_eq!(Encoding::from_locale("en_US"), Encoding::Utf8);
    }

    #[test]
    fn test_split_multibyte_sequence() {
        let bytes = "héllo €".as_bytes();
        let mut decoder = Encoding::Utf8.decoder();
        let mut text = String::new();
        for byte in bytes {
            text.push_str(&decoder.decode(std::slice::from_ref(byte)));
        }
        text.push_str(&decoder.finish());
        assert_eq!(text, "héllo €");
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let mut decoder = Encoding::Utf8.decoder();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_truncated_tail_flushed_on_finish() {
        let mut decoder = Encoding::Utf8.decoder();
        assert_eq!(decoder.decode(b"ok\xe2\x82"), "ok");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[test]
    fn test_latin1_and_ascii() {
        let mut latin = Encoding::Latin1.decoder();
        assert_eq!(latin.decode(b"caf\xe9"), "café");
        assert_eq!(Encoding::Latin1.encode("café€"), b"caf\xe9?");

        let mut ascii = Encoding::Ascii.decoder();
        assert_eq!(ascii.decode(b"ok\x80"), "ok\u{FFFD}");
        assert_eq!(Encoding::Ascii.encode("né"), b"n?");
    }
}
