//! Character sets used to turn decoded bytes into text values.

use std::borrow::Cow;
use std::fmt;

/// The character sets a form value may be declared in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    /// `UTF-8`, invalid sequences are replaced with `U+FFFD`
    #[default]
    Utf8,
    /// `ISO-8859-1`, every byte maps to the code point of the same value
    Latin1,
    /// `US-ASCII`, bytes above `0x7f` are replaced with `U+FFFD`
    UsAscii,
}

impl Charset {
    /// Look up a charset from its label, i.e, the `charset` parameter of a `Content-Type` header
    pub fn from_label(label: &str) -> Option<Charset> {
        let label = label.trim().trim_matches('"');

        if label.eq_ignore_ascii_case("utf-8") || label.eq_ignore_ascii_case("utf8") {
            return Some(Charset::Utf8);
        }

        match label.to_ascii_lowercase().as_str() {
            "iso-8859-1" | "iso8859-1" | "iso_8859-1" | "latin1" | "l1" => Some(Charset::Latin1),
            "us-ascii" | "ascii" => Some(Charset::UsAscii),
            _ => None,
        }
    }

    /// The canonical label of this charset
    pub fn label(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Latin1 => "ISO-8859-1",
            Charset::UsAscii => "US-ASCII",
        }
    }

    /// Decode `bytes` into text
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes),
            Charset::Latin1 => match std::str::from_utf8(bytes) {
                Ok(ascii) if ascii.is_ascii() => Cow::Borrowed(ascii),
                _ => Cow::Owned(bytes.iter().map(|&b| b as char).collect()),
            },
            Charset::UsAscii => match std::str::from_utf8(bytes) {
                Ok(ascii) if ascii.is_ascii() => Cow::Borrowed(ascii),
                _ => Cow::Owned(
                    bytes
                        .iter()
                        .map(|&b| if b.is_ascii() { b as char } else { '\u{fffd}' })
                        .collect(),
                ),
            },
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
