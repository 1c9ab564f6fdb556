//! Streaming `Content-Transfer-Encoding` decoders applied to part bodies.
//!
//! Each decoder carries whatever partial input it could not decode yet across calls,
//! so a part body may be handed over in arbitrarily split chunks.

use crate::error::FormError;
use crate::multipart::PartHandler;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use bytes::BytesMut;
use memchr::memchr;
use std::mem;

/// Base64 as used in MIME bodies: padding optional, trailing bits tolerated
const MIME_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// A part body decoder selected from the `Content-Transfer-Encoding` header
#[derive(Debug)]
pub(crate) enum Decoder {
    Identity,
    Base64 {
        /// Significant characters not yet forming a full quantum (0..=3 between calls)
        carry: BytesMut,
    },
    QuotedPrintable {
        escape: Escape,
    },
}

/// How far into an `=XX` sequence a quoted-printable decoder is
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Escape {
    None,
    /// `=` seen
    Equals,
    /// `=` and the first hex digit seen (decoded value, raw byte)
    Hex(u8, u8),
    /// `=\r` seen, a soft line break waiting for its `\n`
    SoftBreak,
}

impl Decoder {
    /// Pick a decoder for a `Content-Transfer-Encoding` value, falling back to identity
    pub(crate) fn for_encoding(encoding: Option<&str>) -> Decoder {
        match encoding.map(str::trim) {
            Some(enc) if enc.eq_ignore_ascii_case("base64") => Decoder::Base64 {
                carry: BytesMut::new(),
            },
            Some(enc) if enc.eq_ignore_ascii_case("quoted-printable") => {
                Decoder::QuotedPrintable {
                    escape: Escape::None,
                }
            }
            _ => Decoder::Identity,
        }
    }

    /// Decode `input`, forwarding whatever could be decoded to `handler`
    pub(crate) fn decode<H: PartHandler>(
        &mut self,
        input: &[u8],
        handler: &mut H,
    ) -> Result<(), FormError> {
        if input.is_empty() {
            return Ok(());
        }

        match self {
            Decoder::Identity => handler.data(input),
            Decoder::Base64 { carry } => decode_base64(carry, input, handler),
            Decoder::QuotedPrintable { escape } => decode_quoted_printable(escape, input, handler),
        }
    }

    /// Flush carried state at the end of a part
    pub(crate) fn finish<H: PartHandler>(&mut self, handler: &mut H) -> Result<(), FormError> {
        match self {
            Decoder::Identity => Ok(()),
            Decoder::Base64 { carry } => {
                if carry.is_empty() {
                    return Ok(());
                }
                let decoded = MIME_BASE64.decode(&carry[..])?;
                carry.clear();
                handler.data(&decoded)
            }
            // an escape cut short by the end of the part is kept literally
            Decoder::QuotedPrintable { escape } => match mem::replace(escape, Escape::None) {
                Escape::Equals => handler.data(b"="),
                Escape::Hex(_, raw) => handler.data(&[b'=', raw]),
                Escape::None | Escape::SoftBreak => Ok(()),
            },
        }
    }
}

fn decode_base64<H: PartHandler>(
    carry: &mut BytesMut,
    input: &[u8],
    handler: &mut H,
) -> Result<(), FormError> {
    carry.extend(input.iter().copied().filter(|b| !b.is_ascii_whitespace()));

    let whole = carry.len() / 4 * 4;
    let mut start = 0;

    // A padded quantum ends one base64 run: decode up to and including it on its own
    while start < whole {
        let end = match memchr(b'=', &carry[start..whole]) {
            Some(idx) => ((start + idx) / 4 + 1) * 4,
            None => whole,
        };

        let decoded = MIME_BASE64.decode(&carry[start..end])?;
        handler.data(&decoded)?;
        start = end;
    }

    let _ = carry.split_to(whole);
    Ok(())
}

fn decode_quoted_printable<H: PartHandler>(
    escape: &mut Escape,
    input: &[u8],
    handler: &mut H,
) -> Result<(), FormError> {
    let mut out = BytesMut::with_capacity(input.len());
    let mut idx = 0;

    while idx < input.len() {
        let byte = input[idx];

        match *escape {
            Escape::None => {
                // copy everything up to the next `=` in one go
                let run = memchr(b'=', &input[idx..]).unwrap_or(input.len() - idx);
                out.extend_from_slice(&input[idx..idx + run]);
                idx += run;
                if idx < input.len() {
                    *escape = Escape::Equals;
                    idx += 1;
                }
                continue;
            }
            Escape::Equals => match byte {
                b'\r' => *escape = Escape::SoftBreak,
                b'\n' => *escape = Escape::None,
                _ => match hex_value(byte) {
                    Some(value) => *escape = Escape::Hex(value, byte),
                    None => {
                        // not an escape after all, keep it literally
                        out.extend_from_slice(&[b'=', byte]);
                        *escape = Escape::None;
                    }
                },
            },
            Escape::Hex(high, raw) => {
                match hex_value(byte) {
                    Some(low) => out.extend_from_slice(&[(high << 4) | low]),
                    None => out.extend_from_slice(&[b'=', raw, byte]),
                }
                *escape = Escape::None;
            }
            Escape::SoftBreak => {
                *escape = Escape::None;
                if byte != b'\n' {
                    // a lone `=\r`, treat it as the soft break and read this byte as data
                    continue;
                }
            }
        }

        idx += 1;
    }

    if out.is_empty() {
        return Ok(());
    }

    handler.data(&out)
}

/// The value of one hex digit, either case
pub(crate) fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        _ => None,
    }
}
