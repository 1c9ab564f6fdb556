//! Parameter parsing for the `Content-Disposition` and `Content-Type` part headers.

use crate::charset::Charset;
use http::header::{HeaderMap, HeaderValue, CONTENT_DISPOSITION, CONTENT_TYPE};
use log::debug;
use memchr::memchr2;
use percent_encoding::percent_decode_str;
use std::borrow::Cow;

/// The field name and optional file name of a part
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Disposition {
    pub(crate) name: Option<String>,
    pub(crate) file_name: Option<String>,
}

/// Read the `form-data` disposition of a part.
///
/// `filename*` (RFC 5987) wins over `filename` when both are present. A header which is not UTF-8
/// is read in `fallback`, as browsers send raw file names in the charset of the form.
pub(crate) fn parse_disposition(
    headers: &HeaderMap<HeaderValue>,
    fallback: Charset,
) -> Disposition {
    let Some(value) = header_text(headers, CONTENT_DISPOSITION.as_str(), fallback) else {
        return Disposition::default();
    };
    let value = value.as_ref();

    let kind = value.split(';').next().unwrap_or_default().trim();
    if !kind.eq_ignore_ascii_case("form-data") {
        debug!("Ignoring part with disposition `{kind}`");
        return Disposition::default();
    }

    let name = get_dispo_param(value, "name").map(Cow::into_owned);
    let file_name = get_ext_param(value, "filename*")
        .or_else(|| get_dispo_param(value, "filename").map(Cow::into_owned));

    Disposition { name, file_name }
}

/// The charset declared on the `Content-Type` of a part, if it is one we know
pub(crate) fn part_charset(headers: &HeaderMap<HeaderValue>) -> Option<Charset> {
    let value = header_str(headers, CONTENT_TYPE.as_str())?;
    let (_, params) = value.split_once(';')?;

    let label = Params { rest: params }
        .find(|(name, _)| name.eq_ignore_ascii_case("charset"))
        .map(|(_, value)| value)?;

    let charset = Charset::from_label(&label);
    if charset.is_none() {
        debug!("Unknown part charset `{label}`, using the default");
    }
    charset
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap<HeaderValue>, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|val| std::str::from_utf8(val.as_bytes()).ok())
}

/// Like [`header_str`], decoding a value which is not UTF-8 with `fallback`
fn header_text<'a>(
    headers: &'a HeaderMap<HeaderValue>,
    name: &str,
    fallback: Charset,
) -> Option<Cow<'a, str>> {
    let bytes = headers.get(name)?.as_bytes();

    match std::str::from_utf8(bytes) {
        Ok(value) => Some(Cow::Borrowed(value)),
        Err(_) => Some(fallback.decode(bytes)),
    }
}

/// Get a disposition param from a header value, unescaping quotes and percent encoding
pub(crate) fn get_dispo_param<'a>(input: &'a str, param: &str) -> Option<Cow<'a, str>> {
    let (_, params) = input.split_once(';')?;

    let value = Params { rest: params }
        .find(|(name, _)| name.eq_ignore_ascii_case(param))
        .map(|(_, value)| value)?;

    if value.contains('%') {
        let decoded = percent_decode_str(&value).decode_utf8_lossy().into_owned();
        return Some(Cow::Owned(decoded));
    }

    Some(value)
}

/// Get an extended (`charset'lang'value`) disposition param
fn get_ext_param(input: &str, param: &str) -> Option<String> {
    let (_, params) = input.split_once(';')?;

    let value = Params { rest: params }
        .find(|(name, _)| name.eq_ignore_ascii_case(param))
        .map(|(_, value)| value)?;

    let (charset, encoded) = split_ext_value(&value);
    let bytes: Vec<u8> = percent_decode_str(encoded).collect();

    Some(charset.decode(&bytes).into_owned())
}

fn split_ext_value(value: &str) -> (Charset, &str) {
    let mut pieces = value.splitn(3, '\'');

    match (pieces.next(), pieces.next(), pieces.next()) {
        (Some(label), Some(_lang), Some(encoded)) => {
            (Charset::from_label(label).unwrap_or_default(), encoded)
        }
        _ => (Charset::Utf8, value),
    }
}

/// Iterates `name=value` pairs after the first `;` of a header value
struct Params<'a> {
    rest: &'a str,
}

impl<'a> Iterator for Params<'a> {
    type Item = (&'a str, Cow<'a, str>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let rest = self
                .rest
                .trim_start_matches(|c: char| c == ';' || c.is_ascii_whitespace());

            if rest.is_empty() {
                self.rest = rest;
                return None;
            }

            let name_end = rest.find(['=', ';']).unwrap_or(rest.len());
            let name = rest[..name_end].trim();
            let after = &rest[name_end..];

            let Some(value_src) = after.strip_prefix('=') else {
                // a bare parameter without a value
                self.rest = after;
                continue;
            };

            let value_src = value_src.trim_start();

            let (value, rest) = match value_src.strip_prefix('"') {
                Some(quoted) => unquote(quoted),
                None => {
                    let end = value_src.find(';').unwrap_or(value_src.len());
                    (Cow::Borrowed(value_src[..end].trim_end()), &value_src[end..])
                }
            };

            self.rest = rest;
            return Some((name, value));
        }
    }
}

/// Read a quoted string (after the opening quote), returning the value and the remaining input.
///
/// Only `\"` and `\\` are escapes: browsers send windows paths with bare backslashes.
fn unquote(input: &str) -> (Cow<'_, str>, &str) {
    let bytes = input.as_bytes();
    let mut escaped: Option<String> = None;
    let mut start = 0;

    while let Some(idx) = memchr2(b'"', b'\\', &bytes[start..]).map(|idx| idx + start) {
        if bytes[idx] == b'"' {
            let value = match escaped {
                Some(mut buffer) => {
                    buffer.push_str(&input[start..idx]);
                    Cow::Owned(buffer)
                }
                None => Cow::Borrowed(&input[..idx]),
            };
            return (value, &input[idx + 1..]);
        }

        match bytes.get(idx + 1) {
            Some(next @ (b'"' | b'\\')) => {
                let buffer = escaped.get_or_insert_with(String::new);
                buffer.push_str(&input[start..idx]);
                buffer.push(char::from(*next));
                start = idx + 2;
            }
            _ => {
                let buffer = escaped.get_or_insert_with(String::new);
                buffer.push_str(&input[start..=idx]);
                start = idx + 1;
            }
        }
    }

    // unterminated quote: take everything that is left
    let value = match escaped {
        Some(mut buffer) => {
            buffer.push_str(&input[start..]);
            Cow::Owned(buffer)
        }
        None => Cow::Borrowed(input),
    };

    (value, "")
}
